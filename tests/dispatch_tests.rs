use async_trait::async_trait;
use chrono::NaiveDate;
use rscan_dispatch::{
    config::Config,
    model::{
        DispatchContext, DomainScanRequest, FeatureSet, KeywordRule, OrgId, PocScanRequest, PortScanRequest,
        XScanRequest,
    },
    partition::SliceMode,
    query::{MatchMode, SearchEngine},
    queue::{MemoryTaskQueue, TaskEnvelope},
    resolve::{format_ip_target, DomainResolver, PORTSCAN_RECORD_SOURCE},
    store::MemoryStore,
    suffix::SuffixList,
    DispatchError, Dispatcher, Result,
};
use serde_json::Value;
use std::collections::HashMap;

struct StaticResolver {
    answers: HashMap<String, Vec<String>>,
}

impl StaticResolver {
    fn new(answers: Vec<(&str, Vec<&str>)>) -> Self {
        Self {
            answers: answers
                .into_iter()
                .map(|(domain, ips)| (domain.to_string(), ips.into_iter().map(str::to_string).collect()))
                .collect(),
        }
    }
}

#[async_trait]
impl DomainResolver for StaticResolver {
    async fn resolve(&self, domain: &str) -> Vec<String> {
        self.answers.get(domain).cloned().unwrap_or_default()
    }
}

struct Harness {
    config: Config,
    queue: MemoryTaskQueue,
    store: MemoryStore,
    resolver: StaticResolver,
}

impl Harness {
    fn new() -> Self {
        Self::with_queue(MemoryTaskQueue::new())
    }

    fn with_queue(queue: MemoryTaskQueue) -> Self {
        Self {
            config: Config::default(),
            queue,
            store: MemoryStore::new(),
            resolver: StaticResolver::new(vec![("example.com", vec!["93.184.216.34"])]),
        }
    }

    fn dispatcher(&self) -> Dispatcher<'_> {
        Dispatcher::new(
            &self.config,
            &self.queue,
            &self.store,
            &self.store,
            &self.resolver,
            SuffixList::bundled(),
        )
    }

    fn payloads(&self) -> Vec<Value> {
        self.queue.submitted().iter().map(payload).collect()
    }
}

fn payload(task: &TaskEnvelope) -> Value {
    serde_json::from_str(&task.kwargs).unwrap()
}

fn ctx() -> DispatchContext {
    DispatchContext::new("main-1", 3)
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
}

#[tokio::test]
async fn test_format_ip_target_resolves_domains() {
    let store = MemoryStore::new();
    let resolver = StaticResolver::new(vec![("example.com", vec!["93.184.216.34"])]);

    let targets = format_ip_target("10.0.0.5\nexample.com", OrgId::from_raw(2), &resolver, &store, 4).await;

    assert_eq!(targets, vec!["10.0.0.5", "93.184.216.34"]);
    let records = store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].domain, "example.com");
    assert_eq!(records[0].tag, "A");
    assert_eq!(records[0].content, "93.184.216.34");
    assert_eq!(records[0].source, PORTSCAN_RECORD_SOURCE);
    assert_eq!(records[0].org_id, OrgId::from_raw(2));
}

#[tokio::test]
async fn test_format_ip_target_drops_unresolved_and_keeps_order() {
    let store = MemoryStore::new();
    let resolver = StaticResolver::new(vec![("b.example.com", vec!["10.1.1.1", "10.1.1.2"])]);

    let targets = format_ip_target(
        "a.example.com\n10.0.0.0/24\nb.example.com\n\n10.0.0.1-10.0.0.9",
        None,
        &resolver,
        &store,
        1,
    )
    .await;

    assert_eq!(targets, vec!["10.0.0.0/24", "10.1.1.1", "10.1.1.2", "10.0.0.1-10.0.0.9"]);
    assert_eq!(store.records().len(), 2);
}

#[tokio::test]
async fn test_port_scan_applies_defaults() -> Result<()> {
    let harness = Harness::new();
    let req = PortScanRequest {
        target: "10.0.0.5\nexample.com".to_string(),
        ..Default::default()
    };

    let tasks = harness.dispatcher().start_port_scan(&req, &ctx()).await?;

    assert_eq!(tasks.len(), 1);
    assert_eq!(harness.queue.kinds(), vec!["portscan"]);
    let submitted = harness.queue.submitted();
    assert_eq!(submitted[0].task_id, tasks[0]);
    assert_eq!(submitted[0].main_task_id, "main-1");

    let config = payload(&submitted[0]);
    assert_eq!(config["target"], "10.0.0.5,93.184.216.34");
    assert_eq!(config["port"], "--top-ports 1000");
    assert_eq!(config["rate"], 1000);
    assert_eq!(config["tech"], "-sS");
    assert_eq!(config["cmdbin"], "masscan");
    assert_eq!(config["workspace_id"], 3);
    assert!(config.get("orgid").is_none());
    assert_eq!(harness.store.records().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_port_scan_fan_out_order() -> Result<()> {
    let mut harness = Harness::new();
    harness.config.task.ip_slice_number = 1;
    let req = PortScanRequest {
        target: "10.0.0.0/24\n10.0.1.1".to_string(),
        port: "80,443".to_string(),
        org_id: OrgId::from_raw(9),
        slice_mode: SliceMode::ByIp,
        features: FeatureSet {
            is_ip_location: true,
            is_fofa: true,
            is_hunter: true,
            ..Default::default()
        },
        ..Default::default()
    };

    let tasks = harness.dispatcher().start_port_scan(&req, &ctx()).await?;

    // no location lookup for the subnet slice
    assert_eq!(
        harness.queue.kinds(),
        vec!["portscan", "fofa", "hunter", "portscan", "iplocation", "fofa", "hunter"]
    );
    assert_eq!(tasks.len(), 7);

    let payloads = harness.payloads();
    assert_eq!(payloads[0]["target"], "10.0.0.0/24");
    assert_eq!(payloads[0]["port"], "80,443");
    assert_eq!(payloads[0]["orgid"], 9);
    assert_eq!(payloads[1]["target"], "10.0.0.0/24");
    assert_eq!(payloads[1]["is_ip_location"], true);
    assert_eq!(payloads[4]["target"], "10.0.1.1");
    assert_eq!(payloads[4]["orgid"], 9);
    Ok(())
}

#[tokio::test]
async fn test_port_scan_crosses_ip_and_port_slices() -> Result<()> {
    let mut harness = Harness::new();
    harness.config.task.ip_slice_number = 1;
    harness.config.task.port_slice_number = 2;
    let req = PortScanRequest {
        target: "10.0.0.1\n10.0.0.2".to_string(),
        port: "22,80,443,8080".to_string(),
        slice_mode: SliceMode::ByIpAndPort,
        features: FeatureSet {
            is_ip_location: true,
            is_fofa: true,
            ..Default::default()
        },
        ..Default::default()
    };

    let tasks = harness.dispatcher().start_port_scan(&req, &ctx()).await?;

    assert_eq!(tasks.len(), 12);
    let per_pair = ["portscan", "iplocation", "fofa"];
    assert_eq!(harness.queue.kinds(), per_pair.repeat(4));

    let payloads = harness.payloads();
    let scans: Vec<(&str, &str)> = payloads
        .iter()
        .step_by(3)
        .map(|config| (config["target"].as_str().unwrap(), config["port"].as_str().unwrap()))
        .collect();
    assert_eq!(
        scans,
        vec![
            ("10.0.0.1", "22,80"),
            ("10.0.0.1", "443,8080"),
            ("10.0.0.2", "22,80"),
            ("10.0.0.2", "443,8080"),
        ]
    );
    // location and online lookups follow the scan of the same pair
    for (pair, chunk) in payloads.chunks(3).enumerate() {
        let target = if pair < 2 { "10.0.0.1" } else { "10.0.0.2" };
        assert!(chunk.iter().all(|config| config["target"] == target));
    }
    Ok(())
}

#[tokio::test]
async fn test_batch_scan_crosses_ip_and_port_slices() -> Result<()> {
    let mut harness = Harness::new();
    harness.config.task.ip_slice_number = 1;
    harness.config.task.port_slice_number = 2;
    let req = PortScanRequest {
        target: "10.0.0.1\n10.0.0.2".to_string(),
        port: "22,80,443,8080".to_string(),
        slice_mode: SliceMode::ByIpAndPort,
        ..Default::default()
    };

    harness.dispatcher().start_batch_scan(&req, &ctx()).await?;

    assert_eq!(harness.queue.kinds(), vec!["batchscan"; 4]);
    let payloads = harness.payloads();
    let pairs: Vec<(&str, &str)> = payloads
        .iter()
        .map(|config| (config["target"].as_str().unwrap(), config["port"].as_str().unwrap()))
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("10.0.0.1", "22,80"),
            ("10.0.0.1", "443,8080"),
            ("10.0.0.2", "22,80"),
            ("10.0.0.2", "443,8080"),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_port_scan_skips_location_when_port_scanning() -> Result<()> {
    let harness = Harness::new();
    let req = PortScanRequest {
        target: "10.0.0.1".to_string(),
        features: FeatureSet {
            is_port_scan: true,
            is_ip_location: true,
            ..Default::default()
        },
        ..Default::default()
    };

    harness.dispatcher().start_port_scan(&req, &ctx()).await?;

    assert_eq!(harness.queue.kinds(), vec!["portscan"]);
    Ok(())
}

#[tokio::test]
async fn test_first_failed_submission_aborts_fan_out() {
    let mut harness = Harness::with_queue(MemoryTaskQueue::failing_after(2));
    harness.config.task.ip_slice_number = 1;
    let req = PortScanRequest {
        target: "10.0.0.1\n10.0.0.2".to_string(),
        slice_mode: SliceMode::ByIp,
        features: FeatureSet {
            is_fofa: true,
            is_quake: true,
            ..Default::default()
        },
        ..Default::default()
    };

    let err = harness.dispatcher().start_port_scan(&req, &ctx()).await.unwrap_err();

    match err {
        DispatchError::Submit { kind, .. } => assert_eq!(kind, "quake"),
        other => panic!("unexpected error: {}", other),
    }
    // already submitted tasks stay queued
    assert_eq!(harness.queue.kinds(), vec!["portscan", "fofa"]);
}

#[tokio::test]
async fn test_batch_scan_defaults() -> Result<()> {
    let harness = Harness::new();
    let req = PortScanRequest {
        target: "10.0.0.1".to_string(),
        cmd_bin: "zmap".to_string(),
        ..Default::default()
    };

    harness.dispatcher().start_batch_scan(&req, &ctx()).await?;

    assert_eq!(harness.queue.kinds(), vec!["batchscan"]);
    let config = &harness.payloads()[0];
    assert_eq!(config["port"], "80,443,8080|--top-ports 1000");
    assert_eq!(config["cmdbin"], "masscan");
    // each unset field falls back to its own default
    assert_eq!(config["rate"], 1000);
    assert_eq!(config["tech"], "-sS");
    assert_eq!(config["target"], "10.0.0.1");

    let harness = Harness::new();
    let req = PortScanRequest {
        target: "10.0.0.1".to_string(),
        port: "22".to_string(),
        cmd_bin: "nmap".to_string(),
        rate: 50,
        nmap_tech: "-sT".to_string(),
        ..Default::default()
    };
    harness.dispatcher().start_batch_scan(&req, &ctx()).await?;

    let config = &harness.payloads()[0];
    assert_eq!(config["port"], "22");
    assert_eq!(config["cmdbin"], "nmap");
    assert_eq!(config["rate"], 50);
    assert_eq!(config["tech"], "-sT");
    Ok(())
}

#[tokio::test]
async fn test_domain_scan_fallback_per_slice() -> Result<()> {
    let mut harness = Harness::new();
    harness.config.task.domain_slice_number = 1;
    let req = DomainScanRequest {
        target: "a.example.com\n10.0.0.1\nb.example.com".to_string(),
        slice_mode: SliceMode::ByIp,
        ..Default::default()
    };

    harness.dispatcher().start_domain_scan(&req, &ctx()).await?;

    assert_eq!(harness.queue.kinds(), vec!["domainscan", "domainscan"]);
    let payloads = harness.payloads();
    assert_eq!(payloads[0]["target"], "a.example.com");
    assert_eq!(payloads[1]["target"], "b.example.com");
    Ok(())
}

#[tokio::test]
async fn test_domain_scan_single_strategy() -> Result<()> {
    let harness = Harness::new();
    let req = DomainScanRequest {
        target: "example.com".to_string(),
        features: FeatureSet {
            is_subdomain_brute: true,
            ..Default::default()
        },
        ..Default::default()
    };

    harness.dispatcher().start_domain_scan(&req, &ctx()).await?;

    assert_eq!(harness.queue.kinds(), vec!["subdomainbrute"]);
    let config = &harness.payloads()[0];
    assert_eq!(config["is_subdomain_finder"], false);
    assert_eq!(config["is_subdomain_brute"], true);
    assert_eq!(config["is_crawler"], false);
    Ok(())
}

#[tokio::test]
async fn test_domain_scan_strategies_are_exclusive_per_task() -> Result<()> {
    let harness = Harness::new();
    let req = DomainScanRequest {
        target: "example.com".to_string(),
        org_id: OrgId::from_raw(0),
        features: FeatureSet {
            is_subfinder: true,
            is_subdomain_brute: true,
            is_crawler: true,
            is_fofa: true,
            is_icp_query: true,
            is_whois_query: true,
            ..Default::default()
        },
        ..Default::default()
    };

    harness.dispatcher().start_domain_scan(&req, &ctx()).await?;

    assert_eq!(
        harness.queue.kinds(),
        vec!["subfinder", "subdomainbrute", "subdomaincrawler", "fofa", "icpquery", "whoisquery"]
    );
    let payloads = harness.payloads();
    let flags = |config: &Value| {
        (
            config["is_subdomain_finder"].as_bool().unwrap(),
            config["is_subdomain_brute"].as_bool().unwrap(),
            config["is_crawler"].as_bool().unwrap(),
        )
    };
    assert_eq!(flags(&payloads[0]), (true, false, false));
    assert_eq!(flags(&payloads[1]), (false, true, false));
    assert_eq!(flags(&payloads[2]), (false, false, true));
    assert_eq!(payloads[3]["is_ip_location"], true);
    assert_eq!(payloads[4], serde_json::json!({ "target": "example.com" }));
    assert!(payloads.iter().all(|config| config.get("orgid").is_none()));
    Ok(())
}

#[tokio::test]
async fn test_domain_scan_reduces_to_registrable_domains() -> Result<()> {
    let harness = Harness::new();
    let req = DomainScanRequest {
        target: "a.example.com\nb.example.com\nwww.test.co.uk\nwww.example.pt\nmail.example.ie\nlocalhost"
            .to_string(),
        features: FeatureSet {
            is_fld_domain: true,
            ..Default::default()
        },
        ..Default::default()
    };

    harness.dispatcher().start_domain_scan(&req, &ctx()).await?;

    assert_eq!(
        harness.payloads()[0]["target"],
        "example.com,test.co.uk,example.pt,example.ie"
    );
    Ok(())
}

#[tokio::test]
async fn test_domain_scan_without_domains_submits_nothing() -> Result<()> {
    let harness = Harness::new();
    let req = DomainScanRequest {
        target: "10.0.0.1\n\n".to_string(),
        ..Default::default()
    };

    let tasks = harness.dispatcher().start_domain_scan(&req, &ctx()).await?;

    assert!(tasks.is_empty());
    assert!(harness.queue.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_poc_scan_gates_engines() -> Result<()> {
    let harness = Harness::new();
    let req = PocScanRequest {
        target: "http://10.0.0.1:8080\nhttps://example.com".to_string(),
        xray_poc_file: "default/*.yml".to_string(),
        features: FeatureSet {
            is_xray_verify: true,
            is_nuclei_verify: true,
            is_goby_verify: true,
            ..Default::default()
        },
        ..Default::default()
    };

    harness.dispatcher().start_poc_scan(&req, &ctx()).await?;

    // nuclei is enabled but has no POC file
    assert_eq!(harness.queue.kinds(), vec!["xray", "goby"]);
    let payloads = harness.payloads();
    assert_eq!(payloads[0]["target"], "http://10.0.0.1:8080,https://example.com");
    assert_eq!(payloads[0]["poc_file"], "default/*.yml");
    assert_eq!(payloads[0]["cmdbin"], "xray");
    assert_eq!(payloads[1]["cmdbin"], "goby");
    Ok(())
}

#[tokio::test]
async fn test_xonline_keyword_targets_named_engine() -> Result<()> {
    let harness = Harness::new();
    let req = XScanRequest {
        target: "domain=\"example.com\"".to_string(),
        online_api_engine: "xhunter".to_string(),
        ..Default::default()
    };

    harness.dispatcher().start_xonline_keyword(&req, &ctx()).await?;

    assert_eq!(harness.queue.kinds(), vec!["xhunter"]);
    let config = &harness.payloads()[0];
    assert_eq!(config["hunter"], true);
    assert_eq!(config["fofa"], false);
    assert_eq!(config["onlineapiKeyword"], "domain=\"example.com\"");
    assert_eq!(config["onlineapiSearchLimit"], 1000);
    assert_eq!(config["workspaceId"], 3);
    Ok(())
}

#[tokio::test]
async fn test_xonline_keyword_rejects_unknown_engine() {
    let harness = Harness::new();
    let req = XScanRequest {
        target: "x".to_string(),
        online_api_engine: "shodan".to_string(),
        ..Default::default()
    };

    let err = harness.dispatcher().start_xonline_keyword(&req, &ctx()).await.unwrap_err();

    assert!(matches!(err, DispatchError::InvalidInput(_)));
    assert!(harness.queue.is_empty());
}

fn rule(id: i64, org: i64, engines: Vec<SearchEngine>, last_run: Option<NaiveDate>) -> KeywordRule {
    KeywordRule {
        id,
        org_id: OrgId::from_raw(org),
        keyword: "admin||login".to_string(),
        exclude_words: "test".to_string(),
        check_mode: MatchMode::Title,
        engines,
        count: 200,
        last_run,
    }
}

#[tokio::test]
async fn test_keyword_rules_run_once_per_day() -> Result<()> {
    let harness = Harness::new();
    harness
        .store
        .insert_rule(rule(1, 1, vec![SearchEngine::Fofa, SearchEngine::Quake], Some(day(1))));
    harness.store.insert_rule(rule(2, 1, vec![SearchEngine::Fofa], Some(day(2))));
    harness.store.insert_rule(rule(3, 2, vec![SearchEngine::Hunter], None));
    let req = XScanRequest {
        org_id: OrgId::from_raw(1),
        ..Default::default()
    };

    let tasks = harness
        .dispatcher()
        .start_xonline_keyword_rules_on(&req, &ctx(), day(2))
        .await?;

    // rule 2 already ran today, rule 3 belongs to another organization
    assert_eq!(tasks.len(), 2);
    assert_eq!(harness.queue.kinds(), vec!["xfofa", "xquake"]);
    let payloads = harness.payloads();
    assert_eq!(payloads[0]["onlineapiKeyword"], "(title=\"admin\" || title=\"login\") && (body!=\"test\")");
    assert_eq!(
        payloads[1]["onlineapiKeyword"],
        "(title:\"admin\" OR title:\"login\") AND (NOT body:\"test\")"
    );
    assert_eq!(payloads[0]["onlineapiSearchLimit"], 200);
    assert_eq!(payloads[0]["onlineapiStartTime"], "2024-05-01");
    assert_eq!(payloads[0]["orgid"], 1);
    assert_eq!(harness.store.rule(1).unwrap().last_run, Some(day(2)));

    let again = harness
        .dispatcher()
        .start_xonline_keyword_rules_on(&req, &ctx(), day(2))
        .await?;
    assert!(again.is_empty());
    assert_eq!(harness.queue.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_keyword_rules_unscoped_request_reads_every_rule() -> Result<()> {
    let harness = Harness::new();
    harness.store.insert_rule(rule(1, 1, vec![SearchEngine::Fofa], None));
    harness.store.insert_rule(rule(2, 2, vec![SearchEngine::Hunter], None));
    let req = XScanRequest::default();

    harness
        .dispatcher()
        .start_xonline_keyword_rules_on(&req, &ctx(), day(3))
        .await?;

    assert_eq!(harness.queue.kinds(), vec!["xfofa", "xhunter"]);
    assert!(harness.payloads()[0].get("onlineapiStartTime").is_none());
    Ok(())
}

#[tokio::test]
async fn test_xdomain_scan_follows_worker_configuration() -> Result<()> {
    let mut harness = Harness::new();
    harness.config.domainscan.is_icp = true;
    harness.config.onlineapi.is_quake = true;
    harness.config.onlineapi.is_hunter = true;
    let req = XScanRequest {
        target: "example.com\n10.0.0.1".to_string(),
        features: FeatureSet {
            is_online_api: true,
            is_fingerprint: true,
            ..Default::default()
        },
        ..Default::default()
    };

    harness.dispatcher().start_xdomain_scan(&req, &ctx()).await?;

    assert_eq!(
        harness.queue.kinds(),
        vec!["xsubfinder", "icpquery", "xfofa", "xhunter", "xquake"]
    );
    let payloads = harness.payloads();
    assert_eq!(payloads[0]["domain"], serde_json::json!({ "example.com": {} }));
    assert_eq!(payloads[0]["subfinder"], true);
    assert_eq!(payloads[0]["fingerprint"], true);
    assert_eq!(payloads[2]["onlineapiTarget"], "example.com");
    assert_eq!(payloads[2]["fofa"], true);
    assert_eq!(payloads[3]["hunter"], true);
    assert_eq!(payloads[3]["fofa"], false);
    assert_eq!(payloads[4]["quake"], true);
    assert_eq!(payloads[4]["onlineapiTarget"], "example.com");
    Ok(())
}

#[tokio::test]
async fn test_xport_scan_slices_by_ip() -> Result<()> {
    let mut harness = Harness::new();
    harness.config.task.ip_slice_number = 2;
    let req = XScanRequest {
        target: "10.0.0.1\n10.0.0.2\n10.0.0.3".to_string(),
        port: "80,443".to_string(),
        ..Default::default()
    };

    harness.dispatcher().start_xport_scan(&req, &ctx()).await?;

    assert_eq!(harness.queue.kinds(), vec!["xportscan", "xportscan"]);
    let payloads = harness.payloads();
    assert_eq!(payloads[0]["ipportstring"], serde_json::json!({ "10.0.0.1,10.0.0.2": "80,443" }));
    assert_eq!(payloads[1]["ipportstring"], serde_json::json!({ "10.0.0.3": "80,443" }));
    Ok(())
}

#[tokio::test]
async fn test_xport_scan_online_engines_follow_worker_order() -> Result<()> {
    let mut harness = Harness::new();
    harness.config.onlineapi.is_quake = true;
    harness.config.onlineapi.is_hunter = true;
    let req = XScanRequest {
        target: "10.0.0.1".to_string(),
        port: "80".to_string(),
        features: FeatureSet {
            is_online_api: true,
            ..Default::default()
        },
        ..Default::default()
    };

    harness.dispatcher().start_xport_scan(&req, &ctx()).await?;

    assert_eq!(
        harness.queue.kinds(),
        vec!["xportscan", "xfofa", "xhunter", "xquake"]
    );
    assert!(harness.payloads()[1..]
        .iter()
        .all(|config| config["onlineapiTarget"] == "10.0.0.1"));
    Ok(())
}

#[tokio::test]
async fn test_xorg_scan_single_task() -> Result<()> {
    let harness = Harness::new();
    let req: XScanRequest = serde_json::from_str(
        r#"{"org_id": 0, "port": "1-1000", "is_org_ip": true, "is_org_domain": false}"#,
    )
    .unwrap();

    let tasks = harness.dispatcher().start_xorg_scan(&req, &ctx()).await?;

    assert_eq!(tasks.len(), 1);
    assert_eq!(harness.queue.kinds(), vec!["xorgscan"]);
    let config = &harness.payloads()[0];
    assert!(config.get("orgid").is_none());
    assert_eq!(config["isOrgIP"], true);
    assert_eq!(config["isOrgDomain"], false);
    assert_eq!(config["orgIPPort"], "1-1000");
    Ok(())
}
