//! Fan-out of scan requests into sub-tasks.
//!
//! Every `start_*` operation enumerates its sub-tasks in a fixed order and
//! submits them one at a time. The first failed submission is logged with
//! the task kind and returned; nothing after it is submitted and nothing
//! before it is withdrawn.

use crate::config::Config;
use crate::model::{
    DispatchContext, DomainScanRequest, DomainscanConfig, Empty, FeatureSet, IpLocationConfig,
    OnlineApiConfig, OrgId, PocScanRequest, PocscanConfig, PortScanRequest, PortscanConfig,
    QueryTargetConfig, SubdomainStrategy, TaskKind, XScanConfig, XScanRequest,
};
use crate::partition::{apex_domains, SliceMode, TaskSlicer};
use crate::query::SearchEngine;
use crate::queue::{TaskId, TaskSubmitter};
use crate::resolve::{format_ip_target, DomainResolver};
use crate::store::{DomainRecordStore, KeywordRuleStore};
use crate::suffix::SuffixList;
use crate::target::{domain_targets, is_subnet, split_target_lines};
use crate::{DispatchError, Result};
use chrono::{Local, NaiveDate};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;

/// Probe ports prepended to the configured ports when a batch scan names none
pub const BATCH_PROBE_PORTS: &str = "80,443,8080";

/// Worker-configured engines behind the x-domain and x-port scans run in this order
const X_ONLINE_ENGINE_ORDER: [SearchEngine; 3] =
    [SearchEngine::Fofa, SearchEngine::Hunter, SearchEngine::Quake];

pub struct Dispatcher<'a> {
    config: &'a Config,
    submitter: &'a dyn TaskSubmitter,
    rules: &'a dyn KeywordRuleStore,
    records: &'a dyn DomainRecordStore,
    resolver: &'a dyn DomainResolver,
    suffixes: &'a SuffixList,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        config: &'a Config,
        submitter: &'a dyn TaskSubmitter,
        rules: &'a dyn KeywordRuleStore,
        records: &'a dyn DomainRecordStore,
        resolver: &'a dyn DomainResolver,
        suffixes: &'a SuffixList,
    ) -> Self {
        Self {
            config,
            submitter,
            rules,
            records,
            resolver,
            suffixes,
        }
    }

    /// Port scan: IP slices × port slices, each with optional IP location and
    /// online search sub-tasks.
    pub async fn start_port_scan(
        &self,
        req: &PortScanRequest,
        ctx: &DispatchContext,
    ) -> Result<Vec<TaskId>> {
        let features = req.features;
        let targets = self.ip_targets(&req.target, req.org_id).await;
        let slicer = TaskSlicer::new(req.slice_mode, &self.config.task);
        let (ip_slices, port_slices) = slicer.ip_slices(&targets, &req.port);

        let mut tasks = Vec::new();
        for target in &ip_slices {
            for port in &port_slices {
                let config = self.portscan_config(req, target, port, ctx);
                tasks.push(self.submit(ctx, TaskKind::Portscan, &config).await?);

                // a port scan resolves locations itself; subnets would turn into
                // a bulk lookup of every address in them
                if !features.is_port_scan && features.is_ip_location && !contains_subnet(target) {
                    let config = IpLocationConfig {
                        target: target.clone(),
                        org_id: req.org_id,
                    };
                    tasks.push(self.submit(ctx, TaskKind::IpLocation, &config).await?);
                }

                for engine in features.online_engines() {
                    let config = online_api_config(
                        target,
                        req.org_id,
                        &features,
                        features.is_ip_location,
                        ctx,
                    );
                    tasks.push(self.submit(ctx, TaskKind::online_search(engine), &config).await?);
                }
            }
        }

        info!("Port scan {} fanned out into {} tasks", ctx.main_task_id, tasks.len());
        Ok(tasks)
    }

    /// Probe followed by port scan, one sub-task per IP slice × port slice.
    pub async fn start_batch_scan(
        &self,
        req: &PortScanRequest,
        ctx: &DispatchContext,
    ) -> Result<Vec<TaskId>> {
        let targets = self.ip_targets(&req.target, req.org_id).await;
        let slicer = TaskSlicer::new(req.slice_mode, &self.config.task);
        let (ip_slices, port_slices) = slicer.ip_slices(&targets, &req.port);

        let mut tasks = Vec::new();
        for target in &ip_slices {
            for port in &port_slices {
                let config = self.batchscan_config(req, target, port, ctx);
                tasks.push(self.submit(ctx, TaskKind::Batchscan, &config).await?);
            }
        }

        info!("Batch scan {} fanned out into {} tasks", ctx.main_task_id, tasks.len());
        Ok(tasks)
    }

    /// Domain scan: every enabled subdomain strategy runs as its own sub-task
    /// per slice, with a plain resolution task when none is enabled.
    pub async fn start_domain_scan(
        &self,
        req: &DomainScanRequest,
        ctx: &DispatchContext,
    ) -> Result<Vec<TaskId>> {
        let features = req.features;
        let domains = domain_targets(&req.target);
        let domains = if features.is_fld_domain {
            apex_domains(&domains, self.suffixes)
        } else {
            domains
        };
        let slicer = TaskSlicer::new(req.slice_mode, &self.config.task);

        let mut tasks = Vec::new();
        for target in slicer.domain_slices(&domains) {
            let strategies = features.subdomain_strategies();
            if strategies.is_empty() {
                let config = domainscan_config(req, &features, &target, ctx);
                tasks.push(self.submit(ctx, TaskKind::Domainscan, &config).await?);
            }
            for strategy in strategies {
                let only = features.with_only_strategy(strategy);
                let config = domainscan_config(req, &only, &target, ctx);
                tasks.push(self.submit(ctx, strategy.task_kind(), &config).await?);
            }

            for engine in features.online_engines() {
                let config = online_api_config(&target, req.org_id, &features, true, ctx);
                tasks.push(self.submit(ctx, TaskKind::online_search(engine), &config).await?);
            }
            if features.is_icp_query {
                let config = QueryTargetConfig { target: target.clone() };
                tasks.push(self.submit(ctx, TaskKind::IcpQuery, &config).await?);
            }
            if features.is_whois_query {
                let config = QueryTargetConfig { target: target.clone() };
                tasks.push(self.submit(ctx, TaskKind::WhoisQuery, &config).await?);
            }
        }

        info!("Domain scan {} fanned out into {} tasks", ctx.main_task_id, tasks.len());
        Ok(tasks)
    }

    pub async fn start_poc_scan(
        &self,
        req: &PocScanRequest,
        ctx: &DispatchContext,
    ) -> Result<Vec<TaskId>> {
        let features = req.features;
        let targets = split_target_lines(&req.target);
        if targets.is_empty() {
            warn!("POC scan {} has no targets", ctx.main_task_id);
            return Ok(Vec::new());
        }
        let target = targets.join(",");

        let engines = [
            (TaskKind::Xray, features.is_xray_verify, req.xray_poc_file.as_str(), true),
            (TaskKind::Nuclei, features.is_nuclei_verify, req.nuclei_poc_file.as_str(), true),
            (TaskKind::Dirsearch, features.is_dirsearch, req.dirsearch_ext_name.as_str(), true),
            (TaskKind::Goby, features.is_goby_verify, "", false),
        ];

        let mut tasks = Vec::new();
        for (kind, enabled, poc_file, needs_file) in engines {
            if !enabled || (needs_file && poc_file.is_empty()) {
                continue;
            }
            let config = PocscanConfig {
                target: target.clone(),
                poc_file: poc_file.to_string(),
                cmdbin: kind.as_str().to_string(),
                is_load_opened_port: features.is_load_opened_port,
                workspace_id: ctx.workspace_id,
            };
            tasks.push(self.submit(ctx, kind, &config).await?);
        }
        Ok(tasks)
    }

    /// Keyword search on one explicitly named engine; the request target is the query.
    pub async fn start_xonline_keyword(
        &self,
        req: &XScanRequest,
        ctx: &DispatchContext,
    ) -> Result<Vec<TaskId>> {
        let engine: SearchEngine = req.online_api_engine.parse()?;
        let mut config = self.xscan_base(req, ctx).for_engine(engine);
        config.online_api_keyword = req.target.clone();
        config.online_api_search_limit = self.config.onlineapi.search_limit_count;

        let task = self.submit(ctx, TaskKind::x_online_search(engine), &config).await?;
        Ok(vec![task])
    }

    pub async fn start_xonline_keyword_rules(
        &self,
        req: &XScanRequest,
        ctx: &DispatchContext,
    ) -> Result<Vec<TaskId>> {
        self.start_xonline_keyword_rules_on(req, ctx, Local::now().date_naive()).await
    }

    /// Rule driven keyword search: every stored rule of the request's
    /// organization runs at most once per `today`, on each of its engines.
    pub async fn start_xonline_keyword_rules_on(
        &self,
        req: &XScanRequest,
        ctx: &DispatchContext,
        today: NaiveDate,
    ) -> Result<Vec<TaskId>> {
        let base = self.xscan_base(req, ctx);
        let rules = self.rules.list_rules(req.org_id).await?;

        let mut tasks = Vec::new();
        for rule in rules {
            if rule.last_run == Some(today) {
                debug!("Keyword rule {} already ran on {}", rule.id, today);
                continue;
            }
            if !self.rules.mark_rule_run(rule.id, today).await? {
                debug!("Keyword rule {} was claimed by another run", rule.id);
                continue;
            }

            for engine in &rule.engines {
                let mut config = base.for_engine(*engine);
                config.online_api_keyword =
                    engine.compile(rule.check_mode, &rule.keyword, &rule.exclude_words);
                config.online_api_search_limit = rule.count;
                config.online_api_start_time = rule.last_run;
                tasks.push(self.submit(ctx, TaskKind::x_online_search(*engine), &config).await?);
            }
        }

        info!("Keyword rules started {} tasks for {}", tasks.len(), ctx.main_task_id);
        Ok(tasks)
    }

    /// Per-domain x-scan. Which strategies and lookups run is decided by the
    /// worker configuration, not by the request.
    pub async fn start_xdomain_scan(
        &self,
        req: &XScanRequest,
        ctx: &DispatchContext,
    ) -> Result<Vec<TaskId>> {
        let base = self.xscan_base(req, ctx);
        let domainscan = &self.config.domainscan;
        let strategies: Vec<SubdomainStrategy> = SubdomainStrategy::ALL
            .into_iter()
            .filter(|strategy| match strategy {
                SubdomainStrategy::Finder => domainscan.is_subdomain_finder,
                SubdomainStrategy::Brute => domainscan.is_subdomain_brute,
                SubdomainStrategy::Crawler => domainscan.is_subdomain_crawler,
            })
            .collect();

        let mut tasks = Vec::new();
        for target in domain_targets(&req.target) {
            for strategy in &strategies {
                let mut config = base.clone();
                config.domain = BTreeMap::from([(target.clone(), Empty {})]);
                match strategy {
                    SubdomainStrategy::Finder => config.is_subdomain_finder = true,
                    SubdomainStrategy::Brute => config.is_subdomain_brute = true,
                    SubdomainStrategy::Crawler => config.is_subdomain_crawler = true,
                }
                tasks.push(self.submit(ctx, strategy.x_task_kind(), &config).await?);
            }
            if domainscan.is_icp {
                let config = QueryTargetConfig { target: target.clone() };
                tasks.push(self.submit(ctx, TaskKind::IcpQuery, &config).await?);
            }
            if domainscan.is_whois {
                let config = QueryTargetConfig { target: target.clone() };
                tasks.push(self.submit(ctx, TaskKind::WhoisQuery, &config).await?);
            }
            if req.features.is_online_api {
                self.submit_x_online_targets(ctx, &base, &target, &mut tasks).await?;
            }
        }

        info!("X domain scan {} fanned out into {} tasks", ctx.main_task_id, tasks.len());
        Ok(tasks)
    }

    pub async fn start_xport_scan(
        &self,
        req: &XScanRequest,
        ctx: &DispatchContext,
    ) -> Result<Vec<TaskId>> {
        let base = self.xscan_base(req, ctx);
        let targets = self.ip_targets(&req.target, req.org_id).await;
        let slicer = TaskSlicer::new(SliceMode::ByIp, &self.config.task);
        let (ip_slices, _) = slicer.ip_slices(&targets, &req.port);

        let mut tasks = Vec::new();
        for target in &ip_slices {
            let mut config = base.clone();
            config.ip_port_string = BTreeMap::from([(target.clone(), req.port.clone())]);
            tasks.push(self.submit(ctx, TaskKind::XPortscan, &config).await?);

            if req.features.is_online_api {
                self.submit_x_online_targets(ctx, &base, target, &mut tasks).await?;
            }
        }

        info!("X port scan {} fanned out into {} tasks", ctx.main_task_id, tasks.len());
        Ok(tasks)
    }

    /// Scan the assets already known for an organization; the worker expands them.
    pub async fn start_xorg_scan(
        &self,
        req: &XScanRequest,
        ctx: &DispatchContext,
    ) -> Result<Vec<TaskId>> {
        let mut config = self.xscan_base(req, ctx);
        config.is_org_ip = req.features.is_org_ip;
        config.is_org_domain = req.features.is_org_domain;
        config.org_ip_port = req.port.clone();

        let task = self.submit(ctx, TaskKind::XOrgscan, &config).await?;
        Ok(vec![task])
    }

    async fn submit_x_online_targets(
        &self,
        ctx: &DispatchContext,
        base: &XScanConfig,
        target: &str,
        tasks: &mut Vec<TaskId>,
    ) -> Result<()> {
        for engine in self.configured_engines() {
            let mut config = base.for_engine(engine);
            config.online_api_target = target.to_string();
            tasks.push(self.submit(ctx, TaskKind::x_online_search(engine), &config).await?);
        }
        Ok(())
    }

    fn configured_engines(&self) -> Vec<SearchEngine> {
        let onlineapi = &self.config.onlineapi;
        X_ONLINE_ENGINE_ORDER
            .into_iter()
            .filter(|engine| match engine {
                SearchEngine::Fofa => onlineapi.is_fofa,
                SearchEngine::Quake => onlineapi.is_quake,
                SearchEngine::Hunter => onlineapi.is_hunter,
            })
            .collect()
    }

    async fn ip_targets(&self, text: &str, org: Option<OrgId>) -> Vec<String> {
        let workers = self.config.task.resolve_workers;
        format_ip_target(text, org, self.resolver, self.records, workers).await
    }

    async fn submit<T: Serialize>(
        &self,
        ctx: &DispatchContext,
        kind: TaskKind,
        config: &T,
    ) -> Result<TaskId> {
        let payload = serde_json::to_string(config).map_err(|e| {
            error!("start {} fail: {}", kind, e);
            DispatchError::submit(kind.as_str(), e)
        })?;

        match self.submitter.submit(kind.as_str(), &payload, &ctx.main_task_id, "").await {
            Ok(task_id) => {
                debug!("Started {} task {} under {}", kind, task_id, ctx.main_task_id);
                Ok(task_id)
            }
            Err(e) => {
                error!("start {} fail: {}", kind, e);
                Err(match e {
                    DispatchError::Submit { .. } => e,
                    other => DispatchError::submit(kind.as_str(), other),
                })
            }
        }
    }

    fn portscan_config(
        &self,
        req: &PortScanRequest,
        target: &str,
        port: &str,
        ctx: &DispatchContext,
    ) -> PortscanConfig {
        let defaults = &self.config.portscan;
        let features = &req.features;
        PortscanConfig {
            target: target.to_string(),
            exclude_target: req.exclude_ip.clone(),
            port: or_default(port, &defaults.port),
            org_id: req.org_id,
            rate: if req.rate == 0 { defaults.rate } else { req.rate },
            is_ping: features.is_ping,
            tech: or_default(&req.nmap_tech, &defaults.tech),
            is_ip_location: features.is_ip_location,
            is_httpx: features.is_httpx,
            is_screenshot: features.is_screenshot,
            is_fingerprinthub: features.is_fingerprint_hub,
            is_iconhash: features.is_icon_hash,
            cmdbin: or_default(&req.cmd_bin, &defaults.cmdbin),
            is_portscan: features.is_port_scan,
            is_load_opened_port: features.is_load_opened_port,
            workspace_id: ctx.workspace_id,
        }
    }

    fn batchscan_config(
        &self,
        req: &PortScanRequest,
        target: &str,
        port: &str,
        ctx: &DispatchContext,
    ) -> PortscanConfig {
        let defaults = &self.config.portscan;
        let port = if port.is_empty() {
            format!("{}|{}", BATCH_PROBE_PORTS, defaults.port)
        } else {
            port.to_string()
        };
        let cmdbin = if req.cmd_bin == "nmap" { "nmap" } else { "masscan" };
        PortscanConfig {
            port,
            cmdbin: cmdbin.to_string(),
            is_portscan: false,
            is_load_opened_port: false,
            ..self.portscan_config(req, target, "", ctx)
        }
    }

    fn xscan_base(&self, req: &XScanRequest, ctx: &DispatchContext) -> XScanConfig {
        let features = &req.features;
        XScanConfig {
            org_id: req.org_id,
            is_fingerprint: features.is_fingerprint,
            is_xray_poc: features.is_xray_verify,
            xray_poc_file: req.xray_poc_file.clone(),
            is_nuclei_poc: features.is_nuclei_verify,
            nuclei_poc_file: req.nuclei_poc_file.clone(),
            is_goby_poc: features.is_goby_verify,
            workspace_id: ctx.workspace_id,
            ..XScanConfig::default()
        }
    }
}

fn or_default(value: &str, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}

fn contains_subnet(slice: &str) -> bool {
    slice.split(',').any(is_subnet)
}

fn domainscan_config(
    req: &DomainScanRequest,
    features: &FeatureSet,
    target: &str,
    ctx: &DispatchContext,
) -> DomainscanConfig {
    DomainscanConfig {
        target: target.to_string(),
        org_id: req.org_id,
        is_subdomain_finder: features.is_subfinder,
        is_subdomain_brute: features.is_subdomain_brute,
        is_crawler: features.is_crawler,
        is_httpx: features.is_httpx,
        is_ip_portscan: features.is_ip_portscan,
        is_ip_subnet_portscan: features.is_subnet_portscan,
        is_screenshot: features.is_screenshot,
        is_fingerprinthub: features.is_fingerprint_hub,
        is_iconhash: features.is_icon_hash,
        port_task_mode: req.port_task_mode,
        workspace_id: ctx.workspace_id,
    }
}

fn online_api_config(
    target: &str,
    org: Option<OrgId>,
    features: &FeatureSet,
    is_ip_location: bool,
    ctx: &DispatchContext,
) -> OnlineApiConfig {
    OnlineApiConfig {
        target: target.to_string(),
        org_id: org,
        is_ip_location,
        is_httpx: features.is_httpx,
        is_fingerprinthub: features.is_fingerprint_hub,
        is_screenshot: features.is_screenshot,
        is_iconhash: features.is_icon_hash,
        is_ignore_cdn: features.is_ignore_cdn,
        is_ignore_outof_china: features.is_ignore_outof_china,
        workspace_id: ctx.workspace_id,
    }
}
