//! Request shapes, sub-task payloads and the shared vocabulary between the
//! dispatcher, the task substrate and the stores.

use crate::partition::SliceMode;
use crate::query::{MatchMode, SearchEngine};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Organization reference. Zero is not an organization; see [`OrgId::from_raw`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrgId(u32);

impl OrgId {
    /// Normalize a raw id coming from a form or a table column: 0 (or anything
    /// non-positive) means "no organization".
    pub fn from_raw(raw: i64) -> Option<OrgId> {
        u32::try_from(raw).ok().filter(|id| *id > 0).map(OrgId)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for OrgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `deserialize_with` helper applying [`OrgId::from_raw`] at the request boundary
pub fn deserialize_org_id<'de, D>(deserializer: D) -> Result<Option<OrgId>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<i64> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(OrgId::from_raw))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrgId,
    pub name: String,
}

/// Feature toggles of a request, fixed once the request is accepted.
///
/// Orchestrator branches read the set; a sub-task that needs a variation gets
/// its own copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSet {
    pub is_port_scan: bool,
    pub is_ip_location: bool,
    pub is_ping: bool,
    pub is_httpx: bool,
    pub is_screenshot: bool,
    pub is_fingerprint_hub: bool,
    pub is_icon_hash: bool,
    pub is_load_opened_port: bool,
    pub is_ignore_cdn: bool,
    pub is_ignore_outof_china: bool,
    // online asset search engines
    pub is_fofa: bool,
    pub is_quake: bool,
    pub is_hunter: bool,
    // domain scan
    pub is_fld_domain: bool,
    pub is_subfinder: bool,
    pub is_subdomain_brute: bool,
    pub is_crawler: bool,
    pub is_ip_portscan: bool,
    pub is_subnet_portscan: bool,
    pub is_icp_query: bool,
    pub is_whois_query: bool,
    // vulnerability verification
    pub is_xray_verify: bool,
    pub is_nuclei_verify: bool,
    pub is_dirsearch: bool,
    pub is_goby_verify: bool,
    // x-scan
    pub is_fingerprint: bool,
    pub is_online_api: bool,
    pub is_org_ip: bool,
    pub is_org_domain: bool,
}

impl FeatureSet {
    /// Enabled search engines in submission order
    pub fn online_engines(&self) -> Vec<SearchEngine> {
        SearchEngine::ALL
            .into_iter()
            .filter(|engine| self.engine_enabled(*engine))
            .collect()
    }

    pub fn engine_enabled(&self, engine: SearchEngine) -> bool {
        match engine {
            SearchEngine::Fofa => self.is_fofa,
            SearchEngine::Quake => self.is_quake,
            SearchEngine::Hunter => self.is_hunter,
        }
    }

    /// Enabled subdomain discovery strategies in submission order
    pub fn subdomain_strategies(&self) -> Vec<SubdomainStrategy> {
        SubdomainStrategy::ALL
            .into_iter()
            .filter(|strategy| self.strategy_enabled(*strategy))
            .collect()
    }

    pub fn strategy_enabled(&self, strategy: SubdomainStrategy) -> bool {
        match strategy {
            SubdomainStrategy::Finder => self.is_subfinder,
            SubdomainStrategy::Brute => self.is_subdomain_brute,
            SubdomainStrategy::Crawler => self.is_crawler,
        }
    }

    /// Copy of the set with `strategy` as the only subdomain strategy
    pub fn with_only_strategy(&self, strategy: SubdomainStrategy) -> FeatureSet {
        FeatureSet {
            is_subfinder: strategy == SubdomainStrategy::Finder,
            is_subdomain_brute: strategy == SubdomainStrategy::Brute,
            is_crawler: strategy == SubdomainStrategy::Crawler,
            ..*self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubdomainStrategy {
    Finder,
    Brute,
    Crawler,
}

impl SubdomainStrategy {
    pub const ALL: [SubdomainStrategy; 3] = [
        SubdomainStrategy::Finder,
        SubdomainStrategy::Brute,
        SubdomainStrategy::Crawler,
    ];

    pub fn task_kind(self) -> TaskKind {
        match self {
            SubdomainStrategy::Finder => TaskKind::Subfinder,
            SubdomainStrategy::Brute => TaskKind::SubdomainBrute,
            SubdomainStrategy::Crawler => TaskKind::SubdomainCrawler,
        }
    }

    pub fn x_task_kind(self) -> TaskKind {
        match self {
            SubdomainStrategy::Finder => TaskKind::XSubfinder,
            SubdomainStrategy::Brute => TaskKind::XSubdomainBrute,
            SubdomainStrategy::Crawler => TaskKind::XSubdomainCrawler,
        }
    }
}

/// Task names understood by the workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Portscan,
    Batchscan,
    IpLocation,
    Fofa,
    Quake,
    Hunter,
    Subfinder,
    SubdomainBrute,
    SubdomainCrawler,
    Domainscan,
    IcpQuery,
    WhoisQuery,
    Xray,
    Nuclei,
    Dirsearch,
    Goby,
    Fingerprint,
    XFofa,
    XQuake,
    XHunter,
    XPortscan,
    XSubfinder,
    XSubdomainBrute,
    XSubdomainCrawler,
    XOrgscan,
    XOnlineApiCustom,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Portscan => "portscan",
            TaskKind::Batchscan => "batchscan",
            TaskKind::IpLocation => "iplocation",
            TaskKind::Fofa => "fofa",
            TaskKind::Quake => "quake",
            TaskKind::Hunter => "hunter",
            TaskKind::Subfinder => "subfinder",
            TaskKind::SubdomainBrute => "subdomainbrute",
            TaskKind::SubdomainCrawler => "subdomaincrawler",
            TaskKind::Domainscan => "domainscan",
            TaskKind::IcpQuery => "icpquery",
            TaskKind::WhoisQuery => "whoisquery",
            TaskKind::Xray => "xray",
            TaskKind::Nuclei => "nuclei",
            TaskKind::Dirsearch => "dirsearch",
            TaskKind::Goby => "goby",
            TaskKind::Fingerprint => "fingerprint",
            TaskKind::XFofa => "xfofa",
            TaskKind::XQuake => "xquake",
            TaskKind::XHunter => "xhunter",
            TaskKind::XPortscan => "xportscan",
            TaskKind::XSubfinder => "xsubfinder",
            TaskKind::XSubdomainBrute => "xsubdomainbrute",
            TaskKind::XSubdomainCrawler => "xsubdomaincrawler",
            TaskKind::XOrgscan => "xorgscan",
            TaskKind::XOnlineApiCustom => "xonlineapi_custom",
        }
    }

    pub fn online_search(engine: SearchEngine) -> TaskKind {
        match engine {
            SearchEngine::Fofa => TaskKind::Fofa,
            SearchEngine::Quake => TaskKind::Quake,
            SearchEngine::Hunter => TaskKind::Hunter,
        }
    }

    pub fn x_online_search(engine: SearchEngine) -> TaskKind {
        match engine {
            SearchEngine::Fofa => TaskKind::XFofa,
            SearchEngine::Quake => TaskKind::XQuake,
            SearchEngine::Hunter => TaskKind::XHunter,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies the request all sub-tasks are grouped under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchContext {
    pub main_task_id: String,
    pub workspace_id: u32,
}

impl DispatchContext {
    pub fn new(main_task_id: impl Into<String>, workspace_id: u32) -> Self {
        Self {
            main_task_id: main_task_id.into(),
            workspace_id,
        }
    }
}

// ---------------------------------------------------------------------------
// requests

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PortScanRequest {
    pub target: String,
    pub port: String,
    #[serde(deserialize_with = "deserialize_org_id")]
    pub org_id: Option<OrgId>,
    pub slice_mode: SliceMode,
    pub exclude_ip: String,
    pub rate: u32,
    pub nmap_tech: String,
    pub cmd_bin: String,
    #[serde(flatten)]
    pub features: FeatureSet,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainScanRequest {
    pub target: String,
    #[serde(deserialize_with = "deserialize_org_id")]
    pub org_id: Option<OrgId>,
    pub slice_mode: SliceMode,
    pub port_task_mode: SliceMode,
    #[serde(flatten)]
    pub features: FeatureSet,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PocScanRequest {
    pub target: String,
    pub xray_poc_file: String,
    pub nuclei_poc_file: String,
    pub dirsearch_ext_name: String,
    #[serde(flatten)]
    pub features: FeatureSet,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct XScanRequest {
    pub target: String,
    pub port: String,
    #[serde(deserialize_with = "deserialize_org_id")]
    pub org_id: Option<OrgId>,
    /// `xfofa`, `xquake` or `xhunter` for a single-engine keyword search
    pub online_api_engine: String,
    pub xray_poc_file: String,
    pub nuclei_poc_file: String,
    #[serde(flatten)]
    pub features: FeatureSet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordRule {
    pub id: i64,
    #[serde(default, deserialize_with = "deserialize_org_id")]
    pub org_id: Option<OrgId>,
    pub keyword: String,
    #[serde(default)]
    pub exclude_words: String,
    #[serde(default)]
    pub check_mode: MatchMode,
    pub engines: Vec<SearchEngine>,
    pub count: u32,
    #[serde(default)]
    pub last_run: Option<NaiveDate>,
}

// ---------------------------------------------------------------------------
// sub-task payloads

/// Serializes as `{}`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortscanConfig {
    pub target: String,
    pub exclude_target: String,
    pub port: String,
    #[serde(rename = "orgid", skip_serializing_if = "Option::is_none")]
    pub org_id: Option<OrgId>,
    pub rate: u32,
    pub is_ping: bool,
    pub tech: String,
    pub is_ip_location: bool,
    pub is_httpx: bool,
    pub is_screenshot: bool,
    pub is_fingerprinthub: bool,
    pub is_iconhash: bool,
    pub cmdbin: String,
    pub is_portscan: bool,
    pub is_load_opened_port: bool,
    pub workspace_id: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainscanConfig {
    pub target: String,
    #[serde(rename = "orgid", skip_serializing_if = "Option::is_none")]
    pub org_id: Option<OrgId>,
    pub is_subdomain_finder: bool,
    pub is_subdomain_brute: bool,
    pub is_crawler: bool,
    pub is_httpx: bool,
    pub is_ip_portscan: bool,
    pub is_ip_subnet_portscan: bool,
    pub is_screenshot: bool,
    pub is_fingerprinthub: bool,
    pub is_iconhash: bool,
    pub port_task_mode: SliceMode,
    pub workspace_id: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnlineApiConfig {
    pub target: String,
    #[serde(rename = "orgid", skip_serializing_if = "Option::is_none")]
    pub org_id: Option<OrgId>,
    pub is_ip_location: bool,
    pub is_httpx: bool,
    pub is_fingerprinthub: bool,
    pub is_screenshot: bool,
    pub is_iconhash: bool,
    pub is_ignore_cdn: bool,
    pub is_ignore_outof_china: bool,
    pub workspace_id: u32,
}

/// ICP registration and WHOIS lookups only need the domain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryTargetConfig {
    pub target: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpLocationConfig {
    pub target: String,
    #[serde(rename = "orgid", skip_serializing_if = "Option::is_none")]
    pub org_id: Option<OrgId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PocscanConfig {
    pub target: String,
    pub poc_file: String,
    pub cmdbin: String,
    pub is_load_opened_port: bool,
    pub workspace_id: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    #[serde(rename = "IPTargetMap", skip_serializing_if = "Option::is_none")]
    pub ip_target_map: Option<BTreeMap<String, Vec<u16>>>,
    #[serde(rename = "DomainTargetMap", skip_serializing_if = "Option::is_none")]
    pub domain_target_map: Option<BTreeMap<String, Empty>>,
    pub is_screenshot: bool,
    pub is_iconhash: bool,
    pub workspace_id: u32,
}

/// Payload shared by every `x`-prefixed task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct XScanConfig {
    #[serde(rename = "orgid", skip_serializing_if = "Option::is_none")]
    pub org_id: Option<OrgId>,
    #[serde(rename = "isOrgIP")]
    pub is_org_ip: bool,
    #[serde(rename = "isOrgDomain")]
    pub is_org_domain: bool,
    #[serde(rename = "orgIPPort", skip_serializing_if = "String::is_empty")]
    pub org_ip_port: String,
    #[serde(rename = "ipport", skip_serializing_if = "BTreeMap::is_empty")]
    pub ip_port: BTreeMap<String, Vec<u16>>,
    #[serde(rename = "ipportstring", skip_serializing_if = "BTreeMap::is_empty")]
    pub ip_port_string: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub domain: BTreeMap<String, Empty>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub target: String,
    #[serde(rename = "subfinder")]
    pub is_subdomain_finder: bool,
    #[serde(rename = "subdomainbrute")]
    pub is_subdomain_brute: bool,
    #[serde(rename = "subdomaincrawler")]
    pub is_subdomain_crawler: bool,
    #[serde(rename = "fingerprint")]
    pub is_fingerprint: bool,
    #[serde(rename = "xraypoc")]
    pub is_xray_poc: bool,
    #[serde(rename = "xraypocfile", skip_serializing_if = "String::is_empty")]
    pub xray_poc_file: String,
    #[serde(rename = "nucleipoc")]
    pub is_nuclei_poc: bool,
    #[serde(rename = "nucleipocfile", skip_serializing_if = "String::is_empty")]
    pub nuclei_poc_file: String,
    #[serde(rename = "gobypoc")]
    pub is_goby_poc: bool,
    #[serde(rename = "fofa")]
    pub is_fofa: bool,
    #[serde(rename = "quake")]
    pub is_quake: bool,
    #[serde(rename = "hunter")]
    pub is_hunter: bool,
    #[serde(rename = "onlineapiTarget", skip_serializing_if = "String::is_empty")]
    pub online_api_target: String,
    #[serde(rename = "onlineapiKeyword", skip_serializing_if = "String::is_empty")]
    pub online_api_keyword: String,
    #[serde(rename = "onlineapiSearchLimit")]
    pub online_api_search_limit: u32,
    #[serde(rename = "onlineapiStartTime", skip_serializing_if = "Option::is_none")]
    pub online_api_start_time: Option<NaiveDate>,
    #[serde(rename = "workspaceId")]
    pub workspace_id: u32,
}

impl XScanConfig {
    /// Copy of the config with the flag of `engine` raised
    pub fn for_engine(&self, engine: SearchEngine) -> XScanConfig {
        let mut config = self.clone();
        match engine {
            SearchEngine::Fofa => config.is_fofa = true,
            SearchEngine::Quake => config.is_quake = true,
            SearchEngine::Hunter => config.is_hunter = true,
        }
        config
    }

    pub fn engine(&self) -> Option<SearchEngine> {
        if self.is_fofa {
            Some(SearchEngine::Fofa)
        } else if self.is_quake {
            Some(SearchEngine::Quake)
        } else if self.is_hunter {
            Some(SearchEngine::Hunter)
        } else {
            None
        }
    }
}
