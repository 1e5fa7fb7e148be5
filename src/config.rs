use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub task: TaskConfig,
    pub portscan: PortscanDefaults,
    pub onlineapi: OnlineApiConfig,
    pub domainscan: DomainscanConfig,
    pub queue: QueueConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub ip_slice_number: usize,
    pub port_slice_number: usize,
    pub domain_slice_number: usize,
    pub resolve_workers: usize,
}

/// Values a portscan/batchscan sub-task falls back to when the request leaves them unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortscanDefaults {
    pub cmdbin: String,
    pub port: String,
    pub rate: u32,
    pub tech: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnlineApiConfig {
    pub is_fofa: bool,
    pub is_quake: bool,
    pub is_hunter: bool,
    pub search_limit_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainscanConfig {
    pub is_subdomain_finder: bool,
    pub is_subdomain_brute: bool,
    pub is_subdomain_crawler: bool,
    pub is_icp: bool,
    pub is_whois: bool,
    /// Public suffix list in the publicsuffix.org format; the bundled list is used when unset
    pub suffix_list: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub redis_url: String,
    pub queue_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub postgres_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            task: TaskConfig {
                ip_slice_number: 64,
                port_slice_number: 1000,
                domain_slice_number: 16,
                resolve_workers: 50,
            },
            portscan: PortscanDefaults {
                cmdbin: "masscan".to_string(),
                port: "--top-ports 1000".to_string(),
                rate: 1000,
                tech: "-sS".to_string(),
            },
            onlineapi: OnlineApiConfig {
                is_fofa: true,
                is_quake: false,
                is_hunter: false,
                search_limit_count: 1000,
            },
            domainscan: DomainscanConfig {
                is_subdomain_finder: true,
                is_subdomain_brute: false,
                is_subdomain_crawler: false,
                is_icp: false,
                is_whois: false,
                suffix_list: None,
            },
            queue: QueueConfig {
                redis_url: "redis://127.0.0.1:6379/0".to_string(),
                queue_key: "rscan:tasks".to_string(),
            },
            store: StoreConfig { postgres_url: None },
        }
    }
}

impl Config {
    pub fn load_from_file(path: &str) -> crate::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn save_to_file(&self, path: &str) -> crate::Result<()> {
        let toml_string = toml::to_string_pretty(self).map_err(|e| {
            crate::DispatchError::InvalidInput(format!("Failed to serialize config: {}", e))
        })?;

        std::fs::write(path, toml_string)?;
        Ok(())
    }
}
