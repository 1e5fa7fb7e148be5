use crate::model::OrgId;
use crate::store::DomainRecordStore;
use crate::target::{classify, split_target_lines};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use std::net::IpAddr;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

/// Source tag stored with the A records found while formatting port scan targets
pub const PORTSCAN_RECORD_SOURCE: &str = "portscan";

#[async_trait]
pub trait DomainResolver: Send + Sync {
    /// IPv4 addresses of `domain`; empty when it does not resolve.
    async fn resolve(&self, domain: &str) -> Vec<String>;
}

pub struct DnsResolver {
    resolver: TokioAsyncResolver,
}

impl DnsResolver {
    pub fn new() -> Self {
        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default()),
        }
    }
}

impl Default for DnsResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DomainResolver for DnsResolver {
    async fn resolve(&self, domain: &str) -> Vec<String> {
        match self.resolver.lookup_ip(domain).await {
            Ok(lookup) => lookup
                .iter()
                .filter_map(|ip| match ip {
                    IpAddr::V4(v4) => Some(v4.to_string()),
                    IpAddr::V6(_) => None,
                })
                .collect(),
            Err(e) => {
                debug!("Failed to resolve {}: {}", domain, e);
                Vec::new()
            }
        }
    }
}

/// Turn newline separated IP input into scan targets.
///
/// Addresses, subnets and ranges are kept as written. Any other line is
/// resolved (at most `workers` lookups in flight) and replaced by its
/// addresses; the domain and its A records are recorded with the
/// organization. Domains that do not resolve are dropped. Input order is
/// preserved.
pub async fn format_ip_target(
    text: &str,
    org: Option<OrgId>,
    resolver: &dyn DomainResolver,
    records: &dyn DomainRecordStore,
    workers: usize,
) -> Vec<String> {
    let lines = split_target_lines(text);
    let resolved: Vec<(String, Option<Vec<String>>)> = stream::iter(lines)
        .map(|line| async move {
            if classify(&line).is_ip() {
                (line, None)
            } else {
                let hosts = resolver.resolve(&line).await;
                (line, Some(hosts))
            }
        })
        .buffered(workers.max(1))
        .collect()
        .await;

    let mut targets = Vec::new();
    for (line, hosts) in resolved {
        match hosts {
            None => targets.push(line),
            Some(hosts) if hosts.is_empty() => {
                warn!("{} did not resolve, dropped from targets", line)
            }
            Some(hosts) => {
                if let Err(e) = records
                    .record_a_records(&line, &hosts, PORTSCAN_RECORD_SOURCE, org)
                    .await
                {
                    warn!("Failed to record A records of {}: {}", line, e);
                }
                targets.extend(hosts);
            }
        }
    }
    info!("Formatted {} IP targets", targets.len());
    targets
}
