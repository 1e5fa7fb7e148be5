//! Splitting targets and ports into bounded slices for parallel dispatch.

use crate::config::TaskConfig;
use crate::suffix::SuffixList;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::hash::Hash;

lazy_static! {
    static ref PORT_ITEM: Regex = Regex::new(r"^(\d{1,5})(?:-(\d{1,5}))?$").unwrap();
}

/// Separates the probe ports from the follow-up ports in a batch scan port spec
pub const BATCH_PORT_SEPARATOR: char = '|';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SliceMode {
    /// One slice holding every target and the port spec verbatim
    #[default]
    Default,
    ByIp,
    ByPort,
    ByIpAndPort,
}

impl SliceMode {
    pub fn slices_targets(self) -> bool {
        matches!(self, SliceMode::ByIp | SliceMode::ByIpAndPort)
    }

    pub fn slices_ports(self) -> bool {
        matches!(self, SliceMode::ByPort | SliceMode::ByIpAndPort)
    }
}

/// Deduplicate `items` (first occurrence wins) and cut them into slices of at most `max` items.
///
/// A `max` of zero is treated as one.
pub fn partition<T: Clone + Eq + Hash>(items: &[T], max: usize) -> Vec<Vec<T>> {
    let max = max.max(1);
    let mut seen = HashSet::with_capacity(items.len());
    let unique: Vec<T> = items
        .iter()
        .filter(|item| seen.insert((*item).clone()))
        .cloned()
        .collect();
    unique.chunks(max).map(<[T]>::to_vec).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortSpec {
    /// Expanded, sorted and deduplicated port numbers
    Ports(Vec<u16>),
    /// Named profiles (`--top-ports 1000`) and batch specs are passed through untouched
    Verbatim(String),
}

pub fn parse_port_spec(spec: &str) -> PortSpec {
    let spec = spec.trim();
    if spec.is_empty() || spec.contains(BATCH_PORT_SEPARATOR) {
        return PortSpec::Verbatim(spec.to_string());
    }

    let mut ports = BTreeSet::new();
    for item in spec.split(',').map(str::trim).filter(|item| !item.is_empty()) {
        let caps = match PORT_ITEM.captures(item) {
            Some(caps) => caps,
            None => return PortSpec::Verbatim(spec.to_string()),
        };
        let start: u32 = caps[1].parse().unwrap_or(0);
        let end: u32 = caps.get(2).map_or(Some(start), |m| m.as_str().parse().ok()).unwrap_or(0);
        if start == 0 || end > u16::MAX as u32 || start > end {
            return PortSpec::Verbatim(spec.to_string());
        }
        ports.extend((start..=end).map(|port| port as u16));
    }
    PortSpec::Ports(ports.into_iter().collect())
}

/// Render sorted ports compactly, collapsing consecutive runs into `a-b`.
pub fn render_ports(ports: &[u16]) -> String {
    let mut parts = Vec::new();
    let mut iter = ports.iter().copied().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while let Some(&next) = iter.peek() {
            if next as u32 == end as u32 + 1 {
                end = next;
                iter.next();
            } else {
                break;
            }
        }
        if start == end {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{}-{}", start, end));
        }
    }
    parts.join(",")
}

/// Map each domain to its registrable domain and collapse duplicates.
///
/// Domains without a registrable domain are dropped.
pub fn apex_domains(domains: &[String], suffixes: &SuffixList) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut apexes = Vec::new();
    for domain in domains {
        match suffixes.apex(domain) {
            Some(apex) => {
                if seen.insert(apex.clone()) {
                    apexes.push(apex);
                }
            }
            None => debug!("No registrable domain for {}, dropped", domain),
        }
    }
    apexes
}

#[derive(Debug, Clone)]
pub struct TaskSlicer {
    pub mode: SliceMode,
    pub ip_slice_number: usize,
    pub port_slice_number: usize,
    pub domain_slice_number: usize,
}

impl TaskSlicer {
    pub fn new(mode: SliceMode, task: &TaskConfig) -> Self {
        Self {
            mode,
            ip_slice_number: task.ip_slice_number,
            port_slice_number: task.port_slice_number,
            domain_slice_number: task.domain_slice_number,
        }
    }

    /// Comma-joined IP slices and port slices for the cross-product fan-out.
    pub fn ip_slices(&self, targets: &[String], port: &str) -> (Vec<String>, Vec<String>) {
        let ip_slices =
            self.target_slices(targets, self.mode.slices_targets(), self.ip_slice_number);
        let port_slices = if self.mode.slices_ports() {
            self.port_slices(port)
        } else {
            vec![port.to_string()]
        };
        (ip_slices, port_slices)
    }

    pub fn domain_slices(&self, domains: &[String]) -> Vec<String> {
        self.target_slices(domains, self.mode.slices_targets(), self.domain_slice_number)
    }

    pub fn port_slices(&self, port: &str) -> Vec<String> {
        match parse_port_spec(port) {
            PortSpec::Verbatim(spec) => vec![spec],
            PortSpec::Ports(ports) => {
                let slices: Vec<String> = partition(&ports, self.port_slice_number)
                    .iter()
                    .map(|slice| render_ports(slice))
                    .collect();
                if slices.is_empty() {
                    vec![String::new()]
                } else {
                    slices
                }
            }
        }
    }

    fn target_slices(&self, targets: &[String], sliced: bool, max: usize) -> Vec<String> {
        let max = if sliced { max } else { usize::MAX };
        partition(targets, max)
            .into_iter()
            .map(|slice| slice.join(","))
            .collect()
    }
}
