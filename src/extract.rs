//! Recovering a human readable target from a stored sub-task config, for
//! task listings and audit views.

use crate::model::{OrgId, TaskKind};
use crate::store::OrganizationStore;
use log::warn;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Longest target shown before truncation, in bytes
pub const DISPLAY_LENGTH: usize = 100;
pub const ELLIPSIS: &str = "...";

#[derive(Deserialize)]
struct SimpleView {
    #[serde(default)]
    target: String,
}

#[derive(Deserialize)]
struct FingerprintView {
    #[serde(rename = "IPTargetMap", default)]
    ip_target_map: Option<BTreeMap<String, Value>>,
    #[serde(rename = "DomainTargetMap", default)]
    domain_target_map: Option<BTreeMap<String, Value>>,
}

#[derive(Deserialize)]
struct XScanView {
    #[serde(default)]
    orgid: Option<i64>,
    #[serde(rename = "onlineapiTarget", default)]
    online_api_target: String,
    #[serde(rename = "onlineapiKeyword", default)]
    online_api_keyword: String,
    #[serde(default)]
    ipport: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    ipportstring: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    domain: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    target: String,
}

/// Display target of a task, never failing.
///
/// Undecodable configs are shown as their raw text. Results longer than
/// [`DISPLAY_LENGTH`] are cut and suffixed with [`ELLIPSIS`].
pub async fn extract_display_target(
    kind: &str,
    config: &str,
    orgs: &dyn OrganizationStore,
) -> String {
    let target = if kind == TaskKind::Fingerprint.as_str() {
        fingerprint_targets(config)
    } else if kind != TaskKind::Xray.as_str() && kind.starts_with('x') {
        xscan_targets(kind, config, orgs).await
    } else {
        serde_json::from_str::<SimpleView>(config).ok().map(|view| view.target)
    };
    truncate_display(target.unwrap_or_else(|| config.to_string()))
}

fn fingerprint_targets(config: &str) -> Option<String> {
    let view: FingerprintView = serde_json::from_str(config).ok()?;
    let all: Vec<String> = view
        .ip_target_map
        .into_iter()
        .chain(view.domain_target_map)
        .flat_map(BTreeMap::into_keys)
        .collect();
    Some(all.join(","))
}

async fn xscan_targets(kind: &str, config: &str, orgs: &dyn OrganizationStore) -> Option<String> {
    let view: XScanView = serde_json::from_str(config).ok()?;
    let mut all = Vec::new();
    if !view.online_api_target.is_empty() {
        all.push(view.online_api_target);
    }
    if !view.online_api_keyword.is_empty() {
        all.push(view.online_api_keyword);
    }
    for map in [view.ipport, view.ipportstring, view.domain].into_iter().flatten() {
        all.extend(map.into_keys());
    }
    if !view.target.is_empty() {
        all.push(view.target);
    }

    let org_scoped =
        kind == TaskKind::XOrgscan.as_str() || kind == TaskKind::XOnlineApiCustom.as_str();
    if org_scoped {
        if let Some(id) = view.orgid.and_then(OrgId::from_raw) {
            match orgs.get_organization(id).await {
                Ok(Some(org)) => all.push(org.name),
                Ok(None) => {}
                Err(e) => warn!("Failed to look up organization {}: {}", id, e),
            }
        }
    }
    Some(all.join(","))
}

pub fn truncate_display(target: String) -> String {
    if target.len() <= DISPLAY_LENGTH {
        return target;
    }
    let mut end = DISPLAY_LENGTH;
    while !target.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &target[..end], ELLIPSIS)
}
