//! Registrable ("apex") domain extraction backed by a public suffix list.
//!
//! By default the full publicsuffix.org list bundled with the `psl` crate is
//! used, ICANN and private sections alike. Deployments may point
//! `domainscan.suffix_list` at a list in the publicsuffix.org text format
//! instead: one suffix per line, `//` comments, `*.` wildcard rules and `!`
//! exception rules.

use crate::{DispatchError, Result};
use log::info;
use std::collections::HashSet;
use std::path::Path;

static BUNDLED: SuffixList = SuffixList::Bundled;

#[derive(Debug, Clone)]
pub enum SuffixList {
    /// The list compiled into the `psl` crate
    Bundled,
    /// Rules read from a publicsuffix.org formatted file
    Custom(SuffixRules),
}

#[derive(Debug, Clone, Default)]
pub struct SuffixRules {
    rules: HashSet<String>,
    /// `*.ck` is stored as `ck`
    wildcards: HashSet<String>,
    /// `!www.ck` is stored as `www.ck`
    exceptions: HashSet<String>,
}

impl SuffixList {
    pub fn bundled() -> &'static SuffixList {
        &BUNDLED
    }

    pub fn parse(text: &str) -> Self {
        SuffixList::Custom(SuffixRules::parse(text))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            let message = format!("Failed to read suffix list {}: {}", path.display(), e);
            DispatchError::InvalidInput(message)
        })?;
        let rules = SuffixRules::parse(&content);
        info!("Loaded {} public suffix rules from {}", rules.len(), path.display());
        Ok(SuffixList::Custom(rules))
    }

    /// Public suffix of `domain`, `None` when no rule covers it.
    pub fn public_suffix(&self, domain: &str) -> Option<String> {
        let labels = normalize(domain)?;
        match self {
            SuffixList::Bundled => {
                let name = labels.join(".");
                let suffix = psl::suffix(name.as_bytes())?;
                if !suffix.is_known() {
                    return None;
                }
                std::str::from_utf8(suffix.as_bytes()).ok().map(str::to_string)
            }
            SuffixList::Custom(rules) => {
                let start = rules.suffix_start(&labels)?;
                Some(labels[start..].join("."))
            }
        }
    }

    /// Registrable domain: the public suffix plus one label.
    ///
    /// Returns `None` for malformed names, unknown suffixes and names that
    /// are themselves a public suffix.
    pub fn apex(&self, domain: &str) -> Option<String> {
        let labels = normalize(domain)?;
        match self {
            SuffixList::Bundled => {
                let name = labels.join(".");
                let apex = psl::domain(name.as_bytes())?;
                if !apex.suffix().is_known() {
                    return None;
                }
                std::str::from_utf8(apex.as_bytes()).ok().map(str::to_string)
            }
            SuffixList::Custom(rules) => {
                let start = rules.suffix_start(&labels)?;
                if start == 0 {
                    return None;
                }
                Some(labels[start - 1..].join("."))
            }
        }
    }
}

impl SuffixRules {
    pub fn parse(text: &str) -> Self {
        let mut list = SuffixRules::default();
        for line in text.lines() {
            let rule = match line.split_whitespace().next() {
                Some(rule) if !rule.starts_with("//") => rule.to_ascii_lowercase(),
                _ => continue,
            };
            if let Some(exception) = rule.strip_prefix('!') {
                list.exceptions.insert(exception.to_string());
            } else if let Some(wildcard) = rule.strip_prefix("*.") {
                list.wildcards.insert(wildcard.to_string());
            } else {
                list.rules.insert(rule);
            }
        }
        list
    }

    pub fn len(&self) -> usize {
        self.rules.len() + self.wildcards.len() + self.exceptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn suffix_start(&self, labels: &[String]) -> Option<usize> {
        let n = labels.len();
        // exception rules take precedence; the suffix is the rule minus its leftmost label
        for i in 0..n {
            if self.exceptions.contains(&labels[i..].join(".")) {
                return if i + 1 < n { Some(i + 1) } else { None };
            }
        }
        // otherwise the longest matching rule wins
        for i in 0..n {
            if self.rules.contains(&labels[i..].join(".")) {
                return Some(i);
            }
            if i + 1 < n && self.wildcards.contains(&labels[i + 1..].join(".")) {
                return Some(i);
            }
        }
        None
    }
}

fn normalize(domain: &str) -> Option<Vec<String>> {
    let domain = domain.trim().trim_end_matches('.').to_ascii_lowercase();
    if domain.is_empty() {
        return None;
    }
    let labels: Vec<String> = domain.split('.').map(str::to_string).collect();
    let well_formed = labels.iter().all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    });
    if well_formed {
        Some(labels)
    } else {
        None
    }
}
