//! Stores consulted by the dispatcher: keyword rules, organizations and the
//! domain records produced while formatting IP targets.

use crate::model::{KeywordRule, OrgId, Organization};
use crate::query::{MatchMode, SearchEngine};
use crate::{DispatchError, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tokio_postgres::types::FromSql;
use tokio_postgres::{Client, NoTls, Row};

const DATE_FORMAT: &str = "%Y-%m-%d";

#[async_trait]
pub trait KeywordRuleStore: Send + Sync {
    /// Rules of one organization, or every rule when `org` is `None`.
    async fn list_rules(&self, org: Option<OrgId>) -> Result<Vec<KeywordRule>>;

    /// Compare-and-set the last-run date of a rule to `date`.
    ///
    /// Returns `false` when the rule already ran on `date` (or does not
    /// exist), so that only one caller per day wins a rule.
    async fn mark_rule_run(&self, id: i64, date: NaiveDate) -> Result<bool>;
}

#[async_trait]
pub trait OrganizationStore: Send + Sync {
    async fn get_organization(&self, id: OrgId) -> Result<Option<Organization>>;
}

#[async_trait]
pub trait DomainRecordStore: Send + Sync {
    async fn record_a_records(
        &self,
        domain: &str,
        addresses: &[String],
        source: &str,
        org: Option<OrgId>,
    ) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRecord {
    pub domain: String,
    pub tag: String,
    pub content: String,
    pub source: String,
    pub org_id: Option<OrgId>,
}

/// On-disk form of a [`MemoryStore`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSnapshot {
    pub rules: Vec<KeywordRule>,
    pub organizations: Vec<Organization>,
}

#[derive(Default)]
pub struct MemoryStore {
    rules: Mutex<BTreeMap<i64, KeywordRule>>,
    organizations: Mutex<HashMap<OrgId, Organization>>,
    records: Mutex<Vec<DomainRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let store = Self::new();
        for rule in snapshot.rules {
            store.insert_rule(rule);
        }
        for org in snapshot.organizations {
            store.insert_organization(org);
        }
        store
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let snapshot: StoreSnapshot = serde_json::from_str(&content)?;
        info!(
            "Loaded {} keyword rules and {} organizations from {}",
            snapshot.rules.len(),
            snapshot.organizations.len(),
            path.display()
        );
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn insert_rule(&self, rule: KeywordRule) {
        self.rules.lock().insert(rule.id, rule);
    }

    pub fn insert_organization(&self, org: Organization) {
        self.organizations.lock().insert(org.id, org);
    }

    pub fn rule(&self, id: i64) -> Option<KeywordRule> {
        self.rules.lock().get(&id).cloned()
    }

    pub fn records(&self) -> Vec<DomainRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl KeywordRuleStore for MemoryStore {
    async fn list_rules(&self, org: Option<OrgId>) -> Result<Vec<KeywordRule>> {
        let rules = self.rules.lock();
        Ok(rules
            .values()
            .filter(|rule| org.is_none() || rule.org_id == org)
            .cloned()
            .collect())
    }

    async fn mark_rule_run(&self, id: i64, date: NaiveDate) -> Result<bool> {
        let mut rules = self.rules.lock();
        match rules.get_mut(&id) {
            Some(rule) if rule.last_run != Some(date) => {
                rule.last_run = Some(date);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl OrganizationStore for MemoryStore {
    async fn get_organization(&self, id: OrgId) -> Result<Option<Organization>> {
        Ok(self.organizations.lock().get(&id).cloned())
    }
}

#[async_trait]
impl DomainRecordStore for MemoryStore {
    async fn record_a_records(
        &self,
        domain: &str,
        addresses: &[String],
        source: &str,
        org: Option<OrgId>,
    ) -> Result<()> {
        let mut records = self.records.lock();
        for address in addresses {
            records.push(DomainRecord {
                domain: domain.to_string(),
                tag: "A".to_string(),
                content: address.clone(),
                source: source.to_string(),
                org_id: org,
            });
        }
        Ok(())
    }
}

/// PostgreSQL backed stores sharing the web application's tables
pub struct PgStore {
    client: Client,
}

impl PgStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(url, NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL connection error: {}", e);
            }
        });
        info!("Connected to rule store");
        Ok(Self { client })
    }

    fn org_param(org: Option<OrgId>) -> Result<Option<i32>> {
        org.map(|id| {
            i32::try_from(id.get()).map_err(|_| {
                DispatchError::InvalidInput(format!("Organization id out of range: {}", id))
            })
        })
        .transpose()
    }
}

fn column<'a, T: FromSql<'a>>(row: &'a Row, name: &str) -> Result<T> {
    row.try_get(name).map_err(|e| column_error(name, e))
}

fn column_error(name: &str, err: impl std::fmt::Display) -> DispatchError {
    DispatchError::Store(format!("Unreadable column {}: {}", name, err))
}

/// A `keyword_rule` row as stored
struct StoredRule {
    id: i64,
    org_id: Option<i32>,
    key_word: String,
    exclude_words: Option<String>,
    check_mod: String,
    engine: String,
    count: i32,
    search_time: Option<String>,
}

impl StoredRule {
    fn into_rule(self) -> KeywordRule {
        let id = self.id;
        let last_run = match self.search_time.as_deref().filter(|s| !s.is_empty()) {
            Some(s) => match NaiveDate::parse_from_str(s, DATE_FORMAT) {
                Ok(date) => Some(date),
                Err(_) => {
                    warn!("Keyword rule {} has an unreadable search time {:?}", id, s);
                    None
                }
            },
            None => None,
        };
        let engines: Vec<SearchEngine> = self
            .engine
            .split(',')
            .filter(|name| !name.trim().is_empty())
            .filter_map(|name| match name.parse() {
                Ok(engine) => Some(engine),
                Err(_) => {
                    warn!("Keyword rule {} names unknown engine {:?}", id, name);
                    None
                }
            })
            .collect();

        KeywordRule {
            id,
            org_id: self.org_id.and_then(|raw| OrgId::from_raw(raw as i64)),
            keyword: self.key_word,
            exclude_words: self.exclude_words.unwrap_or_default(),
            check_mode: MatchMode::parse(&self.check_mod),
            engines,
            count: self.count.max(0) as u32,
            last_run,
        }
    }
}

#[async_trait]
impl KeywordRuleStore for PgStore {
    async fn list_rules(&self, org: Option<OrgId>) -> Result<Vec<KeywordRule>> {
        let org_param = Self::org_param(org)?;
        let rows = self
            .client
            .query(
                "SELECT id::bigint AS id, org_id::int AS org_id, key_word, exclude_words, check_mod, \
                 engine, count::int AS count, search_time::text AS search_time \
                 FROM keyword_rule WHERE ($1::int IS NULL OR org_id = $1) ORDER BY id",
                &[&org_param],
            )
            .await?;

        let mut rules = Vec::with_capacity(rows.len());
        for row in rows {
            let stored = StoredRule {
                id: column(&row, "id")?,
                org_id: column(&row, "org_id")?,
                key_word: column(&row, "key_word")?,
                exclude_words: column(&row, "exclude_words")?,
                check_mod: column(&row, "check_mod")?,
                engine: column(&row, "engine")?,
                count: column(&row, "count")?,
                search_time: column(&row, "search_time")?,
            };
            rules.push(stored.into_rule());
        }
        debug!("Loaded {} keyword rules", rules.len());
        Ok(rules)
    }

    async fn mark_rule_run(&self, id: i64, date: NaiveDate) -> Result<bool> {
        let day = date.format(DATE_FORMAT).to_string();
        let updated = self
            .client
            .execute(
                "UPDATE keyword_rule SET search_time = $1 \
                 WHERE id = $2::bigint AND search_time IS DISTINCT FROM $1",
                &[&day, &id],
            )
            .await?;
        Ok(updated == 1)
    }
}

#[async_trait]
impl OrganizationStore for PgStore {
    async fn get_organization(&self, id: OrgId) -> Result<Option<Organization>> {
        let org_param = Self::org_param(Some(id))?;
        let row = self
            .client
            .query_opt("SELECT org_name FROM organization WHERE id = $1", &[&org_param])
            .await?;
        match row {
            Some(row) => Ok(Some(Organization {
                id,
                name: column(&row, "org_name")?,
            })),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl DomainRecordStore for PgStore {
    async fn record_a_records(
        &self,
        domain: &str,
        addresses: &[String],
        source: &str,
        org: Option<OrgId>,
    ) -> Result<()> {
        let org_param = Self::org_param(org)?;
        for address in addresses {
            self.client
                .execute(
                    "INSERT INTO domain_attr (domain, org_id, source, tag, content) VALUES ($1, $2, $3, 'A', $4)",
                    &[&domain, &org_param, &source, address],
                )
                .await?;
        }
        Ok(())
    }
}
