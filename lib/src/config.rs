//! Defines the configuration of the updater: where changes come from, where
//! entity documents are fetched, and how the downstream store is written.
//! Both structs load from and save to JSON, and can be assembled with the
//! generated builders.

use crate::consts::{
    DEFAULT_CHANGE_API, DEFAULT_ENTITY_IRI_PREFIX, DEFAULT_ENTITY_SERVER, DEFAULT_SPARQL_ENDPOINT,
    DEFAULT_USER_AGENT,
};
use crate::delta::DEFAULT_EPSILON;
use crate::errors::SyncError;
use crate::fetch::RetryPolicy;
use crate::options::{LowVolumePolicy, RdfFlavor, StoreAccess};
use anyhow::Result;
use derive_builder::Builder;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::io::{BufReader, Write};
use std::path::Path;
use std::time::Duration;

/// How entity documents are downloaded.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Builder)]
#[builder(default, setter(into))]
#[serde(default)]
pub struct FetchConfig {
    /// Prefix of entity document URLs; `<server><id>.ttl` is requested.
    pub server: String,
    pub flavor: RdfFlavor,
    /// Request headers sent with every download.
    pub headers: Vec<(String, String)>,
    /// `0` retries forever.
    pub max_attempts: u32,
    pub backoff_ms: u64,
    /// Concurrent downloads; `0` uses one per core.
    pub concurrency: usize,
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_ENTITY_SERVER.to_string(),
            flavor: RdfFlavor::Dump,
            headers: vec![
                ("user-agent".to_string(), DEFAULT_USER_AGENT.to_string()),
                ("accept".to_string(), "text/turtle".to_string()),
                ("accept-language".to_string(), "en".to_string()),
            ],
            max_attempts: 10,
            backoff_ms: 500,
            concurrency: 0,
            timeout_secs: 60,
        }
    }
}

impl FetchConfig {
    /// Settings used when writing delta files: fewer, slower retries and the
    /// server's default flavor.
    pub fn snapshot_defaults() -> Self {
        Self {
            flavor: RdfFlavor::Full,
            max_attempts: 5,
            backoff_ms: 5000,
            ..Self::default()
        }
    }

    pub fn entity_url(&self, id: &str) -> String {
        format!("{}{}.ttl{}", self.server, id, self.flavor.url_suffix())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.backoff_ms))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn header_map(&self) -> Result<HeaderMap> {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| SyncError::config(format!("bad header name {:?}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| SyncError::config(format!("bad header value {:?}: {}", value, e)))?;
            map.insert(name, value);
        }
        Ok(map)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Builder)]
#[builder(default, setter(into))]
#[serde(default)]
pub struct UpdaterConfig {
    /// SPARQL query endpoint of the downstream store.
    pub sparql_endpoint: String,
    /// SPARQL update endpoint; the query endpoint when unset.
    pub update_endpoint: Option<String>,
    /// MediaWiki action API serving the recent-changes feed.
    pub change_api: String,
    /// IRI prefix of entities in the store, `<prefix><id>`.
    pub entity_iri_prefix: String,
    /// Feed entries requested per page.
    pub page_size: usize,
    /// Rounds with fewer distinct changes apply nothing.
    pub min_changes: usize,
    pub low_volume: LowVolumePolicy,
    /// Statements per downstream transaction.
    pub max_statements_per_tx: usize,
    /// Route every store read and commit through one lock.
    pub serialize_requests: bool,
    /// Sleep between two rounds.
    pub round_interval_ms: u64,
    /// Log a failed round and retry it after the interval instead of
    /// stopping.
    pub retry_failed_rounds: bool,
    /// Tolerance when comparing numeric literals.
    pub epsilon: f64,
    /// Timeout of store requests; unlimited when unset.
    pub query_timeout_secs: Option<u64>,
    pub fetch: FetchConfig,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            sparql_endpoint: DEFAULT_SPARQL_ENDPOINT.to_string(),
            update_endpoint: None,
            change_api: DEFAULT_CHANGE_API.to_string(),
            entity_iri_prefix: DEFAULT_ENTITY_IRI_PREFIX.to_string(),
            page_size: 500,
            min_changes: 100,
            low_volume: LowVolumePolicy::Defer,
            max_statements_per_tx: 1000,
            serialize_requests: false,
            round_interval_ms: 10_000,
            retry_failed_rounds: false,
            epsilon: DEFAULT_EPSILON,
            query_timeout_secs: None,
            fetch: FetchConfig::default(),
        }
    }
}

impl UpdaterConfig {
    pub fn builder() -> UpdaterConfigBuilder {
        UpdaterConfigBuilder::default()
    }

    /// Rejects settings no round could run with.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(SyncError::config("page size must be positive").into());
        }
        if self.max_statements_per_tx == 0 {
            return Err(SyncError::config("max statements per transaction must be positive").into());
        }
        if !self.epsilon.is_finite() || self.epsilon < 0.0 {
            return Err(SyncError::config(format!("invalid epsilon {}", self.epsilon)).into());
        }
        if self.sparql_endpoint.is_empty() {
            return Err(SyncError::config("no SPARQL endpoint").into());
        }
        self.fetch.header_map()?;
        Ok(())
    }

    pub fn store_access(&self) -> StoreAccess {
        StoreAccess::from(self.serialize_requests)
    }

    pub fn round_interval(&self) -> Duration {
        Duration::from_millis(self.round_interval_ms)
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_secs.map(Duration::from_secs)
    }

    pub fn entity_iri(&self, id: &str) -> String {
        format!("{}{}", self.entity_iri_prefix, id)
    }

    pub fn save_to_file(&self, file: &Path) -> Result<()> {
        let config_str = serde_json::to_string_pretty(&self)?;
        let mut file = std::fs::File::create(file)?;
        file.write_all(config_str.as_bytes())?;
        Ok(())
    }

    pub fn from_file(file: &Path) -> Result<Self> {
        let file = std::fs::File::open(file)?;
        let reader = BufReader::new(file);
        let config: UpdaterConfig = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Prints out the current configuration for command line output.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  SPARQL endpoint: {}", self.sparql_endpoint);
        if let Some(update) = &self.update_endpoint {
            println!("  Update endpoint: {}", update);
        }
        println!("  Change API: {}", self.change_api);
        println!("  Entity server: {}", self.fetch.server);
        println!("  Flavor: {}", self.fetch.flavor.title());
        println!("  Page size: {}", self.page_size);
        println!(
            "  Minimum changes: {} ({:?} below)",
            self.min_changes, self.low_volume
        );
        println!("  Statements per transaction: {}", self.max_statements_per_tx);
        println!("  Serialized requests: {}", self.serialize_requests);
        println!("  Round interval: {}ms", self.round_interval_ms);
        println!("  Retry failed rounds: {}", self.retry_failed_rounds);
        println!(
            "  Downloads: {} attempt(s), {}ms backoff, concurrency {}",
            self.fetch.max_attempts,
            self.fetch.backoff_ms,
            if self.fetch.concurrency == 0 {
                "auto".to_string()
            } else {
                self.fetch.concurrency.to_string()
            }
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = UpdaterConfig::default();
        config.validate().unwrap();
        assert_eq!(config.min_changes, 100);
        assert_eq!(config.max_statements_per_tx, 1000);
        assert_eq!(config.round_interval(), Duration::from_secs(10));
        assert_eq!(config.query_timeout(), None);
        assert_eq!(
            config.fetch.entity_url("Q42"),
            "https://www.wikidata.org/wiki/Special:EntityData/Q42.ttl?flavor=dump"
        );
        assert_eq!(
            FetchConfig::snapshot_defaults().entity_url("Q42"),
            "https://www.wikidata.org/wiki/Special:EntityData/Q42.ttl"
        );
    }

    #[test]
    fn builder_and_validation() {
        let config = UpdaterConfig::builder()
            .max_statements_per_tx(0usize)
            .build()
            .unwrap();
        assert!(config.validate().is_err());

        let config = UpdaterConfig::builder()
            .page_size(50usize)
            .serialize_requests(true)
            .fetch(
                FetchConfigBuilder::default()
                    .max_attempts(3u32)
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();
        config.validate().unwrap();
        assert!(config.store_access().is_serialized());
        assert_eq!(config.fetch.max_attempts, 3);
        assert_eq!(config.fetch.backoff_ms, 500);
    }

    #[test]
    fn file_roundtrip_fills_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wdsync.json");
        std::fs::write(&path, r#"{"min_changes": 5, "fetch": {"concurrency": 2}}"#).unwrap();
        let config = UpdaterConfig::from_file(&path).unwrap();
        assert_eq!(config.min_changes, 5);
        assert_eq!(config.fetch.concurrency, 2);
        assert_eq!(config.fetch.max_attempts, 10);
        assert_eq!(config.page_size, 500);

        config.save_to_file(&path).unwrap();
        assert_eq!(UpdaterConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn bad_header_is_rejected() {
        let mut config = UpdaterConfig::default();
        config.fetch.headers.push(("bad header".into(), "x".into()));
        assert!(config.validate().is_err());
    }
}
