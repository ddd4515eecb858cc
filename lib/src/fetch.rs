//! Retrieval of entity documents.
//!
//! A [`PageSource`] performs one GET; [`RetryPolicy`] wraps any fallible
//! operation with bounded retries; [`EntityFetcher`] combines both with the
//! worker pool to download the documents of a whole batch of entities.

use crate::changes::ChangeEntry;
use crate::config::FetchConfig;
use crate::errors::RetryError;
use crate::pool::{Cancel, Pool};
use crate::progress::ProgressObserver;
use anyhow::{anyhow, Context, Result};
use log::{debug, warn};
use reqwest::blocking::Client;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::time::Duration;

/// A document that does not exist (HTTP 404) is `Ok(None)`; it marks a
/// deleted entity rather than a failure.
pub trait PageSource: Send + Sync {
    fn get(&self, url: &str, headers: &HeaderMap) -> Result<Option<Vec<u8>>>;
}

pub struct HttpPageSource {
    client: Client,
}

impl HttpPageSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl PageSource for HttpPageSource {
    fn get(&self, url: &str, headers: &HeaderMap) -> Result<Option<Vec<u8>>> {
        let resp = self.client.get(url).headers(headers.clone()).send()?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            debug!("{} does not exist", url);
            return Ok(None);
        }
        if !status.is_success() {
            return Err(anyhow!("GET {} returned {}", url, status));
        }
        Ok(Some(resp.bytes()?.to_vec()))
    }
}

/// Bounded retry with a constant backoff. `max_attempts == 0` retries until
/// success or cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Calls `op` with the 1-based attempt number until it succeeds.
    pub fn run<T, F>(&self, cancel: &Cancel, mut op: F) -> std::result::Result<T, RetryError>
    where
        F: FnMut(u32) -> Result<T>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let cause = match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            if self.max_attempts != 0 && attempt >= self.max_attempts {
                return Err(RetryError {
                    attempts: attempt,
                    cancelled: false,
                    cause,
                });
            }
            warn!("Attempt {} failed, retrying: {:#}", attempt, cause);
            if !cancel.sleep(self.backoff) {
                return Err(RetryError {
                    attempts: attempt,
                    cancelled: true,
                    cause,
                });
            }
        }
    }
}

/// Downloads entity documents with retries, concurrently.
pub struct EntityFetcher<'a> {
    source: &'a dyn PageSource,
    config: &'a FetchConfig,
    headers: HeaderMap,
    pool: Pool,
}

impl<'a> EntityFetcher<'a> {
    pub fn new(source: &'a dyn PageSource, config: &'a FetchConfig) -> Result<Self> {
        Ok(Self {
            source,
            config,
            headers: config.header_map()?,
            pool: Pool::new(config.concurrency),
        })
    }

    pub fn pool(&self) -> Pool {
        self.pool
    }

    /// Fetches one entity document, `None` when the entity is gone.
    pub fn fetch_one(&self, entry: &ChangeEntry, cancel: &Cancel) -> Result<Option<Vec<u8>>> {
        let url = self.config.entity_url(&entry.id);
        self.config
            .retry_policy()
            .run(cancel, |attempt| {
                if attempt > 1 {
                    debug!("Retrying {} (attempt {})", url, attempt);
                }
                self.source.get(&url, &self.headers)
            })
            .map_err(anyhow::Error::from)
            .with_context(|| format!("Failed to download {}", url))
    }

    /// Fetches every entity and hands each document to `sink` as soon as it
    /// arrives. Returns the number of entities processed.
    pub fn fetch_each<S>(
        &self,
        entries: &[ChangeEntry],
        observer: &dyn ProgressObserver,
        sink: S,
    ) -> Result<u64>
    where
        S: Fn(&ChangeEntry, Option<&[u8]>) -> Result<()> + Sync,
    {
        let done = self.pool.run(entries, "download", observer, |entry, cancel| {
            let doc = self.fetch_one(entry, cancel)?;
            sink(entry, doc.as_deref())
        })?;
        Ok(done.len() as u64)
    }

    /// Fetches every entity and collects the documents by id.
    pub fn fetch_many(
        &self,
        entries: &[ChangeEntry],
        observer: &dyn ProgressObserver,
    ) -> Result<HashMap<String, Option<Vec<u8>>>> {
        let docs = self.pool.run(entries, "download", observer, |entry, cancel| {
            Ok((entry.id.clone(), self.fetch_one(entry, cancel)?))
        })?;
        Ok(docs.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SyncError;
    use crate::progress::NoProgress;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Serves `documents` by URL, failing the first `flaky[url]` requests to
    /// a URL. Unknown URLs are 404s. Every GET is counted per URL.
    #[derive(Default)]
    struct ScriptedSource {
        documents: HashMap<String, String>,
        flaky: HashMap<String, u32>,
        gets: Mutex<HashMap<String, u32>>,
    }

    impl ScriptedSource {
        fn gets(&self, url: &str) -> u32 {
            self.gets.lock().unwrap().get(url).copied().unwrap_or(0)
        }
    }

    impl PageSource for ScriptedSource {
        fn get(&self, url: &str, _headers: &HeaderMap) -> Result<Option<Vec<u8>>> {
            let seen = {
                let mut gets = self.gets.lock().unwrap();
                let n = gets.entry(url.to_string()).or_insert(0);
                *n += 1;
                *n
            };
            if seen <= self.flaky.get(url).copied().unwrap_or(0) {
                return Err(anyhow!("503 Service Unavailable"));
            }
            Ok(self.documents.get(url).map(|d| d.as_bytes().to_vec()))
        }
    }

    fn fetch_config(max_attempts: u32, concurrency: usize) -> FetchConfig {
        FetchConfig {
            max_attempts,
            backoff_ms: 0,
            concurrency,
            ..FetchConfig::default()
        }
    }

    fn document(id: &str) -> String {
        format!("<http://www.wikidata.org/entity/{id}> a <http://wikiba.se/ontology#Item> .\n")
    }

    #[test]
    fn missing_document_is_not_retried() {
        let config = fetch_config(5, 1);
        let source = ScriptedSource::default();
        let fetcher = EntityFetcher::new(&source, &config).unwrap();
        let doc = fetcher
            .fetch_one(&ChangeEntry::new("Q404", 0), &Cancel::default())
            .unwrap();
        assert!(doc.is_none());
        assert_eq!(source.gets(&config.entity_url("Q404")), 1);
    }

    #[test]
    fn transient_failures_are_retried_up_to_the_limit() {
        let config = fetch_config(5, 1);
        let url = config.entity_url("Q1");
        let mut source = ScriptedSource::default();
        source.documents.insert(url.clone(), document("Q1"));
        source.flaky.insert(url.clone(), 2);
        let fetcher = EntityFetcher::new(&source, &config).unwrap();
        let doc = fetcher
            .fetch_one(&ChangeEntry::new("Q1", 0), &Cancel::default())
            .unwrap();
        assert_eq!(doc.unwrap(), document("Q1").into_bytes());
        assert_eq!(source.gets(&url), 3);

        let config = fetch_config(2, 1);
        source.gets.lock().unwrap().clear();
        let fetcher = EntityFetcher::new(&source, &config).unwrap();
        let err = fetcher
            .fetch_one(&ChangeEntry::new("Q1", 0), &Cancel::default())
            .unwrap_err();
        assert_eq!(source.gets(&url), 2);
        let retry = err.downcast_ref::<RetryError>().unwrap();
        assert_eq!(retry.attempts, 2);
        assert!(!retry.cancelled);
    }

    #[test]
    fn fetch_many_collects_documents_by_id() {
        let config = fetch_config(3, 2);
        let mut source = ScriptedSource::default();
        for id in ["Q1", "Q3"] {
            source.documents.insert(config.entity_url(id), document(id));
        }
        source.flaky.insert(config.entity_url("Q3"), 1);
        let entries = vec![
            ChangeEntry::new("Q1", 0),
            ChangeEntry::new("Q2", 0),
            ChangeEntry::new("Q3", 0),
        ];
        let fetcher = EntityFetcher::new(&source, &config).unwrap();
        let docs = fetcher.fetch_many(&entries, &NoProgress).unwrap();

        assert_eq!(docs.len(), 3);
        assert_eq!(docs["Q1"].as_deref(), Some(document("Q1").as_bytes()));
        assert_eq!(docs["Q2"], None);
        assert_eq!(docs["Q3"].as_deref(), Some(document("Q3").as_bytes()));
        assert_eq!(source.gets(&config.entity_url("Q2")), 1);
        assert_eq!(source.gets(&config.entity_url("Q3")), 2);
    }

    #[test]
    fn exhausted_entity_aborts_the_batch() {
        let config = fetch_config(2, 1);
        let mut source = ScriptedSource::default();
        for id in ["Q1", "Q2", "Q3"] {
            source.documents.insert(config.entity_url(id), document(id));
        }
        source.flaky.insert(config.entity_url("Q3"), u32::MAX);
        let entries = vec![
            ChangeEntry::new("Q1", 0),
            ChangeEntry::new("Q2", 0),
            ChangeEntry::new("Q3", 0),
        ];
        let fetcher = EntityFetcher::new(&source, &config).unwrap();
        let err = fetcher.fetch_many(&entries, &NoProgress).unwrap_err();
        match err.downcast_ref::<SyncError>() {
            Some(SyncError::BatchAborted {
                completed, total, ..
            }) => {
                assert_eq!(*completed, 2);
                assert_eq!(*total, 3);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(source.gets(&config.entity_url("Q3")), 2);
    }

    #[test]
    fn retry_succeeds_on_third_attempt() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::ZERO);
        let v = policy
            .run(&Cancel::default(), |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                if attempt < 3 {
                    Err(anyhow!("transient"))
                } else {
                    Ok(attempt)
                }
            })
            .unwrap();
        assert_eq!(v, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn retry_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Duration::ZERO);
        let err = policy
            .run(&Cancel::default(), |_| -> Result<()> {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(anyhow!("down"))
            })
            .unwrap_err();
        assert_eq!(err.attempts, 2);
        assert!(!err.cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(err.to_string(), "failed after 2 attempt(s): down");
    }

    #[test]
    fn unlimited_retry_stops_on_cancel() {
        let cancel = Cancel::default();
        let policy = RetryPolicy::new(0, Duration::from_millis(10));
        let err = policy
            .run(&cancel, |attempt| -> Result<()> {
                if attempt == 4 {
                    cancel.cancel();
                }
                Err(anyhow!("down"))
            })
            .unwrap_err();
        assert!(err.cancelled);
        assert_eq!(err.attempts, 4);
    }
}
