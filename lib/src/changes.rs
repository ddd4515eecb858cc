//! Discovery of changed entities by walking the recent-changes feed backwards
//! from "now" to the watermark.

use crate::consts::DEFAULT_USER_AGENT;
use crate::cursor::Cursor;
use crate::errors::SyncError;
use crate::progress::ProgressObserver;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use lazy_static::lazy_static;
use log::{debug, info};
use regex::Regex;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

lazy_static! {
    static ref CONTINUATION_TOKEN: Regex = Regex::new(r"^(\d{14})\|(\d+)$").unwrap();
}

/// One entry of the change feed. Only main-namespace entries with an id are
/// entities.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeEntry {
    pub id: String,
    pub namespace: i64,
}

impl ChangeEntry {
    pub fn new(id: impl Into<String>, namespace: i64) -> Self {
        Self {
            id: id.into(),
            namespace,
        }
    }

    pub fn is_entity(&self) -> bool {
        self.namespace == 0 && !self.id.is_empty()
    }
}

/// A page of the feed, newest first.
#[derive(Debug, Clone, Default)]
pub struct ChangePage {
    pub entries: Vec<ChangeEntry>,
    /// Token to fetch the next (older) page; `None` at the end of the feed.
    pub continuation: Option<String>,
    /// Timestamp of the oldest change covered by this page.
    pub oldest: Option<DateTime<Utc>>,
}

pub trait ChangeFeed: Send + Sync {
    fn page(&self, continuation: Option<&str>, limit: usize) -> Result<ChangePage>;
}

/// Parses the timestamp prefix of a `YYYYMMDDhhmmss|id` continuation token.
pub fn parse_continuation(token: &str) -> Option<DateTime<Utc>> {
    let caps = CONTINUATION_TOKEN.captures(token)?;
    NaiveDateTime::parse_from_str(caps.get(1)?.as_str(), "%Y%m%d%H%M%S")
        .ok()
        .map(|dt| dt.and_utc())
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(rename = "continue")]
    next: Option<ApiContinue>,
    query: ApiQuery,
}

#[derive(Deserialize)]
struct ApiContinue {
    rccontinue: Option<String>,
}

#[derive(Deserialize)]
struct ApiQuery {
    #[serde(default)]
    recentchanges: Vec<ApiChange>,
}

#[derive(Deserialize)]
struct ApiChange {
    #[serde(default)]
    title: String,
    #[serde(default)]
    ns: i64,
    timestamp: Option<DateTime<Utc>>,
}

/// Turns the body of a MediaWiki `list=recentchanges` query into a page.
pub fn parse_api_page(body: &[u8]) -> Result<ChangePage> {
    let response: ApiResponse =
        serde_json::from_slice(body).context("Malformed recent changes response")?;
    let continuation = response.next.and_then(|c| c.rccontinue);
    let mut oldest = response
        .query
        .recentchanges
        .iter()
        .filter_map(|c| c.timestamp)
        .min();
    if let Some(token) = &continuation {
        let token_date = parse_continuation(token)
            .ok_or_else(|| anyhow!("Unexpected continuation token {:?}", token))?;
        oldest = Some(oldest.map_or(token_date, |o| o.min(token_date)));
    }
    let entries = response
        .query
        .recentchanges
        .into_iter()
        .map(|c| ChangeEntry::new(c.title, c.ns))
        .collect();
    Ok(ChangePage {
        entries,
        continuation,
        oldest,
    })
}

/// The MediaWiki action API of a Wikibase instance.
pub struct WikiApiFeed {
    client: Client,
    url: String,
}

impl WikiApiFeed {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl ChangeFeed for WikiApiFeed {
    fn page(&self, continuation: Option<&str>, limit: usize) -> Result<ChangePage> {
        let limit = limit.to_string();
        let mut query = vec![
            ("format", "json"),
            ("action", "query"),
            ("list", "recentchanges"),
            ("rcprop", "title|timestamp"),
            ("rclimit", limit.as_str()),
        ];
        if let Some(token) = continuation {
            query.push(("rccontinue", token));
        }
        debug!("Fetching change page {:?}", continuation);
        let response = self
            .client
            .get(&self.url)
            .query(&query)
            .send()?
            .error_for_status()?;
        let body = response.bytes()?;
        parse_api_page(&body)
    }
}

/// Result of walking the feed for one round.
#[derive(Debug, Clone)]
pub struct Discovery {
    /// Distinct feed entries, keyed by id, in first-seen order.
    pub entries: Vec<ChangeEntry>,
    /// Cursor to persist once everything discovered has been applied.
    pub cursor: Cursor,
    pub pages: usize,
}

impl Discovery {
    /// Entries that name an entity.
    pub fn entities(&self) -> Vec<ChangeEntry> {
        self.entries
            .iter()
            .filter(|e| e.is_entity())
            .cloned()
            .collect()
    }
}

/// Progress of a walk expressed in milliseconds of the `[watermark, now]`
/// window: how far back the walk has reached, clamped to `[0, window]`.
pub fn walk_progress(
    window: chrono::Duration,
    oldest: DateTime<Utc>,
    watermark: DateTime<Utc>,
) -> (u64, u64) {
    let total = window.num_milliseconds().max(0);
    let remaining = (oldest - watermark).num_milliseconds();
    let done = (total - remaining).clamp(0, total);
    (done as u64, total as u64)
}

pub struct ChangeWalker<'a> {
    feed: &'a dyn ChangeFeed,
    observer: &'a dyn ProgressObserver,
}

impl<'a> ChangeWalker<'a> {
    pub fn new(feed: &'a dyn ChangeFeed, observer: &'a dyn ProgressObserver) -> Self {
        Self { feed, observer }
    }

    pub fn discover(&self, cursor: &Cursor, page_size: usize) -> Result<Discovery> {
        self.discover_at(cursor, page_size, Utc::now())
    }

    /// Walks pages until one reaches back to the watermark (or the feed
    /// ends). The returned cursor carries `now` as its watermark.
    pub fn discover_at(
        &self,
        cursor: &Cursor,
        page_size: usize,
        now: DateTime<Utc>,
    ) -> Result<Discovery> {
        if page_size == 0 {
            return Err(SyncError::config("page size must be positive").into());
        }
        let watermark = cursor.watermark;
        let window = now - watermark;
        if window <= chrono::Duration::zero() {
            return Err(SyncError::FutureWatermark { watermark, now }.into());
        }

        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut entries = Vec::new();
        let mut continuation: Option<String> = None;
        let mut pages = 0;
        loop {
            let page = self
                .feed
                .page(continuation.as_deref(), page_size)
                .with_context(|| format!("Failed to read change page {}", pages + 1))?;
            pages += 1;
            for entry in page.entries {
                if !seen.contains_key(&entry.id) {
                    seen.insert(entry.id.clone(), entries.len());
                    entries.push(entry);
                }
            }
            let reached = match page.oldest {
                Some(oldest) => {
                    let (done, total) = walk_progress(window, oldest, watermark);
                    self.observer.progress(done, total, "changes");
                    oldest <= watermark
                }
                None => false,
            };
            continuation = page.continuation;
            if reached || continuation.is_none() {
                break;
            }
        }
        self.observer.finish();
        info!(
            "Discovered {} distinct changes in {} page(s) since {}",
            entries.len(),
            pages,
            watermark.to_rfc3339()
        );
        Ok(Discovery {
            entries,
            cursor: Cursor::new(now).with_token(continuation),
            pages,
        })
    }
}
