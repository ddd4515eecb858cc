//! The synchronization loop.
//!
//! A round walks the change feed back to the watermark, downloads and
//! reconciles every changed entity concurrently, applies the merged delta and
//! only then persists the new watermark. Any failure leaves the cursor where
//! it was, so the next round covers the same window again; re-applying a
//! delta that was partially committed is harmless since additions and
//! removals are idempotent.

use crate::apply::BatchApplier;
use crate::changes::{ChangeEntry, ChangeFeed, ChangeWalker};
use crate::config::UpdaterConfig;
use crate::cursor::{Cursor, CursorStore};
use crate::delta::{parse_entity_document, reconcile, Delta, DeltaBatch};
use crate::errors::SyncError;
use crate::fetch::{EntityFetcher, PageSource};
use crate::pool::Cancel;
use crate::progress::ProgressObserver;
use crate::store::{GraphStore, StoreGate};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundReport {
    /// Distinct entities found in the feed.
    pub discovered: usize,
    pub added: usize,
    pub removed: usize,
    /// Statements written to the store.
    pub applied: u64,
    /// Too few changes; nothing was fetched or applied.
    pub skipped: bool,
    /// Watermark after the round.
    pub watermark: DateTime<Utc>,
}

pub struct Updater<'a> {
    config: &'a UpdaterConfig,
    feed: &'a dyn ChangeFeed,
    source: &'a dyn PageSource,
    store: &'a dyn GraphStore,
    cursors: &'a CursorStore,
    observer: &'a dyn ProgressObserver,
    gate: StoreGate,
}

impl<'a> Updater<'a> {
    pub fn new(
        config: &'a UpdaterConfig,
        feed: &'a dyn ChangeFeed,
        source: &'a dyn PageSource,
        store: &'a dyn GraphStore,
        cursors: &'a CursorStore,
        observer: &'a dyn ProgressObserver,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            feed,
            source,
            store,
            cursors,
            observer,
            gate: StoreGate::new(config.store_access()),
        })
    }

    /// Computes the delta of one entity. A document that no longer exists
    /// removes everything the store holds for it.
    fn entity_delta(
        &self,
        fetcher: &EntityFetcher,
        entry: &ChangeEntry,
        cancel: &Cancel,
    ) -> Result<Delta> {
        let document = fetcher.fetch_one(entry, cancel)?;
        let fresh = match &document {
            Some(bytes) => {
                let base = format!("{}{}", self.config.fetch.server, entry.id);
                Some(parse_entity_document(bytes, &base)?)
            }
            None => None,
        };
        let current = self
            .gate
            .run(|| self.store.current_statements(&entry.id))?;
        let delta = match fresh {
            Some(fresh) => reconcile(current, fresh, self.config.epsilon),
            None => {
                debug!("{} is gone, removing {} statement(s)", entry.id, current.len());
                Delta {
                    to_add: HashSet::new(),
                    to_remove: current,
                }
            }
        };
        Ok(delta)
    }

    pub fn run_round(&self, cursor: &Cursor) -> Result<(RoundReport, Cursor)> {
        self.run_round_at(cursor, Utc::now())
    }

    /// Runs one round as if started at `now`. Returns the report and the
    /// cursor the next round starts from.
    pub fn run_round_at(
        &self,
        cursor: &Cursor,
        now: DateTime<Utc>,
    ) -> Result<(RoundReport, Cursor)> {
        let walker = ChangeWalker::new(self.feed, self.observer);
        let discovery = walker.discover_at(cursor, self.config.page_size, now)?;
        let entities = discovery.entities();

        if entities.len() < self.config.min_changes {
            info!(
                "Only {} change(s), below the minimum of {}",
                entities.len(),
                self.config.min_changes
            );
            let next = if self.config.low_volume.advances_cursor() {
                self.cursors.persist(&discovery.cursor)?;
                discovery.cursor.clone()
            } else {
                cursor.clone()
            };
            let report = RoundReport {
                discovered: entities.len(),
                added: 0,
                removed: 0,
                applied: 0,
                skipped: true,
                watermark: next.watermark,
            };
            return Ok((report, next));
        }

        let fetcher = EntityFetcher::new(self.source, &self.config.fetch)?;
        let deltas = fetcher
            .pool()
            .run(&entities, "reconcile", self.observer, |entry, cancel| {
                self.entity_delta(&fetcher, entry, cancel)
                    .with_context(|| format!("Can't update {}", entry.id))
            })?;
        let mut batch: DeltaBatch = deltas.into_iter().collect();
        let added = batch.to_add.len();
        let removed = batch.to_remove.len();
        info!(
            "{} entities changed: {} statement(s) to add, {} to remove",
            entities.len(),
            added,
            removed
        );

        let applied = BatchApplier::new(
            self.store,
            &self.gate,
            self.config.max_statements_per_tx,
            self.observer,
        )
        .apply(&mut batch)?;

        self.cursors.persist(&discovery.cursor)?;
        let report = RoundReport {
            discovered: entities.len(),
            added,
            removed,
            applied,
            skipped: false,
            watermark: discovery.cursor.watermark,
        };
        Ok((report, discovery.cursor))
    }

    /// Runs rounds until `max_rounds` is reached (forever when `None`),
    /// sleeping between them. A failed round stops the loop unless
    /// `retry_failed_rounds` is set, in which case it is logged and retried
    /// from the same cursor; configuration errors and a future watermark
    /// always stop it.
    pub fn run(&self, initial: Cursor, max_rounds: Option<u64>) -> Result<Cursor> {
        let mut cursor = initial;
        let mut round = 0u64;
        loop {
            round += 1;
            info!("Round {} from {}", round, cursor.watermark.to_rfc3339());
            match self.run_round(&cursor) {
                Ok((report, next)) => {
                    if report.skipped {
                        info!("Round {} skipped", round);
                    } else {
                        info!(
                            "Round {} applied {} statement(s), watermark now {}",
                            round,
                            report.applied,
                            report.watermark.to_rfc3339()
                        );
                    }
                    cursor = next;
                }
                Err(e) => {
                    let fatal = matches!(
                        e.downcast_ref::<SyncError>(),
                        Some(SyncError::Config(_) | SyncError::FutureWatermark { .. })
                    );
                    if fatal || !self.config.retry_failed_rounds {
                        return Err(e.context(format!(
                            "Round {} failed, watermark stays at {}",
                            round,
                            cursor.watermark.to_rfc3339()
                        )));
                    }
                    error!("Round {} failed: {:#}", round, e);
                    warn!("Keeping watermark {}", cursor.watermark.to_rfc3339());
                }
            }
            if max_rounds.is_some_and(|max| round >= max) {
                return Ok(cursor);
            }
            std::thread::sleep(self.config.round_interval());
        }
    }
}
