//! Keeps a SPARQL triple store in sync with the recent changes of a Wikibase
//! instance such as Wikidata.
//!
//! A round of the [`updater::Updater`] walks the change feed back to the last
//! watermark ([`changes`]), downloads every changed entity document
//! ([`fetch`]), reconciles it statement by statement against the store
//! ([`delta`], [`store`]) and applies the merged delta in bounded
//! transactions ([`apply`]) before persisting the new watermark
//! ([`cursor`]). The same discovery can instead be captured into a delta file
//! ([`snapshot`]) and later used to mark superseded triples ([`bitmap`]).

extern crate derive_builder;

pub mod apply;
pub mod bitmap;
pub mod changes;
pub mod config;
pub mod consts;
pub mod cursor;
pub mod delta;
pub mod errors;
pub mod fetch;
pub mod options;
pub mod pool;
pub mod progress;
pub mod snapshot;
pub mod store;
pub mod updater;

pub use changes::{ChangeEntry, ChangeFeed, ChangePage, ChangeWalker, Discovery, WikiApiFeed};
pub use config::{FetchConfig, UpdaterConfig};
pub use cursor::{Cursor, CursorStore};
pub use delta::{reconcile, Delta, DeltaBatch};
pub use errors::{RetryError, SyncError};
pub use fetch::{HttpPageSource, PageSource, RetryPolicy};
pub use options::{LowVolumePolicy, RdfFlavor, StoreAccess};
pub use store::{GraphStore, GraphTransaction, OxigraphStore, SparqlStore};
pub use updater::{RoundReport, Updater};

/// Initializes `env_logger`. An explicit level wins; otherwise `WDSYNC_LOG`
/// overrides `RUST_LOG`, and `warn` applies when neither is set.
pub fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => level.to_string(),
        None => std::env::var("WDSYNC_LOG")
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| "warn".to_string()),
    };
    let _ = env_logger::Builder::new()
        .parse_filters(&filter)
        .format_timestamp_millis()
        .try_init();
}
