//! Shared option types that replace boolean flag parameters in the Rust API.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// RDF flavor requested from the entity document server.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RdfFlavor {
    /// Excludes descriptions of entities referred to in the data.
    Dump,
    /// Provides only truthy statements, along with sitelinks and version information.
    Simple,
    /// Returns all data.
    #[default]
    Full,
}

impl RdfFlavor {
    pub const ALL: [RdfFlavor; 3] = [RdfFlavor::Dump, RdfFlavor::Simple, RdfFlavor::Full];

    pub fn title(self) -> &'static str {
        deltafile::Flavor::from(self).name()
    }

    pub fn description(self) -> &'static str {
        match self {
            RdfFlavor::Dump => "Excludes descriptions of entities referred to in the data.",
            RdfFlavor::Simple => {
                "Provides only truthy statements, along with sitelinks and version information."
            }
            RdfFlavor::Full => "An argument of \"full\" returns all data.",
        }
    }

    /// The server's default flavor is never spelled out in URLs.
    pub fn should_specify(self) -> bool {
        !matches!(self, RdfFlavor::Full)
    }

    /// Query string to append to an entity document URL.
    pub fn url_suffix(self) -> String {
        if self.should_specify() {
            format!("?flavor={}", self.title())
        } else {
            String::new()
        }
    }
}

impl From<RdfFlavor> for deltafile::Flavor {
    fn from(value: RdfFlavor) -> Self {
        match value {
            RdfFlavor::Dump => deltafile::Flavor::Dump,
            RdfFlavor::Simple => deltafile::Flavor::Simple,
            RdfFlavor::Full => deltafile::Flavor::Full,
        }
    }
}

impl From<deltafile::Flavor> for RdfFlavor {
    fn from(value: deltafile::Flavor) -> Self {
        match value {
            deltafile::Flavor::Dump => RdfFlavor::Dump,
            deltafile::Flavor::Simple => RdfFlavor::Simple,
            deltafile::Flavor::Full => RdfFlavor::Full,
        }
    }
}

/// What a round does with the cursor when it finds fewer changes than the
/// configured minimum.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LowVolumePolicy {
    /// Keep the previous watermark; the changes are picked up by a later,
    /// larger round.
    #[default]
    Defer,
    /// Advance the watermark to the round start; the changes of the window
    /// are never applied.
    Skip,
}

impl LowVolumePolicy {
    pub fn advances_cursor(self) -> bool {
        matches!(self, LowVolumePolicy::Skip)
    }
}

/// Whether every downstream store access goes through one global lock.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum StoreAccess {
    /// Reads and commits run concurrently; the store orders transactions.
    #[default]
    Concurrent,
    /// One store operation at a time across all workers.
    Serialized,
}

impl StoreAccess {
    pub fn is_serialized(self) -> bool {
        matches!(self, StoreAccess::Serialized)
    }
}

impl From<bool> for StoreAccess {
    fn from(value: bool) -> Self {
        if value {
            StoreAccess::Serialized
        } else {
            StoreAccess::Concurrent
        }
    }
}

impl From<StoreAccess> for bool {
    fn from(value: StoreAccess) -> Self {
        value.is_serialized()
    }
}
