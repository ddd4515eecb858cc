// Typed failures; callers receive them wrapped in anyhow::Error and can downcast.

use chrono::{DateTime, Utc};
use std::fmt;

#[derive(Debug)]
pub enum SyncError {
    /// Missing or invalid configuration; nothing was attempted.
    Config(String),
    /// The watermark is not in the past, so there is nothing to walk back to.
    FutureWatermark {
        watermark: DateTime<Utc>,
        now: DateTime<Utc>,
    },
    /// A batch stopped at its first unrecoverable item.
    BatchAborted {
        completed: u64,
        total: u64,
        cause: anyhow::Error,
    },
}

impl SyncError {
    pub fn config(message: impl Into<String>) -> Self {
        SyncError::Config(message.into())
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SyncError::Config(m) => write!(f, "configuration error: {}", m),
            SyncError::FutureWatermark { watermark, now } => write!(
                f,
                "watermark {} is not before the current time {}",
                watermark.to_rfc3339(),
                now.to_rfc3339()
            ),
            SyncError::BatchAborted {
                completed,
                total,
                cause,
            } => {
                let percentage = if *total == 0 {
                    100
                } else {
                    completed * 100 / total
                };
                write!(
                    f,
                    "batch aborted after {}/{} items ({}%): {:#}",
                    completed, total, percentage, cause
                )
            }
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::BatchAborted { cause, .. } => Some(&**cause),
            _ => None,
        }
    }
}

/// Returned by the retry helper once its attempts are exhausted or the
/// surrounding batch was cancelled.
#[derive(Debug)]
pub struct RetryError {
    pub attempts: u32,
    pub cancelled: bool,
    pub cause: anyhow::Error,
}

impl fmt::Display for RetryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.cancelled {
            write!(
                f,
                "cancelled after {} attempt(s), last cause: {:#}",
                self.attempts, self.cause
            )
        } else {
            write!(
                f,
                "failed after {} attempt(s): {:#}",
                self.attempts, self.cause
            )
        }
    }
}

impl std::error::Error for RetryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.cause)
    }
}
