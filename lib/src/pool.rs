//! Bounded, fail-fast worker pool over a slice of work items.
//!
//! Workers pull items from a shared index. The first failing item records its
//! error and raises the cancel flag; remaining workers stop picking up items
//! and in-flight retries give up at their next sleep.

use crate::errors::SyncError;
use crate::progress::ProgressObserver;
use anyhow::Result;
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Cooperative cancellation shared by all tasks of one batch.
#[derive(Debug, Default)]
pub struct Cancel {
    flag: AtomicBool,
}

impl Cancel {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration` unless cancelled first. Returns `false` when the
    /// sleep was cut short.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(CANCEL_POLL));
        }
    }
}

pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Clone, Copy)]
pub struct Pool {
    concurrency: usize,
}

impl Default for Pool {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Pool {
    /// `0` picks the number of available cores.
    pub fn new(concurrency: usize) -> Self {
        let concurrency = if concurrency == 0 {
            default_concurrency()
        } else {
            concurrency
        };
        Self { concurrency }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Runs `task` on every item and returns the results in item order, or
    /// [`SyncError::BatchAborted`] carrying the first failure.
    pub fn run<T, R, F>(
        &self,
        items: &[T],
        label: &str,
        observer: &dyn ProgressObserver,
        task: F,
    ) -> Result<Vec<R>>
    where
        T: Sync,
        R: Send,
        F: Fn(&T, &Cancel) -> Result<R> + Sync,
    {
        let total = items.len() as u64;
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let next = AtomicUsize::new(0);
        let completed = AtomicU64::new(0);
        let cancel = Cancel::default();
        let failure: Mutex<Option<(u64, anyhow::Error)>> = Mutex::new(None);
        let results: Mutex<Vec<Option<R>>> =
            Mutex::new(std::iter::repeat_with(|| None).take(items.len()).collect());

        let workers = self.concurrency.min(items.len()).max(1);
        debug!("{}: {} item(s) on {} worker(s)", label, items.len(), workers);
        std::thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(|| loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let i = next.fetch_add(1, Ordering::SeqCst);
                    if i >= items.len() {
                        break;
                    }
                    match task(&items[i], &cancel) {
                        Ok(r) => {
                            lock(&results)[i] = Some(r);
                            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                            observer.progress(done, total, label);
                        }
                        Err(e) => {
                            let mut slot = lock(&failure);
                            if slot.is_none() {
                                warn!("{}: aborting batch: {:#}", label, e);
                                *slot = Some((completed.load(Ordering::SeqCst), e));
                            }
                            cancel.cancel();
                            break;
                        }
                    }
                });
            }
        });
        observer.finish();

        let failure = failure.into_inner().unwrap_or_else(|e| e.into_inner());
        if let Some((completed, cause)) = failure {
            return Err(SyncError::BatchAborted {
                completed,
                total,
                cause,
            }
            .into());
        }
        let results = results.into_inner().unwrap_or_else(|e| e.into_inner());
        Ok(results.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use anyhow::anyhow;

    #[test]
    fn results_keep_item_order() {
        let items: Vec<u32> = (0..100).collect();
        let out = Pool::new(8)
            .run(&items, "square", &NoProgress, |i, _| Ok(i * i))
            .unwrap();
        assert_eq!(out, items.iter().map(|i| i * i).collect::<Vec<_>>());
    }

    #[test]
    fn first_failure_aborts_the_batch() {
        let items: Vec<u32> = (0..1000).collect();
        let started = AtomicU64::new(0);
        let err = Pool::new(2)
            .run(&items, "fail", &NoProgress, |i, _| {
                started.fetch_add(1, Ordering::SeqCst);
                if *i == 3 {
                    Err(anyhow!("boom"))
                } else {
                    Ok(())
                }
            })
            .unwrap_err();
        match err.downcast_ref::<SyncError>() {
            Some(SyncError::BatchAborted {
                completed, total, ..
            }) => {
                assert_eq!(*total, 1000);
                assert!(*completed < 1000);
            }
            other => panic!("unexpected error {:?}", other),
        }
        // no new items are picked up once cancelled
        assert!(started.load(Ordering::SeqCst) < 1000);
        assert!(format!("{}", err).contains("boom"));
    }

    #[test]
    fn cancelled_sleep_returns_early() {
        let cancel = Cancel::default();
        cancel.cancel();
        let start = Instant::now();
        assert!(!cancel.sleep(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(Cancel::default().sleep(Duration::from_millis(1)));
    }
}
