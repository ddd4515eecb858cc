//! Writes a [`DeltaBatch`] to the store in bounded transactions: all removals
//! first, then all additions, at most `max_per_tx` statements per commit.

use crate::delta::DeltaBatch;
use crate::errors::SyncError;
use crate::progress::ProgressObserver;
use crate::store::{GraphStore, StoreGate};
use anyhow::{Context, Result};
use log::{debug, info};
use oxigraph::model::Triple;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Remove,
    Add,
}

pub struct BatchApplier<'a> {
    store: &'a dyn GraphStore,
    gate: &'a StoreGate,
    max_per_tx: usize,
    observer: &'a dyn ProgressObserver,
}

impl<'a> BatchApplier<'a> {
    pub fn new(
        store: &'a dyn GraphStore,
        gate: &'a StoreGate,
        max_per_tx: usize,
        observer: &'a dyn ProgressObserver,
    ) -> Self {
        Self {
            store,
            gate,
            max_per_tx,
            observer,
        }
    }

    /// Applies and clears the batch; returns the number of statements
    /// written. A failed chunk stops the batch and leaves it untouched so the
    /// caller keeps its watermark; chunks committed before stay committed.
    pub fn apply(&self, batch: &mut DeltaBatch) -> Result<u64> {
        if self.max_per_tx == 0 {
            return Err(SyncError::config("max statements per transaction must be positive").into());
        }
        let removals: Vec<Triple> = batch.to_remove.iter().cloned().collect();
        let additions: Vec<Triple> = batch.to_add.iter().cloned().collect();
        let total = (removals.len() + additions.len()) as u64;
        let mut done = 0u64;
        info!(
            "Applying {} removal(s) and {} addition(s)",
            removals.len(),
            additions.len()
        );
        for (op, statements) in [(Operation::Remove, &removals), (Operation::Add, &additions)] {
            for (n, chunk) in statements.chunks(self.max_per_tx).enumerate() {
                self.commit_chunk(op, chunk).with_context(|| {
                    format!(
                        "{:?} chunk {} ({} statements) failed after {}/{} statements",
                        op,
                        n + 1,
                        chunk.len(),
                        done,
                        total
                    )
                })?;
                done += chunk.len() as u64;
                debug!("{:?} chunk {} committed", op, n + 1);
                self.observer.progress(done, total, "update");
            }
        }
        self.observer.finish();
        batch.clear();
        Ok(done)
    }

    fn commit_chunk(&self, op: Operation, chunk: &[Triple]) -> Result<()> {
        self.gate.run(|| {
            let mut tx = self.store.begin()?;
            match op {
                Operation::Remove => tx.delete_data(chunk)?,
                Operation::Add => tx.insert_data(chunk)?,
            }
            tx.commit()
        })
    }
}
