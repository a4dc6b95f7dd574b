//! Adapters implementing the domain ports.

pub mod dummy_processor;
pub mod in_memory;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;

use crate::domain::invoice::Invoice;
use crate::domain::transaction::{Transaction, TransactionEvent, TransactionFailure};
use crate::error::{BillingError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-invoice mutexes shared by the clones of one store.
///
/// An entry only lives while a guard or a waiter references it; idle entries
/// are dropped the next time any invoice is locked.
#[derive(Default, Clone)]
pub(crate) struct InvoiceLocks {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl InvoiceLocks {
    pub(crate) async fn lock(&self, invoice_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(invoice_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}

/// A write buffered by a unit of work until commit.
#[derive(Debug, Clone)]
pub(crate) enum PendingWrite {
    Invoice(Invoice),
    Transaction(Transaction),
    Event(TransactionEvent),
    Failure(TransactionFailure),
}

/// Rejects a batch that records the same processor event twice, or one that
/// is already stored according to `exists`.
pub(crate) fn check_event_uniqueness(
    writes: &[PendingWrite],
    mut exists: impl FnMut(&str, &str) -> Result<bool>,
) -> Result<()> {
    let mut seen = HashSet::new();
    for write in writes {
        if let PendingWrite::Event(event) = write {
            let key = (event.transaction_id.as_str(), event.processor_id.as_str());
            if !seen.insert(key) || exists(key.0, key.1)? {
                return Err(BillingError::Conflict(format!(
                    "event {} already recorded for transaction {}",
                    event.processor_id, event.transaction_id
                )));
            }
        }
    }
    Ok(())
}
