use super::{InvoiceLocks, PendingWrite, check_event_uniqueness};
use crate::domain::customer::Customer;
use crate::domain::invoice::Invoice;
use crate::domain::ports::{BillingStore, CustomerStore, UnitOfWork, UnitOfWorkBox};
use crate::domain::transaction::{
    Transaction, TransactionEvent, TransactionFailure, sort_newest_first,
};
use crate::error::{BillingError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

pub const CF_CUSTOMERS: &str = "customers";
pub const CF_INVOICES: &str = "invoices";
pub const CF_TRANSACTIONS: &str = "transactions";
/// Invoice id to the ids of its transactions, in creation order.
pub const CF_INVOICE_INDEX: &str = "invoice_index";
/// Transaction id to the ids of the refunds and reversals pointing at it.
pub const CF_REFERENCES: &str = "references";
/// Transaction id to its events.
pub const CF_EVENTS: &str = "events";
/// Transaction id to its failures, oldest first.
pub const CF_FAILURES: &str = "failures";

const COLUMN_FAMILIES: [&str; 7] = [
    CF_CUSTOMERS,
    CF_INVOICES,
    CF_TRANSACTIONS,
    CF_INVOICE_INDEX,
    CF_REFERENCES,
    CF_EVENTS,
    CF_FAILURES,
];

/// A persistent store implementation using RocksDB.
///
/// Entities are stored as JSON keyed by id, one column family per kind.
/// Secondary indexes and per-transaction histories are JSON arrays that a
/// unit of work rewrites under the invoice lock, so a commit lands as a
/// single atomic `WriteBatch`.
///
/// `Clone` shares the underlying `Arc<DB>` and lock table.
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    locks: InvoiceLocks,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at `path` with every column family
    /// the store needs.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()));
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            locks: InvoiceLocks::default(),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            BillingError::InternalError(Box::new(std::io::Error::other(format!(
                "{} column family not found",
                name
            ))))
        })
    }

    fn get_json<T: DeserializeOwned>(&self, cf: &str, key: &str) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn get_list<T: DeserializeOwned>(&self, cf: &str, key: &str) -> Result<Vec<T>> {
        Ok(self.get_json(cf, key)?.unwrap_or_default())
    }

    fn scan<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>> {
        let mut values = Vec::new();
        for item in self.db.iterator_cf(self.cf(cf)?, IteratorMode::Start) {
            let (_key, value) = item?;
            values.push(serde_json::from_slice(&value)?);
        }
        Ok(values)
    }

    fn transactions_of(&self, invoice_id: &str) -> Result<Vec<Transaction>> {
        self.transactions_by_id(self.get_list(CF_INVOICE_INDEX, invoice_id)?)
    }

    fn transactions_by_id(&self, ids: Vec<String>) -> Result<Vec<Transaction>> {
        let mut transactions = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(tx) = self.get_json(CF_TRANSACTIONS, &id)? {
                transactions.push(tx);
            }
        }
        Ok(transactions)
    }

    fn has_event(&self, transaction_id: &str, processor_id: &str) -> Result<bool> {
        let events: Vec<TransactionEvent> = self.get_list(CF_EVENTS, transaction_id)?;
        Ok(events.iter().any(|e| e.processor_id == processor_id))
    }
}

#[async_trait]
impl CustomerStore for RocksDBStore {
    async fn store(&self, customer: Customer) -> Result<()> {
        let value = serde_json::to_vec(&customer)?;
        self.db.put_cf(self.cf(CF_CUSTOMERS)?, &customer.id, value)?;
        Ok(())
    }

    async fn get(&self, customer_id: &str) -> Result<Option<Customer>> {
        self.get_json(CF_CUSTOMERS, customer_id)
    }
}

#[async_trait]
impl BillingStore for RocksDBStore {
    async fn begin(&self, scope: &str) -> Result<UnitOfWorkBox> {
        let guard = self.locks.lock(scope).await;
        Ok(Box::new(RocksDBUnitOfWork {
            store: self.clone(),
            writes: Vec::new(),
            _guard: guard,
        }))
    }

    async fn get_invoice(&self, invoice_id: &str) -> Result<Option<Invoice>> {
        self.get_json(CF_INVOICES, invoice_id)
    }

    async fn list_invoices(&self) -> Result<Vec<Invoice>> {
        let mut invoices: Vec<Invoice> = self.scan(CF_INVOICES)?;
        invoices.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(invoices)
    }

    async fn get_transaction(&self, transaction_id: &str) -> Result<Option<Transaction>> {
        self.get_json(CF_TRANSACTIONS, transaction_id)
    }

    async fn list_transactions(&self, invoice_id: &str) -> Result<Vec<Transaction>> {
        self.transactions_of(invoice_id)
    }

    async fn referencing_transactions(&self, transaction_id: &str) -> Result<Vec<Transaction>> {
        self.transactions_by_id(self.get_list(CF_REFERENCES, transaction_id)?)
    }

    async fn list_events(&self, transaction_id: &str) -> Result<Vec<TransactionEvent>> {
        let mut events = self.get_list(CF_EVENTS, transaction_id)?;
        sort_newest_first(&mut events);
        Ok(events)
    }

    async fn list_failures(&self, transaction_id: &str) -> Result<Vec<TransactionFailure>> {
        self.get_list(CF_FAILURES, transaction_id)
    }

    async fn list_outbox(&self) -> Result<Vec<Transaction>> {
        let mut outbox: Vec<Transaction> = self
            .scan::<Transaction>(CF_TRANSACTIONS)?
            .into_iter()
            .filter(Transaction::is_outstanding)
            .collect();
        outbox.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(outbox)
    }
}

/// List-valued keys touched by one commit, loaded once and written back once.
#[derive(Default)]
struct ListUpdates {
    lists: HashMap<(&'static str, String), serde_json::Value>,
}

impl ListUpdates {
    fn push<T: Serialize + DeserializeOwned>(
        &mut self,
        store: &RocksDBStore,
        cf: &'static str,
        key: &str,
        item: T,
    ) -> Result<()> {
        let slot = (cf, key.to_string());
        let mut list: Vec<T> = match self.lists.remove(&slot) {
            Some(value) => serde_json::from_value(value)?,
            None => store.get_list(cf, key)?,
        };
        list.push(item);
        self.lists.insert(slot, serde_json::to_value(list)?);
        Ok(())
    }
}

struct RocksDBUnitOfWork {
    store: RocksDBStore,
    writes: Vec<PendingWrite>,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl UnitOfWork for RocksDBUnitOfWork {
    async fn get_invoice(&mut self, invoice_id: &str) -> Result<Option<Invoice>> {
        self.store.get_json(CF_INVOICES, invoice_id)
    }

    async fn get_transaction(&mut self, transaction_id: &str) -> Result<Option<Transaction>> {
        self.store.get_json(CF_TRANSACTIONS, transaction_id)
    }

    async fn list_transactions(&mut self, invoice_id: &str) -> Result<Vec<Transaction>> {
        self.store.transactions_of(invoice_id)
    }

    async fn has_event(&mut self, transaction_id: &str, processor_id: &str) -> Result<bool> {
        self.store.has_event(transaction_id, processor_id)
    }

    async fn latest_event(&mut self, transaction_id: &str) -> Result<Option<TransactionEvent>> {
        let events: Vec<TransactionEvent> = self.store.get_list(CF_EVENTS, transaction_id)?;
        Ok(events.into_iter().max_by(|a, b| a.chronological(b)))
    }

    async fn list_failures(&mut self, transaction_id: &str) -> Result<Vec<TransactionFailure>> {
        self.store.get_list(CF_FAILURES, transaction_id)
    }

    fn put_invoice(&mut self, invoice: Invoice) {
        self.writes.push(PendingWrite::Invoice(invoice));
    }

    fn put_transaction(&mut self, transaction: Transaction) {
        self.writes.push(PendingWrite::Transaction(transaction));
    }

    fn add_event(&mut self, event: TransactionEvent) {
        self.writes.push(PendingWrite::Event(event));
    }

    fn add_failure(&mut self, failure: TransactionFailure) {
        self.writes.push(PendingWrite::Failure(failure));
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        let store = &this.store;
        check_event_uniqueness(&this.writes, |tx, event| store.has_event(tx, event))?;

        let mut batch = WriteBatch::default();
        let mut lists = ListUpdates::default();
        for write in &this.writes {
            match write {
                PendingWrite::Invoice(invoice) => {
                    batch.put_cf(store.cf(CF_INVOICES)?, &invoice.id, serde_json::to_vec(invoice)?);
                }
                PendingWrite::Transaction(tx) => {
                    let is_new = store.db.get_pinned_cf(store.cf(CF_TRANSACTIONS)?, &tx.id)?.is_none();
                    if is_new {
                        lists.push(store, CF_INVOICE_INDEX, &tx.invoice_id, tx.id.clone())?;
                        if let Some(target) = &tx.reference_to {
                            lists.push(store, CF_REFERENCES, target, tx.id.clone())?;
                        }
                    }
                    batch.put_cf(store.cf(CF_TRANSACTIONS)?, &tx.id, serde_json::to_vec(tx)?);
                }
                PendingWrite::Event(event) => {
                    lists.push(store, CF_EVENTS, &event.transaction_id, event.clone())?;
                }
                PendingWrite::Failure(failure) => {
                    lists.push(store, CF_FAILURES, &failure.transaction_id, failure.clone())?;
                }
            }
        }
        for ((cf, key), value) in lists.lists {
            batch.put_cf(store.cf(cf)?, key, serde_json::to_vec(&value)?);
        }

        store.db.write(batch)?;
        Ok(())
    }
}
