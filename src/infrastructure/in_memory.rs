use super::{InvoiceLocks, PendingWrite, check_event_uniqueness};
use crate::domain::customer::Customer;
use crate::domain::invoice::Invoice;
use crate::domain::ports::{BillingStore, CustomerStore, UnitOfWork, UnitOfWorkBox};
use crate::domain::transaction::{
    Transaction, TransactionEvent, TransactionFailure, sort_newest_first,
};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OwnedMutexGuard, RwLock};

/// A thread-safe in-memory store for customers.
#[derive(Default, Clone)]
pub struct InMemoryCustomerStore {
    customers: Arc<RwLock<HashMap<String, Customer>>>,
}

impl InMemoryCustomerStore {
    /// Creates a new, empty in-memory customer store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CustomerStore for InMemoryCustomerStore {
    async fn store(&self, customer: Customer) -> Result<()> {
        let mut customers = self.customers.write().await;
        customers.insert(customer.id.clone(), customer);
        Ok(())
    }

    async fn get(&self, customer_id: &str) -> Result<Option<Customer>> {
        let customers = self.customers.read().await;
        Ok(customers.get(customer_id).cloned())
    }
}

#[derive(Default)]
struct State {
    invoices: HashMap<String, Invoice>,
    invoice_order: Vec<String>,
    transactions: HashMap<String, Transaction>,
    transaction_order: Vec<String>,
    by_invoice: HashMap<String, Vec<String>>,
    references: HashMap<String, Vec<String>>,
    events: HashMap<String, Vec<TransactionEvent>>,
    failures: HashMap<String, Vec<TransactionFailure>>,
}

impl State {
    fn has_event(&self, transaction_id: &str, processor_id: &str) -> bool {
        self.events
            .get(transaction_id)
            .is_some_and(|events| events.iter().any(|e| e.processor_id == processor_id))
    }

    fn transactions_of(&self, invoice_id: &str) -> Vec<Transaction> {
        self.by_invoice
            .get(invoice_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.transactions.get(id).cloned())
            .collect()
    }

    fn apply(&mut self, write: PendingWrite) {
        match write {
            PendingWrite::Invoice(invoice) => {
                if !self.invoices.contains_key(&invoice.id) {
                    self.invoice_order.push(invoice.id.clone());
                }
                self.invoices.insert(invoice.id.clone(), invoice);
            }
            PendingWrite::Transaction(tx) => {
                if !self.transactions.contains_key(&tx.id) {
                    self.transaction_order.push(tx.id.clone());
                    self.by_invoice
                        .entry(tx.invoice_id.clone())
                        .or_default()
                        .push(tx.id.clone());
                    if let Some(target) = &tx.reference_to {
                        self.references
                            .entry(target.clone())
                            .or_default()
                            .push(tx.id.clone());
                    }
                }
                self.transactions.insert(tx.id.clone(), tx);
            }
            PendingWrite::Event(event) => {
                self.events
                    .entry(event.transaction_id.clone())
                    .or_default()
                    .push(event);
            }
            PendingWrite::Failure(failure) => {
                self.failures
                    .entry(failure.transaction_id.clone())
                    .or_default()
                    .push(failure);
            }
        }
    }
}

/// A thread-safe in-memory billing store.
///
/// Committed state lives behind one `RwLock`; each invoice additionally has
/// its own mutex which a [`UnitOfWork`] holds for its whole lifetime. This
/// gives the same serialization per invoice that a database would give with
/// `SELECT ... FOR UPDATE` on the invoice row.
#[derive(Default, Clone)]
pub struct InMemoryBillingStore {
    state: Arc<RwLock<State>>,
    locks: InvoiceLocks,
}

impl InMemoryBillingStore {
    /// Creates a new, empty in-memory billing store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BillingStore for InMemoryBillingStore {
    async fn begin(&self, scope: &str) -> Result<UnitOfWorkBox> {
        let guard = self.locks.lock(scope).await;
        Ok(Box::new(InMemoryUnitOfWork {
            state: self.state.clone(),
            writes: Vec::new(),
            _guard: guard,
        }))
    }

    async fn get_invoice(&self, invoice_id: &str) -> Result<Option<Invoice>> {
        let state = self.state.read().await;
        Ok(state.invoices.get(invoice_id).cloned())
    }

    async fn list_invoices(&self) -> Result<Vec<Invoice>> {
        let state = self.state.read().await;
        Ok(state
            .invoice_order
            .iter()
            .filter_map(|id| state.invoices.get(id).cloned())
            .collect())
    }

    async fn get_transaction(&self, transaction_id: &str) -> Result<Option<Transaction>> {
        let state = self.state.read().await;
        Ok(state.transactions.get(transaction_id).cloned())
    }

    async fn list_transactions(&self, invoice_id: &str) -> Result<Vec<Transaction>> {
        let state = self.state.read().await;
        Ok(state.transactions_of(invoice_id))
    }

    async fn referencing_transactions(&self, transaction_id: &str) -> Result<Vec<Transaction>> {
        let state = self.state.read().await;
        Ok(state
            .references
            .get(transaction_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.transactions.get(id).cloned())
            .collect())
    }

    async fn list_events(&self, transaction_id: &str) -> Result<Vec<TransactionEvent>> {
        let state = self.state.read().await;
        let mut events = state.events.get(transaction_id).cloned().unwrap_or_default();
        sort_newest_first(&mut events);
        Ok(events)
    }

    async fn list_failures(&self, transaction_id: &str) -> Result<Vec<TransactionFailure>> {
        let state = self.state.read().await;
        Ok(state
            .failures
            .get(transaction_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_outbox(&self) -> Result<Vec<Transaction>> {
        let state = self.state.read().await;
        Ok(state
            .transaction_order
            .iter()
            .filter_map(|id| state.transactions.get(id))
            .filter(|tx| tx.is_outstanding())
            .cloned()
            .collect())
    }
}

struct InMemoryUnitOfWork {
    state: Arc<RwLock<State>>,
    writes: Vec<PendingWrite>,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn get_invoice(&mut self, invoice_id: &str) -> Result<Option<Invoice>> {
        let state = self.state.read().await;
        Ok(state.invoices.get(invoice_id).cloned())
    }

    async fn get_transaction(&mut self, transaction_id: &str) -> Result<Option<Transaction>> {
        let state = self.state.read().await;
        Ok(state.transactions.get(transaction_id).cloned())
    }

    async fn list_transactions(&mut self, invoice_id: &str) -> Result<Vec<Transaction>> {
        let state = self.state.read().await;
        Ok(state.transactions_of(invoice_id))
    }

    async fn has_event(&mut self, transaction_id: &str, processor_id: &str) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state.has_event(transaction_id, processor_id))
    }

    async fn latest_event(&mut self, transaction_id: &str) -> Result<Option<TransactionEvent>> {
        let state = self.state.read().await;
        Ok(state
            .events
            .get(transaction_id)
            .and_then(|events| events.iter().max_by(|a, b| a.chronological(b)))
            .cloned())
    }

    async fn list_failures(&mut self, transaction_id: &str) -> Result<Vec<TransactionFailure>> {
        let state = self.state.read().await;
        Ok(state
            .failures
            .get(transaction_id)
            .cloned()
            .unwrap_or_default())
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
        let mut state = this.state.write().await;
        check_event_uniqueness(&this.writes, |tx, event| Ok(state.has_event(tx, event)))?;
        for write in this.writes {
            state.apply(write);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::invoice::NewInvoice;
    use crate::domain::transaction::{NewTransaction, SettlementStatus, TransactionType};
    use crate::error::BillingError;
    use chrono::Utc;
    use std::time::Duration;

    fn invoice_with_debit() -> (Invoice, Transaction) {
        let customer = Customer::new("CP1");
        let invoice = Invoice::create(&customer, NewInvoice::new(1000)).unwrap();
        let debit =
            Transaction::create(&invoice, NewTransaction::new(TransactionType::Debit, 1000))
                .unwrap();
        (invoice, debit)
    }

    #[tokio::test]
    async fn test_in_memory_customer_store() {
        let store = InMemoryCustomerStore::new();
        let customer = Customer::new("CP1");

        store.store(customer.clone()).await.unwrap();
        let retrieved = store.get(&customer.id).await.unwrap().unwrap();
        assert_eq!(retrieved, customer);

        assert!(store.get("CU_NON_EXIST").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_applies_all_writes() {
        let store = InMemoryBillingStore::new();
        let (invoice, debit) = invoice_with_debit();

        let mut unit = store.begin(&invoice.id).await.unwrap();
        unit.put_invoice(invoice.clone());
        unit.put_transaction(debit.clone());
        unit.commit().await.unwrap();

        assert_eq!(store.get_invoice(&invoice.id).await.unwrap(), Some(invoice.clone()));
        assert_eq!(store.list_transactions(&invoice.id).await.unwrap(), vec![debit.clone()]);
        assert_eq!(store.list_outbox().await.unwrap(), vec![debit]);
    }

    #[tokio::test]
    async fn test_dropped_unit_rolls_back() {
        let store = InMemoryBillingStore::new();
        let (invoice, debit) = invoice_with_debit();

        {
            let mut unit = store.begin(&invoice.id).await.unwrap();
            unit.put_invoice(invoice.clone());
            unit.put_transaction(debit);
        }

        assert!(store.get_invoice(&invoice.id).await.unwrap().is_none());
        assert!(store.list_transactions(&invoice.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_event_conflicts_and_applies_nothing() {
        let store = InMemoryBillingStore::new();
        let (invoice, debit) = invoice_with_debit();
        let event = TransactionEvent::new(&debit.id, "EV1", SettlementStatus::Succeeded, Utc::now());

        let mut unit = store.begin(&invoice.id).await.unwrap();
        unit.put_transaction(debit.clone());
        unit.add_event(event.clone());
        unit.commit().await.unwrap();

        let mut updated = debit.clone();
        updated.settle(SettlementStatus::Succeeded, Utc::now());
        let mut unit = store.begin(&invoice.id).await.unwrap();
        unit.put_transaction(updated);
        unit.add_event(TransactionEvent::new(&debit.id, "EV1", SettlementStatus::Succeeded, Utc::now()));
        let result = unit.commit().await;

        assert!(matches!(result, Err(BillingError::Conflict(_))));
        assert_eq!(store.list_events(&debit.id).await.unwrap(), vec![event]);
        assert_eq!(store.get_transaction(&debit.id).await.unwrap().unwrap().status, None);
    }

    #[tokio::test]
    async fn test_reference_index() {
        let store = InMemoryBillingStore::new();
        let (invoice, debit) = invoice_with_debit();
        let refund = Transaction::create(
            &invoice,
            NewTransaction::new(TransactionType::Refund, 100).reference_to(&debit),
        )
        .unwrap();

        let mut unit = store.begin(&invoice.id).await.unwrap();
        unit.put_transaction(debit.clone());
        unit.put_transaction(refund.clone());
        unit.commit().await.unwrap();

        assert_eq!(
            store.referencing_transactions(&debit.id).await.unwrap(),
            vec![refund]
        );
        assert!(store.referencing_transactions("TX_NONE").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_units_on_same_invoice_are_serialized() {
        let store = InMemoryBillingStore::new();
        let first = store.begin("IV1").await.unwrap();

        let contender = store.clone();
        let handle = tokio::spawn(async move { contender.begin("IV1").await.map(|_| ()) });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        // a different invoice is not blocked
        let other = store.begin("IV2").await.unwrap();
        drop(other);

        drop(first);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_finished_units_release_their_lock_entry() {
        let store = InMemoryBillingStore::new();
        drop(store.begin("IV_NON_EXIST").await.unwrap());
        let held = store.begin("IV1").await.unwrap();

        assert_eq!(store.locks.len().await, 1);
        drop(held);
    }

    #[tokio::test]
    async fn test_require_missing_records_is_not_found() {
        let store = InMemoryBillingStore::new();

        assert!(matches!(
            store.require_invoice("IV_NONE").await,
            Err(BillingError::NotFound { .. })
        ));
        assert!(matches!(
            store.require_transaction("TX_NONE").await,
            Err(BillingError::NotFound { .. })
        ));

        let (invoice, debit) = invoice_with_debit();
        let mut unit = store.begin(&invoice.id).await.unwrap();
        assert!(matches!(
            unit.require_invoice(&invoice.id).await,
            Err(BillingError::NotFound { .. })
        ));
        unit.put_invoice(invoice.clone());
        unit.put_transaction(debit.clone());
        unit.commit().await.unwrap();

        assert_eq!(store.require_invoice(&invoice.id).await.unwrap(), invoice);
        assert_eq!(store.require_transaction(&debit.id).await.unwrap(), debit);
    }
}
