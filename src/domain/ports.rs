use super::amount::Amount;
use super::customer::Customer;
use super::invoice::Invoice;
use super::transaction::{Transaction, TransactionEvent, TransactionFailure, TransactionType};
use crate::error::{BillingError, ProcessorError, Result};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait CustomerStore: Send + Sync {
    async fn store(&self, customer: Customer) -> Result<()>;
    async fn get(&self, customer_id: &str) -> Result<Option<Customer>>;
}

/// Durable storage for invoices and their transactions.
///
/// All mutations go through a [`UnitOfWork`]. The plain getters read committed
/// state and take no locks.
#[async_trait]
pub trait BillingStore: Send + Sync {
    /// Opens an atomic unit of work holding the lock on invoice `scope`.
    ///
    /// The lock is held until the unit is committed or dropped, so two units
    /// for the same invoice never interleave. Units for different invoices
    /// proceed independently.
    async fn begin(&self, scope: &str) -> Result<UnitOfWorkBox>;

    async fn get_invoice(&self, invoice_id: &str) -> Result<Option<Invoice>>;
    /// Invoices in creation order.
    async fn list_invoices(&self) -> Result<Vec<Invoice>>;
    async fn get_transaction(&self, transaction_id: &str) -> Result<Option<Transaction>>;
    /// Transactions of an invoice in creation order.
    async fn list_transactions(&self, invoice_id: &str) -> Result<Vec<Transaction>>;
    /// Refunds and reversals pointing at `transaction_id`.
    async fn referencing_transactions(&self, transaction_id: &str) -> Result<Vec<Transaction>>;
    /// Newest first.
    async fn list_events(&self, transaction_id: &str) -> Result<Vec<TransactionEvent>>;
    /// Oldest first.
    async fn list_failures(&self, transaction_id: &str) -> Result<Vec<TransactionFailure>>;
    /// STAGED and RETRYING transactions across all invoices, in creation order.
    async fn list_outbox(&self) -> Result<Vec<Transaction>>;

    /// Like [`BillingStore::get_invoice`], but a missing invoice is `NotFound`.
    async fn require_invoice(&self, invoice_id: &str) -> Result<Invoice> {
        self.get_invoice(invoice_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Invoice", invoice_id))
    }

    /// Like [`BillingStore::get_transaction`], but a missing transaction is `NotFound`.
    async fn require_transaction(&self, transaction_id: &str) -> Result<Transaction> {
        self.get_transaction(transaction_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Transaction", transaction_id))
    }
}

/// An all-or-nothing batch of writes scoped to one invoice.
///
/// Reads observe committed state. Writes are buffered and applied together by
/// [`UnitOfWork::commit`]; dropping the unit discards them.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn get_invoice(&mut self, invoice_id: &str) -> Result<Option<Invoice>>;
    async fn get_transaction(&mut self, transaction_id: &str) -> Result<Option<Transaction>>;
    async fn list_transactions(&mut self, invoice_id: &str) -> Result<Vec<Transaction>>;
    async fn has_event(&mut self, transaction_id: &str, processor_id: &str) -> Result<bool>;
    async fn latest_event(&mut self, transaction_id: &str) -> Result<Option<TransactionEvent>>;
    async fn list_failures(&mut self, transaction_id: &str) -> Result<Vec<TransactionFailure>>;

    fn put_invoice(&mut self, invoice: Invoice);
    fn put_transaction(&mut self, transaction: Transaction);
    fn add_event(&mut self, event: TransactionEvent);
    fn add_failure(&mut self, failure: TransactionFailure);

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn require_invoice(&mut self, invoice_id: &str) -> Result<Invoice> {
        self.get_invoice(invoice_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Invoice", invoice_id))
    }

    async fn require_transaction(&mut self, transaction_id: &str) -> Result<Transaction> {
        self.get_transaction(transaction_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Transaction", transaction_id))
    }
}

/// What the processor needs to move money for one transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitRequest {
    pub transaction_id: String,
    pub transaction_type: TransactionType,
    pub amount: Amount,
    pub funding_instrument_uri: String,
    pub statement_descriptor: Option<String>,
    /// Processor reference of the refunded or reversed transaction.
    pub target_processor_uri: Option<String>,
}

/// Client side of the external payment processor.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn validate_funding_instrument(&self, uri: &str) -> std::result::Result<(), ProcessorError>;
    /// Returns the processor's reference (URI) for the created resource.
    async fn submit(&self, request: &SubmitRequest) -> std::result::Result<String, ProcessorError>;
}

pub type UnitOfWorkBox = Box<dyn UnitOfWork>;
pub type BillingStoreRef = Arc<dyn BillingStore>;
pub type CustomerStoreRef = Arc<dyn CustomerStore>;
pub type PaymentProcessorRef = Arc<dyn PaymentProcessor>;
