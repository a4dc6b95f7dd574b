use super::invoices;
use super::processing::{EventDisposition, TransactionProcessor};
use crate::domain::customer::Customer;
use crate::domain::invoice::{Invoice, InvoiceStatus, NewInvoice};
use crate::domain::ports::{BillingStoreRef, CustomerStoreRef, PaymentProcessorRef};
use crate::domain::transaction::{SettlementStatus, Transaction};
use crate::error::{BillingError, ProcessorError, Result};
use chrono::{DateTime, Utc};
use tracing::{error, warn};

/// An invoice together with its derived status and transactions.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceSummary {
    pub invoice: Invoice,
    pub status: InvoiceStatus,
    pub transactions: Vec<Transaction>,
}

/// Entry point for every invoice operation.
///
/// Each mutating call runs in two phases. Phase one writes the invoice and
/// transaction records in one unit of work; any error there is returned and
/// nothing is submitted. Phase two hands the transactions produced by phase
/// one to the [`TransactionProcessor`]. Phase two never undoes phase one: a
/// processor outage leaves the transactions in the outbox for a later sweep.
pub struct BillingController {
    store: BillingStoreRef,
    customers: CustomerStoreRef,
    processor: PaymentProcessorRef,
    engine: TransactionProcessor,
}

impl BillingController {
    pub fn new(
        store: BillingStoreRef,
        customers: CustomerStoreRef,
        processor: PaymentProcessorRef,
        engine: TransactionProcessor,
    ) -> Self {
        Self {
            store,
            customers,
            processor,
            engine,
        }
    }

    async fn customer(&self, customer_id: &str) -> Result<Customer> {
        self.customers
            .get(customer_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Customer", customer_id))
    }

    /// Loads the invoice and checks it belongs to `company_id`.
    async fn authorized_invoice(&self, company_id: &str, invoice_id: &str) -> Result<Invoice> {
        let invoice = self.store.require_invoice(invoice_id).await?;
        let customer = self.customer(&invoice.customer_id).await?;
        if !customer.belongs_to(company_id) {
            return Err(BillingError::AuthorizationError(format!(
                "Invoice {} does not belong to company {}",
                invoice_id, company_id
            )));
        }
        Ok(invoice)
    }

    /// Rejects structurally invalid instruments before anything is written.
    async fn check_funding_instrument(&self, uri: &str) -> Result<()> {
        self.processor
            .validate_funding_instrument(uri)
            .await
            .map_err(|e| {
                let reason = match e {
                    ProcessorError::InvalidInstrument(reason) => reason,
                    other => other.to_string(),
                };
                BillingError::InvalidInstrument {
                    uri: uri.to_string(),
                    reason,
                }
            })
    }

    /// Phase two. Storage errors are logged; the staged records stay put.
    async fn submit(&self, transactions: &[Transaction]) {
        if transactions.is_empty() {
            return;
        }
        if let Err(e) = self.engine.process_transactions(transactions).await {
            error!(error = %e, "Submission phase failed; transactions remain in the outbox");
        }
    }

    async fn summary(&self, invoice_id: &str) -> Result<InvoiceSummary> {
        let invoice = self.store.require_invoice(invoice_id).await?;
        let transactions = self.store.list_transactions(invoice_id).await?;
        Ok(InvoiceSummary {
            status: invoice.status(&transactions),
            invoice,
            transactions,
        })
    }

    pub async fn create_invoice(
        &self,
        company_id: &str,
        customer_id: &str,
        new: NewInvoice,
    ) -> Result<InvoiceSummary> {
        let customer = self.customer(customer_id).await?;
        if !customer.belongs_to(company_id) {
            return Err(BillingError::AuthorizationError(
                "Can only create an invoice for your own customer".to_string(),
            ));
        }
        let invoice = Invoice::create(&customer, new)?;
        if let Some(uri) = &invoice.funding_instrument_uri {
            self.check_funding_instrument(uri).await?;
        }

        let mut unit = self.store.begin(&invoice.id).await?;
        let invoice_id = invoice.id.clone();
        let staged = invoices::create(&mut *unit, invoice)?;
        unit.commit().await?;

        self.submit(&staged).await;
        self.summary(&invoice_id).await
    }

    pub async fn get_invoice(&self, company_id: &str, invoice_id: &str) -> Result<InvoiceSummary> {
        self.authorized_invoice(company_id, invoice_id).await?;
        self.summary(invoice_id).await
    }

    pub async fn list_transactions(
        &self,
        company_id: &str,
        invoice_id: &str,
    ) -> Result<Vec<Transaction>> {
        self.authorized_invoice(company_id, invoice_id).await?;
        self.store.list_transactions(invoice_id).await
    }

    pub async fn update_funding_instrument(
        &self,
        company_id: &str,
        invoice_id: &str,
        funding_instrument_uri: Option<String>,
    ) -> Result<InvoiceSummary> {
        self.authorized_invoice(company_id, invoice_id).await?;
        if let Some(uri) = &funding_instrument_uri {
            self.check_funding_instrument(uri).await?;
        }

        let mut unit = self.store.begin(invoice_id).await?;
        let (_, staged) =
            invoices::update_funding_instrument(&mut *unit, invoice_id, funding_instrument_uri)
                .await?;
        unit.commit().await?;

        self.submit(&staged).await;
        self.summary(invoice_id).await
    }

    pub async fn refund(
        &self,
        company_id: &str,
        invoice_id: &str,
        amount: i64,
    ) -> Result<InvoiceSummary> {
        self.authorized_invoice(company_id, invoice_id).await?;

        let mut unit = self.store.begin(invoice_id).await?;
        let (_, staged) = invoices::refund(&mut *unit, invoice_id, amount).await?;
        unit.commit().await?;

        self.submit(&staged).await;
        self.summary(invoice_id).await
    }

    pub async fn cancel(&self, company_id: &str, invoice_id: &str) -> Result<InvoiceSummary> {
        self.authorized_invoice(company_id, invoice_id).await?;

        let mut unit = self.store.begin(invoice_id).await?;
        invoices::cancel(&mut *unit, invoice_id).await?;
        unit.commit().await?;

        self.summary(invoice_id).await
    }

    /// Feeds a processor-reported status change into the engine.
    pub async fn handle_processor_event(
        &self,
        transaction_id: &str,
        processor_event_id: &str,
        status: SettlementStatus,
        occurred_at: DateTime<Utc>,
    ) -> Result<EventDisposition> {
        let disposition = self
            .engine
            .apply_event(transaction_id, processor_event_id, status, occurred_at)
            .await?;
        if disposition == EventDisposition::Duplicate {
            warn!(transaction_id, processor_event_id, "Processor delivered a duplicate event");
        }
        Ok(disposition)
    }

    /// Retries whatever is due in the outbox. See [`TransactionProcessor::process_outbox`].
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        self.engine.process_outbox(now).await
    }
}
