use crate::config::EngineConfig;
use crate::domain::ports::{BillingStoreRef, PaymentProcessorRef, SubmitRequest};
use crate::domain::transaction::{
    SettlementStatus, SubmitStatus, Transaction, TransactionEvent, TransactionFailure,
};
use crate::error::{ProcessorError, ProcessorFailure, Result};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use tracing::{debug, error, info, warn};

/// What [`TransactionProcessor::apply_event`] did with an event.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum EventDisposition {
    /// Already recorded for this transaction; nothing changed.
    Duplicate,
    /// Recorded, but older than the latest event so the status was kept.
    Recorded,
    /// Recorded and the settlement status updated.
    Applied,
}

/// Drives transactions through submission to the processor and reconciles
/// the processor's events into settlement status.
pub struct TransactionProcessor {
    store: BillingStoreRef,
    processor: PaymentProcessorRef,
    config: EngineConfig,
}

impl TransactionProcessor {
    pub fn new(store: BillingStoreRef, processor: PaymentProcessorRef, config: EngineConfig) -> Self {
        Self {
            store,
            processor,
            config,
        }
    }

    /// Submits each transaction in order, committing each outcome on its own.
    ///
    /// Processor failures are recorded on the transaction and never returned.
    /// A storage error on one transaction does not stop the batch; the first
    /// such error is returned once every transaction has been attempted.
    pub async fn process_transactions(&self, transactions: &[Transaction]) -> Result<()> {
        let mut first_error = None;
        for tx in transactions {
            if let Err(e) = self.process_one(tx).await {
                error!(transaction_id = %tx.id, error = %e, "Failed to record submission outcome");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn process_one(&self, stale: &Transaction) -> Result<()> {
        let mut unit = self.store.begin(&stale.invoice_id).await?;
        let mut tx = unit.require_transaction(&stale.id).await?;

        // may have been canceled or submitted since the caller read it
        if !tx.is_outstanding() {
            debug!(transaction_id = %tx.id, submit_status = tx.submit_status.as_str(), "Skipping transaction");
            return Ok(());
        }
        let Some(funding_instrument_uri) = tx.funding_instrument_uri.clone() else {
            debug!(transaction_id = %tx.id, "No funding instrument, nothing to submit");
            return Ok(());
        };

        let target_processor_uri = match &tx.reference_to {
            Some(target) => unit
                .get_transaction(target)
                .await?
                .and_then(|target| target.processor_uri),
            None => None,
        };
        let request = SubmitRequest {
            transaction_id: tx.id.clone(),
            transaction_type: tx.transaction_type,
            amount: tx.amount,
            funding_instrument_uri,
            statement_descriptor: tx.statement_descriptor.clone(),
            target_processor_uri,
        };

        let outcome = match tokio::time::timeout(
            self.config.submit_timeout,
            self.processor.submit(&request),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(ProcessorError::Recoverable(
                ProcessorFailure::new(format!(
                    "Submission timed out after {:?}",
                    self.config.submit_timeout
                ))
                .with_code("timeout"),
            )),
        };

        let now = Utc::now();
        match outcome {
            Ok(processor_uri) => {
                info!(
                    transaction_id = %tx.id,
                    invoice_id = %tx.invoice_id,
                    transaction_type = tx.transaction_type.as_str(),
                    amount = tx.amount.value(),
                    processor_uri = %processor_uri,
                    "Transaction submitted"
                );
                tx.mark_submitted(processor_uri, now);
            }
            Err(e) => {
                let failures = unit.list_failures(&tx.id).await?.len() + 1;
                unit.add_failure(TransactionFailure::new(&tx.id, &e.failure(), now));
                if e.is_recoverable() && failures <= self.config.max_retries as usize {
                    warn!(transaction_id = %tx.id, failures, error = %e, "Submission failed, will retry");
                    tx.mark_retrying(now);
                } else {
                    error!(transaction_id = %tx.id, failures, error = %e, "Submission failed permanently");
                    tx.mark_failed(now);
                }
            }
        }

        unit.put_transaction(tx);
        unit.commit().await
    }

    /// Records a processor event and reconciles the settlement status.
    ///
    /// A repeated `(transaction, processor_event_id)` is a silent no-op. An
    /// event older than the latest recorded one (by time, then processor id)
    /// is kept in the history but cannot move the status backwards. Events for
    /// a transaction that is not submitted (staged, retrying, failed or
    /// canceled) are kept too but never settle it.
    pub async fn apply_event(
        &self,
        transaction_id: &str,
        processor_event_id: &str,
        status: SettlementStatus,
        occurred_at: DateTime<Utc>,
    ) -> Result<EventDisposition> {
        let invoice_id = self.store.require_transaction(transaction_id).await?.invoice_id;

        let mut unit = self.store.begin(&invoice_id).await?;
        let mut tx = unit.require_transaction(transaction_id).await?;

        if unit.has_event(transaction_id, processor_event_id).await? {
            debug!(transaction_id, processor_event_id, "Duplicate event ignored");
            return Ok(EventDisposition::Duplicate);
        }

        let latest = unit.latest_event(transaction_id).await?;
        let event = TransactionEvent::new(transaction_id, processor_event_id, status, occurred_at);
        let current = latest.is_none_or(|latest| event.chronological(&latest) != Ordering::Less);
        unit.add_event(event);

        let disposition = if tx.submit_status != SubmitStatus::Done {
            warn!(
                transaction_id,
                processor_event_id,
                submit_status = tx.submit_status.as_str(),
                "Event for unsubmitted transaction recorded without status change"
            );
            EventDisposition::Recorded
        } else if current {
            tx.settle(status, Utc::now());
            unit.put_transaction(tx);
            info!(transaction_id, processor_event_id, status = status.as_str(), "Settlement status updated");
            EventDisposition::Applied
        } else {
            warn!(transaction_id, processor_event_id, "Stale event recorded without status change");
            EventDisposition::Recorded
        };

        unit.commit().await?;
        Ok(disposition)
    }

    /// Submits every STAGED transaction and every RETRYING one whose backoff
    /// has elapsed at `now`. Returns how many were attempted.
    pub async fn process_outbox(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut due = Vec::new();
        for tx in self.store.list_outbox().await? {
            let failures = self.store.list_failures(&tx.id).await?;
            if self.retry_due(&failures, now) {
                due.push(tx);
            }
        }

        debug!(count = due.len(), "Processing outbox");
        self.process_transactions(&due).await?;
        Ok(due.len())
    }

    fn retry_due(&self, failures: &[TransactionFailure], now: DateTime<Utc>) -> bool {
        let Some(last) = failures.last() else {
            return true;
        };
        chrono::Duration::from_std(self.config.backoff_after(failures.len()))
            .ok()
            .and_then(|backoff| last.created_at.checked_add_signed(backoff))
            .is_some_and(|due_at| now >= due_at)
    }
}
