use super::amount::Amount;
use super::invoice::Invoice;
use super::new_guid;
use crate::error::{BillingError, ProcessorFailure, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Debit,
    Credit,
    Refund,
    Reverse,
}

impl TransactionType {
    /// Refunds and reversals always point back at the transaction they undo.
    pub fn requires_reference(&self) -> bool {
        matches!(self, TransactionType::Refund | TransactionType::Reverse)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Debit => "DEBIT",
            TransactionType::Credit => "CREDIT",
            TransactionType::Refund => "REFUND",
            TransactionType::Reverse => "REVERSE",
        }
    }
}

/// Where a transaction is in its submission to the processor.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmitStatus {
    Staged,
    Retrying,
    Done,
    Failed,
    Canceled,
}

impl SubmitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmitStatus::Staged => "STAGED",
            SubmitStatus::Retrying => "RETRYING",
            SubmitStatus::Done => "DONE",
            SubmitStatus::Failed => "FAILED",
            SubmitStatus::Canceled => "CANCELED",
        }
    }
}

/// The processor's view of a submitted transaction.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementStatus {
    Pending,
    Succeeded,
    Failed,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Pending => "PENDING",
            SettlementStatus::Succeeded => "SUCCEEDED",
            SettlementStatus::Failed => "FAILED",
        }
    }
}

/// A single attempt to move money for an invoice.
///
/// Submission (`submit_status`) and settlement (`status`) are tracked
/// separately: a transaction is submitted once, but the processor reports
/// its final outcome later through events.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Transaction {
    pub id: String,
    pub invoice_id: String,
    pub transaction_type: TransactionType,
    pub amount: Amount,
    /// `None` for transactions reconciled internally, which are never submitted.
    pub funding_instrument_uri: Option<String>,
    /// The transaction this one refunds or reverses. Set once at creation.
    pub reference_to: Option<String>,
    pub processor_uri: Option<String>,
    pub statement_descriptor: Option<String>,
    pub external_id: Option<String>,
    pub submit_status: SubmitStatus,
    /// `None` until the first submission attempt has an outcome.
    pub status: Option<SettlementStatus>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for [`Transaction::create`].
#[derive(Debug, Clone)]
pub struct NewTransaction<'a> {
    pub transaction_type: TransactionType,
    pub amount: i64,
    pub funding_instrument_uri: Option<String>,
    pub reference_to: Option<&'a Transaction>,
    pub statement_descriptor: Option<String>,
    pub external_id: Option<String>,
}

impl<'a> NewTransaction<'a> {
    pub fn new(transaction_type: TransactionType, amount: i64) -> Self {
        Self {
            transaction_type,
            amount,
            funding_instrument_uri: None,
            reference_to: None,
            statement_descriptor: None,
            external_id: None,
        }
    }

    pub fn funding_instrument(mut self, uri: Option<String>) -> Self {
        self.funding_instrument_uri = uri;
        self
    }

    pub fn reference_to(mut self, target: &'a Transaction) -> Self {
        self.reference_to = Some(target);
        self
    }

    pub fn statement_descriptor(mut self, descriptor: Option<String>) -> Self {
        self.statement_descriptor = descriptor;
        self
    }

    pub fn external_id(mut self, external_id: Option<String>) -> Self {
        self.external_id = external_id;
        self
    }
}

impl Transaction {
    /// Builds a new STAGED transaction owned by `invoice`.
    pub fn create(invoice: &Invoice, new: NewTransaction<'_>) -> Result<Self> {
        let amount = Amount::new(new.amount)?;

        let reference_to = match (new.transaction_type.requires_reference(), new.reference_to) {
            (true, None) => {
                return Err(BillingError::ValidationError(format!(
                    "{} transaction requires a target transaction",
                    new.transaction_type.as_str()
                )));
            }
            (_, Some(target)) if target.invoice_id != invoice.id => {
                return Err(BillingError::ValidationError(format!(
                    "Target transaction {} belongs to invoice {}, not {}",
                    target.id, target.invoice_id, invoice.id
                )));
            }
            (_, target) => target.map(|t| t.id.clone()),
        };

        let now = Utc::now();
        Ok(Self {
            id: new_guid("TX"),
            invoice_id: invoice.id.clone(),
            transaction_type: new.transaction_type,
            amount,
            funding_instrument_uri: new.funding_instrument_uri,
            reference_to,
            processor_uri: None,
            statement_descriptor: new.statement_descriptor,
            external_id: new.external_id,
            submit_status: SubmitStatus::Staged,
            status: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Still waiting to be (re)submitted.
    pub fn is_outstanding(&self) -> bool {
        matches!(
            self.submit_status,
            SubmitStatus::Staged | SubmitStatus::Retrying
        )
    }

    /// Submitted, with the processor's verdict still to come.
    pub fn is_in_flight(&self) -> bool {
        self.submit_status == SubmitStatus::Done && self.status == Some(SettlementStatus::Pending)
    }

    pub fn is_settled(&self) -> bool {
        self.status == Some(SettlementStatus::Succeeded)
    }

    /// Failed or canceled transactions no longer count toward any total.
    pub fn is_dead(&self) -> bool {
        matches!(
            self.submit_status,
            SubmitStatus::Failed | SubmitStatus::Canceled
        ) || self.status == Some(SettlementStatus::Failed)
    }

    pub fn mark_submitted(&mut self, processor_uri: String, now: DateTime<Utc>) {
        self.processor_uri = Some(processor_uri);
        self.submit_status = SubmitStatus::Done;
        self.status = Some(SettlementStatus::Pending);
        self.updated_at = now;
    }

    pub fn mark_retrying(&mut self, now: DateTime<Utc>) {
        self.submit_status = SubmitStatus::Retrying;
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, now: DateTime<Utc>) {
        self.submit_status = SubmitStatus::Failed;
        self.status = Some(SettlementStatus::Failed);
        self.updated_at = now;
    }

    pub fn mark_canceled(&mut self, now: DateTime<Utc>) {
        self.submit_status = SubmitStatus::Canceled;
        self.updated_at = now;
    }

    pub fn settle(&mut self, status: SettlementStatus, now: DateTime<Utc>) {
        self.status = Some(status);
        self.updated_at = now;
    }
}

/// A status change reported by the processor for one transaction.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct TransactionEvent {
    pub id: String,
    pub transaction_id: String,
    /// The processor's own event id; unique per transaction.
    pub processor_id: String,
    pub status: SettlementStatus,
    /// Processor clock, not ours.
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl TransactionEvent {
    pub fn new(
        transaction_id: impl Into<String>,
        processor_id: impl Into<String>,
        status: SettlementStatus,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_guid("TE"),
            transaction_id: transaction_id.into(),
            processor_id: processor_id.into(),
            status,
            occurred_at,
            created_at: Utc::now(),
        }
    }

    /// Chronological order: occurrence time, then processor id.
    pub fn chronological(&self, other: &Self) -> Ordering {
        self.occurred_at
            .cmp(&other.occurred_at)
            .then_with(|| self.processor_id.cmp(&other.processor_id))
    }
}

/// Sorts events newest first.
pub fn sort_newest_first(events: &mut [TransactionEvent]) {
    events.sort_by(|a, b| b.chronological(a));
}

/// One failed submission attempt.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct TransactionFailure {
    pub id: String,
    pub transaction_id: String,
    pub error_message: String,
    pub error_code: Option<String>,
    pub error_number: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl TransactionFailure {
    pub fn new(
        transaction_id: impl Into<String>,
        failure: &ProcessorFailure,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_guid("TF"),
            transaction_id: transaction_id.into(),
            error_message: failure.message.clone(),
            error_code: failure.code.clone(),
            error_number: failure.number,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::customer::Customer;
    use crate::domain::invoice::NewInvoice;
    use chrono::TimeZone;

    fn invoice(amount: i64) -> Invoice {
        let customer = Customer::new("CP1");
        Invoice::create(&customer, NewInvoice::new(amount)).unwrap()
    }

    #[test]
    fn test_create_debit_is_staged() {
        let invoice = invoice(1000);
        let tx = Transaction::create(
            &invoice,
            NewTransaction::new(TransactionType::Debit, 1000)
                .funding_instrument(Some("/v1/cards/1".into())),
        )
        .unwrap();

        assert!(tx.id.starts_with("TX"));
        assert_eq!(tx.invoice_id, invoice.id);
        assert_eq!(tx.submit_status, SubmitStatus::Staged);
        assert_eq!(tx.status, None);
        assert_eq!(tx.processor_uri, None);
        assert!(tx.is_outstanding());
    }

    #[test]
    fn test_create_rejects_non_positive_amount() {
        let invoice = invoice(1000);
        for amount in [0, -5] {
            let result = Transaction::create(
                &invoice,
                NewTransaction::new(TransactionType::Credit, amount),
            );
            assert!(matches!(result, Err(BillingError::ValidationError(_))));
        }
    }

    #[test]
    fn test_refund_requires_reference() {
        let invoice = invoice(1000);
        for ty in [TransactionType::Refund, TransactionType::Reverse] {
            let result = Transaction::create(&invoice, NewTransaction::new(ty, 100));
            assert!(matches!(result, Err(BillingError::ValidationError(_))));
        }
    }

    #[test]
    fn test_reference_must_share_invoice() {
        let first = invoice(1000);
        let second = invoice(1000);
        let debit =
            Transaction::create(&first, NewTransaction::new(TransactionType::Debit, 1000)).unwrap();

        let result = Transaction::create(
            &second,
            NewTransaction::new(TransactionType::Refund, 100).reference_to(&debit),
        );
        assert!(matches!(result, Err(BillingError::ValidationError(_))));

        let refund = Transaction::create(
            &first,
            NewTransaction::new(TransactionType::Refund, 100).reference_to(&debit),
        )
        .unwrap();
        assert_eq!(refund.reference_to.as_deref(), Some(debit.id.as_str()));
    }

    #[test]
    fn test_events_sort_newest_first_with_id_tiebreak() {
        let at = Utc.with_ymd_and_hms(2013, 8, 16, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2013, 8, 17, 0, 0, 0).unwrap();
        let mut events = vec![
            TransactionEvent::new("TX1", "EV_A", SettlementStatus::Pending, at),
            TransactionEvent::new("TX1", "EV_C", SettlementStatus::Succeeded, later),
            TransactionEvent::new("TX1", "EV_B", SettlementStatus::Pending, at),
        ];
        sort_newest_first(&mut events);

        let ids: Vec<_> = events.iter().map(|e| e.processor_id.as_str()).collect();
        assert_eq!(ids, ["EV_C", "EV_B", "EV_A"]);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&SubmitStatus::Retrying).unwrap();
        assert_eq!(json, "\"RETRYING\"");
        let json = serde_json::to_string(&TransactionType::Reverse).unwrap();
        assert_eq!(json, "\"REVERSE\"");
    }
}
