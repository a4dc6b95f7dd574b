use super::amount::Amount;
use super::customer::Customer;
use super::new_guid;
use super::transaction::{SubmitStatus, Transaction, TransactionType};
use crate::error::{BillingError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A descriptive line on an invoice. Not reconciled against the invoice amount.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct LineItem {
    pub name: String,
    pub amount: i64,
    #[serde(rename = "type")]
    pub item_type: Option<String>,
    pub quantity: Option<i64>,
    pub volume: Option<i64>,
    pub unit: Option<String>,
}

/// A descriptive adjustment (discount, surcharge) on an invoice.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct Adjustment {
    /// May be negative.
    pub amount: i64,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Init,
    Processing,
    Settled,
    PartiallyRefunded,
    Refunded,
    Failed,
    Canceled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Init => "INIT",
            InvoiceStatus::Processing => "PROCESSING",
            InvoiceStatus::Settled => "SETTLED",
            InvoiceStatus::PartiallyRefunded => "PARTIALLY_REFUNDED",
            InvoiceStatus::Refunded => "REFUNDED",
            InvoiceStatus::Failed => "FAILED",
            InvoiceStatus::Canceled => "CANCELED",
        }
    }
}

/// The billable document. Its status is never stored; see [`Invoice::status`].
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Invoice {
    pub id: String,
    pub customer_id: String,
    pub amount: Amount,
    pub title: Option<String>,
    pub external_id: Option<String>,
    pub statement_descriptor: Option<String>,
    pub items: Vec<LineItem>,
    pub adjustments: Vec<Adjustment>,
    pub funding_instrument_uri: Option<String>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for [`Invoice::create`].
#[derive(Debug, Clone, Default)]
pub struct NewInvoice {
    pub amount: i64,
    pub funding_instrument_uri: Option<String>,
    pub title: Option<String>,
    pub items: Vec<LineItem>,
    pub adjustments: Vec<Adjustment>,
    pub external_id: Option<String>,
    pub statement_descriptor: Option<String>,
}

impl NewInvoice {
    pub fn new(amount: i64) -> Self {
        Self {
            amount,
            ..Default::default()
        }
    }

    pub fn funding_instrument(mut self, uri: impl Into<String>) -> Self {
        self.funding_instrument_uri = Some(uri.into());
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn statement_descriptor(mut self, descriptor: impl Into<String>) -> Self {
        self.statement_descriptor = Some(descriptor.into());
        self
    }

    pub fn items(mut self, items: Vec<LineItem>) -> Self {
        self.items = items;
        self
    }

    pub fn adjustments(mut self, adjustments: Vec<Adjustment>) -> Self {
        self.adjustments = adjustments;
        self
    }
}

impl Invoice {
    pub fn create(customer: &Customer, new: NewInvoice) -> Result<Self> {
        let amount = Amount::new(new.amount)?;
        if customer.deleted {
            return Err(BillingError::ValidationError(format!(
                "Cannot create an invoice for deleted customer {}",
                customer.id
            )));
        }

        let now = Utc::now();
        Ok(Self {
            id: new_guid("IV"),
            customer_id: customer.id.clone(),
            amount,
            title: new.title,
            external_id: new.external_id,
            statement_descriptor: new.statement_descriptor,
            items: new.items,
            adjustments: new.adjustments,
            funding_instrument_uri: new.funding_instrument_uri,
            canceled_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled_at.is_some()
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.canceled_at = Some(now);
        self.updated_at = now;
    }

    pub fn set_funding_instrument(&mut self, uri: Option<String>, now: DateTime<Utc>) {
        self.funding_instrument_uri = uri;
        self.updated_at = now;
    }

    /// Projects the invoice status from its transactions.
    ///
    /// Precedence: canceled, refunds, full settlement, work in progress,
    /// failure of the latest debit, and finally INIT.
    pub fn status(&self, transactions: &[Transaction]) -> InvoiceStatus {
        if self.is_canceled() {
            return InvoiceStatus::Canceled;
        }
        if transactions.is_empty() {
            return InvoiceStatus::Init;
        }

        let settled = settled_debit_total(transactions);
        let refunded: i64 = transactions
            .iter()
            .filter(|tx| tx.transaction_type == TransactionType::Refund && !tx.is_dead())
            .map(|tx| tx.amount.value())
            .sum();
        if refunded > 0 {
            return if refunded >= settled {
                InvoiceStatus::Refunded
            } else {
                InvoiceStatus::PartiallyRefunded
            };
        }

        if settled >= self.amount.value() {
            return InvoiceStatus::Settled;
        }
        if transactions
            .iter()
            .any(|tx| tx.is_outstanding() || tx.is_in_flight())
        {
            return InvoiceStatus::Processing;
        }

        let latest_debit = transactions.iter().rev().find(|tx| {
            tx.transaction_type == TransactionType::Debit
                && tx.submit_status != SubmitStatus::Canceled
        });
        match latest_debit {
            Some(debit) if debit.is_dead() => InvoiceStatus::Failed,
            _ => InvoiceStatus::Init,
        }
    }

    /// Amount still to be collected by a new debit.
    pub fn outstanding_amount(&self, transactions: &[Transaction]) -> i64 {
        (self.amount.value() - settled_debit_total(transactions)).max(0)
    }
}

fn settled_debit_total(transactions: &[Transaction]) -> i64 {
    transactions
        .iter()
        .filter(|tx| tx.transaction_type == TransactionType::Debit && tx.is_settled())
        .map(|tx| tx.amount.value())
        .sum()
}

/// Portion of a refund charged against one settled debit.
#[derive(Debug, PartialEq)]
pub struct RefundAllocation<'a> {
    pub debit: &'a Transaction,
    pub amount: i64,
}

/// Splits a refund across settled debits, oldest first.
///
/// `transactions` must be in chronological order. Refunds that failed or
/// were canceled do not consume a debit's refundable balance.
pub fn allocate_refund(transactions: &[Transaction], amount: Amount) -> Result<Vec<RefundAllocation<'_>>> {
    let mut refundable: Vec<(&Transaction, i64)> = Vec::new();
    for debit in transactions
        .iter()
        .filter(|tx| tx.transaction_type == TransactionType::Debit && tx.is_settled())
    {
        let refunded: i64 = transactions
            .iter()
            .filter(|tx| {
                tx.transaction_type == TransactionType::Refund
                    && tx.reference_to.as_deref() == Some(debit.id.as_str())
                    && !tx.is_dead()
            })
            .map(|tx| tx.amount.value())
            .sum();
        let remaining = debit.amount.value() - refunded;
        if remaining > 0 {
            refundable.push((debit, remaining));
        }
    }

    let available: i64 = refundable.iter().map(|(_, remaining)| remaining).sum();
    if amount.value() > available {
        return Err(BillingError::ValidationError(format!(
            "Refund amount {} exceeds refundable amount {}",
            amount, available
        )));
    }

    let mut left = amount.value();
    let mut allocations = Vec::new();
    for (debit, remaining) in refundable {
        if left == 0 {
            break;
        }
        let portion = left.min(remaining);
        allocations.push(RefundAllocation {
            debit,
            amount: portion,
        });
        left -= portion;
    }
    Ok(allocations)
}
