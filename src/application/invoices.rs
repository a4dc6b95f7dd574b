//! Invoice operations that create and adjust transactions.
//!
//! Every function runs inside a caller-provided [`UnitOfWork`] already holding
//! the invoice lock. Nothing here talks to the processor; the transactions
//! returned are the ones the caller should hand to the processing engine once
//! the unit is committed.

use crate::domain::amount::Amount;
use crate::domain::invoice::{Invoice, InvoiceStatus, allocate_refund};
use crate::domain::ports::UnitOfWork;
use crate::domain::transaction::{NewTransaction, Transaction, TransactionType};
use crate::error::{BillingError, Result};
use chrono::Utc;
use tracing::info;

/// Reads an invoice and its transactions (chronological) inside `unit`.
pub async fn load(unit: &mut dyn UnitOfWork, invoice_id: &str) -> Result<(Invoice, Vec<Transaction>)> {
    let invoice = unit.require_invoice(invoice_id).await?;
    let transactions = unit.list_transactions(invoice_id).await?;
    Ok((invoice, transactions))
}

fn debit_for(invoice: &Invoice, amount: i64, funding_instrument_uri: String) -> Result<Transaction> {
    Transaction::create(
        invoice,
        NewTransaction::new(TransactionType::Debit, amount)
            .funding_instrument(Some(funding_instrument_uri))
            .statement_descriptor(invoice.statement_descriptor.clone()),
    )
}

/// Stages a freshly built invoice, plus a full-amount DEBIT when it carries a
/// funding instrument.
pub fn create(unit: &mut dyn UnitOfWork, invoice: Invoice) -> Result<Vec<Transaction>> {
    let mut staged = Vec::new();
    if let Some(uri) = invoice.funding_instrument_uri.clone() {
        staged.push(debit_for(&invoice, invoice.amount.value(), uri)?);
    }

    info!(
        invoice_id = %invoice.id,
        customer_id = %invoice.customer_id,
        amount = invoice.amount.value(),
        debits = staged.len(),
        "Invoice created"
    );
    unit.put_invoice(invoice);
    for tx in &staged {
        unit.put_transaction(tx.clone());
    }
    Ok(staged)
}

/// Replaces the invoice's funding instrument.
///
/// Unsubmitted debits are canceled rather than re-pointed, and a new DEBIT for
/// the outstanding amount is staged when an instrument is given.
pub async fn update_funding_instrument(
    unit: &mut dyn UnitOfWork,
    invoice_id: &str,
    funding_instrument_uri: Option<String>,
) -> Result<(Invoice, Vec<Transaction>)> {
    let (mut invoice, transactions) = load(unit, invoice_id).await?;

    let status = invoice.status(&transactions);
    if !matches!(
        status,
        InvoiceStatus::Init | InvoiceStatus::Processing | InvoiceStatus::Failed
    ) {
        return Err(BillingError::InvalidOperationError(format!(
            "Cannot change the funding instrument of a {} invoice",
            status.as_str()
        )));
    }
    if transactions.iter().any(Transaction::is_in_flight) {
        return Err(BillingError::InvalidOperationError(
            "A submitted transaction is still awaiting settlement".to_string(),
        ));
    }

    let now = Utc::now();
    for tx in &transactions {
        if tx.transaction_type == TransactionType::Debit && tx.is_outstanding() {
            let mut canceled = tx.clone();
            canceled.mark_canceled(now);
            unit.put_transaction(canceled);
        }
    }

    let outstanding = invoice.outstanding_amount(&transactions);
    invoice.set_funding_instrument(funding_instrument_uri.clone(), now);

    let mut staged = Vec::new();
    if let Some(uri) = funding_instrument_uri
        && outstanding > 0
    {
        staged.push(debit_for(&invoice, outstanding, uri)?);
    }

    info!(invoice_id, debits = staged.len(), "Funding instrument updated");
    unit.put_invoice(invoice.clone());
    for tx in &staged {
        unit.put_transaction(tx.clone());
    }
    Ok((invoice, staged))
}

/// Stages REFUND transactions for `amount`, drawn from settled debits oldest
/// first. Fails without writing anything when the amount exceeds what is
/// still refundable.
pub async fn refund(
    unit: &mut dyn UnitOfWork,
    invoice_id: &str,
    amount: i64,
) -> Result<(Invoice, Vec<Transaction>)> {
    let amount = Amount::new(amount)?;
    let (mut invoice, transactions) = load(unit, invoice_id).await?;

    let mut staged = Vec::new();
    for allocation in allocate_refund(&transactions, amount)? {
        staged.push(Transaction::create(
            &invoice,
            NewTransaction::new(TransactionType::Refund, allocation.amount)
                .funding_instrument(allocation.debit.funding_instrument_uri.clone())
                .reference_to(allocation.debit)
                .statement_descriptor(invoice.statement_descriptor.clone()),
        )?);
    }

    invoice.updated_at = Utc::now();
    info!(invoice_id, amount = amount.value(), refunds = staged.len(), "Refund staged");
    unit.put_invoice(invoice.clone());
    for tx in &staged {
        unit.put_transaction(tx.clone());
    }
    Ok((invoice, staged))
}

/// Cancels the invoice and every transaction not yet submitted.
pub async fn cancel(unit: &mut dyn UnitOfWork, invoice_id: &str) -> Result<Invoice> {
    let (mut invoice, transactions) = load(unit, invoice_id).await?;

    if invoice.is_canceled() {
        return Err(BillingError::InvalidOperationError(format!(
            "Invoice {} is already canceled",
            invoice_id
        )));
    }
    if transactions.iter().any(Transaction::is_settled) {
        return Err(BillingError::InvalidOperationError(format!(
            "Invoice {} has settled transactions and cannot be canceled",
            invoice_id
        )));
    }

    let now = Utc::now();
    for tx in transactions.into_iter().filter(Transaction::is_outstanding) {
        let mut canceled = tx;
        canceled.mark_canceled(now);
        unit.put_transaction(canceled);
    }
    invoice.cancel(now);

    info!(invoice_id, "Invoice canceled");
    unit.put_invoice(invoice.clone());
    Ok(invoice)
}
