use crate::domain::transaction::SettlementStatus;
use crate::error::{BillingError, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::io::Read;

/// A command in a replay script.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum ScriptOp {
    Customer,
    DeleteCustomer,
    Invoice,
    Fund,
    Event,
    Refund,
    Cancel,
    Sweep,
}

/// Settlement status as written in scripts.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum ScriptStatus {
    Pending,
    Succeeded,
    Failed,
}

impl From<ScriptStatus> for SettlementStatus {
    fn from(status: ScriptStatus) -> Self {
        match status {
            ScriptStatus::Pending => SettlementStatus::Pending,
            ScriptStatus::Succeeded => SettlementStatus::Succeeded,
            ScriptStatus::Failed => SettlementStatus::Failed,
        }
    }
}

/// One row of a replay script.
///
/// `customer` and `invoice` are aliases chosen by the script author; they are
/// bound to generated ids when the customer or invoice is created. Columns a
/// command does not use may be left empty or omitted.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct ScriptRow {
    pub op: ScriptOp,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub invoice: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub funding_instrument: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
    /// 1-based position of the transaction within its invoice.
    #[serde(default)]
    pub transaction: Option<usize>,
    /// Processor event id.
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub status: Option<ScriptStatus>,
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
}

impl ScriptRow {
    /// Returns the column `name` or a validation error naming it.
    pub fn require<'a, T>(value: &'a Option<T>, name: &str, op: ScriptOp) -> Result<&'a T> {
        value.as_ref().ok_or_else(|| {
            BillingError::ValidationError(format!("{:?} requires the '{}' column", op, name))
        })
    }
}

/// Reads replay script rows from a CSV source.
///
/// Whitespace is trimmed and rows may omit trailing columns.
pub struct ScriptReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> ScriptReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes rows; a malformed row yields an error and the
    /// iterator moves on to the next one.
    pub fn rows(self) -> impl Iterator<Item = Result<ScriptRow>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(BillingError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_valid_stream() {
        let data = "op, customer, invoice, amount, funding_instrument\n\
                    customer, alice\n\
                    invoice, alice, inv1, 1000, /v1/cards/CC1\n\
                    sweep";
        let rows: Vec<Result<ScriptRow>> = ScriptReader::new(data.as_bytes()).rows().collect();

        assert_eq!(rows.len(), 3);
        let invoice = rows[1].as_ref().unwrap();
        assert_eq!(invoice.op, ScriptOp::Invoice);
        assert_eq!(invoice.customer.as_deref(), Some("alice"));
        assert_eq!(invoice.amount, Some(1000));
        assert_eq!(invoice.funding_instrument.as_deref(), Some("/v1/cards/CC1"));
        assert_eq!(rows[2].as_ref().unwrap().op, ScriptOp::Sweep);
    }

    #[test]
    fn test_reader_event_row() {
        let data = "op,invoice,transaction,event,status,occurred_at\n\
                    event,inv1,1,EV1,succeeded,2013-08-16T12:00:00Z";
        let rows: Vec<Result<ScriptRow>> = ScriptReader::new(data.as_bytes()).rows().collect();

        let row = rows[0].as_ref().unwrap();
        assert_eq!(row.transaction, Some(1));
        assert_eq!(row.status, Some(ScriptStatus::Succeeded));
        assert!(row.occurred_at.is_some());
    }

    #[test]
    fn test_reader_malformed_line() {
        let data = "op, customer\nexplode, alice\ncustomer, bob";
        let rows: Vec<Result<ScriptRow>> = ScriptReader::new(data.as_bytes()).rows().collect();

        assert!(rows[0].is_err());
        assert!(rows[1].is_ok());
    }

    #[test]
    fn test_require_names_missing_column() {
        let row = ScriptRow {
            op: ScriptOp::Refund,
            customer: None,
            invoice: Some("inv1".into()),
            amount: None,
            funding_instrument: None,
            external_id: None,
            transaction: None,
            event: None,
            status: None,
            occurred_at: None,
        };
        let err = ScriptRow::require(&row.amount, "amount", row.op).unwrap_err();
        assert!(err.to_string().contains("'amount'"));
    }
}
