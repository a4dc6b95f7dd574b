use crate::application::controller::InvoiceSummary;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

/// One line of the final report: a transaction with its invoice context.
///
/// Invoices without transactions produce a single row with the transaction
/// columns left empty.
#[derive(Debug, Serialize, PartialEq, Clone)]
pub struct ReportRow {
    pub invoice: String,
    pub external_id: Option<String>,
    pub invoice_status: &'static str,
    pub transaction: Option<String>,
    #[serde(rename = "type")]
    pub transaction_type: Option<&'static str>,
    pub amount: i64,
    pub submit_status: Option<&'static str>,
    pub settlement: Option<&'static str>,
    pub reference_to: Option<String>,
    pub failures: usize,
}

impl ReportRow {
    /// Expands a summary into rows. `failures` returns the failure count of a
    /// transaction id.
    pub fn from_summary(
        summary: &InvoiceSummary,
        mut failures: impl FnMut(&str) -> usize,
    ) -> Vec<ReportRow> {
        let invoice = &summary.invoice;
        if summary.transactions.is_empty() {
            return vec![ReportRow {
                invoice: invoice.id.clone(),
                external_id: invoice.external_id.clone(),
                invoice_status: summary.status.as_str(),
                transaction: None,
                transaction_type: None,
                amount: invoice.amount.value(),
                submit_status: None,
                settlement: None,
                reference_to: None,
                failures: 0,
            }];
        }

        summary
            .transactions
            .iter()
            .map(|tx| ReportRow {
                invoice: invoice.id.clone(),
                external_id: invoice.external_id.clone(),
                invoice_status: summary.status.as_str(),
                transaction: Some(tx.id.clone()),
                transaction_type: Some(tx.transaction_type.as_str()),
                amount: tx.amount.value(),
                submit_status: Some(tx.submit_status.as_str()),
                settlement: tx.status.map(|s| s.as_str()),
                reference_to: tx.reference_to.clone(),
                failures: failures(&tx.id),
            })
            .collect()
    }
}

/// Writes report rows as CSV with a header line.
pub struct ReportWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(destination: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(destination),
        }
    }

    pub fn write_rows(&mut self, rows: impl IntoIterator<Item = ReportRow>) -> Result<()> {
        for row in rows {
            self.writer.serialize(row)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
