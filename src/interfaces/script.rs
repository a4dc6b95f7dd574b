use super::csv::report_writer::ReportRow;
use super::csv::script_reader::{ScriptOp, ScriptRow};
use crate::application::controller::BillingController;
use crate::domain::customer::Customer;
use crate::domain::invoice::NewInvoice;
use crate::domain::ports::{BillingStoreRef, CustomerStoreRef};
use crate::error::{BillingError, Result};
use chrono::Utc;
use std::collections::HashMap;
use tracing::{debug, info};

/// Replays script rows against a [`BillingController`] as one company.
///
/// Aliases not bound during this run are used verbatim as ids, so a script
/// can address records persisted by an earlier run.
pub struct ScriptRunner {
    controller: BillingController,
    store: BillingStoreRef,
    customers: CustomerStoreRef,
    company_id: String,
    customer_aliases: HashMap<String, String>,
    invoice_aliases: HashMap<String, String>,
}

impl ScriptRunner {
    pub fn new(
        controller: BillingController,
        store: BillingStoreRef,
        customers: CustomerStoreRef,
        company_id: impl Into<String>,
    ) -> Self {
        Self {
            controller,
            store,
            customers,
            company_id: company_id.into(),
            customer_aliases: HashMap::new(),
            invoice_aliases: HashMap::new(),
        }
    }

    fn customer_id(&self, alias: &str) -> String {
        self.customer_aliases
            .get(alias)
            .cloned()
            .unwrap_or_else(|| alias.to_string())
    }

    fn invoice_id(&self, alias: &str) -> String {
        self.invoice_aliases
            .get(alias)
            .cloned()
            .unwrap_or_else(|| alias.to_string())
    }

    pub async fn run(&mut self, row: ScriptRow) -> Result<()> {
        let company = self.company_id.clone();
        debug!(op = ?row.op, "Replaying script row");
        match row.op {
            ScriptOp::Customer => {
                let alias = ScriptRow::require(&row.customer, "customer", row.op)?;
                let customer = Customer::new(&company);
                info!(alias = %alias, customer_id = %customer.id, "Customer created");
                self.customer_aliases
                    .insert(alias.clone(), customer.id.clone());
                self.customers.store(customer).await?;
            }
            ScriptOp::DeleteCustomer => {
                let alias = ScriptRow::require(&row.customer, "customer", row.op)?;
                let id = self.customer_id(alias);
                let mut customer = self
                    .customers
                    .get(&id)
                    .await?
                    .ok_or_else(|| BillingError::not_found("Customer", &id))?;
                if !customer.belongs_to(&company) {
                    return Err(BillingError::AuthorizationError(format!(
                        "Customer {} does not belong to company {}",
                        id, company
                    )));
                }
                customer.deleted = true;
                self.customers.store(customer).await?;
            }
            ScriptOp::Invoice => {
                let customer = self.customer_id(ScriptRow::require(&row.customer, "customer", row.op)?);
                let alias = ScriptRow::require(&row.invoice, "invoice", row.op)?;
                let amount = *ScriptRow::require(&row.amount, "amount", row.op)?;

                let mut new = NewInvoice::new(amount);
                if let Some(uri) = row.funding_instrument {
                    new = new.funding_instrument(uri);
                }
                if let Some(external_id) = row.external_id {
                    new = new.external_id(external_id);
                }
                let summary = self.controller.create_invoice(&company, &customer, new).await?;
                self.invoice_aliases
                    .insert(alias.clone(), summary.invoice.id);
            }
            ScriptOp::Fund => {
                let invoice = self.invoice_id(ScriptRow::require(&row.invoice, "invoice", row.op)?);
                self.controller
                    .update_funding_instrument(&company, &invoice, row.funding_instrument)
                    .await?;
            }
            ScriptOp::Refund => {
                let invoice = self.invoice_id(ScriptRow::require(&row.invoice, "invoice", row.op)?);
                let amount = *ScriptRow::require(&row.amount, "amount", row.op)?;
                self.controller.refund(&company, &invoice, amount).await?;
            }
            ScriptOp::Cancel => {
                let invoice = self.invoice_id(ScriptRow::require(&row.invoice, "invoice", row.op)?);
                self.controller.cancel(&company, &invoice).await?;
            }
            ScriptOp::Event => {
                let invoice = self.invoice_id(ScriptRow::require(&row.invoice, "invoice", row.op)?);
                let event = ScriptRow::require(&row.event, "event", row.op)?;
                let status = *ScriptRow::require(&row.status, "status", row.op)?;

                let transactions = self.controller.list_transactions(&company, &invoice).await?;
                let target = match row.transaction {
                    Some(position) => position
                        .checked_sub(1)
                        .and_then(|index| transactions.get(index)),
                    // latest submitted transaction
                    None => transactions
                        .iter()
                        .rev()
                        .find(|tx| tx.processor_uri.is_some()),
                }
                .ok_or_else(|| {
                    BillingError::ValidationError(format!(
                        "Invoice {} has no matching transaction for event {}",
                        invoice, event
                    ))
                })?;

                self.controller
                    .handle_processor_event(
                        &target.id,
                        event,
                        status.into(),
                        row.occurred_at.unwrap_or_else(Utc::now),
                    )
                    .await?;
            }
            ScriptOp::Sweep => {
                let attempted = self.controller.sweep(Utc::now()).await?;
                info!(attempted, "Outbox swept");
            }
        }
        Ok(())
    }

    /// Report rows for every invoice of the company, in creation order.
    pub async fn report(&self) -> Result<Vec<ReportRow>> {
        let mut rows = Vec::new();
        for invoice in self.store.list_invoices().await? {
            let summary = match self.controller.get_invoice(&self.company_id, &invoice.id).await {
                Ok(summary) => summary,
                Err(BillingError::AuthorizationError(_)) => continue,
                Err(e) => return Err(e),
            };

            let mut failures = HashMap::new();
            for tx in &summary.transactions {
                failures.insert(tx.id.clone(), self.store.list_failures(&tx.id).await?.len());
            }
            rows.extend(ReportRow::from_summary(&summary, |id| {
                failures.get(id).copied().unwrap_or_default()
            }));
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::processing::TransactionProcessor;
    use crate::config::EngineConfig;
    use crate::infrastructure::dummy_processor::DummyProcessor;
    use crate::infrastructure::in_memory::{InMemoryBillingStore, InMemoryCustomerStore};
    use crate::interfaces::csv::script_reader::ScriptReader;
    use std::sync::Arc;

    fn runner(company: &str) -> ScriptRunner {
        let store: BillingStoreRef = Arc::new(InMemoryBillingStore::new());
        let customers: CustomerStoreRef = Arc::new(InMemoryCustomerStore::new());
        let processor = Arc::new(DummyProcessor::new());
        let engine = TransactionProcessor::new(store.clone(), processor.clone(), EngineConfig::default());
        let controller = BillingController::new(store.clone(), customers.clone(), processor, engine);
        ScriptRunner::new(controller, store, customers, company)
    }

    async fn replay(runner: &mut ScriptRunner, script: &str) -> Vec<Result<()>> {
        let mut outcomes = Vec::new();
        for row in ScriptReader::new(script.as_bytes()).rows() {
            outcomes.push(match row {
                Ok(row) => runner.run(row).await,
                Err(e) => Err(e),
            });
        }
        outcomes
    }

    #[tokio::test]
    async fn test_settle_and_refund_script() {
        let mut runner = runner("CP1");
        let outcomes = replay(
            &mut runner,
            "op,customer,invoice,amount,funding_instrument,event,status\n\
             customer,alice\n\
             invoice,alice,inv1,1000,/v1/cards/CC1\n\
             event,,inv1,,,EV1,succeeded\n\
             refund,,inv1,400\n\
             refund,,inv1,700\n",
        )
        .await;

        assert!(outcomes[..4].iter().all(Result::is_ok));
        assert!(matches!(outcomes[4], Err(BillingError::ValidationError(_))));

        let rows = runner.report().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.invoice_status == "PARTIALLY_REFUNDED"));
        assert_eq!(rows[1].transaction_type, Some("REFUND"));
        assert_eq!(rows[1].reference_to, rows[0].transaction);
    }

    #[tokio::test]
    async fn test_unknown_alias_is_not_found() {
        let mut runner = runner("CP1");
        let outcomes = replay(&mut runner, "op,invoice\ncancel,nope\n").await;
        assert!(matches!(outcomes[0], Err(BillingError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_deleted_customer_cannot_be_invoiced() {
        let mut runner = runner("CP1");
        let outcomes = replay(
            &mut runner,
            "op,customer,invoice,amount\n\
             customer,bob\n\
             delete_customer,bob\n\
             invoice,bob,inv1,500\n",
        )
        .await;

        assert!(outcomes[1].is_ok());
        assert!(matches!(outcomes[2], Err(BillingError::ValidationError(_))));
        assert!(runner.report().await.unwrap().is_empty());
    }
}
