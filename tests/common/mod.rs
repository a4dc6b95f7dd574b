#![allow(dead_code)]

use billing_engine::application::controller::BillingController;
use billing_engine::application::processing::TransactionProcessor;
use billing_engine::config::EngineConfig;
use billing_engine::domain::customer::Customer;
use billing_engine::domain::ports::CustomerStore;
use billing_engine::infrastructure::dummy_processor::DummyProcessor;
use billing_engine::infrastructure::in_memory::{InMemoryBillingStore, InMemoryCustomerStore};
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::Arc;

pub const COMPANY: &str = "CP_TEST";
pub const CARD: &str = "/v1/cards/CC_OK";
pub const DECLINED_CARD: &str = "/v1/cards/CC_declined";

/// A controller wired to in-memory stores and a dummy processor, with the
/// concrete adapters kept for inspection.
pub struct Harness {
    pub controller: BillingController,
    pub store: Arc<InMemoryBillingStore>,
    pub customers: Arc<InMemoryCustomerStore>,
    pub processor: Arc<DummyProcessor>,
}

pub fn harness() -> Harness {
    harness_with(EngineConfig::default())
}

pub fn harness_with(config: EngineConfig) -> Harness {
    let store = Arc::new(InMemoryBillingStore::new());
    let customers = Arc::new(InMemoryCustomerStore::new());
    let processor = Arc::new(DummyProcessor::new());
    let engine = TransactionProcessor::new(store.clone(), processor.clone(), config);
    let controller =
        BillingController::new(store.clone(), customers.clone(), processor.clone(), engine);
    Harness {
        controller,
        store,
        customers,
        processor,
    }
}

impl Harness {
    pub async fn customer(&self, company_id: &str) -> Customer {
        let customer = Customer::new(company_id);
        self.customers.store(customer.clone()).await.unwrap();
        customer
    }
}

pub fn write_script(path: &Path, rows: &[&[&str]]) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().flexible(true).from_writer(file);
    for row in rows {
        wtr.write_record(*row)?;
    }
    wtr.flush()?;
    Ok(())
}
