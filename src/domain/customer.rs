use super::new_guid;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A customer of a company. Invoices are always issued to a customer.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Customer {
    pub id: String,
    /// The company that owns this customer.
    pub company_id: String,
    /// Deleted customers keep their history but cannot receive new invoices.
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl Customer {
    pub fn new(company_id: impl Into<String>) -> Self {
        Self {
            id: new_guid("CU"),
            company_id: company_id.into(),
            deleted: false,
            created_at: Utc::now(),
        }
    }

    pub fn belongs_to(&self, company_id: &str) -> bool {
        self.company_id == company_id
    }
}
