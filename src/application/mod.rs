//! Application layer containing the billing orchestration.
//!
//! `invoices` holds the record-level invoice operations, `processing` the
//! engine that submits transactions and reconciles events, and `controller`
//! the two-phase entry points tying them together.

pub mod controller;
pub mod invoices;
pub mod processing;
