//! Domain entities and the ports the application layer drives.

pub mod amount;
pub mod customer;
pub mod invoice;
pub mod ports;
pub mod transaction;

/// Generates a prefixed unique id such as `IV3f2c...`.
pub(crate) fn new_guid(prefix: &str) -> String {
    format!("{}{}", prefix, uuid::Uuid::new_v4().simple())
}
