//! Confirmation tracking for submitted transactions.

pub mod transaction;

pub use transaction::TransactionMonitor;
