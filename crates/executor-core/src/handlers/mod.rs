//! Handlers for work the engine loop dispatches.
//!
//! The request handler runs one sign request to its terminal result and fans
//! that result out to the origin and the notification surface. The
//! transaction handler follows submitted transactions and finalizes their
//! records.

pub mod request;
pub mod transaction;

pub use request::RequestHandler;
pub use transaction::TransactionHandler;
