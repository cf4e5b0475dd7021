pub mod transaction;

pub use transaction::{NewTransaction, RepositoryError, TransactionRepository};
