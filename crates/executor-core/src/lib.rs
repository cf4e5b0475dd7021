//! Core transaction execution pipeline.
//!
//! Turns sign requests from interactive sessions, deep links and the
//! application's own flows into signed messages or submitted transactions,
//! and reports exactly one terminal result back to each origin. The
//! [`ExecutionEngine`] ties the pipeline together; [`ExecutorBuilder`]
//! assembles it from configuration.

pub mod abi;
pub mod allowlist;
pub mod builder;
pub mod delegation;
pub mod engine;
pub mod handlers;
pub mod monitoring;
pub mod nonce;
pub mod normalizer;
pub mod notifications;
pub mod orchestrator;
pub mod recovery;
pub mod response;
pub mod signer;
pub mod state;

pub use allowlist::{AllowlistDecision, AllowlistValidator};
pub use builder::{BuilderError, ExecutorBuilder, ExecutorFactories};
pub use delegation::{ConsentStore, DelegationError, DelegationResolver};
pub use engine::{event_bus::EventBus, EngineError, ExecutionEngine};
pub use nonce::{NonceGuard, NonceManager};
pub use normalizer::{normalize, NormalizeError, RawRequest};
pub use notifications::NotificationDispatcher;
pub use orchestrator::{CancellationSignal, ExecutionError, ExecutionOrchestrator, ExecutionOutcome};
pub use recovery::{RecoveryReport, RecoveryService};
pub use response::{CompletionHandle, ResponseRouter, RouteOutcome, TerminalResult};
pub use signer::{
	Approval, ApprovalGate, AutoApprove, ChannelApprovalGate, SignerError, SigningStrategy,
	TransactionSigner,
};
pub use state::{NewTransaction, RepositoryError, TransactionRepository};
