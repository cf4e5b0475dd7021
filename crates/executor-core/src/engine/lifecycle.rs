//! Lifecycle management for the execution engine.
//!
//! Handles start-up recovery and shutdown of the engine.

use super::{EngineError, ExecutionEngine};
use crate::recovery::{RecoveryReport, RecoveryService};

impl ExecutionEngine {
	/// Performs any initialization required before running.
	pub async fn initialize(&self) -> Result<(), EngineError> {
		tracing::info!(
			executor_id = %self.config.executor.id,
			networks = self.config.networks.len(),
			"Initializing execution engine"
		);
		Ok(())
	}

	/// Puts transactions left pending by a previous process back under
	/// monitoring.
	pub(crate) async fn recover(&self) -> Result<RecoveryReport, EngineError> {
		RecoveryService::new(self.repository.clone(), self.event_bus.clone())
			.recover_state()
			.await
			.map_err(|e| EngineError::Service(e.to_string()))
	}

	/// Performs cleanup operations.
	///
	/// Open sessions are disconnected so requests that have not reached
	/// submission stop.
	pub async fn shutdown(&self) -> Result<(), EngineError> {
		tracing::info!("Shutting down execution engine");

		let topics: Vec<String> = self
			.sessions
			.iter()
			.map(|entry| entry.key().clone())
			.collect();
		for topic in topics {
			self.disconnect_session(&topic);
		}
		self.stop();

		Ok(())
	}
}
