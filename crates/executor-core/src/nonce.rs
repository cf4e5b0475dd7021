//! Nonce serialization per account and chain.
//!
//! Each `(account, chain)` pair has one fair lock. Waiters are granted the
//! lock in the order they asked for it, so submissions leave in acquisition
//! order. The local counter only moves forward after a submission is
//! accepted; a failed submission leaves no gap. A transaction that is dropped
//! after acceptance hands its nonces back through [`NonceManager::release`].

use alloy_primitives::Address;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
struct NonceState {
	/// Next nonce known to be free, from this process's own submissions.
	next: Option<u64>,
}

/// Fair per-`(account, chain)` locks guarding the nonce counters.
#[derive(Default)]
pub struct NonceManager {
	slots: DashMap<(Address, u64), Arc<Mutex<NonceState>>>,
}

impl NonceManager {
	pub fn new() -> Self {
		Self::default()
	}

	/// Waits for exclusive use of the nonce sequence of `account` on
	/// `chain_id`. Dropping the future gives up the place in line.
	pub async fn acquire(&self, account: Address, chain_id: u64) -> NonceGuard {
		let slot = self
			.slots
			.entry((account, chain_id))
			.or_default()
			.value()
			.clone();
		let state = slot.lock_owned().await;
		NonceGuard {
			state,
			account,
			chain_id,
		}
	}

	/// Hands back the nonces `nonce..following` of a transaction that will
	/// never land. The counter only rewinds when nothing was handed out after
	/// it; otherwise the chain's pending count decides.
	pub async fn release(&self, account: Address, chain_id: u64, nonce: u64, following: u64) {
		let Some(slot) = self
			.slots
			.get(&(account, chain_id))
			.map(|entry| entry.value().clone())
		else {
			return;
		};
		let mut state = slot.lock().await;
		if state.next == Some(following) {
			state.next = Some(nonce);
			tracing::debug!(
				account = %account,
				chain_id,
				next_nonce = nonce,
				"Nonce released"
			);
		}
	}
}

/// Exclusive hold on one nonce sequence.
pub struct NonceGuard {
	state: OwnedMutexGuard<NonceState>,
	account: Address,
	chain_id: u64,
}

impl NonceGuard {
	pub fn account(&self) -> Address {
		self.account
	}

	pub fn chain_id(&self) -> u64 {
		self.chain_id
	}

	/// Next nonce to use: the largest of the chain's pending count, the local
	/// counter and the nonce after the pending private submissions.
	///
	/// A private transaction stays pending in the repository for a while
	/// after the chain counts it, so it bounds the nonce rather than adding
	/// to it.
	pub fn resolve(&self, chain_pending: u64, private_next: Option<u64>) -> u64 {
		chain_pending
			.max(self.state.next.unwrap_or(0))
			.max(private_next.unwrap_or(0))
	}

	/// Records an accepted submission; `next` is the first free nonce after it.
	pub fn commit(&mut self, next: u64) {
		let advanced = self.state.next.map_or(next, |local| local.max(next));
		self.state.next = Some(advanced);
		tracing::debug!(
			account = %self.account,
			chain_id = self.chain_id,
			next_nonce = advanced,
			"Nonce committed"
		);
	}
}
