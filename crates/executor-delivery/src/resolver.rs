//! Endpoint pools per chain and privacy tier.

use crate::{DeliveryError, DeliveryFactory, DeliveryInterface};
use executor_types::NetworksConfig;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Privacy tier of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderTier {
	/// Regular public mempool endpoints.
	Public,
	/// Private relays that keep transactions out of the public mempool.
	Private,
}

/// Hands out live endpoints for a chain.
///
/// Endpoints are tried in configured order; the first one whose reported
/// chain id matches is returned. Pools are read-only after construction, so
/// acquisition never waits on another request.
pub struct ProviderResolver {
	pools: HashMap<(u64, ProviderTier), Vec<Arc<dyn DeliveryInterface>>>,
	check_timeout: Duration,
}

impl ProviderResolver {
	pub fn new(check_timeout: Duration) -> Self {
		Self {
			pools: HashMap::new(),
			check_timeout,
		}
	}

	/// Builds pools for every configured chain using `factory`.
	pub fn from_networks(
		networks: &NetworksConfig,
		factory: DeliveryFactory,
		check_timeout: Duration,
	) -> Result<Self, DeliveryError> {
		let mut resolver = Self::new(check_timeout);
		for (chain_id, network) in networks {
			let tiers = [
				(ProviderTier::Public, &network.rpc_urls),
				(ProviderTier::Private, &network.private_rpc_urls),
			];
			for (tier, urls) in tiers {
				for url in urls {
					let mut table = toml::map::Map::new();
					table.insert("rpc_url".to_string(), toml::Value::String(url.clone()));
					table.insert("chain_id".to_string(), toml::Value::Integer(*chain_id as i64));
					let provider = factory(&toml::Value::Table(table))?;
					resolver.register(*chain_id, tier, Arc::from(provider));
				}
			}
		}
		Ok(resolver)
	}

	/// Appends an endpoint to the pool of `(chain_id, tier)`.
	pub fn register(&mut self, chain_id: u64, tier: ProviderTier, provider: Arc<dyn DeliveryInterface>) {
		self.pools.entry((chain_id, tier)).or_default().push(provider);
	}

	/// Whether the chain has private endpoints.
	pub fn supports_private(&self, chain_id: u64) -> bool {
		self.pools
			.get(&(chain_id, ProviderTier::Private))
			.is_some_and(|pool| !pool.is_empty())
	}

	pub fn has_chain(&self, chain_id: u64) -> bool {
		self.pools.keys().any(|(chain, _)| *chain == chain_id)
	}

	/// Returns a live endpoint for the chain.
	///
	/// `use_private` selects the private tier; chains without private
	/// endpoints fall back to the public tier.
	///
	/// # Errors
	///
	/// `NoProviderAvailable` when no endpoint of the selected tier passes the
	/// liveness check.
	pub async fn get_provider(
		&self,
		chain_id: u64,
		use_private: bool,
	) -> Result<Arc<dyn DeliveryInterface>, DeliveryError> {
		let tier = if use_private && self.supports_private(chain_id) {
			ProviderTier::Private
		} else {
			if use_private {
				tracing::debug!(chain_id, "No private endpoints configured, using public tier");
			}
			ProviderTier::Public
		};

		let pool = self
			.pools
			.get(&(chain_id, tier))
			.ok_or(DeliveryError::NoProviderAvailable(chain_id))?;

		for provider in pool {
			match tokio::time::timeout(self.check_timeout, provider.chain_id()).await {
				Ok(Ok(reported)) if reported == chain_id => return Ok(provider.clone()),
				Ok(Ok(reported)) => {
					tracing::warn!(
						endpoint = %provider.endpoint(),
						expected = chain_id,
						reported,
						"Endpoint serves a different chain"
					);
				},
				Ok(Err(e)) => {
					tracing::warn!(endpoint = %provider.endpoint(), error = %e, "Endpoint failed liveness check");
				},
				Err(_) => {
					tracing::warn!(endpoint = %provider.endpoint(), "Endpoint liveness check timed out");
				},
			}
		}

		Err(DeliveryError::NoProviderAvailable(chain_id))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::MockDeliveryInterface;

	fn endpoint(name: &'static str, chain_id: Result<u64, ()>) -> Arc<dyn DeliveryInterface> {
		let mut mock = MockDeliveryInterface::new();
		mock.expect_endpoint().return_const(name.to_string());
		mock.expect_chain_id().returning(move || {
			chain_id.map_err(|_| DeliveryError::Network("connection refused".into()))
		});
		Arc::new(mock)
	}

	fn resolver() -> ProviderResolver {
		ProviderResolver::new(Duration::from_millis(100))
	}

	#[tokio::test]
	async fn test_skips_dead_and_mismatched_endpoints() {
		let mut resolver = resolver();
		resolver.register(1, ProviderTier::Public, endpoint("dead", Err(())));
		resolver.register(1, ProviderTier::Public, endpoint("wrong-chain", Ok(5)));
		resolver.register(1, ProviderTier::Public, endpoint("live", Ok(1)));

		let provider = resolver.get_provider(1, false).await.unwrap();
		assert_eq!(provider.endpoint(), "live");
	}

	#[tokio::test]
	async fn test_private_tier_selected_when_available() {
		let mut resolver = resolver();
		resolver.register(1, ProviderTier::Public, endpoint("public", Ok(1)));
		resolver.register(1, ProviderTier::Private, endpoint("private", Ok(1)));

		assert!(resolver.supports_private(1));
		assert_eq!(resolver.get_provider(1, true).await.unwrap().endpoint(), "private");
		assert_eq!(resolver.get_provider(1, false).await.unwrap().endpoint(), "public");
	}

	#[tokio::test]
	async fn test_falls_back_to_public_without_private_endpoints() {
		let mut resolver = resolver();
		resolver.register(10, ProviderTier::Public, endpoint("public", Ok(10)));

		assert!(!resolver.supports_private(10));
		assert_eq!(resolver.get_provider(10, true).await.unwrap().endpoint(), "public");
	}

	#[tokio::test]
	async fn test_no_live_endpoint() {
		let mut resolver = resolver();
		resolver.register(1, ProviderTier::Public, endpoint("dead", Err(())));

		assert!(matches!(
			resolver.get_provider(1, false).await,
			Err(DeliveryError::NoProviderAvailable(1))
		));
		assert!(matches!(
			resolver.get_provider(99, false).await,
			Err(DeliveryError::NoProviderAvailable(99))
		));
	}
}
