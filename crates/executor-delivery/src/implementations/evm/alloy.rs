//! Alloy-based EVM endpoint.

use crate::{DeliveryError, DeliveryFactory, DeliveryInterface, DeliveryRegistry};
use alloy_network::ReceiptResponse;
use alloy_primitives::{Address, Bytes, B256};
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_rpc_types::TransactionRequest;
use alloy_transport::{RpcError, TransportErrorKind};
use async_trait::async_trait;
use executor_types::{
	ConfigSchema, FeeEstimate, Field, FieldType, ImplementationRegistry, Schema,
	TransactionHash, TransactionReceipt, ValidationError,
};

/// One HTTP JSON-RPC endpoint.
pub struct AlloyDelivery {
	url: String,
	provider: DynProvider,
}

impl AlloyDelivery {
	pub fn new(url: &str) -> Result<Self, DeliveryError> {
		let parsed: reqwest::Url = url
			.parse()
			.map_err(|e| DeliveryError::Configuration(format!("Invalid RPC URL {}: {}", url, e)))?;
		let provider = ProviderBuilder::new().connect_http(parsed).erased();

		Ok(Self {
			url: url.to_string(),
			provider,
		})
	}
}

/// Maps an RPC error, keeping node-side rejections apart from transport
/// failures.
fn map_rpc_error(context: &str, err: RpcError<TransportErrorKind>) -> DeliveryError {
	match err.as_error_resp() {
		Some(payload) => DeliveryError::Rejected(payload.message.to_string()),
		None => DeliveryError::Network(format!("{}: {}", context, err)),
	}
}

#[async_trait]
impl DeliveryInterface for AlloyDelivery {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(AlloyDeliverySchema)
	}

	fn endpoint(&self) -> String {
		self.url.clone()
	}

	async fn chain_id(&self) -> Result<u64, DeliveryError> {
		self.provider
			.get_chain_id()
			.await
			.map_err(|e| DeliveryError::Network(format!("Failed to get chain id: {}", e)))
	}

	async fn pending_nonce(&self, address: Address) -> Result<u64, DeliveryError> {
		self.provider
			.get_transaction_count(address)
			.pending()
			.await
			.map_err(|e| DeliveryError::Network(format!("Failed to get nonce: {}", e)))
	}

	async fn get_code(&self, address: Address) -> Result<Bytes, DeliveryError> {
		self.provider
			.get_code_at(address)
			.await
			.map_err(|e| DeliveryError::Network(format!("Failed to get code: {}", e)))
	}

	async fn estimate_fees(&self) -> Result<FeeEstimate, DeliveryError> {
		let estimate = self
			.provider
			.estimate_eip1559_fees()
			.await
			.map_err(|e| DeliveryError::Network(format!("Failed to estimate fees: {}", e)))?;

		Ok(FeeEstimate {
			max_fee_per_gas: estimate.max_fee_per_gas,
			max_priority_fee_per_gas: estimate.max_priority_fee_per_gas,
		})
	}

	async fn estimate_gas(&self, request: TransactionRequest) -> Result<u64, DeliveryError> {
		self.provider
			.estimate_gas(request)
			.await
			.map_err(|e| map_rpc_error("Failed to estimate gas", e))
	}

	async fn send_raw(&self, raw: &[u8]) -> Result<TransactionHash, DeliveryError> {
		let pending = self
			.provider
			.send_raw_transaction(raw)
			.await
			.map_err(|e| map_rpc_error("Failed to send transaction", e))?;

		Ok(TransactionHash(pending.tx_hash().0.to_vec()))
	}

	async fn get_receipt(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, DeliveryError> {
		if hash.0.len() != 32 {
			return Err(DeliveryError::Network(format!(
				"Invalid transaction hash {}",
				hash
			)));
		}

		let receipt = self
			.provider
			.get_transaction_receipt(B256::from_slice(&hash.0))
			.await
			.map_err(|e| DeliveryError::Network(format!("Failed to get receipt: {}", e)))?;

		Ok(receipt.map(|receipt| TransactionReceipt {
			hash: TransactionHash(ReceiptResponse::transaction_hash(&receipt).0.to_vec()),
			block_number: ReceiptResponse::block_number(&receipt).unwrap_or(0),
			success: ReceiptResponse::status(&receipt),
		}))
	}

	async fn get_block_number(&self) -> Result<u64, DeliveryError> {
		self.provider
			.get_block_number()
			.await
			.map_err(|e| DeliveryError::Network(format!("Failed to get block number: {}", e)))
	}
}

/// Configuration schema for an Alloy endpoint.
pub struct AlloyDeliverySchema;

impl ConfigSchema for AlloyDeliverySchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![
				Field::new("rpc_url", FieldType::String).with_validator(|value| {
					match value.as_str() {
						Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
							Ok(())
						},
						_ => Err("rpc_url must be an http(s) URL".to_string()),
					}
				}),
				Field::new(
					"chain_id",
					FieldType::Integer {
						min: Some(1),
						max: None,
					},
				),
			],
			vec![],
		);

		schema.validate(config)
	}
}

/// Factory function to create an Alloy endpoint.
///
/// Configuration parameters:
/// - `rpc_url`: HTTP(S) JSON-RPC endpoint
/// - `chain_id`: chain the endpoint must serve
pub fn create_http_delivery(
	config: &toml::Value,
) -> Result<Box<dyn DeliveryInterface>, DeliveryError> {
	AlloyDeliverySchema
		.validate(config)
		.map_err(|e| DeliveryError::Configuration(format!("Invalid configuration: {}", e)))?;

	let url = config
		.get("rpc_url")
		.and_then(|v| v.as_str())
		.ok_or_else(|| DeliveryError::Configuration("rpc_url is required".to_string()))?;

	Ok(Box::new(AlloyDelivery::new(url)?))
}

/// Registry for the Alloy delivery implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "evm_alloy";
	type Factory = DeliveryFactory;

	fn factory() -> Self::Factory {
		create_http_delivery
	}
}

impl DeliveryRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;

	fn endpoint_config(url: &str) -> toml::Value {
		toml::Value::Table(toml::map::Map::from_iter([
			("rpc_url".to_string(), toml::Value::String(url.to_string())),
			("chain_id".to_string(), toml::Value::Integer(1)),
		]))
	}

	#[test]
	fn test_factory_accepts_http_endpoint() {
		let delivery = create_http_delivery(&endpoint_config("http://localhost:8545")).unwrap();
		assert_eq!(delivery.endpoint(), "http://localhost:8545");
	}

	#[test]
	fn test_factory_rejects_non_http_endpoint() {
		assert!(matches!(
			create_http_delivery(&endpoint_config("ws://localhost:8546")),
			Err(DeliveryError::Configuration(_))
		));
	}
}
