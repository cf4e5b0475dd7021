//! Local private-key accounts.
//!
//! Keys are read from the configuration (usually through `${VAR}`
//! substitution) and held in memory by a [`PrivateKeySigner`].

use crate::{AccountError, AccountFactory, AccountInterface, AccountRegistry};
use alloy_consensus::{TxEnvelope, TypedTransaction};
use alloy_dyn_abi::TypedData;
use alloy_network::{Ethereum, EthereumWallet, NetworkWallet};
use alloy_primitives::{Address, Signature, B256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use executor_types::{
	without_0x_prefix, ConfigSchema, Field, FieldType, ImplementationRegistry, Schema,
	SecretString, ValidationError,
};

/// A single account backed by an in-memory private key.
pub struct LocalAccount {
	signer: PrivateKeySigner,
	wallet: EthereumWallet,
}

impl std::fmt::Debug for LocalAccount {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("LocalAccount")
			.field("address", &self.signer.address())
			.finish()
	}
}

impl LocalAccount {
	/// Parses a hex-encoded private key, with or without 0x prefix.
	pub fn from_key(private_key: &str) -> Result<Self, AccountError> {
		Self::from_secret(&SecretString::from(private_key))
	}

	pub fn from_secret(private_key: &SecretString) -> Result<Self, AccountError> {
		let signer = private_key
			.with_exposed(|key| key.parse::<PrivateKeySigner>())
			.map_err(|e| AccountError::InvalidKey(e.to_string()))?;
		let wallet = EthereumWallet::from(signer.clone());
		Ok(Self { signer, wallet })
	}
}

#[async_trait]
impl AccountInterface for LocalAccount {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(LocalAccountSchema)
	}

	fn address(&self) -> Address {
		self.signer.address()
	}

	async fn sign_hash(&self, hash: &B256) -> Result<Signature, AccountError> {
		self.signer
			.sign_hash_sync(hash)
			.map_err(|e| AccountError::SigningFailed(e.to_string()))
	}

	async fn sign_message(&self, message: &[u8]) -> Result<Signature, AccountError> {
		self.signer
			.sign_message_sync(message)
			.map_err(|e| AccountError::SigningFailed(e.to_string()))
	}

	async fn sign_typed_data(&self, typed_data: &TypedData) -> Result<Signature, AccountError> {
		let hash = typed_data
			.eip712_signing_hash()
			.map_err(|e| AccountError::SigningFailed(format!("Invalid typed data: {}", e)))?;
		self.sign_hash(&hash).await
	}

	async fn sign_transaction(&self, tx: TypedTransaction) -> Result<TxEnvelope, AccountError> {
		NetworkWallet::<Ethereum>::sign_transaction_from(&self.wallet, self.signer.address(), tx)
			.await
			.map_err(|e| AccountError::SigningFailed(e.to_string()))
	}
}

fn check_private_key(value: &toml::Value) -> Result<(), String> {
	let key = value.as_str().unwrap_or_default();
	let hex = without_0x_prefix(key);
	if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
		return Err("private key must be 32 bytes of hex".to_string());
	}
	Ok(())
}

/// Configuration schema for local accounts.
///
/// Either `private_key` or `private_keys` must be present.
pub struct LocalAccountSchema;

impl ConfigSchema for LocalAccountSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![
				Field::new("private_key", FieldType::String).with_validator(check_private_key),
				Field::new("private_keys", FieldType::Array(Box::new(FieldType::String)))
					.with_validator(|value| {
						value
							.as_array()
							.into_iter()
							.flatten()
							.try_for_each(check_private_key)
					}),
			],
		);
		schema.validate(config)?;

		if config.get("private_key").is_none() && config.get("private_keys").is_none() {
			return Err(ValidationError::MissingField("private_key".to_string()));
		}
		Ok(())
	}
}

/// Factory function to create local accounts from configuration.
///
/// Configuration parameters:
/// - `private_key`: a single hex-encoded key
/// - `private_keys`: several hex-encoded keys, one account each
pub fn create_account(config: &toml::Value) -> Result<Vec<Box<dyn AccountInterface>>, AccountError> {
	LocalAccountSchema
		.validate(config)
		.map_err(|e| AccountError::InvalidKey(format!("Invalid configuration: {}", e)))?;

	let single = config.get("private_key").and_then(|v| v.as_str());
	let many = config
		.get("private_keys")
		.and_then(|v| v.as_array())
		.into_iter()
		.flatten()
		.filter_map(|v| v.as_str());

	single
		.into_iter()
		.chain(many)
		.map(|key| {
			LocalAccount::from_secret(&SecretString::from(key))
				.map(|account| Box::new(account) as Box<dyn AccountInterface>)
		})
		.collect()
}

/// Registry for the local account implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "local";
	type Factory = AccountFactory;

	fn factory() -> Self::Factory {
		create_account
	}
}

impl AccountRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy_consensus::{SignableTransaction, TxEip1559};
	use alloy_primitives::{Bytes, TxKind, U256};

	const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
	const ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

	#[test]
	fn test_address_from_key() {
		let account = LocalAccount::from_key(KEY).unwrap();
		assert_eq!(account.address(), ADDRESS.parse::<Address>().unwrap());

		let unprefixed = LocalAccount::from_key(without_0x_prefix(KEY)).unwrap();
		assert_eq!(unprefixed.address(), account.address());
	}

	#[test]
	fn test_invalid_key_rejected() {
		assert!(matches!(
			LocalAccount::from_key("0x1234"),
			Err(AccountError::InvalidKey(_))
		));
	}

	#[tokio::test]
	async fn test_personal_sign_recovers_to_account() {
		let account = LocalAccount::from_key(KEY).unwrap();
		let signature = account.sign_message(b"hello").await.unwrap();
		assert_eq!(
			signature.recover_address_from_msg(b"hello").unwrap(),
			account.address()
		);
	}

	#[tokio::test]
	async fn test_typed_data_signing() {
		let account = LocalAccount::from_key(KEY).unwrap();
		let typed_data: TypedData = serde_json::from_value(serde_json::json!({
			"types": {
				"EIP712Domain": [
					{ "name": "name", "type": "string" },
					{ "name": "chainId", "type": "uint256" }
				],
				"Mail": [{ "name": "contents", "type": "string" }]
			},
			"primaryType": "Mail",
			"domain": { "name": "Test", "chainId": 1 },
			"message": { "contents": "hello" }
		}))
		.unwrap();

		let signature = account.sign_typed_data(&typed_data).await.unwrap();
		let hash = typed_data.eip712_signing_hash().unwrap();
		assert_eq!(
			signature.recover_address_from_prehash(&hash).unwrap(),
			account.address()
		);
	}

	#[tokio::test]
	async fn test_sign_transaction_produces_eip1559_envelope() {
		let account = LocalAccount::from_key(KEY).unwrap();
		let tx = TxEip1559 {
			chain_id: 1,
			nonce: 3,
			gas_limit: 21_000,
			max_fee_per_gas: 2_000_000_000,
			max_priority_fee_per_gas: 1_000_000_000,
			to: TxKind::Call(Address::repeat_byte(0x22)),
			value: U256::from(1u64),
			access_list: Default::default(),
			input: Bytes::new(),
		};
		let signing_hash = tx.signature_hash();

		let envelope = account
			.sign_transaction(TypedTransaction::Eip1559(tx))
			.await
			.unwrap();
		let signed = envelope.as_eip1559().unwrap();
		assert_eq!(signed.tx().nonce, 3);
		assert_eq!(
			signed
				.signature()
				.recover_address_from_prehash(&signing_hash)
				.unwrap(),
			account.address()
		);
	}

	#[test]
	fn test_factory_builds_one_account_per_key() {
		let config: toml::Value = toml::from_str(&format!(
			"private_keys = [\"{}\", \"0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d\"]",
			KEY
		))
		.unwrap();
		let accounts = create_account(&config).unwrap();
		assert_eq!(accounts.len(), 2);
		assert_ne!(accounts[0].address(), accounts[1].address());
	}

	#[test]
	fn test_factory_requires_a_key() {
		let config: toml::Value = toml::from_str("").unwrap();
		assert!(matches!(
			create_account(&config),
			Err(AccountError::InvalidKey(_))
		));
	}
}
