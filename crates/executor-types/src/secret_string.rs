//! Redacted string type for key material.
//!
//! Private keys read from configuration are wrapped in [`SecretString`] so
//! that they are zeroed on drop and never appear in logs, debug output or
//! serialized configuration dumps.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::Zeroizing;

const REDACTED: &str = "***REDACTED***";

/// A string that zeroes its memory on drop and redacts itself when printed
/// or serialized.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(Zeroizing<String>);

impl SecretString {
	pub fn new(value: String) -> Self {
		Self(Zeroizing::new(value))
	}

	/// Returns the secret. Do not log the result.
	pub fn expose_secret(&self) -> &str {
		&self.0
	}

	/// Runs `f` with the secret, limiting where it is visible.
	pub fn with_exposed<F, R>(&self, f: F) -> R
	where
		F: FnOnce(&str) -> R,
	{
		f(&self.0)
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "SecretString({})", REDACTED)
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(REDACTED)
	}
}

impl From<String> for SecretString {
	fn from(value: String) -> Self {
		Self::new(value)
	}
}

impl From<&str> for SecretString {
	fn from(value: &str) -> Self {
		Self::new(value.to_string())
	}
}

impl Serialize for SecretString {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(REDACTED)
	}
}

impl<'de> Deserialize<'de> for SecretString {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		String::deserialize(deserializer).map(Self::new)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_redacted_in_output() {
		let secret = SecretString::from("0xdeadbeef");
		assert_eq!(format!("{:?}", secret), "SecretString(***REDACTED***)");
		assert_eq!(secret.to_string(), "***REDACTED***");
		assert_eq!(
			serde_json::to_string(&secret).unwrap(),
			"\"***REDACTED***\""
		);
	}

	#[test]
	fn test_deserialize_keeps_value() {
		let secret: SecretString = serde_json::from_str("\"0xdeadbeef\"").unwrap();
		assert_eq!(secret.expose_secret(), "0xdeadbeef");
		assert_eq!(secret.with_exposed(|s| s.len()), 10);
	}
}
