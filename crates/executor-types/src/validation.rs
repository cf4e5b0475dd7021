//! Schema validation for implementation tables in the TOML configuration.
//!
//! Every pluggable implementation (storage backend, account provider,
//! delivery endpoint) describes the shape of its configuration table with a
//! [`Schema`]. The schema is checked before the implementation is built, so
//! a typo in the configuration fails at start-up with the offending path.

use alloy_primitives::Address;
use thiserror::Error;

/// Errors that can occur during configuration validation.
#[derive(Debug, Error)]
pub enum ValidationError {
	#[error("Missing required field: {0}")]
	MissingField(String),
	#[error("Invalid value for field '{field}': {message}")]
	InvalidValue { field: String, message: String },
	#[error("Type mismatch for field '{field}': expected {expected}, got {actual}")]
	TypeMismatch {
		field: String,
		expected: String,
		actual: String,
	},
	#[error("Failed to deserialize config: {0}")]
	DeserializationError(String),
}

impl ValidationError {
	/// Prefixes the field path with `parent`.
	fn within(self, parent: &str) -> Self {
		let nest = |field: String| format!("{}.{}", parent, field);
		match self {
			Self::MissingField(field) => Self::MissingField(nest(field)),
			Self::InvalidValue { field, message } => Self::InvalidValue {
				field: nest(field),
				message,
			},
			Self::TypeMismatch {
				field,
				expected,
				actual,
			} => Self::TypeMismatch {
				field: nest(field),
				expected,
				actual,
			},
			other => other,
		}
	}

	fn mismatch(field: &str, expected: &str, value: &toml::Value) -> Self {
		Self::TypeMismatch {
			field: field.to_string(),
			expected: expected.to_string(),
			actual: value.type_str().to_string(),
		}
	}
}

/// Expected type of a configuration field.
#[derive(Debug)]
pub enum FieldType {
	String,
	/// Hex-encoded 20-byte address.
	Address,
	Integer {
		min: Option<i64>,
		max: Option<i64>,
	},
	Boolean,
	Array(Box<FieldType>),
	Table(Schema),
}

/// Extra check run after the type check passes.
pub type FieldValidator = Box<dyn Fn(&toml::Value) -> Result<(), String> + Send + Sync>;

/// A named field of a schema.
pub struct Field {
	pub name: String,
	pub field_type: FieldType,
	pub validator: Option<FieldValidator>,
}

impl std::fmt::Debug for Field {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Field")
			.field("name", &self.name)
			.field("field_type", &self.field_type)
			.field("has_validator", &self.validator.is_some())
			.finish()
	}
}

impl Field {
	pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
		Self {
			name: name.into(),
			field_type,
			validator: None,
		}
	}

	/// Attaches a custom check, run only when the type matches.
	pub fn with_validator<F>(mut self, validator: F) -> Self
	where
		F: Fn(&toml::Value) -> Result<(), String> + Send + Sync + 'static,
	{
		self.validator = Some(Box::new(validator));
		self
	}

	fn check(&self, value: &toml::Value) -> Result<(), ValidationError> {
		check_value(&self.name, value, &self.field_type)?;
		if let Some(validator) = &self.validator {
			validator(value).map_err(|message| ValidationError::InvalidValue {
				field: self.name.clone(),
				message,
			})?;
		}
		Ok(())
	}
}

/// Required and optional fields of a configuration table.
///
/// Unknown keys are accepted; only declared fields are checked.
#[derive(Debug)]
pub struct Schema {
	pub required: Vec<Field>,
	pub optional: Vec<Field>,
}

impl Schema {
	pub fn new(required: Vec<Field>, optional: Vec<Field>) -> Self {
		Self { required, optional }
	}

	/// Validates `config`, which must be a table.
	///
	/// # Errors
	///
	/// Fails on the first missing required field, type mismatch, out-of-range
	/// integer, or failing custom validator. Paths of nested tables are
	/// reported dotted, e.g. `retry.max_attempts`.
	pub fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let table = config
			.as_table()
			.ok_or_else(|| ValidationError::mismatch("root", "table", config))?;

		for field in &self.required {
			let value = table
				.get(&field.name)
				.ok_or_else(|| ValidationError::MissingField(field.name.clone()))?;
			field.check(value)?;
		}

		for field in &self.optional {
			if let Some(value) = table.get(&field.name) {
				field.check(value)?;
			}
		}

		Ok(())
	}
}

fn check_value(
	field: &str,
	value: &toml::Value,
	expected: &FieldType,
) -> Result<(), ValidationError> {
	match expected {
		FieldType::String => {
			value
				.as_str()
				.ok_or_else(|| ValidationError::mismatch(field, "string", value))?;
		},
		FieldType::Address => {
			let raw = value
				.as_str()
				.ok_or_else(|| ValidationError::mismatch(field, "address string", value))?;
			raw.parse::<Address>()
				.map_err(|e| ValidationError::InvalidValue {
					field: field.to_string(),
					message: format!("'{}' is not an address: {}", raw, e),
				})?;
		},
		FieldType::Integer { min, max } => {
			let number = value
				.as_integer()
				.ok_or_else(|| ValidationError::mismatch(field, "integer", value))?;
			if let Some(min) = min.filter(|min| number < *min) {
				return Err(ValidationError::InvalidValue {
					field: field.to_string(),
					message: format!("Value {} is less than minimum {}", number, min),
				});
			}
			if let Some(max) = max.filter(|max| number > *max) {
				return Err(ValidationError::InvalidValue {
					field: field.to_string(),
					message: format!("Value {} is greater than maximum {}", number, max),
				});
			}
		},
		FieldType::Boolean => {
			if !value.is_bool() {
				return Err(ValidationError::mismatch(field, "boolean", value));
			}
		},
		FieldType::Array(inner) => {
			let items = value
				.as_array()
				.ok_or_else(|| ValidationError::mismatch(field, "array", value))?;
			for (index, item) in items.iter().enumerate() {
				check_value(&format!("{}[{}]", field, index), item, inner)?;
			}
		},
		FieldType::Table(schema) => {
			schema.validate(value).map_err(|e| e.within(field))?;
		},
	}

	Ok(())
}

/// Validation contract implemented by every pluggable implementation.
pub trait ConfigSchema: Send + Sync {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError>;
}
