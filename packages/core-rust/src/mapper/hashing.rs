//! Hashing mapper: replaces a field with a hex-encoded digest of its value.
//!
//! The output field is named `targetField + fieldNameSuffix` (default
//! suffix `_hashed`) and is always a string.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

use super::{Mapper, MapperConfig, MapperError};
use crate::schema::{Field, FieldType};

/// Operation name of the hashing mapper.
pub const HASHING: &str = "hashing";

/// Default suffix appended to the hashed field name.
pub const DEFAULT_FIELD_NAME_SUFFIX: &str = "_hashed";

/// Digest algorithm used by the hashing mapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HashingMethod {
    #[serde(rename = "SHA-224")]
    Sha224,
    #[default]
    #[serde(rename = "SHA-256")]
    Sha256,
    #[serde(rename = "SHA-384")]
    Sha384,
    #[serde(rename = "SHA-512")]
    Sha512,
}

impl HashingMethod {
    /// Hex-encoded digest of `input`.
    #[must_use]
    pub fn digest_hex(self, input: &[u8]) -> String {
        match self {
            Self::Sha224 => hex::encode(Sha224::digest(input)),
            Self::Sha256 => hex::encode(Sha256::digest(input)),
            Self::Sha384 => hex::encode(Sha384::digest(input)),
            Self::Sha512 => hex::encode(Sha512::digest(input)),
        }
    }
}

/// Typed configuration of a hashing mapper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashingConfig {
    pub target_field: String,
    #[serde(default)]
    pub method: HashingMethod,
    #[serde(default = "default_suffix")]
    pub field_name_suffix: String,
}

fn default_suffix() -> String {
    DEFAULT_FIELD_NAME_SUFFIX.to_string()
}

impl HashingConfig {
    #[must_use]
    pub fn new(target_field: impl Into<String>) -> Self {
        Self {
            target_field: target_field.into(),
            method: HashingMethod::default(),
            field_name_suffix: default_suffix(),
        }
    }

    /// Parses the opaque config of a [`MapperConfig`].
    ///
    /// # Errors
    ///
    /// Returns an invalid-config error when the mapper is not a hashing
    /// mapper or its config does not deserialize (unknown method, missing
    /// target field, ...).
    pub fn from_mapper(mapper: &MapperConfig) -> Result<Self, MapperError> {
        if mapper.name != HASHING {
            return Err(MapperError::invalid_config(format!(
                "expected a '{HASHING}' mapper, got '{}'",
                mapper.name
            )));
        }
        serde_json::from_value(mapper.config.clone())
            .map_err(|e| MapperError::invalid_config(format!("invalid hashing config: {e}")))
    }

    /// Builds the declared mapper for this config.
    #[must_use]
    pub fn to_mapper(&self) -> MapperConfig {
        MapperConfig::new(
            HASHING,
            json!({
                "targetField": self.target_field,
                "method": self.method,
                "fieldNameSuffix": self.field_name_suffix,
            }),
        )
    }

    /// Name of the field the mapper writes.
    #[must_use]
    pub fn output_field(&self) -> String {
        format!("{}{}", self.target_field, self.field_name_suffix)
    }
}

/// Built-in hashing mapper.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashingMapper;

impl Mapper for HashingMapper {
    fn name(&self) -> &'static str {
        HASHING
    }

    fn schema(&self, config: &MapperConfig, fields: Vec<Field>) -> Result<Vec<Field>, MapperError> {
        let config = HashingConfig::from_mapper(config)?;
        let output = config.output_field();

        let target = fields
            .iter()
            .find(|f| f.name == config.target_field)
            .ok_or_else(|| {
                MapperError::invalid_config(format!(
                    "field '{}' not found in stream",
                    config.target_field
                ))
            })?;
        if !target.field_type.is_key_compatible() {
            return Err(MapperError::invalid_config(format!(
                "field '{}' of type {:?} cannot be hashed",
                config.target_field, target.field_type
            )));
        }
        if fields.iter().any(|f| f.name == output) {
            return Err(MapperError::invalid_config(format!(
                "hashed field '{output}' already exists in stream"
            )));
        }

        Ok(fields
            .into_iter()
            .map(|f| {
                if f.name == config.target_field {
                    Field::new(output.clone(), FieldType::String)
                } else {
                    f
                }
            })
            .collect())
    }

    fn map_record(
        &self,
        config: &MapperConfig,
        record: &mut Map<String, Value>,
    ) -> Result<(), MapperError> {
        let config = HashingConfig::from_mapper(config)?;
        let Some(value) = record.remove(&config.target_field) else {
            return Ok(());
        };
        let hashed = match value {
            Value::Null => Value::Null,
            Value::String(s) => Value::String(config.method.digest_hex(s.as_bytes())),
            other => Value::String(config.method.digest_hex(other.to_string().as_bytes())),
        };
        record.insert(config.output_field(), hashed);
        Ok(())
    }
}
