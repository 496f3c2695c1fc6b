//! Reference adapters for the signature and schema ports.

use crate::ports::{SchemaValidator, SignatureVerifier};
use docketchain_core::{
    into_result, Address, ErrorCode, PublicKey, SchemaRef, Signature, ValidationIssue,
    ValidationResult,
};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Ed25519 verifier keyed by address.
#[derive(Default)]
pub struct KeyRegistry {
    keys: RwLock<HashMap<Address, PublicKey>>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the public key behind an address.
    pub fn register(&self, address: Address, public_key: PublicKey) {
        self.keys.write().insert(address, public_key);
    }

    pub fn remove(&self, address: &Address) -> Option<PublicKey> {
        self.keys.write().remove(address)
    }

    pub fn get(&self, address: &Address) -> Option<PublicKey> {
        self.keys.read().get(address).cloned()
    }

    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }
}

impl SignatureVerifier for KeyRegistry {
    fn verify_signature(&self, signer: &Address, message: &[u8], signature: &Signature) -> bool {
        match self.keys.read().get(signer) {
            Some(key) => key.verify(message, signature).is_ok(),
            None => false,
        }
    }
}

/// Schemas described as a set of required top-level JSON fields.
///
/// A payload conforms when it parses as a JSON object that carries every
/// required field of its schema.
#[derive(Default)]
pub struct JsonSchemaRegistry {
    schemas: RwLock<HashMap<SchemaRef, Vec<String>>>,
}

impl JsonSchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<I, S>(&self, schema: SchemaRef, required_fields: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields = required_fields.into_iter().map(Into::into).collect();
        self.schemas.write().insert(schema, fields);
    }

    pub fn contains(&self, schema: &SchemaRef) -> bool {
        self.schemas.read().contains_key(schema)
    }
}

impl SchemaValidator for JsonSchemaRegistry {
    fn validate_payload(&self, schema: &SchemaRef, data: &[u8]) -> ValidationResult {
        let schemas = self.schemas.read();
        let Some(required) = schemas.get(schema) else {
            return into_result(vec![ValidationIssue::new(
                ErrorCode::Schema,
                "payload.schema",
                format!("unknown schema {}", schema.as_str()),
            )]);
        };

        let value: serde_json::Value = match serde_json::from_slice(data) {
            Ok(v) => v,
            Err(e) => {
                return into_result(vec![ValidationIssue::new(
                    ErrorCode::Schema,
                    "payload.data",
                    format!("payload is not valid JSON: {e}"),
                )])
            }
        };
        let Some(object) = value.as_object() else {
            return into_result(vec![ValidationIssue::new(
                ErrorCode::Schema,
                "payload.data",
                "payload must be a JSON object",
            )]);
        };

        let issues = required
            .iter()
            .filter(|field| !object.contains_key(field.as_str()))
            .map(|field| {
                ValidationIssue::new(
                    ErrorCode::Schema,
                    format!("payload.{field}"),
                    "required field missing",
                )
            })
            .collect();
        into_result(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docketchain_core::Keypair;

    #[test]
    fn test_key_registry_verifies_registered_signer() {
        let registry = KeyRegistry::new();
        let kp = Keypair::generate();
        let alice = Address::new_unchecked("alice");
        registry.register(alice.clone(), kp.public_key.clone());

        let sig = kp.sign(b"msg");
        assert!(registry.verify_signature(&alice, b"msg", &sig));
        assert!(!registry.verify_signature(&alice, b"other", &sig));
        assert!(!registry.verify_signature(&Address::new_unchecked("bob"), b"msg", &sig));
    }

    #[test]
    fn test_schema_registry_required_fields() {
        let registry = JsonSchemaRegistry::new();
        let schema = SchemaRef::new("transfer/v1");
        registry.register(schema.clone(), ["amount", "asset"]);

        assert!(registry
            .validate_payload(&schema, br#"{"amount":1,"asset":"x"}"#)
            .is_ok());

        let err = registry
            .validate_payload(&schema, br#"{"amount":1}"#)
            .unwrap_err();
        assert_eq!(err.issues().len(), 1);
        assert_eq!(err.issues()[0].field, "payload.asset");
    }

    #[test]
    fn test_schema_registry_rejects_unknown_and_malformed() {
        let registry = JsonSchemaRegistry::new();
        let schema = SchemaRef::new("note/v1");
        assert!(registry.validate_payload(&schema, b"{}").is_err());

        registry.register(schema.clone(), Vec::<String>::new());
        assert!(registry.validate_payload(&schema, b"not json").is_err());
        assert!(registry.validate_payload(&schema, b"[1,2]").is_err());
        assert!(registry.validate_payload(&schema, b"{}").is_ok());
    }
}
