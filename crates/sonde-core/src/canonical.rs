//! Canonical serialisation used by the audit hash chain and by message
//! signing (spec.md §4.C, §4.D, §9 "Hash-chain canonicalisation").
//!
//! Canonical here means: a fixed field order, integers as JSON numbers,
//! timestamps as RFC3339 strings, and no inserted whitespace. Two
//! implementations of this hub on different database files must agree
//! byte-for-byte, so this function is only safe to call on a concrete
//! `Serialize` struct (whose field order is its declaration order) —
//! never on a `serde_json::Value`/`HashMap`, whose key order is not
//! guaranteed to match across languages or serde feature flags.

use serde::Serialize;

use crate::error::HubError;

/// Serialise `value` to its canonical compact-JSON byte representation.
pub fn canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, HubError> {
    serde_json::to_vec(value).map_err(|err| HubError::Internal(format!("canonicalisation failed: {err}")))
}

/// Convenience wrapper returning the canonical bytes as a UTF-8 string.
pub fn canonical_json_string<T: Serialize>(value: &T) -> Result<String, HubError> {
    canonical_json_bytes(value)
        .map(|bytes| String::from_utf8(bytes).expect("serde_json output is always valid utf-8"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Example {
        b: u32,
        a: u32,
    }

    #[test]
    fn preserves_struct_declaration_order() {
        let value = Example { b: 2, a: 1 };
        let encoded = canonical_json_string(&value).unwrap();
        assert_eq!(encoded, r#"{"b":2,"a":1}"#);
    }

    #[test]
    fn produces_no_whitespace() {
        let value = Example { b: 2, a: 1 };
        let encoded = canonical_json_string(&value).unwrap();
        assert!(!encoded.contains(' '));
        assert!(!encoded.contains('\n'));
    }
}
