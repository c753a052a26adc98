// Structured metadata attached to log entries

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single metadata value.
///
/// Untagged on the wire: `"x"`, `42`, `1.5`, `true` round-trip to the
/// matching variant (serde_json keeps integers and floats distinct).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::String(v.to_string())
    }
}

/// Key lookup is case-sensitive; only redaction matches case-insensitively.
pub type Metadata = HashMap<String, MetadataValue>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_roundtrip_keeps_variants() {
        let cases = vec![
            MetadataValue::Bool(true),
            MetadataValue::Int(42),
            MetadataValue::Double(1.5),
            // 5.0 must stay a Double: serde_json renders it as "5.0".
            MetadataValue::Double(5.0),
            MetadataValue::String("x".into()),
        ];
        for value in cases {
            let json = serde_json::to_string(&value).expect("encode");
            let back: MetadataValue = serde_json::from_str(&json).expect("decode");
            assert_eq!(value, back);
        }
    }
}
