// Redaction — case-insensitive substitution of sensitive values before
// anything leaves the process

use crate::config::PrivacyConfig;
use crate::model::{Metadata, MetadataValue};
use std::collections::{HashMap, HashSet};
use url::Url;

/// Pure redaction over headers, metadata maps, and URL query parameters.
///
/// The configured name sets are lowercased once at construction; matching is
/// case-insensitive while the map keys themselves are preserved verbatim.
/// Redaction is idempotent: re-redacting output is a no-op.
#[derive(Debug, Clone)]
pub struct Redactor {
    headers: HashSet<String>,
    metadata_keys: HashSet<String>,
    query_params: HashSet<String>,
    placeholder: String,
}

impl Redactor {
    pub fn new(config: &PrivacyConfig) -> Self {
        let lower = |names: &[String]| {
            names
                .iter()
                .map(|n| n.to_lowercase())
                .collect::<HashSet<_>>()
        };
        Redactor {
            headers: lower(&config.redacted_headers),
            metadata_keys: lower(&config.redacted_metadata_keys),
            query_params: lower(&config.redacted_query_params),
            placeholder: config.placeholder.clone(),
        }
    }

    pub fn placeholder(&self) -> &str {
        &self.placeholder
    }

    /// Copy of `headers` with every configured name mapped to the
    /// placeholder.
    pub fn redact_headers(&self, headers: &HashMap<String, String>) -> HashMap<String, String> {
        headers
            .iter()
            .map(|(key, value)| {
                if self.headers.contains(&key.to_lowercase()) {
                    (key.clone(), self.placeholder.clone())
                } else {
                    (key.clone(), value.clone())
                }
            })
            .collect()
    }

    /// Same rule over metadata; matched values become `String(placeholder)`
    /// whatever their original variant.
    pub fn redact_metadata(&self, metadata: &Metadata) -> Metadata {
        metadata
            .iter()
            .map(|(key, value)| {
                if self.metadata_keys.contains(&key.to_lowercase()) {
                    (key.clone(), MetadataValue::String(self.placeholder.clone()))
                } else {
                    (key.clone(), value.clone())
                }
            })
            .collect()
    }

    /// Rewrite matched query parameter values in `raw`.
    ///
    /// URLs the parser rejects pass through unchanged rather than being
    /// dropped.
    pub fn redact_url(&self, raw: &str) -> String {
        let Ok(mut url) = Url::parse(raw) else {
            return raw.to_string();
        };

        let query: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if query.is_empty() {
            return raw.to_string();
        }

        let mut touched = false;
        let rewritten: Vec<(String, String)> = query
            .into_iter()
            .map(|(name, value)| {
                if self.query_params.contains(&name.to_lowercase()) {
                    touched = true;
                    (name, self.placeholder.clone())
                } else {
                    (name, value)
                }
            })
            .collect();

        if !touched {
            return raw.to_string();
        }

        url.query_pairs_mut().clear().extend_pairs(rewritten);
        url.to_string()
    }
}
