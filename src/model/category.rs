// Log categories — identity is the identifier string, the glyph is cosmetic

use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// A named stream of log entries.
///
/// Equality and hashing consider only the identifier, so a user-defined
/// `Category::new("network", None)` collides with [`Category::NETWORK`]
/// on purpose: the glyph is presentation only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: Cow<'static, str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glyph: Option<Cow<'static, str>>,
}

impl Category {
    pub const APP: Category = Category::predefined("app", "📱");
    pub const NETWORK: Category = Category::predefined("network", "🌐");
    pub const CRASH: Category = Category::predefined("crash", "💥");
    pub const UI: Category = Category::predefined("ui", "🖼");
    pub const BLUETOOTH: Category = Category::predefined("bluetooth", "📡");
    pub const LIFECYCLE: Category = Category::predefined("lifecycle", "🔄");
    pub const PERFORMANCE: Category = Category::predefined("performance", "📈");

    const fn predefined(id: &'static str, glyph: &'static str) -> Self {
        Category {
            id: Cow::Borrowed(id),
            glyph: Some(Cow::Borrowed(glyph)),
        }
    }

    pub fn new(id: impl Into<String>, glyph: Option<String>) -> Self {
        Category {
            id: Cow::Owned(id.into()),
            glyph: glyph.map(Cow::Owned),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl From<&str> for Category {
    fn from(id: &str) -> Self {
        Category::new(id, None)
    }
}

impl From<String> for Category {
    fn from(id: String) -> Self {
        Category::new(id, None)
    }
}

impl PartialEq for Category {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Category {}

impl std::hash::Hash for Category {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_identity_is_the_identifier_only() {
        let bare: Category = "network".into();
        assert_eq!(bare, Category::NETWORK);

        let mut set = HashSet::new();
        set.insert(Category::NETWORK);
        assert!(set.contains(&bare));
        assert!(!set.contains(&Category::from("db")));

        let custom = Category::new("payments", Some("💳".to_string()));
        assert_ne!(custom, Category::APP);
    }
}
