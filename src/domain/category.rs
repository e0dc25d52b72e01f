use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Seeded at startup; can never be deleted.
pub const UNCATEGORIZED_SLUG: &str = "uncategorized";
pub const UNCATEGORIZED_NAME: &str = "Uncategorized";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    #[serde(default)]
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Category {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            slug: String::new(),
            name: name.into(),
            description: description.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_protected(&self) -> bool {
        self.slug == UNCATEGORIZED_SLUG
    }
}
