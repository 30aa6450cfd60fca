//! YAML front-matter for live notes.
//!
//! A stored note is a `---` fenced YAML block followed by the free-form
//! Markdown body the agent wrote. All fields except `tags` are mandatory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Category;

/// Front-matter carried by every live note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontMatter {
    pub timestamp: DateTime<Utc>,
    pub agent: String,
    pub category: Category,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub space: String,
}

impl FrontMatter {
    /// Render the full note: fenced front-matter followed by the body.
    pub fn render(&self, body: &str) -> Result<String, FrontMatterError> {
        let yaml = serde_yaml::to_string(self)?;
        Ok(format!("---\n{yaml}---\n\n{body}"))
    }

    /// Split a stored note back into front-matter and body.
    pub fn parse(stored: &str) -> Result<(FrontMatter, String), FrontMatterError> {
        let rest = stored
            .strip_prefix("---\n")
            .ok_or(FrontMatterError::MissingFence)?;
        let (yaml, body) = rest
            .split_once("\n---\n")
            .ok_or(FrontMatterError::MissingFence)?;
        let front: FrontMatter = serde_yaml::from_str(yaml)?;
        Ok((front, body.trim_start_matches('\n').to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrontMatterError {
    #[error("note has no front-matter fence")]
    MissingFence,
    #[error("front-matter is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
