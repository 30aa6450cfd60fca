//! Note categories.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The category an agent assigns to a live note.
///
/// Categories are part of the note key and the front-matter, so the set is
/// closed: unknown strings are rejected at the tool boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Observation,
    Decision,
    Todo,
    Insight,
    Question,
    Progress,
    Issue,
}

impl Category {
    /// All categories, in the order they are documented to agents.
    pub const ALL: [Category; 7] = [
        Category::Observation,
        Category::Decision,
        Category::Todo,
        Category::Insight,
        Category::Question,
        Category::Progress,
        Category::Issue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Observation => "observation",
            Category::Decision => "decision",
            Category::Todo => "todo",
            Category::Insight => "insight",
            Category::Question => "question",
            Category::Progress => "progress",
            Category::Issue => "issue",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "observation" => Ok(Category::Observation),
            "decision" => Ok(Category::Decision),
            "todo" => Ok(Category::Todo),
            "insight" => Ok(Category::Insight),
            "question" => Ok(Category::Question),
            "progress" => Ok(Category::Progress),
            "issue" => Ok(Category::Issue),
            other => Err(UnknownCategory(other.to_string())),
        }
    }
}

/// Error returned when a category string is not one of the seven known values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown category '{0}' (expected one of: observation, decision, todo, insight, question, progress, issue)")]
pub struct UnknownCategory(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_all_categories() {
        for cat in Category::ALL {
            assert_eq!(cat.as_str().parse::<Category>().unwrap(), cat);
        }
    }

    #[test]
    fn rejects_unknown_category() {
        let err = "remark".parse::<Category>().unwrap_err();
        assert!(err.to_string().contains("remark"));
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&Category::Todo).unwrap();
        assert_eq!(json, "\"todo\"");
    }
}
