//! Input validation shared by every tool.
//!
//! The rules here mirror what agents are told in the tool descriptions, so a
//! rejected input always names the offending field.

use once_cell::sync::Lazy;
use regex::Regex;

/// Space ids and agent names: leading alphanumeric, then up to 63 more of
/// `[A-Za-z0-9_-]`.
static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,63}$").expect("static regex"));

/// Backup ids: `<space>/<YYYY-MM-DDTHH-MM-SS>`.
static BACKUP_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]+/\d{4}-\d{2}-\d{2}T\d{2}-\d{2}-\d{2}$").expect("static regex")
});

pub const MAX_CONTENT_CHARS: usize = 100_000;
pub const MAX_RULES_CHARS: usize = 50_000;
pub const MAX_DESCRIPTION_CHARS: usize = 500;

/// A validation failure, naming the field that was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

pub fn validate_space_id(space_id: &str) -> Result<(), ValidationError> {
    if NAME_RE.is_match(space_id) {
        Ok(())
    } else {
        Err(ValidationError::new(
            "space_id",
            "must start with a letter or digit and contain at most 64 chars of [A-Za-z0-9_-]",
        ))
    }
}

pub fn validate_agent(agent: &str) -> Result<(), ValidationError> {
    if NAME_RE.is_match(agent) {
        Ok(())
    } else {
        Err(ValidationError::new(
            "agent",
            "must start with a letter or digit and contain at most 64 chars of [A-Za-z0-9_-]",
        ))
    }
}

pub fn validate_content(content: &str) -> Result<(), ValidationError> {
    let len = content.chars().count();
    if len > MAX_CONTENT_CHARS {
        return Err(ValidationError::new(
            "content",
            format!("{len} chars exceeds the {MAX_CONTENT_CHARS} char limit"),
        ));
    }
    Ok(())
}

pub fn validate_rules(rules: &str) -> Result<(), ValidationError> {
    let len = rules.chars().count();
    if rules.trim().is_empty() {
        return Err(ValidationError::new("rules", "must not be empty"));
    }
    if len > MAX_RULES_CHARS {
        return Err(ValidationError::new(
            "rules",
            format!("{len} chars exceeds the {MAX_RULES_CHARS} char limit"),
        ));
    }
    Ok(())
}

pub fn validate_description(description: &str) -> Result<(), ValidationError> {
    let len = description.chars().count();
    if len > MAX_DESCRIPTION_CHARS {
        return Err(ValidationError::new(
            "description",
            format!("{len} chars exceeds the {MAX_DESCRIPTION_CHARS} char limit"),
        ));
    }
    Ok(())
}

/// Bank filenames come from the language model, so they get the same
/// traversal checks as user input.
pub fn validate_bank_filename(filename: &str) -> Result<(), ValidationError> {
    if filename.is_empty() {
        return Err(ValidationError::new("filename", "must not be empty"));
    }
    if filename.starts_with('/') {
        return Err(ValidationError::new("filename", "must not start with '/'"));
    }
    if filename.split('/').any(|seg| seg == "..") {
        return Err(ValidationError::new("filename", "must not contain '..'"));
    }
    Ok(())
}

pub fn validate_backup_id(backup_id: &str) -> Result<(), ValidationError> {
    if BACKUP_ID_RE.is_match(backup_id) {
        Ok(())
    } else {
        Err(ValidationError::new(
            "backup_id",
            "must look like <space>/<YYYY-MM-DDTHH-MM-SS>",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn space_id_boundaries() {
        assert!(validate_space_id(&"a".repeat(64)).is_ok());
        assert!(validate_space_id(&"a".repeat(65)).is_err());
        assert!(validate_space_id("7teams").is_ok());
        assert!(validate_space_id("_hidden").is_err());
        assert!(validate_space_id("-dash").is_err());
        assert!(validate_space_id("").is_err());
        assert!(validate_space_id("demo space").is_err());
    }

    #[test]
    fn content_boundary_is_exact() {
        assert!(validate_content(&"x".repeat(MAX_CONTENT_CHARS)).is_ok());
        assert!(validate_content(&"x".repeat(MAX_CONTENT_CHARS + 1)).is_err());
    }

    #[test]
    fn rules_must_be_present_and_bounded() {
        assert!(validate_rules("  \n").is_err());
        assert!(validate_rules(&"r".repeat(MAX_RULES_CHARS)).is_ok());
        assert!(validate_rules(&"r".repeat(MAX_RULES_CHARS + 1)).is_err());
    }

    #[test]
    fn bank_filename_traversal_is_rejected() {
        assert!(validate_bank_filename("journal.md").is_ok());
        assert!(validate_bank_filename("notes/journal.md").is_ok());
        assert!(validate_bank_filename("").is_err());
        assert!(validate_bank_filename("/etc/passwd").is_err());
        assert!(validate_bank_filename("../escape.md").is_err());
        assert!(validate_bank_filename("a/../b.md").is_err());
    }

    #[test]
    fn backup_id_shape() {
        assert!(validate_backup_id("demo/2026-07-14T09-30-05").is_ok());
        assert!(validate_backup_id("demo/2026-07-14").is_err());
        assert!(validate_backup_id("demo").is_err());
        assert!(validate_backup_id("de mo/2026-07-14T09-30-05").is_err());
    }

    #[test]
    fn validation_error_names_the_field() {
        let err = validate_space_id("!").unwrap_err();
        assert_eq!(err.field, "space_id");
        assert!(err.to_string().starts_with("invalid space_id"));
    }
}
