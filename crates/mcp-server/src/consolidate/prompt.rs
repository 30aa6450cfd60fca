//! Prompt construction and reply validation for consolidation.
//!
//! The model is asked for a single JSON object; everything else it might do
//! (markdown fences, prose preambles) is treated as a malformed reply and
//! retried once with a stricter reformulation before the run is aborted.

use note_format::FrontMatter;
use serde::Deserialize;

pub const SYSTEM_PROMPT: &str = "\
You are the consolidation engine of a shared working-memory service. \
Multiple agents have written short timestamped notes; your job is to fold \
them into the space's memory bank, a small set of Markdown documents whose \
shape is defined by the space rules.

Reply with a single JSON object and nothing else:
{\"bank_files\": [{\"filename\": \"<name>.md\", \"content\": \"<full markdown body>\", \"action\": \"created\" | \"updated\"}], \"synthesis\": \"<residual summary>\"}

Requirements:
- Follow the space rules for which files exist and what belongs in each.
- Each bank file content is the complete new body, not a diff.
- Only include files you are creating or changing; untouched files are omitted.
- Filenames are plain relative names; never use '..' or a leading '/'.
- The synthesis is a compact residual summary carrying cross-consolidation \
context for the next run; keep it under a page.
- Preserve concrete facts, decisions, and open questions from the notes.";

pub const STRICT_RETRY_PROMPT: &str = "\
Your previous reply could not be parsed as JSON. Reply again with ONLY a raw \
JSON object, no markdown fences, no commentary, exactly this shape: \
{\"bank_files\": [{\"filename\": string, \"content\": string, \"action\": \
\"created\" | \"updated\"}], \"synthesis\": string}";

/// A note as presented to the model.
#[derive(Debug, Clone)]
pub struct NoteForPrompt {
    pub filename: String,
    pub front: FrontMatter,
    pub body: String,
}

/// The validated model reply.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsolidationReply {
    pub bank_files: Vec<BankFileUpdate>,
    pub synthesis: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BankFileUpdate {
    pub filename: String,
    pub content: String,
    pub action: BankAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BankAction {
    Created,
    Updated,
}

/// Build the user prompt: rules, previous synthesis, notes in chronological
/// order, and the current bank files verbatim.
pub fn build_user_prompt(
    rules: &str,
    synthesis: Option<&str>,
    notes: &[NoteForPrompt],
    bank: &[(String, String)],
) -> String {
    let mut out = String::new();
    out.push_str("## Space rules\n\n");
    out.push_str(rules);
    out.push_str("\n\n## Previous synthesis\n\n");
    match synthesis {
        Some(s) if !s.trim().is_empty() => out.push_str(s),
        _ => out.push_str("none"),
    }

    out.push_str("\n\n## Notes to consolidate (chronological)\n");
    for note in notes {
        let tags = if note.front.tags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", note.front.tags.join(", "))
        };
        out.push_str(&format!(
            "\n### {} | {} | {}{}\n{}\n",
            note.front.timestamp.to_rfc3339(),
            note.front.agent,
            note.front.category,
            tags,
            note.body
        ));
    }

    out.push_str("\n## Current bank files\n");
    if bank.is_empty() {
        out.push_str("\n(none yet)\n");
    }
    for (filename, content) in bank {
        out.push_str(&format!("\n### {filename}\n{content}\n"));
    }
    out
}

/// Parse and validate a model reply.
pub fn parse_reply(text: &str) -> Result<ConsolidationReply, ReplyError> {
    let raw = strip_fences(text);
    let reply: ConsolidationReply =
        serde_json::from_str(raw).map_err(|e| ReplyError::Json(e.to_string()))?;

    for file in &reply.bank_files {
        note_format::validate_bank_filename(&file.filename)
            .map_err(|e| ReplyError::BadFilename(e.to_string()))?;
    }
    Ok(reply)
}

/// Models occasionally wrap JSON-mode output in a markdown fence anyway.
fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

#[derive(Debug, thiserror::Error)]
pub enum ReplyError {
    #[error("reply is not the expected JSON object: {0}")]
    Json(String),
    #[error("reply contains an invalid bank filename: {0}")]
    BadFilename(String),
}
