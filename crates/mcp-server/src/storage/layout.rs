//! Key layout of the bucket.
//!
//! ```text
//! S/_meta.json        space metadata (mutable)
//! S/_rules.md         consolidation rules, written once at creation
//! S/_synthesis.md     residual summary from the last consolidation
//! S/live/.keep        sentinel so the prefix is never empty
//! S/live/<note-key>   one markdown file per note
//! S/bank/.keep        sentinel
//! S/bank/<file>.md    bank files, owned by consolidation
//! _system/tokens.json token registry
//! _backups/S/<ts>/…   snapshots
//! ```

pub const TOKENS_KEY: &str = "_system/tokens.json";
pub const BACKUPS_ROOT: &str = "_backups";
pub const KEEP_SENTINEL: &str = ".keep";

pub fn space_prefix(space_id: &str) -> String {
    format!("{space_id}/")
}

pub fn meta_key(space_id: &str) -> String {
    format!("{space_id}/_meta.json")
}

pub fn rules_key(space_id: &str) -> String {
    format!("{space_id}/_rules.md")
}

pub fn synthesis_key(space_id: &str) -> String {
    format!("{space_id}/_synthesis.md")
}

pub fn live_prefix(space_id: &str) -> String {
    format!("{space_id}/live/")
}

pub fn live_note_key(space_id: &str, file_name: &str) -> String {
    format!("{space_id}/live/{file_name}")
}

pub fn bank_prefix(space_id: &str) -> String {
    format!("{space_id}/bank/")
}

pub fn bank_file_key(space_id: &str, file_name: &str) -> String {
    format!("{space_id}/bank/{file_name}")
}

pub fn keep_key(prefix: &str) -> String {
    format!("{prefix}{KEEP_SENTINEL}")
}

pub fn backup_prefix(space_id: &str, timestamp: &str) -> String {
    format!("{BACKUPS_ROOT}/{space_id}/{timestamp}/")
}
