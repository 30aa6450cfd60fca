//! Shared note formats for Live Memory.
//!
//! Everything in this crate is pure and synchronous: note categories, the
//! timestamped note-key scheme, YAML front-matter rendering and parsing, and
//! the input validation rules shared by the server. The server crate owns all
//! I/O; this crate only decides what bytes look like.

mod category;
mod frontmatter;
mod key;
mod validate;

pub use category::{Category, UnknownCategory};
pub use frontmatter::{FrontMatter, FrontMatterError};
pub use key::{NoteKey, NoteKeyError};
pub use validate::{
    validate_agent, validate_backup_id, validate_bank_filename, validate_content,
    validate_description, validate_rules, validate_space_id, ValidationError, MAX_CONTENT_CHARS,
    MAX_DESCRIPTION_CHARS, MAX_RULES_CHARS,
};
