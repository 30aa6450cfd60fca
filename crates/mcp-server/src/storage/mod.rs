//! Object-store access.
//!
//! `BucketStore` is the only way the rest of the crate touches the bucket.
//! It hides pagination, maps missing keys to `Option`, and keeps JSON
//! corruption distinct from transport failures so callers never paper over a
//! damaged `_meta.json` or token registry.

mod bucket;
mod layout;

pub use bucket::{BucketStore, ObjectInfo, StoreError};
pub use layout::{
    backup_prefix, bank_file_key, bank_prefix, keep_key, live_note_key, live_prefix, meta_key,
    rules_key, space_prefix, synthesis_key, BACKUPS_ROOT, KEEP_SENTINEL, TOKENS_KEY,
};
