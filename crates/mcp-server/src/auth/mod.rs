//! Authentication and access control.
//!
//! A bearer credential is resolved once per request into an [`Identity`];
//! every tool then applies the capability checks declared in the tool table.
//! Credentials are stored only as SHA-256 hashes in `_system/tokens.json`.

mod gate;
mod identity;
mod tokens;

pub use gate::AuthGate;
pub use identity::{Identity, Permission};
pub use tokens::{generate_credential, hash_credential, TokenRecord, TokenRegistry};
