//! Domain layer types and invariants.

pub mod api_keys;
pub mod email;
pub mod entities;
pub mod error;
pub mod posts;
pub mod revisions;
pub mod slug;
pub mod types;
