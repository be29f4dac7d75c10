mod commands;
mod queries;
mod revisions;
mod service;
mod status;
pub mod types;

pub use service::*;
pub use types::{
    AdminPostError, CreatePostCommand, PostDetail, RevisionSummary, UpdateDraftCommand,
};
