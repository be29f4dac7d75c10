//! Application services: admin and public use cases over repository traits.

pub mod admin;
pub mod api_keys;
pub mod content;
pub mod delivery;
pub mod error;
pub mod export;
pub mod jobs;
pub mod mailer;
pub mod pagination;
pub mod public;
pub mod rate_limit;
pub mod repos;
pub mod subscriptions;
pub mod syndication;
pub mod webhooks;
