//! Client modules for external services

pub mod forum;
pub mod reddit;

pub use forum::{ForumClient, PlatformError, PlatformResult};
pub use reddit::RedditClient;
