//! Data models for user accounts, verification tokens, and token responses.

pub mod token;
pub mod user;

pub use token::*;
pub use user::*;
