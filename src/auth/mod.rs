//! Authentication: JWT codec, password hashing, account flows, HTTP handlers.

mod handlers;
pub mod jwt;
pub mod password;
mod service;

pub use handlers::{
    login, me, refresh, register, reset_password, reset_password_request, verify_email,
};
pub use jwt::{Claims, Identity, TokenClass, TokenCodec};
pub use service::{AuthService, Registration};
