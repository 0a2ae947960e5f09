//! Authentication: accounts, token rotation, attempt limiting and the HTTP
//! handlers that expose them.

pub mod handlers;
pub mod rate_limit;
pub mod service;

pub use rate_limit::AttemptLimiter;
pub use service::{AuthService, RefreshPolicy};
