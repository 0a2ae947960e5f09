//! lmi-core: shared library for let-me-in.
//!
//! Provides the error taxonomy, persisted record shapes, access/refresh
//! token handling, password hashing, registration validation and the remote
//! connection traits used by the terminal bridge.

pub mod error;
pub mod model;
pub mod password;
pub mod token;
pub mod transport;
pub mod validate;

// Re-export commonly used items at crate root.
pub use error::{ErrorKind, LmiError, LmiResult};
pub use model::{SessionId, SessionStatus, UserId};
pub use password::PasswordHasher;
pub use token::{generate_secret, AccessClaims, TokenPair, TokenService};
pub use transport::{FrameSink, FrameSource};
