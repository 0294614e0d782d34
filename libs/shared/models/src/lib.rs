pub mod auth;
pub mod error;

pub use auth::{AuthUser, Role};
pub use error::{AppError, ErrorKind};
