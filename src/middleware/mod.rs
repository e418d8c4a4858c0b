mod auth;

pub use auth::{require_registered_user, CurrentUser};
