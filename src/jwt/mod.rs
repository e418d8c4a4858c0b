mod claims;
mod signing;

pub use claims::AccessClaims;
pub use signing::{issue_tokens, sign_access_token, verify_access_token, IssuedTokens, TokenKeys};
