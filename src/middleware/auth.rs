use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::jwt::verify_access_token;
use crate::models::User;
use crate::util::extract_bearer_token;

/// The authenticated user, inserted into request extensions.
#[derive(Clone)]
pub struct CurrentUser(pub User);

fn authenticate_request(state: &AppState, request: &Request) -> Result<User> {
    let token = extract_bearer_token(request.headers()).ok_or(AppError::Unauthorized)?;
    let claims = verify_access_token(&state.token_keys, token)?;
    let user_id = claims.subject.ok_or(AppError::Unauthorized)?;

    // Always load the user fresh: the token's entitlement claims may be
    // stale relative to the current entitlement version.
    let conn = state.db.get()?;
    queries::get_user_by_id(&conn, &user_id)?.ok_or(AppError::Unauthorized)
}

/// Require an authenticated, non-guest user. Guests must claim an account
/// before purchases can be attached to them.
pub async fn require_registered_user(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let user = authenticate_request(&state, &request)?;
    if user.is_guest {
        return Err(AppError::Forbidden("Account required".into()));
    }
    request.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(request).await)
}
