use taskgate_adaptor_core::RelayError;
use taskgate_storage::{AuthUser, UserDirectory};

/// Extracts the token from an `Authorization` header value. Accepts both
/// `Bearer sk-...` and a bare key.
pub fn bearer_token(header: &str) -> &str {
    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .unwrap_or(header)
        .trim()
}

pub async fn authenticate(
    users: &dyn UserDirectory,
    authorization: Option<&str>,
) -> Result<AuthUser, RelayError> {
    let Some(header) = authorization else {
        return Err(RelayError::local(
            "unauthorized",
            "missing authorization header",
            401,
        ));
    };
    let token = bearer_token(header);
    if token.is_empty() {
        return Err(RelayError::local("unauthorized", "empty access key", 401));
    }
    let user = users
        .user_by_access_key(token)
        .await
        .map_err(|err| RelayError::internal(err.to_string()))?
        .ok_or_else(|| RelayError::local("unauthorized", "unknown access key", 401))?;
    if !user.enabled {
        return Err(RelayError::local("user_disabled", "user is disabled", 403));
    }
    Ok(user)
}
