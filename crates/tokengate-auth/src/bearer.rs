//! `Authorization: Bearer <token>` extraction

use http::HeaderMap;
use http::header::AUTHORIZATION;

use crate::error::{AuthError, AuthResult};

/// Pull the token out of an `Authorization` header value
///
/// The scheme is case-insensitive; exactly one token must follow it.
///
/// # Errors
///
/// Returns [`AuthError::MissingAuthorization`] for `None` and
/// [`AuthError::InvalidHeader`] for anything that is not
/// `Bearer <token>`.
pub fn parse_authorization(value: Option<&str>) -> AuthResult<&str> {
    let value = value.ok_or(AuthError::MissingAuthorization)?;
    let parts: Vec<&str> = value.split_whitespace().collect();

    match parts.as_slice() {
        [] => Err(AuthError::MissingAuthorization),
        [scheme, ..] if !scheme.eq_ignore_ascii_case("bearer") => Err(AuthError::InvalidHeader(
            "Authorization header must start with Bearer".into(),
        )),
        [_] => Err(AuthError::InvalidHeader("Token not found".into())),
        [_, token] => Ok(*token),
        _ => Err(AuthError::InvalidHeader(
            "Authorization header must be Bearer token".into(),
        )),
    }
}

/// Bearer token from a request's headers
///
/// # Errors
///
/// Same as [`parse_authorization`]; a header that is not visible ASCII is
/// [`AuthError::InvalidHeader`].
pub fn from_headers(headers: &HeaderMap) -> AuthResult<&str> {
    let value = headers
        .get(AUTHORIZATION)
        .map(|v| {
            v.to_str().map_err(|_| {
                AuthError::InvalidHeader("Authorization header is not valid ASCII".into())
            })
        })
        .transpose()?;
    parse_authorization(value)
}
