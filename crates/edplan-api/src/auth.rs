//! Principal Extraction
//!
//! The upstream auth layer injects the authenticated principal as headers.
//! The core only reads them; it never validates credentials itself.

use crate::error::ApiError;
use axum::http::HeaderMap;
use edplan_types::{Principal, Role};
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Read the injected principal from request headers
pub fn principal_from_headers(headers: &HeaderMap) -> Result<Principal, ApiError> {
    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .ok_or_else(|| ApiError::unauthorized("missing or invalid x-user-id header"))?;

    let role = headers
        .get(USER_ROLE_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(Role::parse)
        .ok_or_else(|| ApiError::unauthorized("missing or invalid x-user-role header"))?;

    Ok(Principal::new(user_id, role))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_principal_parsed_from_headers() {
        let mut headers = HeaderMap::new();
        let id = Uuid::new_v4();
        headers.insert(USER_ID_HEADER, HeaderValue::from_str(&id.to_string()).unwrap());
        headers.insert(USER_ROLE_HEADER, HeaderValue::from_static("coordinator"));

        let principal = principal_from_headers(&headers).unwrap();
        assert_eq!(principal.user_id, id);
        assert_eq!(principal.role, Role::Coordinator);
    }

    #[test]
    fn test_missing_headers_are_unauthorized() {
        assert!(principal_from_headers(&HeaderMap::new()).is_err());

        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("not-a-uuid"));
        headers.insert(USER_ROLE_HEADER, HeaderValue::from_static("teacher"));
        assert!(principal_from_headers(&headers).is_err());

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_ID_HEADER,
            HeaderValue::from_str(&Uuid::new_v4().to_string()).unwrap(),
        );
        headers.insert(USER_ROLE_HEADER, HeaderValue::from_static("superuser"));
        assert!(principal_from_headers(&headers).is_err());
    }
}
