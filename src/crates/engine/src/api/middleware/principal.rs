//! Principal extraction.
//!
//! The engine consumes an opaque principal id and never authenticates it —
//! identity and auth are out of scope. Callers pass one via the
//! `X-Principal-Id` header; callers that don't are treated as `anonymous`
//! rather than rejected, since there is no identity system to reject
//! against.

use axum::http::HeaderMap;

const PRINCIPAL_HEADER: &str = "x-principal-id";
const ANONYMOUS: &str = "anonymous";

pub fn extract_principal(headers: &HeaderMap) -> String {
    headers
        .get(PRINCIPAL_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or(ANONYMOUS)
        .to_string()
}
