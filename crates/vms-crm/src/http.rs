//! Shared HTTP response helpers.
//!
//! Centralizes status-code checks (401 session rejection, 429 rate limiting
//! with `Retry-After` parsing, non-success → [`CrmError::Api`]).

use crate::error::CrmError;

/// Check an HTTP response for common error conditions.
///
/// Returns the response unchanged on success. Handles:
/// - **401 Unauthorized** → [`CrmError::Authentication`].
/// - **429 Too Many Requests** → [`CrmError::RateLimited`] with `Retry-After`
///   header parsing (falls back to 60 s if absent or unparseable).
/// - **Non-success status** → [`CrmError::Api`] with status code and body.
pub async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, CrmError> {
    if resp.status() == 401 {
        return Err(CrmError::Authentication(
            resp.text().await.unwrap_or_default(),
        ));
    }
    if resp.status() == 429 {
        let retry_after = parse_retry_after(&resp);
        return Err(CrmError::RateLimited {
            retry_after_secs: retry_after,
        });
    }
    if !resp.status().is_success() {
        return Err(CrmError::Api {
            status: resp.status().as_u16(),
            message: resp.text().await.unwrap_or_default(),
        });
    }
    Ok(resp)
}

/// Parse the `Retry-After` header as seconds, falling back to 60 s.
fn parse_retry_after(resp: &reqwest::Response) -> u64 {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(60)
}
