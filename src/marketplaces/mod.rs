pub mod amazon;
pub mod ciceksepeti;
pub mod etsy;
pub mod hepsiburada;
pub mod ikas;
pub mod n11;
pub mod shopify;
pub mod trendyol;

use crate::error::{SyncError, SyncResult};
use reqwest::Response;

/// Convert a non-2xx marketplace response into a categorical, sanitized
/// error. The raw body goes to the debug log only; callers get the
/// human-readable classification from `SyncError::from_response_status`.
pub(crate) async fn check(what: &str, response: Response) -> SyncResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::debug!(
        target: "pazarsync.http",
        status = status.as_u16(),
        body = %body,
        "{what} returned an error response"
    );
    Err(SyncError::from_response_status(what, status.as_u16()))
}
