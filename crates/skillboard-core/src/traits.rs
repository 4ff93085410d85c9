use std::future::Future;

use crate::error::AppError;

/// Calls one upstream profile source (CodeChef, LeetCode, GitHub, ...).
///
/// `endpoint` is one of the configured mirror templates; the client decides
/// how the identifier is placed into the request. Implementations return the
/// raw JSON payload and never normalize it.
pub trait UpstreamClient: Send + Sync + Clone + 'static {
    fn call(
        &self,
        identifier: &str,
        endpoint: &str,
    ) -> impl Future<Output = Result<serde_json::Value, AppError>> + Send;
}
