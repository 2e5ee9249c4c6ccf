//! One-shot exchanges with a single retry

use super::{ExchangeRequest, ExchangeResponse, Exchanger, TransportError};
use reqwest::StatusCode;
use tracing::debug;

/// Execute `request`, retrying exactly once on a transport error or non-200 status
///
/// Only fully buffered bodies can be replayed; a streaming request gets a
/// single attempt.
pub async fn send_with_retry(
    exchanger: &dyn Exchanger,
    request: ExchangeRequest,
) -> Result<ExchangeResponse, TransportError> {
    let retry = request.try_clone();

    let first = match exchanger.execute(request).await.and_then(accept) {
        Ok(response) => return Ok(response),
        Err(e) => e,
    };

    let Some(retry) = retry else {
        return Err(first);
    };

    debug!("exchange with {} failed ({}), retrying once", retry.url, first);
    exchanger.execute(retry).await.and_then(accept)
}

fn accept(response: ExchangeResponse) -> Result<ExchangeResponse, TransportError> {
    if response.status == StatusCode::OK {
        Ok(response)
    } else {
        Err(TransportError::Rejected(response.status))
    }
}
