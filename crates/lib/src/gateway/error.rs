//! Error taxonomy for gateway-facing operations.

use thiserror::Error;

/// Failure of a gateway call or of a whole logical operation.
///
/// Poll loops convert these into error flags and keep ticking; they are never
/// allowed to propagate past a manager's boundary as a panic.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transport-level failure (connect, DNS, timeout). Retried only by the
    /// next poll tick, never inline.
    #[error("gateway request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// Non-2xx HTTP response from the gateway.
    #[error("gateway api error ({status}): {body}")]
    Api { status: u16, body: String },

    /// 2xx response whose body was not valid JSON.
    #[error("gateway response was not valid JSON: {0}")]
    Decode(String),

    /// 2xx JSON that contains none of the fields expected for the operation.
    /// Recorded per candidate; the resolver moves on to the next one.
    #[error("response missing expected fields ({0})")]
    UnexpectedShape(String),

    /// Every candidate endpoint for a logical operation failed. Callers treat
    /// this as "operation unsupported/unreachable this cycle", not as an
    /// empty result.
    #[error("all candidate endpoints failed for {operation}: {last}")]
    AllEndpointsFailed {
        operation: &'static str,
        last: Box<GatewayError>,
    },

    /// Rejected locally before any network call (empty message, no contact).
    #[error("{0}")]
    Validation(String),

    /// The gateway produced neither a pairing QR code nor a connected session.
    #[error("could not generate pairing code")]
    PairingUnavailable,
}

impl GatewayError {
    /// True when the failure was local validation (no request was made).
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}
