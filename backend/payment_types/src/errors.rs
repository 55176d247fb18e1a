use crate::crypto::SignType;
use crate::types::Channel;

pub type CustomResult<T, E> = error_stack::Result<T, E>;

/// Failure taxonomy for gateway calls. Every variant carries the channel the
/// failure originated from.
///
/// Gateway-level logical failure (`return_code`/`result_code` other than
/// `SUCCESS`) is deliberately not represented here: it is returned to the
/// caller inside the decoded mapping, since a rejected business outcome can
/// be a perfectly valid response.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    /// A required field is missing or fails a range constraint. Detected
    /// before any network call.
    #[error("[{channel}] missing or invalid parameter: {field}")]
    InvalidParam { channel: Channel, field: &'static str },

    /// The gateway answered with a non-2xx status.
    #[error("[{channel}] gateway returned HTTP {status_code}")]
    Http {
        channel: Channel,
        status_code: u16,
        body: String,
    },

    /// The request never produced a response (connection, TLS, timeout).
    #[error("[{channel}] request could not be sent: {reason}")]
    RequestFailed { channel: Channel, reason: String },

    /// Empty or non-well-formed XML where XML was expected.
    #[error("[{channel}] response is empty or not well-formed XML")]
    MalformedResponse { channel: Channel },

    /// The response's declared signature does not match the recomputed
    /// digest. Callers must not act on the response contents.
    #[error("[{channel}] response signature verification failed")]
    SignatureMismatch { channel: Channel },

    /// The requested sign type has no defined keying scheme on this API.
    #[error("[{channel}] sign type {sign_type} has no defined keying scheme")]
    UnsupportedSignType {
        channel: Channel,
        sign_type: SignType,
    },
}

impl PaymentError {
    pub fn channel(&self) -> Channel {
        match self {
            Self::InvalidParam { channel, .. }
            | Self::Http { channel, .. }
            | Self::RequestFailed { channel, .. }
            | Self::MalformedResponse { channel }
            | Self::SignatureMismatch { channel }
            | Self::UnsupportedSignType { channel, .. } => *channel,
        }
    }
}
