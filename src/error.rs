//! Error types shared by the wire codec, transport, resolver and decoders.

use thiserror::Error;

/// Result type for GDS/MDFS operations.
pub type MdfsResult<T> = Result<T, MdfsError>;

/// Every failure a request can end with.
///
/// The variants are grouped by the layer that produces them so callers can
/// tell "server down" apart from "no such data" and "malformed bytes".
#[derive(Error, Debug)]
pub enum MdfsError {
    /// Connection refused/reset, timeout or server-side outage.
    #[error("GDS server unavailable at {address}: {reason}")]
    TransportUnavailable { address: String, reason: String },

    /// A declared length points past the end of the received bytes.
    #[error("frame truncated: need {needed} byte(s), only {available} available")]
    FrameTruncated { needed: usize, available: usize },

    /// The reply carried a discriminator this client does not know.
    #[error("unknown response kind 0x{0:02x}")]
    UnknownResponseKind(u8),

    /// Reply does not belong to the request or the exchange is otherwise out of step.
    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),

    /// The server answered with a failure code.
    #[error("GDS server error (code {code}): {message}")]
    Remote { code: i32, message: String },

    /// Nothing in the catalog matches the request.
    #[error("data not found: {0}")]
    DataNotFound(String),

    /// Several catalog entries match and the match policy requires one.
    #[error("ambiguous match in {directory}: {}", candidates.join(", "))]
    AmbiguousMatch {
        directory: String,
        candidates: Vec<String>,
    },

    /// The filename template could not be parsed or rendered.
    #[error("invalid filename pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// The payload does not start with the expected format code.
    #[error("bad discriminator: expected {expected}, found {found}")]
    BadDiscriminator { expected: String, found: String },

    /// Header dimensions disagree with the payload length.
    #[error("size mismatch: header declares {expected} byte(s), payload has {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// A field is too long for the width of its length prefix.
    #[error("{field} of {len} byte(s) exceeds the {max}-byte limit of the frame format")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    /// Structurally invalid content that is not a size problem.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Local file I/O (downloads, dictionaries).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MdfsError {
    /// Only transport failures are safe to retry from the outside.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransportUnavailable { .. })
    }

    pub(crate) fn unavailable(address: &str, reason: impl ToString) -> Self {
        Self::TransportUnavailable {
            address: address.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Translates a failure reply into the most specific error kind.
pub(crate) fn remote_failure(code: i32, message: &str, context: &str) -> MdfsError {
    // The server reports missing files and directories with this marker.
    if message.trim() == "NotFoundException" {
        return MdfsError::DataNotFound(context.to_string());
    }

    MdfsError::Remote {
        code,
        message: if message.is_empty() {
            format!("request failed for {context}")
        } else {
            message.to_string()
        },
    }
}
