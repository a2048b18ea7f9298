//! Error types for framing and transport.

use thiserror::Error;

/// Errors raised by the pure frame decoder.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// A length prefix announced more bytes than the configured maximum.
    #[error("frame too large: {size} bytes (max {max})")]
    TooLarge {
        /// Announced or attempted payload size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },
}

/// Errors raised by [`FramedTransport`](crate::FramedTransport).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport was used after [`close`](crate::FramedTransport::close).
    #[error("transport used after close")]
    Closed,

    /// A frame exceeded the configured maximum, in either direction.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Announced or attempted payload size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The peer closed the stream on a frame boundary.
    #[error("peer disconnected")]
    Disconnected,

    /// The peer closed the stream in the middle of a frame.
    #[error("peer disconnected mid-frame ({buffered} bytes buffered)")]
    Truncated {
        /// Bytes of the incomplete frame that had arrived.
        buffered: usize,
    },

    /// Underlying stream I/O failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<FrameError> for TransportError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::TooLarge { size, max } => TransportError::FrameTooLarge { size, max },
        }
    }
}

impl TransportError {
    /// Whether the peer went away, as opposed to a local or protocol failure.
    pub fn is_disconnect(&self) -> bool {
        match self {
            TransportError::Disconnected | TransportError::Truncated { .. } => true,
            TransportError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_error_converts() {
        let err: TransportError = FrameError::TooLarge { size: 10, max: 5 }.into();
        assert!(matches!(err, TransportError::FrameTooLarge { size: 10, max: 5 }));
        assert_eq!(err.to_string(), "frame too large: 10 bytes (max 5)");
    }

    #[test]
    fn disconnect_classification() {
        assert!(TransportError::Disconnected.is_disconnect());
        assert!(TransportError::Truncated { buffered: 3 }.is_disconnect());
        assert!(TransportError::Io(std::io::ErrorKind::ConnectionReset.into()).is_disconnect());
        assert!(!TransportError::Closed.is_disconnect());
    }
}
