//! FramedTransport - whole-message I/O over a byte stream.
//!
//! Reads are non-blocking or readiness-driven; writes flush the whole frame
//! before returning.

use futures_util::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::frame::{encode_header, FrameDecoder, DEFAULT_MAX_FRAME_SIZE};
use crate::TransportError;

/// Size of each read from the underlying stream.
const READ_CHUNK: usize = 16 * 1024;

/// Length-prefixed message transport over a duplex stream.
///
/// # Example
///
/// ```ignore
/// let mut transport = FramedTransport::new(tcp_stream);
/// transport.send(b"request").await?;
/// let reply = transport.recv().await?;
/// transport.close().await?;
/// ```
#[derive(Debug)]
pub struct FramedTransport<S> {
    /// `None` once closed.
    stream: Option<S>,
    decoder: FrameDecoder,
    chunk: Box<[u8]>,
}

impl<S> FramedTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a stream with the default 64 MiB frame limit.
    pub fn new(stream: S) -> Self {
        Self::with_max_frame_size(stream, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Wrap a stream, rejecting frames larger than `max_frame_size` either way.
    pub fn with_max_frame_size(stream: S, max_frame_size: usize) -> Self {
        Self {
            stream: Some(stream),
            decoder: FrameDecoder::new(max_frame_size),
            chunk: vec![0u8; READ_CHUNK].into_boxed_slice(),
        }
    }

    /// Return the oldest complete message without waiting.
    ///
    /// Drains whatever bytes the stream has ready right now into the decoder.
    /// `Ok(None)` means no whole message has arrived yet; it is not an error.
    pub fn try_recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let Self {
            stream,
            decoder,
            chunk,
        } = self;
        let stream = stream.as_mut().ok_or(TransportError::Closed)?;

        loop {
            if let Some(frame) = decoder.pop() {
                return Ok(Some(frame));
            }
            // read() is cancel-safe: dropping a pending read loses no bytes
            match stream.read(chunk).now_or_never() {
                None => return Ok(None),
                Some(Ok(0)) => return Err(eof_error(decoder)),
                Some(Ok(n)) => {
                    trace!(bytes = n, "read");
                    decoder.extend(&chunk[..n])?;
                }
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    /// Wait until a complete message is available and return it.
    ///
    /// Cancel-safe: if the future is dropped, buffered bytes are kept for the
    /// next call.
    pub async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        let Self {
            stream,
            decoder,
            chunk,
        } = self;
        let stream = stream.as_mut().ok_or(TransportError::Closed)?;

        loop {
            if let Some(frame) = decoder.pop() {
                return Ok(frame);
            }
            let n = stream.read(chunk).await?;
            if n == 0 {
                return Err(eof_error(decoder));
            }
            trace!(bytes = n, "read");
            decoder.extend(&chunk[..n])?;
        }
    }

    /// Write one message: length prefix, then the full payload, then flush.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let max = self.decoder.max_frame_size();
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        let header = encode_header(payload.len(), max)?;

        stream.write_all(&header).await?;
        stream.write_all(payload).await?;
        stream.flush().await?;
        trace!(bytes = payload.len(), "sent frame");
        Ok(())
    }

    /// Shut down and release the stream.
    ///
    /// Succeeds exactly once; every later operation fails with
    /// [`TransportError::Closed`].
    pub async fn close(&mut self) -> Result<(), TransportError> {
        let mut stream = self.stream.take().ok_or(TransportError::Closed)?;
        stream.shutdown().await?;
        Ok(())
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }
}

fn eof_error(decoder: &FrameDecoder) -> TransportError {
    match decoder.buffered() {
        0 => TransportError::Disconnected,
        buffered => TransportError::Truncated { buffered },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn pair() -> (
        FramedTransport<tokio::io::DuplexStream>,
        FramedTransport<tokio::io::DuplexStream>,
    ) {
        let (a, b) = duplex(64 * 1024);
        (FramedTransport::new(a), FramedTransport::new(b))
    }

    #[tokio::test]
    async fn send_then_recv() {
        let (mut a, mut b) = pair();
        a.send(b"hello").await.unwrap();
        assert_eq!(b.recv().await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn messages_arrive_in_order() {
        let (mut a, mut b) = pair();
        for i in 0..10u8 {
            a.send(&[i; 3]).await.unwrap();
        }
        for i in 0..10u8 {
            assert_eq!(b.recv().await.unwrap(), vec![i; 3]);
        }
    }

    #[tokio::test]
    async fn try_recv_without_data_is_none() {
        let (_a, mut b) = pair();
        assert!(b.try_recv().unwrap().is_none());
    }

    #[tokio::test]
    async fn try_recv_buffers_partial_frame() {
        let (a, b) = duplex(1024);
        let mut raw = a;
        let mut b = FramedTransport::new(b);

        // header plus half the payload
        raw.write_all(&[0, 0, 0, 4, b'a', b'b']).await.unwrap();
        assert!(b.try_recv().unwrap().is_none());

        raw.write_all(b"cd").await.unwrap();
        assert_eq!(b.try_recv().unwrap().unwrap(), b"abcd");
        assert!(b.try_recv().unwrap().is_none());
    }

    #[tokio::test]
    async fn try_recv_returns_queued_frames_one_at_a_time() {
        let (mut a, mut b) = pair();
        a.send(b"first").await.unwrap();
        a.send(b"second").await.unwrap();

        assert_eq!(b.try_recv().unwrap().unwrap(), b"first");
        assert_eq!(b.try_recv().unwrap().unwrap(), b"second");
        assert!(b.try_recv().unwrap().is_none());
    }

    #[tokio::test]
    async fn large_message_crosses_many_reads() {
        let (a, b) = duplex(4096);
        let mut a = FramedTransport::new(a);
        let mut b = FramedTransport::new(b);
        let payload = vec![0x5Au8; 2 * 1024 * 1024];

        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            a.send(&payload).await.unwrap();
            a
        });

        assert_eq!(b.recv().await.unwrap(), expected);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn oversized_send_rejected() {
        let (a, _b) = duplex(1024);
        let mut a = FramedTransport::with_max_frame_size(a, 8);
        let err = a.send(&[0u8; 9]).await.unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge { size: 9, max: 8 }));
    }

    #[tokio::test]
    async fn oversized_prefix_rejected_on_recv() {
        let (mut raw, b) = duplex(1024);
        let mut b = FramedTransport::with_max_frame_size(b, 8);
        raw.write_all(&100u32.to_be_bytes()).await.unwrap();

        let err = b.recv().await.unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge { size: 100, max: 8 }));
    }

    #[tokio::test]
    async fn use_after_close_fails() {
        let (mut a, _b) = pair();
        a.close().await.unwrap();

        assert!(a.is_closed());
        assert!(matches!(a.send(b"x").await, Err(TransportError::Closed)));
        assert!(matches!(a.recv().await, Err(TransportError::Closed)));
        assert!(matches!(a.try_recv(), Err(TransportError::Closed)));
        assert!(matches!(a.close().await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn peer_drop_is_disconnect() {
        let (a, mut b) = pair();
        drop(a);
        let err = b.recv().await.unwrap_err();
        assert!(matches!(err, TransportError::Disconnected));
    }

    #[tokio::test]
    async fn peer_drop_mid_frame_is_truncated() {
        let (mut raw, b) = duplex(1024);
        let mut b = FramedTransport::new(b);
        raw.write_all(&[0, 0, 0, 10, 1, 2]).await.unwrap();
        drop(raw);

        let err = b.recv().await.unwrap_err();
        assert!(matches!(err, TransportError::Truncated { buffered: 6 }));
    }
}
