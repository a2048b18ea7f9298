//! Pure frame reassembly.
//!
//! The decoder owns a byte buffer and a FIFO of complete frames:
//! 1. `extend()` - append bytes read from the wire, extracting every complete frame
//! 2. `pop()` - take the oldest complete frame
//!
//! Partial frames stay buffered across `extend()` calls, so bytes may arrive
//! in any chunking.

use std::collections::VecDeque;

use crate::FrameError;

/// Size of the length prefix in bytes.
pub const HEADER_LEN: usize = 4;

/// Default maximum payload size (64 MiB). Item contents may be megabytes.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Build the 4-byte big-endian header for a payload of `len` bytes.
pub fn encode_header(len: usize, max: usize) -> Result<[u8; HEADER_LEN], FrameError> {
    if len > max {
        return Err(FrameError::TooLarge { size: len, max });
    }
    let len = u32::try_from(len).map_err(|_| FrameError::TooLarge { size: len, max })?;
    Ok(len.to_be_bytes())
}

/// Reassembles length-prefixed frames from an arbitrary byte stream.
#[derive(Debug)]
pub struct FrameDecoder {
    /// Maximum accepted payload size.
    max_frame_size: usize,
    /// Bytes not yet part of a complete frame.
    buffer: Vec<u8>,
    /// Complete frames, oldest first.
    frames: VecDeque<Vec<u8>>,
}

impl FrameDecoder {
    /// Create a decoder that rejects payloads over `max_frame_size` bytes.
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            buffer: Vec::new(),
            frames: VecDeque::new(),
        }
    }

    /// Append bytes and extract every frame they complete.
    ///
    /// Returns the number of newly completed frames. An oversized length prefix
    /// is an error: the stream cannot be resynchronised after it.
    pub fn extend(&mut self, bytes: &[u8]) -> Result<usize, FrameError> {
        self.buffer.extend_from_slice(bytes);

        let mut consumed = 0;
        let mut completed = 0;
        loop {
            let rest = &self.buffer[consumed..];
            if rest.len() < HEADER_LEN {
                break;
            }
            let mut header = [0u8; HEADER_LEN];
            header.copy_from_slice(&rest[..HEADER_LEN]);
            let len = u32::from_be_bytes(header) as usize;
            if len > self.max_frame_size {
                return Err(FrameError::TooLarge {
                    size: len,
                    max: self.max_frame_size,
                });
            }
            if rest.len() < HEADER_LEN + len {
                break;
            }
            self.frames
                .push_back(rest[HEADER_LEN..HEADER_LEN + len].to_vec());
            consumed += HEADER_LEN + len;
            completed += 1;
        }

        self.buffer.drain(..consumed);
        Ok(completed)
    }

    /// Take the oldest complete frame, if any.
    pub fn pop(&mut self) -> Option<Vec<u8>> {
        self.frames.pop_front()
    }

    /// Number of complete frames waiting.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Check if no complete frame is waiting.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Bytes of an incomplete frame currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Configured maximum payload size.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut out = encode_header(payload.len(), DEFAULT_MAX_FRAME_SIZE)
            .unwrap()
            .to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn header_is_big_endian() {
        assert_eq!(encode_header(1024, usize::MAX).unwrap(), [0, 0, 4, 0]);
    }

    #[test]
    fn decodes_single_frame() {
        let mut decoder = FrameDecoder::default();
        assert_eq!(decoder.extend(&frame(b"hello")).unwrap(), 1);
        assert_eq!(decoder.pop().unwrap(), b"hello");
        assert!(decoder.pop().is_none());
    }

    #[test]
    fn partial_frame_waits_for_more_bytes() {
        let mut decoder = FrameDecoder::default();
        let bytes = frame(b"split across reads");

        assert_eq!(decoder.extend(&bytes[..2]).unwrap(), 0);
        assert_eq!(decoder.extend(&bytes[2..7]).unwrap(), 0);
        assert!(decoder.is_empty());
        assert_eq!(decoder.buffered(), 7);

        assert_eq!(decoder.extend(&bytes[7..]).unwrap(), 1);
        assert_eq!(decoder.pop().unwrap(), b"split across reads");
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn byte_at_a_time() {
        let mut decoder = FrameDecoder::default();
        for b in frame(b"drip") {
            decoder.extend(&[b]).unwrap();
        }
        assert_eq!(decoder.pop().unwrap(), b"drip");
    }

    #[test]
    fn several_frames_in_one_read_keep_order() {
        let mut decoder = FrameDecoder::default();
        let mut bytes = frame(b"one");
        bytes.extend(frame(b"two"));
        bytes.extend(frame(b"three"));
        bytes.extend(&frame(b"four")[..3]);

        assert_eq!(decoder.extend(&bytes).unwrap(), 3);
        assert_eq!(decoder.len(), 3);
        assert_eq!(decoder.pop().unwrap(), b"one");
        assert_eq!(decoder.pop().unwrap(), b"two");
        assert_eq!(decoder.pop().unwrap(), b"three");
        assert!(decoder.pop().is_none());
        assert_eq!(decoder.buffered(), 3);
    }

    #[test]
    fn empty_payload_is_a_frame() {
        let mut decoder = FrameDecoder::default();
        decoder.extend(&frame(b"")).unwrap();
        assert_eq!(decoder.pop().unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn oversized_prefix_rejected() {
        let mut decoder = FrameDecoder::new(16);
        let err = decoder.extend(&17u32.to_be_bytes()).unwrap_err();
        assert_eq!(err, FrameError::TooLarge { size: 17, max: 16 });
    }

    #[test]
    fn max_size_frame_accepted() {
        let mut decoder = FrameDecoder::new(16);
        let mut bytes = 16u32.to_be_bytes().to_vec();
        bytes.extend([7u8; 16]);
        assert_eq!(decoder.extend(&bytes).unwrap(), 1);
    }

    #[test]
    fn encode_header_rejects_oversized() {
        assert_eq!(
            encode_header(17, 16),
            Err(FrameError::TooLarge { size: 17, max: 16 })
        );
    }
}
