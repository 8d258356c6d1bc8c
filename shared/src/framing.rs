//! Reconstruction of JSON messages from a raw byte stream.
//!
//! The device link has no length prefix and no delimiter: a message ends
//! where its outermost braces balance. [`FrameDecoder`] tracks brace depth
//! and string/escape state across reads, so a message may arrive split at
//! any byte, and several messages may share a single read.
//!
//! ```
//! use shared::framing::FrameDecoder;
//!
//! let mut decoder = FrameDecoder::new();
//! assert_eq!(decoder.feed(br#"{"type":"pi"#).count(), 0);
//!
//! let frames: Vec<_> = decoder.feed(br#"ng"}{"type":"ping"}"#).collect();
//! assert_eq!(frames.len(), 2);
//! ```

use serde_json::Value;
use thiserror::Error;

/// Frames larger than this are rejected unless configured otherwise.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum FramingError {
    #[error("balanced frame is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingOpenBrace,
    InObject,
    InString,
    InEscape,
}

/// Incremental brace-balancing decoder.
///
/// One decoder belongs to one connection; its state carries over between
/// calls to [`feed`](Self::feed).
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    state: State,
    depth: i64,
    max_frame_len: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Creates a decoder that accepts frames up to
    /// [`DEFAULT_MAX_FRAME_LEN`] bytes.
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    /// Creates a decoder with a custom frame size limit.
    ///
    /// A frame may be at most `max_frame_len` bytes long, counting from its
    /// opening brace through its closing brace. The first byte past the
    /// limit yields [`FramingError::FrameTooLarge`] and discards the partial
    /// frame.
    ///
    /// ```
    /// use shared::framing::{FrameDecoder, FramingError};
    ///
    /// let mut decoder = FrameDecoder::with_max_frame_len(8);
    /// assert!(decoder.feed(br#"{"a":1}"#).all(|frame| frame.is_ok()));
    /// assert!(matches!(
    ///     decoder.feed(br#"{"a":123}"#).next(),
    ///     Some(Err(FramingError::FrameTooLarge { limit: 8 }))
    /// ));
    /// ```
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buffer: Vec::new(),
            state: State::AwaitingOpenBrace,
            depth: 0,
            max_frame_len,
        }
    }

    /// Pushes a chunk of bytes and returns the frames it completes.
    ///
    /// The returned iterator is lazy: bytes are consumed only as frames are
    /// pulled from it. Bytes left unconsumed when the iterator is dropped are
    /// discarded, so callers should drain it (or stop on the first error, after
    /// which the connection is unusable anyway). An empty chunk yields nothing.
    pub fn feed<'a>(&'a mut self, chunk: &'a [u8]) -> Frames<'a> {
        Frames {
            decoder: self,
            chunk,
            pos: 0,
        }
    }

    /// True when no partial frame is buffered.
    pub fn is_idle(&self) -> bool {
        self.state == State::AwaitingOpenBrace
    }

    /// Number of bytes of the frame currently being assembled.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.state = State::AwaitingOpenBrace;
        self.depth = 0;
    }

    /// Advances the state machine by one byte. Returns the completed frame
    /// bytes when this byte closes the outermost object.
    fn push_byte(&mut self, byte: u8) -> Result<Option<Vec<u8>>, FramingError> {
        match self.state {
            State::AwaitingOpenBrace => {
                if byte != b'{' {
                    return Ok(None);
                }
                self.state = State::InObject;
                self.depth = 1;
            }
            State::InObject => match byte {
                b'"' => self.state = State::InString,
                b'{' => self.depth += 1,
                b'}' => self.depth -= 1,
                _ => {}
            },
            State::InString => match byte {
                b'\\' => self.state = State::InEscape,
                b'"' => self.state = State::InObject,
                _ => {}
            },
            State::InEscape => self.state = State::InString,
        }

        self.buffer.push(byte);

        if self.buffer.len() > self.max_frame_len {
            let limit = self.max_frame_len;
            self.reset();
            return Err(FramingError::FrameTooLarge { limit });
        }
        if self.state == State::InObject && self.depth == 0 {
            let frame = std::mem::take(&mut self.buffer);
            self.reset();
            return Ok(Some(frame));
        }
        Ok(None)
    }
}

/// Frames completed by one chunk, see [`FrameDecoder::feed`].
pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
    chunk: &'a [u8],
    pos: usize,
}

impl Iterator for Frames<'_> {
    type Item = Result<Value, FramingError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.pos < self.chunk.len() {
            let byte = self.chunk[self.pos];
            self.pos += 1;

            match self.decoder.push_byte(byte) {
                Ok(None) => continue,
                Ok(Some(frame)) => {
                    return Some(serde_json::from_slice(&frame).map_err(FramingError::from))
                }
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode_all(decoder: &mut FrameDecoder, bytes: &[u8]) -> Vec<Value> {
        decoder
            .feed(bytes)
            .collect::<Result<Vec<_>, _>>()
            .expect("frames should decode")
    }

    fn tricky_message() -> Value {
        json!({
            "type": "status",
            "note": "braces { } and \"quotes\" and a \\ backslash",
            "nested": {"deeper": {"list": [1, 2, {"x": "}{"}]}},
            "unicode": "Praha \u{017e}lu\u{0165}ou\u{010d}k\u{00fd}"
        })
    }

    #[test]
    fn test_single_frame_in_one_chunk() {
        let mut decoder = FrameDecoder::new();
        let frames = decode_all(&mut decoder, br#"{"type":"ping"}"#);

        assert_eq!(frames, vec![json!({"type": "ping"})]);
        assert!(decoder.is_idle());
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_byte_at_a_time_reproduces_message() {
        let message = tricky_message();
        let bytes = serde_json::to_vec(&message).unwrap();
        let mut decoder = FrameDecoder::new();

        for (i, byte) in bytes.iter().enumerate() {
            let frames = decode_all(&mut decoder, std::slice::from_ref(byte));
            if i + 1 < bytes.len() {
                assert!(frames.is_empty(), "emitted early at byte {}", i);
            } else {
                assert_eq!(frames, vec![message.clone()]);
            }
        }
    }

    #[test]
    fn test_arbitrary_chunk_sizes() {
        let message = tricky_message();
        let mut stream = Vec::new();
        for _ in 0..3 {
            stream.extend(serde_json::to_vec(&message).unwrap());
        }

        for chunk_size in [2, 3, 7, 16, 64, stream.len()] {
            let mut decoder = FrameDecoder::new();
            let mut frames = Vec::new();
            for chunk in stream.chunks(chunk_size) {
                frames.extend(decode_all(&mut decoder, chunk));
            }
            assert_eq!(frames.len(), 3, "chunk size {}", chunk_size);
            assert!(frames.iter().all(|f| *f == message));
        }
    }

    #[test]
    fn test_no_emission_inside_open_string() {
        let mut decoder = FrameDecoder::new();
        // The closing brace sits inside a string, so nothing is complete yet
        let frames = decode_all(&mut decoder, br#"{"note":"}"#);
        assert!(frames.is_empty());
        assert!(!decoder.is_idle());

        let frames = decode_all(&mut decoder, br#"}}"}"#);
        assert_eq!(frames, vec![json!({"note": "}}}"})]);
    }

    #[test]
    fn test_escaped_quote_does_not_end_string() {
        let mut decoder = FrameDecoder::new();
        let frames = decode_all(&mut decoder, br#"{"a":"x\"}"#);
        assert!(frames.is_empty());

        let frames = decode_all(&mut decoder, br#""}"#);
        assert_eq!(frames, vec![json!({"a": "x\"}"})]);
    }

    #[test]
    fn test_escape_split_across_chunks() {
        let mut decoder = FrameDecoder::new();
        assert!(decode_all(&mut decoder, br#"{"a":"\"#).is_empty());
        assert!(decode_all(&mut decoder, br#""{"#).is_empty());
        let frames = decode_all(&mut decoder, br#""}"#);
        assert_eq!(frames, vec![json!({"a": "\"{"})]);
    }

    #[test]
    fn test_garbage_between_frames_is_discarded() {
        let mut decoder = FrameDecoder::new();
        let frames = decode_all(&mut decoder, b"  \r\nnoise}{\"n\":1}]] {\"n\":2}\n");
        assert_eq!(frames, vec![json!({"n": 1}), json!({"n": 2})]);
    }

    #[test]
    fn test_multiple_frames_in_one_chunk() {
        let mut decoder = FrameDecoder::new();
        let frames = decode_all(&mut decoder, br#"{"type":"ping"}{"type":"ping"}{"type":"sta"#);
        assert_eq!(frames.len(), 2);
        assert!(!decoder.is_idle());
        assert_eq!(decoder.pending_len(), 12);
    }

    #[test]
    fn test_empty_chunk_is_a_no_op() {
        let mut decoder = FrameDecoder::new();
        assert!(decode_all(&mut decoder, b"{\"a\"").is_empty());
        assert!(decode_all(&mut decoder, b"").is_empty());
        assert_eq!(decode_all(&mut decoder, b":1}"), vec![json!({"a": 1})]);
    }

    #[test]
    fn test_balanced_but_invalid_json() {
        let mut decoder = FrameDecoder::new();
        let mut frames = decoder.feed(b"{not json}");
        assert!(matches!(frames.next(), Some(Err(FramingError::InvalidJson(_)))));
        assert!(frames.next().is_none());
    }

    #[test]
    fn test_frame_too_large() {
        let mut decoder = FrameDecoder::with_max_frame_len(16);
        let result: Vec<_> = decoder.feed(br#"{"padding":"0123456789abcdef"}"#).collect();

        assert!(matches!(
            result.first(),
            Some(Err(FramingError::FrameTooLarge { limit: 16 }))
        ));
        assert!(decoder.is_idle());
    }

    #[test]
    fn test_frame_one_byte_over_limit_is_rejected() {
        let mut decoder = FrameDecoder::with_max_frame_len(14);

        let over: Vec<_> = decoder.feed(br#"{"a":"0123456"}"#).collect();
        assert_eq!(over.len(), 1);
        assert!(matches!(
            over[0],
            Err(FramingError::FrameTooLarge { limit: 14 })
        ));
        assert!(decoder.is_idle());

        let exact: Vec<_> = decoder.feed(br#"{"a":"012345"}"#).collect();
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].as_ref().unwrap()["a"], "012345");
    }

    #[test]
    fn test_multibyte_utf8_split_across_chunks() {
        let message = json!({"name": "\u{017d}i\u{017e}kov"});
        let bytes = serde_json::to_vec(&message).unwrap();
        // Split inside the two-byte encoding of the first character
        let split = bytes.iter().position(|&b| b >= 0x80).unwrap() + 1;

        let mut decoder = FrameDecoder::new();
        assert!(decode_all(&mut decoder, &bytes[..split]).is_empty());
        assert_eq!(decode_all(&mut decoder, &bytes[split..]), vec![message]);
    }
}
