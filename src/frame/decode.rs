//! Decoding: byte source → validated frame.
//!
//! The decoder does not resynchronize. A bad header consumes exactly the two
//! header bytes, and a checksum mismatch returns before the tail is read, so
//! after either failure the next call starts wherever the stream was left.

use std::collections::VecDeque;
use std::time::Duration;

use crate::domain::{LinkResult, ProtocolError};
use crate::ports::ByteSource;

use super::{checksum, DecodeOutcome, Frame, HEADER, TAIL};

/// Read one frame from `source`.
///
/// A timeout before the first header byte pair is complete yields
/// `NoData`; a timeout anywhere after the header yields
/// `Malformed(Truncated)`. `Err` is reserved for fatal transport errors.
pub fn decode<S>(source: &mut S, timeout: Duration) -> LinkResult<DecodeOutcome>
where
    S: ByteSource + ?Sized,
{
    decode_with(source, timeout, timeout)
}

/// Like `decode`, but reads after a valid header wait up to `frame_timeout`
/// instead of `idle_timeout`, so a long payload on a slow line is not cut.
pub fn decode_with<S>(
    source: &mut S,
    idle_timeout: Duration,
    frame_timeout: Duration,
) -> LinkResult<DecodeOutcome>
where
    S: ByteSource + ?Sized,
{
    let header = match source.read_exact(2, idle_timeout)? {
        Some(bytes) => bytes,
        None => return Ok(DecodeOutcome::NoData),
    };
    if header[..] != HEADER {
        return Ok(DecodeOutcome::Malformed(ProtocolError::HeaderMismatch([
            header[0], header[1],
        ])));
    }
    let timeout = frame_timeout;

    let Some(meta) = source.read_exact(2, timeout)? else {
        return Ok(truncated());
    };
    let (frame_type, length) = (meta[0], meta[1] as usize);

    let payload = if length == 0 {
        Vec::new()
    } else {
        match source.read_exact(length, timeout)? {
            Some(bytes) => bytes,
            None => return Ok(truncated()),
        }
    };

    let Some(received) = source.read_exact(1, timeout)? else {
        return Ok(truncated());
    };
    let expected = checksum(frame_type, &payload);
    if received[0] != expected {
        return Ok(DecodeOutcome::Malformed(ProtocolError::ChecksumMismatch {
            expected,
            actual: received[0],
        }));
    }

    let Some(tail) = source.read_exact(2, timeout)? else {
        return Ok(truncated());
    };
    if tail[..] != TAIL {
        return Ok(DecodeOutcome::Malformed(ProtocolError::TailMismatch([
            tail[0], tail[1],
        ])));
    }

    Ok(DecodeOutcome::Frame(Frame {
        frame_type,
        payload,
    }))
}

fn truncated() -> DecodeOutcome {
    DecodeOutcome::Malformed(ProtocolError::Truncated)
}

/// In-memory byte source. Reads never wait: a short buffer behaves like an
/// immediate timeout and leaves its bytes in place.
#[derive(Debug, Default, Clone)]
pub struct SliceSource {
    buf: VecDeque<u8>,
}

impl SliceSource {
    pub fn new(bytes: &[u8]) -> Self {
        Self {
            buf: bytes.iter().copied().collect(),
        }
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }
}

impl ByteSource for SliceSource {
    fn read_exact(&mut self, n: usize, _timeout: Duration) -> LinkResult<Option<Vec<u8>>> {
        if self.buf.len() < n {
            return Ok(None);
        }
        Ok(Some(self.buf.drain(..n).collect()))
    }
}

/// Decode `bytes` front to back, malformed frames included.
pub fn decode_bytes(bytes: &[u8]) -> Vec<DecodeOutcome> {
    let mut source = SliceSource::new(bytes);
    let mut out = Vec::new();
    while source.remaining() > 0 {
        match decode(&mut source, Duration::ZERO) {
            Ok(DecodeOutcome::NoData) | Err(_) => break,
            Ok(outcome) => out.push(outcome),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode;

    fn decode_one(bytes: &[u8]) -> (DecodeOutcome, usize) {
        let mut source = SliceSource::new(bytes);
        let outcome = decode(&mut source, Duration::ZERO).unwrap();
        (outcome, source.remaining())
    }

    #[test]
    fn decode_empty_ping() {
        let (outcome, left) = decode_one(&[0xAA, 0x55, 0x04, 0x00, 0x04, 0x0D, 0x0A]);
        assert_eq!(outcome, DecodeOutcome::Frame(Frame::new(0x04, Vec::new())));
        assert_eq!(left, 0);
    }

    #[test]
    fn roundtrip_representative_lengths() {
        for len in [0usize, 1, 8, 254, 255] {
            let payload: Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();
            let wire = encode(0x82, &payload).unwrap();
            let (outcome, _) = decode_one(&wire);
            assert_eq!(
                outcome,
                DecodeOutcome::Frame(Frame::new(0x82, payload)),
                "roundtrip failed for length {len}"
            );
        }
    }

    #[test]
    fn empty_source_is_no_data() {
        let (outcome, _) = decode_one(&[]);
        assert_eq!(outcome, DecodeOutcome::NoData);
    }

    #[test]
    fn bad_header_consumes_exactly_two_bytes() {
        // A valid frame sits right after the two garbage bytes and one stray
        // header byte; the decoder must not scan forward for it.
        let mut bytes = vec![0x00, 0xAA];
        bytes.extend(encode(0x83, &[0x11]).unwrap());
        let (outcome, left) = decode_one(&bytes);
        assert_eq!(
            outcome,
            DecodeOutcome::Malformed(ProtocolError::HeaderMismatch([0x00, 0xAA]))
        );
        assert_eq!(left, bytes.len() - 2);
    }

    #[test]
    fn every_payload_mutation_is_rejected() {
        let payload = [0x10, 0x20, 0x30, 0x40];
        let wire = encode(0x01, &payload).unwrap();
        for index in 4..4 + payload.len() {
            for delta in [1u8, 0x80, 0xFF] {
                let mut corrupted = wire.clone();
                corrupted[index] = corrupted[index].wrapping_add(delta);
                let (outcome, _) = decode_one(&corrupted);
                assert!(
                    matches!(
                        outcome,
                        DecodeOutcome::Malformed(ProtocolError::ChecksumMismatch { .. })
                    ),
                    "mutation at byte {index} by {delta:#x} was not caught: {outcome:?}"
                );
            }
        }
    }

    #[test]
    fn checksum_mismatch_leaves_tail_unread() {
        let mut wire = encode(0x03, &[]).unwrap();
        wire[4] ^= 0x01;
        let (outcome, left) = decode_one(&wire);
        assert_eq!(
            outcome,
            DecodeOutcome::Malformed(ProtocolError::ChecksumMismatch {
                expected: 0x03,
                actual: 0x02,
            })
        );
        assert_eq!(left, 2, "tail bytes must still be in the stream");
    }

    #[test]
    fn bad_tail_is_rejected() {
        let mut wire = encode(0x80, &[]).unwrap();
        let n = wire.len();
        wire[n - 1] = 0x00;
        let (outcome, _) = decode_one(&wire);
        assert_eq!(
            outcome,
            DecodeOutcome::Malformed(ProtocolError::TailMismatch([0x0D, 0x00]))
        );
    }

    #[test]
    fn timeout_after_header_is_truncated() {
        let wire = encode(0x82, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        for cut in [2usize, 3, 6, 12, 13, 14] {
            let (outcome, _) = decode_one(&wire[..cut]);
            assert_eq!(
                outcome,
                DecodeOutcome::Malformed(ProtocolError::Truncated),
                "cut at {cut}"
            );
        }
    }

    #[test]
    fn partial_header_is_no_data_and_stays_buffered() {
        let (outcome, left) = decode_one(&[0xAA]);
        assert_eq!(outcome, DecodeOutcome::NoData);
        assert_eq!(left, 1);
    }

    /// Records the timeout of every read
    struct TimeoutLog {
        inner: SliceSource,
        seen: Vec<Duration>,
    }

    impl ByteSource for TimeoutLog {
        fn read_exact(&mut self, n: usize, timeout: Duration) -> LinkResult<Option<Vec<u8>>> {
            self.seen.push(timeout);
            self.inner.read_exact(n, timeout)
        }
    }

    #[test]
    fn frame_timeout_applies_after_the_header() {
        let idle = Duration::from_millis(5);
        let frame = Duration::from_millis(300);
        let mut source = TimeoutLog {
            inner: SliceSource::new(&encode(0x83, &[0x01]).unwrap()),
            seen: Vec::new(),
        };
        let outcome = decode_with(&mut source, idle, frame).unwrap();
        assert_eq!(outcome, DecodeOutcome::Frame(Frame::new(0x83, vec![0x01])));
        assert_eq!(source.seen[0], idle);
        assert!(source.seen[1..].iter().all(|t| *t == frame));
    }

    #[test]
    fn decode_bytes_stops_at_trailing_fragment() {
        let mut stream = encode(0x80, &[]).unwrap();
        stream.push(0xAA);
        assert_eq!(
            decode_bytes(&stream),
            vec![DecodeOutcome::Frame(Frame::new(0x80, Vec::new()))]
        );
    }

    #[test]
    fn decode_bytes_reads_back_to_back_frames() {
        let mut stream = encode(0x80, &[]).unwrap();
        stream.extend(encode(0x83, &[0x42]).unwrap());
        assert_eq!(
            decode_bytes(&stream),
            vec![
                DecodeOutcome::Frame(Frame::new(0x80, Vec::new())),
                DecodeOutcome::Frame(Frame::new(0x83, vec![0x42])),
            ]
        );
    }

    #[test]
    fn unknown_type_codes_still_decode() {
        let wire = encode(0x42, &[0x01]).unwrap();
        let (outcome, _) = decode_one(&wire);
        assert_eq!(outcome, DecodeOutcome::Frame(Frame::new(0x42, vec![0x01])));
    }
}
