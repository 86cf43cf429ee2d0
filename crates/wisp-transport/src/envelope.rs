//! Envelope framing for datagrams on the unreliable peer channel.
//!
//! Every datagram is exactly one envelope:
//!
//! ```text
//! +--------+----------+----------+---------------------+
//! | kind   | sequence | checksum | payload             |
//! | 1 byte | 1 byte   | 1 byte   | 0..=1200 bytes      |
//! +--------+----------+----------+---------------------+
//! ```
//!
//! `kind` is 0 (unreliable), 1 (reliable) or 2 (ack). The checksum is the
//! [`crc8`](crate::crc8()) of the payload only. An ack is two bytes, kind and
//! the sequence number being acknowledged, with no checksum and no payload.

use crate::crc8::crc8;

/// Largest payload one envelope may carry.
pub const MAX_PAYLOAD: usize = 1200;

/// Bytes in front of the payload of a message envelope.
pub const HEADER_LEN: usize = 3;

/// Bytes in an ack envelope.
pub const ACK_LEN: usize = 2;

/// Largest datagram this framing produces.
pub const MAX_DATAGRAM: usize = HEADER_LEN + MAX_PAYLOAD;

/// Envelope kind tag, the first byte on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EnvelopeKind {
    /// Sent at most once, may be lost.
    Unreliable = 0,
    /// Resent until acknowledged or discarded.
    Reliable = 1,
    /// Acknowledges a reliable envelope.
    Ack = 2,
}

impl TryFrom<u8> for EnvelopeKind {
    type Error = EnvelopeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unreliable),
            1 => Ok(Self::Reliable),
            2 => Ok(Self::Ack),
            other => Err(EnvelopeError::UnknownKind(other)),
        }
    }
}

/// A decoded envelope borrowing its payload from the datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Envelope<'a> {
    /// An unreliable or reliable message whose checksum matched.
    Message {
        /// Whether the sender expects an ack.
        reliable: bool,
        /// Per-peer, per-channel sequence number.
        sequence: u8,
        /// Application bytes.
        payload: &'a [u8],
    },
    /// Acknowledgement of a reliable message.
    Ack {
        /// Sequence number of the acknowledged message.
        sequence: u8,
    },
}

/// Errors produced while encoding or decoding envelopes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    /// The datagram is shorter than the header for its kind.
    #[error("datagram of {len} bytes is too short for an envelope")]
    Truncated {
        /// Length of the offending datagram.
        len: usize,
    },

    /// The kind byte is not a known [`EnvelopeKind`].
    #[error("unknown envelope kind {0}")]
    UnknownKind(u8),

    /// The payload exceeds [`MAX_PAYLOAD`].
    #[error("payload size {size} exceeds maximum {max}")]
    PayloadTooLarge {
        /// The actual payload size.
        size: usize,
        /// The maximum.
        max: usize,
    },

    /// The payload does not match its checksum.
    #[error("checksum mismatch on {kind:?} #{sequence}: header {expected:#04x}, payload {actual:#04x}")]
    ChecksumMismatch {
        /// Kind of the corrupted envelope.
        kind: EnvelopeKind,
        /// Sequence number as received (may itself be corrupt).
        sequence: u8,
        /// Checksum carried in the header.
        expected: u8,
        /// Checksum computed over the received payload.
        actual: u8,
    },

    /// An ack carried bytes after the sequence number.
    #[error("ack envelope carries {len} bytes, expected {ACK_LEN}")]
    AckWithPayload {
        /// Length of the offending datagram.
        len: usize,
    },
}

/// Encode an unreliable or reliable message envelope.
pub fn encode_message(
    reliable: bool,
    sequence: u8,
    payload: &[u8],
) -> Result<Vec<u8>, EnvelopeError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(EnvelopeError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        });
    }

    let kind = if reliable {
        EnvelopeKind::Reliable
    } else {
        EnvelopeKind::Unreliable
    };

    let mut datagram = Vec::with_capacity(HEADER_LEN + payload.len());
    datagram.push(kind as u8);
    datagram.push(sequence);
    datagram.push(crc8(payload));
    datagram.extend_from_slice(payload);
    Ok(datagram)
}

/// Encode an ack for `sequence`.
pub fn encode_ack(sequence: u8) -> [u8; ACK_LEN] {
    [EnvelopeKind::Ack as u8, sequence]
}

/// Decode one datagram, verifying the checksum of message envelopes.
///
/// The checksum covers the payload only. A damaged kind or sequence byte is
/// not detected, so a corrupted reliable envelope can arrive as an
/// unreliable one.
pub fn decode(datagram: &[u8]) -> Result<Envelope<'_>, EnvelopeError> {
    let (&kind_byte, rest) = datagram.split_first().ok_or(EnvelopeError::Truncated { len: 0 })?;
    let kind = EnvelopeKind::try_from(kind_byte)?;

    match kind {
        EnvelopeKind::Ack => match rest {
            [sequence] => Ok(Envelope::Ack {
                sequence: *sequence,
            }),
            [] => Err(EnvelopeError::Truncated {
                len: datagram.len(),
            }),
            _ => Err(EnvelopeError::AckWithPayload {
                len: datagram.len(),
            }),
        },
        EnvelopeKind::Unreliable | EnvelopeKind::Reliable => {
            let [sequence, expected, payload @ ..] = rest else {
                return Err(EnvelopeError::Truncated {
                    len: datagram.len(),
                });
            };
            if payload.len() > MAX_PAYLOAD {
                return Err(EnvelopeError::PayloadTooLarge {
                    size: payload.len(),
                    max: MAX_PAYLOAD,
                });
            }
            let actual = crc8(payload);
            if actual != *expected {
                return Err(EnvelopeError::ChecksumMismatch {
                    kind,
                    sequence: *sequence,
                    expected: *expected,
                    actual,
                });
            }
            Ok(Envelope::Message {
                reliable: kind == EnvelopeKind::Reliable,
                sequence: *sequence,
                payload,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_message_layout_is_bit_exact() {
        let datagram = encode_message(true, 7, b"hello").unwrap();
        assert_eq!(datagram, [1, 7, 0x92, b'h', b'e', b'l', b'l', b'o']);
    }

    #[test]
    fn test_unreliable_kind_byte() {
        let datagram = encode_message(false, 255, &[]).unwrap();
        assert_eq!(datagram, [0, 255, 0]);
    }

    #[test]
    fn test_ack_layout_is_bit_exact() {
        assert_eq!(encode_ack(42), [2, 42]);
        assert_eq!(decode(&[2, 42]), Ok(Envelope::Ack { sequence: 42 }));
    }

    #[test]
    fn test_max_payload_accepted() {
        let payload = vec![0xAB; MAX_PAYLOAD];
        let datagram = encode_message(true, 1, &payload).unwrap();
        assert_eq!(datagram.len(), MAX_DATAGRAM);
        assert!(decode(&datagram).is_ok());
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let payload = vec![0u8; MAX_PAYLOAD + 1];
        assert_eq!(
            encode_message(false, 0, &payload),
            Err(EnvelopeError::PayloadTooLarge {
                size: MAX_PAYLOAD + 1,
                max: MAX_PAYLOAD
            })
        );
    }

    #[test]
    fn test_truncated_datagrams_rejected() {
        assert_eq!(decode(&[]), Err(EnvelopeError::Truncated { len: 0 }));
        assert_eq!(decode(&[1, 3]), Err(EnvelopeError::Truncated { len: 2 }));
        assert_eq!(decode(&[2]), Err(EnvelopeError::Truncated { len: 1 }));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert_eq!(decode(&[9, 0, 0]), Err(EnvelopeError::UnknownKind(9)));
    }

    #[test]
    fn test_ack_with_trailing_bytes_rejected() {
        assert_eq!(
            decode(&[2, 1, 0]),
            Err(EnvelopeError::AckWithPayload { len: 3 })
        );
    }

    proptest! {
        #[test]
        fn prop_intact_envelope_decodes(
            reliable in any::<bool>(),
            sequence in any::<u8>(),
            payload in proptest::collection::vec(any::<u8>(), 0..=MAX_PAYLOAD),
        ) {
            let datagram = encode_message(reliable, sequence, &payload).unwrap();
            let decoded = decode(&datagram).unwrap();
            prop_assert_eq!(decoded, Envelope::Message { reliable, sequence, payload: &payload });
        }

        #[test]
        fn prop_bit_flip_in_checksum_or_payload_is_detected(
            sequence in any::<u8>(),
            payload in proptest::collection::vec(any::<u8>(), 1..256),
            flip in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let mut datagram = encode_message(true, sequence, &payload).unwrap();
            // Byte 2 is the checksum, everything after it is payload.
            let target = 2 + flip.index(datagram.len() - 2);
            datagram[target] ^= 1 << bit;
            let is_checksum_mismatch = matches!(
                decode(&datagram),
                Err(EnvelopeError::ChecksumMismatch { .. })
            );
            prop_assert!(is_checksum_mismatch);
        }
    }
}
