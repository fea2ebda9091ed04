//! Binary framing for object uploads and downloads.
//!
//! Object payloads travel as `[4 bytes len][1 byte version][bincode]`, where
//! `len` counts the version byte plus the payload. The payload is an
//! [`ObjectTransfer`]; the receiver still verifies the digest itself.

use serde::{Deserialize, Serialize};

use cts_store::ObjectKind;
use cts_types::Digest;

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::{MAX_OBJECT_SIZE, PROTOCOL_VERSION};

/// Content type used for framed object bodies.
pub const OBJECT_CONTENT_TYPE: &str = "application/x-cts-object";

/// Room for the digest, kind, and bincode length prefixes around the data.
const FRAME_OVERHEAD: usize = 256;

const HEADER_LEN: usize = 5;

/// One object on the wire: its claimed digest, kind, and canonical bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectTransfer {
    pub digest: Digest,
    pub kind: ObjectKind,
    pub data: Vec<u8>,
}

impl ObjectTransfer {
    pub fn new(digest: Digest, kind: ObjectKind, data: Vec<u8>) -> Self {
        Self { digest, kind, data }
    }
}

/// Codec for framed [`ObjectTransfer`] messages.
pub struct TransferCodec;

impl TransferCodec {
    pub fn encode(transfer: &ObjectTransfer) -> ProtocolResult<Vec<u8>> {
        if transfer.data.len() > MAX_OBJECT_SIZE {
            return Err(ProtocolError::ObjectTooLarge {
                size: transfer.data.len(),
                max: MAX_OBJECT_SIZE,
            });
        }
        let payload = bincode::serialize(transfer)
            .map_err(|e| ProtocolError::Encode(e.to_string()))?;
        let len = (payload.len() + 1) as u32;
        let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.push(PROTOCOL_VERSION as u8);
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Decode one frame from the front of `data`. Returns (transfer, bytes_consumed).
    pub fn decode(data: &[u8]) -> ProtocolResult<(ObjectTransfer, usize)> {
        if data.len() < HEADER_LEN {
            return Err(ProtocolError::Frame("too short".into()));
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if len < 1 {
            return Err(ProtocolError::Frame("zero-length frame".into()));
        }
        let max = MAX_OBJECT_SIZE + FRAME_OVERHEAD;
        if len - 1 > max {
            return Err(ProtocolError::ObjectTooLarge { size: len - 1, max });
        }
        let version = u32::from(data[4]);
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion {
                expected: PROTOCOL_VERSION,
                found: version,
            });
        }
        let total = 4 + len;
        if data.len() < total {
            return Err(ProtocolError::Frame(format!(
                "incomplete: have {}, need {}",
                data.len(),
                total
            )));
        }
        let transfer: ObjectTransfer = bincode::deserialize(&data[HEADER_LEN..total])
            .map_err(|e| ProtocolError::Decode(e.to_string()))?;
        if transfer.data.len() > MAX_OBJECT_SIZE {
            return Err(ProtocolError::ObjectTooLarge {
                size: transfer.data.len(),
                max: MAX_OBJECT_SIZE,
            });
        }
        Ok((transfer, total))
    }

    /// Decode a body that must hold exactly one frame.
    pub fn decode_body(data: &[u8]) -> ProtocolResult<ObjectTransfer> {
        let (transfer, consumed) = Self::decode(data)?;
        if consumed != data.len() {
            return Err(ProtocolError::Frame(format!(
                "{} trailing bytes after frame",
                data.len() - consumed
            )));
        }
        Ok(transfer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ObjectTransfer {
        ObjectTransfer::new(Digest::of(b"obj"), ObjectKind::Blob, b"payload".to_vec())
    }

    #[test]
    fn frame_roundtrip() {
        let transfer = sample();
        let encoded = TransferCodec::encode(&transfer).unwrap();
        let (decoded, consumed) = TransferCodec::decode(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded, transfer);
    }

    #[test]
    fn frames_can_be_concatenated() {
        let first = sample();
        let second = ObjectTransfer::new(Digest::of(b"t"), ObjectKind::Tree, vec![2, 0, 0, 0, 0]);
        let mut buf = TransferCodec::encode(&first).unwrap();
        buf.extend(TransferCodec::encode(&second).unwrap());

        let (a, used) = TransferCodec::decode(&buf).unwrap();
        let (b, rest) = TransferCodec::decode(&buf[used..]).unwrap();
        assert_eq!(a, first);
        assert_eq!(b, second);
        assert_eq!(used + rest, buf.len());
    }

    #[test]
    fn decode_truncated() {
        let err = TransferCodec::decode(&[0, 0, 0]).unwrap_err();
        assert!(matches!(err, ProtocolError::Frame(_)));

        let encoded = TransferCodec::encode(&sample()).unwrap();
        let err = TransferCodec::decode(&encoded[..encoded.len() - 1]).unwrap_err();
        assert!(matches!(err, ProtocolError::Frame(_)));
    }

    #[test]
    fn decode_zero_length() {
        let data = [0u8, 0, 0, 0, 1];
        let err = TransferCodec::decode(&data).unwrap_err();
        assert!(matches!(err, ProtocolError::Frame(_)));
    }

    #[test]
    fn decode_rejects_oversized_frame_header() {
        let mut data = u32::MAX.to_be_bytes().to_vec();
        data.push(PROTOCOL_VERSION as u8);
        let err = TransferCodec::decode(&data).unwrap_err();
        assert!(matches!(err, ProtocolError::ObjectTooLarge { .. }));
    }

    #[test]
    fn decode_rejects_unknown_version() {
        let mut encoded = TransferCodec::encode(&sample()).unwrap();
        encoded[4] = 9;
        let err = TransferCodec::decode(&encoded).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::UnsupportedVersion { found: 9, .. }
        ));
    }

    #[test]
    fn encode_rejects_oversized_object() {
        let transfer = ObjectTransfer::new(
            Digest::of(b"big"),
            ObjectKind::Blob,
            vec![0; MAX_OBJECT_SIZE + 1],
        );
        assert!(matches!(
            TransferCodec::encode(&transfer),
            Err(ProtocolError::ObjectTooLarge { .. })
        ));
    }

    #[test]
    fn decode_body_rejects_trailing_bytes() {
        let mut encoded = TransferCodec::encode(&sample()).unwrap();
        encoded.push(0);
        assert!(matches!(
            TransferCodec::decode_body(&encoded),
            Err(ProtocolError::Frame(_))
        ));
    }

    #[test]
    fn decode_garbage_payload() {
        let mut data = 4u32.to_be_bytes().to_vec();
        data.push(PROTOCOL_VERSION as u8);
        data.extend_from_slice(&[0xFF, 0xFF, 0xFF]);
        assert!(matches!(
            TransferCodec::decode(&data),
            Err(ProtocolError::Decode(_))
        ));
    }
}
