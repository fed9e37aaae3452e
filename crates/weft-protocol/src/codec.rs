//! Framing of [`SyncMessage`]s: a big-endian length, one tag byte, then
//! the bincode body.

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::{SyncMessage, MAX_MESSAGE_SIZE};

const KNOWN_TAGS: [u8; 4] = [1, 2, 3, 4];

/// Codec for framed sync messages.
pub struct SyncCodec;

impl SyncCodec {
    /// Encode a message with framing: [4 bytes len][1 byte tag][payload]
    pub fn encode(msg: &SyncMessage) -> ProtocolResult<Vec<u8>> {
        let payload = Self::encode_payload(msg)?;
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: payload.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        let len = (payload.len() + 1) as u32;
        let mut buf = Vec::with_capacity(4 + 1 + payload.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.push(msg.type_tag());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Decode a framed message. Returns (message, bytes_consumed).
    pub fn decode(data: &[u8]) -> ProtocolResult<(SyncMessage, usize)> {
        if data.len() < 5 {
            return Err(ProtocolError::FramingError("too short".into()));
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&data[0..4]);
        let len = u32::from_be_bytes(len_bytes) as usize;
        if len < 1 {
            return Err(ProtocolError::FramingError("zero-length frame".into()));
        }
        if len - 1 > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: len - 1,
                max: MAX_MESSAGE_SIZE,
            });
        }
        let total = 4 + len;
        if data.len() < total {
            return Err(ProtocolError::FramingError(format!(
                "incomplete: have {}, need {}",
                data.len(),
                total
            )));
        }
        let tag = data[4];
        if !KNOWN_TAGS.contains(&tag) {
            return Err(ProtocolError::InvalidMessageType(tag));
        }
        let msg = Self::decode_payload(&data[5..total])?;
        if msg.type_tag() != tag {
            return Err(ProtocolError::FramingError(format!(
                "tag {tag} does not match {} payload",
                msg.type_name()
            )));
        }
        Ok((msg, total))
    }

    /// Decode every complete frame in `data`.
    ///
    /// Returns the messages and the number of bytes consumed; a trailing
    /// partial frame is left for the caller to complete.
    pub fn decode_all(data: &[u8]) -> ProtocolResult<(Vec<SyncMessage>, usize)> {
        let mut messages = Vec::new();
        let mut offset = 0;
        while data.len() - offset >= 5 {
            let mut len_bytes = [0u8; 4];
            len_bytes.copy_from_slice(&data[offset..offset + 4]);
            if data.len() - offset < 4 + u32::from_be_bytes(len_bytes) as usize {
                break;
            }
            let (msg, consumed) = Self::decode(&data[offset..])?;
            messages.push(msg);
            offset += consumed;
        }
        Ok((messages, offset))
    }

    /// Encode payload only (no framing).
    pub fn encode_payload(msg: &SyncMessage) -> ProtocolResult<Vec<u8>> {
        bincode::serialize(msg).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Decode payload only (no framing).
    pub fn decode_payload(data: &[u8]) -> ProtocolResult<SyncMessage> {
        bincode::deserialize(data).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;
    use weft_types::ContentId;

    use super::*;

    fn samples() -> Vec<SyncMessage> {
        vec![
            SyncMessage::Heads {
                log_id: "log".into(),
                heads: vec![vec![1, 2, 3], vec![4]],
            },
            SyncMessage::Update {
                log_id: "log".into(),
                entry: vec![9; 64],
            },
            SyncMessage::fetch_request(vec![ContentId::from_bytes(b"want")]),
            SyncMessage::FetchResponse {
                request_id: Uuid::now_v7(),
                blocks: vec![
                    (ContentId::from_bytes(b"have"), Some(vec![7, 7])),
                    (ContentId::from_bytes(b"gone"), None),
                ],
            },
        ]
    }

    #[test]
    fn framed_messages_decode_to_the_same_value() {
        for msg in samples() {
            let encoded = SyncCodec::encode(&msg).unwrap();
            let (decoded, consumed) = SyncCodec::decode(&encoded).unwrap();
            assert_eq!(consumed, encoded.len());
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn type_tags_unique() {
        let mut tags: Vec<u8> = samples().iter().map(|m| m.type_tag()).collect();
        let len = tags.len();
        tags.sort();
        tags.dedup();
        assert_eq!(tags.len(), len, "type tags should be unique");
        assert_eq!(tags, KNOWN_TAGS.to_vec());
    }

    #[test]
    fn fetch_requests_get_distinct_v7_ids() {
        let ids: Vec<Uuid> = (0..3)
            .map(|_| match SyncMessage::fetch_request(vec![]) {
                SyncMessage::FetchRequest { request_id, .. } => request_id,
                _ => unreachable!(),
            })
            .collect();
        assert_ne!(ids[0], ids[1]);
        assert_ne!(ids[1], ids[2]);
        assert!(ids.iter().all(|id| id.get_version_num() == 7));
    }

    #[test]
    fn decode_truncated() {
        let err = SyncCodec::decode(&[0, 0, 0]).unwrap_err();
        assert!(matches!(err, ProtocolError::FramingError(_)));

        let encoded = SyncCodec::encode(&samples()[0]).unwrap();
        let err = SyncCodec::decode(&encoded[..encoded.len() - 1]).unwrap_err();
        assert!(matches!(err, ProtocolError::FramingError(_)));
    }

    #[test]
    fn decode_zero_length() {
        let data = [0u8, 0, 0, 0, 0];
        let err = SyncCodec::decode(&data).unwrap_err();
        assert!(matches!(err, ProtocolError::FramingError(_)));
    }

    #[test]
    fn decode_oversized_frame() {
        let len = (MAX_MESSAGE_SIZE as u32 + 2).to_be_bytes();
        let data = [len[0], len[1], len[2], len[3], 1];
        let err = SyncCodec::decode(&data).unwrap_err();
        assert!(matches!(err, ProtocolError::MessageTooLarge { .. }));
    }

    #[test]
    fn unknown_or_mismatched_tag_is_rejected() {
        let mut encoded = SyncCodec::encode(&samples()[1]).unwrap();
        encoded[4] = 42;
        assert!(matches!(
            SyncCodec::decode(&encoded).unwrap_err(),
            ProtocolError::InvalidMessageType(42)
        ));

        encoded[4] = 1;
        assert!(matches!(
            SyncCodec::decode(&encoded).unwrap_err(),
            ProtocolError::FramingError(_)
        ));
    }

    #[test]
    fn garbage_payload_is_a_decode_error() {
        let data = [0u8, 0, 0, 4, 2, 0xff, 0xff, 0xff];
        let err = SyncCodec::decode(&data).unwrap_err();
        assert!(matches!(err, ProtocolError::Deserialization(_)));
    }

    #[test]
    fn decode_all_stops_at_partial_frame() {
        let mut stream = Vec::new();
        for msg in samples() {
            stream.extend(SyncCodec::encode(&msg).unwrap());
        }
        let tail = SyncCodec::encode(&samples()[0]).unwrap();
        stream.extend_from_slice(&tail[..3]);

        let (messages, consumed) = SyncCodec::decode_all(&stream).unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(consumed, stream.len() - 3);
    }
}
