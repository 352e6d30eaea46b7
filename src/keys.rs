//! Bucket names and key/value encodings.
//!
//! Every bucket is keyed by the 8-byte big-endian chat ID. Phrase and
//! study-time keys append an 8-byte big-endian sequence number, so one
//! chat's phrases form a contiguous key range ordered by insertion.

use crate::error::{Result, StoreError};
use crate::types::ChatId;

pub const MODES: &str = "modes";
pub const PHRASES: &str = "phrases";
pub const STUDYTIMES: &str = "studytimes";
pub const READS: &str = "reads";
pub const ACTIVITIES: &str = "activities";
pub const SUBSCRIPTIONS: &str = "subscriptions";

/// Value stored for a subscription; only its presence matters.
pub const SUBSCRIBED: &[u8] = b"1";

pub fn chat_key(chat_id: ChatId) -> Vec<u8> {
    chat_id.to_be_bytes().to_vec()
}

pub fn phrase_key(chat_id: ChatId, sequence: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&chat_id.to_be_bytes());
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

/// Chat ID of a chat or phrase key.
pub fn chat_of(bucket: &'static str, key: &[u8]) -> Result<ChatId> {
    let head: [u8; 8] = key
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .ok_or(StoreError::CorruptValue {
            bucket,
            len: key.len(),
        })?;
    Ok(ChatId::from_be_bytes(head))
}

/// Smallest key greater than every key starting with `prefix`,
/// or `None` when the prefix is all `0xff`.
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

pub fn encode_i64(v: i64) -> Vec<u8> {
    v.to_be_bytes().to_vec()
}

pub fn decode_i64(bucket: &'static str, b: &[u8]) -> Result<i64> {
    let arr: [u8; 8] = b.try_into().map_err(|_| StoreError::CorruptValue {
        bucket,
        len: b.len(),
    })?;
    Ok(i64::from_be_bytes(arr))
}
