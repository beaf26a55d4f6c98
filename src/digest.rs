//! Digest helpers for SQS wire responses.

use std::collections::HashMap;

use base64::Engine as _;
use md5::{Digest as _, Md5};
use sha2::Sha256;

use crate::message::MessageAttributeValue;

pub fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// MD5 over the SQS message-attribute encoding: for each attribute sorted by
/// name, length-prefixed name, length-prefixed DataType, a transport tag byte
/// (1 = String/Number, 2 = Binary), then length-prefixed value bytes.
/// Returns None when there are no attributes.
pub fn md5_of_attributes(attrs: &HashMap<String, MessageAttributeValue>) -> Option<String> {
    if attrs.is_empty() {
        return None;
    }
    let mut keys: Vec<&String> = attrs.keys().collect();
    keys.sort();

    let mut buf: Vec<u8> = Vec::new();
    for key in keys {
        let attr = &attrs[key];

        let name_bytes = key.as_bytes();
        buf.extend_from_slice(&(name_bytes.len() as u32).to_be_bytes());
        buf.extend_from_slice(name_bytes);

        let dt_bytes = attr.data_type.as_bytes();
        buf.extend_from_slice(&(dt_bytes.len() as u32).to_be_bytes());
        buf.extend_from_slice(dt_bytes);

        if attr.data_type.starts_with("Binary") {
            buf.push(2);
            let decoded = attr
                .binary_value
                .as_deref()
                .map(|bv| {
                    base64::engine::general_purpose::STANDARD
                        .decode(bv)
                        .unwrap_or_default()
                })
                .unwrap_or_default();
            buf.extend_from_slice(&(decoded.len() as u32).to_be_bytes());
            buf.extend_from_slice(&decoded);
        } else {
            buf.push(1);
            let value = attr.string_value.as_deref().unwrap_or_default();
            buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
            buf.extend_from_slice(value.as_bytes());
        }
    }

    Some(md5_hex(&buf))
}
