use std::collections::HashMap;

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::SqsError;

/// A typed message attribute as carried on the wire. Binary values stay
/// base64-encoded; they are only decoded for digest computation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAttributeValue {
    pub data_type: String,
    pub string_value: Option<String>,
    pub binary_value: Option<String>,
}

impl MessageAttributeValue {
    pub fn string(value: impl Into<String>) -> Self {
        MessageAttributeValue {
            data_type: "String".into(),
            string_value: Some(value.into()),
            binary_value: None,
        }
    }

    pub fn number(value: impl Into<String>) -> Self {
        MessageAttributeValue {
            data_type: "Number".into(),
            string_value: Some(value.into()),
            binary_value: None,
        }
    }

    pub fn binary(base64_value: impl Into<String>) -> Self {
        MessageAttributeValue {
            data_type: "Binary".into(),
            string_value: None,
            binary_value: Some(base64_value.into()),
        }
    }

    pub fn is_binary(&self) -> bool {
        self.data_type.starts_with("Binary")
    }

    /// Base type must be String, Number, or Binary; an optional custom
    /// subtype follows after a dot (e.g. `Number.float`).
    pub fn validate(&self, name: &str) -> Result<(), SqsError> {
        let base = self.data_type.split('.').next().unwrap_or("");
        if !matches!(base, "String" | "Number" | "Binary") {
            return Err(SqsError::InvalidParameterValue(format!(
                "The message attribute '{name}' has an invalid message attribute type: {}",
                self.data_type
            )));
        }
        if self.is_binary() {
            if self.binary_value.is_none() {
                return Err(SqsError::InvalidParameterValue(format!(
                    "The message attribute '{name}' must contain a non-empty binary value"
                )));
            }
        } else if self.string_value.is_none() {
            return Err(SqsError::InvalidParameterValue(format!(
                "The message attribute '{name}' must contain a non-empty string value"
            )));
        }
        Ok(())
    }

    /// Bytes this attribute contributes to the message size limit:
    /// name + data type + decoded value.
    fn wire_size(&self, name: &str) -> usize {
        let value_len = if self.is_binary() {
            self.binary_value
                .as_deref()
                .map(|bv| {
                    base64::engine::general_purpose::STANDARD
                        .decode(bv)
                        .map(|d| d.len())
                        .unwrap_or(bv.len())
                })
                .unwrap_or(0)
        } else {
            self.string_value.as_deref().map(str::len).unwrap_or(0)
        };
        name.len() + self.data_type.len() + value_len
    }
}

pub fn attributes_size(attrs: &HashMap<String, MessageAttributeValue>) -> usize {
    attrs.iter().map(|(name, attr)| attr.wire_size(name)).sum()
}

/// Delivery state. A removed message leaves the store entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageState {
    Pending { visible_at: u64 },
    Inflight { receipt_handle: String, deadline: u64 },
}

impl MessageState {
    /// Key time for the visibility index: when the message next changes
    /// eligibility on its own.
    pub fn index_time(&self) -> u64 {
        match self {
            MessageState::Pending { visible_at } => *visible_at,
            MessageState::Inflight { deadline, .. } => *deadline,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub body: String,
    pub md5_of_body: String,
    pub attributes: HashMap<String, MessageAttributeValue>,
    pub md5_of_attributes: Option<String>,
    pub sent_at: u64,
    pub first_received_at: Option<u64>,
    pub receive_count: u32,
    pub state: MessageState,
    pub order_index: u64,
    pub group_id: Option<String>,
    pub dedup_id: Option<String>,
    /// True while this pending message is counted as delayed; flipped by the
    /// queue tick when visible_at passes.
    pub(crate) counted_delayed: bool,
}
