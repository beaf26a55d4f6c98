//! Query-protocol parameter handling.
//!
//! Requests arrive as form-encoded key/value pairs with indexed groups like
//! `Attribute.1.Name` / `Attribute.1.Value` and nested groups like
//! `SendMessageBatchRequestEntry.2.MessageAttribute.1.Name`. `indexed`
//! peels one level of `Prefix.N.` and returns the remainder as a nested
//! parameter set, so batch entries parse with the same accessors as
//! top-level requests.

use std::collections::{BTreeMap, HashMap};

use crate::error::SqsError;
use crate::message::MessageAttributeValue;

#[derive(Debug, Clone, Default)]
pub struct Params {
    pairs: Vec<(String, String)>,
}

impl Params {
    pub fn parse(body: &[u8]) -> Result<Self, SqsError> {
        let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(body)
            .map_err(|e| SqsError::InvalidParameterValue(format!("Malformed request body: {e}")))?;
        Ok(Params { pairs })
    }

    fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        Params { pairs }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn require(&self, name: &str) -> Result<&str, SqsError> {
        self.get(name).ok_or_else(|| {
            SqsError::MissingParameter(format!(
                "The request must contain the parameter {name}."
            ))
        })
    }

    pub fn get_i64(&self, name: &str) -> Result<Option<i64>, SqsError> {
        match self.get(name) {
            None => Ok(None),
            Some(raw) => raw.parse::<i64>().map(Some).map_err(|_| {
                SqsError::InvalidParameterValue(format!("Invalid value for {name}: {raw}"))
            }),
        }
    }

    /// One level of `Prefix.N.` grouping, ordered by N. A bare `Prefix.N`
    /// value is exposed under the empty key.
    pub fn indexed(&self, prefix: &str) -> Vec<Params> {
        let mut groups: BTreeMap<u32, Vec<(String, String)>> = BTreeMap::new();
        for (key, value) in &self.pairs {
            let Some(rest) = key.strip_prefix(prefix).and_then(|r| r.strip_prefix('.')) else {
                continue;
            };
            let (index_str, suffix) = match rest.split_once('.') {
                Some((i, s)) => (i, s),
                None => (rest, ""),
            };
            let Ok(index) = index_str.parse::<u32>() else { continue };
            groups
                .entry(index)
                .or_default()
                .push((suffix.to_string(), value.clone()));
        }
        groups
            .into_values()
            .map(Params::from_pairs)
            .collect()
    }

    /// `Prefix.N` values in index order (e.g. `AttributeName.1`).
    pub fn list(&self, prefix: &str) -> Vec<String> {
        self.indexed(prefix)
            .into_iter()
            .filter_map(|group| group.get("").map(str::to_string))
            .collect()
    }

    /// `Prefix.N.Name` / `Prefix.N.Value` pairs as a map.
    pub fn attribute_entries(&self, prefix: &str) -> Result<HashMap<String, String>, SqsError> {
        let mut map = HashMap::new();
        for group in self.indexed(prefix) {
            let name = group.require("Name")?.to_string();
            let value = group.require("Value")?.to_string();
            map.insert(name, value);
        }
        Ok(map)
    }

    /// `MessageAttribute.N.Name` + `MessageAttribute.N.Value.*` groups.
    pub fn message_attributes(&self) -> Result<HashMap<String, MessageAttributeValue>, SqsError> {
        let mut attrs = HashMap::new();
        for group in self.indexed("MessageAttribute") {
            let name = group.require("Name")?.to_string();
            let data_type = group.require("Value.DataType")?.to_string();
            attrs.insert(
                name,
                MessageAttributeValue {
                    data_type,
                    string_value: group.get("Value.StringValue").map(str::to_string),
                    binary_value: group.get("Value.BinaryValue").map(str::to_string),
                },
            );
        }
        Ok(attrs)
    }
}
