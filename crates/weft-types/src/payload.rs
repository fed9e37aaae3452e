use serde::{Deserialize, Serialize};

/// Well-known operation names used by the database views built on the log.
pub mod ops {
    pub const PUT: &str = "PUT";
    pub const DEL: &str = "DEL";
    pub const ADD: &str = "ADD";
}

/// The operation carried by a log entry.
///
/// The log never interprets a payload; `value` is an opaque byte string so
/// that any encoding chosen by a higher-level view can be stored.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Payload {
    /// Operation name (`PUT`, `DEL`, `ADD`, or view-specific).
    pub op: String,
    /// Optional key the operation applies to.
    pub key: Option<String>,
    /// Optional operation value.
    pub value: Option<Vec<u8>>,
}

impl Payload {
    /// Create a payload with only an operation name.
    pub fn new(op: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            key: None,
            value: None,
        }
    }

    /// Set the key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set the value.
    pub fn with_value(mut self, value: impl Into<Vec<u8>>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// `PUT key = value`.
    pub fn put(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self::new(ops::PUT).with_key(key).with_value(value)
    }

    /// `DEL key`.
    pub fn del(key: impl Into<String>) -> Self {
        Self::new(ops::DEL).with_key(key)
    }

    /// `ADD value` (keyless append, as used by event logs).
    pub fn add(value: impl Into<Vec<u8>>) -> Self {
        Self::new(ops::ADD).with_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_sets_all_fields() {
        let p = Payload::put("k", b"v".to_vec());
        assert_eq!(p.op, ops::PUT);
        assert_eq!(p.key.as_deref(), Some("k"));
        assert_eq!(p.value.as_deref(), Some(&b"v"[..]));
    }

    #[test]
    fn del_has_no_value() {
        let p = Payload::del("k");
        assert_eq!(p.op, ops::DEL);
        assert!(p.value.is_none());
    }

    #[test]
    fn add_has_no_key() {
        let p = Payload::add("hello");
        assert!(p.key.is_none());
        assert_eq!(p.value.as_deref(), Some(&b"hello"[..]));
    }
}
