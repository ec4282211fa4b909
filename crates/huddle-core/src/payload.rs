//! Opaque message payloads.

use bytes::Bytes;

/// A message body moving through the hub.
///
/// The core never interprets payloads; only application handlers do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Bytes),
}

impl Payload {
    /// Text content, if this is a text payload.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    /// Raw bytes of the payload regardless of kind.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Whether the payload carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialize a JSON value into a text payload.
    pub fn json(value: &serde_json::Value) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Self::Binary(bytes)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_accessors() {
        let p = Payload::from("hello");
        assert_eq!(p.as_text(), Some("hello"));
        assert_eq!(p.len(), 5);
        assert!(!p.is_empty());
    }

    #[test]
    fn binary_has_no_text() {
        let p = Payload::from(vec![0u8, 159, 146, 150]);
        assert!(p.as_text().is_none());
        assert_eq!(p.as_bytes(), &[0u8, 159, 146, 150]);
    }

    #[test]
    fn json_payload_is_text() {
        let p = Payload::json(&serde_json::json!({"type": "join"}));
        assert_eq!(p.as_text(), Some(r#"{"type":"join"}"#));
    }

    #[test]
    fn empty_text() {
        assert!(Payload::from(String::new()).is_empty());
    }
}
