//! Schemaless metadata documents decoded from MessagePack.

use std::fmt;

use rmpv::Value;

/// A decoded document node. Map entries keep their encoded order.
#[derive(Debug, Clone, PartialEq)]
pub enum DocNode {
    Nil,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Binary(Vec<u8>),
    Array(Vec<DocNode>),
    Map(Vec<(DocNode, DocNode)>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    Decode(String),
    InvalidUtf8,
    Extension(i8),
}

impl fmt::Display for DocumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentError::Decode(message) => write!(f, "invalid MessagePack: {message}"),
            DocumentError::InvalidUtf8 => f.write_str("string is not valid UTF-8"),
            DocumentError::Extension(tag) => write!(f, "unsupported extension type {tag}"),
        }
    }
}

impl std::error::Error for DocumentError {}

/// Decode the first MessagePack document in `bytes`. Anything after it is ignored.
///
/// # Errors
///
/// Returns [`DocumentError`] when the bytes do not start with a complete document, or the
/// document holds strings that are not UTF-8 or extension values.
pub fn decode_document(bytes: &[u8]) -> Result<DocNode, DocumentError> {
    let mut cursor = bytes;
    let value = rmpv::decode::read_value(&mut cursor)
        .map_err(|err| DocumentError::Decode(err.to_string()))?;
    DocNode::try_from(value)
}

impl TryFrom<Value> for DocNode {
    type Error = DocumentError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Ok(match value {
            Value::Nil => DocNode::Nil,
            Value::Boolean(flag) => DocNode::Bool(flag),
            Value::Integer(int) => match (int.as_u64(), int.as_i64()) {
                (Some(unsigned), _) => DocNode::UInt(unsigned),
                (None, Some(signed)) => DocNode::Int(signed),
                (None, None) => return Err(DocumentError::Decode("integer out of range".into())),
            },
            Value::F32(float) => DocNode::Float(f64::from(float)),
            Value::F64(float) => DocNode::Float(float),
            Value::String(text) => {
                DocNode::String(text.into_str().ok_or(DocumentError::InvalidUtf8)?)
            }
            Value::Binary(bytes) => DocNode::Binary(bytes),
            Value::Array(items) => DocNode::Array(
                items
                    .into_iter()
                    .map(DocNode::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Map(entries) => DocNode::Map(
                entries
                    .into_iter()
                    .map(|(key, value)| Ok((DocNode::try_from(key)?, DocNode::try_from(value)?)))
                    .collect::<Result<_, DocumentError>>()?,
            ),
            Value::Ext(tag, _) => return Err(DocumentError::Extension(tag)),
        })
    }
}

impl DocNode {
    #[must_use]
    pub fn as_map(&self) -> Option<&[(DocNode, DocNode)]> {
        match self {
            DocNode::Map(entries) => Some(entries),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[DocNode]> {
        match self {
            DocNode::Array(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DocNode::String(text) => Some(text),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DocNode::Bool(flag) => Some(*flag),
            _ => None,
        }
    }

    /// Unsigned view of an integer node; negative integers yield `None`.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            DocNode::UInt(value) => Some(*value),
            DocNode::Int(value) => u64::try_from(*value).ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_u32(&self) -> Option<u32> {
        self.as_u64().and_then(|value| u32::try_from(value).ok())
    }

    #[must_use]
    pub fn is_integer(&self) -> bool {
        matches!(self, DocNode::Int(_) | DocNode::UInt(_))
    }

    /// Look up a string key in a map node. With duplicate keys the last one wins.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&DocNode> {
        self.as_map()?
            .iter()
            .rev()
            .find(|(candidate, _)| candidate.as_str() == Some(key))
            .map(|(_, value)| value)
    }

    /// Text form of a string, integer, or boolean scalar.
    #[must_use]
    pub fn to_scalar_string(&self) -> Option<String> {
        match self {
            DocNode::String(text) => Some(text.clone()),
            DocNode::Int(value) => Some(value.to_string()),
            DocNode::UInt(value) => Some(value.to_string()),
            DocNode::Bool(flag) => Some(flag.to_string()),
            _ => None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            DocNode::Nil => "nil",
            DocNode::Bool(_) => "boolean",
            DocNode::Int(_) | DocNode::UInt(_) => "integer",
            DocNode::Float(_) => "float",
            DocNode::String(_) => "string",
            DocNode::Binary(_) => "binary",
            DocNode::Array(_) => "array",
            DocNode::Map(_) => "map",
        }
    }
}
