//! Attribute type tags for indexed columns.

use serde::{Deserialize, Serialize};

/// Type of the attribute over which an index is built.
///
/// The tag is persisted in the index meta page and validated when an
/// existing index file is reopened. Only `Integer` attributes are
/// currently operable; the other tags exist so that a mismatching file
/// is rejected rather than misread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum AttrType {
    /// 32-bit signed integer.
    Integer = 0,
    /// 64-bit IEEE 754 floating point.
    Double = 1,
    /// Fixed-length character string.
    String = 2,
}

impl AttrType {
    /// Decodes a persisted tag value.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(AttrType::Integer),
            1 => Some(AttrType::Double),
            2 => Some(AttrType::String),
            _ => None,
        }
    }

    /// Returns the tag value persisted on disk.
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// Returns the fixed byte size of a key of this type, or None for
    /// variable-length keys.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            AttrType::Integer => Some(4),
            AttrType::Double => Some(8),
            AttrType::String => None,
        }
    }
}

impl std::fmt::Display for AttrType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AttrType::Integer => "INTEGER",
            AttrType::Double => "DOUBLE",
            AttrType::String => "STRING",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_values() {
        assert_eq!(AttrType::Integer.as_u32(), 0);
        assert_eq!(AttrType::Double.as_u32(), 1);
        assert_eq!(AttrType::String.as_u32(), 2);
    }

    #[test]
    fn test_from_u32_roundtrip() {
        for attr in [AttrType::Integer, AttrType::Double, AttrType::String] {
            assert_eq!(AttrType::from_u32(attr.as_u32()), Some(attr));
        }
    }

    #[test]
    fn test_from_u32_rejects_unknown() {
        assert_eq!(AttrType::from_u32(3), None);
        assert_eq!(AttrType::from_u32(u32::MAX), None);
    }

    #[test]
    fn test_fixed_size() {
        assert_eq!(AttrType::Integer.fixed_size(), Some(4));
        assert_eq!(AttrType::Double.fixed_size(), Some(8));
        assert_eq!(AttrType::String.fixed_size(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(AttrType::Integer.to_string(), "INTEGER");
        assert_eq!(AttrType::Double.to_string(), "DOUBLE");
        assert_eq!(AttrType::String.to_string(), "STRING");
    }

    #[test]
    fn test_serde_roundtrip() {
        for attr in [AttrType::Integer, AttrType::Double, AttrType::String] {
            let serialized = serde_json::to_string(&attr).unwrap();
            let deserialized: AttrType = serde_json::from_str(&serialized).unwrap();
            assert_eq!(attr, deserialized);
        }
    }
}
