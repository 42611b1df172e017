//! Composite resource identities such as `cls-abc#kube-system#coredns`.
//!
//! Resources whose remote key is compound are addressed by joining the parts
//! with [`SEPARATOR`]. The joined string is what callers persist; every read,
//! update and delete decodes it again with the arity the kind expects.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::{ConvergeError, ConvergeResult};

pub const SEPARATOR: char = '#';

/// Ordered identity parts. Kinds in practice use one to four.
///
/// Deserializes from a list of parts through [`ResourceIdentity::new`], so a
/// stored identity cannot smuggle in a separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ResourceIdentity {
    parts: SmallVec<[String; 4]>,
}

impl ResourceIdentity {
    /// Build from parts, rejecting any part that contains the separator.
    pub fn new<I, S>(parts: I) -> ConvergeResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: SmallVec<[String; 4]> = SmallVec::new();
        for p in parts {
            let p = p.into();
            if p.contains(SEPARATOR) {
                return Err(ConvergeError::InvalidIdentityPart { part: p, separator: SEPARATOR });
            }
            out.push(p);
        }
        if out.is_empty() {
            return Err(ConvergeError::MalformedIdentity { id: String::new(), expected: 1, found: 0 });
        }
        Ok(Self { parts: out })
    }

    /// Split a persisted identity, requiring exactly `expected` parts.
    pub fn decode(id: &str, expected: usize) -> ConvergeResult<Self> {
        let parts: SmallVec<[String; 4]> = id.split(SEPARATOR).map(|s| s.to_string()).collect();
        if parts.len() != expected {
            return Err(ConvergeError::MalformedIdentity { id: id.to_string(), expected, found: parts.len() });
        }
        Ok(Self { parts })
    }

    pub fn encode(&self) -> String {
        let mut s = String::new();
        for (i, p) in self.parts.iter().enumerate() {
            if i > 0 { s.push(SEPARATOR); }
            s.push_str(p);
        }
        s
    }

    pub fn parts(&self) -> &[String] { &self.parts }

    pub fn len(&self) -> usize { self.parts.len() }

    pub fn is_empty(&self) -> bool { self.parts.is_empty() }

    /// Part `idx`, or `""` when out of range.
    pub fn part(&self, idx: usize) -> &str {
        self.parts.get(idx).map(|s| s.as_str()).unwrap_or("")
    }
}

impl TryFrom<Vec<String>> for ResourceIdentity {
    type Error = ConvergeError;

    fn try_from(parts: Vec<String>) -> ConvergeResult<Self> { Self::new(parts) }
}

impl From<ResourceIdentity> for Vec<String> {
    fn from(id: ResourceIdentity) -> Self { id.parts.into_vec() }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Join parts into a persisted identity string.
pub fn encode<S: AsRef<str>>(parts: &[S]) -> ConvergeResult<String> {
    ResourceIdentity::new(parts.iter().map(|p| p.as_ref().to_string())).map(|id| id.encode())
}

/// Split a persisted identity string into exactly `expected` parts.
pub fn decode(id: &str, expected: usize) -> ConvergeResult<Vec<String>> {
    ResourceIdentity::decode(id, expected).map(|id| id.parts.into_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_three_parts() {
        let cases: &[[&str; 3]] = &[
            ["cls-abc", "kube-system", "coredns"],
            ["", "", ""],
            ["a b", "ns/x", "名前"],
        ];
        for c in cases {
            let id = encode(c).expect("encode");
            let back = decode(&id, 3).expect("decode");
            assert_eq!(back, c.iter().map(|s| s.to_string()).collect::<Vec<_>>());
        }
    }

    #[test]
    fn decode_rejects_arity_mismatch() {
        for (id, n, found) in [("a#b", 3usize, 2usize), ("a#b#c#d", 3, 4), ("a", 2, 1), ("a#b", 1, 2)] {
            match decode(id, n) {
                Err(ConvergeError::MalformedIdentity { expected, found: f, .. }) => {
                    assert_eq!(expected, n);
                    assert_eq!(f, found);
                }
                other => panic!("{id}: expected MalformedIdentity, got {other:?}"),
            }
        }
    }

    #[test]
    fn encode_rejects_separator_in_part() {
        let err = encode(&["cls-1", "bad#part"]).unwrap_err();
        assert!(matches!(err, ConvergeError::InvalidIdentityPart { ref part, .. } if part == "bad#part"));
    }

    #[test]
    fn encode_rejects_no_parts() {
        let none: [&str; 0] = [];
        assert!(encode(&none).is_err());
    }

    #[test]
    fn identity_accessors() {
        let id = ResourceIdentity::new(["cls-1", "np-2"]).unwrap();
        assert_eq!(id.to_string(), "cls-1#np-2");
        assert_eq!(id.part(0), "cls-1");
        assert_eq!(id.part(1), "np-2");
        assert_eq!(id.part(7), "");
        assert_eq!(id.len(), 2);
        assert_eq!(ResourceIdentity::decode("cls-1#np-2", 2).unwrap(), id);
    }

    #[test]
    fn deserializing_checks_parts_like_new() {
        let id: ResourceIdentity = serde_json::from_str(r#"["cls-1","np-2"]"#).expect("valid parts");
        assert_eq!(id.encode(), "cls-1#np-2");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#"["cls-1","np-2"]"#);
        let err = serde_json::from_str::<ResourceIdentity>(r#"["a#b"]"#).unwrap_err();
        assert!(err.to_string().contains("separator"), "{err}");
        assert!(serde_json::from_str::<ResourceIdentity>("[]").is_err());
    }
}
