//! JSON serialization helpers shared by the persistence layer.

/// Uniform to/from-JSON-string interface with a caller-chosen error type.
///
/// The persistence module provides a blanket implementation for every
/// `Serialize + DeserializeOwned` type using its own error, which keeps
/// store code lean: `session.to_json_string()?` instead of ad-hoc
/// `serde_json` plumbing at each call site.
pub trait JsonSerializable<E>: Sized {
    fn to_json_string(&self) -> Result<String, E>;
    fn from_json_str(s: &str) -> Result<Self, E>;
}
