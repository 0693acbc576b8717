//! Query keys and their string identities.
//!
//! A [`QueryKey`] is an ordered list of [`KeyPart`]s. Each part is either a
//! literal [`KeyValue`] or a zero-argument accessor that is evaluated every
//! time the key's identity is computed. Accessors are how a key changes over
//! time without being re-issued: they read state owned by the application.
//!
//! # Identity
//!
//! [`hash_key`] evaluates every part in order and joins the literals with
//! `:`. Keys that evaluate to the same literals share one identity and
//! therefore one cache entry.
//!
//! The join is not injective: `[1, 2]` and `["1", "2"]` both become `"1:2"`.
//! Cache sharing depends on this exact scheme, so it is kept as is.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicI64, Ordering};
//! use tears_query::key::{KeyPart, hash_key};
//! use tears_query::query_key;
//!
//! let user_id = Arc::new(AtomicI64::new(1));
//! let id = user_id.clone();
//! let key = query_key!["user", KeyPart::dynamic(move || id.load(Ordering::SeqCst))];
//!
//! assert_eq!(hash_key(&key).as_str(), "user:1");
//!
//! user_id.store(2, Ordering::SeqCst);
//! assert_eq!(hash_key(&key).as_str(), "user:2");
//! ```

use std::fmt;
use std::sync::Arc;

/// Separator placed between evaluated key parts.
pub const DELIMITER: &str = ":";

/// A literal key value.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Str(value) => f.write_str(value),
        }
    }
}

macro_rules! impl_key_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for KeyValue {
                fn from(value: $ty) -> Self {
                    Self::$variant(value.into())
                }
            }

            impl From<$ty> for KeyPart {
                fn from(value: $ty) -> Self {
                    Self::Value(KeyValue::from(value))
                }
            }
        )*
    };
}

impl_key_value_from! {
    bool => Bool,
    i8 => Int,
    i16 => Int,
    i32 => Int,
    i64 => Int,
    u8 => Int,
    u16 => Int,
    u32 => Int,
    f32 => Float,
    f64 => Float,
    String => Str,
    &str => Str,
}

impl From<()> for KeyValue {
    fn from((): ()) -> Self {
        Self::Null
    }
}

impl From<()> for KeyPart {
    fn from((): ()) -> Self {
        Self::Value(KeyValue::Null)
    }
}

impl<T: Into<KeyValue>> From<Option<T>> for KeyValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

type Accessor = Arc<dyn Fn() -> KeyValue + Send + Sync>;

/// One element of a [`QueryKey`].
#[derive(Clone)]
pub enum KeyPart {
    /// A literal that never changes.
    Value(KeyValue),
    /// An accessor read every time the identity is computed.
    Dynamic(Accessor),
}

impl KeyPart {
    /// Creates a dynamic part from an accessor.
    ///
    /// The accessor must not have side effects of its own; it is called once
    /// per identity computation.
    pub fn dynamic<F, V>(accessor: F) -> Self
    where
        F: Fn() -> V + Send + Sync + 'static,
        V: Into<KeyValue>,
    {
        Self::Dynamic(Arc::new(move || accessor().into()))
    }

    /// Returns the current literal of this part.
    #[must_use]
    pub fn evaluate(&self) -> KeyValue {
        match self {
            Self::Value(value) => value.clone(),
            Self::Dynamic(accessor) => accessor(),
        }
    }

    /// Returns `true` if this part is an accessor.
    #[must_use]
    pub const fn is_dynamic(&self) -> bool {
        matches!(self, Self::Dynamic(_))
    }
}

impl From<KeyValue> for KeyPart {
    fn from(value: KeyValue) -> Self {
        Self::Value(value)
    }
}

impl fmt::Debug for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// An ordered sequence of key parts describing one query.
#[derive(Debug, Clone, Default)]
pub struct QueryKey {
    parts: Vec<KeyPart>,
}

impl QueryKey {
    /// Creates a key from its parts.
    pub fn new(parts: impl IntoIterator<Item = KeyPart>) -> Self {
        Self {
            parts: parts.into_iter().collect(),
        }
    }

    /// Appends a part, builder style.
    #[must_use]
    pub fn with(mut self, part: impl Into<KeyPart>) -> Self {
        self.parts.push(part.into());
        self
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.parts
    }

    /// Evaluates every part, in order.
    #[must_use]
    pub fn evaluate(&self) -> Vec<KeyValue> {
        self.parts.iter().map(KeyPart::evaluate).collect()
    }
}

impl FromIterator<KeyPart> for QueryKey {
    fn from_iter<I: IntoIterator<Item = KeyPart>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// Builds a [`QueryKey`] from values convertible into [`KeyPart`].
///
/// ```
/// use tears_query::query_key;
/// use tears_query::key::hash_key;
///
/// let key = query_key!["todos", 3, true];
/// assert_eq!(hash_key(&key).as_str(), "todos:3:true");
/// ```
#[macro_export]
macro_rules! query_key {
    ($($part:expr),* $(,)?) => {
        $crate::key::QueryKey::new([$($crate::key::KeyPart::from($part)),*])
    };
}

/// The canonical string form of an evaluated key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyIdentity(String);

impl KeyIdentity {
    /// Joins already-evaluated literals into an identity.
    pub fn from_values(values: &[KeyValue]) -> Self {
        let joined = values
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(DELIMITER);
        Self(joined)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for KeyIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Computes the identity of `key` as of now.
///
/// Never cached: accessors are re-read on every call.
#[must_use]
pub fn hash_key(key: &QueryKey) -> KeyIdentity {
    KeyIdentity::from_values(&key.evaluate())
}

/// Evaluates `key` once and returns both the literals and their identity.
pub(crate) fn resolve_key(key: &QueryKey) -> (Vec<KeyValue>, KeyIdentity) {
    let values = key.evaluate();
    let identity = KeyIdentity::from_values(&values);
    (values, identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

    #[test]
    fn test_literal_key_identity() {
        let key = query_key!["user", 1, true, 2.5, ()];
        assert_eq!(hash_key(&key).as_str(), "user:1:true:2.5:null");
    }

    #[test]
    fn test_empty_key_identity() {
        assert_eq!(hash_key(&QueryKey::default()).as_str(), "");
    }

    #[test]
    fn test_equal_literals_share_identity() {
        let literal = query_key!["user", 7];
        let dynamic = query_key!["user", KeyPart::dynamic(|| 7)];
        assert_eq!(hash_key(&literal), hash_key(&dynamic));
    }

    #[test]
    fn test_join_is_not_injective() {
        let numbers = query_key![1, 2];
        let strings = query_key!["1", "2"];
        assert_eq!(hash_key(&numbers), hash_key(&strings));
    }

    #[test]
    fn test_dynamic_part_is_read_on_every_hash() {
        let current = Arc::new(AtomicI64::new(1));
        let reads = Arc::new(AtomicUsize::new(0));
        let (c, r) = (current.clone(), reads.clone());
        let key = query_key![
            "user",
            KeyPart::dynamic(move || {
                r.fetch_add(1, Ordering::SeqCst);
                c.load(Ordering::SeqCst)
            })
        ];

        assert_eq!(hash_key(&key).as_str(), "user:1");
        current.store(2, Ordering::SeqCst);
        assert_eq!(hash_key(&key).as_str(), "user:2");
        assert_eq!(reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_option_values() {
        let key = QueryKey::default()
            .with(KeyValue::from(Some("a")))
            .with(KeyValue::from(None::<i64>));
        assert_eq!(hash_key(&key).as_str(), "a:null");
    }

    #[test]
    fn test_key_part_debug_hides_accessor() {
        let part = KeyPart::dynamic(|| 1);
        assert!(part.is_dynamic());
        assert_eq!(format!("{part:?}"), "Dynamic(..)");
    }
}
