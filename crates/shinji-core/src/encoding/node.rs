//! The structural view every encodable value exposes.
//!
//! [`Encode::to_node`] classifies a value into one [`Node`] variant; the
//! encoder walks nodes, so each value is inspected exactly once.

use super::record::Record;
use std::any::Any;
use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::BuildHasher;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::ops::Deref;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use uuid::Uuid;

/// A value that can be handed to the encoder.
pub trait Encode {
    /// Classifies this value for the encoder.
    fn to_node(&self) -> Node<'_>;
}

/// Key/value pairs of a mapping, yielded lazily.
pub type Entries<'a> = Box<dyn Iterator<Item = (Child<'a>, Child<'a>)> + 'a>;

/// Elements of a sequence or set, yielded lazily.
pub type Items<'a> = Box<dyn Iterator<Item = Child<'a>> + 'a>;

/// Structural classification of a value, in dispatch order.
pub enum Node<'a> {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(Cow<'a, str>),
    /// Ordered key/value collection.
    Map(Entries<'a>),
    /// Ordered or unordered collection, including one-shot iterators.
    Seq(Items<'a>),
    /// Record with a declared field schema.
    Record(&'a dyn Record),
    /// Fixed-field aggregate without a schema.
    Struct(Vec<(&'static str, Child<'a>)>),
    /// Anything else; resolved through the converter registry.
    Opaque(&'a dyn Opaque),
}

impl Node<'_> {
    /// Short name of the variant, used in diagnostics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) | Self::UInt(_) => "integer",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Map(_) => "mapping",
            Self::Seq(_) => "sequence",
            Self::Record(_) => "record",
            Self::Struct(_) => "struct",
            Self::Opaque(_) => "opaque value",
        }
    }
}

/// A child value, either borrowed from its parent or produced on the fly.
pub enum Child<'a> {
    Borrowed(&'a dyn Encode),
    Owned(Box<dyn Encode + 'a>),
}

impl<'a> Deref for Child<'a> {
    type Target = dyn Encode + 'a;

    fn deref(&self) -> &Self::Target {
        match self {
            Self::Borrowed(value) => *value,
            Self::Owned(value) => value.as_ref(),
        }
    }
}

/// Borrows `value` as a [`Child`].
pub fn borrowed<T: Encode>(value: &T) -> Child<'_> {
    Child::Borrowed(value)
}

/// Moves `value` into a [`Child`].
pub fn owned<'a, T: Encode + 'a>(value: T) -> Child<'a> {
    Child::Owned(Box::new(value))
}

/// Upcast helper so converters can downcast opaque values.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Coarse grouping of opaque types sharing one converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeFamily {
    Temporal,
    Identifier,
    Binary,
    Network,
    Path,
    /// Enumerations encoded as their underlying value.
    Enumeration,
}

/// A value the encoder cannot classify structurally.
///
/// Registered converters are tried first (exact type, then family). When
/// none applies, the encoder falls back to [`Opaque::as_mapping`] and then
/// [`Opaque::attributes`].
pub trait Opaque: AsAny {
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn family(&self) -> Option<TypeFamily> {
        None
    }

    /// Canonical textual form, used by family converters.
    fn to_text(&self) -> Option<String> {
        None
    }

    /// The value an enumeration stands for, used by the enumeration converter.
    fn underlying(&self) -> Option<serde_json::Value> {
        None
    }

    fn as_mapping(&self) -> Result<Vec<(String, Child<'_>)>, String> {
        Err(format!("`{}` cannot be viewed as a mapping", self.type_name()))
    }

    fn attributes(&self) -> Result<Vec<(&'static str, Child<'_>)>, String> {
        Err(format!("`{}` exposes no attributes", self.type_name()))
    }
}

/// Raw bytes, encoded as (lossy) UTF-8 text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binary(pub Vec<u8>);

/// Wraps a one-shot iterator.
///
/// The first encode drains it; later encodes see an empty sequence.
pub struct Drain<I>(RefCell<Option<I>>);

impl<I: Iterator> Drain<I> {
    pub fn new(iter: impl IntoIterator<IntoIter = I>) -> Self {
        Self(RefCell::new(Some(iter.into_iter())))
    }
}

impl<I> Encode for Drain<I>
where
    I: Iterator + 'static,
    I::Item: Encode + 'static,
{
    fn to_node(&self) -> Node<'_> {
        match self.0.borrow_mut().take() {
            Some(iter) => Node::Seq(Box::new(iter.map(owned))),
            None => Node::Seq(Box::new(std::iter::empty())),
        }
    }
}

// ============ References and wrappers ============

impl<T: Encode + ?Sized> Encode for &T {
    fn to_node(&self) -> Node<'_> {
        (**self).to_node()
    }
}

impl<T: Encode + ?Sized> Encode for Box<T> {
    fn to_node(&self) -> Node<'_> {
        self.as_ref().to_node()
    }
}

impl<T: Encode> Encode for Option<T> {
    fn to_node(&self) -> Node<'_> {
        self.as_ref().map_or(Node::Null, Encode::to_node)
    }
}

// ============ Primitives ============

impl Encode for () {
    fn to_node(&self) -> Node<'_> {
        Node::Null
    }
}

impl Encode for bool {
    fn to_node(&self) -> Node<'_> {
        Node::Bool(*self)
    }
}

macro_rules! encode_signed {
    ($($ty:ty),*) => {$(
        impl Encode for $ty {
            fn to_node(&self) -> Node<'_> {
                Node::Int(i64::from(*self))
            }
        }
    )*};
}

macro_rules! encode_unsigned {
    ($($ty:ty),*) => {$(
        impl Encode for $ty {
            fn to_node(&self) -> Node<'_> {
                Node::UInt(u64::from(*self))
            }
        }
    )*};
}

encode_signed!(i8, i16, i32, i64);
encode_unsigned!(u8, u16, u32, u64);

impl Encode for isize {
    fn to_node(&self) -> Node<'_> {
        Node::Int(*self as i64)
    }
}

impl Encode for usize {
    fn to_node(&self) -> Node<'_> {
        Node::UInt(*self as u64)
    }
}

impl Encode for f32 {
    fn to_node(&self) -> Node<'_> {
        Node::Float(f64::from(*self))
    }
}

impl Encode for f64 {
    fn to_node(&self) -> Node<'_> {
        Node::Float(*self)
    }
}

impl Encode for char {
    fn to_node(&self) -> Node<'_> {
        Node::Str(Cow::Owned(self.to_string()))
    }
}

impl Encode for str {
    fn to_node(&self) -> Node<'_> {
        Node::Str(Cow::Borrowed(self))
    }
}

impl Encode for String {
    fn to_node(&self) -> Node<'_> {
        Node::Str(Cow::Borrowed(self.as_str()))
    }
}

impl Encode for Cow<'_, str> {
    fn to_node(&self) -> Node<'_> {
        Node::Str(Cow::Borrowed(self.as_ref()))
    }
}

// ============ Collections ============

impl<T: Encode> Encode for [T] {
    fn to_node(&self) -> Node<'_> {
        Node::Seq(Box::new(self.iter().map(borrowed)))
    }
}

impl<T: Encode, const N: usize> Encode for [T; N] {
    fn to_node(&self) -> Node<'_> {
        Node::Seq(Box::new(self.iter().map(borrowed)))
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn to_node(&self) -> Node<'_> {
        Node::Seq(Box::new(self.iter().map(borrowed)))
    }
}

impl<T: Encode> Encode for VecDeque<T> {
    fn to_node(&self) -> Node<'_> {
        Node::Seq(Box::new(self.iter().map(borrowed)))
    }
}

impl<T: Encode> Encode for BTreeSet<T> {
    fn to_node(&self) -> Node<'_> {
        Node::Seq(Box::new(self.iter().map(borrowed)))
    }
}

impl<T: Encode, S: BuildHasher> Encode for HashSet<T, S> {
    fn to_node(&self) -> Node<'_> {
        Node::Seq(Box::new(self.iter().map(borrowed)))
    }
}

impl<K: Encode, V: Encode> Encode for BTreeMap<K, V> {
    fn to_node(&self) -> Node<'_> {
        Node::Map(Box::new(self.iter().map(|(k, v)| (borrowed(k), borrowed(v)))))
    }
}

impl<K: Encode, V: Encode, S: BuildHasher> Encode for HashMap<K, V, S> {
    fn to_node(&self) -> Node<'_> {
        Node::Map(Box::new(self.iter().map(|(k, v)| (borrowed(k), borrowed(v)))))
    }
}

impl<A: Encode, B: Encode> Encode for (A, B) {
    fn to_node(&self) -> Node<'_> {
        Node::Seq(Box::new([borrowed(&self.0), borrowed(&self.1)].into_iter()))
    }
}

impl<A: Encode, B: Encode, C: Encode> Encode for (A, B, C) {
    fn to_node(&self) -> Node<'_> {
        Node::Seq(Box::new(
            [borrowed(&self.0), borrowed(&self.1), borrowed(&self.2)].into_iter(),
        ))
    }
}

// ============ JSON values ============

impl Encode for serde_json::Value {
    fn to_node(&self) -> Node<'_> {
        use serde_json::Value;

        match self {
            Value::Null => Node::Null,
            Value::Bool(b) => Node::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Node::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Node::UInt(u)
                } else {
                    n.as_f64().map_or(Node::Null, Node::Float)
                }
            }
            Value::String(s) => Node::Str(Cow::Borrowed(s.as_str())),
            Value::Array(items) => Node::Seq(Box::new(items.iter().map(borrowed))),
            Value::Object(map) => map.to_node(),
        }
    }
}

impl Encode for serde_json::Map<String, serde_json::Value> {
    fn to_node(&self) -> Node<'_> {
        Node::Map(Box::new(self.iter().map(|(k, v)| (borrowed(k), borrowed(v)))))
    }
}

// ============ Opaque standard types ============

macro_rules! opaque_display {
    ($($ty:ty => $family:expr),* $(,)?) => {$(
        impl Encode for $ty {
            fn to_node(&self) -> Node<'_> {
                Node::Opaque(self)
            }
        }

        impl Opaque for $ty {
            fn family(&self) -> Option<TypeFamily> {
                Some($family)
            }

            fn to_text(&self) -> Option<String> {
                Some(self.to_string())
            }
        }
    )*};
}

opaque_display!(
    DateTime<Utc> => TypeFamily::Temporal,
    DateTime<FixedOffset> => TypeFamily::Temporal,
    DateTime<Local> => TypeFamily::Temporal,
    NaiveDateTime => TypeFamily::Temporal,
    NaiveDate => TypeFamily::Temporal,
    NaiveTime => TypeFamily::Temporal,
    Uuid => TypeFamily::Identifier,
    IpAddr => TypeFamily::Network,
    Ipv4Addr => TypeFamily::Network,
    Ipv6Addr => TypeFamily::Network,
);

impl Encode for PathBuf {
    fn to_node(&self) -> Node<'_> {
        Node::Opaque(self)
    }
}

impl Opaque for PathBuf {
    fn family(&self) -> Option<TypeFamily> {
        Some(TypeFamily::Path)
    }

    fn to_text(&self) -> Option<String> {
        Some(self.to_string_lossy().into_owned())
    }
}

impl Encode for Duration {
    fn to_node(&self) -> Node<'_> {
        Node::Opaque(self)
    }
}

impl Opaque for Duration {}

impl Encode for Binary {
    fn to_node(&self) -> Node<'_> {
        Node::Opaque(self)
    }
}

impl Opaque for Binary {
    fn family(&self) -> Option<TypeFamily> {
        Some(TypeFamily::Binary)
    }

    fn to_text(&self) -> Option<String> {
        Some(String::from_utf8_lossy(&self.0).into_owned())
    }
}
