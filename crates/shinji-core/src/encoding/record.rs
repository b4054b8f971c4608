//! Schema-described records and partially-set fields.

use super::node::{Child, Encode, Node};
use super::registry::ConverterSet;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A value with a declared field schema.
///
/// Implementors report each field together with its alias, whether it was
/// explicitly set and whether it still holds its default. The encoder uses
/// those flags for `exclude_unset` and `exclude_defaults`.
///
/// ```ignore
/// impl Record for AccountPatch {
///     fn fields(&self) -> Vec<FieldEntry<'_>> {
///         vec![
///             FieldEntry::patch("name", &self.name),
///             FieldEntry::patch("balance", &self.balance),
///         ]
///     }
/// }
/// ```
pub trait Record {
    fn fields(&self) -> Vec<FieldEntry<'_>>;

    /// A record wrapping a single root value encodes as that value.
    fn root(&self) -> Option<Child<'_>> {
        None
    }

    /// Converters declared on the record type.
    ///
    /// Merged with the caller's custom converters for this record's fields;
    /// the caller's entries win on conflict.
    fn encoders(&self) -> ConverterSet {
        ConverterSet::new()
    }

    /// Fields the record never emits.
    fn excluded_fields(&self) -> &'static [&'static str] {
        &[]
    }
}

/// One field of a [`Record`].
pub struct FieldEntry<'a> {
    pub name: &'static str,
    pub alias: Option<&'static str>,
    pub value: Child<'a>,
    pub set: bool,
    pub default: bool,
}

impl<'a> FieldEntry<'a> {
    /// An explicitly set, non-default field.
    pub fn new<T: Encode>(name: &'static str, value: &'a T) -> Self {
        Self {
            name,
            alias: None,
            value: Child::Borrowed(value),
            set: true,
            default: false,
        }
    }

    /// A field that counts as default when it equals `default`.
    pub fn defaulted<T: Encode + PartialEq>(name: &'static str, value: &'a T, default: &T) -> Self {
        Self {
            default: value == default,
            ..Self::new(name, value)
        }
    }

    /// A patch field; unset fields encode as null unless `exclude_unset` drops them.
    pub fn patch<T: Encode>(name: &'static str, value: &'a MaybeSet<T>) -> Self {
        Self {
            set: value.is_set(),
            ..Self::new(name, value)
        }
    }

    #[must_use]
    pub fn alias(mut self, alias: &'static str) -> Self {
        self.alias = Some(alias);
        self
    }

    /// The output key for this field.
    #[must_use]
    pub fn key(&self, by_alias: bool) -> &'static str {
        match self.alias {
            Some(alias) if by_alias => alias,
            _ => self.name,
        }
    }
}

/// A field value that tracks whether the caller supplied it.
///
/// Deserializes absent fields as [`MaybeSet::Unset`] when paired with
/// `#[serde(default)]`; a present `null` becomes `Set(None)` for
/// `MaybeSet<Option<T>>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MaybeSet<T> {
    #[default]
    Unset,
    Set(T),
}

impl<T> MaybeSet<T> {
    #[must_use]
    pub const fn is_set(&self) -> bool {
        matches!(self, Self::Set(_))
    }

    #[must_use]
    pub const fn as_option(&self) -> Option<&T> {
        match self {
            Self::Set(value) => Some(value),
            Self::Unset => None,
        }
    }

    #[must_use]
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Set(value) => Some(value),
            Self::Unset => None,
        }
    }
}

impl<T> From<T> for MaybeSet<T> {
    fn from(value: T) -> Self {
        Self::Set(value)
    }
}

impl<T: Encode> Encode for MaybeSet<T> {
    fn to_node(&self) -> Node<'_> {
        match self {
            Self::Set(value) => value.to_node(),
            Self::Unset => Node::Null,
        }
    }
}

impl<T: Serialize> Serialize for MaybeSet<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Set(value) => value.serialize(serializer),
            Self::Unset => serializer.serialize_none(),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for MaybeSet<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        T::deserialize(deserializer).map(Self::Set)
    }
}
