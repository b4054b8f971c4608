//! Recursive reduction of [`Encode`] values to JSON.

use super::error::EncodingError;
use super::node::{owned, Child, Encode, Node, Opaque};
use super::record::Record;
use super::registry::{self, ConverterSet};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::HashSet;

/// Keys starting with this prefix are Shinji's own bookkeeping (session or
/// backend state riding along on a mapping) and are never emitted. Leading
/// underscores on their own do not count, so user keys like `_id` are kept.
pub const RESERVED_KEY_PREFIX: &str = "_shinji_";

/// Options controlling a single encode.
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    /// Only these keys of the top-level mapping or record are kept.
    pub include: Option<HashSet<String>>,
    /// These keys of the top-level mapping or record are dropped.
    pub exclude: Option<HashSet<String>>,
    /// Emit record fields under their alias.
    pub by_alias: bool,
    /// Drop record fields the caller never set.
    pub exclude_unset: bool,
    /// Drop record fields still holding their default.
    pub exclude_defaults: bool,
    /// Drop mapping entries and record fields whose value is null.
    pub exclude_none: bool,
    /// Converters consulted before the global registry.
    pub custom: ConverterSet,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            include: None,
            exclude: None,
            by_alias: true,
            exclude_unset: false,
            exclude_defaults: false,
            exclude_none: false,
            custom: ConverterSet::new(),
        }
    }
}

/// Include/exclude filters and converters in effect at one nesting level.
struct Scope<'s> {
    include: Option<&'s HashSet<String>>,
    exclude: Option<&'s HashSet<String>>,
    custom: Cow<'s, ConverterSet>,
}

impl<'s> Scope<'s> {
    fn allows(&self, key: &str) -> bool {
        self.include.map_or(true, |include| include.contains(key))
            && self.exclude.map_or(true, |exclude| !exclude.contains(key))
    }

    /// Scope for values nested below the current mapping: filters stop here.
    fn nested(&self) -> Scope<'_> {
        Scope {
            include: None,
            exclude: None,
            custom: Cow::Borrowed(self.custom.as_ref()),
        }
    }
}

/// Reduces values to JSON using the configured options and a converter
/// registry.
///
/// # Example
///
/// ```ignore
/// let value = Encoder::new().exclude_none(true).encode(&account)?;
/// ```
#[derive(Debug, Clone)]
pub struct Encoder<'r> {
    options: EncodeOptions,
    registry: &'r ConverterSet,
}

impl Default for Encoder<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder<'static> {
    /// An encoder backed by the process-wide registry.
    #[must_use]
    pub fn new() -> Self {
        Self::with_registry(registry::global())
    }
}

impl<'r> Encoder<'r> {
    #[must_use]
    pub fn with_registry(registry: &'r ConverterSet) -> Self {
        Self {
            options: EncodeOptions::default(),
            registry,
        }
    }

    #[must_use]
    pub fn options(mut self, options: EncodeOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn include<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.include = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn exclude<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.exclude = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn by_alias(mut self, by_alias: bool) -> Self {
        self.options.by_alias = by_alias;
        self
    }

    #[must_use]
    pub fn exclude_unset(mut self, exclude_unset: bool) -> Self {
        self.options.exclude_unset = exclude_unset;
        self
    }

    #[must_use]
    pub fn exclude_defaults(mut self, exclude_defaults: bool) -> Self {
        self.options.exclude_defaults = exclude_defaults;
        self
    }

    #[must_use]
    pub fn exclude_none(mut self, exclude_none: bool) -> Self {
        self.options.exclude_none = exclude_none;
        self
    }

    #[must_use]
    pub fn custom_encoders(mut self, custom: ConverterSet) -> Self {
        self.options.custom = custom;
        self
    }

    /// Encodes `value`, recursing through mappings, sequences and records.
    pub fn encode(&self, value: &dyn Encode) -> Result<Value, EncodingError> {
        let scope = Scope {
            include: self.options.include.as_ref(),
            exclude: self.options.exclude.as_ref(),
            custom: Cow::Borrowed(&self.options.custom),
        };
        self.encode_node(value.to_node(), &scope)
    }

    fn encode_node(&self, node: Node<'_>, scope: &Scope<'_>) -> Result<Value, EncodingError> {
        match node {
            Node::Null => Ok(Value::Null),
            Node::Bool(b) => Ok(Value::Bool(b)),
            Node::Int(i) => Ok(Value::from(i)),
            Node::UInt(u) => Ok(Value::from(u)),
            // Non-finite floats become null.
            Node::Float(f) => Ok(Value::from(f)),
            Node::Str(s) => Ok(Value::String(s.into_owned())),
            Node::Map(entries) => self.encode_map(entries, scope),
            Node::Seq(items) => items
                .map(|item| self.encode_node(item.to_node(), scope))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Node::Record(record) => self.encode_record(record, scope),
            Node::Struct(fields) => {
                self.encode_map(fields.into_iter().map(|(name, value)| (owned(name), value)), scope)
            }
            Node::Opaque(value) => self.encode_opaque(value, scope),
        }
    }

    fn encode_map<'a>(
        &self,
        entries: impl Iterator<Item = (Child<'a>, Child<'a>)>,
        scope: &Scope<'_>,
    ) -> Result<Value, EncodingError> {
        let nested = scope.nested();
        let mut out = Map::new();
        for (key, value) in entries {
            let key = self.encode_key(&*key, scope)?;
            if key.starts_with(RESERVED_KEY_PREFIX) || !scope.allows(&key) {
                continue;
            }
            let node = value.to_node();
            if self.options.exclude_none && matches!(node, Node::Null) {
                continue;
            }
            out.insert(key, self.encode_node(node, &nested)?);
        }
        Ok(Value::Object(out))
    }

    fn encode_key(&self, key: &dyn Encode, scope: &Scope<'_>) -> Result<String, EncodingError> {
        let node = key.to_node();
        let kind = node.kind();
        let encoded = match node {
            Node::Str(s) => return Ok(s.into_owned()),
            Node::Opaque(value) => self.encode_opaque(value, scope)?,
            Node::Map(_) | Node::Seq(_) | Node::Record(_) | Node::Struct(_) => {
                return Err(EncodingError::InvalidKey(kind.to_string()));
            }
            primitive => self.encode_node(primitive, scope)?,
        };
        match encoded {
            Value::String(s) => Ok(s),
            Value::Null => Ok("null".to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Number(n) => Ok(n.to_string()),
            Value::Array(_) | Value::Object(_) => Err(EncodingError::InvalidKey(kind.to_string())),
        }
    }

    fn encode_record(&self, record: &dyn Record, scope: &Scope<'_>) -> Result<Value, EncodingError> {
        let declared = record.encoders();
        let custom = if declared.is_empty() {
            Cow::Borrowed(scope.custom.as_ref())
        } else {
            Cow::Owned(declared.merged(&scope.custom))
        };

        if let Some(root) = record.root() {
            let scope = Scope {
                include: scope.include,
                exclude: scope.exclude,
                custom,
            };
            return self.encode_node(root.to_node(), &scope);
        }

        let nested = Scope {
            include: None,
            exclude: None,
            custom,
        };
        let excluded = record.excluded_fields();
        let mut out = Map::new();
        for field in record.fields() {
            if excluded.contains(&field.name) || !scope.allows(field.name) {
                continue;
            }
            if (self.options.exclude_unset && !field.set) || (self.options.exclude_defaults && field.default) {
                continue;
            }
            let key = field.key(self.options.by_alias);
            if key.starts_with(RESERVED_KEY_PREFIX) {
                continue;
            }
            let node = field.value.to_node();
            if self.options.exclude_none && matches!(node, Node::Null) {
                continue;
            }
            out.insert(key.to_string(), self.encode_node(node, &nested)?);
        }
        Ok(Value::Object(out))
    }

    fn encode_opaque(&self, value: &dyn Opaque, scope: &Scope<'_>) -> Result<Value, EncodingError> {
        let converter = scope
            .custom
            .exact(value)
            .or_else(|| scope.custom.family(value))
            .or_else(|| self.registry.exact(value))
            .or_else(|| self.registry.family(value));
        if let Some(convert) = converter {
            return convert(value);
        }

        match value.as_mapping() {
            Ok(entries) => self.encode_map(entries.into_iter().map(|(k, v)| (owned(k), v)), scope),
            Err(mapping) => match value.attributes() {
                Ok(attributes) => self.encode_map(attributes.into_iter().map(|(k, v)| (owned(k), v)), scope),
                Err(attributes) => Err(EncodingError::Unconvertible {
                    type_name: value.type_name(),
                    causes: vec![mapping, attributes],
                }),
            },
        }
    }
}
