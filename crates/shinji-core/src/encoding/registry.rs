//! Converters for opaque values.
//!
//! A [`ConverterSet`] maps exact types, and then type families, to functions
//! producing JSON. The process-wide set is built once at startup and is
//! read-only afterwards.

use super::error::EncodingError;
use super::node::{Binary, Opaque, TypeFamily};
use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone, Utc};
use serde_json::Value;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use uuid::Uuid;

/// A function turning an opaque value into JSON.
pub type Converter = Arc<dyn Fn(&dyn Opaque) -> Result<Value, EncodingError> + Send + Sync>;

static GLOBAL: OnceLock<ConverterSet> = OnceLock::new();

/// Installs the process-wide converter set.
///
/// Must run before the first encode; afterwards the set is frozen and the
/// rejected set is handed back.
pub fn install(set: ConverterSet) -> Result<(), ConverterSet> {
    GLOBAL.set(set)
}

/// The process-wide converter set, [`ConverterSet::standard`] unless
/// [`install`] ran first.
pub fn global() -> &'static ConverterSet {
    GLOBAL.get_or_init(ConverterSet::standard)
}

/// Exact-type and family converters.
#[derive(Clone, Default)]
pub struct ConverterSet {
    by_type: HashMap<TypeId, Converter>,
    by_family: Vec<(TypeFamily, Converter)>,
}

impl fmt::Debug for ConverterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConverterSet")
            .field("types", &self.by_type.len())
            .field("families", &self.by_family.iter().map(|(family, _)| family).collect::<Vec<_>>())
            .finish()
    }
}

impl ConverterSet {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The default converters for temporal, identifier, binary, network
    /// and path values, plus enumerations.
    #[must_use]
    pub fn standard() -> Self {
        Self::new()
            .with(|dt: &DateTime<Utc>| Ok(Value::String(rfc3339(dt))))
            .with(|dt: &DateTime<FixedOffset>| Ok(Value::String(rfc3339(dt))))
            .with(|dt: &DateTime<Local>| Ok(Value::String(rfc3339(dt))))
            .with(|dt: &NaiveDateTime| Ok(Value::String(rfc3339(&dt.and_utc()))))
            .with(|d: &NaiveDate| Ok(Value::String(d.format("%Y-%m-%d").to_string())))
            .with(|t: &NaiveTime| Ok(Value::String(t.to_string())))
            .with(|id: &Uuid| Ok(Value::String(id.hyphenated().to_string())))
            .with(|d: &Duration| Ok(Value::from(d.as_secs_f64())))
            .with(|b: &Binary| Ok(Value::String(String::from_utf8_lossy(&b.0).into_owned())))
            .with(|ip: &IpAddr| Ok(Value::String(ip.to_string())))
            .with(|ip: &Ipv4Addr| Ok(Value::String(ip.to_string())))
            .with(|ip: &Ipv6Addr| Ok(Value::String(ip.to_string())))
            .with(|p: &PathBuf| Ok(Value::String(p.to_string_lossy().into_owned())))
            .with_family(TypeFamily::Temporal, text)
            .with_family(TypeFamily::Identifier, text)
            .with_family(TypeFamily::Network, text)
            .with_family(TypeFamily::Path, text)
            .with_family(TypeFamily::Binary, text)
            .with_family(TypeFamily::Enumeration, underlying)
    }

    /// Registers a converter for exactly `T`, replacing any previous one.
    pub fn register<T, F>(&mut self, convert: F)
    where
        T: Any,
        F: Fn(&T) -> Result<Value, EncodingError> + Send + Sync + 'static,
    {
        let converter: Converter = Arc::new(move |value: &dyn Opaque| match value.as_any().downcast_ref::<T>() {
            Some(value) => convert(value),
            None => Err(EncodingError::Converter {
                type_name: type_name::<T>(),
                message: format!("received a `{}`", value.type_name()),
            }),
        });
        self.by_type.insert(TypeId::of::<T>(), converter);
    }

    /// Registers a converter for every value of `family`.
    ///
    /// Families are tried in registration order; a later registration for
    /// the same family replaces the earlier one in place.
    pub fn register_family<F>(&mut self, family: TypeFamily, convert: F)
    where
        F: Fn(&dyn Opaque) -> Result<Value, EncodingError> + Send + Sync + 'static,
    {
        let converter: Converter = Arc::new(convert);
        match self.by_family.iter_mut().find(|(f, _)| *f == family) {
            Some(slot) => slot.1 = converter,
            None => self.by_family.push((family, converter)),
        }
    }

    #[must_use]
    pub fn with<T, F>(mut self, convert: F) -> Self
    where
        T: Any,
        F: Fn(&T) -> Result<Value, EncodingError> + Send + Sync + 'static,
    {
        self.register(convert);
        self
    }

    #[must_use]
    pub fn with_family<F>(mut self, family: TypeFamily, convert: F) -> Self
    where
        F: Fn(&dyn Opaque) -> Result<Value, EncodingError> + Send + Sync + 'static,
    {
        self.register_family(family, convert);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty() && self.by_family.is_empty()
    }

    /// Converter registered for the value's exact type.
    #[must_use]
    pub fn exact(&self, value: &dyn Opaque) -> Option<&Converter> {
        self.by_type.get(&value.as_any().type_id())
    }

    /// Converter registered for the value's family.
    #[must_use]
    pub fn family(&self, value: &dyn Opaque) -> Option<&Converter> {
        let family = value.family()?;
        self.by_family.iter().find(|(f, _)| *f == family).map(|(_, converter)| converter)
    }

    /// `self` overlaid with `overrides`; entries in `overrides` win.
    #[must_use]
    pub fn merged(&self, overrides: &Self) -> Self {
        let mut merged = self.clone();
        merged
            .by_type
            .extend(overrides.by_type.iter().map(|(id, converter)| (*id, Arc::clone(converter))));
        for (family, converter) in &overrides.by_family {
            match merged.by_family.iter_mut().find(|(f, _)| f == family) {
                Some(slot) => slot.1 = Arc::clone(converter),
                None => merged.by_family.push((*family, Arc::clone(converter))),
            }
        }
        merged
    }
}

/// RFC 3339 text with `Z` for UTC and sub-second digits only when present.
fn rfc3339<Tz>(dt: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn text(value: &dyn Opaque) -> Result<Value, EncodingError> {
    value.to_text().map(Value::String).ok_or_else(|| EncodingError::Converter {
        type_name: value.type_name(),
        message: "no textual form".to_string(),
    })
}

fn underlying(value: &dyn Opaque) -> Result<Value, EncodingError> {
    value.underlying().ok_or_else(|| EncodingError::Converter {
        type_name: value.type_name(),
        message: "no underlying value".to_string(),
    })
}
