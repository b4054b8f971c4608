//! Immutable query values.
//!
//! Every refinement returns a new [`Query`]; the receiver is never touched,
//! so a query can be shared between the count and the fetch of one listing.

use crate::meta::{ColumnType, EntityMeta, RelationMeta};
use serde_json::Value;
use shinji_core::{ShinjiError, ShinjiResult};
use std::convert::Infallible;
use std::str::FromStr;
use uuid::Uuid;

/// Alias of the selected entity's table in rendered statements.
pub const ROOT_ALIAS: &str = "t0";

/// Equality predicate on a column of the selected entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: &'static str,
    pub column_type: ColumnType,
    /// `Value::Null` matches missing values (`IS NULL`).
    pub value: Value,
}

/// A left join of `relation`, owned by the entity aliased `parent`.
#[derive(Debug, Clone)]
pub struct Join {
    pub alias: String,
    pub parent: String,
    pub relation: &'static RelationMeta,
}

/// One `ORDER BY` term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderClause {
    pub alias: String,
    pub column: &'static str,
    pub descending: bool,
}

/// Selection of entities of one type.
#[derive(Debug, Clone)]
pub struct Query {
    meta: &'static EntityMeta,
    filters: Vec<Filter>,
    joins: Vec<Join>,
    order: Vec<OrderClause>,
    offset: Option<u64>,
    limit: Option<u64>,
}

impl Query {
    /// Selects every entity described by `meta`.
    ///
    /// Eager to-one relationships are joined up front.
    #[must_use]
    pub fn new(meta: &'static EntityMeta) -> Self {
        let query = Self {
            meta,
            filters: Vec::new(),
            joins: Vec::new(),
            order: Vec::new(),
            offset: None,
            limit: None,
        };
        meta.relations()
            .iter()
            .filter(|relation| relation.eager && relation.kind.is_to_one())
            .fold(query, |query, relation| query.ensure_join(ROOT_ALIAS, relation).0)
    }

    #[must_use]
    pub const fn meta(&self) -> &'static EntityMeta {
        self.meta
    }

    #[must_use]
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    #[must_use]
    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    #[must_use]
    pub fn ordering(&self) -> &[OrderClause] {
        &self.order
    }

    /// `(offset, limit)` of this query.
    #[must_use]
    pub const fn bounds(&self) -> (Option<u64>, Option<u64>) {
        (self.offset, self.limit)
    }

    /// Adds `field = value`.
    pub fn filter_by(&self, field: &str, value: Value) -> ShinjiResult<Self> {
        let meta = self.meta;
        let field = meta.field(field).ok_or_else(|| ShinjiError::UnknownFilterField {
            entity: meta.name(),
            field: field.to_string(),
        })?;
        let mut next = self.clone();
        next.filters.push(Filter {
            column: field.name,
            column_type: field.column_type,
            value,
        });
        Ok(next)
    }

    /// Adds `id = id`.
    #[must_use]
    pub fn filter_id(&self, id: Uuid) -> Self {
        let mut next = self.clone();
        next.filters.push(Filter {
            column: self.meta.id_field(),
            column_type: ColumnType::Uuid,
            value: Value::String(id.to_string()),
        });
        next
    }

    #[must_use]
    pub fn has_join(&self, alias: &str) -> bool {
        self.joins.iter().any(|join| join.alias == alias)
    }

    /// Joins `relation` below `parent` unless that join is already present.
    ///
    /// Returns the refined query and the alias of the joined entity.
    #[must_use]
    pub fn ensure_join(&self, parent: &str, relation: &'static RelationMeta) -> (Self, String) {
        let alias = if parent == ROOT_ALIAS {
            relation.name.to_string()
        } else {
            format!("{}__{}", parent, relation.name)
        };
        let mut next = self.clone();
        if !self.has_join(&alias) {
            next.joins.push(Join {
                alias: alias.clone(),
                parent: parent.to_string(),
                relation,
            });
        }
        (next, alias)
    }

    /// Joins every relationship along a dotted path such as `owner.profile`.
    pub fn join(&self, path: &str) -> ShinjiResult<Self> {
        let mut next = self.clone();
        let mut meta = self.meta;
        let mut alias = ROOT_ALIAS.to_string();
        for segment in path.split('.') {
            let relation = meta.relation(segment).ok_or_else(|| {
                ShinjiError::validation(format!("{} has no relationship `{}`", meta.name(), segment))
            })?;
            let (joined, joined_alias) = next.ensure_join(&alias, relation);
            next = joined;
            alias = joined_alias;
            meta = relation.target();
        }
        Ok(next)
    }

    /// Appends an ordering term on `alias.column`.
    #[must_use]
    pub fn order(&self, alias: impl Into<String>, column: &'static str, descending: bool) -> Self {
        let mut next = self.clone();
        next.order.push(OrderClause {
            alias: alias.into(),
            column,
            descending,
        });
        next
    }

    #[must_use]
    pub fn offset(&self, offset: u64) -> Self {
        let mut next = self.clone();
        next.offset = Some(offset);
        next
    }

    #[must_use]
    pub fn limit(&self, limit: u64) -> Self {
        let mut next = self.clone();
        next.limit = Some(limit);
        next
    }

    /// Drops every ordering term.
    #[must_use]
    pub fn without_ordering(&self) -> Self {
        let mut next = self.clone();
        next.order.clear();
        next
    }

    /// Drops offset and limit.
    #[must_use]
    pub fn without_pagination(&self) -> Self {
        let mut next = self.clone();
        next.offset = None;
        next.limit = None;
        next
    }
}

/// One `(field-path, direction)` pair of an [`Ordering`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderingField {
    /// Field name, or relationship names followed by a field name, joined by `.`.
    pub path: String,
    pub descending: bool,
}

/// Requested ordering, most significant first.
///
/// Parses the conventional `"name,-balance,owner.name"` syntax where a
/// leading `-` means descending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ordering(Vec<OrderingField>);

impl Ordering {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn asc(mut self, path: impl Into<String>) -> Self {
        self.0.push(OrderingField {
            path: path.into(),
            descending: false,
        });
        self
    }

    #[must_use]
    pub fn desc(mut self, path: impl Into<String>) -> Self {
        self.0.push(OrderingField {
            path: path.into(),
            descending: true,
        });
        self
    }

    #[must_use]
    pub fn parse(spec: &str) -> Self {
        spec.split(',')
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .fold(Self::new(), |ordering, term| match term.strip_prefix('-') {
                Some(path) => ordering.desc(path.trim()),
                None => ordering.asc(term.trim_start_matches('+').trim()),
            })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, OrderingField> {
        self.0.iter()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for Ordering {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl<'a> IntoIterator for &'a Ordering {
    type Item = &'a OrderingField;
    type IntoIter = std::slice::Iter<'a, OrderingField>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<P: Into<String>> FromIterator<(P, bool)> for Ordering {
    fn from_iter<I: IntoIterator<Item = (P, bool)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(path, descending)| OrderingField {
                    path: path.into(),
                    descending,
                })
                .collect(),
        )
    }
}
