//! Entity metadata: table naming, columns and relationships.

use std::fmt;

/// Storage type of a column; decides how values are bound to SQL parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Uuid,
    Text,
    Integer,
    Float,
    Boolean,
    Timestamp,
    Json,
}

/// A persisted field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMeta {
    pub name: &'static str,
    pub column_type: ColumnType,
    pub unique: bool,
}

/// Cardinality of a relationship, seen from the owning entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    OneToOne,
    OneToMany,
    ManyToOne,
}

impl RelationKind {
    /// Whether joining this relationship yields at most one row per parent.
    #[must_use]
    pub const fn is_to_one(self) -> bool {
        matches!(self, Self::OneToOne | Self::ManyToOne)
    }
}

/// A named relationship to another entity.
///
/// The join condition is `target.remote_key = owner.local_key`.
#[derive(Clone, Copy)]
pub struct RelationMeta {
    pub name: &'static str,
    pub kind: RelationKind,
    pub target: fn() -> &'static EntityMeta,
    pub local_key: &'static str,
    pub remote_key: &'static str,
    /// Eager relationships are joined whenever the owner is selected.
    pub eager: bool,
}

impl RelationMeta {
    /// `owner.local_key` references `target.id`.
    #[must_use]
    pub const fn many_to_one(name: &'static str, target: fn() -> &'static EntityMeta, local_key: &'static str) -> Self {
        Self {
            name,
            kind: RelationKind::ManyToOne,
            target,
            local_key,
            remote_key: "id",
            eager: false,
        }
    }

    /// `target.remote_key` references `owner.id`.
    #[must_use]
    pub const fn one_to_many(name: &'static str, target: fn() -> &'static EntityMeta, remote_key: &'static str) -> Self {
        Self {
            name,
            kind: RelationKind::OneToMany,
            target,
            local_key: "id",
            remote_key,
            eager: false,
        }
    }

    #[must_use]
    pub const fn one_to_one(
        name: &'static str,
        target: fn() -> &'static EntityMeta,
        local_key: &'static str,
        remote_key: &'static str,
    ) -> Self {
        Self {
            name,
            kind: RelationKind::OneToOne,
            target,
            local_key,
            remote_key,
            eager: false,
        }
    }

    #[must_use]
    pub const fn eager(mut self) -> Self {
        self.eager = true;
        self
    }

    /// Metadata of the related entity.
    #[must_use]
    pub fn target(&self) -> &'static EntityMeta {
        (self.target)()
    }
}

impl fmt::Debug for RelationMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationMeta")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("local_key", &self.local_key)
            .field("remote_key", &self.remote_key)
            .field("eager", &self.eager)
            .finish_non_exhaustive()
    }
}

/// Resolution of a name against an entity.
#[derive(Debug, Clone, Copy)]
pub enum Member<'a> {
    Field(&'a FieldMeta),
    Relation(&'a RelationMeta),
}

/// Static description of one entity type.
///
/// Built once per type, usually inside a `OnceLock`:
///
/// ```ignore
/// fn meta() -> &'static EntityMeta {
///     static META: OnceLock<EntityMeta> = OnceLock::new();
///     META.get_or_init(|| {
///         EntityMeta::builder("Account")
///             .field("name", ColumnType::Text)
///             .relation(RelationMeta::many_to_one("owner", AccountHolder::meta, "owner_id"))
///             .build()
///     })
/// }
/// ```
#[derive(Debug, Clone)]
pub struct EntityMeta {
    name: &'static str,
    table: String,
    id_field: &'static str,
    fields: Vec<FieldMeta>,
    relations: Vec<RelationMeta>,
}

impl EntityMeta {
    #[must_use]
    pub fn builder(name: &'static str) -> EntityMetaBuilder {
        EntityMetaBuilder {
            name,
            table: None,
            id_field: "id",
            fields: Vec::new(),
            relations: Vec::new(),
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    #[must_use]
    pub const fn id_field(&self) -> &'static str {
        self.id_field
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldMeta] {
        &self.fields
    }

    #[must_use]
    pub fn relations(&self) -> &[RelationMeta] {
        &self.relations
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldMeta> {
        self.fields.iter().find(|f| f.name == name)
    }

    #[must_use]
    pub fn relation(&self, name: &str) -> Option<&RelationMeta> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Resolves `name` to a field or a relationship, fields first.
    #[must_use]
    pub fn member(&self, name: &str) -> Option<Member<'_>> {
        self.field(name)
            .map(Member::Field)
            .or_else(|| self.relation(name).map(Member::Relation))
    }
}

/// Builder for [`EntityMeta`].
#[derive(Debug)]
pub struct EntityMetaBuilder {
    name: &'static str,
    table: Option<String>,
    id_field: &'static str,
    fields: Vec<FieldMeta>,
    relations: Vec<RelationMeta>,
}

impl EntityMetaBuilder {
    /// Overrides the derived table name.
    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    #[must_use]
    pub fn id_field(mut self, name: &'static str) -> Self {
        self.id_field = name;
        self
    }

    #[must_use]
    pub fn field(mut self, name: &'static str, column_type: ColumnType) -> Self {
        self.fields.push(FieldMeta {
            name,
            column_type,
            unique: false,
        });
        self
    }

    #[must_use]
    pub fn unique_field(mut self, name: &'static str, column_type: ColumnType) -> Self {
        self.fields.push(FieldMeta {
            name,
            column_type,
            unique: true,
        });
        self
    }

    #[must_use]
    pub fn relation(mut self, relation: RelationMeta) -> Self {
        self.relations.push(relation);
        self
    }

    /// Finishes the metadata; the identifier column is added when not declared.
    #[must_use]
    pub fn build(mut self) -> EntityMeta {
        if !self.fields.iter().any(|f| f.name == self.id_field) {
            self.fields.insert(
                0,
                FieldMeta {
                    name: self.id_field,
                    column_type: ColumnType::Uuid,
                    unique: true,
                },
            );
        }
        EntityMeta {
            table: self.table.unwrap_or_else(|| table_name(self.name)),
            name: self.name,
            id_field: self.id_field,
            fields: self.fields,
            relations: self.relations,
        }
    }
}

/// Derives a table name from an entity name: every capital letter starts a
/// new lowercase word, words are joined with `_`.
#[must_use]
pub fn table_name(entity: &str) -> String {
    let mut table = String::with_capacity(entity.len() + 4);
    for (i, ch) in entity.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                table.push('_');
            }
            table.extend(ch.to_lowercase());
        } else {
            table.push(ch);
        }
    }
    table
}
