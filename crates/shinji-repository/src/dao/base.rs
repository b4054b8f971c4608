//! Generic [`CrudDao`] implementation.

use super::{translate, CrudDao, Filters};
use crate::model::{from_row, to_row, Model};
use crate::query::{Ordering, Query, ROOT_ALIAS};
use crate::session::{Outcome, Row, Session, Statement};
use async_trait::async_trait;
use serde_json::Value;
use shinji_config::DaoConfig;
use shinji_core::encoding::{Encode, Encoder, Serialized};
use shinji_core::{Page, PageRequest, ShinjiError, ShinjiResult};
use std::collections::HashSet;
use std::marker::PhantomData;
use tracing::debug;
use uuid::Uuid;

/// DAO for entities of type `M`, created from `C` and updated from `U`.
///
/// Holds no connection state; every call runs on the session it is given.
pub struct DaoBase<M, C, U> {
    config: DaoConfig,
    _marker: PhantomData<fn() -> (M, C, U)>,
}

impl<M: Model, C, U> DaoBase<M, C, U> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DaoConfig::default())
    }

    #[must_use]
    pub fn with_config(config: DaoConfig) -> Self {
        Self {
            config,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub const fn config(&self) -> DaoConfig {
        self.config
    }

    async fn commit_and_refresh(&self, db: &dyn Session, entity: M) -> ShinjiResult<M> {
        db.commit().await.map_err(translate)?;
        match db.refresh(M::meta(), entity.id()).await.map_err(translate)? {
            Some(row) => from_row(row),
            None => Ok(entity),
        }
    }
}

impl<M: Model, C, U> Default for DaoBase<M, C, U> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Model, C, U> std::fmt::Debug for DaoBase<M, C, U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaoBase")
            .field("entity", &M::meta().name())
            .field("config", &self.config)
            .finish()
    }
}

#[async_trait]
impl<M, C, U> CrudDao<M, C, U> for DaoBase<M, C, U>
where
    M: Model,
    C: Encode + Sync,
    U: Encode + Sync,
{
    async fn execute(&self, db: &dyn Session, statement: Statement) -> ShinjiResult<Outcome> {
        db.execute(statement).await.map_err(translate)
    }

    async fn get(&self, db: &dyn Session, id: Uuid) -> ShinjiResult<Option<M>> {
        debug!(entity = M::meta().name(), %id, "DAO: get");
        let query = self.select().filter_id(id).limit(1);
        match self.execute(db, Statement::Select(query)).await? {
            Outcome::Rows(rows) => rows.into_iter().next().map(from_row).transpose(),
            Outcome::Scalar(_) => Err(unexpected_scalar()),
        }
    }

    async fn get_multi(
        &self,
        db: &dyn Session,
        skip: u64,
        limit: u64,
        filters: &Filters,
        ordering: Option<&Ordering>,
    ) -> ShinjiResult<(Vec<M>, u64)> {
        debug!(entity = M::meta().name(), skip, limit, "DAO: get_multi");

        let mut query = self.select();
        for (field, value) in filters.iter() {
            query = query.filter_by(field, value.clone())?;
        }
        let fetch = match ordering {
            Some(ordering) => self.order_by(&query, ordering)?,
            None => query.clone(),
        }
        .offset(skip)
        .limit(limit);

        let (total, outcome) = tokio::try_join!(
            self.count(db, &query),
            self.execute(db, Statement::Select(fetch))
        )?;
        let Outcome::Rows(rows) = outcome else {
            return Err(unexpected_scalar());
        };

        // Joined to-many relationships repeat the owning row.
        let id_field = M::meta().id_field();
        let mut seen = HashSet::new();
        let items = rows
            .into_iter()
            .filter(|row| seen.insert(row.get(id_field).cloned().unwrap_or(Value::Null).to_string()))
            .map(from_row)
            .collect::<ShinjiResult<Vec<M>>>()?;
        Ok((items, total))
    }

    async fn get_page(
        &self,
        db: &dyn Session,
        page: PageRequest,
        filters: &Filters,
        ordering: Option<&Ordering>,
    ) -> ShinjiResult<Page<M>> {
        let page = page.clamped(self.config.max_limit);
        let (items, total) = self.get_multi(db, page.skip, page.limit, filters, ordering).await?;
        Ok(Page::new(items, page, total))
    }

    async fn create(&self, db: &dyn Session, spec: &C, commit: bool) -> ShinjiResult<M> {
        let meta = M::meta();
        let Value::Object(mut row) = Encoder::new().by_alias(false).encode(spec)? else {
            return Err(ShinjiError::validation(format!(
                "{} payload must encode to a mapping",
                meta.name()
            )));
        };

        let id_field = meta.id_field();
        if row.get(id_field).map_or(true, Value::is_null) {
            row.insert(id_field.to_string(), Value::String(Uuid::now_v7().to_string()));
        }
        if let Some(unknown) = row.keys().find(|key| meta.field(key).is_none()) {
            return Err(ShinjiError::validation(format!(
                "{} has no field `{}`",
                meta.name(),
                unknown
            )));
        }

        let entity: M = serde_json::from_value(Value::Object(row.clone()))
            .map_err(|e| ShinjiError::validation(format!("Invalid {} payload: {}", meta.name(), e)))?;
        // Stored ids are always in canonical hyphenated form.
        row.insert(id_field.to_string(), Value::String(entity.id().to_string()));
        debug!(entity = meta.name(), id = %entity.id(), commit, "DAO: create");

        db.add(meta, row).await.map_err(translate)?;
        if commit {
            return self.commit_and_refresh(db, entity).await;
        }
        Ok(entity)
    }

    async fn create_many(&self, db: &dyn Session, entities: Vec<M>, commit: bool) -> ShinjiResult<Vec<M>> {
        let meta = M::meta();
        debug!(entity = meta.name(), count = entities.len(), commit, "DAO: create_many");
        for entity in &entities {
            let mut row = to_row(entity)?;
            // Absent columns fall back to store defaults.
            row.retain(|_, value| !value.is_null());
            db.add(meta, row).await.map_err(translate)?;
        }
        if commit {
            db.commit().await.map_err(translate)?;
        }
        Ok(entities)
    }

    async fn update(&self, db: &dyn Session, entity: M, spec: &U, commit: bool) -> ShinjiResult<M> {
        let meta = M::meta();
        let id = entity.id();
        let Value::Object(mut current) = Encoder::new().encode(&Serialized::new(&entity)?)? else {
            return Err(ShinjiError::internal(format!("{} did not encode to a mapping", meta.name())));
        };
        let Value::Object(requested) = Encoder::new().by_alias(false).exclude_unset(true).encode(spec)? else {
            return Err(ShinjiError::validation(format!(
                "{} update must encode to a mapping",
                meta.name()
            )));
        };

        let mut changes = Row::new();
        for (key, value) in requested {
            if key == meta.id_field() || !current.contains_key(&key) {
                continue;
            }
            current.insert(key.clone(), value.clone());
            if meta.field(&key).is_some() {
                changes.insert(key, value);
            }
        }
        debug!(entity = meta.name(), %id, fields = changes.len(), commit, "DAO: update");

        let updated: M = serde_json::from_value(Value::Object(current))
            .map_err(|e| ShinjiError::validation(format!("Invalid {} update: {}", meta.name(), e)))?;
        if !changes.is_empty() {
            db.update(meta, id, changes).await.map_err(translate)?;
        }
        if commit {
            return self.commit_and_refresh(db, updated).await;
        }
        Ok(updated)
    }

    async fn delete(&self, db: &dyn Session, entity: M, commit: bool) -> ShinjiResult<M> {
        let meta = M::meta();
        debug!(entity = meta.name(), id = %entity.id(), commit, "DAO: delete");
        db.remove(meta, entity.id()).await.map_err(translate)?;
        if commit {
            db.commit().await.map_err(translate)?;
        }
        Ok(entity)
    }

    async fn count(&self, db: &dyn Session, query: &Query) -> ShinjiResult<u64> {
        let statement = Statement::Count(query.without_ordering().without_pagination());
        match self.execute(db, statement).await? {
            Outcome::Scalar(count) => u64::try_from(count)
                .map_err(|_| ShinjiError::internal(format!("count returned a negative value: {count}"))),
            Outcome::Rows(_) => Err(ShinjiError::internal("count returned rows instead of a scalar")),
        }
    }

    fn order_by(&self, query: &Query, ordering: &Ordering) -> ShinjiResult<Query> {
        let root = query.meta();
        let mut next = query.clone();
        for field in ordering {
            let unresolvable = |segment: &str| ShinjiError::UnresolvableOrderingField {
                entity: root.name(),
                path: field.path.clone(),
                segment: segment.to_string(),
            };

            let mut segments: Vec<&str> = field.path.split('.').collect();
            let column = segments.pop().unwrap_or_default();
            let mut meta = root;
            let mut alias = ROOT_ALIAS.to_string();
            for segment in segments {
                let relation = meta.relation(segment).ok_or_else(|| unresolvable(segment))?;
                // Eager relationships are already joined; ensure_join keeps them.
                let (joined, joined_alias) = next.ensure_join(&alias, relation);
                next = joined;
                alias = joined_alias;
                meta = relation.target();
            }
            let column = meta.field(column).ok_or_else(|| unresolvable(column))?;
            next = next.order(alias, column.name, field.descending);
        }
        Ok(next)
    }

    fn select(&self) -> Query {
        Query::new(M::meta())
    }
}

fn unexpected_scalar() -> ShinjiError {
    ShinjiError::internal("select returned a scalar instead of rows")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{ColumnType, EntityMeta};
    use crate::session::BackendError;
    use mockall::mock;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::sync::OnceLock;

    mock! {
        pub Db {}

        #[async_trait]
        impl Session for Db {
            async fn execute(&self, statement: Statement) -> Result<Outcome, BackendError>;
            async fn add(&self, meta: &'static EntityMeta, row: Row) -> Result<(), BackendError>;
            async fn update(&self, meta: &'static EntityMeta, id: Uuid, changes: Row) -> Result<(), BackendError>;
            async fn remove(&self, meta: &'static EntityMeta, id: Uuid) -> Result<(), BackendError>;
            async fn flush(&self) -> Result<(), BackendError>;
            async fn commit(&self) -> Result<(), BackendError>;
            async fn rollback(&self) -> Result<(), BackendError>;
            async fn refresh(&self, meta: &'static EntityMeta, id: Uuid) -> Result<Option<Row>, BackendError>;
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Tag {
        id: Uuid,
        label: String,
    }

    impl Model for Tag {
        fn meta() -> &'static EntityMeta {
            static META: OnceLock<EntityMeta> = OnceLock::new();
            META.get_or_init(|| EntityMeta::builder("Tag").unique_field("label", ColumnType::Text).build())
        }

        fn id(&self) -> Uuid {
            self.id
        }
    }

    type TagDao = DaoBase<Tag, Value, Value>;

    fn tag(label: &str) -> Tag {
        Tag {
            id: Uuid::new_v4(),
            label: label.to_string(),
        }
    }

    #[tokio::test]
    async fn test_get_translates_transient_failure() {
        let mut db = MockDb::new();
        db.expect_execute()
            .returning(|_| Err(BackendError::Transient("connection reset".to_string())));

        let err = TagDao::new().get(&db, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ShinjiError::Store { status: 503, retriable: true, .. }));
    }

    #[tokio::test]
    async fn test_create_translates_commit_conflict() {
        let mut db = MockDb::new();
        db.expect_add().times(1).returning(|_, _| Ok(()));
        db.expect_commit()
            .times(1)
            .returning(|| Err(BackendError::Integrity("duplicate label".to_string())));
        db.expect_refresh().never();

        let err = TagDao::new()
            .create(&db, &json!({"label": "rust"}), true)
            .await
            .unwrap_err();
        assert!(matches!(err, ShinjiError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_create_without_commit_leaves_transaction_open() {
        let mut db = MockDb::new();
        db.expect_add()
            .withf(|_, row| row.get("label") == Some(&json!("rust")) && row.contains_key("id"))
            .times(1)
            .returning(|_, _| Ok(()));
        db.expect_commit().never();

        let created = TagDao::new().create(&db, &json!({"label": "rust"}), false).await.unwrap();
        assert_eq!(created.label, "rust");
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_field() {
        let db = MockDb::new();
        let err = TagDao::new()
            .create(&db, &json!({"label": "rust", "colour": "red"}), true)
            .await
            .unwrap_err();
        assert!(matches!(err, ShinjiError::Validation(ref m) if m.contains("colour")));
    }

    #[tokio::test]
    async fn test_update_with_empty_payload_stages_nothing() {
        let mut db = MockDb::new();
        db.expect_update().never();
        db.expect_commit().never();

        let original = tag("rust");
        let updated = TagDao::new().update(&db, original.clone(), &json!({}), false).await.unwrap();
        assert_eq!(updated, original);
    }

    #[tokio::test]
    async fn test_update_never_reassigns_id() {
        let mut db = MockDb::new();
        db.expect_update()
            .withf(|_, _, changes| !changes.contains_key("id") && changes.get("label") == Some(&json!("go")))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let original = tag("rust");
        let payload = json!({"id": Uuid::new_v4().to_string(), "label": "go"});
        let updated = TagDao::new().update(&db, original.clone(), &payload, false).await.unwrap();
        assert_eq!(updated.id, original.id);
        assert_eq!(updated.label, "go");
    }

    #[tokio::test]
    async fn test_delete_commits_and_returns_entity() {
        let mut db = MockDb::new();
        let victim = tag("rust");
        let id = victim.id;
        db.expect_remove().withf(move |_, removed| *removed == id).times(1).returning(|_, _| Ok(()));
        db.expect_commit().times(1).returning(|| Ok(()));

        let deleted = TagDao::new().delete(&db, victim.clone(), true).await.unwrap();
        assert_eq!(deleted, victim);
    }

    #[tokio::test]
    async fn test_count_strips_ordering_and_bounds() {
        let mut db = MockDb::new();
        db.expect_execute()
            .withf(|statement| match statement {
                Statement::Count(query) => query.ordering().is_empty() && query.bounds() == (None, None),
                _ => false,
            })
            .returning(|_| Ok(Outcome::Scalar(7)));

        let dao = TagDao::new();
        let query = dao.select().order("t0", "label", false).offset(3).limit(2);
        assert_eq!(dao.count(&db, &query).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_negative_count_is_reported() {
        let mut db = MockDb::new();
        db.expect_execute().returning(|_| Ok(Outcome::Scalar(-1)));

        let dao = TagDao::new();
        let err = dao.count(&db, &dao.select()).await.unwrap_err();
        assert!(matches!(err, ShinjiError::Internal(_)));
    }

    #[tokio::test]
    async fn test_create_stores_canonical_id() {
        let mut db = MockDb::new();
        let id = Uuid::new_v4();
        let expected = json!(id.to_string());
        db.expect_add()
            .withf(move |_, row| row.get("id") == Some(&expected))
            .times(1)
            .returning(|_, _| Ok(()));

        let payload = json!({"id": id.to_string().to_uppercase(), "label": "rust"});
        let created = TagDao::new().create(&db, &payload, false).await.unwrap();
        assert_eq!(created.id, id);
    }

    #[test]
    fn test_order_by_unknown_field_fails() {
        let dao = TagDao::new();
        let query = dao.select();
        let err = dao.order_by(&query, &Ordering::parse("label,-colour")).unwrap_err();
        assert!(matches!(
            err,
            ShinjiError::UnresolvableOrderingField { ref segment, .. } if segment == "colour"
        ));
        assert!(query.ordering().is_empty());
    }
}
