//! Statement rendering for PostgreSQL.
//!
//! Identifiers come from entity metadata and are always quoted; values are
//! always bound as parameters, typed by the column they target.

use crate::meta::{ColumnType, EntityMeta};
use crate::query::{Filter, Query, ROOT_ALIAS};
use crate::session::{BackendError, Row, Write};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

pub(crate) type Builder = QueryBuilder<'static, Postgres>;

/// `SELECT to_jsonb("t0") AS "row" FROM ... [JOIN ...] [WHERE ...] [ORDER BY ...] [LIMIT] [OFFSET]`
pub(crate) fn select(query: &Query) -> Result<Builder, BackendError> {
    let mut builder = Builder::new(format!("SELECT to_jsonb({root}) AS \"row\" FROM ", root = quote(ROOT_ALIAS)));
    push_from(&mut builder, query.meta());

    for join in query.joins() {
        let relation = join.relation;
        builder.push(format!(
            " LEFT JOIN {table} AS {alias} ON {alias}.{remote} = {parent}.{local}",
            table = quote(relation.target().table()),
            alias = quote(&join.alias),
            remote = quote(relation.remote_key),
            parent = quote(&join.parent),
            local = quote(relation.local_key),
        ));
    }

    push_filters(&mut builder, query.filters())?;

    let mut terms = query.ordering().iter().peekable();
    if terms.peek().is_some() {
        builder.push(" ORDER BY ");
        let mut separated = builder.separated(", ");
        for clause in terms {
            separated.push(format!(
                "{}.{} {}",
                quote(&clause.alias),
                quote(clause.column),
                if clause.descending { "DESC" } else { "ASC" }
            ));
        }
    }

    let (offset, limit) = query.bounds();
    if let Some(limit) = limit {
        builder.push(" LIMIT ").push_bind(to_i64(limit));
    }
    if let Some(offset) = offset {
        builder.push(" OFFSET ").push_bind(to_i64(offset));
    }
    Ok(builder)
}

/// Counts the selected rows of the root table; joins and ordering are dropped.
pub(crate) fn count(query: &Query) -> Result<Builder, BackendError> {
    let mut builder = Builder::new("SELECT count(*) FROM ");
    push_from(&mut builder, query.meta());
    push_filters(&mut builder, query.filters())?;
    Ok(builder)
}

pub(crate) fn delete(query: &Query) -> Result<Builder, BackendError> {
    let mut builder = Builder::new("DELETE FROM ");
    push_from(&mut builder, query.meta());
    push_filters(&mut builder, query.filters())?;
    Ok(builder)
}

pub(crate) fn write(write: &Write) -> Result<Builder, BackendError> {
    match write {
        Write::Insert { meta, row } => insert(meta, row),
        Write::Update { meta, id, changes } => update(meta, *id, changes),
        Write::Remove { meta, id } => {
            let mut builder = Builder::new(format!("DELETE FROM {} WHERE {} = ", quote(meta.table()), quote(meta.id_field())));
            builder.push_bind(*id);
            Ok(builder)
        }
    }
}

fn insert(meta: &EntityMeta, row: &Row) -> Result<Builder, BackendError> {
    let columns = known_columns(meta, row)?;
    let mut builder = Builder::new(format!("INSERT INTO {} (", quote(meta.table())));
    {
        let mut separated = builder.separated(", ");
        for (column, _, _) in &columns {
            separated.push(quote(column));
        }
    }
    builder.push(") VALUES (");
    for (i, (_, column_type, value)) in columns.iter().enumerate() {
        if i > 0 {
            builder.push(", ");
        }
        bind(&mut builder, *column_type, value)?;
    }
    builder.push(")");
    Ok(builder)
}

fn update(meta: &EntityMeta, id: Uuid, changes: &Row) -> Result<Builder, BackendError> {
    let columns = known_columns(meta, changes)?;
    let mut builder = Builder::new(format!("UPDATE {} SET ", quote(meta.table())));
    for (i, (column, column_type, value)) in columns.iter().enumerate() {
        if i > 0 {
            builder.push(", ");
        }
        builder.push(format!("{} = ", quote(column)));
        bind(&mut builder, *column_type, value)?;
    }
    builder.push(format!(" WHERE {} = ", quote(meta.id_field())));
    builder.push_bind(id);
    Ok(builder)
}

/// Pairs every column of `row` with its declared type, rejecting unknown columns.
fn known_columns<'r>(meta: &EntityMeta, row: &'r Row) -> Result<Vec<(&'r str, ColumnType, &'r Value)>, BackendError> {
    row.iter()
        .map(|(column, value)| {
            meta.field(column)
                .map(|field| (column.as_str(), field.column_type, value))
                .ok_or_else(|| BackendError::Other(format!("column \"{}\" of relation \"{}\" does not exist", column, meta.table())))
        })
        .collect()
}

fn push_from(builder: &mut Builder, meta: &EntityMeta) {
    builder.push(format!("{} AS {}", quote(meta.table()), quote(ROOT_ALIAS)));
}

fn push_filters(builder: &mut Builder, filters: &[Filter]) -> Result<(), BackendError> {
    for (i, filter) in filters.iter().enumerate() {
        builder.push(if i == 0 { " WHERE " } else { " AND " });
        builder.push(format!("{}.{}", quote(ROOT_ALIAS), quote(filter.column)));
        if filter.value.is_null() {
            builder.push(" IS NULL");
        } else {
            builder.push(" = ");
            bind(builder, filter.column_type, &filter.value)?;
        }
    }
    Ok(())
}

/// Binds `value` with the Rust type matching `column_type`.
fn bind(builder: &mut Builder, column_type: ColumnType, value: &Value) -> Result<(), BackendError> {
    match column_type {
        ColumnType::Uuid => {
            let id = match value {
                Value::Null => None,
                Value::String(s) => Some(Uuid::parse_str(s).map_err(|e| invalid(column_type, value, &e))?),
                _ => return Err(mismatch(column_type, value)),
            };
            builder.push_bind(id);
        }
        ColumnType::Text => {
            let text = match value {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            };
            builder.push_bind(text);
        }
        ColumnType::Integer => {
            let number = match value {
                Value::Null => None,
                other => Some(other.as_i64().ok_or_else(|| mismatch(column_type, value))?),
            };
            builder.push_bind(number);
        }
        ColumnType::Float => {
            let number = match value {
                Value::Null => None,
                other => Some(other.as_f64().ok_or_else(|| mismatch(column_type, value))?),
            };
            builder.push_bind(number);
        }
        ColumnType::Boolean => {
            let flag = match value {
                Value::Null => None,
                other => Some(other.as_bool().ok_or_else(|| mismatch(column_type, value))?),
            };
            builder.push_bind(flag);
        }
        ColumnType::Timestamp => {
            let at = match value {
                Value::Null => None,
                Value::String(s) => Some(
                    DateTime::parse_from_rfc3339(s)
                        .map_err(|e| invalid(column_type, value, &e))?
                        .with_timezone(&Utc),
                ),
                _ => return Err(mismatch(column_type, value)),
            };
            builder.push_bind(at);
        }
        ColumnType::Json => {
            builder.push_bind(sqlx::types::Json(value.clone()));
        }
    }
    Ok(())
}

fn mismatch(column_type: ColumnType, value: &Value) -> BackendError {
    BackendError::Other(format!("cannot bind {} to a {:?} column", value, column_type))
}

fn invalid(column_type: ColumnType, value: &Value, err: &dyn std::fmt::Display) -> BackendError {
    BackendError::Other(format!("invalid {:?} value {}: {}", column_type, value, err))
}

fn to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Quotes an SQL identifier.
pub(crate) fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::RelationMeta;
    use serde_json::json;
    use std::sync::OnceLock;

    fn holder() -> &'static EntityMeta {
        static META: OnceLock<EntityMeta> = OnceLock::new();
        META.get_or_init(|| EntityMeta::builder("AccountHolder").field("name", ColumnType::Text).build())
    }

    fn account() -> &'static EntityMeta {
        static META: OnceLock<EntityMeta> = OnceLock::new();
        META.get_or_init(|| {
            EntityMeta::builder("Account")
                .field("name", ColumnType::Text)
                .field("balance", ColumnType::Float)
                .field("owner_id", ColumnType::Uuid)
                .relation(RelationMeta::many_to_one("owner", holder, "owner_id"))
                .build()
        })
    }

    #[test]
    fn test_select_sql() {
        let query = Query::new(account())
            .filter_by("name", json!("main"))
            .unwrap()
            .join("owner")
            .unwrap()
            .order("owner", "name", false)
            .order(ROOT_ALIAS, "balance", true)
            .offset(10)
            .limit(5);

        let builder = select(&query).unwrap();
        assert_eq!(
            builder.sql(),
            "SELECT to_jsonb(\"t0\") AS \"row\" FROM \"account\" AS \"t0\" \
             LEFT JOIN \"account_holder\" AS \"owner\" ON \"owner\".\"id\" = \"t0\".\"owner_id\" \
             WHERE \"t0\".\"name\" = $1 \
             ORDER BY \"owner\".\"name\" ASC, \"t0\".\"balance\" DESC LIMIT $2 OFFSET $3"
        );
    }

    #[test]
    fn test_count_sql_ignores_joins_and_null_filters_use_is_null() {
        let query = Query::new(account())
            .join("owner")
            .unwrap()
            .filter_by("owner_id", Value::Null)
            .unwrap();
        assert_eq!(
            count(&query).unwrap().sql(),
            "SELECT count(*) FROM \"account\" AS \"t0\" WHERE \"t0\".\"owner_id\" IS NULL"
        );
    }

    #[test]
    fn test_update_sql() {
        let mut changes = Row::new();
        changes.insert("name".to_string(), json!("renamed"));
        changes.insert("balance".to_string(), json!(12.5));
        let builder = write(&Write::Update {
            meta: account(),
            id: Uuid::nil(),
            changes,
        })
        .unwrap();
        assert_eq!(
            builder.sql(),
            "UPDATE \"account\" SET \"name\" = $1, \"balance\" = $2 WHERE \"id\" = $3"
        );
    }

    #[test]
    fn test_insert_rejects_unknown_column() {
        let mut row = Row::new();
        row.insert("nickname".to_string(), json!("x"));
        let Err(err) = write(&Write::Insert { meta: account(), row }) else {
            panic!("called `Result::unwrap_err()` on an `Ok` value");
        };
        assert!(matches!(err, BackendError::Other(_)));
    }

    #[test]
    fn test_bind_type_mismatch() {
        let query = Query::new(account()).filter_by("balance", json!("lots")).unwrap();
        assert!(select(&query).is_err());
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("we\"ird"), "\"we\"\"ird\"");
    }
}
