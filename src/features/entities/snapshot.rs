use super::EntityKind;
use crate::error::AppError;
use serde_json::Value;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

/// Read the current row for `(kind, id)` as a JSON object, or `None` when
/// the row does not exist. Built on SQLite's `json_object` so the snapshot
/// is produced in one statement; the column registry is sorted, and
/// `serde_json`'s map keeps keys ordered, so serialisation is canonical.
pub async fn snapshot(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    id: &str,
) -> Result<Option<Value>, AppError> {
    let mut pairs = Vec::with_capacity(kind.columns().len());
    for col in kind.columns() {
        pairs.push(format!("'{col}', {col}"));
    }
    let sql = format!(
        "SELECT json_object({}) FROM {} WHERE id = ?",
        pairs.join(", "),
        kind.table()
    );

    let raw: Option<String> = sqlx::query_scalar(&sql)
        .bind(id)
        .fetch_optional(conn)
        .await?;

    match raw {
        Some(text) => {
            let value = serde_json::from_str(&text)
                .map_err(|e| AppError::Internal(format!("malformed snapshot json: {e}")))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Re-create a deleted row from its snapshot. A plain INSERT: a conflicting
/// primary key surfaces as a unique violation (mapped to 409) and the
/// caller decides what to do with the undo entry.
pub async fn restore_insert(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    row: &Value,
) -> Result<(), AppError> {
    let mut builder = build_insert(kind, row, false)?;
    builder.build().execute(conn).await?;
    Ok(())
}

/// Overwrite the current row with its snapshot (undo of an update).
pub async fn restore_replace(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    row: &Value,
) -> Result<(), AppError> {
    let mut builder = build_insert(kind, row, true)?;
    builder.build().execute(conn).await?;
    Ok(())
}

fn build_insert(
    kind: EntityKind,
    row: &Value,
    replace: bool,
) -> Result<QueryBuilder<'_, Sqlite>, AppError> {
    let object = row
        .as_object()
        .ok_or_else(|| AppError::Internal("snapshot is not a JSON object".to_string()))?;

    let verb = if replace {
        "INSERT OR REPLACE INTO "
    } else {
        "INSERT INTO "
    };
    let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(verb);
    builder.push(kind.table());
    builder.push(" (");
    let mut first = true;
    for col in kind.columns() {
        if !first {
            builder.push(", ");
        }
        builder.push(*col);
        first = false;
    }
    builder.push(") VALUES (");
    let mut separated = builder.separated(", ");
    for col in kind.columns() {
        match object.get(*col).unwrap_or(&Value::Null) {
            Value::Null => separated.push_bind(None::<String>),
            Value::Bool(b) => separated.push_bind(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    separated.push_bind(i)
                } else {
                    separated.push_bind(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => separated.push_bind(s.clone()),
            other => separated.push_bind(other.to_string()),
        };
    }
    builder.push(")");
    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn insert_lists_every_registered_column() {
        let row = json!({"id": "V-1", "name": "Acme"});
        let mut builder = build_insert(EntityKind::Vendor, &row, false).unwrap();
        let sql = builder.build().sql().to_string();
        assert!(sql.starts_with("INSERT INTO vendors ("));
        for col in EntityKind::Vendor.columns() {
            assert!(sql.contains(col), "missing column {col}");
        }
    }

    #[test]
    fn replace_uses_insert_or_replace() {
        let row = json!({"id": "WO-1", "title": "Build"});
        let mut builder = build_insert(EntityKind::WorkOrder, &row, true).unwrap();
        assert!(builder
            .build()
            .sql()
            .starts_with("INSERT OR REPLACE INTO work_orders"));
    }

    #[test]
    fn non_object_snapshot_is_rejected() {
        let row = json!(["not", "an", "object"]);
        assert!(build_insert(EntityKind::Part, &row, false).is_err());
    }
}
