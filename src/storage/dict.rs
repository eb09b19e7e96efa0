//! Name dictionaries
//!
//! platform/browser/referer are plain (id, name) tables with get-or-insert
//! semantics. The table is selected by a compile-time enum, not a runtime
//! table-name string, so an unsupported dictionary cannot be expressed.

use anyhow::Result;
use sqlx::SqliteConnection;

use crate::parser::normalizer::guard_blank;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dict {
    Platform,
    Browser,
    Referer,
}

impl Dict {
    const fn table(self) -> &'static str {
        match self {
            Dict::Platform => "platform",
            Dict::Browser => "browser",
            Dict::Referer => "referer",
        }
    }

    const fn id_column(self) -> &'static str {
        match self {
            Dict::Platform => "platform_id",
            Dict::Browser => "browser_id",
            Dict::Referer => "referer_id",
        }
    }
}

/// Id of `name` in the dictionary, inserting it when absent.
///
/// Blank names are stored as the literal "None" so the UNIQUE constraint
/// never sees an empty string.
pub async fn get_or_insert(conn: &mut SqliteConnection, dict: Dict, name: &str) -> Result<i64> {
    let name = guard_blank(name);
    sqlx::query(&format!(
        "INSERT INTO {} (name) VALUES (?) ON CONFLICT(name) DO NOTHING",
        dict.table()
    ))
    .bind(&name)
    .execute(&mut *conn)
    .await?;

    let id = sqlx::query_scalar::<_, i64>(&format!(
        "SELECT {} FROM {} WHERE name = ?",
        dict.id_column(),
        dict.table()
    ))
    .bind(&name)
    .fetch_one(conn)
    .await?;
    Ok(id)
}

/// Id of `name` without inserting.
pub async fn lookup_id(
    conn: &mut SqliteConnection,
    dict: Dict,
    name: &str,
) -> Result<Option<i64>> {
    let name = guard_blank(name);
    let id = sqlx::query_scalar::<_, i64>(&format!(
        "SELECT {} FROM {} WHERE name = ?",
        dict.id_column(),
        dict.table()
    ))
    .bind(&name)
    .fetch_optional(conn)
    .await?;
    Ok(id)
}

