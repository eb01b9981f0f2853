use std::str::FromStr;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::{Error, Kind, Store};

/// SQLite-backed store.
///
/// Records live in one table keyed by (kind, id) with the body as JSON text;
/// the conditional status transition is pushed down into a single `UPDATE`
/// guarded on `json_extract`, so concurrent claims resolve in the database.
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Open (and create if missing) the database at `url`, e.g.
  /// `sqlite:/var/lib/skein/skein.db` or `sqlite::memory:`.
  pub async fn connect(url: &str) -> Result<Self, Error> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    sqlx::query(
      "CREATE TABLE IF NOT EXISTS objects (
         kind TEXT NOT NULL,
         id   TEXT NOT NULL,
         body TEXT NOT NULL,
         PRIMARY KEY (kind, id)
       )",
    )
    .execute(&pool)
    .await?;
    Ok(Self { pool })
  }
}

#[async_trait]
impl Store for SqliteStore {
  async fn put(&self, kind: Kind, id: &str, body: Value) -> Result<(), Error> {
    sqlx::query(
      "INSERT INTO objects (kind, id, body) VALUES (?1, ?2, ?3)
       ON CONFLICT (kind, id) DO UPDATE SET body = excluded.body",
    )
    .bind(kind.key())
    .bind(id)
    .bind(body.to_string())
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  async fn insert(&self, kind: Kind, id: &str, body: Value) -> Result<bool, Error> {
    let result = sqlx::query(
      "INSERT OR IGNORE INTO objects (kind, id, body) VALUES (?1, ?2, ?3)",
    )
    .bind(kind.key())
    .bind(id)
    .bind(body.to_string())
    .execute(&self.pool)
    .await?;
    Ok(result.rows_affected() == 1)
  }

  async fn get(&self, kind: Kind, id: &str) -> Result<Option<Value>, Error> {
    let row = sqlx::query("SELECT body FROM objects WHERE kind = ?1 AND id = ?2")
      .bind(kind.key())
      .bind(id)
      .fetch_optional(&self.pool)
      .await?;
    match row {
      Some(row) => {
        let body: String = row.get("body");
        Ok(Some(serde_json::from_str(&body)?))
      }
      None => Ok(None),
    }
  }

  async fn list(&self, kind: Kind) -> Result<Vec<(String, Value)>, Error> {
    let rows = sqlx::query("SELECT id, body FROM objects WHERE kind = ?1 ORDER BY rowid")
      .bind(kind.key())
      .fetch_all(&self.pool)
      .await?;
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
      let id: String = row.get("id");
      let body: String = row.get("body");
      records.push((id, serde_json::from_str(&body)?));
    }
    Ok(records)
  }

  async fn transition(
    &self,
    kind: Kind,
    id: &str,
    from: &str,
    to: &str,
  ) -> Result<bool, Error> {
    let result = sqlx::query(
      "UPDATE objects SET body = json_set(body, '$.status', ?4)
       WHERE kind = ?1 AND id = ?2 AND json_extract(body, '$.status') = ?3",
    )
    .bind(kind.key())
    .bind(id)
    .bind(from)
    .bind(to)
    .execute(&self.pool)
    .await?;
    Ok(result.rows_affected() == 1)
  }
}
