use std::path::Path;

use rusqlite::Connection;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{AppError, AppResult};

/// One row of `t_inspection` joined with its dated subtables, shaped for
/// the watcher's and the `/inspections/latest` endpoint's JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct InspectionRow {
    pub inspection_id: i64,
    pub product_no: String,
    pub serial: Option<String>,
    pub inspection_dt: String,
    pub images: Vec<InspectionImage>,
    pub presentation: Vec<InspectionPresentation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InspectionImage {
    pub id: i64,
    pub image_no: i64,
    pub image_path: String,
    pub image_type: Option<String>,
    pub capture_timestamp: Option<String>,
    /// Stored as JSON text in the schema; re-serialized as base64 of the raw
    /// bytes only if binary, otherwise passed through as parsed JSON.
    pub image_metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InspectionPresentation {
    pub id: i64,
    pub group_name: String,
    pub image_path: String,
}

/// Wraps a synchronous `rusqlite::Connection` behind a `tokio::sync::Mutex`.
/// The connection can't be moved into `spawn_blocking` while the guard is
/// held, so queries run inside `tokio::task::block_in_place`: the current
/// worker thread hands off to the blocking pool for the query's duration,
/// keeping SQLite I/O off the async reactor without an extra connection
/// handle.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Db(e.to_string()))?;
        }
        let conn = Connection::open(path.as_ref()).map_err(|e| AppError::Db(e.to_string()))?;
        conn.execute_batch(SCHEMA).map_err(|e| AppError::Db(e.to_string()))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| AppError::Db(e.to_string()))?;
        conn.execute_batch(SCHEMA).map_err(|e| AppError::Db(e.to_string()))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Latest inspection row per `product_no`, restricted to `product_nos`.
    /// Implements the grouped/windowed query C6 needs via a correlated
    /// `MAX(inspection_dt)` subquery — portable SQL, no reliance on a
    /// specific SQLite window-function version.
    pub async fn latest_inspection_per_product(
        &self,
        product_nos: Vec<String>,
    ) -> AppResult<Vec<InspectionRow>> {
        if product_nos.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().await;
        let rows = tokio::task::block_in_place(|| query_latest_per_product(&conn, &product_nos))
            .map_err(|e| AppError::Db(e.to_string()))?;
        Ok(rows)
    }

    pub async fn inspections_in_range(
        &self,
        limit: i64,
        date_from: Option<String>,
        date_to: Option<String>,
    ) -> AppResult<Vec<InspectionRow>> {
        let conn = self.conn.lock().await;
        tokio::task::block_in_place(|| query_range(&conn, limit, date_from, date_to))
            .map_err(|e| AppError::Db(e.to_string()))
    }

    #[cfg(test)]
    pub async fn insert_test_inspection(
        &self,
        product_no: &str,
        inspection_dt: &str,
    ) -> AppResult<i64> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO t_inspection (product_no, serial, inspection_dt) VALUES (?1, ?2, ?3)",
            rusqlite::params![product_no, "SN-TEST", inspection_dt],
        )
        .map_err(|e| AppError::Db(e.to_string()))?;
        Ok(conn.last_insert_rowid())
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS t_inspection (
    inspection_id INTEGER PRIMARY KEY AUTOINCREMENT,
    product_no TEXT NOT NULL,
    serial TEXT,
    inspection_dt TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS t_inspection_images (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    inspection_id INTEGER NOT NULL REFERENCES t_inspection(inspection_id) ON DELETE CASCADE,
    image_no INTEGER NOT NULL,
    image_path TEXT NOT NULL,
    image_type TEXT,
    capture_timestamp TEXT,
    image_metadata TEXT
);

CREATE TABLE IF NOT EXISTS t_inspection_presentation (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    inspection_id INTEGER NOT NULL REFERENCES t_inspection(inspection_id) ON DELETE CASCADE,
    group_name TEXT NOT NULL,
    image_path TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_inspection_product ON t_inspection(product_no, inspection_dt);
"#;

fn query_latest_per_product(
    conn: &Connection,
    product_nos: &[String],
) -> rusqlite::Result<Vec<InspectionRow>> {
    let placeholders = product_nos.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!(
        "SELECT inspection_id, product_no, serial, inspection_dt FROM t_inspection i
         WHERE product_no IN ({placeholders})
         AND inspection_dt = (
             SELECT MAX(inspection_dt) FROM t_inspection i2
             WHERE i2.product_no = i.product_no
         )
         ORDER BY product_no"
    );
    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::ToSql> =
        product_nos.iter().map(|p| p as &dyn rusqlite::ToSql).collect();
    let rows = stmt.query_map(params.as_slice(), |row| {
        Ok(InspectionRow {
            inspection_id: row.get(0)?,
            product_no: row.get(1)?,
            serial: row.get(2)?,
            inspection_dt: row.get(3)?,
            images: Vec::new(),
            presentation: Vec::new(),
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        let mut inspection = row?;
        inspection.images = fetch_images(conn, inspection.inspection_id)?;
        inspection.presentation = fetch_presentation(conn, inspection.inspection_id)?;
        out.push(inspection);
    }
    debug!(count = out.len(), "fetched latest inspection per product");
    Ok(out)
}

fn query_range(
    conn: &Connection,
    limit: i64,
    date_from: Option<String>,
    date_to: Option<String>,
) -> rusqlite::Result<Vec<InspectionRow>> {
    let mut sql = "SELECT inspection_id, product_no, serial, inspection_dt FROM t_inspection WHERE 1=1".to_string();
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    if let Some(from) = date_from {
        sql.push_str(" AND inspection_dt >= ?");
        params.push(Box::new(from));
    }
    if let Some(to) = date_to {
        sql.push_str(" AND inspection_dt <= ?");
        params.push(Box::new(to));
    }
    sql.push_str(" ORDER BY inspection_dt DESC LIMIT ?");
    params.push(Box::new(limit));

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let rows = stmt.query_map(param_refs.as_slice(), |row| {
        Ok(InspectionRow {
            inspection_id: row.get(0)?,
            product_no: row.get(1)?,
            serial: row.get(2)?,
            inspection_dt: row.get(3)?,
            images: Vec::new(),
            presentation: Vec::new(),
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        let mut inspection = row?;
        inspection.images = fetch_images(conn, inspection.inspection_id)?;
        inspection.presentation = fetch_presentation(conn, inspection.inspection_id)?;
        out.push(inspection);
    }
    Ok(out)
}

fn fetch_images(conn: &Connection, inspection_id: i64) -> rusqlite::Result<Vec<InspectionImage>> {
    let mut stmt = conn.prepare(
        "SELECT id, image_no, image_path, image_type, capture_timestamp, image_metadata
         FROM t_inspection_images WHERE inspection_id = ?1 ORDER BY image_no",
    )?;
    let rows = stmt.query_map([inspection_id], |row| {
        let raw_metadata: Option<String> = row.get(5)?;
        Ok(InspectionImage {
            id: row.get(0)?,
            image_no: row.get(1)?,
            image_path: row.get(2)?,
            image_type: row.get(3)?,
            capture_timestamp: row.get(4)?,
            image_metadata: raw_metadata.and_then(|s| serde_json::from_str(&s).ok()),
        })
    })?;
    rows.collect()
}

fn fetch_presentation(
    conn: &Connection,
    inspection_id: i64,
) -> rusqlite::Result<Vec<InspectionPresentation>> {
    let mut stmt = conn.prepare(
        "SELECT id, group_name, image_path FROM t_inspection_presentation WHERE inspection_id = ?1 ORDER BY group_name",
    )?;
    let rows = stmt.query_map([inspection_id], |row| {
        Ok(InspectionPresentation {
            id: row.get(0)?,
            group_name: row.get(1)?,
            image_path: row.get(2)?,
        })
    })?;
    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn latest_inspection_per_product_returns_most_recent_row() {
        let db = Database::open_in_memory().unwrap();
        db.insert_test_inspection("P-1", "2026-01-01T10:00:00").await.unwrap();
        let latest_id = db.insert_test_inspection("P-1", "2026-01-02T10:00:00").await.unwrap();

        let rows = db
            .latest_inspection_per_product(vec!["P-1".to_string()])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].inspection_id, latest_id);
    }

    #[tokio::test]
    async fn latest_inspection_per_product_empty_input_returns_empty() {
        let db = Database::open_in_memory().unwrap();
        let rows = db.latest_inspection_per_product(vec![]).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn inspections_in_range_respects_limit() {
        let db = Database::open_in_memory().unwrap();
        for day in 1..=5 {
            db.insert_test_inspection("P-2", &format!("2026-01-0{day}T00:00:00")).await.unwrap();
        }
        let rows = db.inspections_in_range(2, None, None).await.unwrap();
        assert_eq!(rows.len(), 2);
    }
}
