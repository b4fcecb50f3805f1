//! The template gallery: one canonical face raster per identity.

use crate::SqliteStore;
use chrono::{DateTime, Utc};
use image::GrayImage;
use rollcall_core::FaceTemplate;
use rusqlite::{params, OptionalExtension};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("template store: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("stored template for '{identity}' is corrupt")]
    Corrupt { identity: String },
    #[error("store mutex poisoned")]
    Poisoned,
}

/// The gallery abstraction the pipeline is built against.
///
/// Contract: `put` atomically replaces the identity's template (latest
/// enrollment wins, never a partial write); `list_all` enumerates in a
/// stable order within one recognition attempt, so the label table built
/// at training time matches the gallery it came from.
pub trait TemplateStore {
    fn put(&self, identity: &str, pixels: &GrayImage) -> Result<(), StoreError>;
    fn get(&self, identity: &str) -> Result<Option<FaceTemplate>, StoreError>;
    fn list_all(&self) -> Result<Vec<FaceTemplate>, StoreError>;
    fn count(&self) -> Result<u64, StoreError>;
}

impl TemplateStore for SqliteStore {
    fn put(&self, identity: &str, pixels: &GrayImage) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO templates (identity, width, height, pixels, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(identity) DO UPDATE SET
                 width = excluded.width,
                 height = excluded.height,
                 pixels = excluded.pixels,
                 created_at = excluded.created_at",
            params![
                identity,
                pixels.width(),
                pixels.height(),
                pixels.as_raw(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        tracing::debug!(identity, "template stored");
        Ok(())
    }

    fn get(&self, identity: &str) -> Result<Option<FaceTemplate>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT width, height, pixels, created_at FROM templates WHERE identity = ?1",
                params![identity],
                |r| {
                    Ok((
                        r.get::<_, u32>(0)?,
                        r.get::<_, u32>(1)?,
                        r.get::<_, Vec<u8>>(2)?,
                        r.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((width, height, blob, created_at)) => {
                Ok(Some(rebuild_template(identity, width, height, blob, &created_at)?))
            }
        }
    }

    fn list_all(&self) -> Result<Vec<FaceTemplate>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT identity, width, height, pixels, created_at
             FROM templates ORDER BY identity",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, u32>(1)?,
                r.get::<_, u32>(2)?,
                r.get::<_, Vec<u8>>(3)?,
                r.get::<_, String>(4)?,
            ))
        })?;

        let mut templates = Vec::new();
        for row in rows {
            let (identity, width, height, blob, created_at) = row?;
            templates.push(rebuild_template(&identity, width, height, blob, &created_at)?);
        }
        Ok(templates)
    }

    fn count(&self) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM templates", [], |r| r.get(0))?)
    }
}

fn rebuild_template(
    identity: &str,
    width: u32,
    height: u32,
    blob: Vec<u8>,
    created_at: &str,
) -> Result<FaceTemplate, StoreError> {
    let pixels = GrayImage::from_raw(width, height, blob).ok_or_else(|| StoreError::Corrupt {
        identity: identity.to_string(),
    })?;
    let created_at = DateTime::parse_from_rfc3339(created_at)
        .map_err(|_| StoreError::Corrupt { identity: identity.to_string() })?
        .with_timezone(&Utc);
    Ok(FaceTemplate { identity: identity.to_string(), pixels, created_at })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(seed: u8) -> GrayImage {
        GrayImage::from_fn(200, 200, |x, y| image::Luma([(x + y * seed as u32) as u8]))
    }

    #[test]
    fn test_put_get_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put("alice", &pattern(1)).unwrap();

        let template = store.get("alice").unwrap().unwrap();
        assert_eq!(template.identity, "alice");
        assert_eq!(template.pixels.as_raw(), pattern(1).as_raw());
    }

    #[test]
    fn test_get_missing_identity() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.get("nobody").unwrap().is_none());
    }

    #[test]
    fn test_overwrite_keeps_exactly_one_template() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put("alice", &pattern(1)).unwrap();
        store.put("alice", &pattern(3)).unwrap();

        assert_eq!(store.count().unwrap(), 1);
        let template = store.get("alice").unwrap().unwrap();
        assert_eq!(template.pixels.as_raw(), pattern(3).as_raw());
    }

    #[test]
    fn test_list_all_order_is_stable() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put("carol", &pattern(1)).unwrap();
        store.put("alice", &pattern(2)).unwrap();
        store.put("bob", &pattern(3)).unwrap();

        let names: Vec<String> = store
            .list_all()
            .unwrap()
            .into_iter()
            .map(|t| t.identity)
            .collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);

        // Re-enrolling must not change the enumeration order.
        store.put("bob", &pattern(4)).unwrap();
        let again: Vec<String> = store
            .list_all()
            .unwrap()
            .into_iter()
            .map(|t| t.identity)
            .collect();
        assert_eq!(names, again);
    }

    #[test]
    fn test_count_tracks_distinct_identities() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.count().unwrap(), 0);
        store.put("alice", &pattern(1)).unwrap();
        store.put("bob", &pattern(2)).unwrap();
        store.put("alice", &pattern(3)).unwrap();
        assert_eq!(store.count().unwrap(), 2);
    }
}
