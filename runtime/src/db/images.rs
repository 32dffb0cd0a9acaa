use depot_core::error::{DepotError, Result};
use depot_core::image::{architecture_name, ImageAlias, ImageInfo};
use rusqlite::{params, OptionalExtension, Row};
use std::collections::HashMap;

use super::{map_db_error, Database};

/// Property rows are all written with this type.
const PROPERTY_TYPE: i64 = 0;

/// Row of the `images` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub id: i64,
    pub fingerprint: String,
    pub filename: String,
    pub size: i64,
    pub public: bool,
    pub architecture: i64,
    pub creation_date: i64,
    pub expiry_date: i64,
    pub upload_date: i64,
}

/// Image row to insert. `upload_date` is set by the store.
#[derive(Debug, Clone, Default)]
pub struct NewImage {
    pub fingerprint: String,
    pub filename: String,
    pub size: i64,
    pub public: bool,
    pub architecture: i64,
    pub creation_date: i64,
    pub expiry_date: i64,
}

const IMAGE_COLUMNS: &str = "id, fingerprint, filename, size, public, architecture, \
                             creation_date, expiry_date, upload_date";

fn image_from_row(row: &Row<'_>) -> rusqlite::Result<ImageRecord> {
    Ok(ImageRecord {
        id: row.get(0)?,
        fingerprint: row.get(1)?,
        filename: row.get(2)?,
        size: row.get(3)?,
        public: row.get::<_, i64>(4)? == 1,
        architecture: row.get(5)?,
        creation_date: row.get(6)?,
        expiry_date: row.get(7)?,
        upload_date: row.get(8)?,
    })
}

impl Database {
    /// Insert an image and its properties in one transaction.
    pub fn insert_image(&self, image: &NewImage, properties: &HashMap<String, String>) -> Result<i64> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| map_db_error(e, "transaction"))?;

        tx.execute(
            "INSERT INTO images (fingerprint, filename, size, public, architecture, \
             creation_date, expiry_date, upload_date) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                image.fingerprint,
                image.filename,
                image.size,
                image.public as i64,
                image.architecture,
                image.creation_date,
                image.expiry_date,
                chrono::Utc::now().timestamp(),
            ],
        )
        .map_err(|e| map_db_error(e, &format!("image {}", image.fingerprint)))?;
        let id = tx.last_insert_rowid();

        {
            let mut stmt = tx
                .prepare("INSERT INTO images_properties (image_id, type, key, value) VALUES (?1, ?2, ?3, ?4)")
                .map_err(|e| map_db_error(e, "image properties"))?;
            for (key, value) in properties {
                stmt.execute(params![id, PROPERTY_TYPE, key, value])
                    .map_err(|e| map_db_error(e, "image properties"))?;
            }
        }

        tx.commit().map_err(|e| map_db_error(e, "transaction"))?;
        tracing::debug!(fingerprint = %image.fingerprint, id, "Inserted image");
        Ok(id)
    }

    /// Fetch an image row. `public_only` hides private images.
    pub fn get_image(&self, fingerprint: &str, public_only: bool) -> Result<ImageRecord> {
        let conn = self.conn.lock();
        let mut sql = format!("SELECT {} FROM images WHERE fingerprint = ?1", IMAGE_COLUMNS);
        if public_only {
            sql.push_str(" AND public = 1");
        }
        conn.query_row(&sql, [fingerprint], image_from_row)
            .map_err(|e| map_db_error(e, &format!("image {}", fingerprint)))
    }

    /// Whether a row exists for `fingerprint`, regardless of visibility.
    pub fn image_exists(&self, fingerprint: &str) -> Result<bool> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id FROM images WHERE fingerprint = ?1",
            [fingerprint],
            |row| row.get::<_, i64>(0),
        )
        .optional()
        .map(|id| id.is_some())
        .map_err(|e| map_db_error(e, "image"))
    }

    /// Fingerprints of all visible images.
    pub fn list_images(&self, public_only: bool) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let sql = if public_only {
            "SELECT fingerprint FROM images WHERE public = 1 ORDER BY id"
        } else {
            "SELECT fingerprint FROM images ORDER BY id"
        };
        let mut stmt = conn.prepare(sql).map_err(|e| map_db_error(e, "images"))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| map_db_error(e, "images"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| map_db_error(e, "images"))
    }

    pub fn image_properties(&self, image_id: i64) -> Result<HashMap<String, String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT key, value FROM images_properties WHERE image_id = ?1")
            .map_err(|e| map_db_error(e, "image properties"))?;
        let rows = stmt
            .query_map([image_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
            })
            .map_err(|e| map_db_error(e, "image properties"))?;

        let mut properties = HashMap::new();
        for row in rows {
            let (key, value) = row.map_err(|e| map_db_error(e, "image properties"))?;
            properties.insert(key, value.unwrap_or_default());
        }
        Ok(properties)
    }

    pub fn image_aliases(&self, image_id: i64) -> Result<Vec<ImageAlias>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT name, description FROM images_aliases WHERE image_id = ?1 ORDER BY id")
            .map_err(|e| map_db_error(e, "image aliases"))?;
        let rows = stmt
            .query_map([image_id], |row| {
                Ok(ImageAlias {
                    name: row.get(0)?,
                    description: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                })
            })
            .map_err(|e| map_db_error(e, "image aliases"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| map_db_error(e, "image aliases"))
    }

    /// Full API record of an image row.
    pub fn image_info(&self, record: &ImageRecord) -> Result<ImageInfo> {
        Ok(ImageInfo {
            fingerprint: record.fingerprint.clone(),
            filename: record.filename.clone(),
            properties: self.image_properties(record.id)?,
            aliases: self.image_aliases(record.id)?,
            public: record.public,
            size: record.size,
            architecture: architecture_name(record.architecture).to_string(),
            creation_date: record.creation_date,
            expiry_date: record.expiry_date,
            upload_date: record.upload_date,
        })
    }

    /// Delete an image with its aliases and properties in one transaction.
    pub fn delete_image(&self, image_id: i64) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| map_db_error(e, "transaction"))?;
        tx.execute("DELETE FROM images_aliases WHERE image_id = ?1", [image_id])
            .map_err(|e| map_db_error(e, "image aliases"))?;
        tx.execute("DELETE FROM images_properties WHERE image_id = ?1", [image_id])
            .map_err(|e| map_db_error(e, "image properties"))?;
        let deleted = tx
            .execute("DELETE FROM images WHERE id = ?1", [image_id])
            .map_err(|e| map_db_error(e, "image"))?;
        if deleted == 0 {
            return Err(DepotError::NotFound(format!("image id {}", image_id)));
        }
        tx.commit().map_err(|e| map_db_error(e, "transaction"))
    }

    /// Replace the whole property set of an image.
    pub fn replace_properties(&self, image_id: i64, properties: &HashMap<String, String>) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| map_db_error(e, "transaction"))?;
        tx.execute("DELETE FROM images_properties WHERE image_id = ?1", [image_id])
            .map_err(|e| map_db_error(e, "image properties"))?;
        {
            let mut stmt = tx
                .prepare("INSERT INTO images_properties (image_id, type, key, value) VALUES (?1, ?2, ?3, ?4)")
                .map_err(|e| map_db_error(e, "image properties"))?;
            for (key, value) in properties {
                stmt.execute(params![image_id, PROPERTY_TYPE, key, value])
                    .map_err(|e| map_db_error(e, "image properties"))?;
            }
        }
        tx.commit().map_err(|e| map_db_error(e, "transaction"))
    }
}
