use depot_core::error::{DepotError, Result};
use depot_core::image::AliasInfo;
use rusqlite::params;

use super::{map_db_error, Database};

impl Database {
    /// Attach `name` to an image. Names are unique.
    pub fn add_alias(&self, name: &str, image_id: i64, description: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO images_aliases (name, image_id, description) VALUES (?1, ?2, ?3)",
            params![name, image_id, description],
        )
        .map_err(|e| map_db_error(e, &format!("alias {}", name)))?;
        Ok(())
    }

    /// Resolve an alias. `public_only` hides aliases of private images.
    pub fn get_alias(&self, name: &str, public_only: bool) -> Result<AliasInfo> {
        let conn = self.conn.lock();
        let mut sql = String::from(
            "SELECT images_aliases.name, images.fingerprint, images_aliases.description \
             FROM images_aliases INNER JOIN images ON images_aliases.image_id = images.id \
             WHERE images_aliases.name = ?1",
        );
        if public_only {
            sql.push_str(" AND images.public = 1");
        }
        conn.query_row(&sql, [name], |row| {
            Ok(AliasInfo {
                name: row.get(0)?,
                target: row.get(1)?,
                description: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            })
        })
        .map_err(|e| map_db_error(e, &format!("alias {}", name)))
    }

    /// All alias names.
    pub fn list_aliases(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT name FROM images_aliases ORDER BY id")
            .map_err(|e| map_db_error(e, "aliases"))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| map_db_error(e, "aliases"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| map_db_error(e, "aliases"))
    }

    pub fn delete_alias(&self, name: &str) -> Result<()> {
        let conn = self.conn.lock();
        let deleted = conn
            .execute("DELETE FROM images_aliases WHERE name = ?1", [name])
            .map_err(|e| map_db_error(e, &format!("alias {}", name)))?;
        if deleted == 0 {
            return Err(DepotError::NotFound(format!("alias {}", name)));
        }
        Ok(())
    }
}
