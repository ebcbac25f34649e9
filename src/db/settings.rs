//! Key/value settings and portable-drive aliases.
//!
//! Reserved keys `schema_version` and `index_version` are managed by
//! migrations and the pipeline; everything else is user configuration.

use rusqlite::{params, OptionalExtension};

use super::{now_timestamp, Database};
use crate::error::{Error, Result};

/// Stable device id mapped to a user-friendly label and the mount
/// point where the drive was last seen.
#[derive(Debug, Clone, PartialEq)]
pub struct DriveAlias {
    pub device_id: String,
    pub label: String,
    pub last_mount_point: Option<String>,
}

impl Database {
    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn();
        let value = conn
            .query_row("SELECT value FROM settings WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = ?2",
            params![key, value],
        )?;
        Ok(())
    }

    /// Configured crawl roots, stored as a JSON array of paths.
    pub fn get_roots(&self) -> Result<Vec<String>> {
        match self.get_setting("roots")? {
            Some(json) => Ok(serde_json::from_str(&json).map_err(anyhow::Error::from)?),
            None => Ok(Vec::new()),
        }
    }

    pub fn set_roots(&self, roots: &[String]) -> Result<()> {
        for root in roots {
            if root.trim().is_empty() {
                return Err(Error::Invalid("root path must not be empty".to_string()));
            }
        }
        let json = serde_json::to_string(roots).map_err(anyhow::Error::from)?;
        self.set_setting("roots", &json)
    }

    pub fn get_bool_setting(&self, key: &str, default: bool) -> Result<bool> {
        Ok(self
            .get_setting(key)?
            .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
            .unwrap_or(default))
    }

    pub fn get_f32_setting(&self, key: &str, default: f32) -> Result<f32> {
        match self.get_setting(key)? {
            Some(v) => v
                .parse()
                .map_err(|_| Error::Invalid(format!("setting {key} has non-numeric value {v}"))),
            None => Ok(default),
        }
    }

    pub fn upsert_drive_alias(&self, alias: &DriveAlias) -> Result<()> {
        self.conn().execute(
            "INSERT INTO drive_aliases (device_id, label, last_mount_point, last_seen_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(device_id) DO UPDATE SET
                 label = ?2, last_mount_point = ?3, last_seen_at = ?4",
            params![
                alias.device_id,
                alias.label,
                alias.last_mount_point,
                now_timestamp()
            ],
        )?;
        Ok(())
    }

    pub fn list_drive_aliases(&self) -> Result<Vec<DriveAlias>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT device_id, label, last_mount_point FROM drive_aliases ORDER BY label")?;
        let aliases = stmt
            .query_map([], |row| {
                Ok(DriveAlias {
                    device_id: row.get(0)?,
                    label: row.get(1)?,
                    last_mount_point: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(aliases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roots_round_trip() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_roots().unwrap().is_empty());

        db.set_roots(&["/photos".to_string(), "/mnt/drive".to_string()])
            .unwrap();
        assert_eq!(db.get_roots().unwrap(), vec!["/photos", "/mnt/drive"]);
    }

    #[test]
    fn test_empty_root_rejected() {
        let db = Database::open_in_memory().unwrap();
        let err = db.set_roots(&["  ".to_string()]).unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }

    #[test]
    fn test_typed_settings() {
        let db = Database::open_in_memory().unwrap();
        assert!(!db.get_bool_setting("face_search_enabled", false).unwrap());
        db.set_setting("face_search_enabled", "true").unwrap();
        assert!(db.get_bool_setting("face_search_enabled", false).unwrap());

        assert_eq!(db.get_f32_setting("face_match_threshold", 0.45).unwrap(), 0.45);
        db.set_setting("face_match_threshold", "0.6").unwrap();
        assert_eq!(db.get_f32_setting("face_match_threshold", 0.45).unwrap(), 0.6);
    }

    #[test]
    fn test_drive_alias_upsert() {
        let db = Database::open_in_memory().unwrap();
        let alias = DriveAlias {
            device_id: "usb-1234".to_string(),
            label: "Backup drive".to_string(),
            last_mount_point: Some("/mnt/backup".to_string()),
        };
        db.upsert_drive_alias(&alias).unwrap();
        db.upsert_drive_alias(&alias).unwrap();
        let aliases = db.list_drive_aliases().unwrap();
        assert_eq!(aliases.len(), 1);
        assert_eq!(aliases[0], alias);
    }
}
