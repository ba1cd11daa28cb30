use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::{collection_config::CollectionConfig, error::Result};

const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");
/// Collection name -> JSON-encoded [`CollectionConfig`], read by the
/// processing stage.
const COLLECTION_CONFIGS: TableDefinition<&str, &str> =
    TableDefinition::new("collection_configs");

type StrTable = TableDefinition<'static, &'static str, &'static str>;

/// Small redb store beside the collection directories.
pub struct ConfigDb {
    db: Database,
}

impl ConfigDb {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(SETTINGS)?;
        txn.open_table(COLLECTION_CONFIGS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    fn put(&self, table: StrTable, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        txn.open_table(table)?.insert(key, value)?;
        txn.commit()?;
        Ok(())
    }

    fn get(&self, table: StrTable, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(table)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    fn delete(&self, table: StrTable, key: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = txn.open_table(table)?.remove(key)?.is_some();
        txn.commit()?;
        Ok(removed)
    }

    // -- Collection configs --

    pub fn set_collection_config(
        &self,
        name: &str,
        config: &CollectionConfig,
    ) -> Result<()> {
        self.put(COLLECTION_CONFIGS, name, &serde_json::to_string(config)?)
    }

    pub fn get_collection_config(
        &self,
        name: &str,
    ) -> Result<Option<CollectionConfig>> {
        self.get(COLLECTION_CONFIGS, name)?
            .map(|json| serde_json::from_str(&json).map_err(Into::into))
            .transpose()
    }

    pub fn remove_collection_config(&self, name: &str) -> Result<bool> {
        self.delete(COLLECTION_CONFIGS, name)
    }

    // -- Settings --

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.put(SETTINGS, key, value)
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        self.get(SETTINGS, key)
    }

    pub fn remove_setting(&self, key: &str) -> Result<bool> {
        self.delete(SETTINGS, key)
    }

    /// Every stored setting, sorted by key.
    pub fn list_settings(&self) -> Result<Vec<(String, String)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        table
            .iter()?
            .map(|entry| -> Result<(String, String)> {
                let (k, v) = entry?;
                Ok((k.value().to_string(), v.value().to_string()))
            })
            .collect()
    }
}

impl std::fmt::Debug for ConfigDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigDb").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn test_db() -> (tempfile::TempDir, ConfigDb) {
        let tmp = tempfile::tempdir().unwrap();
        let db = ConfigDb::open(&tmp.path().join("config.redb")).unwrap();
        (tmp, db)
    }

    #[test]
    fn collection_configs_crud() {
        let (_tmp, db) = test_db();
        assert_eq!(db.get_collection_config("notes").unwrap(), None);

        let config = CollectionConfig::from_json(json!({
            "taxonomies": {"Foo": {"child": ["parent"], "parent": []}},
            "category_fields": {"foo": "Foo"}
        }))
        .unwrap();
        db.set_collection_config("notes", &config).unwrap();
        assert_eq!(db.get_collection_config("notes").unwrap(), Some(config));

        assert!(db.remove_collection_config("notes").unwrap());
        assert!(!db.remove_collection_config("notes").unwrap());
    }

    #[test]
    fn settings_crud() {
        let (_tmp, db) = test_db();

        assert_eq!(db.get_setting("readonly_workers").unwrap(), None);

        db.set_setting("readonly_workers", "8").unwrap();
        assert_eq!(
            db.get_setting("readonly_workers").unwrap(),
            Some("8".to_string())
        );
        assert_eq!(db.list_settings().unwrap().len(), 1);

        assert!(db.remove_setting("readonly_workers").unwrap());
        assert!(db.list_settings().unwrap().is_empty());
    }

    #[test]
    fn reopen_preserves_data() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.redb");

        {
            let db = ConfigDb::open(&path).unwrap();
            db.set_collection_config("notes", &CollectionConfig::default())
                .unwrap();
            db.set_setting("version", "1").unwrap();
        }

        {
            let db = ConfigDb::open(&path).unwrap();
            assert!(db.get_collection_config("notes").unwrap().is_some());
            assert_eq!(
                db.get_setting("version").unwrap(),
                Some("1".to_string())
            );
        }
    }
}
