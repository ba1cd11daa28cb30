use std::path::{Path, PathBuf};

use crate::{
    error::{Error, Result},
    validation::validate_collection_name,
};

pub const DATA_DIR_ENV_VAR: &str = "JSONDEX_DATA_DIR";

const CONFIG_DB_FILE: &str = "config.redb";
const COLLECTIONS_DIR: &str = "collections";

/// Where the data directory setting came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDirSource {
    Flag,
    Env,
    Xdg,
}

/// On-disk layout:
///
/// ```text
/// <root>/config.redb              settings and collection config cache
/// <root>/collections/<name>/      one index directory per collection
/// ```
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
    source: DataDirSource,
}

fn locate(explicit: Option<&Path>) -> Result<(PathBuf, DataDirSource)> {
    if let Some(path) = explicit {
        return Ok((path.to_path_buf(), DataDirSource::Flag));
    }
    if let Some(val) = std::env::var_os(DATA_DIR_ENV_VAR).filter(|v| !v.is_empty()) {
        return Ok((PathBuf::from(val), DataDirSource::Env));
    }
    let home = xdg::BaseDirectories::with_prefix("jsondex")
        .get_data_home()
        .ok_or_else(|| {
            Error::Config("could not determine XDG data home directory".into())
        })?;
    Ok((home, DataDirSource::Xdg))
}

fn ensure_dir(path: PathBuf) -> Result<PathBuf> {
    std::fs::create_dir_all(&path).map_err(|_| Error::DataDir(path.clone()))?;
    Ok(path)
}

impl DataDir {
    /// Use `--data-dir` if given, else `$JSONDEX_DATA_DIR`, else
    /// `$XDG_DATA_HOME/jsondex`. The directory is created if missing.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let (root, source) = locate(explicit)?;
        let root = ensure_dir(root)?;
        tracing::debug!(root = %root.display(), ?source, "resolved data directory");
        Ok(Self { root, source })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source(&self) -> DataDirSource {
        self.source
    }

    pub fn config_db(&self) -> PathBuf {
        self.root.join(CONFIG_DB_FILE)
    }

    /// Root of the per-collection storage directories, created if missing.
    pub fn collections_dir(&self) -> Result<PathBuf> {
        ensure_dir(self.root.join(COLLECTIONS_DIR))
    }

    /// Storage directory of one collection. Not created.
    pub fn collection_dir(&self, name: &str) -> Result<PathBuf> {
        validate_collection_name(name)?;
        Ok(self.root.join(COLLECTIONS_DIR).join(name))
    }
}
