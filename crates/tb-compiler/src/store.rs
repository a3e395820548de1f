//! On-disk store of compiled rule lists, one file per rule list name.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;

use tb_core::cache::{encode_cache_file, CacheError, CachedRuleList};
use tb_core::identifier::RulesIdentifier;

use crate::compiler::RuleListHandle;

const FILE_EXTENSION: &str = "rlc";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on '{path}': {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("Invalid cache file '{path}': {source}")]
    Cache { path: PathBuf, source: CacheError },
}

#[derive(Debug, Clone)]
pub struct RuleListStore {
    dir: PathBuf,
}

impl RuleListStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the cache file holding the list called `name`.
    pub fn path_for(&self, name: &str) -> PathBuf {
        let file_name: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{file_name}.{FILE_EXTENSION}"))
    }

    /// Persist a compiled list, replacing any earlier list with the same name.
    pub fn save(&self, handle: &RuleListHandle) -> Result<(), StoreError> {
        let identifier = handle.identifier();
        let path = self.path_for(identifier.name());
        let bytes = encode_cache_file(identifier, handle.encoded(), handle.rule_count() as u32);

        fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &bytes).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;

        debug!("Stored rule list {} at {}", identifier, path.display());
        Ok(())
    }

    /// Load the stored list for `identifier`'s name if it was compiled for exactly that identifier.
    pub fn load(&self, identifier: &RulesIdentifier) -> Result<Option<RuleListHandle>, StoreError> {
        let path = self.path_for(identifier.name());
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        let cached = CachedRuleList::load(&bytes).map_err(|source| StoreError::Cache {
            path: path.clone(),
            source,
        })?;

        if &cached.identifier != identifier {
            debug!(
                "Stored rule list {} does not match requested {}",
                cached.identifier, identifier
            );
            return Ok(None);
        }

        Ok(Some(RuleListHandle::new(
            cached.identifier.clone(),
            cached.payload().to_string(),
            cached.rule_count as usize,
        )))
    }
}
