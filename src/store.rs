//! Persistent registry of transformer configurations.
//!
//! The store keeps every [`TransformerConfig`] in memory, keyed by id in
//! insertion order, and writes the whole collection back as one JSON array
//! after each successful mutation. Snapshots written before configs carried
//! ids (an object keyed by name) are migrated on load.

use crate::config::TransformerConfig;
use crate::error::{Error, Result};
use crate::writer::write_atomic;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};
use uuid::Uuid;

const COPY_SUFFIX: &str = " (Copy)";

/// Backend holding the persisted snapshot.
pub trait SnapshotStorage: Send + Sync {
    /// Returns the stored snapshot, or `None` if nothing was saved yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot exists but cannot be read or parsed.
    fn read(&self) -> Result<Option<Value>>;

    /// Replaces the stored snapshot in a single write.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written.
    fn write(&self, snapshot: &Value) -> Result<()>;
}

/// Snapshot kept in a JSON file, replaced atomically on every write.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    /// Uses the file at `path`. The file and its parent directory are created
    /// on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the snapshot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStorage for JsonFileStorage {
    fn read(&self) -> Result<Option<Value>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let text = fs::read_to_string(&self.path).map_err(|e| Error::io(&self.path, e))?;
        if text.trim().is_empty() {
            return Ok(None);
        }

        Ok(Some(serde_json::from_str(&text)?))
    }

    fn write(&self, snapshot: &Value) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        let json = serde_json::to_vec_pretty(snapshot)?;
        write_atomic(&self.path, &json)
    }
}

/// In-memory snapshot. Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    slot: Arc<Mutex<Option<Value>>>,
}

impl MemoryStorage {
    /// Creates an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a storage already holding `snapshot`.
    #[must_use]
    pub fn with_snapshot(snapshot: Value) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(snapshot))),
        }
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Option<Value> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SnapshotStorage for MemoryStorage {
    fn read(&self) -> Result<Option<Value>> {
        Ok(self.snapshot())
    }

    fn write(&self, snapshot: &Value) -> Result<()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot.clone());
        Ok(())
    }
}

/// Entry of an import that could not be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportFailure {
    /// Position in the imported array
    pub index: usize,
    /// Name of the entry, if it had one
    pub name: Option<String>,
    /// Why it was rejected
    pub message: String,
}

/// Outcome of [`ConfigStore::import_from`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    /// Entries created
    pub succeeded: usize,
    /// Entries in the file
    pub total: usize,
    /// Entries rejected
    pub failures: Vec<ImportFailure>,
}

impl ImportReport {
    /// Returns true if every entry was imported.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.succeeded == self.total
    }
}

/// Id synthesized for a legacy entry stored under `name`.
///
/// Derived from the name alone, so migrating the same snapshot again yields
/// the same ids.
#[must_use]
pub fn legacy_id(name: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("llm-transformer:{name}").as_bytes()).to_string()
}

/// Parses a persisted snapshot in either shape.
///
/// Returns the configs keyed by id, and whether the snapshot was in the legacy
/// name-keyed shape. A later entry with an already seen id replaces the
/// earlier one.
///
/// # Errors
///
/// Returns a serialization error if the snapshot is neither an array nor an
/// object, or if an entry does not describe a transformer.
pub fn parse_snapshot(snapshot: Value) -> Result<(IndexMap<String, TransformerConfig>, bool)> {
    let (entries, legacy) = match snapshot {
        Value::Array(entries) => (entries, false),
        Value::Object(by_name) => (
            by_name
                .into_iter()
                .map(|(name, entry)| migrate_entry(&name, entry))
                .collect(),
            true,
        ),
        Value::Null => (Vec::new(), false),
        other => {
            return Err(Error::Serialization {
                message: format!("expected an array of transformers, found {other}"),
            });
        }
    };

    let mut transformers = IndexMap::with_capacity(entries.len());
    for entry in entries {
        let config: TransformerConfig = serde_json::from_value(entry)?;
        if transformers.contains_key(&config.id) {
            warn!("Duplicate transformer id '{}' in snapshot, keeping the last", config.id);
        }
        transformers.insert(config.id.clone(), config);
    }

    Ok((transformers, legacy))
}

fn migrate_entry(name: &str, mut entry: Value) -> Value {
    if let Value::Object(fields) = &mut entry {
        fields
            .entry("name")
            .or_insert_with(|| Value::String(name.to_string()));
        fields
            .entry("id")
            .or_insert_with(|| Value::String(legacy_id(name)));
    }
    entry
}

/// Transformer configurations backed by a [`SnapshotStorage`].
///
/// Lookups accept an id or, when no id matches, a name.
///
/// # Examples
///
/// ```
/// use llm_transformer::{ConfigStore, InputBinding, MemoryStorage, TransformerConfig};
///
/// let mut store = ConfigStore::open(MemoryStorage::new())?;
/// let config = TransformerConfig::builder()
///     .id("summary")
///     .name("Summarize")
///     .description("One paragraph per file")
///     .prompt("Summarize:\n{{content}}")
///     .input(InputBinding::content("./docs"))
///     .output_folder("./out")
///     .build()?;
///
/// store.create(config)?;
/// assert!(store.get("Summarize").is_some());
/// # Ok::<(), llm_transformer::Error>(())
/// ```
#[derive(Debug)]
pub struct ConfigStore<S = JsonFileStorage> {
    storage: S,
    transformers: IndexMap<String, TransformerConfig>,
}

impl ConfigStore<JsonFileStorage> {
    /// Opens the JSON snapshot file at `path`.
    ///
    /// # Errors
    ///
    /// See [`ConfigStore::open`].
    pub fn open_file(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open(JsonFileStorage::new(path))
    }
}

impl<S: SnapshotStorage> ConfigStore<S> {
    /// Opens a store and loads its snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be read or parsed, or if a
    /// migrated legacy snapshot cannot be written back.
    pub fn open(storage: S) -> Result<Self> {
        let mut store = Self {
            storage,
            transformers: IndexMap::new(),
        };
        store.load()?;
        Ok(store)
    }

    /// Replaces the in-memory state with the persisted snapshot.
    ///
    /// A legacy name-keyed snapshot is rewritten in the current array shape.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be read, parsed, or migrated.
    pub fn load(&mut self) -> Result<&IndexMap<String, TransformerConfig>> {
        let Some(snapshot) = self.storage.read()? else {
            debug!("No stored transformers");
            self.transformers.clear();
            return Ok(&self.transformers);
        };

        let (transformers, legacy) = parse_snapshot(snapshot)?;
        self.transformers = transformers;

        if legacy {
            info!("Migrating {} transformer(s) to the id-keyed format", self.transformers.len());
            self.save()?;
        }

        debug!("Loaded {} transformer(s)", self.transformers.len());
        Ok(&self.transformers)
    }

    /// Writes every config as one array.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage write fails.
    pub fn save(&self) -> Result<()> {
        let snapshot = serde_json::to_value(self.transformers.values().collect::<Vec<_>>())?;
        self.storage.write(&snapshot)
    }

    /// Runs `change` and persists the result, restoring the previous state if
    /// persisting fails.
    fn commit<T>(&mut self, change: impl FnOnce(&mut IndexMap<String, TransformerConfig>) -> T) -> Result<T> {
        let previous = self.transformers.clone();
        let out = change(&mut self.transformers);

        if let Err(e) = self.save() {
            self.transformers = previous;
            return Err(e);
        }
        Ok(out)
    }

    fn resolve_key(&self, id_or_name: &str) -> Option<String> {
        if self.transformers.contains_key(id_or_name) {
            return Some(id_or_name.to_string());
        }
        self.transformers
            .values()
            .find(|c| c.name == id_or_name)
            .map(|c| c.id.clone())
    }

    /// Adds a new config.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExists`] if the id is taken, a validation
    /// error if the config is invalid, or the storage error.
    pub fn create(&mut self, config: TransformerConfig) -> Result<()> {
        if self.transformers.contains_key(&config.id) {
            return Err(Error::already_exists(&config.id));
        }
        Self::validate(&config)?;

        info!("Created transformer '{}' ({})", config.name, config.id);
        self.commit(|map| {
            map.insert(config.id.clone(), config);
        })
    }

    /// Replaces the config with the same id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the id is unknown, a validation error if
    /// the config is invalid, or the storage error.
    pub fn update(&mut self, config: TransformerConfig) -> Result<()> {
        if !self.transformers.contains_key(&config.id) {
            return Err(Error::not_found(&config.id));
        }
        Self::validate(&config)?;

        info!("Updated transformer '{}' ({})", config.name, config.id);
        self.commit(|map| {
            map.insert(config.id.clone(), config);
        })
    }

    /// Removes a config by id, or by name when no id matches.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if nothing matches, or the storage error.
    pub fn delete(&mut self, id_or_name: &str) -> Result<TransformerConfig> {
        let key = self
            .resolve_key(id_or_name)
            .ok_or_else(|| Error::not_found(id_or_name))?;

        let removed = self.commit(|map| map.shift_remove(&key))?;
        let removed = removed.ok_or_else(|| Error::not_found(id_or_name))?;
        info!("Deleted transformer '{}' ({})", removed.name, removed.id);
        Ok(removed)
    }

    /// Looks a config up by id, or by name when no id matches.
    #[must_use]
    pub fn get(&self, id_or_name: &str) -> Option<&TransformerConfig> {
        self.transformers
            .get(id_or_name)
            .or_else(|| self.transformers.values().find(|c| c.name == id_or_name))
    }

    /// All configs in insertion order.
    pub fn get_all(&self) -> impl ExactSizeIterator<Item = &TransformerConfig> {
        self.transformers.values()
    }

    /// Number of stored configs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    /// Returns true if no config is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }

    /// Checks a config without storing it.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the first offending field.
    pub fn validate(config: &TransformerConfig) -> Result<()> {
        config.validate()
    }

    /// Stores a copy of a config under a fresh id, named `"<name> (Copy)"`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if nothing matches, or the storage error.
    pub fn duplicate(&mut self, id_or_name: &str) -> Result<TransformerConfig> {
        let mut copy = self
            .get(id_or_name)
            .cloned()
            .ok_or_else(|| Error::not_found(id_or_name))?;

        copy.id = Uuid::new_v4().to_string();
        copy.name.push_str(COPY_SUFFIX);

        self.create(copy.clone())?;
        Ok(copy)
    }

    /// Writes the selected configs, or all of them when `ids` is empty, to
    /// `path` as a shareable array with every path blanked out.
    ///
    /// Returns the number of exported configs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown id or name, or an IO error.
    pub fn export_to(&self, path: impl AsRef<Path>, ids: &[&str]) -> Result<usize> {
        let selected: Vec<TransformerConfig> = if ids.is_empty() {
            self.transformers.values().map(TransformerConfig::for_export).collect()
        } else {
            ids.iter()
                .map(|key| {
                    self.get(key)
                        .map(TransformerConfig::for_export)
                        .ok_or_else(|| Error::not_found(*key))
                })
                .collect::<Result<_>>()?
        };

        let json = serde_json::to_vec_pretty(&selected)?;
        write_atomic(path.as_ref(), &json)?;

        info!("Exported {} transformer(s) to {}", selected.len(), path.as_ref().display());
        Ok(selected.len())
    }

    /// Creates every config found in an exported array.
    ///
    /// Rejected entries are collected in the report and do not stop the
    /// import.
    ///
    /// # Errors
    ///
    /// Returns an error only if the file cannot be read or is not a JSON array.
    pub fn import_from(&mut self, path: impl AsRef<Path>) -> Result<ImportReport> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let entries: Vec<Value> = serde_json::from_str(&text)?;

        let mut report = ImportReport {
            total: entries.len(),
            ..ImportReport::default()
        };

        for (index, entry) in entries.into_iter().enumerate() {
            let name = entry.get("name").and_then(Value::as_str).map(ToString::to_string);

            let result = serde_json::from_value::<TransformerConfig>(entry)
                .map_err(Error::from)
                .and_then(|config| self.create(config));

            match result {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    warn!("Skipping imported transformer #{index}: {e}");
                    report.failures.push(ImportFailure {
                        index,
                        name,
                        message: e.to_string(),
                    });
                }
            }
        }

        info!("Imported {}/{} transformer(s)", report.succeeded, report.total);
        Ok(report)
    }
}
