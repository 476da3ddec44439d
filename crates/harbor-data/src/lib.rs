//! Typed data store.
//!
//! Records live under `<root>/<id[0..2]>/<id[2..4]>/<id>/` as a JSON manifest
//! plus raw image sidecars. Writes are staged in a temporary directory under
//! `<root>/.staging` and only become visible on `commit`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};
use walkdir::WalkDir;

use harbor_core::types::generate_id;
use harbor_core::{DataField, DataPoint, Error, FieldValue, Result};

const MANIFEST: &str = "manifest.json";
const STAGING: &str = ".staging";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    Point,
    List,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "storage", rename_all = "snake_case")]
enum StoredValue {
    Inline { value: FieldValue },
    Sidecar { file: String, ext: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredField {
    name: String,
    #[serde(flatten)]
    value: StoredValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ListEntry {
    name: String,
    id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    id: String,
    kind: DataKind,
    #[serde(default)]
    fields: Vec<StoredField>,
    #[serde(default)]
    children: Vec<ListEntry>,
}

impl Manifest {
    fn new(id: &str, kind: DataKind) -> Self {
        Self { id: id.to_string(), kind, fields: Vec::new(), children: Vec::new() }
    }
}

#[derive(Debug, Clone)]
pub struct DataManager {
    root: PathBuf,
}

impl DataManager {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(STAGING))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Open a write scope for a fresh id.
    pub fn create(&self, kind: DataKind) -> Result<DataHandle> {
        self.create_with_id(kind, generate_id())
    }

    /// Open a write scope for `id`. Committing replaces any existing record.
    pub fn create_with_id(&self, kind: DataKind, id: impl Into<String>) -> Result<DataHandle> {
        let id = id.into();
        let final_dir = self.record_dir(&id)?;
        let staging = tempfile::Builder::new()
            .prefix(&format!("{id}-"))
            .tempdir_in(self.root.join(STAGING))?;
        Ok(DataHandle {
            manager: self.clone(),
            manifest: Manifest::new(&id, kind),
            mode: Mode::Write,
            final_dir,
            staging: Some(staging),
        })
    }

    /// Open an existing record read-only.
    pub fn load(&self, id: &str) -> Result<DataHandle> {
        let final_dir = self.record_dir(id)?;
        let path = final_dir.join(MANIFEST);
        if !path.is_file() {
            return Err(Error::NotFound(format!("data {id}")));
        }
        let manifest: Manifest = serde_json::from_slice(&fs::read(&path)?)?;
        Ok(DataHandle { manager: self.clone(), manifest, mode: Mode::Read, final_dir, staging: None })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.record_dir(id).map(|d| d.join(MANIFEST).is_file()).unwrap_or(false)
    }

    /// Run `f` inside a write scope: commit on `Ok`, discard on `Err`.
    pub fn scoped<T, F>(&self, kind: DataKind, f: F) -> Result<(String, T)>
    where
        F: FnOnce(&mut DataHandle) -> Result<T>,
    {
        let mut handle = self.create(kind)?;
        let out = f(&mut handle)?;
        let id = handle.commit()?;
        Ok((id, out))
    }

    /// Store a point under its own id, replacing any previous version.
    pub fn save_point(&self, point: &DataPoint) -> Result<()> {
        let mut handle = self.create_with_id(DataKind::Point, point.id.clone())?;
        for field in point.fields() {
            handle.put(&field.name, field.value.clone())?;
        }
        handle.commit()?;
        Ok(())
    }

    pub fn load_point(&self, id: &str) -> Result<DataPoint> {
        self.load(id)?.point()
    }

    /// Ids of every committed record.
    pub fn ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(3).max_depth(3).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            if !entry.file_type().is_dir() || entry.path().starts_with(self.root.join(STAGING)) {
                continue;
            }
            if entry.path().join(MANIFEST).is_file() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(ids)
    }

    fn record_dir(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.root.join(&id[0..2]).join(&id[2..4]).join(id))
    }
}

/// Best-effort removal of a replaced record. The commit has already
/// happened, so failures are only logged.
fn discard(trash: &Path) -> bool {
    match fs::remove_dir_all(trash) {
        Ok(()) => true,
        Err(e) => {
            warn!(path = %trash.display(), error = %e, "could not remove replaced record");
            false
        }
    }
}

fn validate_id(id: &str) -> Result<()> {
    let safe = id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if id.len() < 4 || !safe {
        return Err(Error::InvalidId(id.to_string()));
    }
    Ok(())
}

fn sanitize_ext(ext: &str) -> &str {
    if !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        ext
    } else {
        "bin"
    }
}

/// An open record. Write handles stage changes until `commit`; dropping an
/// uncommitted write handle discards them.
#[derive(Debug)]
pub struct DataHandle {
    manager: DataManager,
    manifest: Manifest,
    mode: Mode,
    final_dir: PathBuf,
    staging: Option<TempDir>,
}

impl DataHandle {
    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    pub fn kind(&self) -> DataKind {
        self.manifest.kind
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    fn dir(&self) -> &Path {
        match &self.staging {
            Some(staging) => staging.path(),
            None => &self.final_dir,
        }
    }

    fn ensure_writable(&self, kind: DataKind) -> Result<()> {
        if self.mode == Mode::Read {
            return Err(Error::ReadOnlyViolation(self.manifest.id.clone()));
        }
        if self.manifest.kind != kind {
            return Err(Error::Config(format!(
                "data {} is a {:?} record, not a {:?}",
                self.manifest.id, self.manifest.kind, kind
            )));
        }
        Ok(())
    }

    /// Append a field to a point record.
    pub fn put(&mut self, name: &str, value: FieldValue) -> Result<()> {
        self.ensure_writable(DataKind::Point)?;
        if self.manifest.fields.iter().any(|f| f.name == name) {
            return Err(Error::DuplicateField(name.to_string()));
        }
        let value = match value {
            FieldValue::Image { content, ext } => {
                let ext = sanitize_ext(&ext).to_string();
                let file = format!("{}.{ext}", self.manifest.fields.len());
                fs::write(self.dir().join(&file), &content)?;
                StoredValue::Sidecar { file, ext }
            }
            other => StoredValue::Inline { value: other },
        };
        self.manifest.fields.push(StoredField { name: name.to_string(), value });
        Ok(())
    }

    /// Append a child record (committed separately) to a list record.
    pub fn push_child(&mut self, name: &str, child_id: &str) -> Result<()> {
        self.ensure_writable(DataKind::List)?;
        validate_id(child_id)?;
        self.manifest.children.push(ListEntry { name: name.to_string(), id: child_id.to_string() });
        Ok(())
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.manifest.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Result<Option<FieldValue>> {
        match self.manifest.fields.iter().find(|f| f.name == name) {
            Some(field) => self.materialize(&field.value).map(Some),
            None => Ok(None),
        }
    }

    fn materialize(&self, stored: &StoredValue) -> Result<FieldValue> {
        match stored {
            StoredValue::Inline { value } => Ok(value.clone()),
            StoredValue::Sidecar { file, ext } => {
                let content = fs::read(self.dir().join(file))?;
                Ok(FieldValue::Image { content, ext: ext.clone() })
            }
        }
    }

    /// All fields of a point record, in insertion order.
    pub fn point(&self) -> Result<DataPoint> {
        let fields = self
            .manifest
            .fields
            .iter()
            .map(|f| Ok(DataField::new(f.name.clone(), self.materialize(&f.value)?)))
            .collect::<Result<Vec<_>>>()?;
        DataPoint::from_fields(self.manifest.id.clone(), fields)
    }

    /// Children of a list record, in insertion order, each opened read-only.
    pub fn children(&self) -> Result<Vec<(String, DataHandle)>> {
        self.manifest
            .children
            .iter()
            .map(|c| Ok((c.name.clone(), self.manager.load(&c.id)?)))
            .collect()
    }

    pub fn child_ids(&self) -> Vec<(&str, &str)> {
        self.manifest.children.iter().map(|c| (c.name.as_str(), c.id.as_str())).collect()
    }

    /// Make the staged record visible under its final id and return the id.
    pub fn commit(mut self) -> Result<String> {
        let staging = match self.staging.take() {
            Some(staging) => staging,
            None => return Err(Error::ReadOnlyViolation(self.manifest.id.clone())),
        };
        let id = self.manifest.id.clone();
        fs::write(staging.path().join(MANIFEST), serde_json::to_vec_pretty(&self.manifest)?)?;

        if let Some(parent) = self.final_dir.parent() {
            fs::create_dir_all(parent)?;
        }

        if self.final_dir.exists() {
            let trash = self.manager.root.join(STAGING).join(format!("trash-{}", generate_id()));
            fs::rename(&self.final_dir, &trash)?;
            if let Err(e) = fs::rename(staging.path(), &self.final_dir) {
                let restored = fs::rename(&trash, &self.final_dir);
                return Err(Error::PartialWrite(
                    id,
                    format!("replace failed: {e}; previous record restored: {}", restored.is_ok()),
                ));
            }
            discard(&trash);
        } else {
            fs::rename(staging.path(), &self.final_dir)?;
        }
        // the TempDir now points at a moved path; dropping it is a no-op
        drop(staging);

        debug!(id = %id, kind = ?self.manifest.kind, "committed data record");
        Ok(id)
    }
}
