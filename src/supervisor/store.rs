use crate::error::{AppError, ValidationErrors};
use crate::supervisor::models::{TerminalDefinition, TerminalDraft};
use crate::utils::path_utils::resolve_working_directory;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};
use uuid::Uuid;

const STORE_FORMAT_VERSION: &str = "1.0.0";

#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    version: String,
    #[serde(default)]
    terminals: Vec<TerminalDefinition>,
}

/// Durable CRUD over terminal definitions.
///
/// Every mutation is applied to a copy, written to disk through a temp file
/// plus rename, and only then committed in memory. A crash can leave the old
/// file or the new file, never a torn one.
///
/// Writers queue on `write_lock`; readers only ever take the short-held
/// snapshot lock, which is never held across disk I/O.
#[derive(Debug)]
pub struct DefinitionStore {
    path: PathBuf,
    definitions: Mutex<Vec<TerminalDefinition>>,
    write_lock: AsyncMutex<()>,
}

impl DefinitionStore {
    /// Opens the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let path = path.into();
        let definitions = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|e| {
                AppError::Storage(format!("Failed to read {}: {}", path.display(), e))
            })?;
            let document: StoreDocument = serde_json::from_str(&content).map_err(|e| {
                AppError::Storage(format!("Failed to parse {}: {}", path.display(), e))
            })?;
            document.terminals
        } else {
            Vec::new()
        };
        info!(path = %path.display(), count = definitions.len(), "Loaded terminal definitions");
        Ok(Self {
            path,
            definitions: Mutex::new(definitions),
            write_lock: AsyncMutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TerminalDefinition>> {
        self.definitions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn list(&self) -> Vec<TerminalDefinition> {
        self.lock().clone()
    }

    pub fn get(&self, id: &str) -> Result<TerminalDefinition, AppError> {
        self.lock()
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(id.to_string()))
    }

    pub async fn create(&self, draft: &TerminalDraft) -> Result<TerminalDefinition, AppError> {
        let _writer = self.write_lock.lock().await;
        let mut next = self.list();
        let valid = validate_draft(draft, &next, None)?;

        let definition = TerminalDefinition {
            id: Uuid::new_v4().to_string(),
            name: valid.name,
            working_directory: valid.working_directory,
            command: valid.command,
            created_at: Utc::now().to_rfc3339(),
            last_run: None,
        };
        next.push(definition.clone());
        self.commit(next).await?;

        debug!(id = %definition.id, name = %definition.name, "Created terminal definition");
        Ok(definition)
    }

    pub async fn update(&self, id: &str, draft: &TerminalDraft) -> Result<TerminalDefinition, AppError> {
        let _writer = self.write_lock.lock().await;
        let mut next = self.list();
        let index = position_of(&next, id)?;
        let valid = validate_draft(draft, &next, Some(id))?;

        let updated = &mut next[index];
        updated.name = valid.name;
        updated.working_directory = valid.working_directory;
        updated.command = valid.command;
        let updated = updated.clone();

        self.commit(next).await?;
        Ok(updated)
    }

    pub async fn delete(&self, id: &str) -> Result<(), AppError> {
        let _writer = self.write_lock.lock().await;
        let mut next = self.list();
        let index = position_of(&next, id)?;
        next.remove(index);
        self.commit(next).await
    }

    pub async fn record_last_run(&self, id: &str, at: &str) -> Result<(), AppError> {
        let _writer = self.write_lock.lock().await;
        let mut next = self.list();
        let index = position_of(&next, id)?;
        next[index].last_run = Some(at.to_string());
        self.commit(next).await
    }

    /// Writes `next` durably, then swaps it in. Caller holds `write_lock`.
    async fn commit(&self, next: Vec<TerminalDefinition>) -> Result<(), AppError> {
        let document = StoreDocument {
            version: STORE_FORMAT_VERSION.to_string(),
            terminals: next,
        };
        let content = serde_json::to_vec_pretty(&document)?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, &content))
            .await
            .map_err(|e| AppError::Internal(format!("Store writer task failed: {}", e)))?
            .map_err(|e| {
                AppError::Storage(format!("Failed to write {}: {}", self.path.display(), e))
            })?;

        *self.lock() = document.terminals;
        Ok(())
    }
}

fn position_of(definitions: &[TerminalDefinition], id: &str) -> Result<usize, AppError> {
    definitions
        .iter()
        .position(|d| d.id == id)
        .ok_or_else(|| AppError::NotFound(id.to_string()))
}

fn write_atomically(path: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    // Same directory as the target so the rename never crosses filesystems.
    let temp_path = path.with_extension("json.tmp");
    let mut temp_file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)?;
    temp_file.write_all(content)?;
    temp_file.sync_all()?;
    drop(temp_file);

    fs::rename(&temp_path, path)
}

struct ValidDraft {
    name: String,
    working_directory: String,
    command: String,
}

/// Checks every field and reports all failures together.
fn validate_draft(
    draft: &TerminalDraft,
    existing: &[TerminalDefinition],
    editing_id: Option<&str>,
) -> Result<ValidDraft, AppError> {
    let mut errors = ValidationErrors::default();

    let name = draft.name.trim().to_string();
    if name.is_empty() {
        errors.push("name", "Name cannot be empty");
    } else if existing
        .iter()
        .any(|d| d.name == name && Some(d.id.as_str()) != editing_id)
    {
        errors.push("name", "Duplicate name: terminal with this name already exists");
    }

    let working_directory = match resolve_working_directory(&draft.path) {
        Ok(path) => path.to_string_lossy().into_owned(),
        Err(message) => {
            errors.push("path", message);
            String::new()
        }
    };

    let command = draft.command.trim().to_string();
    if command.is_empty() {
        errors.push("command", "Invalid command: command cannot be empty");
    }

    errors.into_result()?;
    Ok(ValidDraft {
        name,
        working_directory,
        command,
    })
}
