//! ST-009: Lock file management: load, save (atomic), path derivation.

use super::error::{Error, Result};
use super::template::Template;
use super::types::{ResourceLock, StackLock};
use crate::tripwire::{eventlog, hasher};
use std::path::{Path, PathBuf};

pub const LOCK_SCHEMA: &str = "1.0";

/// Derive the lock file path for a stack within the state directory.
pub fn lock_file_path(state_dir: &Path, stack: &str) -> PathBuf {
    state_dir.join(stack).join("stack.lock.yaml")
}

/// Load a stack's lock file. Returns None if the file doesn't exist.
pub fn load_lock(state_dir: &Path, stack: &str) -> Result<Option<StackLock>> {
    let path = lock_file_path(state_dir, stack);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path).map_err(|source| Error::Read {
        path: path.clone(),
        source,
    })?;
    let lock: StackLock = serde_yaml_ng::from_str(&content)
        .map_err(|e| Error::State(format!("invalid lock file {}: {}", path.display(), e)))?;
    if lock.schema != LOCK_SCHEMA {
        return Err(Error::State(format!(
            "lock file {} has schema {}, expected {}",
            path.display(),
            lock.schema,
            LOCK_SCHEMA
        )));
    }
    Ok(Some(lock))
}

/// Save a lock file atomically (write to temp, then rename).
pub fn save_lock(state_dir: &Path, lock: &StackLock) -> Result<PathBuf> {
    let path = lock_file_path(state_dir, &lock.stack);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let yaml = serde_yaml_ng::to_string(lock)?;

    // Atomic write: temp file + rename
    let tmp_path = path.with_extension("yaml.tmp");
    std::fs::write(&tmp_path, &yaml)?;
    std::fs::rename(&tmp_path, &path).map_err(|e| {
        Error::State(format!(
            "cannot rename {} -> {}: {}",
            tmp_path.display(),
            path.display(),
            e
        ))
    })?;

    Ok(path)
}

/// Remove a stack's lock after the stack is withdrawn. Missing is fine.
pub fn remove_lock(state_dir: &Path, stack: &str) -> Result<bool> {
    let path = lock_file_path(state_dir, stack);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Every lock under the state directory, sorted by stack name.
pub fn list_locks(state_dir: &Path) -> Result<Vec<StackLock>> {
    if !state_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut stacks: Vec<String> = std::fs::read_dir(state_dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    stacks.sort();

    let mut locks = Vec::new();
    for stack in stacks {
        if let Some(lock) = load_lock(state_dir, &stack)? {
            locks.push(lock);
        }
    }
    Ok(locks)
}

/// Snapshot a synthesized template as a lock, resources in `order`.
pub fn new_lock(stack: &str, template: &Template, order: &[String]) -> Result<StackLock> {
    let mut resources = indexmap::IndexMap::new();
    for id in order {
        let Some(r) = template.resources.get(id) else {
            continue;
        };
        resources.insert(
            id.clone(),
            ResourceLock {
                resource_type: r.resource_type.clone(),
                hash: hasher::hash_resource(r)?,
                deletion_policy: r.deletion_policy,
                deletion_protection: r.prop("DeletionProtection")
                    == Some(&serde_json::Value::Bool(true)),
            },
        );
    }
    Ok(StackLock {
        schema: LOCK_SCHEMA.to_string(),
        stack: stack.to_string(),
        generated_at: eventlog::now_rfc3339(),
        generator: format!("stackforge {}", env!("CARGO_PKG_VERSION")),
        template_hash: hasher::hash_template(template)?,
        resources,
    })
}
