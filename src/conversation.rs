//! `ConversationStore` / `Interaction` (§3, §4.3).
//!
//! Grounded on `thought_chain.rs`'s on-disk layout idiom — one append-only
//! JSON Lines file per scope, loaded into memory on open, appended to via
//! `OpenOptions::new().append(true)` — with its SHA-256 hash-chaining
//! deliberately dropped. §4.3 requires `update_message`/`delete_message` as
//! first-class admin operations; a hash chain over prior entries cannot
//! tolerate editing or removing an entry without invalidating every
//! subsequent link, so this store keeps the JSONL-per-scope persistence
//! shape without the chain linkage (recorded as a grounding deviation in
//! `DESIGN.md`).

use crate::error::ConversationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// One entry in a conversation's ordered interaction log (§3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Interaction {
    pub id: u64,
    pub role: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Set on `tool:<name>` interactions recording a failed dispatch
    /// (§4.2: "message = error text, error=true marker").
    #[serde(default)]
    pub error: bool,
}

struct ConversationFile {
    path: PathBuf,
    interactions: Vec<Interaction>,
    next_id: u64,
}

impl ConversationFile {
    fn open(path: PathBuf) -> Result<Self, ConversationError> {
        let interactions = if path.exists() {
            let file = fs::File::open(&path)
                .map_err(|e| ConversationError::StorageError(e.to_string()))?;
            let reader = BufReader::new(file);
            let mut entries = Vec::new();
            for line in reader.lines() {
                let line = line.map_err(|e| ConversationError::StorageError(e.to_string()))?;
                if line.trim().is_empty() {
                    continue;
                }
                let interaction: Interaction = serde_json::from_str(&line)
                    .map_err(|e| ConversationError::StorageError(e.to_string()))?;
                entries.push(interaction);
            }
            entries
        } else {
            Vec::new()
        };

        let next_id = interactions.iter().map(|i| i.id).max().map(|n| n + 1).unwrap_or(0);

        Ok(Self {
            path,
            interactions,
            next_id,
        })
    }

    fn append(&mut self, role: &str, message: &str, error: bool) -> Result<Interaction, ConversationError> {
        let interaction = Interaction {
            id: self.next_id,
            role: role.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
            error,
        };
        self.next_id += 1;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| ConversationError::StorageError(e.to_string()))?;
        let line = serde_json::to_string(&interaction)
            .map_err(|e| ConversationError::StorageError(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| ConversationError::StorageError(e.to_string()))?;

        self.interactions.push(interaction.clone());
        Ok(interaction)
    }

    /// Rewrites the whole file from the in-memory list. Only used by the
    /// admin operations that mutate history (`update_message`,
    /// `delete_message`); normal appends stay append-only.
    fn rewrite(&self) -> Result<(), ConversationError> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| ConversationError::StorageError(e.to_string()))?;
        for interaction in &self.interactions {
            let line = serde_json::to_string(interaction)
                .map_err(|e| ConversationError::StorageError(e.to_string()))?;
            writeln!(file, "{line}").map_err(|e| ConversationError::StorageError(e.to_string()))?;
        }
        Ok(())
    }
}

/// Sanitizes a scope component for use in a filename: keeps alphanumerics,
/// `-`, and `_`; everything else becomes `_`.
fn sanitize(component: &str) -> String {
    component
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn scope_key(tenant: &str, agent: &str, conversation_name: &str) -> String {
    format!("{tenant}/{agent}/{conversation_name}")
}

fn scope_path(root: &Path, tenant: &str, agent: &str, conversation_name: &str) -> PathBuf {
    root.join(sanitize(tenant))
        .join(sanitize(agent))
        .join(format!("{}.jsonl", sanitize(conversation_name)))
}

/// Append-only, per-scope conversation log (§3, §4.3). Scoped by
/// `(tenant, agent, conversation_name)`; concurrent appends to the same
/// scope are serialized by a per-conversation [`tokio::sync::Mutex`], while
/// distinct conversations proceed independently.
#[derive(Clone)]
pub struct ConversationStore {
    root: PathBuf,
    open: Arc<RwLock<HashMap<String, Arc<Mutex<ConversationFile>>>>>,
}

impl ConversationStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            open: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn handle(
        &self,
        tenant: &str,
        agent: &str,
        conversation_name: &str,
    ) -> Result<Arc<Mutex<ConversationFile>>, ConversationError> {
        let key = scope_key(tenant, agent, conversation_name);
        if let Some(existing) = self.open.read().await.get(&key) {
            return Ok(existing.clone());
        }

        let mut open = self.open.write().await;
        if let Some(existing) = open.get(&key) {
            return Ok(existing.clone());
        }

        let path = scope_path(&self.root, tenant, agent, conversation_name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConversationError::StorageError(e.to_string()))?;
        }
        let file = ConversationFile::open(path)?;
        let handle = Arc::new(Mutex::new(file));
        open.insert(key, handle.clone());
        Ok(handle)
    }

    /// Appends one interaction. A request that invokes a provider writes at
    /// least two of these (user turn, assistant turn); tool invocations
    /// write a `tool:<name>` role interaction (§3 invariants).
    pub async fn append(
        &self,
        tenant: &str,
        agent: &str,
        conversation_name: &str,
        role: &str,
        message: &str,
        error: bool,
    ) -> Result<Interaction, ConversationError> {
        let handle = self.handle(tenant, agent, conversation_name).await?;
        let mut file = handle.lock().await;
        file.append(role, message, error)
    }

    /// Lists interactions, most recent page first, newest-to-oldest within
    /// a page following `page * limit` offsetting from the tail.
    pub async fn list(
        &self,
        tenant: &str,
        agent: &str,
        conversation_name: &str,
        limit: usize,
        page: usize,
    ) -> Result<Vec<Interaction>, ConversationError> {
        let handle = self.handle(tenant, agent, conversation_name).await?;
        let file = handle.lock().await;
        let total = file.interactions.len();
        let end = total.saturating_sub(page * limit);
        let start = end.saturating_sub(limit);
        Ok(file.interactions[start..end].to_vec())
    }

    /// Full history, oldest first, as it would be written to disk.
    pub async fn export(
        &self,
        tenant: &str,
        agent: &str,
        conversation_name: &str,
    ) -> Result<Vec<Interaction>, ConversationError> {
        let handle = self.handle(tenant, agent, conversation_name).await?;
        let file = handle.lock().await;
        Ok(file.interactions.clone())
    }

    pub async fn delete_message(
        &self,
        tenant: &str,
        agent: &str,
        conversation_name: &str,
        id: u64,
    ) -> Result<(), ConversationError> {
        let handle = self.handle(tenant, agent, conversation_name).await?;
        let mut file = handle.lock().await;
        let position = file
            .interactions
            .iter()
            .position(|i| i.id == id)
            .ok_or_else(|| ConversationError::NotFound {
                conversation: conversation_name.to_string(),
                id,
            })?;
        file.interactions.remove(position);
        file.rewrite()
    }

    pub async fn update_message(
        &self,
        tenant: &str,
        agent: &str,
        conversation_name: &str,
        id: u64,
        new_text: &str,
    ) -> Result<(), ConversationError> {
        let handle = self.handle(tenant, agent, conversation_name).await?;
        let mut file = handle.lock().await;
        let interaction = file
            .interactions
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| ConversationError::NotFound {
                conversation: conversation_name.to_string(),
                id,
            })?;
        interaction.message = new_text.to_string();
        file.rewrite()
    }

    pub async fn delete_conversation(
        &self,
        tenant: &str,
        agent: &str,
        conversation_name: &str,
    ) -> Result<(), ConversationError> {
        let key = scope_key(tenant, agent, conversation_name);
        let mut open = self.open.write().await;
        open.remove(&key);
        let path = scope_path(&self.root, tenant, agent, conversation_name);
        if path.exists() {
            fs::remove_file(&path).map_err(|e| ConversationError::StorageError(e.to_string()))?;
        }
        Ok(())
    }

    pub async fn rename(
        &self,
        tenant: &str,
        agent: &str,
        conversation_name: &str,
        new_name: &str,
    ) -> Result<(), ConversationError> {
        let new_path = scope_path(&self.root, tenant, agent, new_name);
        if new_path.exists() {
            return Err(ConversationError::Conflict(new_name.to_string()));
        }

        let key = scope_key(tenant, agent, conversation_name);
        let mut open = self.open.write().await;
        let handle = open
            .remove(&key)
            .ok_or_else(|| ConversationError::NotFound {
                conversation: conversation_name.to_string(),
                id: 0,
            })?;

        {
            let mut file = handle.lock().await;
            if let Some(parent) = new_path.parent() {
                fs::create_dir_all(parent).map_err(|e| ConversationError::StorageError(e.to_string()))?;
            }
            fs::rename(&file.path, &new_path).map_err(|e| ConversationError::StorageError(e.to_string()))?;
            file.path = new_path;
        }

        let new_key = scope_key(tenant, agent, new_name);
        open.insert(new_key, handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn append_assigns_increasing_ids_and_persists() {
        let dir = tempdir().unwrap();
        let store = ConversationStore::new(dir.path());

        let first = store.append("t1", "a1", "main", "user", "hi", false).await.unwrap();
        let second = store.append("t1", "a1", "main", "assistant", "hello", false).await.unwrap();

        assert_eq!(first.id, 0);
        assert_eq!(second.id, 1);

        let exported = store.export("t1", "a1", "main").await.unwrap();
        assert_eq!(exported.len(), 2);
    }

    #[tokio::test]
    async fn reopening_the_same_scope_loads_prior_history() {
        let dir = tempdir().unwrap();
        let store = ConversationStore::new(dir.path());
        store.append("t1", "a1", "main", "user", "hi", false).await.unwrap();
        drop(store);

        let reopened = ConversationStore::new(dir.path());
        let exported = reopened.export("t1", "a1", "main").await.unwrap();
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].message, "hi");
    }

    #[tokio::test]
    async fn update_message_rewrites_in_place() {
        let dir = tempdir().unwrap();
        let store = ConversationStore::new(dir.path());
        let interaction = store.append("t1", "a1", "main", "user", "hi", false).await.unwrap();

        store
            .update_message("t1", "a1", "main", interaction.id, "edited")
            .await
            .unwrap();

        let exported = store.export("t1", "a1", "main").await.unwrap();
        assert_eq!(exported[0].message, "edited");
    }

    #[tokio::test]
    async fn delete_message_removes_the_entry() {
        let dir = tempdir().unwrap();
        let store = ConversationStore::new(dir.path());
        let a = store.append("t1", "a1", "main", "user", "hi", false).await.unwrap();
        store.append("t1", "a1", "main", "assistant", "hello", false).await.unwrap();

        store.delete_message("t1", "a1", "main", a.id).await.unwrap();

        let exported = store.export("t1", "a1", "main").await.unwrap();
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].message, "hello");
    }

    #[tokio::test]
    async fn delete_message_unknown_id_is_not_found() {
        let dir = tempdir().unwrap();
        let store = ConversationStore::new(dir.path());
        store.append("t1", "a1", "main", "user", "hi", false).await.unwrap();

        let err = store.delete_message("t1", "a1", "main", 999).await.unwrap_err();
        assert!(matches!(err, ConversationError::NotFound { .. }));
    }

    #[tokio::test]
    async fn rename_moves_the_backing_file_and_conflicts_when_taken() {
        let dir = tempdir().unwrap();
        let store = ConversationStore::new(dir.path());
        store.append("t1", "a1", "old", "user", "hi", false).await.unwrap();
        store.append("t1", "a1", "taken", "user", "hi", false).await.unwrap();

        store.rename("t1", "a1", "old", "new").await.unwrap();
        let exported = store.export("t1", "a1", "new").await.unwrap();
        assert_eq!(exported.len(), 1);

        let err = store.rename("t1", "a1", "new", "taken").await.unwrap_err();
        assert!(matches!(err, ConversationError::Conflict(_)));
    }

    #[tokio::test]
    async fn list_pages_from_the_tail() {
        let dir = tempdir().unwrap();
        let store = ConversationStore::new(dir.path());
        for i in 0..5 {
            store
                .append("t1", "a1", "main", "user", &format!("msg{i}"), false)
                .await
                .unwrap();
        }

        let page0 = store.list("t1", "a1", "main", 2, 0).await.unwrap();
        assert_eq!(page0.iter().map(|i| i.message.clone()).collect::<Vec<_>>(), vec!["msg3", "msg4"]);

        let page1 = store.list("t1", "a1", "main", 2, 1).await.unwrap();
        assert_eq!(page1.iter().map(|i| i.message.clone()).collect::<Vec<_>>(), vec!["msg1", "msg2"]);
    }
}
