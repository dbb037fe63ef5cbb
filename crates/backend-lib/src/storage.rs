// ============================
// crates/backend-lib/src/storage.rs
// ============================
//! Durable messaging storage with a flat-file implementation.
//!
//! Layout under the root:
//! `conversations/<id>/conversation.json` and
//! `conversations/<id>/messages.log` (one JSON message per line).
use std::{fs, path::{Path, PathBuf}, sync::Arc};
use tokio::{fs as tokio_fs, io::AsyncWriteExt, sync::Mutex};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;
use crate::error::AppError;
use stagescout_common::{ChatMessage, Conversation, UserId};

/// Trait for storage backends
#[async_trait]
pub trait Storage: Send + Sync {
    /// Create a conversation between `participants`
    async fn create_conversation(
        &self,
        participants: &[UserId],
    ) -> Result<Conversation, AppError>;

    /// The conversation between `a` and `b`, creating it if there is none.
    /// Returns `true` alongside it when it was created by this call.
    async fn find_or_create_conversation(
        &self,
        a: &str,
        b: &str,
    ) -> Result<(Conversation, bool), AppError>;

    /// Find the conversation that includes both users
    async fn find_conversation_between(
        &self,
        a: &str,
        b: &str,
    ) -> Result<Option<Conversation>, AppError>;

    /// Get a conversation by ID
    async fn get_conversation(&self, id: Uuid) -> Result<Conversation, AppError>;

    /// All conversations `user_id` takes part in, most recently active first
    async fn list_conversations_for(
        &self,
        user_id: &str,
    ) -> Result<Vec<Conversation>, AppError>;

    /// Persist a message
    async fn create_message(
        &self,
        conversation_id: Uuid,
        sender: &str,
        receiver: &str,
        text: &str,
    ) -> Result<ChatMessage, AppError>;

    /// Messages of a conversation in the order they were stored
    async fn list_messages(
        &self,
        conversation_id: Uuid,
    ) -> Result<Vec<ChatMessage>, AppError>;
}

/// Flat-file implementation of the Storage trait.
///
/// Writes to one conversation are serialized through a per-conversation
/// lock; conversation creation goes through a single store-wide lock.
/// Clones share both.
#[derive(Clone, Debug)]
pub struct FlatFileStorage {
    root: PathBuf,
    conversation_locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
    create_lock: Arc<Mutex<()>>,
}

impl FlatFileStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, AppError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("conversations"))?;
        Ok(Self {
            root,
            conversation_locks: Arc::new(DashMap::new()),
            create_lock: Arc::new(Mutex::new(())),
        })
    }

    fn conversation_dir(&self, id: Uuid) -> PathBuf {
        self.root.join("conversations").join(id.to_string())
    }

    fn conversation_lock(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.conversation_locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn write_conversation(&self, conversation: &Conversation) -> Result<(), AppError> {
        let dir = self.conversation_dir(conversation.id);
        tokio_fs::create_dir_all(&dir).await?;

        // Write then rename so readers never see a half-written file
        let tmp = dir.join(format!("conversation.json.{}.tmp", Uuid::new_v4()));
        tokio_fs::write(&tmp, serde_json::to_string_pretty(conversation)?).await?;
        tokio_fs::rename(tmp, dir.join("conversation.json")).await?;
        Ok(())
    }

    async fn read_all_conversations(&self) -> Result<Vec<Conversation>, AppError> {
        let mut conversations = Vec::new();
        let mut dir = tokio_fs::read_dir(self.root.join("conversations")).await?;

        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path().join("conversation.json");
            if !path.exists() {
                continue;
            }
            let content = tokio_fs::read_to_string(&path).await?;
            conversations.push(serde_json::from_str(&content)?);
        }

        Ok(conversations)
    }
}

#[async_trait]
impl Storage for FlatFileStorage {
    async fn find_or_create_conversation(
        &self,
        a: &str,
        b: &str,
    ) -> Result<(Conversation, bool), AppError> {
        let _guard = self.create_lock.lock().await;

        if let Some(existing) = self.find_conversation_between(a, b).await? {
            return Ok((existing, false));
        }
        let created = self
            .create_conversation(&[a.to_string(), b.to_string()])
            .await?;
        Ok((created, true))
    }

    async fn create_conversation(
        &self,
        participants: &[UserId],
    ) -> Result<Conversation, AppError> {
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            participants: participants.to_vec(),
            created_at: now,
            updated_at: now,
        };
        self.write_conversation(&conversation).await?;
        Ok(conversation)
    }

    async fn find_conversation_between(
        &self,
        a: &str,
        b: &str,
    ) -> Result<Option<Conversation>, AppError> {
        Ok(self
            .read_all_conversations()
            .await?
            .into_iter()
            .filter(|c| c.has_participant(a) && c.has_participant(b))
            .min_by_key(|c| c.created_at))
    }

    async fn get_conversation(&self, id: Uuid) -> Result<Conversation, AppError> {
        let path = self.conversation_dir(id).join("conversation.json");

        if !path.exists() {
            return Err(AppError::ConversationNotFound);
        }

        let content = tokio_fs::read_to_string(&path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    async fn list_conversations_for(
        &self,
        user_id: &str,
    ) -> Result<Vec<Conversation>, AppError> {
        let mut conversations: Vec<_> = self
            .read_all_conversations()
            .await?
            .into_iter()
            .filter(|c| c.has_participant(user_id))
            .collect();
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }

    async fn create_message(
        &self,
        conversation_id: Uuid,
        sender: &str,
        receiver: &str,
        text: &str,
    ) -> Result<ChatMessage, AppError> {
        let lock = self.conversation_lock(conversation_id);
        let _guard = lock.lock().await;

        let mut conversation = self.get_conversation(conversation_id).await?;

        let message = ChatMessage {
            id: Uuid::new_v4(),
            conversation_id,
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            text: text.to_string(),
            created_at: Utc::now(),
        };

        let path = self.conversation_dir(conversation_id).join("messages.log");
        let mut file = tokio_fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let mut line = serde_json::to_string(&message)?;
        line.push('\n');
        file.write_all(line.as_bytes()).await?;

        conversation.updated_at = message.created_at;
        self.write_conversation(&conversation).await?;

        Ok(message)
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
    ) -> Result<Vec<ChatMessage>, AppError> {
        let path = self.conversation_dir(conversation_id).join("messages.log");

        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = tokio_fs::read_to_string(&path).await?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(AppError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (FlatFileStorage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = FlatFileStorage::new(temp_dir.path()).unwrap();
        (storage, temp_dir)
    }

    fn pair(a: &str, b: &str) -> Vec<UserId> {
        vec![a.to_string(), b.to_string()]
    }

    #[tokio::test]
    async fn test_create_and_find_conversation() {
        let (storage, _temp_dir) = setup();

        let created = storage.create_conversation(&pair("u1", "u2")).await.unwrap();

        // Participant order does not matter
        let found = storage
            .find_conversation_between("u2", "u1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, created);
        assert!(storage
            .find_conversation_between("u1", "u3")
            .await
            .unwrap()
            .is_none());

        assert_eq!(storage.get_conversation(created.id).await.unwrap(), created);
    }

    #[tokio::test]
    async fn test_get_missing_conversation() {
        let (storage, _temp_dir) = setup();
        assert!(matches!(
            storage.get_conversation(Uuid::new_v4()).await,
            Err(AppError::ConversationNotFound)
        ));
    }

    #[tokio::test]
    async fn test_messages_are_listed_in_order() {
        let (storage, _temp_dir) = setup();
        let conversation = storage.create_conversation(&pair("u1", "u2")).await.unwrap();

        for text in ["one", "two", "three"] {
            storage
                .create_message(conversation.id, "u1", "u2", text)
                .await
                .unwrap();
        }

        let texts: Vec<_> = storage
            .list_messages(conversation.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_message_to_missing_conversation_fails() {
        let (storage, _temp_dir) = setup();
        let result = storage
            .create_message(Uuid::new_v4(), "u1", "u2", "hi")
            .await;
        assert!(matches!(result, Err(AppError::ConversationNotFound)));
    }

    #[tokio::test]
    async fn test_list_conversations_for_user() {
        let (storage, _temp_dir) = setup();
        let a = storage.create_conversation(&pair("u1", "u2")).await.unwrap();
        let b = storage.create_conversation(&pair("u1", "u3")).await.unwrap();
        storage.create_conversation(&pair("u2", "u3")).await.unwrap();

        // Activity moves a conversation to the front
        storage.create_message(a.id, "u2", "u1", "ping").await.unwrap();

        let ids: Vec<_> = storage
            .list_conversations_for("u1")
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![a.id, b.id]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_messages_to_one_conversation() {
        let (storage, _temp_dir) = setup();
        let conversation = storage.create_conversation(&pair("u1", "u2")).await.unwrap();

        let tasks: Vec<_> = (0..100)
            .map(|i| {
                let storage = storage.clone();
                tokio::spawn(async move {
                    storage
                        .create_message(conversation.id, "u1", "u2", &format!("msg {i}"))
                        .await
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().expect("every concurrent write should succeed");
        }

        let messages = storage.list_messages(conversation.id).await.unwrap();
        assert_eq!(messages.len(), 100);

        // The last appended line is also the last metadata write
        let stored = storage.get_conversation(conversation.id).await.unwrap();
        assert_eq!(stored.updated_at, messages[99].created_at);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_find_or_create_yields_one_conversation() {
        let (storage, _temp_dir) = setup();

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let storage = storage.clone();
                tokio::spawn(async move {
                    // Either side may ask first
                    if i % 2 == 0 {
                        storage.find_or_create_conversation("u1", "u2").await
                    } else {
                        storage.find_or_create_conversation("u2", "u1").await
                    }
                })
            })
            .collect();

        let mut created = 0;
        let mut ids = Vec::new();
        for task in tasks {
            let (conversation, was_created) = task.await.unwrap().unwrap();
            created += usize::from(was_created);
            ids.push(conversation.id);
        }

        assert_eq!(created, 1);
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(storage.list_conversations_for("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_messages_survive_reopen() {
        let (storage, temp_dir) = setup();
        let conversation = storage.create_conversation(&pair("u1", "u2")).await.unwrap();
        storage
            .create_message(conversation.id, "u1", "u2", "persisted")
            .await
            .unwrap();

        let reopened = FlatFileStorage::new(temp_dir.path()).unwrap();
        let messages = reopened.list_messages(conversation.id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "persisted");
    }
}
