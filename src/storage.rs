//! Persistence for per-user collections.
//!
//! Everything is stored as JSON text in a [`KeyValueStore`]. Habit and task
//! collections go through [`Repository`], keyed by [`UserId`]; accounts live
//! under a single `users` key in [`AccountStore`].

use crate::models::{Habit, Task, UserId, UserRecord};
use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use std::{
    collections::HashMap,
    env,
    marker::PhantomData,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{fs, sync::Mutex};
use tracing::{debug, error};

const USERS_KEY: &str = "users";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn resolve_data_path() -> PathBuf {
    env::var("APP_DATA_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data"))
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// One `<key>.json` file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)).await {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        fs::write(self.path_for(key), value).await?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Reads a JSON document. Missing keys and unparsable documents both yield
/// the default value; the latter is logged.
async fn load_json<T>(store: &dyn KeyValueStore, key: &str) -> Result<T, StorageError>
where
    T: DeserializeOwned + Default,
{
    let Some(text) = store.get(key).await? else {
        return Ok(T::default());
    };
    match serde_json::from_str(&text) {
        Ok(value) => Ok(value),
        Err(err) => {
            error!("failed to parse stored {key}: {err}");
            Ok(T::default())
        }
    }
}

async fn persist_json<T>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<(), StorageError>
where
    T: Serialize + ?Sized,
{
    let payload = serde_json::to_string_pretty(value)?;
    store.set(key, &payload).await?;
    debug!("persisted {key}");
    Ok(())
}

/// A collection type stored once per user under `<namespace>_<user id>`.
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    const NAMESPACE: &'static str;
}

impl Record for Habit {
    const NAMESPACE: &'static str = "habits";
}

impl Record for Task {
    const NAMESPACE: &'static str = "tasks";
}

#[async_trait]
pub trait Repository<T: Record>: Send + Sync {
    async fn load(&self, user: &UserId) -> Result<Vec<T>, StorageError>;
    async fn save(&self, user: &UserId, items: &[T]) -> Result<(), StorageError>;
}

pub struct KvRepository<T> {
    store: Arc<dyn KeyValueStore>,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> KvRepository<T> {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            _record: PhantomData,
        }
    }

    fn key(user: &UserId) -> String {
        format!("{}_{}", T::NAMESPACE, user)
    }
}

#[async_trait]
impl<T: Record> Repository<T> for KvRepository<T> {
    async fn load(&self, user: &UserId) -> Result<Vec<T>, StorageError> {
        load_json(self.store.as_ref(), &Self::key(user)).await
    }

    async fn save(&self, user: &UserId, items: &[T]) -> Result<(), StorageError> {
        persist_json(self.store.as_ref(), &Self::key(user), items).await
    }
}

pub struct AccountStore {
    store: Arc<dyn KeyValueStore>,
}

impl AccountStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn load(&self) -> Result<Vec<UserRecord>, StorageError> {
        load_json(self.store.as_ref(), USERS_KEY).await
    }

    pub async fn save(&self, accounts: &[UserRecord]) -> Result<(), StorageError> {
        persist_json(self.store.as_ref(), USERS_KEY, accounts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn habit(id: &str) -> Habit {
        Habit {
            id: id.to_string(),
            title: format!("habit {id}"),
            description: String::new(),
            color: "#6366f1".into(),
            completed_dates: Default::default(),
            streak: 0,
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn unique_dir() -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let mut path = env::temp_dir();
        path.push(format!("habitflow_storage_{}_{}", std::process::id(), nanos));
        path
    }

    #[tokio::test]
    async fn collections_are_namespaced_per_user() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::default());
        let habits = KvRepository::<Habit>::new(store.clone());
        let alice = UserId::parse("alice").unwrap();
        let bob = UserId::parse("bob").unwrap();

        habits.save(&alice, &[habit("1"), habit("2")]).await.unwrap();

        assert_eq!(habits.load(&alice).await.unwrap().len(), 2);
        assert!(habits.load(&bob).await.unwrap().is_empty());
        assert!(store.get("habits_alice").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn corrupt_documents_load_as_empty() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::default());
        store.set("tasks_alice", "{not json").await.unwrap();
        let tasks = KvRepository::<Task>::new(store);
        let loaded = tasks.load(&UserId::parse("alice").unwrap()).await.unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn file_store_round_trips_through_disk() {
        let dir = unique_dir();
        let store = FileStore::open(&dir).await.unwrap();
        assert_eq!(store.get("users").await.unwrap(), None);

        store.set("users", "[]").await.unwrap();
        assert_eq!(store.get("users").await.unwrap().as_deref(), Some("[]"));
        assert!(dir.join("users.json").exists());

        let _ = std::fs::remove_dir_all(dir);
    }
}
