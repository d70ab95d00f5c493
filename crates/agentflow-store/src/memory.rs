//! In-memory repository.
//!
//! DashMap-backed implementation of [`Repository`].  This is the
//! implementation the runtime's test suites collaborate with; production
//! deployments supply their own backend behind the same trait.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::Result;
use crate::records::Entity;

/// Key-value style access to one record type.
#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    /// Fetch a record by id.
    async fn find_by_id(&self, id: &str) -> Result<Option<T>>;

    /// Fetch every record.
    async fn find_all(&self) -> Result<Vec<T>>;

    /// Insert or overwrite a record under its id.
    async fn save(&self, entity: T) -> Result<()>;

    /// Remove a record; returns whether it existed.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Whether a record exists.
    async fn exists(&self, id: &str) -> Result<bool>;
}

/// Concurrent in-memory repository backed by [`DashMap`].
pub struct MemoryRepository<T> {
    items: DashMap<String, T>,
}

impl<T: Entity> MemoryRepository<T> {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: DashMap::new(),
        }
    }

    /// The number of stored records.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the repository is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: Entity> Default for MemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for MemoryRepository<T> {
    async fn find_by_id(&self, id: &str) -> Result<Option<T>> {
        Ok(self.items.get(id).map(|entry| entry.value().clone()))
    }

    async fn find_all(&self) -> Result<Vec<T>> {
        Ok(self.items.iter().map(|entry| entry.value().clone()).collect())
    }

    async fn save(&self, entity: T) -> Result<()> {
        tracing::trace!(id = %entity.id(), "record saved");
        self.items.insert(entity.id().to_owned(), entity);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.items.remove(id).is_some())
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.items.contains_key(id))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
