//! In-memory progress stores, catalogs, and a recording user directory.

use questline_core::progress::{ProgressRecord, ProgressStatus};
use questline_core::store::{
    AchievementCatalog, GrantError, ProgressStore, QuestCatalog, StoreError, UserDirectory,
};
use questline_core::target::{Achievement, AchievementId, Quest, QuestId, UserId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

fn lock_store_err<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex
        .lock()
        .map_err(|_| StoreError::Database("store lock poisoned".to_string()))
}

/// In-memory [`ProgressStore`] with real revision-checked upserts.
///
/// Works for both record shapes; concurrency behaves like the Postgres
/// store, so optimistic-retry paths can be exercised without a database.
pub struct InMemoryProgressStore<R: ProgressRecord> {
    records: Arc<Mutex<HashMap<(UserId, R::TargetId), R>>>,
}

impl<R: ProgressRecord> InMemoryProgressStore<R> {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Snapshot of every record, for assertions.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Test double: mutex poisoning is a test failure
    pub fn records(&self) -> Vec<R> {
        self.records.lock().unwrap().values().cloned().collect()
    }

    /// Seed a record directly, bypassing revision checks.
    #[allow(clippy::unwrap_used)] // Test double: mutex poisoning is a test failure
    pub fn seed(&self, record: R) {
        let key = (record.user_id().clone(), record.target_id().clone());
        self.records.lock().unwrap().insert(key, record);
    }
}

impl<R: ProgressRecord> Default for InMemoryProgressStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: ProgressRecord> Clone for InMemoryProgressStore<R> {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
        }
    }
}

#[async_trait::async_trait]
impl<R: ProgressRecord> ProgressStore<R> for InMemoryProgressStore<R> {
    async fn find(
        &self,
        user_id: &UserId,
        target_id: &R::TargetId,
    ) -> Result<Option<R>, StoreError> {
        let records = lock_store_err(&self.records)?;
        Ok(records
            .get(&(user_id.clone(), target_id.clone()))
            .cloned())
    }

    async fn upsert(&self, record: R) -> Result<R, StoreError> {
        let mut records = lock_store_err(&self.records)?;
        let key = (record.user_id().clone(), record.target_id().clone());

        match records.get(&key) {
            None => {
                if record.revision() != 0 {
                    return Err(StoreError::RevisionConflict {
                        expected: record.revision(),
                        actual: 0,
                    });
                }
            }
            Some(existing) => {
                if record.revision() == 0 {
                    return Err(StoreError::Duplicate {
                        user_id: record.user_id().to_string(),
                        target_id: record.target_id().to_string(),
                    });
                }
                if existing.revision() != record.revision() {
                    return Err(StoreError::RevisionConflict {
                        expected: record.revision(),
                        actual: existing.revision(),
                    });
                }
            }
        }

        let stored = record.clone().with_revision(record.revision() + 1);
        records.insert(key, stored.clone());
        Ok(stored)
    }

    async fn find_by_user(
        &self,
        user_id: &UserId,
        status: Option<ProgressStatus>,
    ) -> Result<Vec<R>, StoreError> {
        let records = lock_store_err(&self.records)?;
        let mut found: Vec<R> = records
            .values()
            .filter(|r| r.user_id() == user_id)
            .filter(|r| status.is_none_or(|s| r.status() == s))
            .cloned()
            .collect();
        found.sort_by_key(|r| r.target_id().to_string());
        Ok(found)
    }
}

/// In-memory [`AchievementCatalog`].
#[derive(Clone, Default)]
pub struct InMemoryAchievementCatalog {
    definitions: Arc<Mutex<HashMap<AchievementId, Achievement>>>,
}

impl InMemoryAchievementCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a definition.
    #[allow(clippy::unwrap_used)] // Test double: mutex poisoning is a test failure
    pub fn insert(&self, definition: Achievement) {
        self.definitions
            .lock()
            .unwrap()
            .insert(definition.id.clone(), definition);
    }
}

#[async_trait::async_trait]
impl AchievementCatalog for InMemoryAchievementCatalog {
    async fn find(&self, id: &AchievementId) -> Result<Option<Achievement>, StoreError> {
        let definitions = lock_store_err(&self.definitions)?;
        Ok(definitions.get(id).cloned())
    }
}

/// In-memory [`QuestCatalog`].
#[derive(Clone, Default)]
pub struct InMemoryQuestCatalog {
    definitions: Arc<Mutex<HashMap<QuestId, Quest>>>,
}

impl InMemoryQuestCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a definition.
    #[allow(clippy::unwrap_used)] // Test double: mutex poisoning is a test failure
    pub fn insert(&self, definition: Quest) {
        self.definitions
            .lock()
            .unwrap()
            .insert(definition.id.clone(), definition);
    }
}

#[async_trait::async_trait]
impl QuestCatalog for InMemoryQuestCatalog {
    async fn find(&self, id: &QuestId) -> Result<Option<Quest>, StoreError> {
        let definitions = lock_store_err(&self.definitions)?;
        Ok(definitions.get(id).cloned())
    }

    async fn all(&self) -> Result<Vec<Quest>, StoreError> {
        let definitions = lock_store_err(&self.definitions)?;
        let mut quests: Vec<Quest> = definitions.values().cloned().collect();
        quests.sort_by_key(|q| q.id.as_str().to_string());
        Ok(quests)
    }
}

/// One recorded grant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Grant {
    /// Points credited to a user.
    Points {
        /// The credited user.
        user_id: UserId,
        /// The credited amount.
        amount: u32,
    },
    /// Experience credited to a user.
    Experience {
        /// The credited user.
        user_id: UserId,
        /// The credited amount.
        amount: u32,
    },
}

#[derive(Default)]
struct DirectoryState {
    grants: Vec<Grant>,
    failure: Option<GrantError>,
}

/// [`UserDirectory`] that records every grant, for idempotence assertions.
#[derive(Clone, Default)]
pub struct RecordingUserDirectory {
    state: Arc<Mutex<DirectoryState>>,
}

impl RecordingUserDirectory {
    /// Create a directory that accepts every grant.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every grant in call order, for assertions.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Test double: mutex poisoning is a test failure
    pub fn grants(&self) -> Vec<Grant> {
        self.state.lock().unwrap().grants.clone()
    }

    /// While set, every grant fails with a clone of the given error.
    #[allow(clippy::unwrap_used)] // Test double: mutex poisoning is a test failure
    pub fn set_failure(&self, failure: Option<GrantError>) {
        self.state.lock().unwrap().failure = failure;
    }
}

#[async_trait::async_trait]
impl UserDirectory for RecordingUserDirectory {
    async fn grant_points(&self, user_id: &UserId, amount: u32) -> Result<(), GrantError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| GrantError::Failed("directory lock poisoned".to_string()))?;
        if let Some(failure) = &state.failure {
            return Err(failure.clone());
        }
        state.grants.push(Grant::Points {
            user_id: user_id.clone(),
            amount,
        });
        Ok(())
    }

    async fn grant_experience(&self, user_id: &UserId, amount: u32) -> Result<(), GrantError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| GrantError::Failed("directory lock poisoned".to_string()))?;
        if let Some(failure) = &state.failure {
            return Err(failure.clone());
        }
        state.grants.push(Grant::Experience {
            user_id: user_id.clone(),
            amount,
        });
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use questline_core::progress::AchievementProgress;

    fn record(user: &str, target: &str) -> AchievementProgress {
        AchievementProgress::new(UserId::new(user), AchievementId::new(target))
    }

    #[tokio::test]
    async fn upsert_bumps_revision_and_checks_it() {
        let store = InMemoryProgressStore::<AchievementProgress>::new();

        let stored = store.upsert(record("u1", "a1")).await.unwrap();
        assert_eq!(stored.revision, 1);

        // Writing the same revision again succeeds once...
        let again = store.upsert(stored.clone()).await.unwrap();
        assert_eq!(again.revision, 2);

        // ...but the stale copy now conflicts.
        let err = store.upsert(stored).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::RevisionConflict {
                expected: 1,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn zero_revision_insert_races_report_duplicate() {
        let store = InMemoryProgressStore::<AchievementProgress>::new();
        store.upsert(record("u1", "a1")).await.unwrap();

        let err = store.upsert(record("u1", "a1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn find_by_user_filters_by_status() {
        let store = InMemoryProgressStore::<AchievementProgress>::new();
        store.upsert(record("u1", "a1")).await.unwrap();
        let mut completed = record("u1", "a2");
        completed.status = ProgressStatus::Completed;
        store.upsert(completed).await.unwrap();
        store.upsert(record("u2", "a1")).await.unwrap();

        let all = store.find_by_user(&UserId::new("u1"), None).await.unwrap();
        assert_eq!(all.len(), 2);

        let done = store
            .find_by_user(&UserId::new("u1"), Some(ProgressStatus::Completed))
            .await
            .unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].achievement_id, AchievementId::new("a2"));
    }

    #[tokio::test]
    async fn directory_records_and_fails_on_demand() {
        let directory = RecordingUserDirectory::new();
        let user = UserId::new("u1");

        directory.grant_points(&user, 10).await.unwrap();
        directory.grant_experience(&user, 5).await.unwrap();
        assert_eq!(
            directory.grants(),
            vec![
                Grant::Points {
                    user_id: user.clone(),
                    amount: 10
                },
                Grant::Experience {
                    user_id: user.clone(),
                    amount: 5
                },
            ]
        );

        directory.set_failure(Some(GrantError::UserNotFound("u1".to_string())));
        assert!(matches!(
            directory.grant_points(&user, 1).await,
            Err(GrantError::UserNotFound(_))
        ));
        assert_eq!(directory.grants().len(), 2);
    }
}
