//! In-process stores for tests and `STORE_BACKEND=memory`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use intake_core::{Job, JobId, JobStatus, NewRepo, Repo};

use crate::error::StoreError;
use crate::traits::{JobStore, RepoStore};

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<BTreeMap<i64, Job>>,
    unavailable: AtomicBool,
    reject_updates: AtomicBool,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with [`StoreError::Unavailable`] until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail status writes only; reads and creates keep working.
    pub fn set_reject_updates(&self, reject: bool) {
        self.reject_updates.store(reject, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory job store offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(&self, file_path: &str) -> Result<Job, StoreError> {
        self.check()?;
        let mut jobs = self.jobs.write().await;
        let id = jobs.keys().next_back().map_or(1, |last| last + 1);
        let now = Utc::now();
        let job = Job {
            id: JobId(id),
            file_path: file_path.to_string(),
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        jobs.insert(id, job.clone());
        Ok(job)
    }

    async fn update_status(&self, id: JobId, status: JobStatus) -> Result<Job, StoreError> {
        self.check()?;
        if self.reject_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory job store rejected update".into()));
        }
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id.get()).ok_or(StoreError::NotFound(id))?;
        if !job.status.can_advance_to(status) {
            return Err(StoreError::InvalidTransition {
                id,
                from: job.status,
                to: status,
            });
        }
        job.status = status;
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn get_job(&self, id: JobId) -> Result<Job, StoreError> {
        self.check()?;
        self.jobs
            .read()
            .await
            .get(&id.get())
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }
}

#[derive(Default)]
pub struct MemoryRepoStore {
    repos: RwLock<Vec<Repo>>,
    unavailable: AtomicBool,
    /// Fail this many upcoming inserts with [`StoreError::Unavailable`].
    failing_inserts: AtomicUsize,
}

impl MemoryRepoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make only the next `n` inserts fail, leaving reads untouched.
    pub fn fail_next_inserts(&self, n: usize) {
        self.failing_inserts.store(n, Ordering::SeqCst);
    }

    pub async fn all(&self) -> Vec<Repo> {
        self.repos.read().await.clone()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory repo store offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RepoStore for MemoryRepoStore {
    async fn insert(&self, repo: NewRepo) -> Result<Repo, StoreError> {
        self.check()?;
        let failing = self
            .failing_inserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(StoreError::Unavailable("memory repo store rejected insert".into()));
        }

        let mut repos = self.repos.write().await;
        let stored = Repo {
            id: repos.len() as i64 + 1,
            github_id: repo.github_id,
            name: repo.name,
            owner: repo.owner,
            stars: repo.stars,
            processed: false,
            created_at: Utc::now(),
        };
        repos.push(stored.clone());
        Ok(stored)
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Repo>, StoreError> {
        self.check()?;
        let repos = self.repos.read().await;
        Ok(repos
            .iter()
            .rev()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<i64, StoreError> {
        self.check()?;
        Ok(self.repos.read().await.len() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_repo(name: &str, stars: i64) -> NewRepo {
        NewRepo {
            github_id: None,
            name: name.into(),
            owner: "o".into(),
            stars,
        }
    }

    #[tokio::test]
    async fn job_lifecycle() {
        let store = MemoryJobStore::new();
        let a = store.create_job("/up/a.csv").await.unwrap();
        let b = store.create_job("/up/b.csv").await.unwrap();
        assert_eq!(a.status, JobStatus::Pending);
        assert_ne!(a.id, b.id);

        let updated = store.update_status(a.id, JobStatus::Processing).await.unwrap();
        assert_eq!(updated.status, JobStatus::Processing);
        assert_eq!(store.get_job(a.id).await.unwrap().status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn backward_transition_is_rejected() {
        let store = MemoryJobStore::new();
        let job = store.create_job("/x").await.unwrap();

        let err = store.update_status(job.id, JobStatus::Completed).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { from: JobStatus::Pending, .. }));

        store.update_status(job.id, JobStatus::Processing).await.unwrap();
        store.update_status(job.id, JobStatus::Completed).await.unwrap();
        store.update_status(job.id, JobStatus::Completed).await.unwrap();
        assert!(store.update_status(job.id, JobStatus::Processing).await.is_err());
        assert_eq!(store.get_job(job.id).await.unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let store = MemoryJobStore::new();
        let err = store.update_status(JobId(7), JobStatus::Completed).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(JobId(7))));
        assert!(matches!(store.get_job(JobId(7)).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn unavailable_toggle() {
        let store = MemoryJobStore::new();
        store.set_unavailable(true);
        assert!(store.create_job("/x").await.unwrap_err().is_unavailable());
        store.set_unavailable(false);
        assert!(store.create_job("/x").await.is_ok());
    }

    #[tokio::test]
    async fn repos_list_newest_first_with_paging() {
        let store = MemoryRepoStore::new();
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            store.insert(new_repo(name, i as i64)).await.unwrap();
        }

        let page: Vec<String> = store.list(2, 0).await.unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(page, vec!["c", "b"]);
        let rest = store.list(2, 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn failing_inserts_are_bounded() {
        let store = MemoryRepoStore::new();
        store.fail_next_inserts(1);
        assert!(store.insert(new_repo("a", 1)).await.unwrap_err().is_unavailable());
        assert!(store.insert(new_repo("b", 1)).await.is_ok());
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
