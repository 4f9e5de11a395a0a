//! Cancellation tokens for scans in flight.
//!
//! At most one scan job exists per root; the manager is keyed by root id so
//! removing a root can cancel its scan without knowing the job id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Unique identifier for a job.
pub type JobId = u64;

/// Token for checking and signaling job cancellation.
///
/// Clone this token to share cancellation state across threads.
#[derive(Debug, Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    job_id: JobId,
}

impl CancelToken {
    pub fn new(job_id: JobId) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            job_id,
        }
    }

    /// Token that is never cancelled by anyone else.
    pub fn detached() -> Self {
        Self::new(0)
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }
}

/// Tracks the cancel token of the running scan for each root.
#[derive(Debug, Default)]
pub struct JobManager {
    next_id: AtomicU64,
    jobs: RwLock<HashMap<i64, CancelToken>>,
}

impl JobManager {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Register a scan job for `root_id` and return its cancel token.
    ///
    /// A stale token left for the same root is cancelled and replaced.
    pub fn start_job(&self, root_id: i64) -> CancelToken {
        let job_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancelToken::new(job_id);

        if let Ok(mut jobs) = self.jobs.write() {
            if let Some(previous) = jobs.insert(root_id, token.clone()) {
                previous.cancel();
            }
        }

        token
    }

    /// Cancel the scan running for `root_id`.
    ///
    /// Returns true if a job was found and cancelled.
    pub fn cancel_root(&self, root_id: i64) -> bool {
        if let Ok(jobs) = self.jobs.read() {
            if let Some(token) = jobs.get(&root_id) {
                token.cancel();
                return true;
            }
        }
        false
    }

    /// Cancel all running jobs.
    pub fn cancel_all(&self) {
        if let Ok(jobs) = self.jobs.read() {
            for token in jobs.values() {
                token.cancel();
            }
        }
    }

    /// Stop tracking a finished job. A newer job for the same root is kept.
    pub fn complete_job(&self, root_id: i64, job_id: JobId) {
        if let Ok(mut jobs) = self.jobs.write() {
            if jobs.get(&root_id).map(|t| t.job_id()) == Some(job_id) {
                jobs.remove(&root_id);
            }
        }
    }

    pub fn active_job_count(&self) -> usize {
        self.jobs.read().map(|j| j.len()).unwrap_or(0)
    }

    pub fn is_job_active(&self, root_id: i64) -> bool {
        self.jobs
            .read()
            .map(|j| j.contains_key(&root_id))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_clone() {
        let token1 = CancelToken::new(1);
        let token2 = token1.clone();

        token1.cancel();

        assert!(token1.is_cancelled());
        assert!(token2.is_cancelled());
    }

    #[test]
    fn test_job_manager_per_root() {
        let manager = JobManager::new();

        let a = manager.start_job(10);
        let b = manager.start_job(20);
        assert_eq!(manager.active_job_count(), 2);

        assert!(manager.cancel_root(10));
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
        assert!(!manager.cancel_root(99));

        manager.complete_job(10, a.job_id());
        assert!(!manager.is_job_active(10));
        assert!(manager.is_job_active(20));
    }

    #[test]
    fn test_stale_completion_keeps_newer_job() {
        let manager = JobManager::new();
        let old = manager.start_job(1);
        let new = manager.start_job(1);

        assert!(old.is_cancelled());
        manager.complete_job(1, old.job_id());
        assert!(manager.is_job_active(1));

        manager.complete_job(1, new.job_id());
        assert!(!manager.is_job_active(1));
    }

    #[test]
    fn test_cancel_all() {
        let manager = JobManager::new();
        let t1 = manager.start_job(1);
        let t2 = manager.start_job(2);

        manager.cancel_all();

        assert!(t1.is_cancelled());
        assert!(t2.is_cancelled());
    }
}
