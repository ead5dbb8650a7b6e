//! In-memory progress store
//!
//! Learners live in a sorted map. Transient and permanent failures can be
//! queued per learner and per operation so batch behaviour can be exercised
//! without a network.

use super::{encode_progress, LearnerPage, ProgressStore, StoreError};
use async_trait::async_trait;
use hhl_common::progress::ProgressState;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Op {
    Read,
    Write,
}

#[derive(Debug, Default)]
struct Inner {
    learners: BTreeMap<String, Option<String>>,
    transient: HashMap<(Op, String), u32>,
    permanent: HashSet<(Op, String)>,
    page_failures: u32,
    writes: Vec<String>,
}

#[derive(Debug, Default)]
pub struct MemoryProgressStore {
    inner: Mutex<Inner>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a learner with a raw progress document
    pub fn insert(&self, learner_id: &str, raw: Option<&str>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner
                .learners
                .insert(learner_id.to_string(), raw.map(str::to_string));
        }
    }

    /// Builder form of `insert`
    pub fn with_learner(self, learner_id: &str, raw: Option<&str>) -> Self {
        self.insert(learner_id, raw);
        self
    }

    /// The next `times` reads of `learner_id` fail transiently
    pub fn fail_reads(&self, learner_id: &str, times: u32) {
        self.queue_transient(Op::Read, learner_id, times);
    }

    /// The next `times` writes of `learner_id` fail transiently
    pub fn fail_writes(&self, learner_id: &str, times: u32) {
        self.queue_transient(Op::Write, learner_id, times);
    }

    /// Every write of `learner_id` is rejected
    pub fn reject_writes(&self, learner_id: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.permanent.insert((Op::Write, learner_id.to_string()));
        }
    }

    /// The next `times` page fetches fail transiently
    pub fn fail_pages(&self, times: u32) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.page_failures = times;
        }
    }

    /// Current raw document for a learner
    pub fn raw_progress(&self, learner_id: &str) -> Option<String> {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| inner.learners.get(learner_id).cloned().flatten())
    }

    /// Learners written so far, in write order
    pub fn writes(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|inner| inner.writes.clone())
            .unwrap_or_default()
    }

    fn queue_transient(&self, op: Op, learner_id: &str, times: u32) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.transient.insert((op, learner_id.to_string()), times);
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Permanent("memory store lock poisoned".to_string()))
    }
}

impl Inner {
    fn injected_failure(&mut self, op: Op, learner_id: &str) -> Option<StoreError> {
        let key = (op, learner_id.to_string());
        if self.permanent.contains(&key) {
            return Some(StoreError::Permanent(format!("{:?} rejected for {}", op, learner_id)));
        }
        match self.transient.get_mut(&key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Some(StoreError::Transient(format!("{:?} unavailable for {}", op, learner_id)))
            }
            _ => None,
        }
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn list_learners(
        &self,
        limit: usize,
        after: Option<&str>,
    ) -> Result<LearnerPage, StoreError> {
        let mut inner = self.lock()?;
        if inner.page_failures > 0 {
            inner.page_failures -= 1;
            return Err(StoreError::Transient("page fetch unavailable".to_string()));
        }

        let limit = limit.max(1);
        let mut remaining = inner
            .learners
            .keys()
            .filter(|id| after.map_or(true, |a| id.as_str() > a));
        let ids: Vec<String> = remaining.by_ref().take(limit).cloned().collect();
        let next_after = match remaining.next() {
            Some(_) => ids.last().cloned(),
            None => None,
        };
        Ok(LearnerPage { ids, next_after })
    }

    async fn read_progress(&self, learner_id: &str) -> Result<Option<String>, StoreError> {
        let mut inner = self.lock()?;
        if let Some(err) = inner.injected_failure(Op::Read, learner_id) {
            return Err(err);
        }
        match inner.learners.get(learner_id) {
            Some(raw) => Ok(raw.clone()),
            None => Err(StoreError::NotFound(format!("learner {}", learner_id))),
        }
    }

    async fn write_progress(
        &self,
        learner_id: &str,
        state: &ProgressState,
    ) -> Result<(), StoreError> {
        let raw = encode_progress(state)?;
        let mut inner = self.lock()?;
        if let Some(err) = inner.injected_failure(Op::Write, learner_id) {
            return Err(err);
        }
        match inner.learners.get_mut(learner_id) {
            Some(slot) => {
                *slot = Some(raw);
                inner.writes.push(learner_id.to_string());
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("learner {}", learner_id))),
        }
    }
}
