use crate::candidate::ImportCandidate;
use std::sync::Arc;
use tokio::sync::RwLock;

/// The currently known list of import candidates.
///
/// Readers get an immutable snapshot; writers replace the whole list at once,
/// so nobody ever sees a half-updated list.
#[derive(Clone, Default)]
pub struct CandidateStore {
    inner: Arc<RwLock<Arc<Vec<ImportCandidate>>>>,
}

impl CandidateStore {
    pub async fn snapshot(&self) -> Arc<Vec<ImportCandidate>> {
        Arc::clone(&*self.inner.read().await)
    }

    /// Swap in a new list, returning the old one.
    pub async fn replace(&self, candidates: Vec<ImportCandidate>) -> Arc<Vec<ImportCandidate>> {
        let mut guard = self.inner.write().await;
        std::mem::replace(&mut *guard, Arc::new(candidates))
    }

    /// Change the list in place. Existing snapshots keep the old contents.
    pub async fn update<F>(&self, change: F)
    where
        F: FnOnce(&mut Vec<ImportCandidate>),
    {
        let mut guard = self.inner.write().await;
        change(Arc::make_mut(&mut *guard));
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}
