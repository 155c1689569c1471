use super::store::{FjallQueue, QueueOptions};
use super::{QueueError, Result, WorkQueue};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// QueueRouter maps endpoint names to their queues
///
/// One queue per endpoint keeps a slow or rate-limited upstream from
/// starving the others; consumers scale per queue.
#[derive(Clone, Default)]
pub struct QueueRouter {
    queues: BTreeMap<String, Arc<dyn WorkQueue>>,
}

impl QueueRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open one Fjall-backed queue per endpoint inside a shared keyspace
    pub fn open<P: AsRef<Path>>(
        path: P,
        endpoints: &[String],
        options: QueueOptions,
    ) -> Result<Self> {
        let keyspace = FjallQueue::open_keyspace(path)?;

        let mut router = Self::new();
        for endpoint in endpoints {
            let queue = FjallQueue::open_in(&keyspace, endpoint, options)?;
            router.register(endpoint.clone(), Arc::new(queue));
        }

        info!(queues = router.len(), "Queue router ready");
        Ok(router)
    }

    pub fn register(&mut self, endpoint: impl Into<String>, queue: Arc<dyn WorkQueue>) {
        self.queues.insert(endpoint.into(), queue);
    }

    /// Queue for an endpoint; a missing route is a configuration error
    pub fn route(&self, endpoint: &str) -> Result<Arc<dyn WorkQueue>> {
        self.queues
            .get(endpoint)
            .cloned()
            .ok_or_else(|| QueueError::NoRoute(endpoint.to_string()))
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &str> {
        self.queues.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn WorkQueue>)> {
        self.queues.iter().map(|(name, queue)| (name.as_str(), queue))
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}
