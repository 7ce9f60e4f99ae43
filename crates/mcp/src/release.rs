//! Ordered teardown of the resources behind a session.

use std::future::Future;

use {futures::future::BoxFuture, tracing::debug};

type ReleaseFn = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Resources are released in the reverse of the order they were pushed, so
/// a protocol session is closed before the process or socket beneath it.
#[derive(Default)]
pub struct ReleaseList {
    entries: Vec<(&'static str, ReleaseFn)>,
}

impl ReleaseList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<F, Fut>(&mut self, label: &'static str, release: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.entries
            .push((label, Box::new(move || Box::pin(release()))));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn labels(&self) -> Vec<&'static str> {
        self.entries.iter().map(|(label, _)| *label).collect()
    }

    pub async fn release(mut self) {
        while let Some((label, release)) = self.entries.pop() {
            debug!(resource = label, "releasing");
            release().await;
        }
    }
}

impl std::fmt::Debug for ReleaseList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseList")
            .field("entries", &self.labels())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        std::sync::{Arc, Mutex},
    };

    #[tokio::test]
    async fn releases_in_reverse_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut list = ReleaseList::new();
        for label in ["process", "client"] {
            let order = Arc::clone(&order);
            list.push(label, move || async move {
                order.lock().unwrap().push(label);
            });
        }
        assert_eq!(list.labels(), vec!["process", "client"]);

        list.release().await;
        assert_eq!(*order.lock().unwrap(), vec!["client", "process"]);
    }

    #[tokio::test]
    async fn empty_list_releases_nothing() {
        let list = ReleaseList::new();
        assert!(list.is_empty());
        list.release().await;
    }
}
