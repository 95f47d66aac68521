use core::num::NonZeroUsize;
use std::{collections::VecDeque, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::head::Head;

/// Bounded queue of new heads consumed by DAG finalization.
///
/// A full queue drops its oldest entry. Pushing the head that is already newest is a no-op.
pub struct HeadFeed {
    queue: Mutex<VecDeque<Arc<Head>>>,
    capacity: NonZeroUsize,
    notify: Notify,
}

impl HeadFeed {
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.get())),
            capacity,
            notify: Notify::new(),
        }
    }

    pub fn push(&self, head: Arc<Head>) {
        {
            let mut queue = self.queue.lock();

            if queue.back().is_some_and(|newest| newest.root == head.root) {
                return;
            }

            if queue.len() >= self.capacity.get() {
                queue.pop_front();
            }

            queue.push_back(head);
        }

        self.notify.notify_one();
    }

    pub async fn next(&self) -> Arc<Head> {
        loop {
            if let Some(head) = self.queue.lock().pop_front() {
                return head;
            }

            self.notify.notified().await;
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use nonzero_ext::nonzero;
    use types::primitives::H256;

    use super::*;

    fn head(byte: u8) -> Arc<Head> {
        Arc::new(Head {
            slot: byte.into(),
            root: H256::repeat_byte(byte),
            block: Arc::default(),
            state: Arc::default(),
        })
    }

    #[test]
    fn repeated_head_is_queued_once() {
        let feed = HeadFeed::new(nonzero!(4_usize));

        feed.push(head(1));
        feed.push(head(1));

        assert_eq!(feed.len(), 1);
    }

    #[tokio::test]
    async fn full_feed_drops_oldest() {
        let feed = HeadFeed::new(nonzero!(2_usize));

        feed.push(head(1));
        feed.push(head(2));
        feed.push(head(3));

        assert_eq!(feed.len(), 2);
        assert_eq!(feed.next().await.root, H256::repeat_byte(2));
        assert_eq!(feed.next().await.root, H256::repeat_byte(3));
        assert!(feed.is_empty());
    }

    #[tokio::test]
    async fn next_waits_for_push() {
        let feed = Arc::new(HeadFeed::new(nonzero!(2_usize)));

        let consumer = {
            let feed = Arc::clone(&feed);
            tokio::spawn(async move { feed.next().await.root })
        };

        tokio::task::yield_now().await;
        feed.push(head(7));

        assert_eq!(consumer.await.ok(), Some(H256::repeat_byte(7)));
    }
}
