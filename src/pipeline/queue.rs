//! Bounded, closable frame queue
//!
//! Sits between the inbound dispatcher (single producer) and the consumer
//! API (single consumer). A full queue blocks the producer instead of
//! dropping frames; a closed queue stays drainable and then reports
//! end-of-stream.

use futures_util::stream::{BoxStream, Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use tokio::sync::Notify;

use super::clock::SessionClock;
use super::types::MediaKind;
use crate::error::SessionError;

/// Returned by [`FrameQueue::push`] once the queue is closed; hands the frame back.
#[derive(Debug, PartialEq, Eq)]
pub struct QueueClosed<T>(pub T);

struct QueueInner<T> {
    frames: VecDeque<T>,
    closed: bool,
}

/// FIFO of decoded frames of one media kind
pub struct FrameQueue<T> {
    kind: MediaKind,
    capacity: usize,
    inner: Mutex<QueueInner<T>>,
    /// Signalled on push and on close
    not_empty: Notify,
    /// Signalled on pop and on close
    not_full: Notify,
    /// Set while a consumer is reading
    consumer: AtomicBool,
}

impl<T> FrameQueue<T> {
    /// Create a queue holding at most `capacity` frames (at least one)
    pub fn new(kind: MediaKind, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            kind,
            capacity,
            inner: Mutex::new(QueueInner {
                frames: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            consumer: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner<T>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().frames.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Append a frame, waiting while the queue is full.
    ///
    /// Fails only when the queue is (or becomes) closed.
    pub async fn push(&self, frame: T) -> Result<(), QueueClosed<T>> {
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                if inner.closed {
                    return Err(QueueClosed(frame));
                }
                if inner.frames.len() < self.capacity {
                    inner.frames.push_back(frame);
                    drop(inner);
                    self.not_empty.notify_one();
                    return Ok(());
                }
            }

            notified.await;
        }
    }

    /// Take the oldest frame, waiting until one arrives.
    ///
    /// `Ok(None)` is end-of-stream: the queue is closed and empty.
    pub async fn pop(&self) -> Result<Option<T>, SessionError> {
        let _claim = ClaimFlag::acquire(&self.consumer, self.kind)?;
        Ok(self.pop_claimed().await)
    }

    async fn pop_claimed(&self) -> Option<T> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                if let Some(frame) = inner.frames.pop_front() {
                    drop(inner);
                    self.not_full.notify_one();
                    return Some(frame);
                }
                if inner.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark the queue closed and wake everyone waiting on it. Idempotent.
    pub fn close(&self) {
        {
            let mut inner = self.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
        }
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }
}

impl<T: Send + 'static> FrameQueue<T> {
    /// Reserve the queue for a long-lived consumer
    pub fn claim(self: &Arc<Self>) -> Result<ConsumerClaim<T>, SessionError> {
        if self
            .consumer
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SessionError::ConcurrentConsumer(self.kind));
        }
        Ok(ConsumerClaim {
            queue: Arc::clone(self),
        })
    }

    /// Lazy sequence of frames ending when the queue is closed and drained.
    ///
    /// Every yielded frame counts as activity on `activity`.
    pub fn stream(self: &Arc<Self>, activity: SessionClock) -> Result<FrameStream<T>, SessionError> {
        let claim = self.claim()?;
        let inner = futures_util::stream::unfold((claim, activity), |(claim, activity)| async move {
            let frame = claim.pop().await?;
            activity.touch();
            Some((frame, (claim, activity)))
        })
        .fuse()
        .boxed();
        Ok(FrameStream { inner })
    }
}

struct ClaimFlag<'a> {
    flag: &'a AtomicBool,
}

impl<'a> ClaimFlag<'a> {
    fn acquire(flag: &'a AtomicBool, kind: MediaKind) -> Result<Self, SessionError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SessionError::ConcurrentConsumer(kind))?;
        Ok(Self { flag })
    }
}

impl Drop for ClaimFlag<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Exclusive read access to a queue; released on drop
pub struct ConsumerClaim<T> {
    queue: Arc<FrameQueue<T>>,
}

impl<T> ConsumerClaim<T> {
    pub async fn pop(&self) -> Option<T> {
        self.queue.pop_claimed().await
    }
}

impl<T> Drop for ConsumerClaim<T> {
    fn drop(&mut self) {
        self.queue.consumer.store(false, Ordering::Release);
    }
}

/// Frames of one kind in arrival order, finite once the queue closes
pub struct FrameStream<T> {
    inner: BoxStream<'static, T>,
}

impl<T> FrameStream<T> {
    /// Next frame, or `None` at end-of-stream
    pub async fn next_frame(&mut self) -> Option<T> {
        self.inner.next().await
    }
}

impl<T> Stream for FrameStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.inner.poll_next_unpin(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn queue(capacity: usize) -> Arc<FrameQueue<u32>> {
        Arc::new(FrameQueue::new(MediaKind::Video, capacity))
    }

    #[tokio::test]
    async fn test_fifo_for_any_capacity() {
        for capacity in 1..=4 {
            let q = queue(capacity);
            let producer = {
                let q = q.clone();
                tokio::spawn(async move {
                    for i in 0..20 {
                        q.push(i).await.unwrap();
                    }
                    q.close();
                })
            };

            let mut seen = Vec::new();
            while let Some(frame) = q.pop().await.unwrap() {
                seen.push(frame);
            }
            producer.await.unwrap();
            assert_eq!(seen, (0..20).collect::<Vec<_>>(), "capacity {capacity}");
        }
    }

    #[tokio::test]
    async fn test_close_empty_yields_end_of_stream() {
        let q = queue(2);

        let waiting = {
            let q = q.clone();
            tokio::spawn(async move { q.pop().await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        q.close();
        assert_eq!(waiting.await.unwrap(), None);
        assert_eq!(q.pop().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_close_non_empty_drains_first() {
        let q = queue(4);
        q.push(1).await.unwrap();
        q.push(2).await.unwrap();
        q.close();
        q.close();

        assert_eq!(q.pop().await.unwrap(), Some(1));
        assert_eq!(q.pop().await.unwrap(), Some(2));
        assert_eq!(q.pop().await.unwrap(), None);
        assert_eq!(q.push(3).await, Err(QueueClosed(3)));
    }

    #[tokio::test]
    async fn test_full_queue_blocks_producer() {
        let q = queue(3);
        let pushed = Arc::new(AtomicUsize::new(0));

        let producer = {
            let q = q.clone();
            let pushed = pushed.clone();
            tokio::spawn(async move {
                for i in 0..5 {
                    q.push(i).await.unwrap();
                    pushed.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pushed.load(Ordering::SeqCst), 3);
        assert_eq!(q.len(), 3);

        assert_eq!(q.pop().await.unwrap(), Some(0));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pushed.load(Ordering::SeqCst), 4);

        assert_eq!(q.pop().await.unwrap(), Some(1));
        producer.await.unwrap();
        assert_eq!(pushed.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_close_unblocks_producer() {
        let q = queue(1);
        q.push(0).await.unwrap();

        let producer = {
            let q = q.clone();
            tokio::spawn(async move { q.push(1).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        q.close();
        assert_eq!(producer.await.unwrap(), Err(QueueClosed(1)));
        assert_eq!(q.pop().await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_second_consumer_rejected() {
        let q = queue(2);
        let claim = q.claim().unwrap();

        assert!(matches!(
            q.pop().await,
            Err(SessionError::ConcurrentConsumer(MediaKind::Video))
        ));
        assert!(q.claim().is_err());

        drop(claim);
        q.push(7).await.unwrap();
        assert_eq!(q.pop().await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn test_stream_ends_with_queue() {
        let q = queue(8);
        for i in 0..3 {
            q.push(i).await.unwrap();
        }
        q.close();

        let clock = SessionClock::new();
        let mut stream = q.stream(clock).unwrap();
        assert!(q.claim().is_err());

        let frames: Vec<u32> = (&mut stream).collect().await;
        assert_eq!(frames, vec![0, 1, 2]);
        assert_eq!(stream.next_frame().await, None);

        drop(stream);
        assert!(q.claim().is_ok());
    }
}
