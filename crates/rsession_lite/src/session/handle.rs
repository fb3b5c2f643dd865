use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::error::DispatchError;

/// Which peer opened a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Opened by this peer.
    Outbound,
    /// Opened by the remote peer.
    Inbound,
}

/// Identifies one logical stream multiplexed on a session.
///
/// Clones share cancellation state.
#[derive(Clone)]
pub struct StreamHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    stream_id: u32,
    route: String,
    direction: Direction,
    token: CancellationToken,
    cancelled: AtomicBool,
}

impl StreamHandle {
    pub(crate) fn new(
        stream_id: u32,
        route: impl Into<String>,
        direction: Direction,
        token: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                stream_id,
                route: route.into(),
                direction,
                token,
                cancelled: AtomicBool::new(false),
            }),
        }
    }

    pub fn stream_id(&self) -> u32 {
        self.inner.stream_id
    }

    pub fn route(&self) -> &str {
        &self.inner.route
    }

    pub fn direction(&self) -> Direction {
        self.inner.direction
    }

    pub(crate) fn key(&self) -> StreamKey {
        StreamKey::new(self.inner.direction, self.inner.stream_id)
    }

    /// Cancel the stream. Returns `true` only for the call that actually
    /// canceled it.
    pub fn cancel(&self) -> bool {
        let first = !self.inner.cancelled.swap(true, Ordering::AcqRel);
        self.inner.token.cancel();
        first
    }

    /// True once the stream was canceled directly or through its session.
    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Resolves when the stream is canceled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.inner.token.cancelled()
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("stream_id", &self.inner.stream_id)
            .field("route", &self.inner.route)
            .field("direction", &self.inner.direction)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// A composite key for stream tracking: (direction, stream_id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub direction: Direction,
    pub stream_id: u32,
}

impl StreamKey {
    pub fn new(direction: Direction, stream_id: u32) -> Self {
        Self {
            direction,
            stream_id,
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = match self.direction {
            Direction::Outbound => "out",
            Direction::Inbound => "in",
        };
        write!(f, "{direction}:{}", self.stream_id)
    }
}

/// Tracks the open streams of one session.
///
/// Only one stream is allowed per key at a time. Registering returns a guard
/// that removes the stream when dropped.
pub struct StreamRegistry {
    streams: DashMap<StreamKey, StreamHandle, ahash::RandomState>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self {
            streams: DashMap::default(),
        }
    }

    /// Track a stream. Fails if a stream with the same key is already open.
    pub fn try_register(self: &Arc<Self>, handle: StreamHandle) -> Result<StreamGuard, DispatchError> {
        use dashmap::mapref::entry::Entry;

        let key = handle.key();
        match self.streams.entry(key) {
            Entry::Occupied(_) => Err(DispatchError::DuplicateStream(key.stream_id)),
            Entry::Vacant(slot) => {
                slot.insert(handle);
                Ok(StreamGuard {
                    key,
                    registry: Arc::clone(self),
                })
            }
        }
    }

    pub fn get(&self, key: &StreamKey) -> Option<StreamHandle> {
        self.streams.get(key).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, key: &StreamKey) -> bool {
        self.streams.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Snapshot of the open streams.
    pub fn handles(&self) -> Vec<StreamHandle> {
        self.streams.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Remove and return every open stream.
    pub(crate) fn drain(&self) -> Vec<StreamHandle> {
        let keys: Vec<StreamKey> = self.streams.iter().map(|entry| *entry.key()).collect();
        keys.into_iter()
            .filter_map(|key| self.streams.remove(&key).map(|(_, handle)| handle))
            .collect()
    }

    fn remove(&self, key: &StreamKey) {
        self.streams.remove(key);
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds a stream's registry slot. When dropped, the stream is removed.
pub struct StreamGuard {
    key: StreamKey,
    registry: Arc<StreamRegistry>,
}

impl StreamGuard {
    pub fn key(&self) -> StreamKey {
        self.key
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.key);
    }
}

impl fmt::Debug for StreamGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamGuard").field("key", &self.key).finish()
    }
}
