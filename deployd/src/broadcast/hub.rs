//! Log rooms keyed by build key

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::errors::BroadcastError;
use crate::models::build::{DeployOutcome, LogKind, LogLine};

/// Default per-subscriber queue length
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 1024;

/// Event delivered to a subscriber after its snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    /// Newly appended lines, in append order
    Lines(Vec<LogLine>),

    /// Error text; the same text was also delivered as a line
    Error(String),

    /// Terminal signal, always the last event of a subscription
    Finished(DeployOutcome),
}

struct Room {
    state: Mutex<RoomState>,
}

#[derive(Default)]
struct RoomState {
    lines: Vec<LogLine>,
    subscribers: HashMap<u64, mpsc::Sender<RoomEvent>>,
    outcome: Option<DeployOutcome>,
    released: bool,
}

impl Room {
    fn new() -> Self {
        Self {
            state: Mutex::new(RoomState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RoomState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl RoomState {
    fn push(&mut self, kind: LogKind, text: String) -> LogLine {
        let line = LogLine {
            seq: self.lines.len() as u64,
            kind,
            text,
        };
        self.lines.push(line.clone());
        line
    }

    /// Offer an event to every subscriber without waiting. Subscribers whose
    /// queue is full are evicted; their stream ends without a terminal event.
    fn deliver(&mut self, key: &str, event: RoomEvent) {
        self.subscribers.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Evicting lagging subscriber {} from room {}", id, key);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }
}

/// Registry of log rooms
pub struct LogHub {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    subscriber_buffer: usize,
    next_subscriber_id: AtomicU64,
}

impl LogHub {
    /// Create a hub whose subscribers may fall `subscriber_buffer` events
    /// behind before being evicted
    pub fn new(subscriber_buffer: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            subscriber_buffer: subscriber_buffer.max(1),
            next_subscriber_id: AtomicU64::new(1),
        }
    }

    fn room(&self, key: &str) -> Result<Arc<Room>, BroadcastError> {
        let rooms = self.rooms.read().unwrap_or_else(|e| e.into_inner());
        rooms
            .get(key)
            .cloned()
            .ok_or_else(|| BroadcastError::Unavailable(key.to_string()))
    }

    /// Open an empty room for `key`.
    ///
    /// A finished room that has not been released yet is replaced; a room
    /// that is still being written is not.
    pub fn open(&self, key: &str) -> Result<(), BroadcastError> {
        let mut rooms = self.rooms.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = rooms.get(key) {
            let mut state = existing.lock();
            if state.outcome.is_none() {
                return Err(BroadcastError::Busy(key.to_string()));
            }
            state.released = true;
            state.lines.clear();
        }
        rooms.insert(key.to_string(), Arc::new(Room::new()));
        debug!("Opened log room {}", key);
        Ok(())
    }

    /// Append a build output line and push it to every subscriber.
    /// Returns the line's sequence number.
    pub fn append(&self, key: &str, text: impl Into<String>) -> Result<u64, BroadcastError> {
        self.append_kind(key, LogKind::Build, text.into())
    }

    /// Append an error line. Subscribers receive it both as a line and on the
    /// error channel.
    pub fn append_error(&self, key: &str, text: impl Into<String>) -> Result<u64, BroadcastError> {
        self.append_kind(key, LogKind::Error, text.into())
    }

    fn append_kind(&self, key: &str, kind: LogKind, text: String) -> Result<u64, BroadcastError> {
        let room = self.room(key)?;
        let mut state = room.lock();
        if state.released {
            return Err(BroadcastError::Unavailable(key.to_string()));
        }
        if state.outcome.is_some() {
            return Err(BroadcastError::AlreadyFinished(key.to_string()));
        }

        let line = state.push(kind, text);
        let seq = line.seq;
        let error_text = line.is_error().then(|| line.text.clone());
        state.deliver(key, RoomEvent::Lines(vec![line]));
        if let Some(text) = error_text {
            state.deliver(key, RoomEvent::Error(text));
        }
        Ok(seq)
    }

    /// Join the room for `key`.
    ///
    /// The returned subscription carries every line appended so far; every
    /// later line arrives through [`Subscription::recv`]. Joining a finished
    /// room yields the snapshot followed directly by the terminal event.
    pub fn join(&self, key: &str) -> Result<Subscription, BroadcastError> {
        let room = self.room(key)?;
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.subscriber_buffer);

        let snapshot = {
            let mut state = room.lock();
            if state.released {
                return Err(BroadcastError::Unavailable(key.to_string()));
            }
            if let Some(outcome) = state.outcome.clone() {
                // capacity is at least one and the sender is fresh
                let _ = tx.try_send(RoomEvent::Finished(outcome));
            } else {
                state.subscribers.insert(id, tx);
            }
            state.lines.clone()
        };

        debug!("Subscriber {} joined room {} at line {}", id, key, snapshot.len());
        Ok(Subscription {
            key: key.to_string(),
            id,
            snapshot,
            rx,
            room,
        })
    }

    /// Record the terminal outcome and push it to every subscriber. The
    /// subscribers' streams end after it.
    pub fn finish(&self, key: &str, outcome: DeployOutcome) -> Result<(), BroadcastError> {
        let room = self.room(key)?;
        let mut state = room.lock();
        if state.released {
            return Err(BroadcastError::Unavailable(key.to_string()));
        }
        if state.outcome.is_some() {
            return Err(BroadcastError::AlreadyFinished(key.to_string()));
        }
        state.outcome = Some(outcome.clone());
        state.deliver(key, RoomEvent::Finished(outcome));
        state.subscribers.clear();
        Ok(())
    }

    /// Discard the buffer for `key`. Only finished rooms can be released.
    /// Returns the number of lines discarded.
    pub fn release(&self, key: &str) -> Result<usize, BroadcastError> {
        let mut rooms = self.rooms.write().unwrap_or_else(|e| e.into_inner());
        let room = rooms
            .get(key)
            .cloned()
            .ok_or_else(|| BroadcastError::Unavailable(key.to_string()))?;

        let discarded = {
            let mut state = room.lock();
            if state.outcome.is_none() {
                return Err(BroadcastError::NotFinished(key.to_string()));
            }
            state.released = true;
            state.subscribers.clear();
            std::mem::take(&mut state.lines).len()
        };

        rooms.remove(key);
        debug!("Released log room {} ({} lines)", key, discarded);
        Ok(discarded)
    }

    /// Copy of the buffered lines and the outcome, if finished
    pub fn snapshot(&self, key: &str) -> Result<(Vec<LogLine>, Option<DeployOutcome>), BroadcastError> {
        let room = self.room(key)?;
        let state = room.lock();
        if state.released {
            return Err(BroadcastError::Unavailable(key.to_string()));
        }
        Ok((state.lines.clone(), state.outcome.clone()))
    }

    /// Whether a room is open for `key`
    pub fn contains(&self, key: &str) -> bool {
        self.room(key).is_ok()
    }

    /// Number of live subscribers for `key`
    pub fn subscriber_count(&self, key: &str) -> usize {
        self.room(key).map(|room| room.lock().subscribers.len()).unwrap_or(0)
    }

    /// Number of open rooms
    pub fn len(&self) -> usize {
        self.rooms.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LogHub {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

/// Membership of one observer in one room. Leaves the room when dropped.
pub struct Subscription {
    key: String,
    id: u64,
    snapshot: Vec<LogLine>,
    rx: mpsc::Receiver<RoomEvent>,
    room: Arc<Room>,
}

impl Subscription {
    /// Build key of the joined room
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Lines buffered at the instant of joining
    pub fn snapshot(&self) -> &[LogLine] {
        &self.snapshot
    }

    /// Take the snapshot out, leaving an empty one behind
    pub fn take_snapshot(&mut self) -> Vec<LogLine> {
        std::mem::take(&mut self.snapshot)
    }

    /// Next live event. `None` after the terminal event, or without one if
    /// the subscriber was evicted for lagging.
    pub async fn recv(&mut self) -> Option<RoomEvent> {
        self.rx.recv().await
    }

    /// Leave the room explicitly
    pub fn leave(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut state = self.room.lock();
        if state.subscribers.remove(&self.id).is_some() {
            debug!("Subscriber {} left room {}", self.id, self.key);
        }
    }
}
