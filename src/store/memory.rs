//! In-process backend for local duels, practice runs and tests

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{BackendError, BackendResult, EventFeed, Heartbeat, MatchQueue, RoomDirectory};
use crate::matchmaking::queue::{MatchmakingQueue, QueuedPlayer};
use crate::replication::protocol::{GameEvent, Player, PlayerId, Room, RoomState, RoomUpdate};
use crate::util::time::{to_datetime, Clock};

/// Feed entries are kept encoded so every delivery goes through the wire format
struct EventLog {
    entries: Mutex<Vec<String>>,
    version: watch::Sender<u64>,
}

impl EventLog {
    fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            version: watch::channel(0).0,
        }
    }

    fn append(&self, raw: String) {
        self.entries.lock().push(raw);
        self.version.send_modify(|v| *v += 1);
    }

    fn window(&self, limit: usize) -> Vec<GameEvent> {
        let entries = self.entries.lock();
        let start = entries.len().saturating_sub(limit);
        entries[start..]
            .iter()
            .filter_map(|raw| match serde_json::from_str(raw) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(error = %e, "Skipping undecodable feed entry");
                    None
                }
            })
            .collect()
    }
}

/// Rooms, feeds, heartbeats and the quick match queue held in memory
pub struct MemoryBackend {
    rooms: DashMap<String, Room>,
    room_watch: DashMap<String, watch::Sender<Option<Room>>>,
    feeds: DashMap<String, Arc<EventLog>>,
    queue: Mutex<MatchmakingQueue>,
    assignments: DashMap<PlayerId, watch::Sender<Option<String>>>,
    offline: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl MemoryBackend {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            rooms: DashMap::new(),
            room_watch: DashMap::new(),
            feeds: DashMap::new(),
            queue: Mutex::new(MatchmakingQueue::new()),
            assignments: DashMap::new(),
            offline: AtomicBool::new(false),
            clock,
        }
    }

    /// Make every call fail with `Unavailable` until switched back
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    pub fn room(&self, room_id: &str) -> Option<Room> {
        self.rooms.get(room_id).map(|r| r.clone())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn queued_players(&self) -> usize {
        self.queue.lock().len()
    }

    /// Append an already encoded entry to a room's feed
    pub fn append_raw(&self, room_id: &str, raw: impl Into<String>) {
        self.feed(room_id).append(raw.into());
    }

    fn check_online(&self) -> BackendResult<()> {
        if self.offline.load(Ordering::Relaxed) {
            return Err(BackendError::Unavailable);
        }
        Ok(())
    }

    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        to_datetime(self.clock.now_millis())
    }

    fn feed(&self, room_id: &str) -> Arc<EventLog> {
        self.feeds
            .entry(room_id.to_string())
            .or_insert_with(|| Arc::new(EventLog::new()))
            .clone()
    }

    fn notify(&self, room_id: &str) {
        let room = self.room(room_id);
        if let Some(tx) = self.room_watch.get(room_id) {
            tx.send_replace(room);
        }
    }

    fn fresh_code(&self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let code = format!("{:06}", rng.gen_range(0..1_000_000));
            if !self.rooms.contains_key(&code) {
                return code;
            }
        }
    }

    fn open_public_room(&self, player: PlayerId) -> Option<String> {
        self.rooms
            .iter()
            .filter(|r| {
                !r.is_private()
                    && r.state == RoomState::Waiting
                    && !r.is_full()
                    && !r.players.contains_key(&player)
            })
            .min_by_key(|r| r.created_at)
            .map(|r| r.id.clone())
    }

    fn with_room<T>(
        &self,
        room_id: &str,
        f: impl FnOnce(&mut Room) -> BackendResult<T>,
    ) -> BackendResult<T> {
        let result = {
            let mut room = self
                .rooms
                .get_mut(room_id)
                .ok_or_else(|| BackendError::RoomNotFound(room_id.to_string()))?;
            f(room.value_mut())?
        };
        self.notify(room_id);
        Ok(result)
    }
}

/// Current value first, then each change until the sender goes away
fn watch_stream<T>(rx: watch::Receiver<T>) -> BoxStream<'static, T>
where
    T: Clone + Send + Sync + 'static,
{
    stream::unfold((rx, true), |(mut rx, first)| async move {
        if !first && rx.changed().await.is_err() {
            return None;
        }
        let value = rx.borrow_and_update().clone();
        Some((value, (rx, false)))
    })
    .boxed()
}

fn not_in_room(room: &Room, player: PlayerId) -> BackendError {
    BackendError::NotInRoom {
        room: room.id.clone(),
        player,
    }
}

impl RoomDirectory for MemoryBackend {
    fn create(&self, host: PlayerId, is_private: bool, seed: u64) -> BoxFuture<'_, BackendResult<Room>> {
        async move {
            self.check_online()?;
            let now = self.now();
            let id = if is_private {
                self.fresh_code()
            } else {
                Uuid::new_v4().to_string()
            };
            let room = Room {
                id: id.clone(),
                code: is_private.then(|| id.clone()),
                host_id: host,
                state: RoomState::Waiting,
                players: BTreeMap::from([(host, Player::new(host, true, now))]),
                seed,
                created_at: now,
                ..Room::default()
            };
            self.rooms.insert(id.clone(), room.clone());
            self.notify(&id);
            info!(room_id = %id, host = %host, is_private, "Room created");
            Ok(room)
        }
        .boxed()
    }

    fn join<'a>(
        &'a self,
        player: PlayerId,
        code: Option<&'a str>,
    ) -> BoxFuture<'a, BackendResult<Option<Room>>> {
        async move {
            self.check_online()?;
            let room_id = match code {
                Some(code) => code.to_string(),
                None => match self.open_public_room(player) {
                    Some(id) => id,
                    None => return Ok(None),
                },
            };
            let now = self.now();
            let joined = {
                let Some(mut room) = self.rooms.get_mut(&room_id) else {
                    return Ok(None);
                };
                if !room.players.contains_key(&player) {
                    if room.is_full() || room.state != RoomState::Waiting {
                        return Ok(None);
                    }
                    room.players.insert(player, Player::new(player, false, now));
                }
                room.clone()
            };
            self.notify(&room_id);
            info!(room_id = %room_id, player = %player, "Player joined room");
            Ok(Some(joined))
        }
        .boxed()
    }

    fn subscribe(&self, room_id: &str) -> BoxStream<'static, Option<Room>> {
        let rx = self
            .room_watch
            .entry(room_id.to_string())
            .or_insert_with(|| watch::channel(self.room(room_id)).0)
            .subscribe();
        watch_stream(rx)
    }

    fn set_ready<'a>(
        &'a self,
        room_id: &'a str,
        player: PlayerId,
        ready: bool,
    ) -> BoxFuture<'a, BackendResult<()>> {
        async move {
            self.check_online()?;
            self.with_room(room_id, |room| {
                let missing = not_in_room(room, player);
                room.players.get_mut(&player).ok_or(missing)?.is_ready = ready;
                if matches!(room.state, RoomState::Waiting | RoomState::Ready) {
                    room.state = if room.all_ready() {
                        RoomState::Ready
                    } else {
                        RoomState::Waiting
                    };
                }
                debug!(room_id, player = %player, ready, state = ?room.state, "Ready changed");
                Ok(())
            })
        }
        .boxed()
    }

    fn leave<'a>(&'a self, room_id: &'a str, player: PlayerId) -> BoxFuture<'a, BackendResult<()>> {
        async move {
            self.check_online()?;
            let emptied = self.with_room(room_id, |room| {
                if room.players.remove(&player).is_none() {
                    return Err(not_in_room(room, player));
                }
                if room.is_host(&player) {
                    let next_host = room.players.values_mut().next().map(|p| {
                        p.is_host = true;
                        p.id
                    });
                    if let Some(id) = next_host {
                        room.host_id = id;
                    }
                }
                if room.state == RoomState::Ready {
                    room.state = RoomState::Waiting;
                }
                Ok(room.players.is_empty())
            })?;

            if emptied {
                self.rooms.remove(room_id);
                self.feeds.remove(room_id);
                self.notify(room_id);
                self.room_watch.remove(room_id);
                info!(room_id, "Room deleted");
            } else {
                info!(room_id, player = %player, "Player left room");
            }
            Ok(())
        }
        .boxed()
    }

    fn update_state<'a>(
        &'a self,
        room_id: &'a str,
        update: RoomUpdate,
    ) -> BoxFuture<'a, BackendResult<()>> {
        async move {
            self.check_online()?;
            self.with_room(room_id, |room| {
                if room.state == RoomState::Finished {
                    debug!(room_id, state = ?update.state, "Room already finished, write ignored");
                    return Ok(());
                }
                room.apply(&update);
                info!(room_id, state = ?room.state, "Room state changed");
                Ok(())
            })
        }
        .boxed()
    }
}

impl EventFeed for MemoryBackend {
    fn publish<'a>(&'a self, room_id: &'a str, event: GameEvent) -> BoxFuture<'a, BackendResult<()>> {
        async move {
            self.check_online()?;
            let event = GameEvent {
                timestamp: self.now(),
                ..event
            };
            let raw = serde_json::to_string(&event)?;
            self.feed(room_id).append(raw);
            Ok(())
        }
        .boxed()
    }

    fn subscribe(&self, room_id: &str, limit: usize) -> BoxStream<'static, Vec<GameEvent>> {
        let log = self.feed(room_id);
        let rx = log.version.subscribe();
        watch_stream(rx)
            .map(move |_| log.window(limit))
            .boxed()
    }
}

impl Heartbeat for MemoryBackend {
    fn touch<'a>(
        &'a self,
        room_id: &'a str,
        player: PlayerId,
        now_ms: u64,
    ) -> BoxFuture<'a, BackendResult<()>> {
        async move {
            self.check_online()?;
            self.with_room(room_id, |room| {
                let missing = not_in_room(room, player);
                room.players.get_mut(&player).ok_or(missing)?.last_seen = Some(to_datetime(now_ms));
                Ok(())
            })
        }
        .boxed()
    }
}

impl MatchQueue for MemoryBackend {
    fn enqueue(&self, player: PlayerId) -> BoxFuture<'_, BackendResult<()>> {
        async move {
            self.check_online()?;
            self.queue.lock().enqueue(QueuedPlayer::new(player));
            debug!(player = %player, "Queued for quick match");
            Ok(())
        }
        .boxed()
    }

    fn dequeue(&self, player: PlayerId) -> BoxFuture<'_, BackendResult<()>> {
        async move {
            self.check_online()?;
            self.queue.lock().dequeue(player);
            self.assignments.remove(&player);
            Ok(())
        }
        .boxed()
    }

    fn find_candidate(&self, player: PlayerId) -> BoxFuture<'_, BackendResult<Option<PlayerId>>> {
        async move {
            self.check_online()?;
            let paired = self.queue.lock().try_pair(player);
            if paired.is_some() {
                // The claimer hosts and is no longer waiting for an assignment
                self.assignments.remove(&player);
            }
            Ok(paired.map(|(_, other)| {
                info!(
                    player = %player,
                    opponent = %other.player_id,
                    waited_ms = other.wait_time().as_millis() as u64,
                    "Quick match paired"
                );
                other.player_id
            }))
        }
        .boxed()
    }

    fn assign_match<'a>(&'a self, player: PlayerId, room_id: &'a str) -> BoxFuture<'a, BackendResult<()>> {
        async move {
            self.check_online()?;
            // Receivers still see the last value after the sender is gone
            match self.assignments.remove(&player) {
                Some((_, tx)) => {
                    tx.send_replace(Some(room_id.to_string()));
                }
                None => debug!(player = %player, room_id, "No one waiting for this assignment"),
            }
            Ok(())
        }
        .boxed()
    }

    fn subscribe_for_match(&self, player: PlayerId) -> BoxStream<'static, Option<String>> {
        let tx = self
            .assignments
            .entry(player)
            .or_insert_with(|| watch::channel(None).0);
        // Drop any assignment left over from an earlier search
        tx.send_replace(None);
        watch_stream(tx.subscribe())
    }
}
