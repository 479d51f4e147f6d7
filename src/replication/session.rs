//! Session driver - runs one player's controller against the backend

use futures::StreamExt;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};

use super::controller::{MultiplayerController, Outbound};
use super::protocol::{PlayerId, Room};
use super::SessionError;
use crate::app::notice::{MatchView, SessionNotice};
use crate::app::state::Backend;
use crate::config::GameConfig;
use crate::game::{AttackKind, Position, TurnOutcome};
use crate::store::{BackendError, FEED_WINDOW};
use crate::util::rate_limit::ActionRateLimiter;
use crate::util::time::{CLOCK_TICK, HEARTBEAT_INTERVAL, RESTORATION_POLL};

const COMMAND_BUFFER: usize = 64;

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

/// Requests from the UI side, answered on the embedded channel
#[derive(Debug)]
pub enum SessionCommand {
    MakeMove {
        from: Position,
        to: Position,
        reply: Reply<TurnOutcome>,
    },
    UseAttack {
        slot: usize,
        reply: Reply<Option<AttackKind>>,
    },
    SetReady {
        ready: bool,
        reply: Reply<()>,
    },
    StartGame {
        reply: Reply<bool>,
    },
    Pause {
        reply: Reply<bool>,
    },
    Resume {
        reply: Reply<bool>,
    },
    Inspect {
        reply: oneshot::Sender<MatchView>,
    },
    Leave {
        reply: Reply<()>,
    },
}

/// Cloneable front end of a running session
#[derive(Clone)]
pub struct SessionHandle {
    player_id: PlayerId,
    room_id: String,
    commands: mpsc::Sender<SessionCommand>,
    notices: broadcast::Sender<SessionNotice>,
}

impl SessionHandle {
    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub async fn make_move(&self, from: Position, to: Position) -> Result<TurnOutcome, SessionError> {
        self.request(|reply| SessionCommand::MakeMove { from, to, reply })
            .await?
    }

    pub async fn use_attack(&self, slot: usize) -> Result<Option<AttackKind>, SessionError> {
        self.request(|reply| SessionCommand::UseAttack { slot, reply })
            .await?
    }

    pub async fn set_ready(&self, ready: bool) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::SetReady { ready, reply })
            .await?
    }

    /// Host only. Ok(false) while the room is not ready.
    pub async fn start_game(&self) -> Result<bool, SessionError> {
        self.request(|reply| SessionCommand::StartGame { reply }).await?
    }

    pub async fn pause(&self) -> Result<bool, SessionError> {
        self.request(|reply| SessionCommand::Pause { reply }).await?
    }

    pub async fn resume(&self) -> Result<bool, SessionError> {
        self.request(|reply| SessionCommand::Resume { reply }).await?
    }

    pub async fn inspect(&self) -> Result<MatchView, SessionError> {
        self.request(|reply| SessionCommand::Inspect { reply }).await
    }

    /// Leave the room and stop the session
    pub async fn leave(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Leave { reply }).await?
    }
}

/// Owns the controller and every timer and subscription of one player
pub struct Session {
    controller: MultiplayerController,
    backend: Backend,
    room_id: String,
    limiter: ActionRateLimiter,
}

impl Session {
    /// Start driving `room` for `player_id`. The task resolves to the final view.
    pub fn spawn(
        backend: Backend,
        player_id: PlayerId,
        room: Room,
        config: &GameConfig,
    ) -> (SessionHandle, JoinHandle<MatchView>) {
        let mut controller = MultiplayerController::new(player_id, config);
        let room_id = room.id.clone();
        controller.on_room_update(Some(room), backend.clock.now_millis());

        let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
        let handle = SessionHandle {
            player_id,
            room_id: room_id.clone(),
            commands,
            notices: controller.notice_sender(),
        };
        let session = Self {
            controller,
            backend,
            room_id,
            limiter: ActionRateLimiter::new(config.action_rate_limit),
        };
        (handle, tokio::spawn(session.run(rx)))
    }

    fn now(&self) -> u64 {
        self.backend.clock.now_millis()
    }

    async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) -> MatchView {
        let player_id = self.controller.player_id();
        let mut room_updates = self.backend.rooms.subscribe(&self.room_id);
        let mut events = self.backend.feed.subscribe(&self.room_id, FEED_WINDOW);

        let start = Instant::now();
        let mut clock_tick = interval_at(start + CLOCK_TICK, CLOCK_TICK);
        let mut heartbeat = interval(HEARTBEAT_INTERVAL);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut restoration = interval_at(start + RESTORATION_POLL, RESTORATION_POLL);
        restoration.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(room_id = %self.room_id, player = %player_id, "Session started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.handle(command).await {
                            break;
                        }
                    }
                    None => break,
                },
                _ = clock_tick.tick() => {
                    let now = self.now();
                    self.controller.tick_second(now);
                }
                _ = heartbeat.tick() => self.heartbeat().await,
                _ = restoration.tick() => {
                    let now = self.now();
                    self.controller.poll_restoration(now);
                }
                update = room_updates.next() => match update {
                    Some(room) => {
                        let now = self.now();
                        self.controller.on_room_update(room, now);
                    }
                    None => break,
                },
                batch = events.next() => match batch {
                    Some(batch) => {
                        let now = self.now();
                        self.controller.apply_remote_events(&batch, now);
                    }
                    None => break,
                },
            }

            // Write failures are already logged by flush
            let _ = self.flush().await;
            if self.controller.phase().is_terminal() {
                break;
            }
        }

        info!(
            room_id = %self.room_id,
            player = %player_id,
            phase = ?self.controller.phase(),
            "Session ended"
        );
        self.controller.view()
    }

    /// Returns false when the session should stop
    async fn handle(&mut self, command: SessionCommand) -> bool {
        let now = self.now();
        match command {
            SessionCommand::MakeMove { from, to, reply } => {
                let result = if self.limiter.check_action() {
                    self.controller.make_move(from, to, now)
                } else {
                    warn!(player = %self.controller.player_id(), "Move rate limited");
                    Ok(TurnOutcome::rejected())
                };
                let _ = reply.send(self.flush_after(result).await);
            }
            SessionCommand::UseAttack { slot, reply } => {
                let result = if self.limiter.check_action() {
                    self.controller.use_attack(slot, now)
                } else {
                    warn!(player = %self.controller.player_id(), "Attack rate limited");
                    Ok(None)
                };
                let _ = reply.send(self.flush_after(result).await);
            }
            SessionCommand::SetReady { ready, reply } => {
                let result = self
                    .backend
                    .rooms
                    .set_ready(&self.room_id, self.controller.player_id(), ready)
                    .await
                    .map_err(SessionError::from);
                let _ = reply.send(result);
            }
            SessionCommand::StartGame { reply } => {
                let result = self.controller.start_game(now);
                let _ = reply.send(self.flush_after(result).await);
            }
            SessionCommand::Pause { reply } => {
                let result = self.controller.pause_battle(now);
                let _ = reply.send(self.flush_after(result).await);
            }
            SessionCommand::Resume { reply } => {
                let result = self.controller.resume_battle(now);
                let _ = reply.send(self.flush_after(result).await);
            }
            SessionCommand::Inspect { reply } => {
                let _ = reply.send(self.controller.view());
            }
            SessionCommand::Leave { reply } => {
                let result = self
                    .backend
                    .rooms
                    .leave(&self.room_id, self.controller.player_id())
                    .await
                    .map_err(SessionError::from);
                let _ = reply.send(result);
                return false;
            }
        }
        true
    }

    async fn heartbeat(&mut self) {
        let now = self.now();
        let player_id = self.controller.player_id();
        if let Err(e) = self.backend.heartbeat.touch(&self.room_id, player_id, now).await {
            warn!(player = %player_id, error = %e, "Heartbeat failed");
        }
        self.controller.heartbeat_tick(now);
    }

    /// Local state is already applied; a failed write surfaces to the caller
    async fn flush_after<T>(&mut self, result: Result<T, SessionError>) -> Result<T, SessionError> {
        let flushed = self.flush().await;
        let value = result?;
        flushed?;
        Ok(value)
    }

    async fn flush(&mut self) -> Result<(), BackendError> {
        let mut first_error = None;
        for outbound in self.controller.take_outbox() {
            let written = match outbound {
                Outbound::Publish(event) => self.backend.feed.publish(&self.room_id, event).await,
                Outbound::UpdateRoom(update) => {
                    self.backend.rooms.update_state(&self.room_id, update).await
                }
            };
            if let Err(e) = written {
                warn!(room_id = %self.room_id, error = %e, "Backend write failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
