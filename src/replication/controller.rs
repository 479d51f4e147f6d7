//! Multiplayer battle state machine
//!
//! Owns the local board, a mirror of the opponent's board and the battle
//! clock. It performs no I/O: inputs arrive as method calls carrying the
//! current time and writes are queued in an outbox that the session flushes.

use std::collections::BTreeMap;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::protocol::{
    board_seed, BoardUpdateReason, EventPayload, GameEvent, PlayerId, Room, RoomState, RoomUpdate,
};
use super::SessionError;
use crate::app::notice::{BattleOutcome, MatchView, SessionNotice};
use crate::config::GameConfig;
use crate::game::{AttackKind, BattleClock, BattleState, ClockEvent, PlayerBoard, Position, Side, TurnOutcome};
use crate::util::time::{to_datetime, TIMER_SYNC_EVERY_SECS};

const NOTICE_CAPACITY: usize = 256;

/// A write the session must perform against the backend
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Publish(GameEvent),
    UpdateRoom(RoomUpdate),
}

/// Why the clock is frozen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    Local,
    OpponentPaused,
    OpponentDisconnected,
}

impl PauseReason {
    pub fn message(self) -> &'static str {
        match self {
            PauseReason::Local => "Game paused",
            PauseReason::OpponentPaused => "Opponent paused the game",
            PauseReason::OpponentDisconnected => "Opponent disconnected",
        }
    }
}

/// Where the session is in the room lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Lobby,
    Battle,
    Finished,
    RoomGone,
}

impl SessionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Finished | SessionPhase::RoomGone)
    }
}

struct Duel {
    local: PlayerBoard,
    /// Replica of the opponent's board, driven only by their events
    mirror: PlayerBoard,
    opponent_id: PlayerId,
}

pub struct MultiplayerController {
    player_id: PlayerId,
    room: Option<Room>,
    phase: SessionPhase,
    duel: Option<Duel>,
    clock: BattleClock,
    pause_reason: Option<PauseReason>,
    opponent_disconnected: bool,
    next_seq: u64,
    last_remote_seq: u64,
    /// Opponent events that arrived before we saw the room go to Playing
    early_events: Vec<GameEvent>,
    mirror_desynced: bool,
    /// Set once this side has settled the result
    verdict: Option<BattleOutcome>,
    outbox: Vec<Outbound>,
    notices: broadcast::Sender<SessionNotice>,
}

impl MultiplayerController {
    pub fn new(player_id: PlayerId, config: &GameConfig) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            player_id,
            room: None,
            phase: SessionPhase::Lobby,
            duel: None,
            clock: BattleClock::from_config(config),
            pause_reason: None,
            opponent_disconnected: false,
            next_seq: 0,
            last_remote_seq: 0,
            early_events: Vec::new(),
            mirror_desynced: false,
            verdict: None,
            outbox: Vec::new(),
            notices,
        }
    }

    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }

    pub fn room(&self) -> Option<&Room> {
        self.room.as_ref()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn clock(&self) -> &BattleClock {
        &self.clock
    }

    pub fn local_board(&self) -> Option<&PlayerBoard> {
        self.duel.as_ref().map(|d| &d.local)
    }

    pub fn opponent_board(&self) -> Option<&PlayerBoard> {
        self.duel.as_ref().map(|d| &d.mirror)
    }

    pub fn pause_reason(&self) -> Option<PauseReason> {
        self.pause_reason
    }

    pub fn is_opponent_disconnected(&self) -> bool {
        self.opponent_disconnected
    }

    /// Set after a gap or a score mismatch until the next snapshot arrives
    pub fn is_mirror_desynced(&self) -> bool {
        self.mirror_desynced
    }

    pub fn is_host(&self) -> bool {
        self.room
            .as_ref()
            .is_some_and(|room| room.is_host(&self.player_id))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    pub fn notice_sender(&self) -> broadcast::Sender<SessionNotice> {
        self.notices.clone()
    }

    /// Drain pending backend writes in the order they were produced
    pub fn take_outbox(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    pub fn view(&self) -> MatchView {
        let mut view = MatchView::new(&self.clock, self.local_board(), self.opponent_board());
        view.opponent_disconnected = self.opponent_disconnected;
        if self.phase == SessionPhase::Finished {
            view.outcome = Some(self.outcome());
        }
        view
    }

    fn require_room(&self) -> Result<&Room, SessionError> {
        self.room.as_ref().ok_or(SessionError::NotInitialized)
    }

    fn notify(&self, notice: SessionNotice) {
        // No receivers is fine
        let _ = self.notices.send(notice);
    }

    fn publish(&mut self, payload: EventPayload, now_ms: u64) {
        self.next_seq += 1;
        let event = GameEvent {
            actor_id: self.player_id,
            timestamp: to_datetime(now_ms),
            seq: self.next_seq,
            payload,
            stats: Some(self.clock.local),
        };
        self.outbox.push(Outbound::Publish(event));
    }

    fn opponent_id(&self) -> Option<PlayerId> {
        self.duel.as_ref().map(|d| d.opponent_id)
    }

    fn winner_id(&self) -> Option<PlayerId> {
        match self.clock.winner()? {
            Side::Local => Some(self.player_id),
            Side::Opponent => self.opponent_id(),
        }
    }

    fn outcome(&self) -> BattleOutcome {
        match &self.room {
            Some(room) if room.state == RoomState::Finished => {
                BattleOutcome::from_winner(room.winner_id, &self.player_id)
            }
            _ => self
                .verdict
                .unwrap_or_else(|| BattleOutcome::from_side(self.clock.winner())),
        }
    }

    // --- local actions ---

    /// Host only: move a fully ready room to Playing
    pub fn start_game(&mut self, now_ms: u64) -> Result<bool, SessionError> {
        let room = self.require_room()?;
        if self.phase != SessionPhase::Lobby || !room.is_host(&self.player_id) || !room.all_ready() {
            return Ok(false);
        }
        info!(room_id = %room.id, "Host starting game");
        self.outbox
            .push(Outbound::UpdateRoom(RoomUpdate::playing(to_datetime(now_ms))));
        Ok(true)
    }

    /// Swap two cells on the local board. Rejected outcomes score zero.
    pub fn make_move(
        &mut self,
        from: Position,
        to: Position,
        now_ms: u64,
    ) -> Result<TurnOutcome, SessionError> {
        self.require_room()?;
        if !self.clock.can_make_move() {
            return Ok(TurnOutcome::rejected());
        }
        let Some(duel) = self.duel.as_mut() else {
            return Ok(TurnOutcome::rejected());
        };

        let result = duel.local.play(from, to, now_ms);
        if !result.outcome.is_scoring() {
            return Ok(result.outcome);
        }

        self.clock.local.record_turn(&result.outcome);
        if result.recovered {
            self.notify(SessionNotice::BoardRecovered);
        }
        if let (Some(kind), Some(slot)) = (result.earned, result.slot) {
            self.clock.local.attacks_earned += 1;
            self.notify(SessionNotice::AttackEarned { kind, slot });
        }

        debug!(score = result.outcome.score, passes = result.outcome.passes(), "Move resolved");
        self.publish(
            EventPayload::Move {
                from,
                to,
                score: result.outcome.score,
                largest_match: result.outcome.largest_match,
                recovered: result.recovered,
            },
            now_ms,
        );
        self.notify(SessionNotice::LocalBoardChanged);
        Ok(result.outcome)
    }

    /// Cast the attack in `slot` at the opponent
    pub fn use_attack(&mut self, slot: usize, now_ms: u64) -> Result<Option<AttackKind>, SessionError> {
        self.require_room()?;
        if !self.clock.can_make_move() {
            return Ok(None);
        }
        let Some(duel) = self.duel.as_mut() else {
            return Ok(None);
        };
        let Some(attack) = duel.local.take_attack(slot) else {
            return Ok(None);
        };

        let effect = duel.mirror.receive(attack.kind, now_ms);
        let target_id = duel.opponent_id;
        self.clock.local.attacks_used += 1;
        info!(attack = ?attack.kind, slot, ?effect, "Attack cast");

        self.publish(
            EventPayload::Attack {
                slot,
                attack: attack.kind,
                target_id,
            },
            now_ms,
        );
        self.notify(SessionNotice::OpponentBoardChanged);
        Ok(Some(attack.kind))
    }

    pub fn pause_battle(&mut self, now_ms: u64) -> Result<bool, SessionError> {
        self.require_room()?;
        if self.phase != SessionPhase::Battle || !self.clock.pause(now_ms) {
            return Ok(false);
        }
        self.pause_reason = Some(PauseReason::Local);
        self.outbox
            .push(Outbound::UpdateRoom(RoomUpdate::state(RoomState::Paused)));
        self.notify(SessionNotice::Paused {
            reason: PauseReason::Local.message().to_string(),
        });
        Ok(true)
    }

    /// Only undoes a local pause
    pub fn resume_battle(&mut self, now_ms: u64) -> Result<bool, SessionError> {
        self.require_room()?;
        if self.pause_reason != Some(PauseReason::Local) || !self.clock.resume(now_ms) {
            return Ok(false);
        }
        self.pause_reason = None;
        self.outbox
            .push(Outbound::UpdateRoom(RoomUpdate::state(RoomState::Playing)));
        self.notify(SessionNotice::Resumed);
        Ok(true)
    }

    // --- timers ---

    /// 1 Hz clock callback
    pub fn tick_second(&mut self, now_ms: u64) {
        if self.phase != SessionPhase::Battle {
            return;
        }
        match self.clock.tick(now_ms) {
            Some(ClockEvent::CountdownTick(value)) => self.notify(SessionNotice::Countdown { value }),
            Some(ClockEvent::BattleStarted) => self.notify(SessionNotice::BattleStarted),
            Some(ClockEvent::Tick(seconds)) => {
                self.notify(SessionNotice::TimeRemaining {
                    seconds,
                    urgent: self.clock.is_urgent(),
                });
                if self.is_host() && self.clock.active_ticks() % TIMER_SYNC_EVERY_SECS == 0 {
                    self.publish(
                        EventPayload::TimerSync {
                            remaining_seconds: seconds,
                        },
                        now_ms,
                    );
                }
            }
            Some(ClockEvent::Finished) => {
                let winner = self.winner_id();
                self.conclude(winner, now_ms);
            }
            None => {}
        }
    }

    /// Heartbeat cadence: presence check plus a periodic board snapshot
    pub fn heartbeat_tick(&mut self, now_ms: u64) {
        if self.phase != SessionPhase::Battle {
            return;
        }
        self.check_opponent_presence(now_ms);
        if !matches!(self.clock.state(), BattleState::Active | BattleState::Paused) {
            return;
        }
        if let Some(snapshot) = self.duel.as_ref().map(|d| d.local.grid.snapshot()) {
            self.publish(
                EventPayload::BoardUpdate {
                    reason: BoardUpdateReason::Periodic,
                    snapshot,
                },
                now_ms,
            );
        }
    }

    /// Undo a due color wipe on the local board and tell the peer
    pub fn poll_restoration(&mut self, now_ms: u64) {
        if self.phase != SessionPhase::Battle {
            return;
        }
        let Some(duel) = self.duel.as_mut() else {
            return;
        };
        if !duel.local.poll_restoration(now_ms) {
            return;
        }
        let snapshot = duel.local.grid.snapshot();
        info!("Color wipe restored");
        self.publish(
            EventPayload::BoardUpdate {
                reason: BoardUpdateReason::Restoration,
                snapshot,
            },
            now_ms,
        );
        self.notify(SessionNotice::LocalBoardChanged);
    }

    // --- inbound ---

    /// Feed one delivery of the room record (None once deleted)
    pub fn on_room_update(&mut self, room: Option<Room>, now_ms: u64) {
        let Some(room) = room else {
            if self.phase != SessionPhase::RoomGone {
                warn!(player = %self.player_id, "Room no longer exists");
                if self.phase == SessionPhase::Battle {
                    self.clock.finish_externally(now_ms);
                }
                self.phase = SessionPhase::RoomGone;
                self.notify(SessionNotice::RoomGone);
            }
            return;
        };

        let state = room.state;
        let opponent_present = room.opponent_of(&self.player_id).is_some();
        self.room = Some(room.clone());
        self.notify(SessionNotice::RoomChanged { room });

        match self.phase {
            SessionPhase::Lobby if state == RoomState::Playing => self.start_battle(now_ms),
            SessionPhase::Battle if state == RoomState::Finished => self.finish_from_room(now_ms),
            SessionPhase::Battle if !opponent_present => {
                info!(player = %self.player_id, "Opponent left, winning by forfeit");
                self.clock.finish_now(now_ms);
                self.conclude(Some(self.player_id), now_ms);
            }
            SessionPhase::Battle => {
                self.follow_remote_pause(state, now_ms);
                self.check_opponent_presence(now_ms);
            }
            _ => {}
        }
    }

    /// Apply a feed delivery. Own events and already applied ones are skipped.
    pub fn apply_remote_events(&mut self, events: &[GameEvent], now_ms: u64) {
        for event in events {
            if event.actor_id == self.player_id || event.seq <= self.last_remote_seq {
                continue;
            }
            if self.duel.is_none() {
                if !self.early_events.iter().any(|e| e.seq == event.seq) {
                    self.early_events.push(event.clone());
                }
                continue;
            }
            if event.seq > self.last_remote_seq + 1 {
                warn!(
                    expected = self.last_remote_seq + 1,
                    received = event.seq,
                    "Gap in opponent events"
                );
                self.mirror_desynced = true;
            }
            self.last_remote_seq = event.seq;
            self.apply_remote(event, now_ms);
        }
    }

    fn apply_remote(&mut self, event: &GameEvent, now_ms: u64) {
        let is_host = self.is_host();
        let Some(duel) = self.duel.as_mut() else {
            return;
        };
        let mut notices = Vec::new();

        match &event.payload {
            EventPayload::Move {
                from,
                to,
                score,
                recovered,
                ..
            } => {
                let replayed = duel.mirror.replay(*from, *to, *recovered);
                if replayed.score != *score {
                    warn!(reported = score, replayed = replayed.score, "Mirror replay disagrees with opponent");
                    self.mirror_desynced = true;
                }
                if event.stats.is_none() {
                    self.clock.opponent.score += score;
                    self.clock.opponent.total_matches += 1;
                }
                notices.push(SessionNotice::OpponentBoardChanged);
            }
            EventPayload::Attack {
                attack, target_id, ..
            } => {
                if target_id == &self.player_id {
                    let effect = duel.local.receive(*attack, now_ms);
                    info!(attack = ?attack, ?effect, "Attack received");
                    notices.push(SessionNotice::AttackReceived { kind: *attack });
                    notices.push(SessionNotice::LocalBoardChanged);
                }
                if event.stats.is_none() {
                    self.clock.opponent.attacks_used += 1;
                }
            }
            EventPayload::BoardUpdate { reason, snapshot } => {
                if *reason == BoardUpdateReason::Restoration {
                    duel.mirror.grid.restore_pending();
                    notices.push(SessionNotice::OpponentBoardChanged);
                }
                if duel.mirror.grid.matches_snapshot(snapshot) {
                    self.mirror_desynced = false;
                } else if duel.mirror.grid.adopt(snapshot) {
                    warn!(reason = ?reason, "Mirror diverged, adopted opponent snapshot");
                    self.mirror_desynced = false;
                    notices.push(SessionNotice::MirrorResynced);
                    notices.push(SessionNotice::OpponentBoardChanged);
                }
            }
            EventPayload::TimerSync { remaining_seconds } => {
                if !is_host && self.clock.sync_remaining(*remaining_seconds) {
                    info!(remaining = remaining_seconds, "Timer corrected from host");
                }
            }
            EventPayload::ScoreUpdate { score } => {
                self.clock.opponent.score = *score;
            }
        }

        if let Some(stats) = event.stats {
            self.clock.opponent = stats;
        }
        for notice in notices {
            self.notify(notice);
        }
    }

    // --- lifecycle ---

    fn start_battle(&mut self, now_ms: u64) {
        let Some(room) = self.room.as_ref() else {
            return;
        };
        let Some(opponent_id) = room.opponent_of(&self.player_id).map(|p| p.id) else {
            warn!(room_id = %room.id, "Room is playing without an opponent");
            return;
        };
        let seed = room.seed;
        info!(room_id = %room.id, seed, opponent = %opponent_id, "Battle starting");

        self.duel = Some(Duel {
            local: PlayerBoard::new(board_seed(seed, &self.player_id)),
            mirror: PlayerBoard::new(board_seed(seed, &opponent_id)),
            opponent_id,
        });
        self.clock.reset();
        self.clock.start_countdown(now_ms);
        self.phase = SessionPhase::Battle;
        self.notify(SessionNotice::GameStarted { seed });
        if self.clock.can_make_move() {
            self.notify(SessionNotice::BattleStarted);
        }

        let mut early = std::mem::take(&mut self.early_events);
        early.sort_by_key(|e| e.seq);
        self.apply_remote_events(&early, now_ms);
    }

    fn follow_remote_pause(&mut self, state: RoomState, now_ms: u64) {
        match state {
            RoomState::Paused if self.clock.pause(now_ms) => {
                self.pause_reason = Some(PauseReason::OpponentPaused);
                self.notify(SessionNotice::Paused {
                    reason: PauseReason::OpponentPaused.message().to_string(),
                });
            }
            RoomState::Playing if self.pause_reason == Some(PauseReason::OpponentPaused) => {
                if self.clock.resume(now_ms) {
                    self.pause_reason = None;
                    self.notify(SessionNotice::Resumed);
                }
            }
            _ => {}
        }
    }

    fn check_opponent_presence(&mut self, now_ms: u64) {
        if self.phase != SessionPhase::Battle {
            return;
        }
        let Some(disconnected) = self
            .room
            .as_ref()
            .and_then(|room| room.opponent_of(&self.player_id))
            .map(|opponent| opponent.is_disconnected(now_ms))
        else {
            return;
        };
        if disconnected == self.opponent_disconnected {
            return;
        }
        self.opponent_disconnected = disconnected;

        if disconnected {
            warn!(player = %self.player_id, "Opponent disconnected");
            self.notify(SessionNotice::OpponentDisconnected);
            if self.clock.pause(now_ms) {
                self.pause_reason = Some(PauseReason::OpponentDisconnected);
                self.notify(SessionNotice::Paused {
                    reason: PauseReason::OpponentDisconnected.message().to_string(),
                });
            }
        } else {
            info!(player = %self.player_id, "Opponent reconnected");
            self.notify(SessionNotice::OpponentReconnected);
            if self.pause_reason == Some(PauseReason::OpponentDisconnected) && self.clock.resume(now_ms) {
                self.pause_reason = None;
                self.notify(SessionNotice::Resumed);
            }
        }
    }

    /// Our clock finished first (or the opponent forfeited): publish the verdict
    fn conclude(&mut self, winner: Option<PlayerId>, now_ms: u64) {
        self.phase = SessionPhase::Finished;
        self.pause_reason = None;

        let local = self.clock.local;
        self.publish(EventPayload::ScoreUpdate { score: local.score }, now_ms);

        let mut final_stats = BTreeMap::from([(self.player_id, local)]);
        if let Some(opponent_id) = self.opponent_id() {
            final_stats.insert(opponent_id, self.clock.opponent);
        }
        self.outbox.push(Outbound::UpdateRoom(RoomUpdate::finished(
            to_datetime(now_ms),
            winner,
            final_stats,
        )));

        let outcome = BattleOutcome::from_winner(winner, &self.player_id);
        self.verdict = Some(outcome);
        info!(player = %self.player_id, ?outcome, score = local.score, "Battle concluded");
        self.notify(SessionNotice::BattleFinished {
            outcome,
            local,
            opponent: self.clock.opponent,
        });
    }

    /// The peer finished first and wrote the verdict
    fn finish_from_room(&mut self, now_ms: u64) {
        let Some(room) = self.room.as_ref() else {
            return;
        };
        let reported = self
            .opponent_id()
            .and_then(|id| room.final_stats.as_ref()?.get(&id).copied());
        let outcome = BattleOutcome::from_winner(room.winner_id, &self.player_id);

        if let Some(stats) = reported {
            self.clock.opponent = stats;
        }
        self.clock.finish_externally(now_ms);
        self.phase = SessionPhase::Finished;
        self.pause_reason = None;
        self.verdict = Some(outcome);
        info!(player = %self.player_id, ?outcome, "Battle finished by peer");
        self.notify(SessionNotice::BattleFinished {
            outcome,
            local: self.clock.local,
            opponent: self.clock.opponent,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{Attack, Cell};
    use crate::replication::protocol::Player;
    use uuid::Uuid;

    const START_MS: u64 = 1_000_000;

    /// Two controllers wired through an in-test room and feed
    struct Table {
        room: Room,
        feed: Vec<GameEvent>,
        host: MultiplayerController,
        guest: MultiplayerController,
        now: u64,
    }

    impl Table {
        fn new(battle_seconds: u32, countdown_seconds: u32) -> Self {
            let (host_id, guest_id) = (Uuid::from_u128(1), Uuid::from_u128(2));
            let config = GameConfig {
                battle_seconds,
                countdown_seconds,
                ..GameConfig::default()
            };
            let mut room = Room {
                id: "424242".into(),
                code: Some("424242".into()),
                host_id,
                state: RoomState::Ready,
                seed: 42,
                ..Room::default()
            };
            for (id, is_host) in [(host_id, true), (guest_id, false)] {
                let mut player = Player::new(id, is_host, to_datetime(START_MS));
                player.is_ready = true;
                room.players.insert(id, player);
            }

            let mut table = Self {
                room,
                feed: Vec::new(),
                host: MultiplayerController::new(host_id, &config),
                guest: MultiplayerController::new(guest_id, &config),
                now: START_MS,
            };
            table.broadcast_room();
            table
        }

        fn broadcast_room(&mut self) {
            self.host.on_room_update(Some(self.room.clone()), self.now);
            self.guest.on_room_update(Some(self.room.clone()), self.now);
        }

        fn deliver_feed(&mut self) {
            let start = self.feed.len().saturating_sub(crate::store::FEED_WINDOW);
            let window = self.feed[start..].to_vec();
            self.host.apply_remote_events(&window, self.now);
            self.guest.apply_remote_events(&window, self.now);
        }

        /// Flush both outboxes until nothing new is produced
        fn pump(&mut self) {
            loop {
                let outbound: Vec<Outbound> = self
                    .host
                    .take_outbox()
                    .into_iter()
                    .chain(self.guest.take_outbox())
                    .collect();
                if outbound.is_empty() {
                    return;
                }
                let mut room_changed = false;
                for out in outbound {
                    match out {
                        Outbound::Publish(event) => self.feed.push(event),
                        Outbound::UpdateRoom(update) => {
                            if self.room.state != RoomState::Finished {
                                self.room.apply(&update);
                                room_changed = true;
                            }
                        }
                    }
                }
                self.deliver_feed();
                if room_changed {
                    self.broadcast_room();
                }
            }
        }

        fn heartbeat_both(&mut self) {
            for player in self.room.players.values_mut() {
                player.last_seen = Some(to_datetime(self.now));
            }
            self.broadcast_room();
        }

        fn tick(&mut self) {
            self.now += 1_000;
            self.host.tick_second(self.now);
            self.guest.tick_second(self.now);
            self.pump();
        }

        fn started(battle_seconds: u32) -> Self {
            let mut table = Self::new(battle_seconds, 0);
            assert!(table.host.start_game(table.now).unwrap());
            table.pump();
            table
        }
    }

    fn first_legal_move(board: &PlayerBoard) -> (Position, Position) {
        board.grid.legal_moves()[0]
    }

    fn drain(rx: &mut broadcast::Receiver<SessionNotice>) -> Vec<SessionNotice> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[test]
    fn actions_without_a_room_are_fatal() {
        let mut controller = MultiplayerController::new(Uuid::new_v4(), &GameConfig::default());
        assert!(matches!(
            controller.make_move(Position::new(0, 0), Position::new(0, 1), 0),
            Err(SessionError::NotInitialized)
        ));
        assert!(matches!(controller.use_attack(0, 0), Err(SessionError::NotInitialized)));
        assert!(matches!(controller.start_game(0), Err(SessionError::NotInitialized)));
    }

    #[test]
    fn only_the_host_starts_a_ready_room() {
        let mut table = Table::new(90, 3);
        assert!(!table.guest.start_game(table.now).unwrap());

        table.room.players.values_mut().for_each(|p| p.is_ready = false);
        table.broadcast_room();
        assert!(!table.host.start_game(table.now).unwrap());

        table.room.players.values_mut().for_each(|p| p.is_ready = true);
        table.broadcast_room();
        assert!(table.host.start_game(table.now).unwrap());
        table.pump();

        assert_eq!(table.room.state, RoomState::Playing);
        assert_eq!(table.host.phase(), SessionPhase::Battle);
        assert_eq!(table.guest.phase(), SessionPhase::Battle);
        assert_eq!(table.host.clock().state(), BattleState::Countdown);
    }

    #[test]
    fn both_peers_derive_the_same_boards_from_the_room_seed() {
        let table = Table::started(90);
        assert_eq!(
            table.host.local_board().unwrap().grid.snapshot(),
            table.guest.opponent_board().unwrap().grid.snapshot()
        );
        assert_eq!(
            table.guest.local_board().unwrap().grid.snapshot(),
            table.host.opponent_board().unwrap().grid.snapshot()
        );
        assert_ne!(
            table.host.local_board().unwrap().grid.snapshot(),
            table.guest.local_board().unwrap().grid.snapshot()
        );
    }

    #[test]
    fn moves_are_rejected_during_countdown() {
        let mut table = Table::new(90, 3);
        table.host.start_game(table.now).unwrap();
        table.pump();
        let (a, b) = first_legal_move(table.host.local_board().unwrap());
        let outcome = table.host.make_move(a, b, table.now).unwrap();
        assert!(!outcome.is_scoring());
        assert!(table.host.take_outbox().is_empty());

        for _ in 0..3 {
            table.tick();
        }
        assert!(table.host.clock().can_make_move());
    }

    #[test]
    fn local_move_is_mirrored_on_the_peer() {
        let mut table = Table::started(90);
        let (a, b) = first_legal_move(table.host.local_board().unwrap());
        let outcome = table.host.make_move(a, b, table.now).unwrap();
        assert!(outcome.is_scoring());
        table.pump();

        assert_eq!(
            table.host.local_board().unwrap().grid.snapshot(),
            table.guest.opponent_board().unwrap().grid.snapshot()
        );
        assert_eq!(table.guest.clock().opponent.score, outcome.score);
        assert_eq!(table.host.clock().local.score, outcome.score);
        assert!(!table.guest.is_mirror_desynced());
    }

    #[test]
    fn redelivered_events_apply_once() {
        let mut table = Table::started(90);
        let (a, b) = first_legal_move(table.host.local_board().unwrap());
        table.host.make_move(a, b, table.now).unwrap();
        table.pump();
        let mirror = table.guest.opponent_board().unwrap().grid.snapshot();

        table.deliver_feed();
        table.deliver_feed();
        assert_eq!(table.guest.opponent_board().unwrap().grid.snapshot(), mirror);
    }

    #[test]
    fn cast_attack_hits_the_target_and_the_casters_mirror_alike() {
        let mut table = Table::started(90);
        table
            .host
            .duel
            .as_mut()
            .unwrap()
            .local
            .grant(Attack::new(AttackKind::RowBlocker, 0));
        let mut rx = table.guest.subscribe();

        assert_eq!(table.host.use_attack(0, table.now).unwrap(), Some(AttackKind::RowBlocker));
        assert_eq!(table.host.use_attack(0, table.now).unwrap(), None);
        table.pump();

        let target = table.guest.local_board().unwrap();
        assert!(target.grid.blocked_count() >= 4);
        assert_eq!(target.grid.snapshot(), table.host.opponent_board().unwrap().grid.snapshot());
        assert_eq!(table.host.clock().local.attacks_used, 1);
        assert_eq!(table.guest.clock().opponent.attacks_used, 1);
        assert!(drain(&mut rx).contains(&SessionNotice::AttackReceived {
            kind: AttackKind::RowBlocker
        }));
    }

    #[test]
    fn snapshot_resyncs_a_diverged_mirror() {
        let mut table = Table::started(90);
        let mut rx = table.guest.subscribe();
        table
            .guest
            .duel
            .as_mut()
            .unwrap()
            .mirror
            .grid
            .set(Position::new(3, 3), Cell::Blocked);

        table.host.heartbeat_tick(table.now);
        table.pump();

        assert_eq!(
            table.host.local_board().unwrap().grid.snapshot(),
            table.guest.opponent_board().unwrap().grid.snapshot()
        );
        assert!(drain(&mut rx).contains(&SessionNotice::MirrorResynced));
    }

    #[test]
    fn late_color_wipe_delivery_does_not_count_as_divergence() {
        let mut table = Table::started(90);
        table
            .host
            .duel
            .as_mut()
            .unwrap()
            .local
            .grant(Attack::new(AttackKind::ColorWipe, 0));
        let mut rx = table.host.subscribe();

        assert_eq!(table.host.use_attack(0, table.now).unwrap(), Some(AttackKind::ColorWipe));
        table.now += 300;
        table.pump();

        let target = table.guest.local_board().unwrap().grid.snapshot();
        let mirror = table.host.opponent_board().unwrap().grid.snapshot();
        assert_eq!(target.cells, mirror.cells);
        assert_ne!(
            target.pending_restore.as_ref().map(|r| r.due_at_ms),
            mirror.pending_restore.as_ref().map(|r| r.due_at_ms)
        );

        table.guest.heartbeat_tick(table.now);
        table.pump();

        assert!(!drain(&mut rx).contains(&SessionNotice::MirrorResynced));
        assert!(!table.host.is_mirror_desynced());
    }

    #[test]
    fn events_before_the_start_are_held_until_boards_exist() {
        let mut table = Table::new(90, 0);
        assert!(table.host.start_game(table.now).unwrap());
        for out in table.host.take_outbox() {
            if let Outbound::UpdateRoom(update) = out {
                table.room.apply(&update);
            }
        }
        // Only the host learns the room is playing
        table.host.on_room_update(Some(table.room.clone()), table.now);
        let (a, b) = first_legal_move(table.host.local_board().unwrap());
        table.host.make_move(a, b, table.now).unwrap();
        for out in table.host.take_outbox() {
            if let Outbound::Publish(event) = out {
                table.feed.push(event);
            }
        }
        table.deliver_feed();
        assert!(table.guest.opponent_board().is_none());

        table.guest.on_room_update(Some(table.room.clone()), table.now);
        assert_eq!(
            table.host.local_board().unwrap().grid.snapshot(),
            table.guest.opponent_board().unwrap().grid.snapshot()
        );
    }

    #[test]
    fn pause_propagates_through_the_room() {
        let mut table = Table::started(90);
        let mut rx = table.guest.subscribe();
        assert!(table.host.pause_battle(table.now).unwrap());
        table.pump();

        assert_eq!(table.room.state, RoomState::Paused);
        assert_eq!(table.guest.clock().state(), BattleState::Paused);
        assert_eq!(table.guest.pause_reason(), Some(PauseReason::OpponentPaused));
        assert!(drain(&mut rx).contains(&SessionNotice::Paused {
            reason: "Opponent paused the game".into()
        }));
        // The guest cannot lift someone else's pause
        assert!(!table.guest.resume_battle(table.now).unwrap());

        table.tick();
        assert_eq!(table.host.clock().remaining_seconds(), 90);

        assert!(table.host.resume_battle(table.now).unwrap());
        table.pump();
        assert_eq!(table.guest.clock().state(), BattleState::Active);
        assert_eq!(table.guest.pause_reason(), None);
    }

    #[test]
    fn silent_opponent_pauses_then_resumes_the_clock() {
        let mut table = Table::started(90);
        let mut rx = table.host.subscribe();
        table.now += 11_000;
        table.host.heartbeat_tick(table.now);
        assert!(table.host.is_opponent_disconnected());
        assert_eq!(table.host.pause_reason(), Some(PauseReason::OpponentDisconnected));
        assert_eq!(table.host.clock().state(), BattleState::Paused);

        table.heartbeat_both();
        assert!(!table.host.is_opponent_disconnected());
        assert_eq!(table.host.clock().state(), BattleState::Active);
        let notices = drain(&mut rx);
        assert!(notices.contains(&SessionNotice::OpponentDisconnected));
        assert!(notices.contains(&SessionNotice::OpponentReconnected));
        assert!(notices.contains(&SessionNotice::Resumed));
    }

    #[test]
    fn host_timer_corrects_a_drifting_guest() {
        let mut table = Table::started(90);
        for _ in 0..5 {
            table.now += 1_000;
            table.host.tick_second(table.now);
        }
        for _ in 0..5 {
            table.tick();
        }
        assert_eq!(table.host.clock().remaining_seconds(), 80);
        assert_eq!(table.guest.clock().remaining_seconds(), 80);
    }

    #[test]
    fn finish_is_written_once_and_both_agree() {
        let mut table = Table::started(3);
        let (a, b) = first_legal_move(table.host.local_board().unwrap());
        let scored = table.host.make_move(a, b, table.now).unwrap();
        table.pump();
        let mut rx = table.guest.subscribe();

        for _ in 0..3 {
            table.tick();
        }

        assert_eq!(table.room.state, RoomState::Finished);
        assert_eq!(table.room.winner_id, Some(table.host.player_id()));
        assert_eq!(table.host.phase(), SessionPhase::Finished);
        assert_eq!(table.guest.phase(), SessionPhase::Finished);
        assert_eq!(table.guest.clock().opponent.score, scored.score);
        assert_eq!(table.host.view().outcome, Some(BattleOutcome::Won));
        assert_eq!(table.guest.view().outcome, Some(BattleOutcome::Lost));

        let finished = drain(&mut rx)
            .into_iter()
            .filter(|n| matches!(n, SessionNotice::BattleFinished { .. }))
            .count();
        assert_eq!(finished, 1);
    }

    #[test]
    fn opponent_leaving_mid_battle_is_a_forfeit_win() {
        let mut table = Table::started(90);
        let guest_id = table.guest.player_id();
        table.room.players.remove(&guest_id);
        table.host.on_room_update(Some(table.room.clone()), table.now);

        assert_eq!(table.host.phase(), SessionPhase::Finished);
        assert_eq!(table.host.view().outcome, Some(BattleOutcome::Won));
        let writes = table.host.take_outbox();
        assert!(writes.iter().any(|out| matches!(
            out,
            Outbound::UpdateRoom(RoomUpdate { state: RoomState::Finished, winner_id: Some(id), .. })
                if *id == table.host.player_id()
        )));
    }

    #[test]
    fn deleted_room_ends_the_session() {
        let mut table = Table::started(90);
        let mut rx = table.host.subscribe();
        table.host.on_room_update(None, table.now);
        assert_eq!(table.host.phase(), SessionPhase::RoomGone);
        assert!(table.host.phase().is_terminal());
        assert_eq!(drain(&mut rx), vec![SessionNotice::RoomGone]);
    }

    #[test]
    fn sequence_gap_flags_the_mirror_until_a_snapshot_arrives() {
        let mut table = Table::started(90);
        for _ in 0..2 {
            let (a, b) = first_legal_move(table.host.local_board().unwrap());
            table.host.make_move(a, b, table.now).unwrap();
        }
        let events: Vec<GameEvent> = table
            .host
            .take_outbox()
            .into_iter()
            .filter_map(|out| match out {
                Outbound::Publish(event) => Some(event),
                Outbound::UpdateRoom(_) => None,
            })
            .collect();
        assert_eq!(events.len(), 2);

        table.guest.apply_remote_events(&events[1..], table.now);
        assert!(table.guest.is_mirror_desynced());

        table.host.heartbeat_tick(table.now);
        table.pump();
        assert!(!table.guest.is_mirror_desynced());
        assert_eq!(
            table.host.local_board().unwrap().grid.snapshot(),
            table.guest.opponent_board().unwrap().grid.snapshot()
        );
    }
}
