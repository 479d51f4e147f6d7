//! Practice match - the local board against the scripted opponent

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::ai::{AiAction, AiOpponent};
use super::attack::AttackKind;
use super::board::PlayerBoard;
use super::clock::{BattleClock, ClockEvent};
use super::grid::{Position, TurnOutcome};
use crate::app::notice::{BattleOutcome, MatchView, SessionNotice};
use crate::config::GameConfig;
use crate::util::time::{Clock, CLOCK_TICK, RESTORATION_POLL};

const NOTICE_CAPACITY: usize = 256;
const COMMAND_BUFFER: usize = 32;

/// Player input for a running practice match
#[derive(Debug)]
pub enum PracticeCommand {
    MakeMove {
        from: Position,
        to: Position,
        reply: oneshot::Sender<TurnOutcome>,
    },
    UseAttack {
        slot: usize,
        reply: oneshot::Sender<Option<AttackKind>>,
    },
    Inspect {
        reply: oneshot::Sender<MatchView>,
    },
    Quit,
}

pub struct PracticeMatch {
    seed: u64,
    player: PlayerBoard,
    opponent: PlayerBoard,
    ai: AiOpponent,
    clock: BattleClock,
    /// When the opponent acts next
    ai_due_ms: Option<u64>,
    notices: broadcast::Sender<SessionNotice>,
}

impl PracticeMatch {
    pub fn new(seed: u64, config: &GameConfig) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            seed,
            player: PlayerBoard::new(seed),
            opponent: PlayerBoard::new(seed.rotate_left(21) ^ 0x9e37_79b9),
            ai: AiOpponent::new(seed.rotate_left(42), config.ai_min_delay_ms, config.ai_max_delay_ms),
            clock: BattleClock::from_config(config),
            ai_due_ms: None,
            notices,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    pub fn clock(&self) -> &BattleClock {
        &self.clock
    }

    pub fn player(&self) -> &PlayerBoard {
        &self.player
    }

    pub fn opponent(&self) -> &PlayerBoard {
        &self.opponent
    }

    pub fn view(&self) -> MatchView {
        MatchView::new(&self.clock, Some(&self.player), Some(&self.opponent))
    }

    pub fn outcome(&self) -> Option<BattleOutcome> {
        self.clock
            .is_finished()
            .then(|| BattleOutcome::from_side(self.clock.winner()))
    }

    fn notify(&self, notice: SessionNotice) {
        let _ = self.notices.send(notice);
    }

    fn schedule_ai(&mut self, now_ms: u64) {
        let delay = self.ai.next_delay().as_millis() as u64;
        self.ai_due_ms = Some(now_ms + delay);
    }

    pub fn start(&mut self, now_ms: u64) -> bool {
        if !self.clock.start_countdown(now_ms) {
            return false;
        }
        info!(seed = self.seed, "Practice match starting");
        self.notify(SessionNotice::GameStarted { seed: self.seed });
        if self.clock.can_make_move() {
            self.notify(SessionNotice::BattleStarted);
            self.schedule_ai(now_ms);
        }
        true
    }

    pub fn make_move(&mut self, from: Position, to: Position, now_ms: u64) -> TurnOutcome {
        if !self.clock.can_make_move() {
            return TurnOutcome::rejected();
        }
        let result = self.player.play(from, to, now_ms);
        if !result.outcome.is_scoring() {
            return result.outcome;
        }
        self.clock.local.record_turn(&result.outcome);
        if result.recovered {
            self.notify(SessionNotice::BoardRecovered);
        }
        if let (Some(kind), Some(slot)) = (result.earned, result.slot) {
            self.clock.local.attacks_earned += 1;
            self.notify(SessionNotice::AttackEarned { kind, slot });
        }
        self.notify(SessionNotice::LocalBoardChanged);
        result.outcome
    }

    pub fn use_attack(&mut self, slot: usize, now_ms: u64) -> Option<AttackKind> {
        if !self.clock.can_make_move() {
            return None;
        }
        let attack = self.player.take_attack(slot)?;
        let effect = self.opponent.receive(attack.kind, now_ms);
        self.clock.local.attacks_used += 1;
        debug!(attack = ?attack.kind, ?effect, "Attack cast at practice opponent");
        self.notify(SessionNotice::OpponentBoardChanged);
        Some(attack.kind)
    }

    /// 1 Hz clock callback
    pub fn tick_second(&mut self, now_ms: u64) -> Option<ClockEvent> {
        let event = self.clock.tick(now_ms)?;
        match event {
            ClockEvent::CountdownTick(value) => self.notify(SessionNotice::Countdown { value }),
            ClockEvent::BattleStarted => {
                self.notify(SessionNotice::BattleStarted);
                self.schedule_ai(now_ms);
            }
            ClockEvent::Tick(seconds) => self.notify(SessionNotice::TimeRemaining {
                seconds,
                urgent: self.clock.is_urgent(),
            }),
            ClockEvent::Finished => {
                self.ai_due_ms = None;
                let outcome = BattleOutcome::from_side(self.clock.winner());
                info!(?outcome, score = self.clock.local.score, "Practice match finished");
                self.notify(SessionNotice::BattleFinished {
                    outcome,
                    local: self.clock.local,
                    opponent: self.clock.opponent,
                });
            }
        }
        Some(event)
    }

    /// Restoration timers for both boards plus the opponent's turn when due
    pub fn poll(&mut self, now_ms: u64) -> Option<AiAction> {
        if self.player.poll_restoration(now_ms) {
            self.notify(SessionNotice::LocalBoardChanged);
        }
        if self.opponent.poll_restoration(now_ms) {
            self.notify(SessionNotice::OpponentBoardChanged);
        }
        match self.ai_due_ms {
            Some(due) if now_ms >= due && self.clock.can_make_move() => {
                let action = self.ai_turn(now_ms);
                self.schedule_ai(now_ms);
                Some(action)
            }
            _ => None,
        }
    }

    fn ai_turn(&mut self, now_ms: u64) -> AiAction {
        let action = self.ai.decide(&self.opponent.grid, self.opponent.inventory());
        match action {
            AiAction::Swap(a, b) => {
                let result = self.opponent.play(a, b, now_ms);
                self.clock.opponent.record_turn(&result.outcome);
                if result.earned.is_some() {
                    self.clock.opponent.attacks_earned += 1;
                }
                self.notify(SessionNotice::OpponentBoardChanged);
            }
            AiAction::Attack(slot) => {
                if let Some(attack) = self.opponent.take_attack(slot) {
                    let effect = self.player.receive(attack.kind, now_ms);
                    self.clock.opponent.attacks_used += 1;
                    debug!(attack = ?attack.kind, ?effect, "Practice opponent attacked");
                    self.notify(SessionNotice::AttackReceived { kind: attack.kind });
                    self.notify(SessionNotice::LocalBoardChanged);
                }
            }
            AiAction::Wait => debug!("Practice opponent has no move"),
        }
        action
    }

    /// Drive the match on real timers until time runs out or the player quits
    pub fn spawn(
        self,
        clock: Arc<dyn Clock>,
    ) -> (mpsc::Sender<PracticeCommand>, tokio::task::JoinHandle<MatchView>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        (tx, tokio::spawn(self.run(clock, rx)))
    }

    pub async fn run(
        mut self,
        clock: Arc<dyn Clock>,
        mut commands: mpsc::Receiver<PracticeCommand>,
    ) -> MatchView {
        let start = Instant::now();
        let mut clock_tick = interval_at(start + CLOCK_TICK, CLOCK_TICK);
        let mut poll = interval_at(start + RESTORATION_POLL, RESTORATION_POLL);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.start(clock.now_millis());

        while !self.clock.is_finished() {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(PracticeCommand::MakeMove { from, to, reply }) => {
                        let _ = reply.send(self.make_move(from, to, clock.now_millis()));
                    }
                    Some(PracticeCommand::UseAttack { slot, reply }) => {
                        let _ = reply.send(self.use_attack(slot, clock.now_millis()));
                    }
                    Some(PracticeCommand::Inspect { reply }) => {
                        let _ = reply.send(self.view());
                    }
                    Some(PracticeCommand::Quit) | None => break,
                },
                _ = clock_tick.tick() => {
                    self.tick_second(clock.now_millis());
                }
                _ = poll.tick() => {
                    self.poll(clock.now_millis());
                }
            }
        }
        self.view()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::attack::Attack;
    use crate::game::BattleState;
    use crate::util::time::SystemClock;

    fn config(battle_seconds: u32, countdown_seconds: u32) -> GameConfig {
        GameConfig {
            battle_seconds,
            countdown_seconds,
            ai_min_delay_ms: 1_000,
            ai_max_delay_ms: 2_000,
            ..GameConfig::default()
        }
    }

    #[test]
    fn countdown_gates_both_sides() {
        let mut practice = PracticeMatch::new(3, &config(90, 3));
        assert!(practice.start(0));
        assert!(!practice.start(0));
        let (a, b) = practice.player().grid.legal_moves()[0];
        assert!(!practice.make_move(a, b, 0).is_scoring());
        assert_eq!(practice.poll(10_000), None);

        for t in 1..=3 {
            practice.tick_second(t * 1_000);
        }
        assert_eq!(practice.clock().state(), BattleState::Active);
        assert!(practice.make_move(a, b, 3_000).is_scoring());
    }

    #[test]
    fn opponent_acts_on_its_cadence() {
        let mut practice = PracticeMatch::new(8, &config(90, 0));
        practice.start(0);
        assert_eq!(practice.poll(500), None);

        let action = practice.poll(2_000);
        assert!(matches!(action, Some(AiAction::Swap(..))));
        assert!(practice.clock().opponent.score > 0);
        assert_eq!(practice.poll(2_100), None);
    }

    #[test]
    fn player_attack_lands_on_the_opponent() {
        let mut practice = PracticeMatch::new(4, &config(90, 0));
        practice.start(0);
        practice.player.grant(Attack::new(AttackKind::BlockBomb, 0));

        assert_eq!(practice.use_attack(0, 100), Some(AttackKind::BlockBomb));
        assert!(practice.opponent().grid.blocked_count() >= 1);
        assert_eq!(practice.clock().local.attacks_used, 1);
        assert_eq!(practice.use_attack(0, 200), None);
    }

    #[test]
    fn opponent_casts_ready_attacks_at_the_player() {
        let mut practice = PracticeMatch::new(4, &config(90, 0));
        practice.start(0);
        practice.opponent.grant(Attack::new(AttackKind::RowBlocker, 0));
        let mut rx = practice.subscribe();

        assert_eq!(practice.poll(5_000), Some(AiAction::Attack(0)));
        assert!(practice.player().grid.blocked_count() >= 4);
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionNotice::AttackReceived {
                kind: AttackKind::RowBlocker
            }
        );
    }

    #[test]
    fn finish_reports_a_verdict_once() {
        let mut practice = PracticeMatch::new(6, &config(2, 0));
        practice.start(0);
        let (a, b) = practice.player().grid.legal_moves()[0];
        practice.make_move(a, b, 100);
        let mut rx = practice.subscribe();

        for t in 1..=5 {
            practice.tick_second(t * 1_000);
        }
        assert_eq!(practice.outcome(), Some(BattleOutcome::Won));
        let finished: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|n| matches!(n, SessionNotice::BattleFinished { .. }))
            .collect();
        assert_eq!(finished.len(), 1);
    }

    #[tokio::test]
    async fn spawned_match_runs_to_completion() {
        let practice = PracticeMatch::new(12, &config(1, 0));
        let (commands, task) = practice.spawn(Arc::new(SystemClock));

        let (reply, view) = oneshot::channel();
        commands.send(PracticeCommand::Inspect { reply }).await.unwrap();
        assert_eq!(view.await.unwrap().state, BattleState::Active);

        let finished = tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(finished.is_finished());
        assert!(finished.outcome.is_some());
    }
}
