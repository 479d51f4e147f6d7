//! A player's board - grid plus the combo economy that rides on it

use tracing::{debug, info};

use super::attack::{Attack, AttackEffect, AttackInventory, AttackKind};
use super::combo::ComboTracker;
use super::grid::{GemGrid, Position, TurnOutcome};

/// Result of a local move after the economy has seen it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MoveResult {
    pub outcome: TurnOutcome,
    /// Attack granted by this move
    pub earned: Option<AttackKind>,
    /// Inventory slot the earned attack went into
    pub slot: Option<usize>,
    /// Board recovery ran instead of earning
    pub recovered: bool,
}

/// Grid, combo tracker and attack inventory owned by one player
#[derive(Debug, Clone)]
pub struct PlayerBoard {
    pub grid: GemGrid,
    combo: ComboTracker,
    inventory: AttackInventory,
}

impl PlayerBoard {
    pub fn new(seed: u64) -> Self {
        Self::from_grid(GemGrid::new(seed))
    }

    pub fn from_grid(grid: GemGrid) -> Self {
        Self {
            grid,
            combo: ComboTracker::new(),
            inventory: AttackInventory::new(),
        }
    }

    pub fn inventory(&self) -> &AttackInventory {
        &self.inventory
    }

    pub fn combo(&self) -> &ComboTracker {
        &self.combo
    }

    /// Resolve a swap on an owned board and run the economy over it
    pub fn play(&mut self, a: Position, b: Position, now_ms: u64) -> MoveResult {
        let outcome = self.grid.process_turn(a, b);
        if !outcome.is_scoring() {
            return MoveResult::default();
        }

        self.combo.record(outcome.largest_match, now_ms);

        if self.combo.check_for_board_recovery() {
            let cleared = self.recover();
            info!(cleared, "Board recovery triggered");
            return MoveResult {
                outcome,
                earned: None,
                slot: None,
                recovered: true,
            };
        }

        let earned = self.combo.check_for_earned_attack();
        let slot = earned.map(|kind| {
            let slot = self.grant(Attack::new(kind, now_ms));
            debug!(attack = ?kind, slot, "Attack earned");
            slot
        });

        MoveResult {
            outcome,
            earned,
            slot,
            recovered: false,
        }
    }

    /// Re-run a peer's move on a mirrored board, recovering when the owner did
    pub fn replay(&mut self, a: Position, b: Position, recovered: bool) -> TurnOutcome {
        let outcome = self.grid.process_turn(a, b);
        if recovered {
            self.recover();
        }
        outcome
    }

    /// Clear every blocker, settle and start the combo window over
    pub fn recover(&mut self) -> usize {
        let cleared = self.grid.clear_blocked();
        self.grid.settle();
        self.combo.reset();
        cleared
    }

    /// Put an attack into the inventory, returning its slot
    pub fn grant(&mut self, attack: Attack) -> usize {
        self.inventory.add(attack)
    }

    /// Take an attack out of the inventory
    pub fn take_attack(&mut self, slot: usize) -> Option<Attack> {
        self.inventory.use_slot(slot)
    }

    /// Suffer an attack cast by the other side
    pub fn receive(&mut self, kind: AttackKind, now_ms: u64) -> AttackEffect {
        kind.apply(&mut self.grid, now_ms)
    }

    pub fn poll_restoration(&mut self, now_ms: u64) -> bool {
        self.grid.poll_restoration(now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::grid::tests::quiet_cells;
    use crate::game::grid::{Cell, GemColor, BOARD_SIZE};

    fn p(row: usize, col: usize) -> Position {
        Position::new(row, col)
    }

    /// Quiet board with a swap at (0,2)<->(1,2) completing a red row
    fn primed_board(seed: u64) -> PlayerBoard {
        let mut cells = quiet_cells();
        cells[1] = Cell::Gem(GemColor::Red);
        cells[2] = Cell::Gem(GemColor::Green);
        cells[3] = Cell::Gem(GemColor::Yellow);
        cells[BOARD_SIZE + 2] = Cell::Gem(GemColor::Red);
        PlayerBoard::from_grid(GemGrid::from_cells(BOARD_SIZE, cells, seed).unwrap())
    }

    #[test]
    fn rejected_move_touches_nothing() {
        let mut board = primed_board(1);
        let result = board.play(p(0, 0), p(5, 5), 0);
        assert_eq!(result, MoveResult::default());
        assert_eq!(board.combo().combos_in_last(20_000), 0);
    }

    #[test]
    fn scoring_move_feeds_the_combo_window() {
        let mut board = primed_board(1);
        let result = board.play(p(0, 2), p(1, 2), 1_000);
        assert!(result.outcome.is_scoring());
        assert!(!result.recovered);
        assert_eq!(board.combo().combos_in_last(20_000), 1);
    }

    #[test]
    fn sixth_quick_match_recovers_instead_of_earning() {
        let mut board = primed_board(1);
        board.grid.set(p(6, 6), Cell::Blocked);
        board.grid.set(p(7, 7), Cell::Blocked);
        for i in 0..5u64 {
            board.combo.record(3, i * 2_000);
            board.combo.check_for_earned_attack();
        }
        let inventory_before = board.inventory().clone();

        let result = board.play(p(0, 2), p(1, 2), 10_000);
        assert!(result.recovered);
        assert_eq!(result.earned, None);
        assert_eq!(board.grid.blocked_count(), 0);
        assert_eq!(board.grid.empty_count(), 0);
        assert_eq!(board.inventory(), &inventory_before);
        assert_eq!(board.combo().combos_in_last(20_000), 0);
    }

    #[test]
    fn mirror_replay_matches_owner() {
        let mut owner = primed_board(77);
        let mut mirror = primed_board(77);
        let played = owner.play(p(0, 2), p(1, 2), 0);
        let replayed = mirror.replay(p(0, 2), p(1, 2), played.recovered);
        assert_eq!(played.outcome, replayed);
        assert_eq!(owner.grid.snapshot(), mirror.grid.snapshot());
    }

    #[test]
    fn received_attack_lands_on_own_grid() {
        let mut board = primed_board(5);
        board.receive(AttackKind::BlockBomb, 0);
        assert!(board.grid.blocked_count() >= 1);
    }
}
