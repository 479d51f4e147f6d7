//! Gem grid - match detection, removal, gravity and refill

use std::collections::BTreeSet;

use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Standard board size (8x8)
pub const BOARD_SIZE: usize = 8;
/// Shortest run that counts as a match
pub const MIN_MATCH: usize = 3;
/// Points per cleared gem
pub const BASE_SCORE: u32 = 100;
/// Extra points per gem beyond `MIN_MATCH` in one removal
pub const BONUS_PER_EXTRA: u32 = 50;
/// Applied to every cascade pass after the first
pub const CASCADE_MULTIPLIER: u32 = 2;
/// Delay before a wiped color is put back
pub const RESTORE_DELAY_MS: u64 = 8_000;

const MAX_INIT_PASSES: usize = 100;

/// Playable gem colors
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GemColor {
    Red,
    Blue,
    Green,
    Yellow,
    Purple,
    Orange,
}

impl GemColor {
    pub const ALL: [GemColor; 6] = [
        GemColor::Red,
        GemColor::Blue,
        GemColor::Green,
        GemColor::Yellow,
        GemColor::Purple,
        GemColor::Orange,
    ];

    fn random(rng: &mut ChaCha8Rng) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }
}

/// A single board cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "color", rename_all = "snake_case")]
pub enum Cell {
    #[default]
    Empty,
    Gem(GemColor),
    Blocked,
}

impl Cell {
    pub fn color(self) -> Option<GemColor> {
        match self {
            Cell::Gem(color) => Some(color),
            _ => None,
        }
    }

    pub fn is_empty(self) -> bool {
        self == Cell::Empty
    }

    pub fn is_blocked(self) -> bool {
        self == Cell::Blocked
    }
}

/// Board coordinate, 0-indexed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub row: usize,
    pub col: usize,
}

impl Position {
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

/// Result of a full-board match scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchScan {
    /// Every position that sits in a run of `MIN_MATCH` or more
    pub positions: BTreeSet<Position>,
    /// Longest matching run in either orientation
    pub largest_run: usize,
}

impl MatchScan {
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// What a swap produced once the board came to rest
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnOutcome {
    pub score: u32,
    /// Most positions cleared in a single pass
    pub largest_match: usize,
    /// Longest straight run seen in any pass
    pub largest_run: usize,
    /// Score of each pass, multiplier included
    pub pass_scores: Vec<u32>,
}

impl TurnOutcome {
    pub fn rejected() -> Self {
        Self::default()
    }

    pub fn is_scoring(&self) -> bool {
        self.score > 0
    }

    /// Number of resolve passes, 1 for a plain match
    pub fn passes(&self) -> u32 {
        self.pass_scores.len() as u32
    }
}

/// A color wipe waiting to be undone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRestore {
    pub color: GemColor,
    pub positions: Vec<Position>,
    pub due_at_ms: u64,
}

/// Full board state for resync over the wire
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardSnapshot {
    pub size: usize,
    pub cells: Vec<Cell>,
    /// Position in the board's random stream
    pub rng_word_pos: u64,
    pub pending_restore: Option<PendingRestore>,
}

/// Fixed-size grid with its own seeded random stream
#[derive(Debug, Clone)]
pub struct GemGrid {
    size: usize,
    cells: Vec<Cell>,
    rng: ChaCha8Rng,
    pending_restore: Option<PendingRestore>,
}

impl GemGrid {
    /// Create and initialize a standard board
    pub fn new(seed: u64) -> Self {
        Self::with_size(BOARD_SIZE, seed)
    }

    pub fn with_size(size: usize, seed: u64) -> Self {
        let mut grid = Self {
            size,
            cells: vec![Cell::Empty; size * size],
            rng: ChaCha8Rng::seed_from_u64(seed),
            pending_restore: None,
        };
        grid.initialize();
        grid
    }

    /// Build a grid from an explicit row-major layout (no initialization pass)
    pub fn from_cells(size: usize, cells: Vec<Cell>, seed: u64) -> Option<Self> {
        if size == 0 || cells.len() != size * size {
            return None;
        }
        Some(Self {
            size,
            cells,
            rng: ChaCha8Rng::seed_from_u64(seed),
            pending_restore: None,
        })
    }

    /// Fill with random gems, then reroll matched cells until the board is quiet
    pub fn initialize(&mut self) {
        self.pending_restore = None;
        for i in 0..self.cells.len() {
            self.cells[i] = Cell::Gem(GemColor::random(&mut self.rng));
        }

        for _ in 0..MAX_INIT_PASSES {
            let scan = self.find_matches();
            if scan.is_empty() {
                return;
            }
            for pos in scan.positions {
                let color = GemColor::random(&mut self.rng);
                self.set(pos, Cell::Gem(color));
            }
        }

        debug!("Initial board kept with residual matches after reroll cap");
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn in_bounds(&self, pos: Position) -> bool {
        pos.row < self.size && pos.col < self.size
    }

    fn index(&self, pos: Position) -> usize {
        pos.row * self.size + pos.col
    }

    /// Cell at `pos`, out-of-bounds reads as Empty
    pub fn get(&self, pos: Position) -> Cell {
        if self.in_bounds(pos) {
            self.cells[self.index(pos)]
        } else {
            Cell::Empty
        }
    }

    pub fn set(&mut self, pos: Position, cell: Cell) {
        if self.in_bounds(pos) {
            let idx = self.index(pos);
            self.cells[idx] = cell;
        }
    }

    /// All positions in row-major order
    pub fn positions(&self) -> impl Iterator<Item = Position> {
        let size = self.size;
        (0..size * size).map(move |i| Position::new(i / size, i % size))
    }

    pub fn blocked_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_blocked()).count()
    }

    pub fn empty_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_empty()).count()
    }

    pub fn find_matches(&self) -> MatchScan {
        scan_matches(&self.cells, self.size)
    }

    /// Clear `positions` and any blocker touching them, returning the score
    pub fn remove(&mut self, positions: &BTreeSet<Position>) -> u32 {
        if positions.is_empty() {
            return 0;
        }

        let count = positions.len();
        let extra = count.saturating_sub(MIN_MATCH) as u32;
        let score = count as u32 * BASE_SCORE + extra * BONUS_PER_EXTRA;

        for &pos in positions {
            self.set(pos, Cell::Empty);
        }

        let freed: Vec<Position> = positions
            .iter()
            .flat_map(|&pos| self.neighbors(pos))
            .filter(|&n| self.get(n).is_blocked())
            .collect();
        for pos in freed {
            self.set(pos, Cell::Empty);
        }

        score
    }

    /// Orthogonal neighbors only
    pub fn are_adjacent(a: Position, b: Position) -> bool {
        a.row.abs_diff(b.row) + a.col.abs_diff(b.col) == 1
    }

    fn neighbors(&self, pos: Position) -> impl Iterator<Item = Position> + '_ {
        let Position { row, col } = pos;
        [
            row.checked_sub(1).map(|r| Position::new(r, col)),
            Some(Position::new(row + 1, col)),
            col.checked_sub(1).map(|c| Position::new(row, c)),
            Some(Position::new(row, col + 1)),
        ]
        .into_iter()
        .flatten()
        .filter(move |&p| self.in_bounds(p))
    }

    /// Exchange two cells; blocked cells never move. Returns whether a swap happened.
    pub fn swap(&mut self, a: Position, b: Position) -> bool {
        if !self.in_bounds(a) || !self.in_bounds(b) {
            return false;
        }
        if self.get(a).is_blocked() || self.get(b).is_blocked() {
            return false;
        }
        let (ia, ib) = (self.index(a), self.index(b));
        self.cells.swap(ia, ib);
        true
    }

    /// Gravity then refill. Returns whether any cell changed.
    pub fn settle(&mut self) -> bool {
        let mut changed = false;

        for col in 0..self.size {
            let column: Vec<Cell> = (0..self.size)
                .map(|row| self.get(Position::new(row, col)))
                .filter(|c| !c.is_empty())
                .collect();
            let gap = self.size - column.len();
            for row in 0..self.size {
                let next = if row < gap { Cell::Empty } else { column[row - gap] };
                let pos = Position::new(row, col);
                if self.get(pos) != next {
                    self.set(pos, next);
                    changed = true;
                }
            }
        }

        for col in 0..self.size {
            for row in 0..self.size {
                let pos = Position::new(row, col);
                if self.get(pos).is_empty() {
                    let color = GemColor::random(&mut self.rng);
                    self.set(pos, Cell::Gem(color));
                    changed = true;
                }
            }
        }

        changed
    }

    /// Swap, then resolve matches until the board is quiet
    pub fn process_turn(&mut self, a: Position, b: Position) -> TurnOutcome {
        if !Self::are_adjacent(a, b) || !self.swap(a, b) {
            return TurnOutcome::rejected();
        }

        let mut scan = self.find_matches();
        if scan.is_empty() {
            self.swap(a, b);
            return TurnOutcome::rejected();
        }

        let mut outcome = TurnOutcome::default();
        while !scan.is_empty() {
            let mut pass_score = self.remove(&scan.positions);
            if !outcome.pass_scores.is_empty() {
                pass_score *= CASCADE_MULTIPLIER;
            }
            outcome.score += pass_score;
            outcome.pass_scores.push(pass_score);
            outcome.largest_match = outcome.largest_match.max(scan.positions.len());
            outcome.largest_run = outcome.largest_run.max(scan.largest_run);

            self.settle();
            scan = self.find_matches();
        }

        debug!(
            score = outcome.score,
            passes = outcome.passes(),
            largest_match = outcome.largest_match,
            "Turn resolved"
        );
        outcome
    }

    /// Every swap that would produce a match, in row-major order
    pub fn legal_moves(&self) -> Vec<(Position, Position)> {
        let mut moves = Vec::new();
        let mut trial = self.cells.clone();
        for a in self.positions() {
            for b in [Position::new(a.row, a.col + 1), Position::new(a.row + 1, a.col)] {
                if self.swap_matches(&mut trial, a, b) {
                    moves.push((a, b));
                }
            }
        }
        moves
    }

    /// Brute-force check for any matching swap
    pub fn has_possible_move(&self) -> bool {
        let mut trial = self.cells.clone();
        self.positions().any(|a| {
            [Position::new(a.row, a.col + 1), Position::new(a.row + 1, a.col)]
                .into_iter()
                .any(|b| self.swap_matches(&mut trial, a, b))
        })
    }

    fn swap_matches(&self, trial: &mut [Cell], a: Position, b: Position) -> bool {
        if !self.in_bounds(b) || self.get(a).is_blocked() || self.get(b).is_blocked() {
            return false;
        }
        let (ia, ib) = (self.index(a), self.index(b));
        trial.swap(ia, ib);
        let hit = !scan_matches(trial, self.size).is_empty();
        trial.swap(ia, ib);
        hit
    }

    /// Turn every blocker back into an empty cell, returning how many were cleared
    pub fn clear_blocked(&mut self) -> usize {
        let mut cleared = 0;
        for cell in self.cells.iter_mut().filter(|c| c.is_blocked()) {
            *cell = Cell::Empty;
            cleared += 1;
        }
        cleared
    }

    /// Uniform roll from the board's random stream
    pub fn roll(&mut self, range: std::ops::RangeInclusive<usize>) -> usize {
        self.rng.gen_range(range)
    }

    /// Pick up to `amount` distinct entries from `candidates`
    pub fn sample<T: Copy>(&mut self, candidates: &[T], amount: usize) -> Vec<T> {
        let amount = amount.min(candidates.len());
        sample(&mut self.rng, candidates.len(), amount)
            .into_iter()
            .map(|i| candidates[i])
            .collect()
    }

    pub fn pending_restore(&self) -> Option<&PendingRestore> {
        self.pending_restore.as_ref()
    }

    /// Replace any pending restoration with `restore`
    pub fn schedule_restore(&mut self, restore: PendingRestore) {
        self.pending_restore = Some(restore);
    }

    /// Restore a due color wipe. Returns whether one fired.
    pub fn poll_restoration(&mut self, now_ms: u64) -> bool {
        match &self.pending_restore {
            Some(pending) if now_ms >= pending.due_at_ms => self.restore_pending(),
            _ => false,
        }
    }

    /// Put the wiped color back into cells that are still empty, then settle
    pub fn restore_pending(&mut self) -> bool {
        let Some(pending) = self.pending_restore.take() else {
            return false;
        };
        for pos in pending.positions {
            if self.get(pos).is_empty() {
                self.set(pos, Cell::Gem(pending.color));
            }
        }
        self.settle();
        true
    }

    pub fn snapshot(&self) -> BoardSnapshot {
        BoardSnapshot {
            size: self.size,
            cells: self.cells.clone(),
            rng_word_pos: u64::try_from(self.rng.get_word_pos()).unwrap_or(u64::MAX),
            pending_restore: self.pending_restore.clone(),
        }
    }

    /// Same cells, same position in the random stream and the same wipe pending.
    /// Restore deadlines come from each peer's own clock and are not compared.
    pub fn matches_snapshot(&self, snapshot: &BoardSnapshot) -> bool {
        let same_restore = match (&self.pending_restore, &snapshot.pending_restore) {
            (None, None) => true,
            (Some(ours), Some(theirs)) => {
                ours.color == theirs.color && ours.positions == theirs.positions
            }
            _ => false,
        };
        self.size == snapshot.size
            && self.cells == snapshot.cells
            && u64::try_from(self.rng.get_word_pos()).unwrap_or(u64::MAX) == snapshot.rng_word_pos
            && same_restore
    }

    /// Take over a peer's board state. Rejects snapshots of the wrong shape.
    pub fn adopt(&mut self, snapshot: &BoardSnapshot) -> bool {
        if snapshot.size != self.size || snapshot.cells.len() != self.cells.len() {
            return false;
        }
        self.cells.clone_from(&snapshot.cells);
        self.rng.set_word_pos(u128::from(snapshot.rng_word_pos));
        self.pending_restore.clone_from(&snapshot.pending_restore);
        true
    }
}

fn scan_matches(cells: &[Cell], size: usize) -> MatchScan {
    let mut scan = MatchScan::default();
    let at = |row: usize, col: usize| cells[row * size + col];

    for line in 0..size {
        for horizontal in [true, false] {
            let cell = |i: usize| if horizontal { at(line, i) } else { at(i, line) };
            let pos = |i: usize| {
                if horizontal {
                    Position::new(line, i)
                } else {
                    Position::new(i, line)
                }
            };

            let mut start = 0;
            for i in 1..=size {
                if i < size && cell(i).color().is_some() && cell(i).color() == cell(start).color() {
                    continue;
                }
                let len = i - start;
                if len >= MIN_MATCH && cell(start).color().is_some() {
                    scan.positions.extend((start..i).map(&pos));
                    scan.largest_run = scan.largest_run.max(len);
                }
                start = i;
            }
        }
    }

    scan
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use GemColor::*;

    /// No two orthogonal neighbors share a color
    pub(crate) fn quiet_cells() -> Vec<Cell> {
        (0..BOARD_SIZE * BOARD_SIZE)
            .map(|i| {
                let (row, col) = (i / BOARD_SIZE, i % BOARD_SIZE);
                Cell::Gem(GemColor::ALL[(row + 2 * col) % GemColor::ALL.len()])
            })
            .collect()
    }

    pub(crate) fn quiet_grid(seed: u64) -> GemGrid {
        GemGrid::from_cells(BOARD_SIZE, quiet_cells(), seed).unwrap()
    }

    fn p(row: usize, col: usize) -> Position {
        Position::new(row, col)
    }

    #[test]
    fn quiet_layout_has_no_matches() {
        assert!(quiet_grid(1).find_matches().is_empty());
    }

    #[test]
    fn initialized_boards_have_no_matches() {
        for seed in 0..50 {
            let grid = GemGrid::new(seed);
            assert!(grid.find_matches().is_empty(), "seed {seed} left a match");
            assert_eq!(grid.empty_count(), 0);
            assert_eq!(grid.blocked_count(), 0);
        }
    }

    #[test]
    fn same_seed_builds_same_board() {
        assert_eq!(GemGrid::new(99).cells(), GemGrid::new(99).cells());
    }

    #[test]
    fn horizontal_and_vertical_runs_are_found() {
        let mut grid = quiet_grid(1);
        grid.set(p(0, 0), Cell::Gem(Blue));
        grid.set(p(0, 1), Cell::Gem(Blue));
        grid.set(p(0, 2), Cell::Gem(Blue));
        grid.set(p(0, 3), Cell::Gem(Blue));

        let scan = grid.find_matches();
        assert_eq!(scan.positions.len(), 4);
        assert_eq!(scan.largest_run, 4);

        let mut grid = quiet_grid(1);
        grid.set(p(3, 5), Cell::Gem(Yellow));
        grid.set(p(4, 5), Cell::Gem(Yellow));
        grid.set(p(5, 5), Cell::Gem(Yellow));
        let scan = grid.find_matches();
        assert_eq!(
            scan.positions.into_iter().collect::<Vec<_>>(),
            vec![p(3, 5), p(4, 5), p(5, 5)]
        );
    }

    #[test]
    fn blocked_cell_breaks_a_run() {
        let mut grid = quiet_grid(1);
        grid.set(p(0, 0), Cell::Gem(Blue));
        grid.set(p(0, 1), Cell::Gem(Blue));
        grid.set(p(0, 2), Cell::Blocked);
        grid.set(p(0, 3), Cell::Gem(Blue));
        assert!(grid.find_matches().is_empty());
    }

    #[test]
    fn remove_scores_three_and_five_runs() {
        let mut grid = quiet_grid(1);
        let three: BTreeSet<_> = (0..3).map(|c| p(0, c)).collect();
        assert_eq!(grid.remove(&three), 3 * BASE_SCORE);

        let five: BTreeSet<_> = (0..5).map(|c| p(2, c)).collect();
        assert_eq!(grid.remove(&five), 5 * BASE_SCORE + 2 * BONUS_PER_EXTRA);
        assert_eq!(grid.empty_count(), 8);
    }

    #[test]
    fn remove_frees_adjacent_blockers() {
        let mut grid = quiet_grid(1);
        grid.set(p(1, 1), Cell::Blocked);
        grid.set(p(5, 5), Cell::Blocked);
        let cleared: BTreeSet<_> = (0..3).map(|c| p(0, c)).collect();
        grid.remove(&cleared);
        assert_eq!(grid.get(p(1, 1)), Cell::Empty);
        assert_eq!(grid.get(p(5, 5)), Cell::Blocked);
    }

    #[test]
    fn adjacency_is_orthogonal_only() {
        assert!(GemGrid::are_adjacent(p(2, 2), p(2, 3)));
        assert!(GemGrid::are_adjacent(p(2, 2), p(1, 2)));
        assert!(!GemGrid::are_adjacent(p(2, 2), p(3, 3)));
        assert!(!GemGrid::are_adjacent(p(2, 2), p(2, 4)));
        assert!(!GemGrid::are_adjacent(p(2, 2), p(2, 2)));
    }

    #[test]
    fn swap_refuses_blocked_cells() {
        let mut grid = quiet_grid(1);
        grid.set(p(0, 1), Cell::Blocked);
        let before = grid.cells().to_vec();
        assert!(!grid.swap(p(0, 0), p(0, 1)));
        assert_eq!(grid.cells(), &before[..]);
        assert!(grid.swap(p(0, 0), p(1, 0)));
        assert_eq!(grid.get(p(1, 0)), before[0]);
    }

    #[test]
    fn settle_drops_blockers_and_refills() {
        let mut grid = quiet_grid(3);
        grid.set(p(0, 0), Cell::Blocked);
        grid.set(p(6, 0), Cell::Empty);
        grid.set(p(7, 0), Cell::Empty);
        let above = grid.get(p(5, 0));

        assert!(grid.settle());
        assert_eq!(grid.get(p(7, 0)), above);
        assert_eq!(grid.get(p(2, 0)), Cell::Blocked);
        assert_eq!(grid.empty_count(), 0);
        assert!(!grid.settle());
    }

    #[test]
    fn settle_leaves_no_empty_cells() {
        let mut grid = GemGrid::new(11);
        for col in 0..BOARD_SIZE {
            grid.set(p(col, col), Cell::Empty);
            grid.set(p(0, col), Cell::Empty);
        }
        grid.settle();
        assert_eq!(grid.empty_count(), 0);
    }

    /// Row 0 reads R R G Y with an R under the G
    fn scenario_grid() -> GemGrid {
        let mut grid = quiet_grid(5);
        grid.set(p(0, 0), Cell::Gem(Red));
        grid.set(p(0, 1), Cell::Gem(Red));
        grid.set(p(0, 2), Cell::Gem(Green));
        grid.set(p(0, 3), Cell::Gem(Yellow));
        grid.set(p(1, 2), Cell::Gem(Red));
        assert!(grid.find_matches().is_empty());
        grid
    }

    #[test]
    fn completing_a_row_scores_three_hundred() {
        let mut grid = scenario_grid();
        let outcome = grid.process_turn(p(0, 2), p(1, 2));
        assert!(outcome.is_scoring());
        assert_eq!(outcome.pass_scores[0], 300);
        assert_eq!(outcome.largest_match, 3);
        assert!(outcome.passes() >= 1);
        assert_eq!(outcome.score, outcome.pass_scores.iter().sum::<u32>());
        assert_eq!(grid.get(p(1, 2)), Cell::Gem(Green));
        assert!(grid.find_matches().is_empty());
        assert_eq!(grid.empty_count(), 0);
    }

    #[test]
    fn non_adjacent_swap_is_rejected_without_change() {
        let mut grid = scenario_grid();
        let before = grid.snapshot();
        assert_eq!(grid.process_turn(p(0, 2), p(2, 2)), TurnOutcome::rejected());
        assert_eq!(grid.process_turn(p(0, 0), p(1, 1)), TurnOutcome::rejected());
        assert_eq!(grid.snapshot(), before);
    }

    #[test]
    fn non_matching_swap_reverts() {
        let mut grid = quiet_grid(1);
        let before = grid.snapshot();
        for _ in 0..3 {
            assert_eq!(grid.process_turn(p(4, 4), p(4, 5)).score, 0);
        }
        assert_eq!(grid.snapshot(), before);
    }

    #[test]
    fn legal_moves_agree_with_has_possible_move() {
        let grid = scenario_grid();
        assert!(grid.has_possible_move());
        assert!(grid.legal_moves().contains(&(p(0, 2), p(1, 2))));
        assert!(!quiet_grid(1).has_possible_move());
        assert!(quiet_grid(1).legal_moves().is_empty());
    }

    #[test]
    fn restoration_refills_still_empty_cells() {
        let mut grid = quiet_grid(2);
        let blues: Vec<Position> = grid
            .positions()
            .filter(|&pos| grid.get(pos) == Cell::Gem(Blue))
            .collect();
        for &pos in &blues {
            grid.set(pos, Cell::Empty);
        }
        grid.schedule_restore(PendingRestore {
            color: Blue,
            positions: blues.clone(),
            due_at_ms: 8_000,
        });

        assert!(!grid.poll_restoration(7_999));
        assert!(grid.poll_restoration(8_000));
        for pos in blues {
            assert_eq!(grid.get(pos), Cell::Gem(Blue));
        }
        assert!(grid.pending_restore().is_none());
        assert_eq!(grid.empty_count(), 0);
    }

    #[test]
    fn snapshot_adoption_syncs_future_refills() {
        let mut owner = GemGrid::new(21);
        let mut mirror = GemGrid::new(21);
        mirror.set(p(3, 3), Cell::Empty);
        mirror.settle();
        owner.set(p(0, 0), Cell::Empty);
        assert!(mirror.adopt(&owner.snapshot()));
        assert!(mirror.matches_snapshot(&owner.snapshot()));

        owner.settle();
        mirror.settle();
        assert_eq!(owner.cells(), mirror.cells());

        let small = GemGrid::with_size(4, 1);
        assert!(!mirror.adopt(&small.snapshot()));
    }

    #[test]
    fn snapshot_comparison_ignores_restore_deadline() {
        let mut owner = quiet_grid(4);
        let mut mirror = quiet_grid(4);
        let wiped = vec![p(0, 0), p(3, 3)];
        owner.schedule_restore(PendingRestore {
            color: Red,
            positions: wiped.clone(),
            due_at_ms: 8_000,
        });
        mirror.schedule_restore(PendingRestore {
            color: Red,
            positions: wiped,
            due_at_ms: 8_300,
        });
        assert!(mirror.matches_snapshot(&owner.snapshot()));

        mirror.schedule_restore(PendingRestore {
            color: Blue,
            positions: vec![p(0, 0), p(3, 3)],
            due_at_ms: 8_000,
        });
        assert!(!mirror.matches_snapshot(&owner.snapshot()));
    }

    #[test]
    fn cascade_passes_score_double() {
        // Swapping (6,0)<->(7,0) clears a red row at the bottom; the purples
        // above it drop beside the purple at (7,3) and match again.
        let mut grid = quiet_grid(9);
        grid.set(p(6, 0), Cell::Gem(Red));
        grid.set(p(6, 1), Cell::Gem(Purple));
        grid.set(p(6, 2), Cell::Gem(Purple));
        grid.set(p(7, 0), Cell::Gem(Blue));
        grid.set(p(7, 1), Cell::Gem(Red));
        grid.set(p(7, 2), Cell::Gem(Red));
        grid.set(p(7, 3), Cell::Gem(Purple));
        assert!(grid.find_matches().is_empty());

        let mut replay = grid.clone();
        assert!(replay.swap(p(6, 0), p(7, 0)));
        let first = replay.find_matches();
        replay.remove(&first.positions);
        replay.settle();
        let second = replay.find_matches();
        assert!(second.positions.contains(&p(7, 1)));
        assert!(second.positions.contains(&p(7, 2)));
        assert!(second.positions.contains(&p(7, 3)));

        let outcome = grid.process_turn(p(6, 0), p(7, 0));
        assert!(outcome.passes() >= 2);
        assert_eq!(outcome.pass_scores[0], 3 * BASE_SCORE);

        let n = second.positions.len() as u32;
        let unmultiplied = n * BASE_SCORE + (n - MIN_MATCH as u32) * BONUS_PER_EXTRA;
        assert_eq!(outcome.pass_scores[1], CASCADE_MULTIPLIER * unmultiplied);
        assert_eq!(outcome.pass_scores[1], 2 * unmultiplied);
        assert_eq!(outcome.score, outcome.pass_scores.iter().sum::<u32>());
    }

    #[test]
    fn from_cells_rejects_wrong_length() {
        assert!(GemGrid::from_cells(8, vec![Cell::Empty; 10], 0).is_none());
    }
}
