//! Attacks - inventory slots and the board effects they apply to the target

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::grid::{Cell, GemColor, GemGrid, PendingRestore, Position, RESTORE_DELAY_MS};

/// Number of attack slots per player
pub const INVENTORY_SLOTS: usize = 3;

/// Attack kinds, weakest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackKind {
    /// Drops 1-2 blockers anywhere
    BlockBomb,
    /// Blocks 4-5 cells of one row
    RowBlocker,
    /// Clears one color for a while
    ColorWipe,
}

/// An earned attack waiting in a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attack {
    pub kind: AttackKind,
    pub created_at_ms: u64,
}

impl Attack {
    pub fn new(kind: AttackKind, created_at_ms: u64) -> Self {
        Self {
            kind,
            created_at_ms,
        }
    }
}

/// What an attack did to the target board
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttackEffect {
    Blocked(Vec<Position>),
    Wiped { color: GemColor, cleared: usize },
    /// ColorWipe on a board with no playable gems
    Fizzled,
}

impl AttackKind {
    /// Apply this attack to the target's board, drawing from its random stream
    pub fn apply(self, target: &mut GemGrid, now_ms: u64) -> AttackEffect {
        let effect = match self {
            AttackKind::BlockBomb => {
                let open: Vec<Position> = target
                    .positions()
                    .filter(|&pos| !target.get(pos).is_blocked())
                    .collect();
                let count = target.roll(1..=2);
                let chosen = target.sample(&open, count);
                for &pos in &chosen {
                    target.set(pos, Cell::Blocked);
                }
                AttackEffect::Blocked(chosen)
            }
            AttackKind::RowBlocker => {
                let size = target.size();
                let row = target.roll(0..=size - 1);
                let count = target.roll(4..=5);
                let columns: Vec<usize> = (0..size).collect();
                let chosen: Vec<Position> = target
                    .sample(&columns, count)
                    .into_iter()
                    .map(|col| Position::new(row, col))
                    .collect();
                for &pos in &chosen {
                    target.set(pos, Cell::Blocked);
                }
                AttackEffect::Blocked(chosen)
            }
            AttackKind::ColorWipe => color_wipe(target, now_ms),
        };

        debug!(attack = ?self, effect = ?effect, "Attack applied");
        effect
    }
}

fn color_wipe(target: &mut GemGrid, now_ms: u64) -> AttackEffect {
    let present: Vec<GemColor> = GemColor::ALL
        .into_iter()
        .filter(|&color| target.cells().contains(&Cell::Gem(color)))
        .collect();
    if present.is_empty() {
        return AttackEffect::Fizzled;
    }

    let color = present[target.roll(0..=present.len() - 1)];
    let positions: Vec<Position> = target
        .positions()
        .filter(|&pos| target.get(pos) == Cell::Gem(color))
        .collect();
    for &pos in &positions {
        target.set(pos, Cell::Empty);
    }

    let cleared = positions.len();
    target.schedule_restore(PendingRestore {
        color,
        positions,
        due_at_ms: now_ms + RESTORE_DELAY_MS,
    });
    AttackEffect::Wiped { color, cleared }
}

/// Fixed three-slot attack inventory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttackInventory {
    slots: [Option<Attack>; INVENTORY_SLOTS],
    /// Next slot to overwrite once every slot is full
    cursor: usize,
}

impl AttackInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a published slot layout
    pub fn from_slots(slots: [Option<Attack>; INVENTORY_SLOTS]) -> Self {
        Self { slots, cursor: 0 }
    }

    /// Store an attack, returning the slot it landed in
    pub fn add(&mut self, attack: Attack) -> usize {
        if let Some(slot) = self.slots.iter().position(Option::is_none) {
            self.slots[slot] = Some(attack);
            return slot;
        }

        let slot = self.cursor;
        self.slots[slot] = Some(attack);
        self.cursor = (self.cursor + 1) % INVENTORY_SLOTS;
        slot
    }

    /// Take the attack out of `slot`; empty or out-of-range slots yield nothing
    pub fn use_slot(&mut self, slot: usize) -> Option<Attack> {
        self.slots.get_mut(slot).and_then(Option::take)
    }

    pub fn slots(&self) -> &[Option<Attack>; INVENTORY_SLOTS] {
        &self.slots
    }

    /// Lowest filled slot
    pub fn first_filled(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_some)
    }

    pub fn count(&self) -> usize {
        self.slots.iter().flatten().count()
    }
}
