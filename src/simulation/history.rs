// simulation/history.rs
// Fixed-capacity ring of serialized integration states with scrub lookup.

use serde::{Deserialize, Serialize};

use crate::config::HistoryConfig;
use crate::engine::PhysicsEngine;
use crate::profile_scope;

pub const BYTES_PER_SCALAR: usize = std::mem::size_of::<f64>();

/// Number of entries a ring may hold for states of `state_size` scalars.
/// Never less than one.
pub fn history_capacity(state_size: usize, limits: &HistoryConfig) -> usize {
    let entry_bytes = state_size.max(1).saturating_mul(BYTES_PER_SCALAR);
    (limits.byte_budget / entry_bytes)
        .min(limits.max_entries)
        .max(1)
}

/// Serializable copy of a ring, see [`crate::io`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryArchive {
    pub state_size: usize,
    pub capacity: usize,
    pub cursor: usize,
    pub entries: Vec<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct HistoryBuffer {
    limits: HistoryConfig,
    entries: Vec<f64>,
    /// Scalars per entry.
    state_size: usize,
    /// Entries in the ring; zero until initialized.
    capacity: usize,
    /// Slot of the most recently written entry.
    cursor: usize,
    /// Steps behind `cursor` currently installed in the live state.
    scrub_offset: i64,
}

impl HistoryBuffer {
    pub fn new(limits: HistoryConfig) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    /// Size the ring for `model` and fill every slot with `state`.
    /// Discards any previous contents.
    pub fn initialize<E: PhysicsEngine>(&mut self, engine: &E, model: &E::Model, state: &E::State) {
        let state_size = engine.integration_state_size(model);
        let capacity = history_capacity(state_size, &self.limits);

        self.entries.clear();
        self.entries.resize(capacity * state_size, 0.0);
        self.state_size = state_size;
        self.capacity = capacity;
        self.cursor = 0;
        self.scrub_offset = 0;

        if state_size == 0 {
            return;
        }
        engine.get_integration_state(model, state, &mut self.entries[..state_size]);
        for slot in 1..capacity {
            self.entries.copy_within(0..state_size, slot * state_size);
        }
    }

    /// Record `state` in the slot after the cursor. Does nothing before
    /// `initialize`.
    pub fn append<E: PhysicsEngine>(&mut self, engine: &E, model: &E::Model, state: &E::State) {
        if self.capacity == 0 {
            return;
        }
        profile_scope!("history_append");
        self.cursor = (self.cursor + 1) % self.capacity;
        let start = self.cursor * self.state_size;
        engine.get_integration_state(model, state, &mut self.entries[start..start + self.state_size]);
    }

    /// Slot index `offset` steps behind the cursor. Offsets of any sign and
    /// magnitude wrap around the ring.
    pub fn effective_index(&self, offset: i64) -> Option<usize> {
        if self.capacity == 0 {
            return None;
        }
        let n = self.capacity as i64;
        let i = (self.cursor as i64 - offset % n) % n;
        Some(((i + n) % n) as usize)
    }

    /// Read-only view of the entry `offset` steps behind the cursor.
    pub fn entry(&self, offset: i64) -> Option<&[f64]> {
        let i = self.effective_index(offset)?;
        let start = i * self.state_size;
        Some(&self.entries[start..start + self.state_size])
    }

    /// Overwrite the integration fields of `state` with the entry `offset`
    /// steps back. Derived quantities are left stale; callers run the
    /// engine's forward pass afterwards. Returns false before `initialize`.
    pub fn load_scrub_state<E: PhysicsEngine>(
        &self,
        engine: &E,
        model: &E::Model,
        state: &mut E::State,
        offset: i64,
    ) -> bool {
        match self.entry(offset) {
            Some(entry) => {
                engine.set_integration_state(model, state, entry);
                true
            }
            None => false,
        }
    }

    /// Make the scrubbed entry the newest one: the cursor moves onto it, the
    /// entries that were ahead of it become the oldest and get overwritten
    /// first, and the scrub offset returns to zero.
    pub fn rebase_to_scrub(&mut self) {
        if let Some(i) = self.effective_index(self.scrub_offset) {
            self.cursor = i;
        }
        self.scrub_offset = 0;
    }

    pub fn clear(&mut self) {
        self.entries = Vec::new();
        self.state_size = 0;
        self.capacity = 0;
        self.cursor = 0;
        self.scrub_offset = 0;
    }

    pub fn size(&self) -> usize {
        self.capacity
    }

    pub fn is_initialized(&self) -> bool {
        self.capacity > 0
    }

    pub fn state_size(&self) -> usize {
        self.state_size
    }

    pub fn scrub_offset(&self) -> i64 {
        self.scrub_offset
    }

    pub fn set_scrub_offset(&mut self, offset: i64) {
        self.scrub_offset = offset;
    }

    pub fn to_archive(&self) -> Option<HistoryArchive> {
        if !self.is_initialized() {
            return None;
        }
        Some(HistoryArchive {
            state_size: self.state_size,
            capacity: self.capacity,
            cursor: self.cursor,
            entries: self.entries.clone(),
        })
    }

    /// Replace the ring with archived contents. The archive's capacity wins
    /// over the configured limits so no entry is lost.
    pub fn restore(&mut self, archive: HistoryArchive) -> Result<(), String> {
        if archive.capacity == 0 {
            return Err("archive holds no entries".into());
        }
        if archive.cursor >= archive.capacity {
            return Err(format!(
                "cursor {} outside a ring of {} entries",
                archive.cursor, archive.capacity
            ));
        }
        if archive.state_size == 0 {
            return Err("archive entries hold no scalars".into());
        }
        let expected = archive
            .capacity
            .checked_mul(archive.state_size)
            .ok_or_else(|| String::from("capacity overflows"))?;
        if archive.entries.len() != expected {
            return Err(format!(
                "expected {} scalars, found {}",
                expected,
                archive.entries.len()
            ));
        }
        self.entries = archive.entries;
        self.state_size = archive.state_size;
        self.capacity = archive.capacity;
        self.cursor = archive.cursor;
        self.scrub_offset = 0;
        Ok(())
    }
}
