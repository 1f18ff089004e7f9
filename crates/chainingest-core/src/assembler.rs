//! Block assembler: folds key/value pairs into complete records.
//!
//! ```text
//!            tracked pair
//!   Idle ───────────────────▶ Accumulating ──┐ tracked pair
//!    ▲                            │  ▲───────┘
//!    │  end key + complete        │
//!    └────────────────────────────┘  (emit, reset, re-seed sticky)
//!    ▲  start key                 │
//!    └────────────────────────────┘  (drop incomplete, re-seed sticky)
//! ```
//!
//! Sticky fields (e.g. `epoch_number`) are remembered across resets and
//! re-seeded into every new block until a newer value arrives. Re-seeded
//! values do not move the machine out of `Idle`.

use std::collections::{BTreeMap, HashSet};

use crate::config::BlockProfile;
use crate::kv::KvPair;
use crate::record::RawFields;

/// Assembler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// Nothing applied since the last reset.
    Idle,
    /// At least one tracked field applied to the pending block.
    Accumulating,
}

/// Per-stream block assembler. Owned by exactly one stream loop.
#[derive(Debug, Clone)]
pub struct BlockAssembler {
    required: Vec<String>,
    tracked: HashSet<String>,
    sticky_fields: Vec<String>,
    start_key: Option<String>,
    end_key: Option<String>,
    pending: RawFields,
    sticky: BTreeMap<String, String>,
    state: BlockState,
}

impl BlockAssembler {
    pub fn new(profile: &BlockProfile) -> Self {
        let tracked = profile
            .required_fields
            .iter()
            .chain(&profile.sticky_fields)
            .chain(&profile.tracked_fields)
            .cloned()
            .collect();
        Self {
            required: profile.required_fields.clone(),
            tracked,
            sticky_fields: profile.sticky_fields.clone(),
            start_key: profile.block_start_key.clone(),
            end_key: profile.block_end_key.clone(),
            pending: RawFields::new(),
            sticky: BTreeMap::new(),
            state: BlockState::Idle,
        }
    }

    pub fn state(&self) -> BlockState {
        self.state
    }

    /// The in-progress block, sticky re-seeds included.
    pub fn pending(&self) -> &RawFields {
        &self.pending
    }

    /// Last remembered value of every sticky field seen so far.
    pub fn sticky_values(&self) -> &BTreeMap<String, String> {
        &self.sticky
    }

    /// Restore sticky values from a checkpoint. Unknown names are ignored.
    pub fn restore_sticky(&mut self, values: BTreeMap<String, String>) {
        self.sticky = values
            .into_iter()
            .filter(|(k, _)| self.sticky_fields.contains(k))
            .collect();
        if self.state == BlockState::Idle {
            self.reseed_missing();
        }
    }

    /// Restore a half-assembled block saved with a checkpoint. The machine
    /// resumes in `Accumulating`; an empty block leaves it untouched.
    pub fn restore_pending(&mut self, block: RawFields) {
        if block.is_empty() {
            return;
        }
        self.pending = block;
        self.state = BlockState::Accumulating;
    }

    /// Feed one pair. Returns the completed block when this pair finishes one.
    pub fn push(&mut self, pair: KvPair) -> Option<RawFields> {
        let KvPair { key, value } = pair;

        if self.start_key.as_deref() == Some(key.as_str()) && self.state == BlockState::Accumulating {
            tracing::debug!(
                key = %key,
                fields = self.pending.len(),
                "block start before completion, dropping pending block"
            );
            self.reset();
        }

        let applied = self.tracked.contains(&key);
        if applied {
            if self.sticky_fields.contains(&key) {
                self.sticky.insert(key.clone(), value.clone());
            }
            self.pending.insert(key.clone(), value);
            self.state = BlockState::Accumulating;
        }

        match self.end_key.as_deref() {
            Some(end) if end == key => {
                self.reseed_missing();
                self.try_emit()
            }
            Some(_) => None,
            None if applied => self.try_emit(),
            None => None,
        }
    }

    /// Drop the pending block. Sticky values survive.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.state = BlockState::Idle;
        self.reseed_missing();
    }

    fn reseed_missing(&mut self) {
        for (k, v) in &self.sticky {
            if !self.pending.contains_key(k) {
                self.pending.insert(k.clone(), v.clone());
            }
        }
    }

    fn is_complete(&self) -> bool {
        self.required.iter().all(|f| self.pending.contains_key(f))
    }

    fn try_emit(&mut self) -> Option<RawFields> {
        if self.state != BlockState::Accumulating || !self.is_complete() {
            return None;
        }
        let block = std::mem::take(&mut self.pending);
        self.reset();
        Some(block)
    }
}
