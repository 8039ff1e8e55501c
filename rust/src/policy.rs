//! Q-learning policy over (priority, hour-of-day) states and slot actions.
//!
//! [`PolicyTable`] is the plain value table with the update rule and action
//! ranking. [`QPolicy`] owns a table behind a lock together with the
//! exploration rate, and is the only handle the rest of the crate mutates it
//! through.

use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use thiserror::Error;

use crate::config::{LotConfig, PolicyConfig, HOURS_PER_DAY, PRIORITY_LEVELS};

/// Errors from the policy module.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("No available action to choose from")]
    NoAvailableAction,
    #[error("Policy snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Policy snapshot is malformed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Policy snapshot shape mismatch: expected {expected}, found {found}")]
    Shape { expected: String, found: String },
    #[error("Action {action} is outside the policy table ({num_actions} actions)")]
    ActionOutOfRange { action: usize, num_actions: usize },
}

/// Reward for parking a vehicle of `priority` at 0-based (bay, slot) during `hour`.
///
/// Formula: `(priority + 1) * ((num_bays - bay) + (slots_per_bay - slot)) * time_factor`
/// where `time_factor` is 1.5 in peak hours and 1.0 otherwise. Positive for
/// every in-range input.
pub fn reward(bay: usize, slot: usize, priority: u8, hour: u32, lot: &LotConfig) -> f64 {
    let bay_value = lot.num_bays as f64 - bay as f64;
    let slot_value = lot.slots_per_bay as f64 - slot as f64;
    let priority_factor = priority as f64 + 1.0;
    let time_factor = if lot.is_peak_hour(hour) { 1.5 } else { 1.0 };
    priority_factor * (bay_value + slot_value) * time_factor
}

/// Dense value table indexed by `[priority][hour][action]`.
#[derive(Clone, Debug, PartialEq)]
pub struct PolicyTable {
    num_actions: usize,
    values: Vec<f64>,
}

impl PolicyTable {
    /// All-zero table (cold start).
    pub fn zeros(num_actions: usize) -> Self {
        Self {
            num_actions,
            values: vec![0.0; PRIORITY_LEVELS * HOURS_PER_DAY * num_actions],
        }
    }

    pub fn num_actions(&self) -> usize {
        self.num_actions
    }

    #[inline]
    fn index(&self, priority: u8, hour: u32, action: usize) -> usize {
        let p = (priority as usize).min(PRIORITY_LEVELS - 1);
        let h = (hour as usize) % HOURS_PER_DAY;
        (p * HOURS_PER_DAY + h) * self.num_actions + action
    }

    /// Value estimate; out-of-range actions read as 0.
    pub fn value(&self, priority: u8, hour: u32, action: usize) -> f64 {
        if action >= self.num_actions {
            return 0.0;
        }
        self.values[self.index(priority, hour, action)]
    }

    /// Highest-valued action among `available`, lowest index on ties.
    pub fn best_action(
        &self,
        priority: u8,
        hour: u32,
        available: &[usize],
    ) -> Result<usize, PolicyError> {
        let mut best: Option<(usize, f64)> = None;
        for &action in available {
            let value = self.value(priority, hour, action);
            best = match best {
                Some((best_action, best_value))
                    if value < best_value || (value == best_value && action > best_action) =>
                {
                    Some((best_action, best_value))
                }
                _ => Some((action, value)),
            };
        }
        best.map(|(action, _)| action)
            .ok_or(PolicyError::NoAvailableAction)
    }

    /// Maximum value over `available`, 0 when empty (terminal state).
    pub fn max_value(&self, priority: u8, hour: u32, available: &[usize]) -> f64 {
        available
            .iter()
            .map(|&a| self.value(priority, hour, a))
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.max(v))))
            .unwrap_or(0.0)
    }

    /// Temporal-difference update; returns the new value.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        config: &PolicyConfig,
        priority: u8,
        hour: u32,
        action: usize,
        reward: f64,
        next_priority: u8,
        next_hour: u32,
        next_available: &[usize],
    ) -> Result<f64, PolicyError> {
        if action >= self.num_actions {
            return Err(PolicyError::ActionOutOfRange {
                action,
                num_actions: self.num_actions,
            });
        }
        let target = reward + config.discount * self.max_value(next_priority, next_hour, next_available);
        let idx = self.index(priority, hour, action);
        let current = self.values[idx];
        self.values[idx] = current + config.learning_rate * (target - current);
        Ok(self.values[idx])
    }

    /// Export as nested `[priority][hour][action]` arrays.
    pub fn snapshot(&self) -> Vec<Vec<Vec<f64>>> {
        self.values
            .chunks(HOURS_PER_DAY * self.num_actions.max(1))
            .map(|per_priority| {
                per_priority
                    .chunks(self.num_actions.max(1))
                    .map(|per_hour| per_hour.to_vec())
                    .collect()
            })
            .collect()
    }

    /// Rebuild from nested arrays, checking the shape against `num_actions`.
    pub fn from_snapshot(
        snapshot: Vec<Vec<Vec<f64>>>,
        num_actions: usize,
    ) -> Result<Self, PolicyError> {
        let expected = format!("[{}][{}][{}]", PRIORITY_LEVELS, HOURS_PER_DAY, num_actions);
        let shape_ok = snapshot.len() == PRIORITY_LEVELS
            && snapshot.iter().all(|hours| {
                hours.len() == HOURS_PER_DAY && hours.iter().all(|a| a.len() == num_actions)
            });
        if !shape_ok {
            let found = format!(
                "[{}][{}][{}]",
                snapshot.len(),
                snapshot.first().map_or(0, Vec::len),
                snapshot.first().and_then(|h| h.first()).map_or(0, Vec::len)
            );
            return Err(PolicyError::Shape { expected, found });
        }
        let values: Vec<f64> = snapshot.into_iter().flatten().flatten().collect();
        Ok(Self {
            num_actions,
            values,
        })
    }

    /// Write the table as JSON.
    pub fn save(&self, path: &Path) -> Result<(), PolicyError> {
        let json = serde_json::to_string(&self.snapshot())?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Read a JSON snapshot written by [`PolicyTable::save`].
    pub fn read(path: &Path, num_actions: usize) -> Result<Self, PolicyError> {
        let contents = std::fs::read_to_string(path)?;
        let snapshot: Vec<Vec<Vec<f64>>> = serde_json::from_str(&contents)?;
        Self::from_snapshot(snapshot, num_actions)
    }

    /// Read a snapshot, cold-starting to zeros if it is missing or unusable.
    pub fn load_or_zeros(path: &Path, num_actions: usize) -> Self {
        match Self::read(path, num_actions) {
            Ok(table) => table,
            Err(e) => {
                log::warn!(
                    "Policy table {} not loaded ({}); starting from zeros",
                    path.display(),
                    e
                );
                Self::zeros(num_actions)
            }
        }
    }
}

struct PolicyState {
    table: PolicyTable,
    epsilon: f64,
}

/// Shared, lock-protected policy with its exploration schedule.
pub struct QPolicy {
    config: PolicyConfig,
    state: RwLock<PolicyState>,
}

impl QPolicy {
    pub fn new(table: PolicyTable, config: PolicyConfig) -> Self {
        let epsilon = config.epsilon;
        Self {
            config,
            state: RwLock::new(PolicyState { table, epsilon }),
        }
    }

    pub fn num_actions(&self) -> usize {
        self.read().table.num_actions()
    }

    /// Cold-start policy sized for `lot`.
    pub fn cold(lot: &LotConfig, config: PolicyConfig) -> Self {
        Self::new(PolicyTable::zeros(lot.total_slots()), config)
    }

    // A poisoned lock only means a panic elsewhere; the table is still valid
    fn read(&self) -> RwLockReadGuard<'_, PolicyState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, PolicyState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn epsilon(&self) -> f64 {
        self.read().epsilon
    }

    pub fn value(&self, priority: u8, hour: u32, action: usize) -> f64 {
        self.read().table.value(priority, hour, action)
    }

    pub fn best_action(
        &self,
        priority: u8,
        hour: u32,
        available: &[usize],
    ) -> Result<usize, PolicyError> {
        self.read().table.best_action(priority, hour, available)
    }

    /// Epsilon-greedy choice: explore with probability `epsilon`, else exploit.
    pub fn select_action(
        &self,
        priority: u8,
        hour: u32,
        available: &[usize],
        epsilon: f64,
        rng: &mut dyn RngCore,
    ) -> Result<usize, PolicyError> {
        if available.is_empty() {
            return Err(PolicyError::NoAvailableAction);
        }
        if rng.gen_bool(epsilon.clamp(0.0, 1.0)) {
            return available
                .choose(rng)
                .copied()
                .ok_or(PolicyError::NoAvailableAction);
        }
        self.best_action(priority, hour, available)
    }

    /// Apply one temporal-difference update; the only way values change.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &self,
        priority: u8,
        hour: u32,
        action: usize,
        reward: f64,
        next_priority: u8,
        next_hour: u32,
        next_available: &[usize],
    ) -> Result<f64, PolicyError> {
        self.write().table.update(
            &self.config,
            priority,
            hour,
            action,
            reward,
            next_priority,
            next_hour,
            next_available,
        )
    }

    /// Decay exploration after a completed episode; returns the new epsilon.
    pub fn end_episode(&self) -> f64 {
        let mut state = self.write();
        state.epsilon = (state.epsilon * self.config.epsilon_decay).max(self.config.epsilon_min);
        state.epsilon
    }

    /// Reinitialize: zero the table and restore the initial epsilon.
    pub fn reset(&self) {
        let mut state = self.write();
        let num_actions = state.table.num_actions();
        state.table = PolicyTable::zeros(num_actions);
        state.epsilon = self.config.epsilon;
    }

    pub fn snapshot(&self) -> Vec<Vec<Vec<f64>>> {
        self.read().table.snapshot()
    }

    pub fn save(&self, path: &Path) -> Result<(), PolicyError> {
        self.read().table.save(path)
    }
}
