//! Configuration types for the allocation engine.

use pyo3::prelude::*;
use serde::{Deserialize, Serialize};

/// Hours of the day (0-23) treated as peak demand.
pub const DEFAULT_PEAK_HOURS: [u32; 6] = [8, 9, 10, 17, 18, 19];

/// Number of discrete priority levels in the policy state space.
pub const PRIORITY_LEVELS: usize = 4;

/// Number of hour buckets in the policy state space.
pub const HOURS_PER_DAY: usize = 24;

/// Physical layout of the parking lot.
#[pyclass]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LotConfig {
    /// Number of bays (rows/zones).
    #[pyo3(get, set)]
    pub num_bays: usize,
    /// Slots in every bay.
    #[pyo3(get, set)]
    pub slots_per_bay: usize,
    /// Hours of the day that get the peak multiplier in scores and rewards.
    #[pyo3(get, set)]
    pub peak_hours: Vec<u32>,
}

impl Default for LotConfig {
    fn default() -> Self {
        Self {
            num_bays: 4,
            slots_per_bay: 10,
            peak_hours: DEFAULT_PEAK_HOURS.to_vec(),
        }
    }
}

impl LotConfig {
    /// Total number of slots, which is also the size of the action space.
    pub fn total_slots(&self) -> usize {
        self.num_bays * self.slots_per_bay
    }

    pub fn is_peak_hour(&self, hour: u32) -> bool {
        self.peak_hours.contains(&hour)
    }
}

#[pymethods]
impl LotConfig {
    #[new]
    #[pyo3(signature = (num_bays=4, slots_per_bay=10, peak_hours=None))]
    fn new(num_bays: usize, slots_per_bay: usize, peak_hours: Option<Vec<u32>>) -> Self {
        Self {
            num_bays,
            slots_per_bay,
            peak_hours: peak_hours.unwrap_or_else(|| DEFAULT_PEAK_HOURS.to_vec()),
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "LotConfig(num_bays={}, slots_per_bay={}, peak_hours={:?})",
            self.num_bays, self.slots_per_bay, self.peak_hours
        )
    }
}

/// Hyperparameters for the Q-learning policy.
#[pyclass]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Step size of the temporal-difference update.
    #[pyo3(get, set)]
    pub learning_rate: f64,
    /// Discount applied to the next state's value.
    #[pyo3(get, set)]
    pub discount: f64,
    /// Initial exploration probability.
    #[pyo3(get, set)]
    pub epsilon: f64,
    /// Multiplicative decay applied to epsilon after each episode.
    #[pyo3(get, set)]
    pub epsilon_decay: f64,
    /// Floor for epsilon decay.
    #[pyo3(get, set)]
    pub epsilon_min: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            discount: 0.95,
            epsilon: 1.0,
            epsilon_decay: 0.995,
            epsilon_min: 0.01,
        }
    }
}

#[pymethods]
impl PolicyConfig {
    #[new]
    #[pyo3(signature = (
        learning_rate=None,
        discount=None,
        epsilon=None,
        epsilon_decay=None,
        epsilon_min=None
    ))]
    fn new(
        learning_rate: Option<f64>,
        discount: Option<f64>,
        epsilon: Option<f64>,
        epsilon_decay: Option<f64>,
        epsilon_min: Option<f64>,
    ) -> Self {
        let defaults = Self::default();
        Self {
            learning_rate: learning_rate.unwrap_or(defaults.learning_rate),
            discount: discount.unwrap_or(defaults.discount),
            epsilon: epsilon.unwrap_or(defaults.epsilon),
            epsilon_decay: epsilon_decay.unwrap_or(defaults.epsilon_decay),
            epsilon_min: epsilon_min.unwrap_or(defaults.epsilon_min),
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "PolicyConfig(learning_rate={}, discount={}, epsilon={}, epsilon_decay={}, epsilon_min={})",
            self.learning_rate, self.discount, self.epsilon, self.epsilon_decay, self.epsilon_min
        )
    }
}

/// Top-level engine configuration.
#[pyclass]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[pyo3(get, set)]
    pub lot: LotConfig,
    #[pyo3(get, set)]
    pub policy: PolicyConfig,
    /// Seed for every random source the engine creates.
    #[pyo3(get, set)]
    pub seed: u64,
    /// Verbosity level: 0=silent, 1=changes, 2=checks, 3=debug.
    #[pyo3(get, set)]
    pub verbosity: u8,
    /// Trained scoring model artifact (JSON). None = fallback formula.
    #[pyo3(get, set)]
    pub model_path: Option<String>,
    /// Persisted policy table snapshot (JSON). None = cold start.
    #[pyo3(get, set)]
    pub policy_path: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lot: LotConfig::default(),
            policy: PolicyConfig::default(),
            seed: 42,
            verbosity: 0,
            model_path: None,
            policy_path: None,
        }
    }
}

impl EngineConfig {
    /// Check the configuration for values the engine cannot work with.
    pub fn validate(&self) -> Result<(), String> {
        if self.lot.num_bays == 0 || self.lot.slots_per_bay == 0 {
            return Err(format!(
                "lot must have at least one slot (num_bays={}, slots_per_bay={})",
                self.lot.num_bays, self.lot.slots_per_bay
            ));
        }
        if let Some(hour) = self.lot.peak_hours.iter().find(|&&h| h >= HOURS_PER_DAY as u32) {
            return Err(format!("peak hour out of range: {}", hour));
        }
        let p = &self.policy;
        if !(0.0..=1.0).contains(&p.learning_rate) {
            return Err(format!("learning_rate must be in [0, 1], got {}", p.learning_rate));
        }
        if !(0.0..=1.0).contains(&p.discount) {
            return Err(format!("discount must be in [0, 1], got {}", p.discount));
        }
        if !(0.0..=1.0).contains(&p.epsilon) || !(0.0..=1.0).contains(&p.epsilon_min) {
            return Err("epsilon and epsilon_min must be in [0, 1]".to_string());
        }
        if !(0.0..=1.0).contains(&p.epsilon_decay) {
            return Err(format!("epsilon_decay must be in [0, 1], got {}", p.epsilon_decay));
        }
        Ok(())
    }
}

#[pymethods]
impl EngineConfig {
    #[new]
    #[pyo3(signature = (
        lot=None,
        policy=None,
        seed=42,
        verbosity=0,
        model_path=None,
        policy_path=None
    ))]
    fn new(
        lot: Option<LotConfig>,
        policy: Option<PolicyConfig>,
        seed: u64,
        verbosity: u8,
        model_path: Option<String>,
        policy_path: Option<String>,
    ) -> Self {
        Self {
            lot: lot.unwrap_or_default(),
            policy: policy.unwrap_or_default(),
            seed,
            verbosity,
            model_path,
            policy_path,
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "EngineConfig(num_bays={}, slots_per_bay={}, seed={}, verbosity={})",
            self.lot.num_bays, self.lot.slots_per_bay, self.seed, self.verbosity
        )
    }
}
