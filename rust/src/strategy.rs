//! Pluggable strategies for choosing a free slot.
//!
//! Implements three strategies:
//! - `algorithm`: learned policy over (priority, hour), with a predicted score
//! - `sequential`: lowest free action index
//! - `random`: uniform over free slots, driven by the injected RNG

use std::fmt;
use std::str::FromStr;

use rand::seq::SliceRandom;
use rand::RngCore;

use crate::config::LotConfig;
use crate::log_checks;
use crate::lot::ParkingLot;
use crate::models::Vehicle;
use crate::policy::QPolicy;
use crate::scoring::{FeatureVector, ScoringModel};

/// Names of the available strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StrategyKind {
    Algorithm,
    Sequential,
    Random,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 3] = [Self::Algorithm, Self::Sequential, Self::Random];

    pub fn name(self) -> &'static str {
        match self {
            Self::Algorithm => "algorithm",
            Self::Sequential => "sequential",
            Self::Random => "random",
        }
    }

    /// Stable per-strategy salt for deriving independent RNG streams.
    pub fn stream_id(self) -> u64 {
        match self {
            Self::Algorithm => 1,
            Self::Sequential => 2,
            Self::Random => 3,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "algorithm" => Ok(Self::Algorithm),
            "sequential" => Ok(Self::Sequential),
            "random" => Ok(Self::Random),
            other => Err(other.to_string()),
        }
    }
}

/// Whether the learned strategy may explore.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecisionMode {
    /// Greedy: always the best known action.
    Serving,
    /// Epsilon-greedy, used by training simulations.
    Training,
}

/// Per-decision inputs that are not part of the lot.
pub struct DecisionContext<'a> {
    pub rng: &'a mut dyn RngCore,
    pub mode: DecisionMode,
    pub epsilon: f64,
    pub verbosity: u8,
}

/// A chosen slot, with the score the strategy predicted for it (if any).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Placement {
    pub action: usize,
    pub predicted_score: Option<f64>,
}

impl Placement {
    fn plain(action: usize) -> Self {
        Self {
            action,
            predicted_score: None,
        }
    }
}

/// Common contract: pick a free slot, or `None` when the lot is full.
pub trait AllocationStrategy {
    fn kind(&self) -> StrategyKind;

    fn choose_space(
        &self,
        vehicle: &Vehicle,
        lot: &ParkingLot,
        ctx: &mut DecisionContext<'_>,
    ) -> Option<Placement>;
}

pub struct SequentialStrategy;

impl AllocationStrategy for SequentialStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Sequential
    }

    fn choose_space(
        &self,
        _vehicle: &Vehicle,
        lot: &ParkingLot,
        _ctx: &mut DecisionContext<'_>,
    ) -> Option<Placement> {
        lot.available_spaces().first().copied().map(Placement::plain)
    }
}

pub struct RandomStrategy;

impl AllocationStrategy for RandomStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Random
    }

    fn choose_space(
        &self,
        _vehicle: &Vehicle,
        lot: &ParkingLot,
        ctx: &mut DecisionContext<'_>,
    ) -> Option<Placement> {
        lot.available_spaces()
            .choose(&mut *ctx.rng)
            .copied()
            .map(Placement::plain)
    }
}

/// Hybrid strategy: the policy table picks the slot, the scoring model
/// supplies the reported score.
pub struct AlgorithmStrategy<'a> {
    pub policy: &'a QPolicy,
    pub scorer: &'a ScoringModel,
    pub lot_config: &'a LotConfig,
}

impl AllocationStrategy for AlgorithmStrategy<'_> {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Algorithm
    }

    fn choose_space(
        &self,
        vehicle: &Vehicle,
        lot: &ParkingLot,
        ctx: &mut DecisionContext<'_>,
    ) -> Option<Placement> {
        let available = lot.available_spaces();
        if available.is_empty() {
            return None;
        }
        let priority = vehicle.effective_priority();
        let hour = vehicle.arrival_hour();

        let chosen = match ctx.mode {
            DecisionMode::Serving => self.policy.best_action(priority, hour, &available),
            DecisionMode::Training => {
                self.policy
                    .select_action(priority, hour, &available, ctx.epsilon, &mut *ctx.rng)
            }
        }
        .ok()?;

        let (bay, slot) = lot.action_to_bay_slot(chosen);
        let features = FeatureVector::from_vehicle(vehicle);
        let predicted = self.scorer.predict_score(&features, bay, slot, self.lot_config);
        log_checks!(
            ctx.verbosity,
            "algorithm: {} (priority={}, hour={}) -> bay {} slot {} (q={:.3}, score={:.3})",
            vehicle.plate,
            priority,
            hour,
            bay + 1,
            slot + 1,
            self.policy.value(priority, hour, chosen),
            predicted
        );

        Some(Placement {
            action: chosen,
            predicted_score: Some(predicted),
        })
    }
}

/// Build the strategy object for `kind`.
pub fn build_strategy<'a>(
    kind: StrategyKind,
    policy: &'a QPolicy,
    scorer: &'a ScoringModel,
    lot_config: &'a LotConfig,
) -> Box<dyn AllocationStrategy + 'a> {
    match kind {
        StrategyKind::Algorithm => Box::new(AlgorithmStrategy {
            policy,
            scorer,
            lot_config,
        }),
        StrategyKind::Sequential => Box::new(SequentialStrategy),
        StrategyKind::Random => Box::new(RandomStrategy),
    }
}

/// Score a placement with the scoring model, for strategies that predict none.
pub fn score_placement(
    scorer: &ScoringModel,
    vehicle: &Vehicle,
    lot: &ParkingLot,
    placement: &Placement,
    lot_config: &LotConfig,
) -> f64 {
    placement.predicted_score.unwrap_or_else(|| {
        let (bay, slot) = lot.action_to_bay_slot(placement.action);
        scorer.predict_score(&FeatureVector::from_vehicle(vehicle), bay, slot, lot_config)
    })
}
