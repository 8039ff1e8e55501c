//! Allocation engine: the operations exposed to the transport layer.
//!
//! Live occupancy (lot + ledger) sits behind one mutex so that reading free
//! slots, choosing, and occupying happen as a single critical section. The
//! policy table carries its own lock. Simulations never touch live state.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::NaiveDateTime;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use thiserror::Error;

use crate::config::EngineConfig;
use crate::ledger::{AllocationLedger, LedgerError};
use crate::lot::{LotError, ParkingLot};
use crate::models::{Allocation, AllocationDecision, AllocationId, SimulationResult, Vehicle};
use crate::policy::{PolicyError, PolicyTable, QPolicy};
use crate::scoring::ScoringModel;
use crate::simulation::{SimulationHarness, SimulationOptions};
use crate::status::ParkingStatus;
use crate::strategy::{
    build_strategy, score_placement, DecisionContext, DecisionMode, StrategyKind,
};
use crate::{log_changes, log_checks};

/// Errors surfaced by engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Lot(#[from] LotError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error("Unknown allocation strategy: {0} (expected algorithm, sequential or random)")]
    UnknownStrategy(String),
    #[error("Invalid vehicle: {0}")]
    InvalidVehicle(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    /// True for errors that reference an allocation or slot that does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Ledger(LedgerError::NotFound(_)) | Self::Lot(LotError::NotOccupied(_))
        )
    }
}

struct LiveState {
    lot: ParkingLot,
    ledger: AllocationLedger,
    rng: ChaCha8Rng,
}

/// Engine instance owning the live lot, the scoring model, and the policy.
pub struct AllocationEngine {
    config: EngineConfig,
    scorer: ScoringModel,
    policy: QPolicy,
    live: Mutex<LiveState>,
}

impl AllocationEngine {
    /// Build an engine, loading the model and policy named in `config`.
    ///
    /// Missing or broken artifacts degrade (fallback score, zeroed table).
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate().map_err(EngineError::InvalidConfig)?;

        let scorer = match &config.model_path {
            Some(path) => ScoringModel::load(Path::new(path)),
            None => ScoringModel::Fallback,
        };
        let num_actions = config.lot.total_slots();
        let table = match &config.policy_path {
            Some(path) => PolicyTable::load_or_zeros(Path::new(path), num_actions),
            None => PolicyTable::zeros(num_actions),
        };
        Self::with_parts(config, scorer, table)
    }

    /// Build an engine from already-loaded parts.
    ///
    /// The table must have one action per slot of `config.lot`.
    pub fn with_parts(
        config: EngineConfig,
        scorer: ScoringModel,
        table: PolicyTable,
    ) -> Result<Self, EngineError> {
        config.validate().map_err(EngineError::InvalidConfig)?;
        if table.num_actions() != config.lot.total_slots() {
            return Err(EngineError::InvalidConfig(format!(
                "policy table has {} actions but the lot has {} slots",
                table.num_actions(),
                config.lot.total_slots()
            )));
        }
        let policy = QPolicy::new(table, config.policy.clone());
        let live = LiveState {
            lot: ParkingLot::new(&config.lot),
            ledger: AllocationLedger::new(),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
        };
        log_changes!(
            config.verbosity,
            "engine ready: {} bays x {} slots, scoring={}",
            config.lot.num_bays,
            config.lot.slots_per_bay,
            if scorer.is_fallback() { "fallback" } else { "regression" }
        );
        Ok(Self {
            config,
            scorer,
            policy,
            live: Mutex::new(live),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn policy(&self) -> &QPolicy {
        &self.policy
    }

    pub fn scorer(&self) -> &ScoringModel {
        &self.scorer
    }

    // A poisoned lock only means another caller panicked mid-request
    fn live(&self) -> MutexGuard<'_, LiveState> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Release everything past departure at `now`.
    fn sweep(&self, live: &mut LiveState, now: NaiveDateTime) {
        let expired = live.ledger.expire_due(now, &mut live.lot);
        if !expired.is_empty() {
            log_changes!(
                self.config.verbosity,
                "released {} allocation(s) past departure",
                expired.len()
            );
        }
    }

    fn harness(&self) -> SimulationHarness<'_> {
        SimulationHarness {
            lot_config: &self.config.lot,
            policy: &self.policy,
            scorer: &self.scorer,
            verbosity: self.config.verbosity,
        }
    }

    /// Resolve a strategy name, mapping unknown names to `UnknownStrategy`.
    pub fn parse_strategy(name: &str) -> Result<StrategyKind, EngineError> {
        name.parse().map_err(EngineError::UnknownStrategy)
    }

    /// Allocate a slot for `vehicle` using `strategy` (serving mode).
    ///
    /// Allocations whose departure is at or before `now` are released first.
    pub fn allocate(
        &self,
        vehicle: &Vehicle,
        strategy: StrategyKind,
        now: NaiveDateTime,
    ) -> Result<AllocationDecision, EngineError> {
        vehicle.validate().map_err(EngineError::InvalidVehicle)?;

        let mut guard = self.live();
        let live = &mut *guard;
        self.sweep(live, now);
        if live.ledger.has_active(&vehicle.plate) {
            return Err(LedgerError::DuplicateActiveAllocation(vehicle.plate.clone()).into());
        }

        let strategy = build_strategy(strategy, &self.policy, &self.scorer, &self.config.lot);
        let mut ctx = DecisionContext {
            rng: &mut live.rng,
            mode: DecisionMode::Serving,
            epsilon: 0.0,
            verbosity: self.config.verbosity,
        };
        let placement = match strategy.choose_space(vehicle, &live.lot, &mut ctx) {
            Some(p) => p,
            None => {
                log_checks!(
                    self.config.verbosity,
                    "no capacity for {} ({})",
                    vehicle.plate,
                    strategy.kind()
                );
                return Ok(AllocationDecision::NoCapacity);
            }
        };

        let (bay, slot) = live.lot.action_to_bay_slot(placement.action);
        let score = score_placement(&self.scorer, vehicle, &live.lot, &placement, &self.config.lot);
        let allocation = live.ledger.create(vehicle, bay, slot, score, now)?;
        if let Err(e) = live.lot.occupy(placement.action, allocation.id) {
            live.ledger.discard(allocation.id);
            return Err(e.into());
        }

        log_changes!(
            self.config.verbosity,
            "allocated {} -> bay {} slot {} via {} (score {:.3})",
            vehicle.plate,
            bay + 1,
            slot + 1,
            strategy.kind(),
            score
        );
        Ok(AllocationDecision::Allocated(allocation))
    }

    /// End an allocation and free its slot.
    pub fn release(&self, id: AllocationId, now: NaiveDateTime) -> Result<Allocation, EngineError> {
        let mut guard = self.live();
        let live = &mut *guard;
        let released = live.ledger.release(id, &mut live.lot, now)?;
        log_changes!(
            self.config.verbosity,
            "released allocation {} ({}) from bay {} slot {}",
            id,
            released.plate(),
            released.bay + 1,
            released.slot + 1
        );
        Ok(released)
    }

    /// Change an allocation's expected departure. A departure at or before
    /// `now` releases the slot immediately.
    pub fn update_departure(
        &self,
        id: AllocationId,
        departure: NaiveDateTime,
        now: NaiveDateTime,
    ) -> Result<Allocation, EngineError> {
        let mut guard = self.live();
        let live = &mut *guard;
        let updated = live.ledger.update_departure(id, departure)?;
        if !updated.is_active() || departure > now {
            return Ok(updated);
        }
        let released = live.ledger.release(id, &mut live.lot, now)?;
        log_changes!(
            self.config.verbosity,
            "released allocation {} ({}): departure moved to {}",
            id,
            released.plate(),
            departure
        );
        Ok(released)
    }

    /// Look up an allocation as of `now`, active or released.
    pub fn get_allocation(
        &self,
        id: AllocationId,
        now: NaiveDateTime,
    ) -> Result<Allocation, EngineError> {
        let mut guard = self.live();
        let live = &mut *guard;
        self.sweep(live, now);
        live.ledger
            .get(id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(id).into())
    }

    /// Allocations still active at `now`, optionally only for `plate`.
    pub fn find_active(&self, plate: Option<&str>, now: NaiveDateTime) -> Vec<Allocation> {
        let mut guard = self.live();
        let live = &mut *guard;
        self.sweep(live, now);
        live.ledger.find_active(plate)
    }

    /// Current occupancy, after releasing allocations that are past departure.
    pub fn status(&self, now: NaiveDateTime) -> ParkingStatus {
        let mut guard = self.live();
        let live = &mut *guard;
        self.sweep(live, now);
        ParkingStatus::snapshot(&live.lot, &live.ledger, now)
    }

    /// Drop every live allocation.
    pub fn clear(&self) {
        let mut live = self.live();
        live.ledger.clear();
        live.lot.reset();
    }

    /// Simulate a batch against an isolated lot (serving mode).
    pub fn simulate(
        &self,
        vehicles: &[Vehicle],
        strategy: StrategyKind,
        now: NaiveDateTime,
        cancel: Option<&AtomicBool>,
    ) -> SimulationResult {
        let options = SimulationOptions {
            cancel,
            ..SimulationOptions::serving(self.config.seed, now)
        };
        self.harness().simulate(vehicles, strategy, &options)
    }

    /// Simulate the batch once per strategy, each against its own lot.
    pub fn compare_all(
        &self,
        vehicles: &[Vehicle],
        now: NaiveDateTime,
    ) -> BTreeMap<String, SimulationResult> {
        let options = SimulationOptions::serving(self.config.seed, now);
        self.harness().compare_all(vehicles, &options)
    }

    /// Run training episodes of the learned strategy over a batch.
    pub fn train(
        &self,
        vehicles: &[Vehicle],
        episodes: usize,
        now: NaiveDateTime,
        cancel: Option<&AtomicBool>,
    ) -> Vec<SimulationResult> {
        let options = SimulationOptions {
            cancel,
            ..SimulationOptions::serving(self.config.seed, now)
        };
        self.harness().train(vehicles, episodes, &options)
    }

    pub fn save_policy(&self, path: &Path) -> Result<(), EngineError> {
        Ok(self.policy.save(path)?)
    }

    pub fn reset_policy(&self) {
        self.policy.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LotConfig;
    use crate::models::test_support::{at, vehicle};

    fn engine(num_bays: usize, slots_per_bay: usize) -> AllocationEngine {
        AllocationEngine::new(EngineConfig {
            lot: LotConfig {
                num_bays,
                slots_per_bay,
                ..LotConfig::default()
            },
            ..EngineConfig::default()
        })
        .unwrap()
    }

    fn allocated(decision: AllocationDecision) -> Allocation {
        decision.into_allocation().expect("expected an allocation")
    }

    #[test]
    fn test_allocate_release_cycle() {
        let engine = engine(2, 2);
        let v = vehicle("AAA", 8, 4);
        let a = allocated(engine.allocate(&v, StrategyKind::Sequential, at(8, 0)).unwrap());
        assert_eq!((a.bay, a.slot), (0, 0));
        assert_eq!(engine.status(at(9, 0)).occupied_slots, 1);

        let released = engine.release(a.id, at(9, 0)).unwrap();
        assert!(!released.is_active());
        assert_eq!(engine.status(at(9, 0)).occupied_slots, 0);
        assert!(engine.release(a.id, at(9, 0)).unwrap_err().is_not_found());
        // History survives release
        assert!(!engine.get_allocation(a.id, at(9, 0)).unwrap().is_active());
    }

    #[test]
    fn test_duplicate_plate_rejected() {
        let engine = engine(2, 2);
        let v = vehicle("AAA", 8, 4);
        engine.allocate(&v, StrategyKind::Algorithm, at(8, 0)).unwrap();
        let err = engine
            .allocate(&v, StrategyKind::Random, at(8, 5))
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Ledger(LedgerError::DuplicateActiveAllocation(_))
        ));
        assert_eq!(engine.find_active(Some("AAA"), at(8, 5)).len(), 1);
    }

    #[test]
    fn test_no_capacity_is_not_an_error() {
        let engine = engine(1, 1);
        engine
            .allocate(&vehicle("AAA", 8, 4), StrategyKind::Sequential, at(8, 0))
            .unwrap();
        for kind in StrategyKind::ALL {
            let decision = engine
                .allocate(&vehicle("BBB", 8, 4), kind, at(8, 0))
                .unwrap();
            assert_eq!(decision, AllocationDecision::NoCapacity);
        }
    }

    #[test]
    fn test_departure_update_releases_on_next_sweep() {
        let engine = engine(1, 1);
        let a = allocated(
            engine
                .allocate(&vehicle("AAA", 8, 4), StrategyKind::Sequential, at(8, 0))
                .unwrap(),
        );
        let updated = engine.update_departure(a.id, at(9, 0), at(8, 30)).unwrap();
        assert!(updated.is_active());
        assert!(engine
            .update_departure(999, at(9, 0), at(8, 30))
            .unwrap_err()
            .is_not_found());

        // Past departure: the slot frees up and a new vehicle can park
        let b = allocated(
            engine
                .allocate(&vehicle("BBB", 10, 2), StrategyKind::Sequential, at(10, 0))
                .unwrap(),
        );
        assert_eq!((b.bay, b.slot), (0, 0));
        assert!(!engine.get_allocation(a.id, at(10, 0)).unwrap().is_active());
    }

    #[test]
    fn test_departure_moved_into_past_releases_immediately() {
        let engine = engine(1, 1);
        let a = allocated(
            engine
                .allocate(&vehicle("AAA", 8, 4), StrategyKind::Sequential, at(8, 0))
                .unwrap(),
        );
        let updated = engine.update_departure(a.id, at(7, 0), at(8, 30)).unwrap();
        assert!(!updated.is_active());
        assert_eq!(updated.released_at, Some(at(8, 30)));
        assert!(engine.find_active(Some("AAA"), at(8, 30)).is_empty());
        assert!(!engine.get_allocation(a.id, at(8, 30)).unwrap().is_active());
        assert_eq!(engine.status(at(8, 30)).occupied_slots, 0);
    }

    #[test]
    fn test_reads_release_allocations_past_departure() {
        let engine = engine(2, 2);
        let a = allocated(
            engine
                .allocate(&vehicle("AAA", 8, 2), StrategyKind::Sequential, at(8, 0))
                .unwrap(),
        );
        assert_eq!(engine.find_active(None, at(9, 0)).len(), 1);

        // Departure 10:00 has passed by 11:00
        assert!(engine.find_active(None, at(11, 0)).is_empty());
        let record = engine.get_allocation(a.id, at(11, 0)).unwrap();
        assert!(!record.is_active());
        assert_eq!(record.released_at, Some(at(11, 0)));
    }

    #[test]
    fn test_with_parts_checks_table_shape() {
        let mismatched = AllocationEngine::with_parts(
            EngineConfig::default(),
            ScoringModel::Fallback,
            PolicyTable::zeros(5),
        );
        assert!(matches!(mismatched, Err(EngineError::InvalidConfig(_))));

        let sized = AllocationEngine::with_parts(
            EngineConfig::default(),
            ScoringModel::Fallback,
            PolicyTable::zeros(40),
        )
        .unwrap();
        assert_eq!(sized.policy().num_actions(), 40);
    }

    #[test]
    fn test_concurrent_allocations_never_share_a_slot() {
        let engine = engine(2, 3);
        let capacity = 6;

        let decisions: Vec<AllocationDecision> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|worker| {
                    let engine = &engine;
                    scope.spawn(move || {
                        (0..5)
                            .map(|i| {
                                let v = vehicle(&format!("W{}-{}", worker, i), 8, 4);
                                let kind = StrategyKind::ALL[(worker + i) % 3];
                                engine.allocate(&v, kind, at(8, 0)).unwrap()
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });

        let placed: Vec<(usize, usize)> = decisions
            .iter()
            .filter_map(AllocationDecision::allocation)
            .map(|a| (a.bay, a.slot))
            .collect();
        assert_eq!(placed.len(), capacity);
        let distinct: std::collections::BTreeSet<_> = placed.iter().collect();
        assert_eq!(distinct.len(), capacity);
        assert_eq!(
            decisions
                .iter()
                .filter(|d| **d == AllocationDecision::NoCapacity)
                .count(),
            20 - capacity
        );
        assert_eq!(engine.status(at(9, 0)).occupied_slots, capacity);
    }

    #[test]
    fn test_invalid_inputs() {
        let engine = engine(2, 2);
        let mut v = vehicle("AAA", 8, 4);
        v.priority_level = Some(7);
        assert!(matches!(
            engine.allocate(&v, StrategyKind::Sequential, at(8, 0)),
            Err(EngineError::InvalidVehicle(_))
        ));
        assert!(matches!(
            AllocationEngine::parse_strategy("fastest"),
            Err(EngineError::UnknownStrategy(_))
        ));

        let bad = EngineConfig {
            lot: LotConfig {
                num_bays: 0,
                ..LotConfig::default()
            },
            ..EngineConfig::default()
        };
        assert!(matches!(
            AllocationEngine::new(bad),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_simulation_does_not_touch_live_state() {
        let engine = engine(2, 2);
        engine
            .allocate(&vehicle("LIVE", 8, 4), StrategyKind::Sequential, at(8, 0))
            .unwrap();

        let batch: Vec<Vehicle> = (0..4).map(|i| vehicle(&format!("SIM{}", i), 8, 2)).collect();
        let results = engine.compare_all(&batch, at(12, 0));
        for result in results.values() {
            assert_eq!(result.successful_allocations, 4);
        }
        assert_eq!(engine.status(at(9, 0)).occupied_slots, 1);
    }

    #[test]
    fn test_policy_persistence_through_engine() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q_table.json");

        let trainer = engine(2, 3);
        let batch: Vec<Vehicle> = (0..3).map(|i| vehicle(&format!("T{}", i), 17, 1)).collect();
        trainer.train(&batch, 3, at(20, 0), None);
        trainer.save_policy(&path).unwrap();

        let restored = AllocationEngine::new(EngineConfig {
            lot: trainer.config().lot.clone(),
            policy_path: Some(path.to_string_lossy().into_owned()),
            ..EngineConfig::default()
        })
        .unwrap();
        let trained: Vec<f64> = trainer.policy().snapshot().into_iter().flatten().flatten().collect();
        let loaded: Vec<f64> = restored.policy().snapshot().into_iter().flatten().flatten().collect();
        assert_eq!(trained.len(), loaded.len());
        assert!(trained.iter().any(|&v| v > 0.0));
        assert!(trained.iter().zip(&loaded).all(|(a, b)| (a - b).abs() < 1e-9));

        trainer.reset_policy();
        assert!(trainer
            .policy()
            .snapshot()
            .iter()
            .flatten()
            .flatten()
            .all(|&v| v == 0.0));
    }
}
