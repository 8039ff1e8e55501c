//! Batch simulation and side-by-side strategy comparison.
//!
//! Every run builds its own lot and ledger, so runs never observe each other
//! and the live engine state is never touched. Within a run vehicles are
//! processed strictly in input order.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::LotConfig;
use crate::ledger::AllocationLedger;
use crate::lot::ParkingLot;
use crate::models::{AllocationOutcome, SimulationResult, Vehicle};
use crate::policy::{reward, QPolicy};
use crate::scoring::ScoringModel;
use crate::status::ParkingStatus;
use crate::strategy::{
    build_strategy, score_placement, AllocationStrategy, DecisionContext, DecisionMode,
    StrategyKind,
};
use crate::{log_changes, log_debug};

/// Shared read-mostly inputs for simulation runs.
pub struct SimulationHarness<'a> {
    pub lot_config: &'a LotConfig,
    pub policy: &'a QPolicy,
    pub scorer: &'a ScoringModel,
    pub verbosity: u8,
}

/// Per-run knobs.
#[derive(Clone, Copy, Debug)]
pub struct SimulationOptions<'a> {
    /// Base seed; each strategy derives its own stream from it.
    pub seed: u64,
    pub mode: DecisionMode,
    /// Checked before each vehicle; when set the run stops with a partial result.
    pub cancel: Option<&'a AtomicBool>,
    /// Timestamp stamped on the final occupancy report.
    pub reported_at: NaiveDateTime,
}

impl<'a> SimulationOptions<'a> {
    pub fn serving(seed: u64, reported_at: NaiveDateTime) -> Self {
        Self {
            seed,
            mode: DecisionMode::Serving,
            cancel: None,
            reported_at,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

/// Mutable state of one run.
struct RunState {
    lot: ParkingLot,
    ledger: AllocationLedger,
    rng: ChaCha8Rng,
}

impl SimulationHarness<'_> {
    /// Run `vehicles` through one strategy against a fresh, empty lot.
    pub fn simulate(
        &self,
        vehicles: &[Vehicle],
        kind: StrategyKind,
        options: &SimulationOptions<'_>,
    ) -> SimulationResult {
        let strategy = build_strategy(kind, self.policy, self.scorer, self.lot_config);
        let mut rng = ChaCha8Rng::seed_from_u64(options.seed);
        rng.set_stream(kind.stream_id());
        let mut state = RunState {
            lot: ParkingLot::new(self.lot_config),
            ledger: AllocationLedger::new(),
            rng,
        };
        let epsilon = self.policy.epsilon();

        let mut outcomes: Vec<AllocationOutcome> = Vec::with_capacity(vehicles.len());
        let mut processing_time = Duration::ZERO;
        let mut completed = true;

        for (index, vehicle) in vehicles.iter().enumerate() {
            if options.is_cancelled() {
                completed = false;
                break;
            }
            let started = Instant::now();
            let outcome = self.process_vehicle(
                strategy.as_ref(),
                &mut state,
                vehicles,
                index,
                epsilon,
                options.mode,
            );
            processing_time += started.elapsed();
            outcomes.push(outcome);
        }

        let learning = kind == StrategyKind::Algorithm && options.mode == DecisionMode::Training;
        if learning && completed {
            let epsilon = self.policy.end_episode();
            log_changes!(self.verbosity, "episode finished, epsilon now {:.4}", epsilon);
        }

        let result = summarize(
            kind,
            outcomes,
            processing_time,
            ParkingStatus::snapshot(&state.lot, &state.ledger, options.reported_at),
            completed,
        );
        log_changes!(
            self.verbosity,
            "{}: {}/{} allocated ({:.1}%), avg score {:?}",
            result.strategy,
            result.successful_allocations,
            result.total_vehicles,
            result.success_rate,
            result.average_allocation_score
        );
        result
    }

    fn process_vehicle(
        &self,
        strategy: &dyn AllocationStrategy,
        state: &mut RunState,
        vehicles: &[Vehicle],
        index: usize,
        epsilon: f64,
        mode: DecisionMode,
    ) -> AllocationOutcome {
        let vehicle = &vehicles[index];
        if let Err(message) = vehicle.validate() {
            return AllocationOutcome::failed(&vehicle.plate, message);
        }

        let mut ctx = DecisionContext {
            rng: &mut state.rng,
            mode,
            epsilon,
            verbosity: self.verbosity,
        };
        let placement = match strategy.choose_space(vehicle, &state.lot, &mut ctx) {
            Some(p) => p,
            None => {
                return AllocationOutcome::failed(&vehicle.plate, "No available parking slots")
            }
        };

        let (bay, slot) = state.lot.action_to_bay_slot(placement.action);
        let score = score_placement(self.scorer, vehicle, &state.lot, &placement, self.lot_config);
        let allocation = state
            .ledger
            .insert_active(vehicle, bay, slot, score, vehicle.arrival);
        if let Err(e) = state.lot.occupy(placement.action, allocation.id) {
            state.ledger.discard(allocation.id);
            return AllocationOutcome::failed(&vehicle.plate, e.to_string());
        }

        if strategy.kind() == StrategyKind::Algorithm && mode == DecisionMode::Training {
            self.learn(vehicle, vehicles.get(index + 1), &state.lot, placement.action);
        }

        AllocationOutcome::success(&allocation)
    }

    /// TD update for the decision just made. The next state is the next
    /// vehicle's (priority, hour); the last vehicle or a full lot is terminal.
    fn learn(&self, vehicle: &Vehicle, next: Option<&Vehicle>, lot: &ParkingLot, action: usize) {
        let priority = vehicle.effective_priority();
        let hour = vehicle.arrival_hour();
        let (bay, slot) = lot.action_to_bay_slot(action);
        let r = reward(bay, slot, priority, hour, self.lot_config);

        let (next_priority, next_hour, next_available) = match next {
            Some(n) => (n.effective_priority(), n.arrival_hour(), lot.available_spaces()),
            None => (priority, hour, Vec::new()),
        };
        match self.policy.update(
            priority,
            hour,
            action,
            r,
            next_priority,
            next_hour,
            &next_available,
        ) {
            Ok(value) => log_debug!(
                self.verbosity,
                "q[{}][{}][{}] <- {:.4} (reward {:.2})",
                priority,
                hour,
                action,
                value,
                r
            ),
            Err(e) => log::warn!("Skipping policy update for {}: {}", vehicle.plate, e),
        }
    }

    /// Run every strategy over the same batch, each on its own lot.
    ///
    /// Strategies run on separate threads; each one's RNG stream depends only
    /// on the seed and the strategy, so results do not depend on scheduling.
    pub fn compare_all(
        &self,
        vehicles: &[Vehicle],
        options: &SimulationOptions<'_>,
    ) -> BTreeMap<String, SimulationResult> {
        std::thread::scope(|scope| {
            let handles: Vec<_> = StrategyKind::ALL
                .iter()
                .map(|&kind| scope.spawn(move || self.simulate(vehicles, kind, options)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    let result = handle
                        .join()
                        .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
                    (result.strategy.clone(), result)
                })
                .collect()
        })
    }

    /// Repeated training episodes of the learned strategy over one batch.
    pub fn train(
        &self,
        vehicles: &[Vehicle],
        episodes: usize,
        options: &SimulationOptions<'_>,
    ) -> Vec<SimulationResult> {
        let mut results = Vec::with_capacity(episodes);
        for episode in 0..episodes {
            let episode_options = SimulationOptions {
                seed: options.seed.wrapping_add(episode as u64),
                mode: DecisionMode::Training,
                ..*options
            };
            let result = self.simulate(vehicles, StrategyKind::Algorithm, &episode_options);
            let stop = !result.completed;
            results.push(result);
            if stop {
                break;
            }
        }
        results
    }
}

fn summarize(
    kind: StrategyKind,
    outcomes: Vec<AllocationOutcome>,
    processing_time: Duration,
    final_parking_status: ParkingStatus,
    completed: bool,
) -> SimulationResult {
    let total_vehicles = outcomes.len();
    let scores: Vec<f64> = outcomes.iter().filter_map(|o| o.score).collect();
    let successful_allocations = outcomes.iter().filter(|o| o.is_success()).count();
    let success_rate = if total_vehicles > 0 {
        successful_allocations as f64 / total_vehicles as f64 * 100.0
    } else {
        0.0
    };
    let average_allocation_score = if scores.is_empty() {
        None
    } else {
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    };

    SimulationResult {
        strategy: kind.name().to_string(),
        total_vehicles,
        successful_allocations,
        failed_allocations: total_vehicles - successful_allocations,
        success_rate,
        average_allocation_score,
        total_processing_time: processing_time.as_secs_f64(),
        allocation_results: outcomes,
        final_parking_status,
        completed,
    }
}
