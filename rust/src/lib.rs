//! Rust implementation of the parking allocation decision engine.
//!
//! This module provides the allocation strategies, the learned policy, the
//! occupancy ledger, and the batch simulator, plus their Python bindings.

// Allow clippy warning triggered by PyO3 macro expansion
#![allow(clippy::useless_conversion)]

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDateTime;
use pyo3::exceptions::{PyKeyError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;

pub mod config;
pub mod engine;
pub mod ledger;
pub mod logging;
pub mod lot;
pub mod models;
pub mod policy;
pub mod scoring;
pub mod simulation;
pub mod status;
pub mod strategy;

pub use config::{EngineConfig, LotConfig, PolicyConfig};
pub use engine::{AllocationEngine, EngineError};
pub use ledger::{AllocationLedger, LedgerError};
pub use lot::{LotError, ParkingLot};
pub use models::{
    Allocation, AllocationDecision, AllocationId, AllocationOutcome, AllocationStatus,
    OutcomeStatus, PlateClass, SimulationResult, Vehicle, VehicleClass,
};
pub use policy::{PolicyError, PolicyTable, QPolicy};
pub use scoring::{FeatureVector, LinearRegressor, ScoringModel};
pub use simulation::{SimulationHarness, SimulationOptions};
pub use status::{BayStatus, ParkingStatus, SlotStatus};
pub use strategy::{AllocationStrategy, DecisionMode, StrategyKind};

fn to_py_err(e: EngineError) -> PyErr {
    match e {
        e if e.is_not_found() => PyKeyError::new_err(e.to_string()),
        EngineError::Policy(_) => PyRuntimeError::new_err(e.to_string()),
        e => PyValueError::new_err(e.to_string()),
    }
}

fn now_or(now: Option<NaiveDateTime>) -> NaiveDateTime {
    now.unwrap_or_else(|| chrono::Local::now().naive_local())
}

/// Allocation engine exposed to Python.
///
/// Times default to the local wall clock when not given.
#[pyclass(name = "ParkingEngine")]
pub struct PyParkingEngine {
    inner: AllocationEngine,
}

#[pymethods]
impl PyParkingEngine {
    #[new]
    #[pyo3(signature = (config=None))]
    fn new(config: Option<EngineConfig>) -> PyResult<Self> {
        let inner = AllocationEngine::new(config.unwrap_or_default()).map_err(to_py_err)?;
        Ok(Self { inner })
    }

    /// Allocate a slot. Returns None when the lot is full.
    ///
    /// # Raises
    /// * ValueError for an unknown strategy, an invalid vehicle, or a plate
    ///   that is already parked
    #[pyo3(signature = (vehicle, strategy="algorithm", now=None))]
    fn allocate(
        &self,
        vehicle: Vehicle,
        strategy: &str,
        now: Option<NaiveDateTime>,
    ) -> PyResult<Option<Allocation>> {
        let kind = AllocationEngine::parse_strategy(strategy).map_err(to_py_err)?;
        let decision = self
            .inner
            .allocate(&vehicle, kind, now_or(now))
            .map_err(to_py_err)?;
        Ok(decision.into_allocation())
    }

    /// Allocate each vehicle in order, collecting per-vehicle outcomes.
    #[pyo3(signature = (vehicles, strategy="algorithm", now=None))]
    fn allocate_bulk(
        &self,
        vehicles: Vec<Vehicle>,
        strategy: &str,
        now: Option<NaiveDateTime>,
    ) -> PyResult<Vec<AllocationOutcome>> {
        let kind = AllocationEngine::parse_strategy(strategy).map_err(to_py_err)?;
        let now = now_or(now);
        Ok(vehicles
            .iter()
            .map(|v| match self.inner.allocate(v, kind, now) {
                Ok(AllocationDecision::Allocated(a)) => AllocationOutcome::success(&a),
                Ok(AllocationDecision::NoCapacity) => {
                    AllocationOutcome::failed(&v.plate, "No available parking slots")
                }
                Err(e) => AllocationOutcome::failed(&v.plate, e.to_string()),
            })
            .collect())
    }

    #[pyo3(signature = (allocation_id, now=None))]
    fn release(&self, allocation_id: AllocationId, now: Option<NaiveDateTime>) -> PyResult<Allocation> {
        self.inner
            .release(allocation_id, now_or(now))
            .map_err(to_py_err)
    }

    /// Change the expected departure; a departure already past releases the slot.
    #[pyo3(signature = (allocation_id, departure, now=None))]
    fn update_departure(
        &self,
        allocation_id: AllocationId,
        departure: NaiveDateTime,
        now: Option<NaiveDateTime>,
    ) -> PyResult<Allocation> {
        self.inner
            .update_departure(allocation_id, departure, now_or(now))
            .map_err(to_py_err)
    }

    #[pyo3(signature = (allocation_id, now=None))]
    fn get_allocation(
        &self,
        allocation_id: AllocationId,
        now: Option<NaiveDateTime>,
    ) -> PyResult<Allocation> {
        self.inner
            .get_allocation(allocation_id, now_or(now))
            .map_err(to_py_err)
    }

    #[pyo3(signature = (plate=None, now=None))]
    fn find_active(&self, plate: Option<&str>, now: Option<NaiveDateTime>) -> Vec<Allocation> {
        self.inner.find_active(plate, now_or(now))
    }

    #[pyo3(signature = (now=None))]
    fn status(&self, now: Option<NaiveDateTime>) -> ParkingStatus {
        self.inner.status(now_or(now))
    }

    fn clear(&self) {
        self.inner.clear();
    }

    #[pyo3(signature = (vehicles, strategy="algorithm", now=None))]
    fn simulate(
        &self,
        vehicles: Vec<Vehicle>,
        strategy: &str,
        now: Option<NaiveDateTime>,
    ) -> PyResult<SimulationResult> {
        let kind = AllocationEngine::parse_strategy(strategy).map_err(to_py_err)?;
        Ok(self.inner.simulate(&vehicles, kind, now_or(now), None))
    }

    #[pyo3(signature = (vehicles, now=None))]
    fn compare_all(
        &self,
        vehicles: Vec<Vehicle>,
        now: Option<NaiveDateTime>,
    ) -> BTreeMap<String, SimulationResult> {
        self.inner.compare_all(&vehicles, now_or(now))
    }

    /// Run training episodes; returns one result per completed episode.
    #[pyo3(signature = (vehicles, episodes=1, now=None))]
    fn train(
        &self,
        vehicles: Vec<Vehicle>,
        episodes: usize,
        now: Option<NaiveDateTime>,
    ) -> Vec<SimulationResult> {
        self.inner.train(&vehicles, episodes, now_or(now), None)
    }

    fn save_policy(&self, path: &str) -> PyResult<()> {
        self.inner.save_policy(Path::new(path)).map_err(to_py_err)
    }

    fn reset_policy(&self) {
        self.inner.reset_policy();
    }

    #[getter]
    fn epsilon(&self) -> f64 {
        self.inner.policy().epsilon()
    }

    #[getter]
    fn uses_fallback_scoring(&self) -> bool {
        self.inner.scorer().is_fallback()
    }

    fn __repr__(&self) -> String {
        let lot = &self.inner.config().lot;
        format!(
            "ParkingEngine(bays={}, slots_per_bay={})",
            lot.num_bays, lot.slots_per_bay
        )
    }
}

/// The parkalloc.rust Python module.
#[pymodule]
fn rust(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Core data types
    m.add_class::<PlateClass>()?;
    m.add_class::<VehicleClass>()?;
    m.add_class::<Vehicle>()?;
    m.add_class::<AllocationStatus>()?;
    m.add_class::<Allocation>()?;
    m.add_class::<OutcomeStatus>()?;
    m.add_class::<AllocationOutcome>()?;
    m.add_class::<SimulationResult>()?;
    m.add_class::<SlotStatus>()?;
    m.add_class::<BayStatus>()?;
    m.add_class::<ParkingStatus>()?;

    // Config types
    m.add_class::<LotConfig>()?;
    m.add_class::<PolicyConfig>()?;
    m.add_class::<EngineConfig>()?;

    // Engine
    m.add_class::<PyParkingEngine>()?;

    Ok(())
}
