//! Core data types for the allocation engine.

use chrono::{Datelike, NaiveDateTime, Timelike};
use pyo3::prelude::*;
use serde::{Deserialize, Serialize};

use crate::status::ParkingStatus;

/// Identifier of an allocation record, unique within one ledger.
pub type AllocationId = u64;

/// Highest priority level a vehicle may carry.
pub const MAX_PRIORITY: u8 = 3;

/// Registration class of a plate. Ordinal: Government ranks highest.
#[pyclass(eq, eq_int)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PlateClass {
    Private = 0,
    Public = 1,
    Government = 2,
}

impl PlateClass {
    /// Priority used when the vehicle carries no explicit override.
    pub fn default_priority(self) -> u8 {
        self as u8
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Private),
            1 => Some(Self::Public),
            2 => Some(Self::Government),
            _ => None,
        }
    }
}

/// Kind of vehicle.
#[pyclass(eq, eq_int)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VehicleClass {
    Car = 0,
    Truck = 1,
    Motorcycle = 2,
}

impl VehicleClass {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Car),
            1 => Some(Self::Truck),
            2 => Some(Self::Motorcycle),
            _ => None,
        }
    }
}

/// A vehicle asking for a parking space.
#[pyclass]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    #[pyo3(get, set)]
    pub plate: String,
    #[pyo3(get, set)]
    pub plate_class: PlateClass,
    #[pyo3(get, set)]
    pub vehicle_class: VehicleClass,
    #[pyo3(get, set)]
    pub arrival: NaiveDateTime,
    #[pyo3(get, set)]
    pub departure: NaiveDateTime,
    /// Explicit priority override (0-3). Takes precedence over the plate class.
    #[pyo3(get, set)]
    pub priority_level: Option<u8>,
}

impl Vehicle {
    /// Priority the engine acts on: explicit override, else plate-class default.
    pub fn effective_priority(&self) -> u8 {
        self.priority_level
            .unwrap_or_else(|| self.plate_class.default_priority())
            .min(MAX_PRIORITY)
    }

    /// Expected stay in hours (may be fractional).
    pub fn duration_hours(&self) -> f64 {
        (self.departure - self.arrival).num_seconds() as f64 / 3600.0
    }

    pub fn arrival_hour(&self) -> u32 {
        self.arrival.hour()
    }

    pub fn arrival_minute(&self) -> u32 {
        self.arrival.minute()
    }

    /// Day of week with Monday = 0.
    pub fn day_of_week(&self) -> u32 {
        self.arrival.weekday().num_days_from_monday()
    }

    /// Reject records the engine cannot reason about.
    pub fn validate(&self) -> Result<(), String> {
        if self.plate.trim().is_empty() {
            return Err("plate must not be empty".to_string());
        }
        if let Some(p) = self.priority_level {
            if p > MAX_PRIORITY {
                return Err(format!(
                    "priority_level must be in 0..={}, got {}",
                    MAX_PRIORITY, p
                ));
            }
        }
        if self.departure < self.arrival {
            return Err(format!(
                "departure {} is before arrival {} for {}",
                self.departure, self.arrival, self.plate
            ));
        }
        Ok(())
    }
}

#[pymethods]
impl Vehicle {
    #[new]
    #[pyo3(signature = (
        plate,
        plate_class,
        vehicle_class,
        arrival,
        departure,
        priority_level=None
    ))]
    fn new(
        plate: String,
        plate_class: PlateClass,
        vehicle_class: VehicleClass,
        arrival: NaiveDateTime,
        departure: NaiveDateTime,
        priority_level: Option<u8>,
    ) -> Self {
        Self {
            plate,
            plate_class,
            vehicle_class,
            arrival,
            departure,
            priority_level,
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "Vehicle(plate={:?}, plate_class={:?}, arrival={}, priority={})",
            self.plate,
            self.plate_class,
            self.arrival,
            self.effective_priority()
        )
    }
}

/// Lifecycle state of an allocation.
#[pyclass(eq, eq_int)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationStatus {
    Active,
    Released,
}

/// Binding of a vehicle to a (bay, slot) pair.
///
/// `bay` and `slot` are 0-based; reports use 1-based numbers.
#[pyclass]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    #[pyo3(get)]
    pub id: AllocationId,
    #[pyo3(get)]
    pub vehicle: Vehicle,
    #[pyo3(get)]
    pub bay: usize,
    #[pyo3(get)]
    pub slot: usize,
    #[pyo3(get)]
    pub score: f64,
    #[pyo3(get)]
    pub allocated_at: NaiveDateTime,
    #[pyo3(get)]
    pub departure: NaiveDateTime,
    #[pyo3(get)]
    pub status: AllocationStatus,
    #[pyo3(get)]
    pub released_at: Option<NaiveDateTime>,
}

impl Allocation {
    pub fn is_active(&self) -> bool {
        self.status == AllocationStatus::Active
    }

    pub fn plate(&self) -> &str {
        &self.vehicle.plate
    }
}

#[pymethods]
impl Allocation {
    /// 1-based bay number as shown to operators.
    #[getter]
    fn bay_number(&self) -> usize {
        self.bay + 1
    }

    /// 1-based slot number as shown to operators.
    #[getter]
    fn slot_number(&self) -> usize {
        self.slot + 1
    }

    fn __repr__(&self) -> String {
        format!(
            "Allocation(id={}, plate={:?}, bay={}, slot={}, score={:.3}, status={:?})",
            self.id,
            self.vehicle.plate,
            self.bay + 1,
            self.slot + 1,
            self.score,
            self.status
        )
    }
}

/// Result of a single serving-path allocation request.
#[derive(Clone, Debug, PartialEq)]
pub enum AllocationDecision {
    Allocated(Allocation),
    /// Every slot is taken. A normal outcome, not an error.
    NoCapacity,
}

impl AllocationDecision {
    pub fn allocation(&self) -> Option<&Allocation> {
        match self {
            Self::Allocated(a) => Some(a),
            Self::NoCapacity => None,
        }
    }

    pub fn into_allocation(self) -> Option<Allocation> {
        match self {
            Self::Allocated(a) => Some(a),
            Self::NoCapacity => None,
        }
    }
}

/// Whether a vehicle got a space during a simulation.
#[pyclass(eq, eq_int)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeStatus {
    Success,
    Failed,
}

/// Per-vehicle record produced by a simulation run.
#[pyclass]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AllocationOutcome {
    #[pyo3(get)]
    pub plate: String,
    #[pyo3(get)]
    pub status: OutcomeStatus,
    /// 1-based bay number.
    #[pyo3(get)]
    pub bay_number: Option<usize>,
    /// 1-based slot number.
    #[pyo3(get)]
    pub slot_number: Option<usize>,
    #[pyo3(get)]
    pub score: Option<f64>,
    #[pyo3(get)]
    pub allocated_at: Option<NaiveDateTime>,
    #[pyo3(get)]
    pub error_message: Option<String>,
}

impl AllocationOutcome {
    pub fn success(allocation: &Allocation) -> Self {
        Self {
            plate: allocation.vehicle.plate.clone(),
            status: OutcomeStatus::Success,
            bay_number: Some(allocation.bay + 1),
            slot_number: Some(allocation.slot + 1),
            score: Some(allocation.score),
            allocated_at: Some(allocation.allocated_at),
            error_message: None,
        }
    }

    pub fn failed(plate: &str, message: impl Into<String>) -> Self {
        Self {
            plate: plate.to_string(),
            status: OutcomeStatus::Failed,
            bay_number: None,
            slot_number: None,
            score: None,
            allocated_at: None,
            error_message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

#[pymethods]
impl AllocationOutcome {
    fn __repr__(&self) -> String {
        format!(
            "AllocationOutcome(plate={:?}, status={:?}, bay={:?}, slot={:?})",
            self.plate, self.status, self.bay_number, self.slot_number
        )
    }
}

/// Aggregate produced by one simulation run of one strategy.
#[pyclass]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulationResult {
    #[pyo3(get)]
    pub strategy: String,
    /// Vehicles actually processed (less than the batch on early termination).
    #[pyo3(get)]
    pub total_vehicles: usize,
    #[pyo3(get)]
    pub successful_allocations: usize,
    #[pyo3(get)]
    pub failed_allocations: usize,
    /// Percentage of processed vehicles that got a space.
    #[pyo3(get)]
    pub success_rate: f64,
    /// Mean score over successful allocations; None when nothing succeeded.
    #[pyo3(get)]
    pub average_allocation_score: Option<f64>,
    /// Wall time spent in allocation decisions, in seconds.
    #[pyo3(get)]
    pub total_processing_time: f64,
    #[pyo3(get)]
    pub allocation_results: Vec<AllocationOutcome>,
    #[pyo3(get)]
    pub final_parking_status: ParkingStatus,
    /// False when the run was cancelled before the batch was exhausted.
    #[pyo3(get)]
    pub completed: bool,
}

#[pymethods]
impl SimulationResult {
    fn __repr__(&self) -> String {
        format!(
            "SimulationResult(strategy={:?}, total={}, success={}, failed={}, avg_score={:?})",
            self.strategy,
            self.total_vehicles,
            self.successful_allocations,
            self.failed_allocations,
            self.average_allocation_score
        )
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::NaiveDate;

    pub fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 30)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    pub fn vehicle(plate: &str, hour: u32, stay_hours: u32) -> Vehicle {
        Vehicle {
            plate: plate.to_string(),
            plate_class: PlateClass::Private,
            vehicle_class: VehicleClass::Car,
            arrival: at(hour, 0),
            departure: at(hour + stay_hours, 0),
            priority_level: None,
        }
    }
}
