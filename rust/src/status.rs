//! Point-in-time occupancy report for a lot.

use chrono::NaiveDateTime;
use pyo3::prelude::*;
use serde::{Deserialize, Serialize};

use crate::ledger::AllocationLedger;
use crate::lot::ParkingLot;
use crate::models::Allocation;

#[pyclass]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SlotStatus {
    /// 1-based.
    #[pyo3(get)]
    pub slot_number: usize,
    #[pyo3(get)]
    pub is_occupied: bool,
    #[pyo3(get)]
    pub allocation: Option<Allocation>,
}

#[pyclass]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BayStatus {
    /// 1-based.
    #[pyo3(get)]
    pub bay_number: usize,
    #[pyo3(get)]
    pub slots: Vec<SlotStatus>,
}

impl BayStatus {
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.is_occupied).count()
    }
}

#[pyclass]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParkingStatus {
    #[pyo3(get)]
    pub bays: Vec<BayStatus>,
    #[pyo3(get)]
    pub total_slots: usize,
    #[pyo3(get)]
    pub occupied_slots: usize,
    #[pyo3(get)]
    pub available_slots: usize,
    /// Rounded to one decimal place, halves to even (6.25 -> 6.2).
    #[pyo3(get)]
    pub occupancy_percentage: f64,
    #[pyo3(get)]
    pub updated_at: NaiveDateTime,
}

impl ParkingStatus {
    /// Build the report from a lot and the ledger whose allocations occupy it.
    pub fn snapshot(lot: &ParkingLot, ledger: &AllocationLedger, now: NaiveDateTime) -> Self {
        let bays: Vec<BayStatus> = (0..lot.num_bays())
            .map(|bay| BayStatus {
                bay_number: bay + 1,
                slots: (0..lot.slots_per_bay())
                    .map(|slot| {
                        let action = lot.bay_slot_to_action(bay, slot);
                        let allocation = lot.occupant(action).and_then(|id| ledger.get(id)).cloned();
                        SlotStatus {
                            slot_number: slot + 1,
                            is_occupied: lot.is_occupied(action),
                            allocation,
                        }
                    })
                    .collect(),
            })
            .collect();

        let total_slots = lot.total_slots();
        let occupied_slots: usize = bays.iter().map(BayStatus::occupied).sum();
        // One decimal, ties to even
        let occupancy_percentage = if total_slots > 0 {
            let percent = occupied_slots as f64 / total_slots as f64 * 100.0;
            (percent * 10.0).round_ties_even() / 10.0
        } else {
            0.0
        };

        Self {
            bays,
            total_slots,
            occupied_slots,
            available_slots: total_slots - occupied_slots,
            occupancy_percentage,
            updated_at: now,
        }
    }
}

#[pymethods]
impl ParkingStatus {
    fn __repr__(&self) -> String {
        format!(
            "ParkingStatus(total={}, occupied={}, available={}, occupancy={}%)",
            self.total_slots, self.occupied_slots, self.available_slots, self.occupancy_percentage
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LotConfig;
    use crate::models::test_support::{at, vehicle};

    #[test]
    fn test_empty_lot() {
        let lot = ParkingLot::new(&LotConfig::default());
        let status = ParkingStatus::snapshot(&lot, &AllocationLedger::new(), at(12, 0));
        assert_eq!(status.bays.len(), 4);
        assert_eq!(status.bays[0].bay_number, 1);
        assert_eq!(status.bays[3].slots[9].slot_number, 10);
        assert_eq!(status.total_slots, 40);
        assert_eq!(status.available_slots, 40);
        assert_eq!(status.occupancy_percentage, 0.0);
    }

    #[test]
    fn test_occupied_slots_carry_allocation() {
        let mut lot = ParkingLot::new(&LotConfig {
            num_bays: 3,
            slots_per_bay: 1,
            ..LotConfig::default()
        });
        let mut ledger = AllocationLedger::new();
        let v = vehicle("AAA", 8, 2);
        let a = ledger.create(&v, 1, 0, 77.0, v.arrival).unwrap();
        lot.occupy(1, a.id).unwrap();

        let status = ParkingStatus::snapshot(&lot, &ledger, at(9, 0));
        assert_eq!(status.occupied_slots, 1);
        assert_eq!(status.available_slots, 2);
        // 1/3 rounds to 33.3
        assert!((status.occupancy_percentage - 33.3).abs() < 1e-9);
        let slot = &status.bays[1].slots[0];
        assert!(slot.is_occupied);
        assert_eq!(slot.allocation.as_ref().map(|a| a.id), Some(a.id));
        assert!(status.bays[0].slots[0].allocation.is_none());
    }

    #[test]
    fn test_occupancy_rounds_half_to_even() {
        let config = LotConfig {
            num_bays: 2,
            slots_per_bay: 8,
            ..LotConfig::default()
        };
        let mut lot = ParkingLot::new(&config);
        let mut ledger = AllocationLedger::new();
        fn park(ledger: &mut AllocationLedger, lot: &mut ParkingLot, plate: &str, action: usize) {
            let v = vehicle(plate, 8, 2);
            let (bay, slot) = lot.action_to_bay_slot(action);
            let a = ledger.create(&v, bay, slot, 1.0, v.arrival).unwrap();
            lot.occupy(action, a.id).unwrap();
        }

        // 1/16 = 6.25%
        park(&mut ledger, &mut lot, "AAA", 0);
        let status = ParkingStatus::snapshot(&lot, &ledger, at(9, 0));
        assert_eq!(status.occupancy_percentage, 6.2);

        // 3/16 = 18.75%
        park(&mut ledger, &mut lot, "BBB", 1);
        park(&mut ledger, &mut lot, "CCC", 2);
        let status = ParkingStatus::snapshot(&lot, &ledger, at(9, 0));
        assert_eq!(status.occupancy_percentage, 18.8);
    }
}
