//! Allocation records and their lifecycle.
//!
//! The ledger keeps every allocation it ever created, active or released.
//! Releasing goes through the lot so the slot and the record change together.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::lot::{LotError, ParkingLot};
use crate::models::{Allocation, AllocationId, AllocationStatus, Vehicle};

/// Errors from ledger operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Vehicle {0} already has an active allocation")]
    DuplicateActiveAllocation(String),
    #[error("Allocation {0} not found")]
    NotFound(AllocationId),
    #[error(transparent)]
    Lot(#[from] LotError),
}

/// Store of allocation records.
#[derive(Clone, Debug, Default)]
pub struct AllocationLedger {
    next_id: AllocationId,
    /// Ordered by id, which is creation order.
    records: BTreeMap<AllocationId, Allocation>,
    /// Plate -> active allocation id.
    active_by_plate: FxHashMap<String, AllocationId>,
}

impl AllocationLedger {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    /// Record a new active allocation. Rejects plates that are already parked.
    pub fn create(
        &mut self,
        vehicle: &Vehicle,
        bay: usize,
        slot: usize,
        score: f64,
        now: NaiveDateTime,
    ) -> Result<Allocation, LedgerError> {
        if self.active_by_plate.contains_key(&vehicle.plate) {
            return Err(LedgerError::DuplicateActiveAllocation(vehicle.plate.clone()));
        }
        Ok(self.insert_active(vehicle, bay, slot, score, now))
    }

    /// Record an allocation without the duplicate-plate check.
    ///
    /// Simulation batches model a stream of visits, where the same plate may
    /// legitimately appear more than once.
    pub(crate) fn insert_active(
        &mut self,
        vehicle: &Vehicle,
        bay: usize,
        slot: usize,
        score: f64,
        now: NaiveDateTime,
    ) -> Allocation {
        let id = self.next_id.max(1);
        self.next_id = id + 1;
        let allocation = Allocation {
            id,
            vehicle: vehicle.clone(),
            bay,
            slot,
            score,
            allocated_at: now,
            departure: vehicle.departure,
            status: AllocationStatus::Active,
            released_at: None,
        };
        self.active_by_plate.insert(vehicle.plate.clone(), id);
        self.records.insert(id, allocation.clone());
        allocation
    }

    /// Drop a record that never reached the lot.
    pub(crate) fn discard(&mut self, id: AllocationId) {
        if let Some(allocation) = self.records.remove(&id) {
            if self.active_by_plate.get(allocation.plate()) == Some(&id) {
                self.active_by_plate.remove(allocation.plate());
            }
        }
    }

    pub fn get(&self, id: AllocationId) -> Option<&Allocation> {
        self.records.get(&id)
    }

    pub fn has_active(&self, plate: &str) -> bool {
        self.active_by_plate.contains_key(plate)
    }

    /// Active allocations, optionally only those for `plate`, in creation order.
    pub fn find_active(&self, plate: Option<&str>) -> Vec<Allocation> {
        self.records
            .values()
            .filter(|a| a.is_active())
            .filter(|a| plate.map_or(true, |p| a.plate() == p))
            .cloned()
            .collect()
    }

    /// Every record, active and released, in creation order.
    pub fn history(&self) -> Vec<Allocation> {
        self.records.values().cloned().collect()
    }

    pub fn active_count(&self) -> usize {
        self.records.values().filter(|a| a.is_active()).count()
    }

    /// Change the expected departure of an allocation.
    pub fn update_departure(
        &mut self,
        id: AllocationId,
        departure: NaiveDateTime,
    ) -> Result<Allocation, LedgerError> {
        let allocation = self.records.get_mut(&id).ok_or(LedgerError::NotFound(id))?;
        allocation.departure = departure;
        Ok(allocation.clone())
    }

    /// Release an active allocation and free its slot.
    ///
    /// Releasing an unknown or already released allocation is `NotFound`.
    pub fn release(
        &mut self,
        id: AllocationId,
        lot: &mut ParkingLot,
        now: NaiveDateTime,
    ) -> Result<Allocation, LedgerError> {
        let allocation = match self.records.get_mut(&id) {
            Some(a) if a.is_active() => a,
            _ => return Err(LedgerError::NotFound(id)),
        };
        let action = lot.bay_slot_to_action(allocation.bay, allocation.slot);
        if lot.occupant(action) == Some(id) {
            lot.release(action)?;
        }
        allocation.status = AllocationStatus::Released;
        allocation.released_at = Some(now);
        let released = allocation.clone();
        if self.active_by_plate.get(released.plate()) == Some(&id) {
            self.active_by_plate.remove(released.plate());
        }
        Ok(released)
    }

    /// Release every active allocation whose departure is at or before `now`.
    pub fn expire_due(&mut self, now: NaiveDateTime, lot: &mut ParkingLot) -> Vec<Allocation> {
        let due: Vec<AllocationId> = self
            .records
            .values()
            .filter(|a| a.is_active() && a.departure <= now)
            .map(|a| a.id)
            .collect();
        due.into_iter()
            .filter_map(|id| self.release(id, lot, now).ok())
            .collect()
    }

    /// Forget all records. The caller resets the lot.
    pub fn clear(&mut self) {
        self.records.clear();
        self.active_by_plate.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LotConfig;
    use crate::models::test_support::{at, vehicle};

    fn setup() -> (AllocationLedger, ParkingLot) {
        (AllocationLedger::new(), ParkingLot::new(&LotConfig::default()))
    }

    fn park(
        ledger: &mut AllocationLedger,
        lot: &mut ParkingLot,
        v: &Vehicle,
        action: usize,
    ) -> Allocation {
        let (bay, slot) = lot.action_to_bay_slot(action);
        let allocation = ledger.create(v, bay, slot, 100.0, v.arrival).unwrap();
        lot.occupy(action, allocation.id).unwrap();
        allocation
    }

    #[test]
    fn test_create_and_find() {
        let (mut ledger, mut lot) = setup();
        let a = park(&mut ledger, &mut lot, &vehicle("AAA", 8, 2), 0);
        let b = park(&mut ledger, &mut lot, &vehicle("BBB", 9, 2), 1);
        assert_ne!(a.id, b.id);
        assert_eq!(ledger.find_active(None).len(), 2);

        let only_b = ledger.find_active(Some("BBB"));
        assert_eq!(only_b.len(), 1);
        assert_eq!(only_b[0].id, b.id);
        assert!(ledger.find_active(Some("ZZZ")).is_empty());
    }

    #[test]
    fn test_duplicate_plate_rejected() {
        let (mut ledger, mut lot) = setup();
        let v = vehicle("AAA", 8, 2);
        park(&mut ledger, &mut lot, &v, 0);
        assert_eq!(
            ledger.create(&v, 0, 1, 1.0, v.arrival),
            Err(LedgerError::DuplicateActiveAllocation("AAA".to_string()))
        );
    }

    #[test]
    fn test_release_frees_slot_and_keeps_history() {
        let (mut ledger, mut lot) = setup();
        let v = vehicle("AAA", 8, 2);
        let a = park(&mut ledger, &mut lot, &v, 5);
        assert!(lot.is_occupied(5));

        let released = ledger.release(a.id, &mut lot, at(9, 0)).unwrap();
        assert_eq!(released.status, AllocationStatus::Released);
        assert_eq!(released.released_at, Some(at(9, 0)));
        assert!(!lot.is_occupied(5));
        assert!(ledger.find_active(None).is_empty());
        assert_eq!(ledger.history().len(), 1);

        // Second release is NotFound
        assert_eq!(
            ledger.release(a.id, &mut lot, at(9, 0)),
            Err(LedgerError::NotFound(a.id))
        );
        // Plate can park again
        park(&mut ledger, &mut lot, &v, 5);
    }

    #[test]
    fn test_update_departure() {
        let (mut ledger, mut lot) = setup();
        let a = park(&mut ledger, &mut lot, &vehicle("AAA", 8, 2), 0);
        let updated = ledger.update_departure(a.id, at(15, 30)).unwrap();
        assert_eq!(updated.departure, at(15, 30));
        assert_eq!(ledger.get(a.id).unwrap().departure, at(15, 30));
        assert_eq!(
            ledger.update_departure(999, at(15, 30)),
            Err(LedgerError::NotFound(999))
        );
    }

    #[test]
    fn test_expire_due() {
        let (mut ledger, mut lot) = setup();
        let short = park(&mut ledger, &mut lot, &vehicle("AAA", 8, 1), 0);
        let long = park(&mut ledger, &mut lot, &vehicle("BBB", 8, 5), 1);

        let expired = ledger.expire_due(at(9, 0), &mut lot);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, short.id);
        assert!(!lot.is_occupied(0));
        assert!(lot.is_occupied(1));

        // Pulling the departure into the past releases on the next sweep
        ledger.update_departure(long.id, at(8, 30)).unwrap();
        assert_eq!(ledger.expire_due(at(9, 0), &mut lot).len(), 1);
        assert_eq!(lot.occupied_count(), 0);
    }

    #[test]
    fn test_discard() {
        let (mut ledger, _lot) = setup();
        let v = vehicle("AAA", 8, 2);
        let a = ledger.create(&v, 0, 0, 1.0, v.arrival).unwrap();
        ledger.discard(a.id);
        assert!(ledger.get(a.id).is_none());
        assert!(!ledger.has_active("AAA"));
    }
}
