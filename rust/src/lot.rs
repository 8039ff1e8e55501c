//! Occupancy tracking for the bays and slots of one parking lot.
//!
//! Every (bay, slot) pair is linearized into an action index
//! `bay * slots_per_bay + slot`, which is also the action space of the policy
//! table. Slot `i` is occupied iff `occupants[i]` holds an allocation id, so
//! the occupancy flag can never disagree with the attached allocation.

use thiserror::Error;

use crate::config::LotConfig;
use crate::models::AllocationId;

/// Errors from occupancy mutations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LotError {
    #[error("Invalid action {action}: {reason}")]
    InvalidAction { action: usize, reason: String },
    #[error("Slot for action {0} is not occupied")]
    NotOccupied(usize),
}

/// Occupancy state for one lot.
#[derive(Clone, Debug)]
pub struct ParkingLot {
    num_bays: usize,
    slots_per_bay: usize,
    occupants: Vec<Option<AllocationId>>,
}

impl ParkingLot {
    /// Create an empty lot with the given topology.
    pub fn new(config: &LotConfig) -> Self {
        Self {
            num_bays: config.num_bays,
            slots_per_bay: config.slots_per_bay,
            occupants: vec![None; config.total_slots()],
        }
    }

    pub fn num_bays(&self) -> usize {
        self.num_bays
    }

    pub fn slots_per_bay(&self) -> usize {
        self.slots_per_bay
    }

    pub fn total_slots(&self) -> usize {
        self.occupants.len()
    }

    /// Free action indices in ascending order (bay-major, slot-minor).
    ///
    /// The ordering is relied upon by the sequential strategy and by
    /// tie-breaking in the policy table.
    pub fn available_spaces(&self) -> Vec<usize> {
        self.occupants
            .iter()
            .enumerate()
            .filter(|(_, occupant)| occupant.is_none())
            .map(|(action, _)| action)
            .collect()
    }

    pub fn has_capacity(&self) -> bool {
        self.occupants.iter().any(Option::is_none)
    }

    pub fn occupied_count(&self) -> usize {
        self.occupants.iter().filter(|o| o.is_some()).count()
    }

    pub fn is_occupied(&self, action: usize) -> bool {
        matches!(self.occupants.get(action), Some(Some(_)))
    }

    /// Allocation currently holding the slot, if any.
    pub fn occupant(&self, action: usize) -> Option<AllocationId> {
        self.occupants.get(action).copied().flatten()
    }

    /// Mark a slot occupied by `allocation_id`.
    pub fn occupy(&mut self, action: usize, allocation_id: AllocationId) -> Result<(), LotError> {
        let total = self.total_slots();
        let slot = self
            .occupants
            .get_mut(action)
            .ok_or_else(|| LotError::InvalidAction {
                action,
                reason: format!("out of range (lot has {} slots)", total),
            })?;
        if let Some(existing) = slot {
            return Err(LotError::InvalidAction {
                action,
                reason: format!("already occupied by allocation {}", existing),
            });
        }
        *slot = Some(allocation_id);
        Ok(())
    }

    /// Free a slot, returning the allocation that held it.
    pub fn release(&mut self, action: usize) -> Result<AllocationId, LotError> {
        self.occupants
            .get_mut(action)
            .and_then(Option::take)
            .ok_or(LotError::NotOccupied(action))
    }

    /// Free every slot.
    pub fn reset(&mut self) {
        self.occupants.iter_mut().for_each(|o| *o = None);
    }

    /// Split an action index into 0-based (bay, slot).
    pub fn action_to_bay_slot(&self, action: usize) -> (usize, usize) {
        (action / self.slots_per_bay, action % self.slots_per_bay)
    }

    /// Inverse of [`ParkingLot::action_to_bay_slot`].
    pub fn bay_slot_to_action(&self, bay: usize, slot: usize) -> usize {
        bay * self.slots_per_bay + slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn small_lot() -> ParkingLot {
        ParkingLot::new(&LotConfig {
            num_bays: 2,
            slots_per_bay: 3,
            ..LotConfig::default()
        })
    }

    #[test]
    fn test_action_round_trip() {
        let lot = ParkingLot::new(&LotConfig::default());
        assert_eq!(lot.action_to_bay_slot(0), (0, 0));
        assert_eq!(lot.action_to_bay_slot(13), (1, 3));
        assert_eq!(lot.action_to_bay_slot(39), (3, 9));
        for action in 0..lot.total_slots() {
            let (bay, slot) = lot.action_to_bay_slot(action);
            assert_eq!(lot.bay_slot_to_action(bay, slot), action);
        }
    }

    #[test]
    fn test_available_spaces_ascending() {
        let mut lot = small_lot();
        lot.occupy(1, 10).unwrap();
        lot.occupy(4, 11).unwrap();
        assert_eq!(lot.available_spaces(), vec![0, 2, 3, 5]);
        assert_eq!(lot.occupied_count(), 2);
        assert_eq!(lot.occupant(4), Some(11));
    }

    #[test]
    fn test_occupy_rejects_invalid_targets() {
        let mut lot = small_lot();
        assert!(matches!(
            lot.occupy(6, 1),
            Err(LotError::InvalidAction { action: 6, .. })
        ));
        lot.occupy(2, 1).unwrap();
        assert!(matches!(
            lot.occupy(2, 2),
            Err(LotError::InvalidAction { action: 2, .. })
        ));
        // Failed occupy must not replace the occupant
        assert_eq!(lot.occupant(2), Some(1));
    }

    #[test]
    fn test_release() {
        let mut lot = small_lot();
        assert_eq!(lot.release(0), Err(LotError::NotOccupied(0)));
        assert_eq!(lot.release(99), Err(LotError::NotOccupied(99)));

        lot.occupy(0, 5).unwrap();
        assert_eq!(lot.release(0), Ok(5));
        assert!(!lot.is_occupied(0));
        assert_eq!(lot.release(0), Err(LotError::NotOccupied(0)));
    }

    #[test]
    fn test_exclusivity_under_random_operations() {
        let mut lot = small_lot();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut next_id = 0;

        for _ in 0..500 {
            let action = rng.gen_range(0..lot.total_slots());
            if rng.gen_bool(0.5) {
                let _ = lot.occupy(action, next_id);
                next_id += 1;
            } else {
                let _ = lot.release(action);
            }

            let mut held: Vec<AllocationId> =
                (0..lot.total_slots()).filter_map(|a| lot.occupant(a)).collect();
            let before = held.len();
            held.sort_unstable();
            held.dedup();
            assert_eq!(held.len(), before);
            assert_eq!(
                lot.occupied_count() + lot.available_spaces().len(),
                lot.total_slots()
            );
        }
    }
}
