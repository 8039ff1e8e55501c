//! Allocation-quality scoring.
//!
//! A score is produced either by a trained linear regressor loaded at startup
//! or by a fixed fallback formula. Scoring never fails: a missing, unreadable
//! or incompatible model degrades to the fallback.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::LotConfig;
use crate::models::Vehicle;

/// Number of features the regressor consumes.
pub const FEATURE_COUNT: usize = 8;

const BASE_SCORE: f64 = 50.0;
const PEAK_TIME_FACTOR: f64 = 1.5;

/// Features describing one vehicle at arrival, in model input order.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureVector {
    pub plate_class: f64,
    pub vehicle_class: f64,
    pub day_of_week: f64,
    pub hour_of_day: f64,
    pub duration_hours: f64,
    pub priority_level: f64,
    pub arrival_hour: f64,
    pub arrival_minute: f64,
}

impl FeatureVector {
    pub fn from_vehicle(vehicle: &Vehicle) -> Self {
        let hour = vehicle.arrival_hour() as f64;
        Self {
            plate_class: vehicle.plate_class.code() as f64,
            vehicle_class: vehicle.vehicle_class.code() as f64,
            day_of_week: vehicle.day_of_week() as f64,
            hour_of_day: hour,
            duration_hours: vehicle.duration_hours(),
            priority_level: vehicle.effective_priority() as f64,
            arrival_hour: hour,
            arrival_minute: vehicle.arrival_minute() as f64,
        }
    }

    pub fn as_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.plate_class,
            self.vehicle_class,
            self.day_of_week,
            self.hour_of_day,
            self.duration_hours,
            self.priority_level,
            self.arrival_hour,
            self.arrival_minute,
        ]
    }
}

/// Linear regressor exported by the offline training pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinearRegressor {
    pub intercept: f64,
    pub coefficients: Vec<f64>,
}

impl LinearRegressor {
    pub fn predict(&self, features: &FeatureVector) -> f64 {
        self.coefficients
            .iter()
            .zip(features.as_array())
            .fold(self.intercept, |acc, (w, x)| acc + w * x)
    }
}

/// Scoring backend.
#[derive(Clone, Debug, PartialEq)]
pub enum ScoringModel {
    Regression(LinearRegressor),
    Fallback,
}

impl ScoringModel {
    /// Load a model artifact, degrading to the fallback formula on any problem.
    pub fn load(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                log::warn!(
                    "Scoring model {} unreadable ({}); using fallback formula",
                    path.display(),
                    e
                );
                return Self::Fallback;
            }
        };
        match serde_json::from_str::<LinearRegressor>(&contents) {
            Ok(model) => Self::from_regressor(model),
            Err(e) => {
                log::warn!(
                    "Scoring model {} is not a valid regressor ({}); using fallback formula",
                    path.display(),
                    e
                );
                Self::Fallback
            }
        }
    }

    /// Wrap a regressor, rejecting ones built for a different feature set.
    pub fn from_regressor(model: LinearRegressor) -> Self {
        let finite = model.intercept.is_finite() && model.coefficients.iter().all(|c| c.is_finite());
        if model.coefficients.len() != FEATURE_COUNT || !finite {
            log::warn!(
                "Scoring model expects {} features, got {} coefficients (finite={}); using fallback formula",
                FEATURE_COUNT,
                model.coefficients.len(),
                finite
            );
            return Self::Fallback;
        }
        Self::Regression(model)
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback)
    }

    /// Score placing a vehicle with these features at 0-based (bay, slot).
    ///
    /// The regressor ignores the placement; the fallback formula uses it.
    pub fn predict_score(
        &self,
        features: &FeatureVector,
        bay: usize,
        slot: usize,
        lot: &LotConfig,
    ) -> f64 {
        match self {
            Self::Regression(model) => {
                let score = model.predict(features);
                if score.is_finite() {
                    score
                } else {
                    fallback_score(features, bay, slot, lot)
                }
            }
            Self::Fallback => fallback_score(features, bay, slot, lot),
        }
    }
}

impl Default for ScoringModel {
    fn default() -> Self {
        Self::Fallback
    }
}

/// Deterministic score used whenever no trained model is available.
///
/// Formula: `50 + location * time_factor * priority_factor * duration_factor`
/// with `location = (5 - bay) * 10 + (11 - slot) * 5`.
pub fn fallback_score(features: &FeatureVector, bay: usize, slot: usize, lot: &LotConfig) -> f64 {
    let location = (5.0 - bay as f64) * 10.0 + (11.0 - slot as f64) * 5.0;
    let time_factor = if lot.is_peak_hour(features.hour_of_day as u32) {
        PEAK_TIME_FACTOR
    } else {
        1.0
    };
    let priority_factor = 1.0 + features.priority_level * 0.5;
    let duration_factor = (1.2 - features.duration_hours * 0.05).max(0.8);
    BASE_SCORE + location * time_factor * priority_factor * duration_factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_support::vehicle;
    use std::io::Write;

    fn features(hour: f64, priority: f64, duration: f64) -> FeatureVector {
        FeatureVector {
            plate_class: 0.0,
            vehicle_class: 0.0,
            day_of_week: 0.0,
            hour_of_day: hour,
            duration_hours: duration,
            priority_level: priority,
            arrival_hour: hour,
            arrival_minute: 0.0,
        }
    }

    #[test]
    fn test_fallback_literal_case() {
        let lot = LotConfig::default();
        let score = fallback_score(&features(8.0, 3.0, 2.0), 0, 0, &lot);
        assert!((score - 483.125).abs() < 1e-9);
    }

    #[test]
    fn test_fallback_off_peak_and_long_stay() {
        let lot = LotConfig::default();
        // location = 4*10 + 9*5 = 85; duration factor floors at 0.8
        let score = fallback_score(&features(12.0, 0.0, 20.0), 1, 2, &lot);
        assert!((score - (50.0 + 85.0 * 0.8)).abs() < 1e-9);
    }

    #[test]
    fn test_fallback_prefers_front_slots() {
        let lot = LotConfig::default();
        let f = features(9.0, 1.0, 3.0);
        assert!(fallback_score(&f, 0, 0, &lot) > fallback_score(&f, 0, 1, &lot));
        assert!(fallback_score(&f, 0, 9, &lot) > fallback_score(&f, 1, 9, &lot));
    }

    #[test]
    fn test_feature_vector_from_vehicle() {
        let mut v = vehicle("GOV1", 17, 3);
        v.plate_class = crate::models::PlateClass::Government;
        let f = FeatureVector::from_vehicle(&v);
        assert_eq!(f.plate_class, 2.0);
        assert_eq!(f.hour_of_day, 17.0);
        assert_eq!(f.priority_level, 2.0);
        assert!((f.duration_hours - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_regression_ignores_placement() {
        let lot = LotConfig::default();
        let model = ScoringModel::from_regressor(LinearRegressor {
            intercept: 10.0,
            coefficients: vec![0.0, 0.0, 0.0, 1.0, 0.0, 2.0, 0.0, 0.0],
        });
        assert!(!model.is_fallback());
        let f = features(8.0, 3.0, 2.0);
        assert!((model.predict_score(&f, 0, 0, &lot) - 24.0).abs() < 1e-9);
        assert!((model.predict_score(&f, 3, 9, &lot) - 24.0).abs() < 1e-9);
    }

    #[test]
    fn test_incompatible_model_degrades() {
        let model = ScoringModel::from_regressor(LinearRegressor {
            intercept: 1.0,
            coefficients: vec![1.0, 2.0],
        });
        assert!(model.is_fallback());

        let missing = ScoringModel::load(Path::new("/nonexistent/score_model.json"));
        assert!(missing.is_fallback());
    }

    #[test]
    fn test_load_model_artifact() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"intercept": 5.0, "coefficients": [1, 1, 1, 1, 1, 1, 1, 1]}}"#
        )
        .unwrap();
        let model = ScoringModel::load(file.path());
        assert!(!model.is_fallback());

        let mut garbage = tempfile::NamedTempFile::new().unwrap();
        write!(garbage, "not json").unwrap();
        assert!(ScoringModel::load(garbage.path()).is_fallback());
    }
}
