//! Air quality scoring of sensor readings.
//!
//! The canonical model classifies PM2.5 and PM10 into four ordered categories
//! and scores the worse of the two. A reading missing a particulate value is
//! treated as if the value was zero.
use serde::{Deserialize, Serialize};

use crate::record::SensorValues;

/// Inclusive upper bounds of the Good, Moderate and Poor PM2.5 categories.
const PM25_BOUNDS: [f64; 3] = [15.0, 35.0, 75.0];
/// Inclusive upper bounds of the Good, Moderate and Poor PM10 categories.
const PM10_BOUNDS: [f64; 3] = [30.0, 80.0, 150.0];

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
/// Ordered air quality category.
pub enum Category {
    Good,
    Moderate,
    Poor,
    VeryPoor,
}

impl Category {
    /// Priority of the category, higher is worse.
    pub fn priority(self) -> u8 {
        match self {
            Category::Good => 1,
            Category::Moderate => 2,
            Category::Poor => 3,
            Category::VeryPoor => 4,
        }
    }

    pub fn from_pm25(value: f64) -> Category {
        Self::classify(value, PM25_BOUNDS)
    }

    pub fn from_pm10(value: f64) -> Category {
        Self::classify(value, PM10_BOUNDS)
    }

    /// Maps the AirKorea grade codes `1..=4` onto a category.
    pub fn from_grade(grade: u8) -> Option<Category> {
        match grade {
            1 => Some(Category::Good),
            2 => Some(Category::Moderate),
            3 => Some(Category::Poor),
            4 => Some(Category::VeryPoor),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Category::Good => "good",
            Category::Moderate => "moderate",
            Category::Poor => "poor",
            Category::VeryPoor => "very_poor",
        }
    }

    pub fn from_label(label: &str) -> Option<Category> {
        match label {
            "good" => Some(Category::Good),
            "moderate" => Some(Category::Moderate),
            "poor" => Some(Category::Poor),
            "very_poor" => Some(Category::VeryPoor),
            _ => None,
        }
    }

    // NaN fails every comparison and lands in VeryPoor.
    fn classify(value: f64, bounds: [f64; 3]) -> Category {
        if value <= bounds[0] {
            Category::Good
        } else if value <= bounds[1] {
            Category::Moderate
        } else if value <= bounds[2] {
            Category::Poor
        } else {
            Category::VeryPoor
        }
    }
}

/// The worse category of both particulate classifications. PM2.5 wins ties.
pub fn final_category(pm25: f64, pm10: f64) -> Category {
    let pm25_category = Category::from_pm25(pm25);
    let pm10_category = Category::from_pm10(pm10);
    if pm25_category.priority() >= pm10_category.priority() {
        pm25_category
    } else {
        pm10_category
    }
}

/// Lookup table from category to numeric score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreTable {
    pub good: f64,
    pub moderate: f64,
    pub poor: f64,
    pub very_poor: f64,
}

impl ScoreTable {
    pub fn score(&self, category: Category) -> f64 {
        match category {
            Category::Good => self.good,
            Category::Moderate => self.moderate,
            Category::Poor => self.poor,
            Category::VeryPoor => self.very_poor,
        }
    }
}

pub const CANONICAL_TABLE: ScoreTable = ScoreTable {
    good: 1.0,
    moderate: 2.0,
    poor: 3.0,
    very_poor: 4.0,
};

pub const WEIGHTED_TABLE: ScoreTable = ScoreTable {
    good: 1.0,
    moderate: 1.5,
    poor: 2.0,
    very_poor: 2.0,
};

/// Scores a pair of particulate readings with the canonical table.
pub fn evaluate(pm25: f64, pm10: f64) -> f64 {
    CANONICAL_TABLE.score(final_category(pm25, pm10))
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Selects the scoring model applied to incoming readings.
pub enum ScoringProfile {
    /// Categorical model with scores 1 to 4.
    Categorical,
    /// Categorical model with scores 1, 1.5, 2 and 2.
    Weighted,
    /// Weighted sum of gas and particulate values, clamped to `0..=100`.
    Continuous,
}

impl Default for ScoringProfile {
    fn default() -> Self {
        ScoringProfile::Categorical
    }
}

impl ScoringProfile {
    pub fn score(self, values: &SensorValues) -> f64 {
        let pm25 = values.pm2_5.unwrap_or(0.0);
        let pm10 = values.pm10.unwrap_or(0.0);
        match self {
            ScoringProfile::Categorical => evaluate(pm25, pm10),
            ScoringProfile::Weighted => WEIGHTED_TABLE.score(final_category(pm25, pm10)),
            ScoringProfile::Continuous => continuous_score(values),
        }
    }
}

fn continuous_score(values: &SensorValues) -> f64 {
    let penalty = 0.1 * values.co2eq.unwrap_or(0.0)
        + 0.5 * values.pm1_0.unwrap_or(0.0)
        + 0.3 * values.pm2_5.unwrap_or(0.0)
        + 0.2 * values.tvoc.unwrap_or(0.0);
    let score = 100.0 - penalty;
    if score.is_nan() {
        return 0.0;
    }
    score.max(0.0).min(100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_air_is_good() {
        for pm25 in &[0.0, 5.0, 14.9, 15.0] {
            for pm10 in &[0.0, 12.0, 29.5, 30.0] {
                assert_eq!(evaluate(*pm25, *pm10), 1.0, "pm25={} pm10={}", pm25, pm10);
            }
        }
    }

    #[test]
    fn pm25_upper_bounds_are_inclusive() {
        assert_eq!(Category::from_pm25(15.0), Category::Good);
        assert_eq!(Category::from_pm25(16.0), Category::Moderate);
        assert_eq!(Category::from_pm25(35.0), Category::Moderate);
        assert_eq!(Category::from_pm25(36.0), Category::Poor);
        assert_eq!(Category::from_pm25(75.0), Category::Poor);
        assert_eq!(Category::from_pm25(76.0), Category::VeryPoor);
    }

    #[test]
    fn pm10_upper_bounds_are_inclusive() {
        assert_eq!(Category::from_pm10(30.0), Category::Good);
        assert_eq!(Category::from_pm10(31.0), Category::Moderate);
        assert_eq!(Category::from_pm10(80.0), Category::Moderate);
        assert_eq!(Category::from_pm10(81.0), Category::Poor);
        assert_eq!(Category::from_pm10(150.0), Category::Poor);
        assert_eq!(Category::from_pm10(151.0), Category::VeryPoor);
    }

    #[test]
    fn worse_category_wins() {
        assert_eq!(final_category(10.0, 90.0), Category::Poor);
        assert_eq!(evaluate(10.0, 90.0), 3.0);
        assert_eq!(final_category(80.0, 10.0), Category::VeryPoor);
        assert_eq!(evaluate(80.0, 10.0), 4.0);
        assert_eq!(evaluate(20.0, 50.0), 2.0);
    }

    #[test]
    fn missing_particulates_score_good() {
        let values = SensorValues {
            temperature: Some(25.5),
            co2eq: Some(4000.0),
            ..Default::default()
        };
        assert_eq!(ScoringProfile::Categorical.score(&values), 1.0);
        assert_eq!(ScoringProfile::Weighted.score(&values), 1.0);
    }

    #[test]
    fn weighted_profile_collapses_bad_categories() {
        let score = |pm25: f64| {
            ScoringProfile::Weighted.score(&SensorValues {
                pm2_5: Some(pm25),
                ..Default::default()
            })
        };
        assert_eq!(score(10.0), 1.0);
        assert_eq!(score(20.0), 1.5);
        assert_eq!(score(50.0), 2.0);
        assert_eq!(score(500.0), 2.0);
    }

    #[test]
    fn continuous_profile_is_clamped() {
        let values = SensorValues {
            co2eq: Some(400.0),
            pm1_0: Some(2.0),
            pm2_5: Some(10.0),
            tvoc: Some(5.0),
            ..Default::default()
        };
        // 100 - (40 + 1 + 3 + 1)
        assert!((ScoringProfile::Continuous.score(&values) - 55.0).abs() < 1e-9);

        let polluted = SensorValues {
            co2eq: Some(5000.0),
            ..Default::default()
        };
        assert_eq!(ScoringProfile::Continuous.score(&polluted), 0.0);
        assert_eq!(ScoringProfile::Continuous.score(&SensorValues::default()), 100.0);
    }

    #[test]
    fn nan_is_scored_finite() {
        assert_eq!(evaluate(f64::NAN, 0.0), 4.0);
        let values = SensorValues {
            tvoc: Some(f64::NAN),
            ..Default::default()
        };
        assert_eq!(ScoringProfile::Continuous.score(&values), 0.0);
    }

    #[test]
    fn grades_and_labels_map_to_categories() {
        assert_eq!(Category::from_grade(1), Some(Category::Good));
        assert_eq!(Category::from_grade(4), Some(Category::VeryPoor));
        assert_eq!(Category::from_grade(0), None);
        assert_eq!(Category::from_label(Category::VeryPoor.label()), Some(Category::VeryPoor));
        assert_eq!(
            serde_json::to_string(&Category::VeryPoor).unwrap(),
            "\"very_poor\""
        );
    }

    #[test]
    fn profile_names_deserialize() {
        let profile: ScoringProfile = serde_yaml::from_str("continuous").unwrap();
        assert_eq!(profile, ScoringProfile::Continuous);
        assert_eq!(ScoringProfile::default(), ScoringProfile::Categorical);
    }
}
