//! Scene desirability score.
//!
//! `score = 1 − √(cloudCover / 100) − age_in_decades`
//!
//! Higher is better. A scene missing either input scores `NaN`, which keeps
//! it reachable by id but out of every ranked scan.

use chrono::{DateTime, Utc};

use crate::models::Feature;

const SECONDS_PER_DECADE: f64 = 10.0 * 365.25 * 86_400.0;

/// Score a scene as of `now`.
pub fn score_at(feature: &Feature, now: DateTime<Utc>) -> f64 {
    let (Some(cloud), Some(acquired)) = (feature.cloud_cover(), feature.acquired_date()) else {
        return f64::NAN;
    };
    let cloud = cloud.clamp(0.0, 100.0);
    let age_seconds = (now - acquired).num_milliseconds() as f64 / 1000.0;
    let decades = age_seconds.max(0.0) / SECONDS_PER_DECADE;
    1.0 - (cloud / 100.0).sqrt() - decades
}

/// Score a scene as of now.
pub fn score(feature: &Feature) -> f64 {
    score_at(feature, Utc::now())
}

/// Whether a score may be ranked in a sub-index.
pub fn is_rankable(score: f64) -> bool {
    score.is_finite() && score > 0.0
}
