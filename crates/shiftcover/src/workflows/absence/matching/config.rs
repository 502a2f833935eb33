use serde::{Deserialize, Serialize};

/// Scoring weights applied when ranking substitution candidates. The exact
/// numbers are deployment policy; the monotonicity contract in `rules` holds
/// for any finite, non-negative configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Points removed when the candidate sits at the edge of their radius.
    pub distance_penalty_max: f64,
    /// Completed bookings in the category below which a candidate counts as
    /// inexperienced.
    pub inexperience_threshold: u32,
    /// Points removed from a candidate with zero experience in the category;
    /// scales down linearly toward the threshold.
    pub inexperience_penalty: f64,
    /// Points added to a candidate rated at the platform maximum.
    pub rating_bonus_max: f64,
    /// Platform-wide average rating; only candidates above it earn a bonus.
    pub platform_average_rating: f32,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            distance_penalty_max: 40.0,
            inexperience_threshold: 10,
            inexperience_penalty: 25.0,
            rating_bonus_max: 10.0,
            platform_average_rating: 4.2,
        }
    }
}
