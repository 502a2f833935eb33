mod config;
mod rules;

pub use config::MatchingConfig;

use super::domain::{Booking, Provider};

/// Stateless matcher applying the configured scoring policy to candidates.
pub struct GeoMatcher {
    config: MatchingConfig,
}

impl GeoMatcher {
    pub fn new(config: MatchingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    /// Whether the provider may substitute on this booking at all.
    pub fn eligible(&self, booking: &Booking, provider: &Provider) -> bool {
        rules::eligible(booking, provider)
    }

    /// Compatibility score, 0 through 100. Only meaningful for eligible
    /// candidates; ineligible ones are filtered before scoring.
    pub fn score(&self, booking: &Booking, provider: &Provider) -> u8 {
        rules::score(booking, provider, &self.config)
    }
}
