use super::super::domain::{Booking, Provider};
use super::super::geo;
use super::config::MatchingConfig;

pub(crate) const MAX_SCORE: f64 = 100.0;

/// Eligibility predicate: the candidate must be live in the directory, offer
/// the booking's category, and have the booking location inside their own
/// service radius.
pub(crate) fn eligible(booking: &Booking, provider: &Provider) -> bool {
    if !provider.active || !provider.approved {
        return false;
    }
    if !provider.offers(&booking.category) {
        return false;
    }
    if provider.service_radius_km <= 0.0 {
        return false;
    }

    geo::distance_km(booking.location, provider.location) <= provider.service_radius_km
}

/// Compatibility score between a booking and an eligible candidate.
///
/// Base 100, minus a distance penalty proportional to how deep into their
/// radius the candidate must travel, minus an inexperience penalty scaled by
/// the shortfall against the category threshold, plus a rating bonus for
/// candidates above the platform average. Each term is monotone, so closer,
/// higher-rated, more-experienced candidates never rank below their peers.
pub(crate) fn score(booking: &Booking, provider: &Provider, config: &MatchingConfig) -> u8 {
    let mut score = MAX_SCORE;

    let distance = geo::distance_km(booking.location, provider.location);
    let ratio = (distance / provider.service_radius_km).clamp(0.0, 1.0);
    score -= ratio * config.distance_penalty_max;

    let experience = provider.completed_in(&booking.category);
    if config.inexperience_threshold > 0 && experience < config.inexperience_threshold {
        let shortfall = (config.inexperience_threshold - experience) as f64
            / config.inexperience_threshold as f64;
        score -= shortfall * config.inexperience_penalty;
    }

    let average = config.platform_average_rating as f64;
    let rating = provider.rating as f64;
    if rating > average && average < 5.0 {
        let lift = ((rating - average) / (5.0 - average)).clamp(0.0, 1.0);
        score += lift * config.rating_bonus_max;
    }

    score.clamp(0.0, MAX_SCORE).round() as u8
}
