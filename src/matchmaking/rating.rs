//! Elo skill ratings with inactivity decay

use std::collections::HashMap;

pub const RATING_DEFAULT: f64 = 1200.0;
pub const RATING_FLOOR: f64 = 100.0;
pub const RATING_CEILING: f64 = 3000.0;
pub const K_FACTOR: f64 = 32.0;

/// Inactivity before decay kicks in, and its daily rate
pub const DECAY_AFTER_DAYS: u64 = 30;
pub const DECAY_PER_DAY: f64 = 2.0;

const MS_PER_DAY: u64 = 86_400_000;

/// Rating record for one player
#[derive(Debug, Clone)]
pub struct SkillRating {
    pub player_id: String,
    pub rating: f64,
    pub games: u32,
    pub wins: u32,
    pub losses: u32,
    pub last_updated: u64,
    /// Diagnostic volatility in [0.1, 1.0]
    pub volatility: f64,
}

impl SkillRating {
    pub fn new(player_id: String, now: u64) -> Self {
        Self {
            player_id,
            rating: RATING_DEFAULT,
            games: 0,
            wins: 0,
            losses: 0,
            last_updated: now,
            volatility: 0.5,
        }
    }
}

/// Expected score of `a` against `b`
pub fn expected_score(rating_a: f64, rating_b: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((rating_b - rating_a) / 400.0))
}

/// The matchmaker-owned rating table
#[derive(Debug, Default)]
pub struct RatingTable {
    ratings: HashMap<String, SkillRating>,
}

impl RatingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current rating, initialising at the default and applying any pending
    /// inactivity decay first
    pub fn rating_of(&mut self, player_id: &str, now: u64) -> f64 {
        self.apply_decay(player_id, now);
        self.ratings
            .entry(player_id.to_string())
            .or_insert_with(|| SkillRating::new(player_id.to_string(), now))
            .rating
    }

    pub fn get(&self, player_id: &str) -> Option<&SkillRating> {
        self.ratings.get(player_id)
    }

    /// Standard Elo update for a decided match. Rating changes are zero-sum
    /// before clamping; volatility drifts toward how surprising the result
    /// was.
    pub fn record_result(&mut self, winner_id: &str, loser_id: &str, now: u64) {
        let winner_rating = self.rating_of(winner_id, now);
        let loser_rating = self.rating_of(loser_id, now);

        let expected_winner = expected_score(winner_rating, loser_rating);
        let delta = K_FACTOR * (1.0 - expected_winner);

        if let Some(winner) = self.ratings.get_mut(winner_id) {
            winner.rating = (winner.rating + delta).clamp(RATING_FLOOR, RATING_CEILING);
            winner.games += 1;
            winner.wins += 1;
            winner.last_updated = now;
            winner.volatility =
                (winner.volatility + (1.0 - expected_winner).abs() * 0.1 - 0.05).clamp(0.1, 1.0);
        }
        if let Some(loser) = self.ratings.get_mut(loser_id) {
            let expected_loser = 1.0 - expected_winner;
            loser.rating = (loser.rating - delta).clamp(RATING_FLOOR, RATING_CEILING);
            loser.games += 1;
            loser.losses += 1;
            loser.last_updated = now;
            loser.volatility =
                (loser.volatility + (0.0 - expected_loser).abs() * 0.1 - 0.05).clamp(0.1, 1.0);
        }
    }

    /// Linear decay after prolonged inactivity, floored
    fn apply_decay(&mut self, player_id: &str, now: u64) {
        let Some(entry) = self.ratings.get_mut(player_id) else {
            return;
        };
        let idle_days = now.saturating_sub(entry.last_updated) / MS_PER_DAY;
        if idle_days <= DECAY_AFTER_DAYS {
            return;
        }
        let decayed_days = idle_days - DECAY_AFTER_DAYS;
        entry.rating =
            (entry.rating - decayed_days as f64 * DECAY_PER_DAY).max(RATING_FLOOR);
        entry.last_updated = now;
    }

    pub fn len(&self) -> usize {
        self.ratings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_ratings_winner_gains_half_k() {
        let mut table = RatingTable::new();
        table.rating_of("a", 0);
        table.rating_of("b", 0);

        table.record_result("a", "b", 1_000);
        assert_eq!(table.get("a").unwrap().rating, 1216.0);
        assert_eq!(table.get("b").unwrap().rating, 1184.0);
    }

    #[test]
    fn rating_changes_are_zero_sum() {
        let mut table = RatingTable::new();
        table.rating_of("a", 0);
        table.rating_of("b", 0);
        // skew the pairing first
        table.record_result("a", "b", 1_000);
        table.record_result("a", "b", 2_000);

        let sum = table.get("a").unwrap().rating + table.get("b").unwrap().rating;
        assert!((sum - 2.0 * RATING_DEFAULT).abs() < 1e-9);
    }

    #[test]
    fn upset_moves_more_points_than_expected_win() {
        let mut table = RatingTable::new();
        table.rating_of("low", 0);
        table.rating_of("high", 0);
        // push "high" up
        for i in 0..10 {
            table.record_result("high", "low", 1_000 + i);
        }
        let low_before = table.get("low").unwrap().rating;
        let high_before = table.get("high").unwrap().rating;

        table.record_result("low", "high", 50_000);
        let gained = table.get("low").unwrap().rating - low_before;
        assert!(gained > K_FACTOR / 2.0);
        assert!((high_before - table.get("high").unwrap().rating - gained).abs() < 1e-9);
    }

    #[test]
    fn rating_is_clamped_at_floor() {
        let mut table = RatingTable::new();
        table.rating_of("a", 0);
        table.rating_of("b", 0);
        if let Some(b) = table.ratings.get_mut("b") {
            b.rating = RATING_FLOOR + 1.0;
        }
        table.record_result("a", "b", 1_000);
        assert!(table.get("b").unwrap().rating >= RATING_FLOOR);
    }

    #[test]
    fn inactivity_decays_linearly_and_floors() {
        let mut table = RatingTable::new();
        table.rating_of("a", 0);

        // 35 days idle: 5 days past the threshold
        let now = 35 * MS_PER_DAY;
        let rating = table.rating_of("a", now);
        assert_eq!(rating, RATING_DEFAULT - 5.0 * DECAY_PER_DAY);

        // active players do not decay
        let mut fresh = RatingTable::new();
        fresh.rating_of("b", 0);
        assert_eq!(fresh.rating_of("b", MS_PER_DAY), RATING_DEFAULT);
    }

    #[test]
    fn volatility_stays_in_bounds() {
        let mut table = RatingTable::new();
        table.rating_of("a", 0);
        table.rating_of("b", 0);
        for i in 0..50 {
            table.record_result("a", "b", 1_000 + i);
        }
        let v = table.get("a").unwrap().volatility;
        assert!((0.1..=1.0).contains(&v));
    }
}
