use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub const DEFAULT_RATING: f64 = 1500.0;
pub const DEFAULT_K_FACTOR: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingUpdate {
    pub home_rating: f64,
    pub away_rating: f64,
    pub expected_home: f64,
    pub expected_away: f64,
    pub delta_home: f64,
    pub delta_away: f64,
}

/// A finished result, as fed to the rating replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishedResult {
    pub home_id: u32,
    pub away_id: u32,
    pub goals_home: u8,
    pub goals_away: u8,
    #[serde(default)]
    pub season: Option<String>,
    // ISO-ish kickoff string; only used for ordering.
    #[serde(default)]
    pub kickoff: String,
}

pub fn expected_score(r_a: f64, r_b: f64) -> f64 {
    1.0 / (1.0 + 10.0_f64.powf((r_b - r_a) / 400.0))
}

/// Scales K for the winning margin: flat up to one goal, then +10% per goal, capped at four.
pub fn margin_k_factor(k_factor: f64, goals_home: u8, goals_away: u8) -> f64 {
    let diff = (goals_home as i32 - goals_away as i32).unsigned_abs();
    let extra = diff.clamp(1, 4) - 1;
    k_factor * (1.0 + 0.10 * extra as f64)
}

pub fn actual_scores(goals_home: u8, goals_away: u8) -> (f64, f64) {
    if goals_home > goals_away {
        (1.0, 0.0)
    } else if goals_home < goals_away {
        (0.0, 1.0)
    } else {
        (0.5, 0.5)
    }
}

pub fn rate_match(
    home_rating: f64,
    away_rating: f64,
    goals_home: u8,
    goals_away: u8,
    k_factor: f64,
) -> RatingUpdate {
    let k_factor = if k_factor.is_finite() && k_factor > 0.0 {
        k_factor
    } else {
        DEFAULT_K_FACTOR
    };
    let expected_home = expected_score(home_rating, away_rating);
    let expected_away = expected_score(away_rating, home_rating);
    let (s_home, s_away) = actual_scores(goals_home, goals_away);
    let k = margin_k_factor(k_factor, goals_home, goals_away);

    let delta_home = k * (s_home - expected_home);
    let delta_away = k * (s_away - expected_away);

    RatingUpdate {
        home_rating: home_rating + delta_home,
        away_rating: away_rating + delta_away,
        expected_home,
        expected_away,
        delta_home,
        delta_away,
    }
}

/// Replays results in kickoff order starting from `initial`, unseen teams at the default.
pub fn replay_ratings(
    initial: &HashMap<u32, f64>,
    results: &[FinishedResult],
    k_factor: f64,
) -> HashMap<u32, f64> {
    let mut ordered: Vec<&FinishedResult> = results.iter().collect();
    ordered.sort_by(|a, b| a.kickoff.cmp(&b.kickoff));

    let mut elo = initial.clone();
    for m in ordered {
        let eh = *elo.entry(m.home_id).or_insert(DEFAULT_RATING);
        let ea = *elo.entry(m.away_id).or_insert(DEFAULT_RATING);
        let update = rate_match(eh, ea, m.goals_home, m.goals_away, k_factor);
        elo.insert(m.home_id, update.home_rating);
        elo.insert(m.away_id, update.away_rating);
    }
    elo
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_scores_are_complementary() {
        for (a, b) in [(1500.0, 1500.0), (1720.0, 1480.0), (1300.0, 1900.0)] {
            let sum = expected_score(a, b) + expected_score(b, a);
            assert!((sum - 1.0).abs() < 1e-12);
        }
        assert!((expected_score(1500.0, 1500.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn margin_scaling_steps() {
        assert_eq!(margin_k_factor(20.0, 0, 0), 20.0);
        assert_eq!(margin_k_factor(20.0, 1, 0), 20.0);
        assert!((margin_k_factor(20.0, 2, 0) - 22.0).abs() < 1e-12);
        assert!((margin_k_factor(20.0, 0, 3) - 24.0).abs() < 1e-12);
        assert!((margin_k_factor(20.0, 4, 0) - 26.0).abs() < 1e-12);
        assert!((margin_k_factor(20.0, 7, 0) - 26.0).abs() < 1e-12);
    }

    #[test]
    fn decisive_result_between_equals_is_zero_sum() {
        let u = rate_match(1500.0, 1500.0, 1, 0, 20.0);
        assert!(u.home_rating > 1500.0);
        assert!(u.away_rating < 1500.0);
        assert!((u.delta_home + u.delta_away).abs() < 1e-12);
        assert!((u.delta_home - 10.0).abs() < 1e-12);
    }

    #[test]
    fn draw_between_equals_changes_nothing() {
        let u = rate_match(1500.0, 1500.0, 2, 2, 20.0);
        assert_eq!(u.delta_home, 0.0);
        assert_eq!(u.home_rating, 1500.0);
        assert_eq!(u.away_rating, 1500.0);
    }

    #[test]
    fn replay_orders_by_kickoff() {
        let results = vec![
            FinishedResult {
                home_id: 2,
                away_id: 1,
                goals_home: 0,
                goals_away: 3,
                season: None,
                kickoff: "2024-02-01T15:00:00Z".to_string(),
            },
            FinishedResult {
                home_id: 1,
                away_id: 2,
                goals_home: 1,
                goals_away: 0,
                season: None,
                kickoff: "2024-01-01T15:00:00Z".to_string(),
            },
        ];
        let elo = replay_ratings(&HashMap::new(), &results, 20.0);
        assert!(elo[&1] > DEFAULT_RATING);
        assert!(elo[&2] < DEFAULT_RATING);
        assert!((elo[&1] + elo[&2] - 2.0 * DEFAULT_RATING).abs() < 1e-9);
    }
}
