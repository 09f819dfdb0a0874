use proptest::prelude::*;

use matchcast::calibration::{
    CalibrationMeta, IdentityCalibrator, Prob3, calibrate_match_probabilities,
};
use matchcast::elo::{expected_score, rate_match};
use matchcast::markets::aggregate_poisson_markets;
use matchcast::markov::{
    MarkovConfig, MarkovContext, build_transition_matrix, goal_prob_horizon, is_row_stochastic,
};
use matchcast::scoreline::{ScoreModel, normalize_matrix, poisson_probability, scoreline_matrix};

fn model() -> impl Strategy<Value = ScoreModel> {
    prop_oneof![
        Just(ScoreModel::Independent),
        (-0.2f64..0.2).prop_map(|tau| ScoreModel::DixonColes { tau }),
        (0.0f64..0.3).prop_map(|rho| ScoreModel::Bivariate { rho }),
    ]
}

proptest! {
    #[test]
    fn identity_calibration_keeps_probabilities(
        w in (0.01f64..1.0, 0.01f64..1.0, 0.01f64..1.0),
        lh in 0.25f64..3.8,
        la in 0.25f64..3.8,
        elo in (800.0f64..2200.0, 800.0f64..2200.0),
        pressure in 0.0f64..1.0,
        intensity in 0.0f64..3.0,
    ) {
        let total = w.0 + w.1 + w.2;
        let probs = Prob3 { home: w.0 / total, draw: w.1 / total, away: w.2 / total };
        let matrix = scoreline_matrix(lh, la, 10, ScoreModel::default());
        let markets = aggregate_poisson_markets(&matrix, None);
        let meta = CalibrationMeta {
            lambda_home: lh,
            lambda_away: la,
            elo_home: elo.0,
            elo_away: elo.1,
            pressure,
            intensity,
        };
        let out = calibrate_match_probabilities(&IdentityCalibrator, probs, &markets, &meta);
        prop_assert_eq!(out.home, probs.home);
        prop_assert_eq!(out.draw, probs.draw);
        prop_assert_eq!(out.away, probs.away);
    }

    #[test]
    fn scoreline_mass_is_close_to_one(lh in 0.0f64..3.0, la in 0.0f64..3.0, m in model()) {
        let matrix = scoreline_matrix(lh, la, 10, m);
        let total = matrix.total();
        prop_assert!(total <= 1.0 + 1e-9, "total {total}");
        prop_assert!(total > 1.0 - 2e-3, "total {total}");
        prop_assert!(matrix.iter().all(|(_, _, p)| p >= 0.0 && p.is_finite()));
    }

    #[test]
    fn normalized_tables_sum_to_one(lh in 0.1f64..3.8, la in 0.1f64..3.8, m in model()) {
        let n = normalize_matrix(&scoreline_matrix(lh, la, 6, m));
        prop_assert!((n.total() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_correlation_models_match_independent(lh in 0.0f64..3.8, la in 0.0f64..3.8) {
        let uni = scoreline_matrix(lh, la, 6, ScoreModel::Independent);
        let dc = scoreline_matrix(lh, la, 6, ScoreModel::DixonColes { tau: 0.0 });
        let bp = scoreline_matrix(lh, la, 6, ScoreModel::Bivariate { rho: 0.0 });
        for ((_, _, u), ((_, _, d), (_, _, b))) in uni.iter().zip(dc.iter().zip(bp.iter())) {
            prop_assert!((u - d).abs() < 1e-12);
            prop_assert!((u - b).abs() < 1e-12);
        }
    }

    #[test]
    fn poisson_matches_closed_form(lambda in 0.01f64..6.0, k in 0usize..12) {
        let factorial: f64 = (1..=k).map(|i| i as f64).product();
        let expected = (-lambda).exp() * lambda.powi(k as i32) / factorial;
        prop_assert!((poisson_probability(lambda, k) - expected).abs() < 1e-12);
    }

    #[test]
    fn expected_scores_are_complementary(a in 0.0f64..3000.0, b in 0.0f64..3000.0) {
        prop_assert!((expected_score(a, b) + expected_score(b, a) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn decisive_result_between_equals_is_zero_sum(r in 800.0f64..2200.0, margin in 1u8..6) {
        let u = rate_match(r, r, margin, 0, 20.0);
        prop_assert!(u.delta_home > 0.0);
        prop_assert!((u.delta_home + u.delta_away).abs() < 1e-9);
    }

    #[test]
    fn markov_rows_stay_stochastic(
        lh in 0.0f64..4.0,
        la in 0.0f64..4.0,
        diff in -5i32..5,
        reds_home in 0u32..4,
        reds_away in 0u32..4,
        pressure in -0.5f64..1.5,
        elapsed in 0.0f64..95.0,
    ) {
        let ctx = MarkovContext {
            score_diff: diff,
            red_cards_home: reds_home,
            red_cards_away: reds_away,
            pressure,
            elapsed_minutes: elapsed,
        };
        let cfg = MarkovConfig::default();
        prop_assert!(is_row_stochastic(&build_transition_matrix(lh, la, &ctx, &cfg)));
        let o = goal_prob_horizon(lh, la, &ctx, 600.0, &cfg);
        prop_assert!(o.factor_home >= cfg.factor_min && o.factor_home <= cfg.factor_max);
        prop_assert!(o.p_goal_home + o.p_goal_away <= 1.0 + 1e-9);
    }
}

#[test]
fn poisson_reference_values() {
    assert!((poisson_probability(1.8, 3) - 0.1607).abs() < 1e-4);
    assert_eq!(poisson_probability(0.0, 0), 1.0);
    assert_eq!(poisson_probability(0.0, 2), 0.0);
}

#[test]
fn draw_between_equals_leaves_ratings_unchanged() {
    let u = rate_match(1500.0, 1500.0, 1, 1, 20.0);
    assert_eq!(u.home_rating, 1500.0);
    assert_eq!(u.away_rating, 1500.0);
}
