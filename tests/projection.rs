use std::sync::Arc;

use matchcast::calibration::{
    CalibrationArtifact, IdentityCalibrator, TrainedCalibrator, load_calibrator, save_artifact,
};
use matchcast::confidence::probability_confidence_interval;
use matchcast::snapshot::MatchPhase;
use matchcast::{
    EngineConfig, ForecastEngine, ProjectionRequest, RatingStore, project_match_outcome,
};

static SAMPLE_REQUEST: &str = include_str!("fixtures/sample_request.json");
static LIVE_REQUEST: &str = include_str!("fixtures/live_request.json");

fn engine_with(ratings: Arc<RatingStore>) -> ForecastEngine {
    ForecastEngine::new(EngineConfig::default(), ratings, Box::new(IdentityCalibrator))
}

fn sample() -> ProjectionRequest {
    serde_json::from_str(SAMPLE_REQUEST).expect("valid sample request")
}

#[test]
fn pre_match_projection_from_fixture() {
    let engine = engine_with(RatingStore::in_memory().shared());
    let p = project_match_outcome(&engine, &sample());

    assert_eq!(p.phase, MatchPhase::PreMatch);
    assert_eq!(p.calibrator, "identity");
    assert!((p.probabilities.sum() - 1.0).abs() < 1e-9);
    assert!(p.probabilities.home > p.probabilities.away);
    assert!(p.lambda_home > p.lambda_away);

    // Rain, a suspension, a penalty-prone referee and away injuries all leave a trace.
    assert!(p.adjustments.weather.is_some());
    assert!(p.adjustments.referee.is_some());
    assert_eq!(p.adjustments.injuries.len(), 1);
    assert!(p.home.notes.iter().any(|n| n.contains("suspended")));

    let m = p.markets.summary;
    assert!((m.btts_yes + m.btts_no - 1.0).abs() < 1e-12);
    assert!(m.over_1_5 >= m.over_2_5);
    assert_eq!(p.markets.totals.len(), 5);
    assert!(p.top_scorelines[0].probability >= p.top_scorelines[1].probability);
}

#[test]
fn elo_edge_moves_probabilities() {
    let ratings = RatingStore::in_memory().shared();
    let engine = engine_with(Arc::clone(&ratings));
    let before = engine.project_match_outcome(&sample());

    for _ in 0..10 {
        engine.record_result(52, 61, 3, 0, Some("2026"));
    }
    assert!(ratings.get_rating(52, None, 1500.0) > 1550.0);

    let after = engine.project_match_outcome(&sample());
    assert!(after.probabilities.away > before.probabilities.away);
    assert!(after.away.elo_delta > 0.0);
}

#[test]
fn live_projection_trailing_side_with_extra_man() {
    let engine = engine_with(RatingStore::in_memory().shared());
    let req: ProjectionRequest = serde_json::from_str(LIVE_REQUEST).expect("valid live request");
    let p = engine.project_match_outcome(&req);

    assert_eq!(p.phase, MatchPhase::SecondHalf);
    let horizon = p.horizon.expect("live outlook");
    assert!(horizon.factor_home >= 1.0);
    assert_eq!(p.adjustments.red_cards.len(), 1);

    let matrix = p.matrix.expect("matrix requested");
    // Final scores below the current 0-1 are impossible.
    assert_eq!(matrix.get(0, 0), 0.0);
    assert_eq!(matrix.get(3, 0), 0.0);
    assert!(matrix.get(0, 1) > 0.0);

    let ci = p.intervals.expect("interval requested");
    assert!(ci.home.contains(p.probabilities.home));
    assert!(ci.draw.contains(p.probabilities.draw));
    assert!(ci.away.contains(p.probabilities.away));
}

#[test]
fn standalone_interval_matches_projection() {
    let engine = engine_with(RatingStore::in_memory().shared());
    let mut req = sample();
    req.with_interval = true;
    let p = engine.project_match_outcome(&req);
    let ci = probability_confidence_interval(&engine, &req);
    assert_eq!(Some(ci), p.intervals);
    assert!(ci.home.low <= ci.home.high);
    assert!(ci.home.low >= 0.0 && ci.home.high <= 1.0);
}

#[test]
fn trained_calibrator_is_applied_and_artifact_loads() {
    let artifact = CalibrationArtifact::Logit {
        scale: 0.8,
        draw_bias: 0.2,
    };
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("calibration.json");
    save_artifact(&path, &artifact).unwrap();
    assert_eq!(load_calibrator(Some(&path)).name(), "logit");

    let calibrator = TrainedCalibrator::new("logit", artifact).unwrap();
    let engine = ForecastEngine::new(
        EngineConfig::default(),
        RatingStore::in_memory().shared(),
        Box::new(calibrator),
    );
    let p = engine.project_match_outcome(&sample());
    assert_eq!(p.calibrator, "logit");
    assert!(p.probabilities.draw > p.raw_probabilities.draw);
    assert!((p.probabilities.sum() - 1.0).abs() < 1e-9);
}

#[test]
fn engine_from_config_persists_ratings() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        ratings_path: Some(dir.path().join("ratings.parquet")),
        calibration_path: Some(dir.path().join("missing.json")),
        ..EngineConfig::default()
    };
    {
        let engine = ForecastEngine::from_config(config.clone());
        assert_eq!(engine.calibrator_name(), "identity");
        engine.record_result(47, 52, 2, 0, None);
    }
    let engine = ForecastEngine::from_config(config);
    assert!(engine.ratings().get_rating(47, None, 1500.0) > 1500.0);
}
