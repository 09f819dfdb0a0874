use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::markets::MarketSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Home,
    Draw,
    Away,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prob3 {
    pub home: f64,
    pub draw: f64,
    pub away: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub samples: usize,
    pub brier: f64,
    pub log_loss: f64,
    pub accuracy: f64,
}

impl Metrics {
    fn empty() -> Self {
        Self {
            samples: 0,
            brier: 0.0,
            log_loss: 0.0,
            accuracy: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBin {
    pub bucket_start: f64,
    pub bucket_end: f64,
    pub count: usize,
    pub avg_pred: f64,
    pub actual_rate: f64,
}

impl Prob3 {
    pub fn uniform() -> Self {
        Self {
            home: 1.0 / 3.0,
            draw: 1.0 / 3.0,
            away: 1.0 / 3.0,
        }
    }

    pub fn get(&self, outcome: Outcome) -> f64 {
        match outcome {
            Outcome::Home => self.home,
            Outcome::Draw => self.draw,
            Outcome::Away => self.away,
        }
    }

    pub fn sum(&self) -> f64 {
        self.home + self.draw + self.away
    }

    /// Rescaled to sum to one; `None` for non-finite, negative or all-zero input.
    pub fn normalized(self) -> Option<Self> {
        let parts = [self.home, self.draw, self.away];
        if parts.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return None;
        }
        let sum = self.sum();
        if sum <= 0.0 {
            return None;
        }
        Some(Self {
            home: self.home / sum,
            draw: self.draw / sum,
            away: self.away / sum,
        })
    }
}

pub fn classify_outcome(home_goals: i32, away_goals: i32) -> Outcome {
    if home_goals > away_goals {
        Outcome::Home
    } else if home_goals < away_goals {
        Outcome::Away
    } else {
        Outcome::Draw
    }
}

pub fn evaluate_probs(predictions: &[Prob3], outcomes: &[Outcome]) -> Metrics {
    if predictions.is_empty() || outcomes.is_empty() || predictions.len() != outcomes.len() {
        return Metrics::empty();
    }

    let mut brier_sum = 0.0_f64;
    let mut log_loss_sum = 0.0_f64;
    let mut correct = 0usize;

    for (p, outcome) in predictions.iter().zip(outcomes) {
        let y = one_hot(*outcome);
        brier_sum +=
            (p.home - y.home).powi(2) + (p.draw - y.draw).powi(2) + (p.away - y.away).powi(2);

        let actual_prob = p.get(*outcome).clamp(1e-12, 1.0);
        log_loss_sum += -actual_prob.ln();

        if argmax(*p) == *outcome {
            correct += 1;
        }
    }

    let n = predictions.len() as f64;
    Metrics {
        samples: predictions.len(),
        brier: brier_sum / n,
        log_loss: log_loss_sum / n,
        accuracy: correct as f64 / n,
    }
}

pub fn apply_logit_calibration(prob: Prob3, logit_scale: f64, draw_bias: f64) -> Prob3 {
    let s = logit_scale.clamp(0.50, 1.80);
    let mut lh = prob.home.clamp(1e-9, 1.0).ln();
    let mut ld = prob.draw.clamp(1e-9, 1.0).ln() + draw_bias;
    let mut la = prob.away.clamp(1e-9, 1.0).ln();

    let mean = (lh + ld + la) / 3.0;
    lh = (lh - mean) * s;
    ld = (ld - mean) * s;
    la = (la - mean) * s;

    softmax3(lh, ld, la)
}

fn softmax3(zh: f64, zd: f64, za: f64) -> Prob3 {
    let mx = zh.max(zd.max(za));
    let eh = (zh - mx).exp();
    let ed = (zd - mx).exp();
    let ea = (za - mx).exp();
    let den = (eh + ed + ea).max(1e-12);

    Prob3 {
        home: (eh / den).clamp(0.0, 1.0),
        draw: (ed / den).clamp(0.0, 1.0),
        away: (ea / den).clamp(0.0, 1.0),
    }
}

/// Grid search over temperature and draw bias minimizing log loss.
pub fn fit_logit_calibration(predictions: &[Prob3], outcomes: &[Outcome]) -> (f64, f64, Metrics) {
    if predictions.is_empty() || outcomes.is_empty() || predictions.len() != outcomes.len() {
        return (1.0, 0.0, Metrics::empty());
    }

    let mut best_scale = 1.0;
    let mut best_draw_bias = 0.0;
    let mut best_metrics = evaluate_probs(predictions, outcomes);

    for scale_step in 35..=65 {
        let scale = scale_step as f64 / 50.0; // 0.70..1.30
        for draw_step in -30..=30 {
            let draw_bias = draw_step as f64 / 100.0; // -0.30..0.30
            let metrics = evaluate_calibrated(predictions, outcomes, scale, draw_bias);
            if metrics.log_loss < best_metrics.log_loss {
                best_metrics = metrics;
                best_scale = scale;
                best_draw_bias = draw_bias;
            }
        }
    }

    (best_scale, best_draw_bias, best_metrics)
}

pub fn calibration_bins(
    predictions: &[Prob3],
    outcomes: &[Outcome],
    class: Outcome,
    bins: usize,
) -> Vec<CalibrationBin> {
    let bins = bins.max(2);
    let mut counts = vec![0usize; bins];
    let mut pred_sum = vec![0.0_f64; bins];
    let mut actual_sum = vec![0.0_f64; bins];

    for (p, outcome) in predictions.iter().zip(outcomes) {
        let class_prob = p.get(class).clamp(0.0, 1.0);
        let idx = ((class_prob * bins as f64).floor() as usize).min(bins - 1);
        counts[idx] += 1;
        pred_sum[idx] += class_prob;
        if *outcome == class {
            actual_sum[idx] += 1.0;
        }
    }

    (0..bins)
        .map(|i| {
            let count = counts[i];
            let (avg_pred, actual_rate) = if count > 0 {
                (pred_sum[i] / count as f64, actual_sum[i] / count as f64)
            } else {
                (0.0, 0.0)
            };
            CalibrationBin {
                bucket_start: i as f64 / bins as f64,
                bucket_end: (i + 1) as f64 / bins as f64,
                count,
                avg_pred,
                actual_rate,
            }
        })
        .collect()
}

pub fn argmax(p: Prob3) -> Outcome {
    if p.home >= p.draw && p.home >= p.away {
        Outcome::Home
    } else if p.draw >= p.away {
        Outcome::Draw
    } else {
        Outcome::Away
    }
}

fn one_hot(outcome: Outcome) -> Prob3 {
    match outcome {
        Outcome::Home => Prob3 {
            home: 1.0,
            draw: 0.0,
            away: 0.0,
        },
        Outcome::Draw => Prob3 {
            home: 0.0,
            draw: 1.0,
            away: 0.0,
        },
        Outcome::Away => Prob3 {
            home: 0.0,
            draw: 0.0,
            away: 1.0,
        },
    }
}

fn evaluate_calibrated(
    predictions: &[Prob3],
    outcomes: &[Outcome],
    logit_scale: f64,
    draw_bias: f64,
) -> Metrics {
    let calibrated: Vec<Prob3> = predictions
        .iter()
        .copied()
        .map(|p| apply_logit_calibration(p, logit_scale, draw_bias))
        .collect();
    evaluate_probs(&calibrated, outcomes)
}

// ---------------------------------------------------------------------------
// Trained calibrators

pub const CALIBRATION_FEATURE_NAMES: [&str; 17] = [
    "p_home",
    "p_draw",
    "p_away",
    "p_home_minus_away",
    "log_ratio_home_away",
    "over_1_5",
    "over_2_5",
    "btts_yes",
    "lambda_home",
    "lambda_away",
    "lambda_diff",
    "lambda_total",
    "elo_home",
    "elo_away",
    "elo_diff",
    "pressure",
    "intensity",
];

pub const FEATURE_COUNT: usize = CALIBRATION_FEATURE_NAMES.len();

/// Match-level inputs the calibrator sees next to the raw markets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationMeta {
    pub lambda_home: f64,
    pub lambda_away: f64,
    pub elo_home: f64,
    pub elo_away: f64,
    pub pressure: f64,
    pub intensity: f64,
}

impl Default for CalibrationMeta {
    fn default() -> Self {
        Self {
            lambda_home: 0.0,
            lambda_away: 0.0,
            elo_home: crate::elo::DEFAULT_RATING,
            elo_away: crate::elo::DEFAULT_RATING,
            pressure: 0.5,
            intensity: 0.0,
        }
    }
}

pub fn build_feature_vector(
    probs: Prob3,
    markets: &MarketSummary,
    meta: &CalibrationMeta,
) -> [f64; FEATURE_COUNT] {
    let log_ratio = (probs.home.max(1e-6) / probs.away.max(1e-6)).ln();
    [
        probs.home,
        probs.draw,
        probs.away,
        probs.home - probs.away,
        log_ratio,
        markets.over_1_5,
        markets.over_2_5,
        markets.btts_yes,
        meta.lambda_home,
        meta.lambda_away,
        meta.lambda_home - meta.lambda_away,
        meta.lambda_home + meta.lambda_away,
        meta.elo_home,
        meta.elo_away,
        meta.elo_home - meta.elo_away,
        meta.pressure,
        meta.intensity,
    ]
}

#[derive(Debug, Error, PartialEq)]
pub enum ArtifactError {
    #[error("{what} has {found} entries, expected {expected}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("{0} contains a non-finite value")]
    NonFinite(&'static str),
    #[error("feature {index} is {found:?}, expected {expected:?}")]
    FeatureOrder {
        index: usize,
        expected: &'static str,
        found: String,
    },
}

/// Serialized calibrator. Multinomial weights are per class (home, draw, away) over the
/// standardized feature vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CalibrationArtifact {
    Logit {
        scale: f64,
        draw_bias: f64,
    },
    Multinomial {
        #[serde(default)]
        feature_names: Vec<String>,
        feature_means: Vec<f64>,
        feature_stds: Vec<f64>,
        coefficients: [Vec<f64>; 3],
        intercepts: [f64; 3],
    },
}

fn check_len(what: &'static str, values: &[f64]) -> Result<(), ArtifactError> {
    if values.len() != FEATURE_COUNT {
        return Err(ArtifactError::DimensionMismatch {
            what,
            expected: FEATURE_COUNT,
            found: values.len(),
        });
    }
    check_finite(what, values)
}

fn check_finite(what: &'static str, values: &[f64]) -> Result<(), ArtifactError> {
    if values.iter().any(|v| !v.is_finite()) {
        return Err(ArtifactError::NonFinite(what));
    }
    Ok(())
}

impl CalibrationArtifact {
    pub fn validate(&self) -> Result<(), ArtifactError> {
        match self {
            CalibrationArtifact::Logit { scale, draw_bias } => {
                check_finite("logit parameters", &[*scale, *draw_bias])
            }
            CalibrationArtifact::Multinomial {
                feature_names,
                feature_means,
                feature_stds,
                coefficients,
                intercepts,
            } => {
                if !feature_names.is_empty() {
                    if feature_names.len() != FEATURE_COUNT {
                        return Err(ArtifactError::DimensionMismatch {
                            what: "feature_names",
                            expected: FEATURE_COUNT,
                            found: feature_names.len(),
                        });
                    }
                    for (index, (found, expected)) in feature_names
                        .iter()
                        .zip(CALIBRATION_FEATURE_NAMES)
                        .enumerate()
                    {
                        if found != expected {
                            return Err(ArtifactError::FeatureOrder {
                                index,
                                expected,
                                found: found.clone(),
                            });
                        }
                    }
                }
                check_len("feature_means", feature_means)?;
                check_len("feature_stds", feature_stds)?;
                for row in coefficients {
                    check_len("coefficients", row)?;
                }
                check_finite("intercepts", intercepts)
            }
        }
    }

    pub fn predict_proba(&self, features: &[f64; FEATURE_COUNT]) -> Prob3 {
        match self {
            CalibrationArtifact::Logit { scale, draw_bias } => {
                let raw = Prob3 {
                    home: features[0],
                    draw: features[1],
                    away: features[2],
                };
                apply_logit_calibration(raw, *scale, *draw_bias)
            }
            CalibrationArtifact::Multinomial {
                feature_means,
                feature_stds,
                coefficients,
                intercepts,
                ..
            } => {
                let z: Vec<f64> = features
                    .iter()
                    .zip(feature_means.iter().zip(feature_stds))
                    .map(|(x, (mean, std))| {
                        let std = if std.abs() > 1e-12 { *std } else { 1.0 };
                        (x - mean) / std
                    })
                    .collect();
                let mut logits = *intercepts;
                for (logit, row) in logits.iter_mut().zip(coefficients) {
                    *logit += row.iter().zip(&z).map(|(w, x)| w * x).sum::<f64>();
                }
                softmax3(logits[0], logits[1], logits[2])
            }
        }
    }
}

pub fn load_artifact(path: &Path) -> Result<CalibrationArtifact> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read calibration artifact {}", path.display()))?;
    let artifact: CalibrationArtifact = serde_json::from_str(&raw)
        .with_context(|| format!("parse calibration artifact {}", path.display()))?;
    artifact
        .validate()
        .with_context(|| format!("validate calibration artifact {}", path.display()))?;
    Ok(artifact)
}

pub fn save_artifact(path: &Path, artifact: &CalibrationArtifact) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
    }
    let json = serde_json::to_string_pretty(artifact).context("serialize calibration artifact")?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("rename to {}", path.display()))?;
    Ok(())
}

/// Re-weights a 1X2 triple. `None` means "no opinion": the caller keeps its input.
pub trait OutcomeCalibrator: Send + Sync {
    fn name(&self) -> &str;

    fn predict_proba(&self, features: &[f64; FEATURE_COUNT]) -> Option<Prob3>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCalibrator;

impl OutcomeCalibrator for IdentityCalibrator {
    fn name(&self) -> &str {
        "identity"
    }

    fn predict_proba(&self, _features: &[f64; FEATURE_COUNT]) -> Option<Prob3> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct TrainedCalibrator {
    name: String,
    artifact: CalibrationArtifact,
}

impl TrainedCalibrator {
    pub fn new(
        name: impl Into<String>,
        artifact: CalibrationArtifact,
    ) -> Result<Self, ArtifactError> {
        artifact.validate()?;
        Ok(Self {
            name: name.into(),
            artifact,
        })
    }

    pub fn artifact(&self) -> &CalibrationArtifact {
        &self.artifact
    }
}

impl OutcomeCalibrator for TrainedCalibrator {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict_proba(&self, features: &[f64; FEATURE_COUNT]) -> Option<Prob3> {
        Some(self.artifact.predict_proba(features))
    }
}

/// Picks the calibrator once at startup; any problem with the artifact degrades to identity.
pub fn load_calibrator(path: Option<&Path>) -> Box<dyn OutcomeCalibrator> {
    let Some(path) = path else {
        debug!("no calibration artifact configured");
        return Box::new(IdentityCalibrator);
    };
    if !path.exists() {
        info!(path = %path.display(), "calibration artifact not found, using identity");
        return Box::new(IdentityCalibrator);
    }
    let artifact = match load_artifact(path) {
        Ok(a) => a,
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %format!("{err:#}"),
                "calibration artifact unusable, using identity"
            );
            return Box::new(IdentityCalibrator);
        }
    };
    let name = match &artifact {
        CalibrationArtifact::Logit { .. } => "logit",
        CalibrationArtifact::Multinomial { .. } => "multinomial",
    };
    match TrainedCalibrator::new(name, artifact) {
        Ok(c) => {
            info!(path = %path.display(), kind = name, "calibration artifact loaded");
            Box::new(c)
        }
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %err,
                "calibration artifact rejected, using identity"
            );
            Box::new(IdentityCalibrator)
        }
    }
}

pub fn calibrate_match_probabilities(
    calibrator: &dyn OutcomeCalibrator,
    probs: Prob3,
    markets: &MarketSummary,
    meta: &CalibrationMeta,
) -> Prob3 {
    let features = build_feature_vector(probs, markets, meta);
    let Some(out) = calibrator.predict_proba(&features) else {
        return probs;
    };
    match out.normalized() {
        Some(p) => p,
        None => {
            debug!(calibrator = calibrator.name(), "degenerate calibrator output, keeping input");
            probs
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(home: f64, draw: f64, away: f64) -> Prob3 {
        Prob3 { home, draw, away }
    }

    fn multinomial(coefficients: [Vec<f64>; 3], intercepts: [f64; 3]) -> CalibrationArtifact {
        CalibrationArtifact::Multinomial {
            feature_names: Vec::new(),
            feature_means: vec![0.0; FEATURE_COUNT],
            feature_stds: vec![1.0; FEATURE_COUNT],
            coefficients,
            intercepts,
        }
    }

    struct Broken;

    impl OutcomeCalibrator for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn predict_proba(&self, _features: &[f64; FEATURE_COUNT]) -> Option<Prob3> {
            Some(p(f64::NAN, 0.0, 0.0))
        }
    }

    #[test]
    fn perfect_predictions_have_zero_brier() {
        let preds = vec![p(1.0, 0.0, 0.0), p(0.0, 1.0, 0.0), p(0.0, 0.0, 1.0)];
        let outcomes = vec![Outcome::Home, Outcome::Draw, Outcome::Away];
        let m = evaluate_probs(&preds, &outcomes);
        assert_eq!(m.samples, 3);
        assert!(m.brier < 1e-12);
        assert_eq!(m.accuracy, 1.0);
    }

    #[test]
    fn logit_calibration_keeps_distribution_normalized() {
        let q = apply_logit_calibration(p(0.44, 0.27, 0.29), 1.12, 0.08);
        assert!((q.sum() - 1.0).abs() < 1e-9);
        assert!(q.home >= 0.0 && q.draw >= 0.0 && q.away >= 0.0);
    }

    #[test]
    fn fit_prefers_more_draws_when_draws_dominate() {
        let preds = vec![p(0.45, 0.25, 0.30); 40];
        let mut outcomes = vec![Outcome::Draw; 24];
        outcomes.extend(vec![Outcome::Home; 10]);
        outcomes.extend(vec![Outcome::Away; 6]);
        let (_, draw_bias, metrics) = fit_logit_calibration(&preds, &outcomes);
        assert!(draw_bias > 0.0);
        assert!(metrics.log_loss < evaluate_probs(&preds, &outcomes).log_loss);
    }

    #[test]
    fn bins_bucket_by_class_probability() {
        let preds = vec![p(0.05, 0.5, 0.45), p(0.95, 0.03, 0.02)];
        let bins = calibration_bins(&preds, &[Outcome::Draw, Outcome::Home], Outcome::Home, 10);
        assert_eq!(bins.len(), 10);
        assert_eq!(bins[0].count, 1);
        assert_eq!(bins[0].actual_rate, 0.0);
        assert_eq!(bins[9].count, 1);
        assert_eq!(bins[9].actual_rate, 1.0);
    }

    #[test]
    fn identity_calibrator_returns_input_unchanged() {
        let probs = p(0.5, 0.3, 0.2);
        let out = calibrate_match_probabilities(
            &IdentityCalibrator,
            probs,
            &MarketSummary::default(),
            &CalibrationMeta::default(),
        );
        assert_eq!(out, probs);
    }

    #[test]
    fn degenerate_output_falls_back_to_input() {
        let probs = p(0.5, 0.3, 0.2);
        let out = calibrate_match_probabilities(
            &Broken,
            probs,
            &MarketSummary::default(),
            &CalibrationMeta::default(),
        );
        assert_eq!(out, probs);
    }

    #[test]
    fn zero_multinomial_is_uniform() {
        let artifact = multinomial(
            [
                vec![0.0; FEATURE_COUNT],
                vec![0.0; FEATURE_COUNT],
                vec![0.0; FEATURE_COUNT],
            ],
            [0.0; 3],
        );
        let c = TrainedCalibrator::new("zero", artifact).unwrap();
        let out = calibrate_match_probabilities(
            &c,
            p(0.7, 0.2, 0.1),
            &MarketSummary::default(),
            &CalibrationMeta::default(),
        );
        assert!((out.home - 1.0 / 3.0).abs() < 1e-12);
        assert!((out.sum() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn multinomial_weights_follow_features() {
        let mut home = vec![0.0; FEATURE_COUNT];
        home[0] = 4.0;
        let artifact = multinomial(
            [home, vec![0.0; FEATURE_COUNT], vec![0.0; FEATURE_COUNT]],
            [0.0; 3],
        );
        let strong = artifact.predict_proba(&build_feature_vector(
            p(0.8, 0.1, 0.1),
            &MarketSummary::default(),
            &CalibrationMeta::default(),
        ));
        assert!(strong.home > 0.9);
    }

    #[test]
    fn short_artifact_is_rejected() {
        let artifact = multinomial(
            [vec![0.0; 3], vec![0.0; FEATURE_COUNT], vec![0.0; FEATURE_COUNT]],
            [0.0; 3],
        );
        assert_eq!(
            artifact.validate(),
            Err(ArtifactError::DimensionMismatch {
                what: "coefficients",
                expected: FEATURE_COUNT,
                found: 3,
            })
        );
    }

    #[test]
    fn artifact_json_round_trip_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        let artifact = CalibrationArtifact::Logit {
            scale: 1.1,
            draw_bias: 0.05,
        };
        save_artifact(&path, &artifact).unwrap();
        assert_eq!(load_artifact(&path).unwrap(), artifact);
        assert_eq!(load_calibrator(Some(&path)).name(), "logit");

        fs::write(&path, "{not json").unwrap();
        assert_eq!(load_calibrator(Some(&path)).name(), "identity");
        assert_eq!(load_calibrator(None).name(), "identity");
    }
}
