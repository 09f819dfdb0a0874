use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use rayon::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

use matchcast::calibration::{
    self, CalibrationArtifact, IdentityCalibrator, Metrics, Outcome, OutcomeCalibrator, Prob3,
    load_calibrator,
};
use matchcast::{EngineConfig, ForecastEngine, ProjectionRequest, RatingStore};

#[derive(Debug, serde::Deserialize)]
struct BacktestCase {
    #[serde(default)]
    id: Option<String>,
    request: ProjectionRequest,
    goals_home: u8,
    goals_away: u8,
}

#[derive(Parser)]
#[command(name = "backtest", about = "Score pre-match projections against finished results")]
struct Args {
    /// JSON array of cases: {id?, request, goals_home, goals_away}
    #[arg(default_value = "tests/fixtures/backtest_cases.json")]
    cases: PathBuf,

    /// Rating table to read Elo from (in-memory defaults when omitted)
    #[arg(long)]
    ratings: Option<PathBuf>,

    /// Calibration artifact applied on top of the raw probabilities
    #[arg(long)]
    calibration: Option<PathBuf>,

    /// Fit a logit calibration on the raw probabilities and write it here
    #[arg(long)]
    fit: Option<PathBuf>,

    #[arg(long, default_value = "10")]
    bins: usize,
}

struct Scored {
    raw: Prob3,
    calibrated: Prob3,
    outcome: Outcome,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let raw = fs::read_to_string(&args.cases)
        .with_context(|| format!("read cases {}", args.cases.display()))?;
    let cases: Vec<BacktestCase> = serde_json::from_str(&raw)
        .with_context(|| format!("parse cases {}", args.cases.display()))?;
    if cases.is_empty() {
        return Err(anyhow!("no cases in {}", args.cases.display()));
    }

    let mut config = EngineConfig::from_env();
    config.ratings_path = args.ratings.clone();
    let ratings = match args.ratings.as_ref() {
        Some(path) => RatingStore::open(path.clone()),
        None => RatingStore::in_memory(),
    };
    let calibrator: Box<dyn OutcomeCalibrator> = match args.calibration.as_deref() {
        Some(path) => load_calibrator(Some(path)),
        None => Box::new(IdentityCalibrator),
    };
    let engine = ForecastEngine::new(config, ratings.shared(), calibrator);

    let scored: Vec<Scored> = cases
        .par_iter()
        .map(|case| {
            let projection = engine.project_match_outcome(&case.request);
            Scored {
                raw: projection.raw_probabilities,
                calibrated: projection.probabilities,
                outcome: calibration::classify_outcome(
                    case.goals_home as i32,
                    case.goals_away as i32,
                ),
            }
        })
        .collect();

    let outcomes: Vec<Outcome> = scored.iter().map(|s| s.outcome).collect();
    let raw_preds: Vec<Prob3> = scored.iter().map(|s| s.raw).collect();
    let cal_preds: Vec<Prob3> = scored.iter().map(|s| s.calibrated).collect();
    let raw_metrics = calibration::evaluate_probs(&raw_preds, &outcomes);
    let cal_metrics = calibration::evaluate_probs(&cal_preds, &outcomes);

    println!("Pre-match backtest");
    println!("Cases: {} ({})", cases.len(), args.cases.display());
    println!("Calibrator: {}", engine.calibrator_name());
    if let Some(first) = cases.first().and_then(|c| c.id.as_deref()) {
        println!("First case: {first}");
    }
    println!();
    print_metrics("raw", &raw_metrics, ece_1x2(&raw_preds, &outcomes, args.bins));
    print_metrics("cal", &cal_metrics, ece_1x2(&cal_preds, &outcomes, args.bins));
    println!();

    for class in [Outcome::Home, Outcome::Draw, Outcome::Away] {
        println!("{class:?} reliability:");
        for b in calibration::calibration_bins(&cal_preds, &outcomes, class, args.bins) {
            if b.count == 0 {
                continue;
            }
            println!(
                "  [{:.2}, {:.2}) n={:<5} pred={:.3} actual={:.3}",
                b.bucket_start, b.bucket_end, b.count, b.avg_pred, b.actual_rate
            );
        }
    }

    let stats = engine.cache_stats();
    info!(hits = stats.hits, misses = stats.misses, "scoreline cache");

    if let Some(path) = args.fit.as_ref() {
        let (scale, draw_bias, fitted) = calibration::fit_logit_calibration(&raw_preds, &outcomes);
        println!();
        println!(
            "fit scale={scale:.2} draw_bias={draw_bias:+.2} ll={:.4} (raw {:.4})",
            fitted.log_loss, raw_metrics.log_loss
        );
        calibration::save_artifact(path, &CalibrationArtifact::Logit { scale, draw_bias })?;
        println!("wrote {}", path.display());
    }

    Ok(())
}

fn print_metrics(label: &str, m: &Metrics, ece: f64) {
    println!(
        "{label} samples={} ll={:.4} brier={:.4} acc={:.3} ece={:.4}",
        m.samples, m.log_loss, m.brier, m.accuracy, ece
    );
}

fn ece_1x2(preds: &[Prob3], outcomes: &[Outcome], bins: usize) -> f64 {
    if preds.is_empty() || preds.len() != outcomes.len() || bins == 0 {
        return 0.0;
    }
    let mut sum = 0.0;
    let n = preds.len() as f64;

    for c in [Outcome::Home, Outcome::Draw, Outcome::Away] {
        for b in calibration::calibration_bins(preds, outcomes, c, bins) {
            if b.count == 0 {
                continue;
            }
            let w = b.count as f64 / n;
            sum += w * (b.avg_pred - b.actual_rate).abs();
        }
    }

    sum / 3.0
}
