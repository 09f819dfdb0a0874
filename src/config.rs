use std::env;
use std::path::PathBuf;

use tracing::warn;

use crate::elo::DEFAULT_K_FACTOR;
use crate::markov::MarkovConfig;
use crate::scoreline::{DEFAULT_CACHE_CAPACITY, DEFAULT_DC_TAU, DEFAULT_MAX_GOALS, ScoreModel};
use crate::strength::DEFAULT_HOME_ADVANTAGE;

const APP_DIR: &str = "matchcast";
const RATINGS_FILE: &str = "team_ratings.parquet";
const CALIBRATION_FILE: &str = "calibration.json";

pub const DEFAULT_HORIZON_SECS: f64 = 600.0;
pub const DEFAULT_TOP_SCORELINES: usize = 5;
const MAX_GOALS_LIMIT: usize = 15;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// `None` keeps ratings in memory only.
    pub ratings_path: Option<PathBuf>,
    pub calibration_path: Option<PathBuf>,
    pub max_goals: usize,
    pub model: ScoreModel,
    pub cache_capacity: usize,
    pub k_factor: f64,
    pub home_advantage: f64,
    pub horizon_secs: f64,
    pub top_scorelines: usize,
    pub markov: MarkovConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ratings_path: None,
            calibration_path: None,
            max_goals: DEFAULT_MAX_GOALS,
            model: ScoreModel::default(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            k_factor: DEFAULT_K_FACTOR,
            home_advantage: DEFAULT_HOME_ADVANTAGE,
            horizon_secs: DEFAULT_HORIZON_SECS,
            top_scorelines: DEFAULT_TOP_SCORELINES,
            markov: MarkovConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Reads `.env.local`/`.env` then the `MATCHCAST_*` variables.
    pub fn from_env() -> Self {
        let _ = dotenvy::from_filename(".env.local");
        let _ = dotenvy::from_filename(".env");
        Self::from_lookup(opt_env)
    }

    /// Builds a config from any key lookup; unparsable values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        let data_dir = app_data_dir_with(&lookup);

        cfg.ratings_path = lookup("MATCHCAST_RATINGS_PATH")
            .map(PathBuf::from)
            .or_else(|| data_dir.as_ref().map(|d| d.join(RATINGS_FILE)));
        cfg.calibration_path = lookup("MATCHCAST_CALIBRATION_PATH")
            .map(PathBuf::from)
            .or_else(|| data_dir.as_ref().map(|d| d.join(CALIBRATION_FILE)));

        if let Some(v) = parse_var::<usize>(&lookup, "MATCHCAST_MAX_GOALS") {
            cfg.max_goals = v.clamp(1, MAX_GOALS_LIMIT);
        }
        if let Some(v) = parse_var::<usize>(&lookup, "MATCHCAST_CACHE_CAPACITY") {
            cfg.cache_capacity = v.max(1);
        }
        if let Some(v) = parse_var::<f64>(&lookup, "MATCHCAST_K_FACTOR").filter(|v| *v > 0.0) {
            cfg.k_factor = v;
        }
        if let Some(v) = parse_var::<f64>(&lookup, "MATCHCAST_HORIZON_SECS").filter(|v| *v > 0.0) {
            cfg.horizon_secs = v;
        }
        if let Some(v) =
            parse_var::<f64>(&lookup, "MATCHCAST_HOME_ADVANTAGE").filter(|v| *v >= 1.0)
        {
            cfg.home_advantage = v;
        }

        let tau = parse_var::<f64>(&lookup, "MATCHCAST_DC_TAU").unwrap_or(DEFAULT_DC_TAU);
        let rho = parse_var::<f64>(&lookup, "MATCHCAST_BIVARIATE_RHO")
            .unwrap_or(0.0)
            .max(0.0);
        if let Some(mode) = lookup("MATCHCAST_SCORE_MODEL") {
            match ScoreModel::parse(&mode, tau, rho) {
                Some(model) => cfg.model = model,
                None => warn!(mode = %mode, "unknown MATCHCAST_SCORE_MODEL, keeping dc"),
            }
        } else {
            cfg.model = ScoreModel::DixonColes { tau };
        }

        if let Some(path) = lookup("MATCHCAST_MARKOV_CONFIG").map(PathBuf::from) {
            match MarkovConfig::from_json_file(&path) {
                Ok(markov) => cfg.markov = markov,
                Err(err) => warn!(
                    error = %format!("{err:#}"),
                    "markov config unusable, using defaults"
                ),
            }
        }

        cfg
    }
}

fn opt_env(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|val| {
        if val.trim().is_empty() {
            None
        } else {
            Some(val)
        }
    })
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}

/// `$XDG_DATA_HOME/matchcast`, falling back to `~/.local/share/matchcast`.
fn app_data_dir_with(lookup: &impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    if let Some(base) = lookup("XDG_DATA_HOME").filter(|b| !b.trim().is_empty()) {
        return Some(PathBuf::from(base).join(APP_DIR));
    }
    let home = lookup("HOME").filter(|h| !h.trim().is_empty())?;
    Some(
        PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(APP_DIR),
    )
}
