use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const STATE_COUNT: usize = 9;

pub type TransitionMatrix = [[f64; STATE_COUNT]; STATE_COUNT];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchState {
    Neutral,
    PressingHome,
    PressingAway,
    CounterHome,
    CounterAway,
    ShotHome,
    ShotAway,
    GoalHome,
    GoalAway,
}

impl MatchState {
    pub const ALL: [MatchState; STATE_COUNT] = [
        MatchState::Neutral,
        MatchState::PressingHome,
        MatchState::PressingAway,
        MatchState::CounterHome,
        MatchState::CounterAway,
        MatchState::ShotHome,
        MatchState::ShotAway,
        MatchState::GoalHome,
        MatchState::GoalAway,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn is_absorbing(self) -> bool {
        matches!(self, MatchState::GoalHome | MatchState::GoalAway)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attacker {
    Home,
    Away,
}

impl Attacker {
    fn press(self) -> usize {
        match self {
            Attacker::Home => MatchState::PressingHome.index(),
            Attacker::Away => MatchState::PressingAway.index(),
        }
    }

    fn shot(self) -> usize {
        match self {
            Attacker::Home => MatchState::ShotHome.index(),
            Attacker::Away => MatchState::ShotAway.index(),
        }
    }

    fn goal(self) -> usize {
        match self {
            Attacker::Home => MatchState::GoalHome.index(),
            Attacker::Away => MatchState::GoalAway.index(),
        }
    }
}

// Hand-tuned so a neutral game at 1.35 goals per side absorbs roughly the Poisson
// goal probability over a ten minute window.
const N: usize = 0;
const PH: usize = 1;
const PA: usize = 2;
const CH: usize = 3;
const CA: usize = 4;
const SH: usize = 5;
const SA: usize = 6;
const GH: usize = 7;
const GA: usize = 8;

pub fn base_transition_matrix() -> TransitionMatrix {
    let mut m = [[0.0; STATE_COUNT]; STATE_COUNT];
    m[N][N] = 0.88;
    m[N][PH] = 0.04;
    m[N][PA] = 0.04;
    m[N][CH] = 0.01;
    m[N][CA] = 0.01;
    m[N][SH] = 0.01;
    m[N][SA] = 0.01;

    m[PH][N] = 0.25;
    m[PH][PH] = 0.55;
    m[PH][CA] = 0.05;
    m[PH][SH] = 0.15;
    m[PA][N] = 0.25;
    m[PA][PA] = 0.55;
    m[PA][CH] = 0.05;
    m[PA][SA] = 0.15;

    m[CH][N] = 0.40;
    m[CH][PH] = 0.15;
    m[CH][CH] = 0.20;
    m[CH][SH] = 0.25;
    m[CA][N] = 0.40;
    m[CA][PA] = 0.15;
    m[CA][CA] = 0.20;
    m[CA][SA] = 0.25;

    m[SH][N] = 0.45;
    m[SH][PH] = 0.285;
    m[SH][GH] = 0.165;
    m[SH][CA] = 0.10;
    m[SA][N] = 0.45;
    m[SA][PA] = 0.285;
    m[SA][GA] = 0.165;
    m[SA][CH] = 0.10;

    m[GH][GH] = 1.0;
    m[GA][GA] = 1.0;
    m
}

/// Tunables for the in-play chain. Loadable from JSON; missing fields keep their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkovConfig {
    pub step_seconds: f64,
    pub match_seconds: f64,
    pub pressure_boost: f64,
    pub trailing_boost_per_goal: f64,
    pub leading_damp_per_goal: f64,
    pub trailing_cap_goals: u32,
    pub red_card_press: f64,
    pub red_card_shot: f64,
    pub red_card_goal: f64,
    pub initial_neutral_mass: f64,
    pub reference_lambda: f64,
    pub lambda_scale_min: f64,
    pub lambda_scale_max: f64,
    pub factor_min: f64,
    pub factor_max: f64,
    pub baseline_floor: f64,
    pub base_matrix: Option<TransitionMatrix>,
}

impl Default for MarkovConfig {
    fn default() -> Self {
        Self {
            step_seconds: 15.0,
            match_seconds: 5400.0,
            pressure_boost: 0.5,
            trailing_boost_per_goal: 0.15,
            leading_damp_per_goal: 0.08,
            trailing_cap_goals: 2,
            red_card_press: 0.85,
            red_card_shot: 0.85,
            red_card_goal: 0.9,
            initial_neutral_mass: 0.75,
            reference_lambda: 1.35,
            lambda_scale_min: 0.4,
            lambda_scale_max: 2.5,
            factor_min: 0.5,
            factor_max: 1.8,
            baseline_floor: 1e-6,
            base_matrix: None,
        }
    }
}

impl MarkovConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read markov config {}", path.display()))?;
        let cfg: MarkovConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parse markov config {}", path.display()))?;
        Ok(cfg)
    }

    fn step(&self) -> f64 {
        if self.step_seconds.is_finite() && self.step_seconds > 0.0 {
            self.step_seconds
        } else {
            15.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkovContext {
    /// Home goals minus away goals.
    pub score_diff: i32,
    pub red_cards_home: u32,
    pub red_cards_away: u32,
    /// Home share of attacking pressure, 0.5 is even.
    pub pressure: f64,
    pub elapsed_minutes: f64,
}

impl Default for MarkovContext {
    fn default() -> Self {
        Self {
            score_diff: 0,
            red_cards_home: 0,
            red_cards_away: 0,
            pressure: 0.5,
            elapsed_minutes: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HorizonOutlook {
    pub horizon_secs: f64,
    pub steps: u32,
    pub p_goal_home: f64,
    pub p_goal_away: f64,
    pub baseline_home: f64,
    pub baseline_away: f64,
    pub factor_home: f64,
    pub factor_away: f64,
}

impl HorizonOutlook {
    fn neutral(horizon_secs: f64) -> Self {
        Self {
            horizon_secs,
            steps: 0,
            p_goal_home: 0.0,
            p_goal_away: 0.0,
            baseline_home: 0.0,
            baseline_away: 0.0,
            factor_home: 1.0,
            factor_away: 1.0,
        }
    }
}

/// Divides each row by its sum; rows with no usable mass become self-loops.
pub fn renormalize_rows(m: &mut TransitionMatrix) {
    for (i, row) in m.iter_mut().enumerate() {
        for v in row.iter_mut() {
            if !v.is_finite() || *v < 0.0 {
                *v = 0.0;
            }
        }
        let total: f64 = row.iter().sum();
        if total > 0.0 {
            row.iter_mut().for_each(|v| *v /= total);
        } else {
            *row = [0.0; STATE_COUNT];
            row[i] = 1.0;
        }
    }
}

pub fn is_row_stochastic(m: &TransitionMatrix) -> bool {
    m.iter().all(|row| {
        row.iter().all(|v| v.is_finite() && *v >= 0.0)
            && (row.iter().sum::<f64>() - 1.0).abs() < 1e-9
    })
}

fn sanitize_factor(f: f64) -> f64 {
    if f.is_finite() && f >= 0.0 { f } else { 1.0 }
}

// Scales every transition into the attacker's press and shot states and the
// shot-to-goal conversion, then renormalizes.
fn scale_side(m: &mut TransitionMatrix, side: Attacker, press: f64, shot: f64, goal: f64) {
    let (press, shot, goal) = (
        sanitize_factor(press),
        sanitize_factor(shot),
        sanitize_factor(goal),
    );
    for (i, row) in m.iter_mut().enumerate() {
        if MatchState::ALL[i].is_absorbing() {
            continue;
        }
        if i != side.press() {
            row[side.press()] *= press;
        }
        if i != side.shot() {
            row[side.shot()] *= shot;
        }
    }
    m[side.shot()][side.goal()] *= goal;
    renormalize_rows(m);
}

pub fn build_transition_matrix(
    lambda_home: f64,
    lambda_away: f64,
    ctx: &MarkovContext,
    cfg: &MarkovConfig,
) -> TransitionMatrix {
    let mut m = cfg.base_matrix.unwrap_or_else(base_transition_matrix);
    renormalize_rows(&mut m);

    let pressure = if ctx.pressure.is_finite() {
        ctx.pressure.clamp(0.0, 1.0)
    } else {
        0.5
    };
    let tilt = (pressure - 0.5) * 2.0;
    let home_push = (1.0 + cfg.pressure_boost * tilt).max(0.0);
    let away_push = (1.0 - cfg.pressure_boost * tilt).max(0.0);
    scale_side(&mut m, Attacker::Home, home_push, home_push, 1.0);
    scale_side(&mut m, Attacker::Away, away_push, away_push, 1.0);

    if ctx.score_diff != 0 {
        let deficit = ctx.score_diff.unsigned_abs().min(cfg.trailing_cap_goals) as f64;
        let (trailing, leading) = if ctx.score_diff > 0 {
            (Attacker::Away, Attacker::Home)
        } else {
            (Attacker::Home, Attacker::Away)
        };
        let boost = 1.0 + cfg.trailing_boost_per_goal * deficit;
        let damp = (1.0 - cfg.leading_damp_per_goal * deficit).max(0.0);
        scale_side(&mut m, trailing, boost, boost, 1.0);
        scale_side(&mut m, leading, damp, damp, 1.0);
    }

    for (side, reds) in [
        (Attacker::Home, ctx.red_cards_home),
        (Attacker::Away, ctx.red_cards_away),
    ] {
        for _ in 0..reds {
            scale_side(&mut m, side, cfg.red_card_press, cfg.red_card_shot, cfg.red_card_goal);
        }
    }

    let reference = if cfg.reference_lambda > 0.0 {
        cfg.reference_lambda
    } else {
        1.35
    };
    let lambda_scale = |lambda: f64| {
        let lambda = if lambda.is_finite() { lambda.max(0.0) } else { 0.0 };
        (lambda / reference).clamp(cfg.lambda_scale_min, cfg.lambda_scale_max)
    };
    scale_side(&mut m, Attacker::Home, 1.0, 1.0, lambda_scale(lambda_home));
    scale_side(&mut m, Attacker::Away, 1.0, 1.0, lambda_scale(lambda_away));

    m
}

pub fn initial_distribution(pressure: f64, cfg: &MarkovConfig) -> [f64; STATE_COUNT] {
    let pressure = if pressure.is_finite() {
        pressure.clamp(0.0, 1.0)
    } else {
        0.5
    };
    let neutral = cfg.initial_neutral_mass.clamp(0.0, 1.0);
    let rest = 1.0 - neutral;
    let mut v = [0.0; STATE_COUNT];
    v[N] = neutral;
    v[PH] = rest * pressure;
    v[PA] = rest * (1.0 - pressure);
    v
}

pub fn advance(v: &[f64; STATE_COUNT], m: &TransitionMatrix, steps: u32) -> [f64; STATE_COUNT] {
    let mut cur = *v;
    for _ in 0..steps {
        let mut next = [0.0; STATE_COUNT];
        for (i, p) in cur.iter().enumerate() {
            if *p == 0.0 {
                continue;
            }
            for (j, t) in m[i].iter().enumerate() {
                next[j] += p * t;
            }
        }
        cur = next;
    }
    cur
}

/// Goal probabilities over the next `horizon_secs` and the per-side lambda corrections.
///
/// The horizon is capped at the regulation time left given `ctx.elapsed_minutes`. Each
/// factor is the chain's absorbed goal mass over the Poisson probability of at least one
/// goal in the same window, clamped to `[factor_min, factor_max]`.
pub fn goal_prob_horizon(
    lambda_home: f64,
    lambda_away: f64,
    ctx: &MarkovContext,
    horizon_secs: f64,
    cfg: &MarkovConfig,
) -> HorizonOutlook {
    let elapsed_secs = if ctx.elapsed_minutes.is_finite() {
        (ctx.elapsed_minutes * 60.0).max(0.0)
    } else {
        0.0
    };
    let remaining = (cfg.match_seconds - elapsed_secs).max(0.0);
    let horizon = if horizon_secs.is_finite() {
        horizon_secs.clamp(0.0, remaining)
    } else {
        0.0
    };
    if horizon <= 0.0 {
        return HorizonOutlook::neutral(0.0);
    }

    let steps = (horizon / cfg.step()).ceil() as u32;
    let m = build_transition_matrix(lambda_home, lambda_away, ctx, cfg);
    let end = advance(&initial_distribution(ctx.pressure, cfg), &m, steps);

    let baseline = |lambda: f64| {
        let lambda = if lambda.is_finite() { lambda.max(0.0) } else { 0.0 };
        (1.0 - (-lambda * horizon / cfg.match_seconds.max(1.0)).exp()).max(cfg.baseline_floor)
    };
    let baseline_home = baseline(lambda_home);
    let baseline_away = baseline(lambda_away);
    let factor = |p: f64, b: f64| (p / b).clamp(cfg.factor_min, cfg.factor_max);

    HorizonOutlook {
        horizon_secs: horizon,
        steps,
        p_goal_home: end[GH],
        p_goal_away: end[GA],
        baseline_home,
        baseline_away,
        factor_home: factor(end[GH], baseline_home),
        factor_away: factor(end[GA], baseline_away),
    }
}
