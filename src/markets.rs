use serde::{Deserialize, Serialize};

use crate::scoreline::ScorelineMatrix;

pub const TOTAL_LINES: [f64; 5] = [0.5, 1.5, 2.5, 3.5, 4.5];
pub const HANDICAP_LINES: [f64; 8] = [-2.5, -1.5, -1.0, -0.5, 0.5, 1.0, 1.5, 2.5];

const BTTS_DEFENSE_MIN: f64 = 0.7;
const BTTS_DEFENSE_MAX: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MarketSummary {
    pub home: f64,
    pub draw: f64,
    pub away: f64,
    pub over_1_5: f64,
    pub over_2_5: f64,
    pub btts_yes: f64,
    pub btts_no: f64,
    #[serde(rename = "double_chance_1X")]
    pub double_chance_1x: f64,
    #[serde(rename = "double_chance_X2")]
    pub double_chance_x2: f64,
    #[serde(rename = "double_chance_12")]
    pub double_chance_12: f64,
}

/// Goals conceded per match for both sides and the league average they are judged against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DefenseProfile {
    pub home_defense: f64,
    pub away_defense: f64,
    pub league_defense: f64,
}

impl DefenseProfile {
    pub fn btts_multiplier(&self) -> Option<f64> {
        let base = self.league_defense;
        if !(base.is_finite() && base > 0.0) {
            return None;
        }
        if !(self.home_defense.is_finite() && self.away_defense.is_finite()) {
            return None;
        }
        let m = (self.home_defense / base) * (self.away_defense / base);
        Some(m.clamp(BTTS_DEFENSE_MIN, BTTS_DEFENSE_MAX))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorelineTip {
    pub home_goals: usize,
    pub away_goals: usize,
    pub label: String,
    pub probability: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TotalLine {
    pub line: f64,
    pub over: f64,
    pub under: f64,
}

/// Asian half-goal lines carry no draw; whole-goal lines settle three ways.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HandicapLine {
    pub line: f64,
    pub home: f64,
    pub draw: Option<f64>,
    pub away: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HtFtOutcome {
    /// `"1/X"` style: half-time result then full-time result.
    pub label: String,
    pub probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketBook {
    pub summary: MarketSummary,
    pub totals: Vec<TotalLine>,
    pub handicaps: Vec<HandicapLine>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub halftime_fulltime: Vec<HtFtOutcome>,
}

pub fn aggregate_poisson_markets(
    matrix: &ScorelineMatrix,
    defense: Option<&DefenseProfile>,
) -> MarketSummary {
    let mut out = MarketSummary::default();
    for (h, a, p) in matrix.iter() {
        if h > a {
            out.home += p;
        } else if h == a {
            out.draw += p;
        } else {
            out.away += p;
        }
        if h + a > 1 {
            out.over_1_5 += p;
        }
        if h + a > 2 {
            out.over_2_5 += p;
        }
        if h > 0 && a > 0 {
            out.btts_yes += p;
        }
    }

    if let Some(m) = defense.and_then(DefenseProfile::btts_multiplier) {
        out.btts_yes = (out.btts_yes * m).clamp(0.0, 1.0);
    }
    out.btts_no = 1.0 - out.btts_yes;
    out.double_chance_1x = out.home + out.draw;
    out.double_chance_x2 = out.draw + out.away;
    out.double_chance_12 = out.home + out.away;
    out
}

/// The `limit` most likely scorelines, most likely first; ties keep row-major order.
pub fn top_scorelines(
    matrix: &ScorelineMatrix,
    home_label: &str,
    away_label: &str,
    limit: usize,
) -> Vec<ScorelineTip> {
    let mut cells: Vec<(usize, usize, f64)> = matrix.iter().collect();
    cells.sort_by(|a, b| b.2.total_cmp(&a.2));
    cells
        .into_iter()
        .take(limit)
        .map(|(h, a, p)| ScorelineTip {
            home_goals: h,
            away_goals: a,
            label: format!("{home_label} {h}-{a} {away_label}"),
            probability: p,
        })
        .collect()
}

pub fn exact_score(matrix: &ScorelineMatrix, home_goals: usize, away_goals: usize) -> f64 {
    matrix.get(home_goals, away_goals)
}

pub fn total_goals_line(matrix: &ScorelineMatrix, line: f64) -> TotalLine {
    let mut over = 0.0;
    let mut under = 0.0;
    for (h, a, p) in matrix.iter() {
        if (h + a) as f64 > line {
            over += p;
        } else {
            under += p;
        }
    }
    TotalLine { line, over, under }
}

/// Home result with `line` goals added to the home score.
pub fn handicap_line(matrix: &ScorelineMatrix, line: f64) -> HandicapLine {
    let mut home = 0.0;
    let mut draw = 0.0;
    let mut away = 0.0;
    for (h, a, p) in matrix.iter() {
        let margin = h as f64 - a as f64 + line;
        if margin > 0.0 {
            home += p;
        } else if margin < 0.0 {
            away += p;
        } else {
            draw += p;
        }
    }
    let whole = line.fract() == 0.0;
    HandicapLine {
        line,
        home,
        draw: whole.then_some(draw),
        away,
    }
}

fn result_code(home: usize, away: usize) -> usize {
    if home > away {
        0
    } else if home == away {
        1
    } else {
        2
    }
}

const RESULT_LABELS: [&str; 3] = ["1", "X", "2"];

/// Half-time/full-time grid from first-half and second-half goal tables.
pub fn halftime_fulltime(
    first_half: &ScorelineMatrix,
    second_half: &ScorelineMatrix,
) -> Vec<HtFtOutcome> {
    let mut grid = [[0.0; 3]; 3];
    for (h1, a1, p1) in first_half.iter() {
        if p1 == 0.0 {
            continue;
        }
        let ht = result_code(h1, a1);
        for (h2, a2, p2) in second_half.iter() {
            grid[ht][result_code(h1 + h2, a1 + a2)] += p1 * p2;
        }
    }

    let mut out = Vec::with_capacity(9);
    for (ht, row) in grid.iter().enumerate() {
        for (ft, p) in row.iter().enumerate() {
            out.push(HtFtOutcome {
                label: format!("{}/{}", RESULT_LABELS[ht], RESULT_LABELS[ft]),
                probability: *p,
            });
        }
    }
    out
}

/// Re-bases a remaining-goals table onto the current score.
pub fn shift_matrix(
    matrix: &ScorelineMatrix,
    goals_home: usize,
    goals_away: usize,
) -> ScorelineMatrix {
    let mut out = ScorelineMatrix::zeros(matrix.max_goals() + goals_home.max(goals_away));
    for (h, a, p) in matrix.iter() {
        out.set(h + goals_home, a + goals_away, p);
    }
    out
}

pub fn market_book(
    matrix: &ScorelineMatrix,
    defense: Option<&DefenseProfile>,
    halves: Option<(&ScorelineMatrix, &ScorelineMatrix)>,
) -> MarketBook {
    MarketBook {
        summary: aggregate_poisson_markets(matrix, defense),
        totals: TOTAL_LINES
            .iter()
            .map(|line| total_goals_line(matrix, *line))
            .collect(),
        handicaps: HANDICAP_LINES
            .iter()
            .map(|line| handicap_line(matrix, *line))
            .collect(),
        halftime_fulltime: halves
            .map(|(first, second)| halftime_fulltime(first, second))
            .unwrap_or_default(),
    }
}
