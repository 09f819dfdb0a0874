use serde::{Deserialize, Serialize};

use crate::league_baseline::{LeagueBaseline, StandingsRow};

pub const LAMBDA_MIN: f64 = 0.25;
pub const LAMBDA_MAX: f64 = 3.80;
pub const DEFAULT_HOME_ADVANTAGE: f64 = 1.12;

// exp(0.25) per 400 Elo points, bounded so ratings never dominate the goal rates.
const ELO_GOAL_SCALE: f64 = 0.25;
const ELO_FACTOR_MIN: f64 = 0.75;
const ELO_FACTOR_MAX: f64 = 1.33;
// Matches needed before a team's own rates are trusted fully.
const FULL_TRUST_GAMES: f64 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Venue {
    Home,
    Away,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamStrength {
    pub team_id: u32,
    pub name: String,
    pub attack: f64,
    pub defense: f64,
    pub lambda: f64,
    pub attack_z: f64,
    pub elo: f64,
    pub elo_delta: f64,
    pub notes: Vec<String>,
}

impl TeamStrength {
    /// Copy with a rescaled lambda and an extra note.
    pub fn scaled(&self, factor: f64, note: impl Into<String>) -> Self {
        let mut out = self.clone();
        out.lambda = clamp_lambda(self.lambda * factor);
        out.notes.push(note.into());
        out
    }

    pub fn with_lambda(&self, lambda: f64) -> Self {
        let mut out = self.clone();
        out.lambda = clamp_lambda(lambda);
        out
    }
}

/// Inputs describing one side of a fixture.
#[derive(Debug, Clone, Copy)]
pub struct SideInputs<'a> {
    pub team_id: u32,
    pub name: &'a str,
    pub standings: Option<&'a StandingsRow>,
    pub elo: f64,
}

pub fn clamp_lambda(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(LAMBDA_MIN, LAMBDA_MAX)
    } else {
        LAMBDA_MIN
    }
}

pub fn elo_goal_factor(elo_delta: f64) -> f64 {
    if !elo_delta.is_finite() {
        return 1.0;
    }
    (ELO_GOAL_SCALE * elo_delta / 400.0)
        .exp()
        .clamp(ELO_FACTOR_MIN, ELO_FACTOR_MAX)
}

/// Goals scored/conceded per match, shrunk toward the league average for short samples.
pub fn team_rates(row: Option<&StandingsRow>, baseline: &LeagueBaseline) -> (f64, f64, f64) {
    let Some(row) = row else {
        return (baseline.avg_attack, baseline.avg_defense, 0.0);
    };
    let (Some(attack), Some(defense)) = (row.attack_rate(), row.defense_rate()) else {
        return (baseline.avg_attack, baseline.avg_defense, 0.0);
    };
    let w = (row.played as f64 / FULL_TRUST_GAMES).clamp(0.0, 1.0);
    (
        w * attack + (1.0 - w) * baseline.avg_attack,
        w * defense + (1.0 - w) * baseline.avg_defense,
        w,
    )
}

pub fn compute_team_strength(
    side: SideInputs<'_>,
    opponent: SideInputs<'_>,
    baseline: &LeagueBaseline,
    venue: Venue,
    home_advantage: f64,
) -> TeamStrength {
    let mut notes = Vec::new();

    let (attack, defense, trust) = team_rates(side.standings, baseline);
    if side.standings.is_none() {
        notes.push("no standings row, league averages used".to_string());
    } else if trust < 1.0 {
        notes.push(format!(
            "short sample, rates blended {:.0}% toward league average",
            (1.0 - trust) * 100.0
        ));
    }
    let (_, opp_defense, _) = team_rates(opponent.standings, baseline);

    let avg_defense = baseline.avg_defense.max(0.05);
    let mut lambda = attack * (opp_defense / avg_defense);

    if venue == Venue::Home {
        let home_advantage = if home_advantage.is_finite() {
            home_advantage.max(1.0)
        } else {
            DEFAULT_HOME_ADVANTAGE
        };
        lambda *= home_advantage;
        notes.push(format!("home advantage x{home_advantage:.2}"));
    }

    let elo_delta = side.elo - opponent.elo;
    let elo_factor = elo_goal_factor(elo_delta);
    lambda *= elo_factor;
    if (elo_factor - 1.0).abs() > 1e-3 {
        notes.push(format!("elo {elo_delta:+.0} vs opponent x{elo_factor:.3}"));
    }

    let clamped = clamp_lambda(lambda);
    if (clamped - lambda).abs() > 1e-12 {
        notes.push(format!("lambda {lambda:.2} clamped to {clamped:.2}"));
    }

    TeamStrength {
        team_id: side.team_id,
        name: side.name.to_string(),
        attack,
        defense,
        lambda: clamped,
        attack_z: baseline.attack_z(attack),
        elo: side.elo,
        elo_delta,
        notes,
    }
}

/// Home and away strengths for one fixture.
pub fn compute_strength_pair(
    home: SideInputs<'_>,
    away: SideInputs<'_>,
    baseline: &LeagueBaseline,
    home_advantage: f64,
) -> (TeamStrength, TeamStrength) {
    (
        compute_team_strength(home, away, baseline, Venue::Home, home_advantage),
        compute_team_strength(away, home, baseline, Venue::Away, home_advantage),
    )
}

pub fn find_standing(standings: &[StandingsRow], team_id: u32) -> Option<&StandingsRow> {
    standings.iter().find(|r| r.team_id == team_id)
}
