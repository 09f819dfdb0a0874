use serde::{Deserialize, Serialize};

// Per-team goal rate used when a league has no usable standings.
pub const DEFAULT_GOALS_PER_TEAM: f64 = 1.35;
pub const DEFAULT_RATE_STDDEV: f64 = 0.35;
const MIN_RATE_STDDEV: f64 = 0.05;

/// One row of a standings table as supplied by the fixtures provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandingsRow {
    pub team_id: u32,
    #[serde(default)]
    pub name: String,
    pub played: u32,
    pub goals_for: u32,
    pub goals_against: u32,
    #[serde(default)]
    pub points: u32,
    #[serde(default)]
    pub rank: u32,
}

impl StandingsRow {
    pub fn attack_rate(&self) -> Option<f64> {
        (self.played > 0).then(|| self.goals_for as f64 / self.played as f64)
    }

    pub fn defense_rate(&self) -> Option<f64> {
        (self.played > 0).then(|| self.goals_against as f64 / self.played as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LeagueBaseline {
    pub teams: usize,
    pub avg_attack: f64,
    pub avg_defense: f64,
    pub std_attack: f64,
    pub std_defense: f64,
}

impl Default for LeagueBaseline {
    fn default() -> Self {
        Self {
            teams: 0,
            avg_attack: DEFAULT_GOALS_PER_TEAM,
            avg_defense: DEFAULT_GOALS_PER_TEAM,
            std_attack: DEFAULT_RATE_STDDEV,
            std_defense: DEFAULT_RATE_STDDEV,
        }
    }
}

impl LeagueBaseline {
    pub fn attack_z(&self, attack_rate: f64) -> f64 {
        (attack_rate - self.avg_attack) / self.std_attack.max(MIN_RATE_STDDEV)
    }
}

pub fn compute_league_baseline(standings: &[StandingsRow]) -> LeagueBaseline {
    let attack: Vec<f64> = standings.iter().filter_map(|r| r.attack_rate()).collect();
    let defense: Vec<f64> = standings.iter().filter_map(|r| r.defense_rate()).collect();

    let mut out = LeagueBaseline::default();
    out.teams = attack.len();
    if attack.is_empty() {
        return out;
    }

    let (avg_attack, std_attack) = mean_std(&attack);
    let (avg_defense, std_defense) = mean_std(&defense);
    if avg_attack > 0.0 {
        out.avg_attack = avg_attack;
    }
    if avg_defense > 0.0 {
        out.avg_defense = avg_defense;
    }
    // A single team carries no dispersion information.
    if attack.len() >= 2 {
        out.std_attack = std_attack.max(MIN_RATE_STDDEV);
        out.std_defense = std_defense.max(MIN_RATE_STDDEV);
    }
    out
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(team_id: u32, played: u32, gf: u32, ga: u32) -> StandingsRow {
        StandingsRow {
            team_id,
            name: format!("T{team_id}"),
            played,
            goals_for: gf,
            goals_against: ga,
            points: 0,
            rank: team_id,
        }
    }

    #[test]
    fn empty_standings_use_defaults() {
        let b = compute_league_baseline(&[]);
        assert_eq!(b, LeagueBaseline::default());
    }

    #[test]
    fn averages_and_dispersion() {
        let b = compute_league_baseline(&[row(1, 10, 20, 10), row(2, 10, 10, 20)]);
        assert_eq!(b.teams, 2);
        assert!((b.avg_attack - 1.5).abs() < 1e-12);
        assert!((b.avg_defense - 1.5).abs() < 1e-12);
        assert!((b.std_attack - 0.5).abs() < 1e-12);
        assert!((b.attack_z(2.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn unplayed_rows_are_ignored() {
        let b = compute_league_baseline(&[row(1, 0, 0, 0), row(2, 4, 4, 8)]);
        assert_eq!(b.teams, 1);
        assert!((b.avg_attack - 1.0).abs() < 1e-12);
        assert_eq!(b.std_attack, DEFAULT_RATE_STDDEV);
    }
}
