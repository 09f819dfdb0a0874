use serde::{Deserialize, Serialize};

pub const REGULATION_MINUTES: u16 = 90;
pub const HALF_MINUTES: u16 = 45;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Home,
    Away,
}

impl Side {
    pub fn opponent(self) -> Self {
        match self {
            Side::Home => Side::Away,
            Side::Away => Side::Home,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    PreMatch,
    FirstHalf,
    HalfTime,
    SecondHalf,
    Finished,
}

impl MatchPhase {
    pub fn is_live(self) -> bool {
        matches!(
            self,
            MatchPhase::FirstHalf | MatchPhase::HalfTime | MatchPhase::SecondHalf
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Goal,
    RedCard,
    Injury,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchEvent {
    pub minute: u16,
    pub kind: EventKind,
    pub side: Side,
    #[serde(default)]
    pub description: String,
}

/// Provider statistic row; cells are raw strings such as `"58%"` or `"1.72"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatRow {
    pub name: String,
    pub home: String,
    pub away: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveSnapshot {
    // Provider status code: NS, 1H, HT, 2H, LIVE, FT, AET, PEN...
    pub status: String,
    #[serde(default)]
    pub minute: u16,
    #[serde(default)]
    pub score_home: u8,
    #[serde(default)]
    pub score_away: u8,
    #[serde(default)]
    pub events: Vec<MatchEvent>,
    #[serde(default)]
    pub stats: Vec<StatRow>,
}

impl LiveSnapshot {
    pub fn phase(&self) -> MatchPhase {
        match self.status.trim().to_ascii_uppercase().as_str() {
            "" | "NS" | "TBD" | "PST" | "SCHEDULED" => MatchPhase::PreMatch,
            "1H" => MatchPhase::FirstHalf,
            "HT" => MatchPhase::HalfTime,
            "2H" | "ET" | "BT" | "P" => MatchPhase::SecondHalf,
            "FT" | "AET" | "PEN" | "FINISHED" | "ENDED" => MatchPhase::Finished,
            // Generic in-play codes: infer the half from the clock.
            _ => {
                if self.minute == 0 {
                    MatchPhase::PreMatch
                } else if self.minute < HALF_MINUTES {
                    MatchPhase::FirstHalf
                } else {
                    MatchPhase::SecondHalf
                }
            }
        }
    }

    /// Elapsed minute clamped to regulation time; half-time reads as 45.
    pub fn elapsed_minute(&self) -> u16 {
        match self.phase() {
            MatchPhase::PreMatch => 0,
            MatchPhase::HalfTime => HALF_MINUTES,
            MatchPhase::Finished => REGULATION_MINUTES,
            _ => self.minute.clamp(1, REGULATION_MINUTES),
        }
    }

    pub fn remaining_fraction(&self) -> f64 {
        let remaining = REGULATION_MINUTES.saturating_sub(self.elapsed_minute());
        remaining as f64 / REGULATION_MINUTES as f64
    }

    pub fn score_diff(&self) -> i32 {
        self.score_home as i32 - self.score_away as i32
    }

    pub fn count_events(&self, kind: EventKind, side: Side) -> u32 {
        self.events
            .iter()
            .filter(|e| e.kind == kind && e.side == side)
            .count() as u32
    }

    pub fn red_cards(&self, side: Side) -> u32 {
        self.count_events(EventKind::RedCard, side)
    }

    pub fn injuries(&self, side: Side) -> u32 {
        self.count_events(EventKind::Injury, side)
    }

    /// Goals per side scored up to and including `minute`.
    pub fn goals_until(&self, minute: u16) -> (u32, u32) {
        let mut home = 0;
        let mut away = 0;
        for e in self.events.iter().filter(|e| e.kind == EventKind::Goal && e.minute <= minute) {
            match e.side {
                Side::Home => home += 1,
                Side::Away => away += 1,
            }
        }
        (home, away)
    }

    pub fn stat_pair(&self, keys: &[&str]) -> Option<(f64, f64)> {
        extract_stat_f64(&self.stats, keys)
    }

    pub fn xg(&self) -> Option<(f64, f64)> {
        self.stat_pair(&["xg", "expected goals", "expected goals (xg)"])
    }

    pub fn shots_on_target(&self) -> Option<(f64, f64)> {
        self.stat_pair(&["shots on target", "shots on goal"])
    }

    /// Home share of attacking pressure in [0, 1]; 0.5 when no statistics are present.
    pub fn pressure_score(&self) -> f64 {
        let mut weighted = 0.0;
        let mut weight = 0.0;
        let mut blend = |pair: Option<(f64, f64)>, w: f64| {
            if let Some(s) = pair.and_then(|(h, a)| share(h, a)) {
                weighted += s * w;
                weight += w;
            }
        };
        blend(self.stat_pair(&["possession", "ball possession"]), 0.3);
        blend(self.stat_pair(&["total shots", "shots"]), 0.25);
        blend(self.shots_on_target(), 0.25);
        blend(self.stat_pair(&["corners", "corner kicks"]), 0.1);
        blend(self.xg(), 0.1);
        if weight <= 0.0 {
            return 0.5;
        }
        (weighted / weight).clamp(0.0, 1.0)
    }

    /// Combined attacking tempo in [0, 1], roughly shots and corners per minute.
    pub fn intensity_score(&self) -> f64 {
        let minute = self.elapsed_minute().max(1) as f64;
        let shots = self
            .stat_pair(&["total shots", "shots"])
            .map(|(h, a)| h + a)
            .unwrap_or(0.0);
        let corners = self
            .stat_pair(&["corners", "corner kicks"])
            .map(|(h, a)| h + a)
            .unwrap_or(0.0);
        // ~0.5 shots+corners a minute is a frantic game.
        ((shots + 0.5 * corners) / (minute * 0.5)).clamp(0.0, 1.0)
    }
}

fn share(home: f64, away: f64) -> Option<f64> {
    let total = home + away;
    (total > 0.0 && total.is_finite()).then(|| home / total)
}

pub fn extract_stat_f64(stats: &[StatRow], keys: &[&str]) -> Option<(f64, f64)> {
    let want = keys
        .iter()
        .map(|k| k.trim().to_lowercase())
        .collect::<Vec<_>>();
    for row in stats {
        let name = row.name.trim().to_lowercase();
        if !want.iter().any(|k| name == *k) {
            continue;
        }
        let h = parse_stat_cell(&row.home)?;
        let a = parse_stat_cell(&row.away)?;
        return Some((h, a));
    }
    None
}

pub fn parse_stat_cell(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if s.is_empty() || s == "-" {
        return None;
    }
    // "5 (45%)" style cells keep the leading count.
    let s = s.split_whitespace().next().unwrap_or(s);
    let s = s.trim_end_matches('%').replace(',', "");
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}
