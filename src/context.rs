use serde::{Deserialize, Serialize};

use crate::snapshot::{HALF_MINUTES, LiveSnapshot, Side};
use crate::strength::{TeamStrength, clamp_lambda};

const WET_FACTOR: f64 = 0.95;
const WIND_THRESHOLD: f64 = 30.0;
const WIND_FACTOR: f64 = 0.93;
const COLD_FACTOR: f64 = 0.96;
const HEAT_FACTOR: f64 = 0.97;
const SUSPENSION_STEP: f64 = 0.07;
const SUSPENSION_FLOOR: f64 = 0.80;
const INJURY_STEP: f64 = 0.05;
const INJURY_FLOOR: f64 = 0.82;
const SHORT_REST_HOURS: f64 = 48.0;
const SHORT_REST_FACTOR: f64 = 0.93;
const REDUCED_REST_HOURS: f64 = 72.0;
const REDUCED_REST_FACTOR: f64 = 0.97;
const FATIGUE_FACTOR: f64 = 0.95;
const PENALTY_RATE_THRESHOLD: f64 = 0.25;
const PENALTY_BOOST: f64 = 1.03;

const HALFTIME_RATIO_MIN: f64 = 0.45;
const HALFTIME_RATIO_MAX: f64 = 1.9;
const SOT_XG_EQUIVALENT: f64 = 0.11;
const GOAL_XG_EQUIVALENT: f64 = 0.9;

const RED_CARD_SELF: f64 = 0.80;
const RED_CARD_SELF_FLOOR: f64 = 0.55;
const RED_CARD_OPPONENT: f64 = 1.10;
const RED_CARD_OPPONENT_CAP: f64 = 1.30;
const LIVE_INJURY_FACTOR: f64 = 0.97;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub wind_kmh: Option<f64>,
    #[serde(default)]
    pub temperature_c: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefereeProfile {
    #[serde(default)]
    pub name: Option<String>,
    pub penalties_per_game: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SideContext {
    #[serde(default)]
    pub suspensions: u32,
    #[serde(default)]
    pub key_injuries: u32,
    #[serde(default)]
    pub rest_hours: Option<f64>,
    #[serde(default)]
    pub fatigued: bool,
}

/// Qualitative pre-match signals for one fixture.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchContext {
    #[serde(default)]
    pub weather: Option<WeatherReport>,
    #[serde(default)]
    pub referee: Option<RefereeProfile>,
    #[serde(default)]
    pub home: SideContext,
    #[serde(default)]
    pub away: SideContext,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextAdjustments {
    pub weather: Option<String>,
    pub referee: Option<String>,
    pub red_cards: Vec<String>,
    pub injuries: Vec<String>,
    pub fatigue: Vec<String>,
    pub home_notes: Vec<String>,
    pub away_notes: Vec<String>,
    pub halftime_reassessed: bool,
    pub halftime_message: Option<String>,
}

impl ContextAdjustments {
    fn note(&mut self, side: Side, note: String) {
        match side {
            Side::Home => self.home_notes.push(note),
            Side::Away => self.away_notes.push(note),
        }
    }

    fn note_both(&mut self, note: &str) {
        self.home_notes.push(note.to_string());
        self.away_notes.push(note.to_string());
    }

    pub fn notes_for(&self, side: Side) -> &[String] {
        match side {
            Side::Home => &self.home_notes,
            Side::Away => &self.away_notes,
        }
    }

    pub fn merge(&mut self, other: ContextAdjustments) {
        if other.weather.is_some() {
            self.weather = other.weather;
        }
        if other.referee.is_some() {
            self.referee = other.referee;
        }
        self.red_cards.extend(other.red_cards);
        self.injuries.extend(other.injuries);
        self.fatigue.extend(other.fatigue);
        self.home_notes.extend(other.home_notes);
        self.away_notes.extend(other.away_notes);
        if other.halftime_reassessed {
            self.halftime_reassessed = true;
            self.halftime_message = other.halftime_message;
        }
    }
}

/// Adjusted strengths plus the record of what was applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustedPair {
    pub home: TeamStrength,
    pub away: TeamStrength,
    pub adjustments: ContextAdjustments,
}

pub fn weather_factor(weather: &WeatherReport) -> (f64, Vec<String>) {
    let mut factor = 1.0;
    let mut notes = Vec::new();
    let desc = weather.description.to_ascii_lowercase();
    if ["rain", "snow", "storm"].iter().any(|w| desc.contains(w)) {
        factor *= WET_FACTOR;
        notes.push(format!("{} x{WET_FACTOR}", weather.description.trim()));
    }
    if let Some(wind) = weather.wind_kmh.filter(|w| w.is_finite()) {
        if wind >= WIND_THRESHOLD {
            factor *= WIND_FACTOR;
            notes.push(format!("wind {wind:.0} x{WIND_FACTOR}"));
        }
    }
    if let Some(temp) = weather.temperature_c.filter(|t| t.is_finite()) {
        if temp <= 0.0 {
            factor *= COLD_FACTOR;
            notes.push(format!("temperature {temp:.0}C x{COLD_FACTOR}"));
        } else if temp >= 30.0 {
            factor *= HEAT_FACTOR;
            notes.push(format!("temperature {temp:.0}C x{HEAT_FACTOR}"));
        }
    }
    (factor, notes)
}

fn side_factor(ctx: &SideContext, side: Side, out: &mut ContextAdjustments) -> f64 {
    let mut factor = 1.0;
    if ctx.suspensions > 0 {
        let f = (1.0 - SUSPENSION_STEP * ctx.suspensions as f64).max(SUSPENSION_FLOOR);
        factor *= f;
        out.note(side, format!("{} suspended x{f:.2}", ctx.suspensions));
    }
    if ctx.key_injuries > 0 {
        let f = (1.0 - INJURY_STEP * ctx.key_injuries as f64).max(INJURY_FLOOR);
        factor *= f;
        let note = format!("{} key injuries x{f:.2}", ctx.key_injuries);
        out.injuries.push(format!("{side:?}: {note}"));
        out.note(side, note);
    }
    if let Some(rest) = ctx.rest_hours.filter(|r| r.is_finite() && *r >= 0.0) {
        let f = if rest < SHORT_REST_HOURS {
            SHORT_REST_FACTOR
        } else if rest < REDUCED_REST_HOURS {
            REDUCED_REST_FACTOR
        } else {
            1.0
        };
        if f < 1.0 {
            factor *= f;
            let note = format!("{rest:.0}h rest x{f:.2}");
            out.fatigue.push(format!("{side:?}: {note}"));
            out.note(side, note);
        }
    }
    if ctx.fatigued {
        factor *= FATIGUE_FACTOR;
        out.fatigue.push(format!("{side:?}: fatigue flag"));
        out.note(side, format!("fatigue x{FATIGUE_FACTOR}"));
    }
    factor
}

/// Pre-match context chain on a bare lambda pair.
pub fn adjust_lambdas_context(
    lambda_home: f64,
    lambda_away: f64,
    ctx: &MatchContext,
) -> (f64, f64, ContextAdjustments) {
    let mut out = ContextAdjustments::default();
    let mut fh = 1.0;
    let mut fa = 1.0;

    if let Some(weather) = ctx.weather.as_ref() {
        let (f, notes) = weather_factor(weather);
        if f < 1.0 {
            fh *= f;
            fa *= f;
            let joined = notes.join(", ");
            out.note_both(&format!("weather: {joined}"));
            out.weather = Some(joined);
        }
    }

    fh *= side_factor(&ctx.home, Side::Home, &mut out);
    fa *= side_factor(&ctx.away, Side::Away, &mut out);

    if let Some(referee) = ctx.referee.as_ref() {
        if referee.penalties_per_game.is_finite()
            && referee.penalties_per_game >= PENALTY_RATE_THRESHOLD
        {
            fh *= PENALTY_BOOST;
            fa *= PENALTY_BOOST;
            let note = format!(
                "referee {} awards {:.2} penalties/game x{PENALTY_BOOST}",
                referee.name.as_deref().unwrap_or("unknown"),
                referee.penalties_per_game
            );
            out.note_both(&note);
            out.referee = Some(note);
        }
    }

    (
        clamp_lambda(lambda_home * fh),
        clamp_lambda(lambda_away * fa),
        out,
    )
}

/// Live events: red cards shift goal expectancy toward the side with more players.
pub fn adjust_lambdas_live_events(
    lambda_home: f64,
    lambda_away: f64,
    live: &LiveSnapshot,
) -> (f64, f64, ContextAdjustments) {
    let mut out = ContextAdjustments::default();
    let mut fh = 1.0;
    let mut fa = 1.0;

    for side in [Side::Home, Side::Away] {
        let reds = live.red_cards(side);
        if reds > 0 {
            let own = RED_CARD_SELF.powi(reds as i32).max(RED_CARD_SELF_FLOOR);
            let opp = RED_CARD_OPPONENT.powi(reds as i32).min(RED_CARD_OPPONENT_CAP);
            let note = format!("{reds} red card(s) x{own:.2}, opponent x{opp:.2}");
            out.red_cards.push(format!("{side:?}: {note}"));
            out.note(side, note);
            out.note(side.opponent(), format!("opponent down to fewer players x{opp:.2}"));
            match side {
                Side::Home => {
                    fh *= own;
                    fa *= opp;
                }
                Side::Away => {
                    fa *= own;
                    fh *= opp;
                }
            }
        }

        let injuries = live.injuries(side);
        if injuries > 0 {
            let f = LIVE_INJURY_FACTOR.powi(injuries as i32);
            let note = format!("{injuries} in-match injury(ies) x{f:.2}");
            out.injuries.push(format!("{side:?}: {note}"));
            out.note(side, note);
            match side {
                Side::Home => fh *= f,
                Side::Away => fa *= f,
            }
        }
    }

    (
        clamp_lambda(lambda_home * fh),
        clamp_lambda(lambda_away * fa),
        out,
    )
}

/// First-half attacking signal per side, in expected-goal units.
///
/// Cumulative figures read after the break are pro-rated back to one half.
pub fn first_half_signal(live: &LiveSnapshot) -> Option<(f64, f64, &'static str)> {
    let per_half = HALF_MINUTES as f64 / live.elapsed_minute().max(HALF_MINUTES) as f64;
    if let Some((h, a)) = live.xg() {
        return Some((h.max(0.0) * per_half, a.max(0.0) * per_half, "xG"));
    }
    if let Some((h, a)) = live.shots_on_target() {
        return Some((
            h.max(0.0) * SOT_XG_EQUIVALENT * per_half,
            a.max(0.0) * SOT_XG_EQUIVALENT * per_half,
            "shots on target",
        ));
    }
    let (gh, ga, scale) = if live.events.iter().any(|e| e.minute > 0) {
        let (gh, ga) = live.goals_until(HALF_MINUTES);
        (gh, ga, 1.0)
    } else {
        (live.score_home as u32, live.score_away as u32, per_half)
    };
    if gh + ga == 0 {
        return None;
    }
    Some((
        gh as f64 * GOAL_XG_EQUIVALENT * scale,
        ga as f64 * GOAL_XG_EQUIVALENT * scale,
        "goals",
    ))
}

/// Replaces each pre-match lambda with a second-half lambda driven by first-half play.
///
/// Returns the second-half rates (half of the pre-match rate, scaled by observed over
/// expected first-half signal).
pub fn adjust_lambdas_at_halftime(
    lambda_home_pre: f64,
    lambda_away_pre: f64,
    live: &LiveSnapshot,
) -> (f64, f64, ContextAdjustments) {
    let mut out = ContextAdjustments::default();
    let half_h = clamp_lambda(lambda_home_pre) / 2.0;
    let half_a = clamp_lambda(lambda_away_pre) / 2.0;

    let Some((obs_h, obs_a, source)) = first_half_signal(live) else {
        out.halftime_reassessed = true;
        out.halftime_message = Some("no first-half signal, pre-match rates halved".to_string());
        return (half_h, half_a, out);
    };

    let ratio = |observed: f64, expected: f64| {
        if expected > 0.0 {
            (observed / expected).clamp(HALFTIME_RATIO_MIN, HALFTIME_RATIO_MAX)
        } else {
            1.0
        }
    };
    let rh = ratio(obs_h, half_h);
    let ra = ratio(obs_a, half_a);

    out.note(Side::Home, format!("half-time {source} {obs_h:.2} vs {half_h:.2} expected x{rh:.2}"));
    out.note(Side::Away, format!("half-time {source} {obs_a:.2} vs {half_a:.2} expected x{ra:.2}"));
    out.halftime_reassessed = true;
    out.halftime_message = Some(format!(
        "second half re-estimated from {source}: home x{rh:.2}, away x{ra:.2}"
    ));

    (half_h * rh, half_a * ra, out)
}

/// Runs the pre-match chain (and live events when given) on a strength pair.
pub fn apply_context_adjustments(
    home: &TeamStrength,
    away: &TeamStrength,
    ctx: &MatchContext,
    live: Option<&LiveSnapshot>,
) -> AdjustedPair {
    let (mut lh, mut la, mut adjustments) = adjust_lambdas_context(home.lambda, away.lambda, ctx);
    if let Some(live) = live {
        let (h, a, live_adj) = adjust_lambdas_live_events(lh, la, live);
        lh = h;
        la = a;
        adjustments.merge(live_adj);
    }

    let mut home = home.with_lambda(lh);
    let mut away = away.with_lambda(la);
    home.notes.extend(adjustments.home_notes.iter().cloned());
    away.notes.extend(adjustments.away_notes.iter().cloned());

    AdjustedPair {
        home,
        away,
        adjustments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{EventKind, MatchEvent, StatRow};

    fn snapshot(status: &str, minute: u16) -> LiveSnapshot {
        LiveSnapshot {
            status: status.to_string(),
            minute,
            score_home: 0,
            score_away: 0,
            events: Vec::new(),
            stats: Vec::new(),
        }
    }

    #[test]
    fn empty_context_is_identity() {
        let (h, a, adj) = adjust_lambdas_context(1.4, 1.1, &MatchContext::default());
        assert_eq!((h, a), (1.4, 1.1));
        assert!(adj.home_notes.is_empty() && adj.away_notes.is_empty());
    }

    #[test]
    fn weather_hits_both_sides_multiplicatively() {
        let ctx = MatchContext {
            weather: Some(WeatherReport {
                description: "Heavy rain".to_string(),
                wind_kmh: Some(35.0),
                temperature_c: Some(-2.0),
            }),
            ..Default::default()
        };
        let (h, a, adj) = adjust_lambdas_context(2.0, 1.0, &ctx);
        let f = 0.95 * 0.93 * 0.96;
        assert!((h - 2.0 * f).abs() < 1e-12);
        assert!((a - 1.0 * f).abs() < 1e-12);
        assert!(adj.weather.unwrap().contains("wind"));
    }

    #[test]
    fn side_factors_floor_and_stack() {
        let ctx = MatchContext {
            home: SideContext {
                suspensions: 5,
                key_injuries: 1,
                rest_hours: Some(40.0),
                fatigued: true,
            },
            away: SideContext {
                rest_hours: Some(60.0),
                ..Default::default()
            },
            referee: Some(RefereeProfile {
                name: Some("Ref".to_string()),
                penalties_per_game: 0.3,
            }),
            ..Default::default()
        };
        let (h, a, adj) = adjust_lambdas_context(2.0, 2.0, &ctx);
        let fh = 0.80 * 0.95 * 0.93 * 0.95 * 1.03;
        let fa = 0.97 * 1.03;
        assert!((h - 2.0 * fh).abs() < 1e-12);
        assert!((a - 2.0 * fa).abs() < 1e-12);
        assert_eq!(adj.fatigue.len(), 3);
        assert!(adj.referee.is_some());
    }

    #[test]
    fn results_are_reclamped() {
        let ctx = MatchContext {
            home: SideContext {
                suspensions: 3,
                ..Default::default()
            },
            ..Default::default()
        };
        let (h, _, _) = adjust_lambdas_context(0.26, 1.0, &ctx);
        assert_eq!(h, 0.25);
    }

    #[test]
    fn red_card_moves_expectancy_to_opponent() {
        let mut live = snapshot("2H", 60);
        live.events.push(MatchEvent {
            minute: 55,
            kind: EventKind::RedCard,
            side: Side::Home,
            description: String::new(),
        });
        let (h, a, adj) = adjust_lambdas_live_events(1.5, 1.0, &live);
        assert!((h - 1.2).abs() < 1e-12);
        assert!((a - 1.1).abs() < 1e-12);
        assert_eq!(adj.red_cards.len(), 1);
    }

    #[test]
    fn halftime_uses_xg_ratio() {
        let mut live = snapshot("HT", 45);
        live.stats = vec![StatRow {
            name: "xG".to_string(),
            home: "1.50".to_string(),
            away: "0.10".to_string(),
        }];
        let (h, a, adj) = adjust_lambdas_at_halftime(1.5, 1.0, &live);
        // home: 1.5 observed over 0.75 expected is x2.0, capped at x1.9.
        assert!((h - 0.75 * 1.9).abs() < 1e-12);
        assert!((a - 0.5 * 0.45).abs() < 1e-12);
        assert!(adj.halftime_reassessed);
    }

    #[test]
    fn halftime_falls_back_to_shots_then_goals() {
        let mut live = snapshot("HT", 45);
        live.stats = vec![StatRow {
            name: "Shots on target".to_string(),
            home: "5".to_string(),
            away: "5".to_string(),
        }];
        let (h, _, _) = adjust_lambdas_at_halftime(1.1, 1.1, &live);
        assert!((h - 0.55).abs() < 1e-12);

        let mut goals_only = snapshot("HT", 45);
        goals_only.score_home = 1;
        let (h, a, _) = adjust_lambdas_at_halftime(1.0, 1.0, &goals_only);
        assert!((h - 0.5 * 1.8).abs() < 1e-12);
        assert!((a - 0.5 * 0.45).abs() < 1e-12);
    }

    #[test]
    fn second_half_stats_are_prorated_to_one_half() {
        let xg = StatRow {
            name: "xG".to_string(),
            home: "1.20".to_string(),
            away: "0.60".to_string(),
        };
        let mut at_break = snapshot("HT", 45);
        at_break.stats = vec![xg.clone()];
        let mut later = snapshot("2H", 90);
        later.stats = vec![xg];

        let (h, a, _) = first_half_signal(&at_break).unwrap();
        assert_eq!((h, a), (1.2, 0.6));
        let (h, a, _) = first_half_signal(&later).unwrap();
        assert!((h - 0.6).abs() < 1e-12);
        assert!((a - 0.3).abs() < 1e-12);
    }

    #[test]
    fn halftime_without_signal_halves() {
        let live = snapshot("HT", 45);
        let (h, a, adj) = adjust_lambdas_at_halftime(1.2, 0.8, &live);
        assert_eq!((h, a), (0.6, 0.4));
        assert!(adj.halftime_message.unwrap().contains("no first-half signal"));
    }

    #[test]
    fn strength_pair_copies_carry_notes() {
        let base = TeamStrength {
            team_id: 1,
            name: "H".to_string(),
            attack: 1.5,
            defense: 1.0,
            lambda: 1.5,
            attack_z: 0.0,
            elo: 1500.0,
            elo_delta: 0.0,
            notes: Vec::new(),
        };
        let ctx = MatchContext {
            away: SideContext {
                fatigued: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let pair = apply_context_adjustments(&base, &base, &ctx, None);
        assert!(base.notes.is_empty());
        assert_eq!(pair.home.lambda, 1.5);
        assert!((pair.away.lambda - 1.5 * 0.95).abs() < 1e-12);
        assert_eq!(pair.away.notes.len(), 1);
    }
}
