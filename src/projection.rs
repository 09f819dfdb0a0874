use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calibration::{
    CalibrationMeta, OutcomeCalibrator, Prob3, calibrate_match_probabilities, load_calibrator,
};
use crate::config::EngineConfig;
use crate::confidence::{self, LAMBDA_SCALES, OutcomeIntervals};
use crate::context::{
    ContextAdjustments, MatchContext, adjust_lambdas_at_halftime, adjust_lambdas_context,
    apply_context_adjustments,
};
use crate::elo::{DEFAULT_RATING, RatingUpdate};
use crate::league_baseline::{StandingsRow, compute_league_baseline};
use crate::markets::{
    DefenseProfile, MarketBook, ScorelineTip, market_book, shift_matrix, top_scorelines,
};
use crate::markov::{HorizonOutlook, MarkovContext, goal_prob_horizon};
use crate::rating_store::RatingStore;
use crate::scoreline::{CacheStats, ScoreModel, ScorelineCache, ScorelineMatrix};
use crate::snapshot::{HALF_MINUTES, LiveSnapshot, MatchPhase, REGULATION_MINUTES, Side};
use crate::strength::{
    SideInputs, TeamStrength, clamp_lambda, compute_strength_pair, find_standing,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    pub home_id: u32,
    pub home_name: String,
    pub away_id: u32,
    pub away_name: String,
    #[serde(default)]
    pub league: Option<String>,
    #[serde(default)]
    pub kickoff: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionRequest {
    pub fixture: Fixture,
    #[serde(default)]
    pub standings: Vec<StandingsRow>,
    #[serde(default)]
    pub context: MatchContext,
    #[serde(default)]
    pub live: Option<LiveSnapshot>,
    #[serde(default)]
    pub with_interval: bool,
    #[serde(default)]
    pub include_matrix: bool,
}

impl ProjectionRequest {
    pub fn pre_match(fixture: Fixture, standings: Vec<StandingsRow>) -> Self {
        Self {
            fixture,
            standings,
            context: MatchContext::default(),
            live: None,
            with_interval: false,
            include_matrix: false,
        }
    }

    pub fn phase(&self) -> MatchPhase {
        self.live
            .as_ref()
            .map(LiveSnapshot::phase)
            .unwrap_or(MatchPhase::PreMatch)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchProjection {
    pub fixture: Fixture,
    pub phase: MatchPhase,
    pub probabilities: Prob3,
    pub raw_probabilities: Prob3,
    pub markets: MarketBook,
    pub top_scorelines: Vec<ScorelineTip>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix: Option<ScorelineMatrix>,
    /// Goal expectancy the table was built from: full match pre-match, remaining time when live.
    pub lambda_home: f64,
    pub lambda_away: f64,
    pub home: TeamStrength,
    pub away: TeamStrength,
    pub adjustments: ContextAdjustments,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub horizon: Option<HorizonOutlook>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intervals: Option<OutcomeIntervals>,
    pub model: ScoreModel,
    pub calibrator: String,
}

/// One pass of the pipeline for a given lambda scale.
#[derive(Debug, Clone)]
pub(crate) struct Evaluation {
    pub phase: MatchPhase,
    pub raw: Prob3,
    pub probabilities: Prob3,
    pub book: MarketBook,
    pub matrix: Arc<ScorelineMatrix>,
    pub lambda_home: f64,
    pub lambda_away: f64,
    pub home: TeamStrength,
    pub away: TeamStrength,
    pub adjustments: ContextAdjustments,
    pub horizon: Option<HorizonOutlook>,
}

/// Owns the rating store, calibrator and scoreline cache shared by every projection.
pub struct ForecastEngine {
    config: EngineConfig,
    ratings: Arc<RatingStore>,
    calibrator: Box<dyn OutcomeCalibrator>,
    cache: ScorelineCache,
}

impl ForecastEngine {
    pub fn new(
        config: EngineConfig,
        ratings: Arc<RatingStore>,
        calibrator: Box<dyn OutcomeCalibrator>,
    ) -> Self {
        let cache = ScorelineCache::new(config.cache_capacity);
        Self {
            config,
            ratings,
            calibrator,
            cache,
        }
    }

    pub fn from_config(config: EngineConfig) -> Self {
        let ratings = match config.ratings_path.as_ref() {
            Some(path) => RatingStore::open(path.clone()),
            None => RatingStore::in_memory(),
        };
        let calibrator = load_calibrator(config.calibration_path.as_deref());
        Self::new(config, ratings.shared(), calibrator)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ratings(&self) -> &RatingStore {
        &self.ratings
    }

    pub fn calibrator_name(&self) -> &str {
        self.calibrator.name()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn record_result(
        &self,
        home_id: u32,
        away_id: u32,
        goals_home: u8,
        goals_away: u8,
        season: Option<&str>,
    ) -> RatingUpdate {
        self.ratings.update_match(
            home_id,
            away_id,
            goals_home,
            goals_away,
            season,
            self.config.k_factor,
        )
    }

    pub fn project_match_outcome(&self, request: &ProjectionRequest) -> MatchProjection {
        let eval = self.evaluate(request, 1.0);

        let intervals = (request.with_interval && eval.phase != MatchPhase::Finished).then(|| {
            let scenarios: Vec<Prob3> = LAMBDA_SCALES
                .iter()
                .map(|scale| self.evaluate(request, *scale).probabilities)
                .collect();
            confidence::interval_from_scenarios(eval.probabilities, &scenarios)
        });

        let fixture = &request.fixture;
        let top = top_scorelines(
            &eval.matrix,
            &fixture.home_name,
            &fixture.away_name,
            self.config.top_scorelines,
        );
        let matrix = (request.include_matrix && eval.phase != MatchPhase::Finished)
            .then(|| eval.matrix.as_ref().clone());

        debug!(
            home = %fixture.home_name,
            away = %fixture.away_name,
            phase = ?eval.phase,
            p_home = eval.probabilities.home,
            p_draw = eval.probabilities.draw,
            p_away = eval.probabilities.away,
            "match projected"
        );

        MatchProjection {
            fixture: fixture.clone(),
            phase: eval.phase,
            probabilities: eval.probabilities,
            raw_probabilities: eval.raw,
            markets: eval.book,
            top_scorelines: top,
            matrix,
            lambda_home: eval.lambda_home,
            lambda_away: eval.lambda_away,
            home: eval.home,
            away: eval.away,
            adjustments: eval.adjustments,
            horizon: eval.horizon,
            intervals,
            model: self.config.model,
            calibrator: self.calibrator.name().to_string(),
        }
    }

    /// Strength, context, distribution, markets and calibration with both pre-context
    /// lambdas multiplied by `lambda_scale`.
    pub(crate) fn evaluate(&self, request: &ProjectionRequest, lambda_scale: f64) -> Evaluation {
        let fixture = &request.fixture;
        let baseline = compute_league_baseline(&request.standings);
        let home_row = find_standing(&request.standings, fixture.home_id);
        let away_row = find_standing(&request.standings, fixture.away_id);

        let elo_home = self
            .ratings
            .get_rating(fixture.home_id, Some(&fixture.home_name), DEFAULT_RATING);
        let elo_away = self
            .ratings
            .get_rating(fixture.away_id, Some(&fixture.away_name), DEFAULT_RATING);

        let (mut home, mut away) = compute_strength_pair(
            SideInputs {
                team_id: fixture.home_id,
                name: &fixture.home_name,
                standings: home_row,
                elo: elo_home,
            },
            SideInputs {
                team_id: fixture.away_id,
                name: &fixture.away_name,
                standings: away_row,
                elo: elo_away,
            },
            &baseline,
            self.config.home_advantage,
        );
        if lambda_scale != 1.0 {
            let note = format!("lambda scenario x{lambda_scale:.2}");
            home = home.scaled(lambda_scale, note.clone());
            away = away.scaled(lambda_scale, note);
        }

        let phase = request.phase();
        let live = request.live.as_ref().filter(|_| phase.is_live());
        let adjusted = apply_context_adjustments(&home, &away, &request.context, live);
        // Pre-match context only; the half-time signal is judged against these rates.
        let (context_home, context_away, _) =
            adjust_lambdas_context(home.lambda, away.lambda, &request.context);
        let (mut home, mut away, mut adjustments) =
            (adjusted.home, adjusted.away, adjusted.adjustments);

        let defense = match (home_row, away_row) {
            (Some(_), Some(_)) => Some(DefenseProfile {
                home_defense: home.defense,
                away_defense: away.defense,
                league_defense: baseline.avg_defense,
            }),
            _ => None,
        };

        let max_goals = self.config.max_goals;
        let model = self.config.model;

        if phase == MatchPhase::Finished {
            let snapshot = request.live.as_ref();
            let gh = snapshot.map(|s| s.score_home as usize).unwrap_or(0);
            let ga = snapshot.map(|s| s.score_away as usize).unwrap_or(0);
            let mut point = ScorelineMatrix::zeros(0);
            point.set(0, 0, 1.0);
            let matrix = shift_matrix(&point, gh, ga);
            let book = market_book(&matrix, None, None);
            let s = book.summary;
            let probs = Prob3 {
                home: s.home,
                draw: s.draw,
                away: s.away,
            };
            return Evaluation {
                phase,
                raw: probs,
                probabilities: probs,
                book,
                matrix: Arc::new(matrix),
                lambda_home: 0.0,
                lambda_away: 0.0,
                home,
                away,
                adjustments,
                horizon: None,
            };
        }

        let (matrix, lambda_home, lambda_away, horizon, halves) = match live {
            None => {
                let lh = home.lambda;
                let la = away.lambda;
                let full = self.cache.matrix(lh, la, max_goals, model);
                let half = self.cache.matrix(lh / 2.0, la / 2.0, max_goals, model);
                (full, lh, la, None, Some(half))
            }
            Some(snapshot) => {
                let (rate_home, rate_away, remaining_home, remaining_away) =
                    if phase == MatchPhase::FirstHalf {
                        let frac = snapshot.remaining_fraction();
                        (home.lambda, away.lambda, home.lambda * frac, away.lambda * frac)
                    } else {
                        let (second_home, second_away, ht) =
                            adjust_lambdas_at_halftime(context_home, context_away, snapshot);
                        // Red cards and injuries keep their effect on the re-estimated rates.
                        let rate_home =
                            clamp_lambda(second_home * 2.0 * home.lambda / context_home);
                        let rate_away =
                            clamp_lambda(second_away * 2.0 * away.lambda / context_away);
                        home = home.with_lambda(rate_home);
                        away = away.with_lambda(rate_away);
                        home.notes.extend(ht.notes_for(Side::Home).iter().cloned());
                        away.notes.extend(ht.notes_for(Side::Away).iter().cloned());
                        adjustments.merge(ht);
                        let left = second_half_left(snapshot);
                        (
                            rate_home,
                            rate_away,
                            rate_home / 2.0 * left,
                            rate_away / 2.0 * left,
                        )
                    };

                let ctx = MarkovContext {
                    score_diff: snapshot.score_diff(),
                    red_cards_home: snapshot.red_cards(Side::Home),
                    red_cards_away: snapshot.red_cards(Side::Away),
                    pressure: snapshot.pressure_score(),
                    elapsed_minutes: snapshot.elapsed_minute() as f64,
                };
                let outlook = goal_prob_horizon(
                    rate_home,
                    rate_away,
                    &ctx,
                    self.config.horizon_secs,
                    &self.config.markov,
                );
                let lh = remaining_home * outlook.factor_home;
                let la = remaining_away * outlook.factor_away;
                debug!(
                    minute = snapshot.elapsed_minute(),
                    factor_home = outlook.factor_home,
                    factor_away = outlook.factor_away,
                    lh,
                    la,
                    "live remaining-time rates"
                );

                let remaining = self.cache.matrix(lh, la, max_goals, model);
                let shifted = shift_matrix(
                    &remaining,
                    snapshot.score_home as usize,
                    snapshot.score_away as usize,
                );
                (Arc::new(shifted), lh, la, Some(outlook), None)
            }
        };

        let book = match halves.as_ref() {
            Some(half) => market_book(
                &matrix,
                defense.as_ref(),
                Some((half.as_ref(), half.as_ref())),
            ),
            None => market_book(&matrix, defense.as_ref(), None),
        };
        let s = book.summary;
        let raw = Prob3 {
            home: s.home,
            draw: s.draw,
            away: s.away,
        }
        .normalized()
        .unwrap_or_else(Prob3::uniform);

        let meta = CalibrationMeta {
            lambda_home,
            lambda_away,
            elo_home,
            elo_away,
            pressure: live.map(LiveSnapshot::pressure_score).unwrap_or(0.5),
            intensity: live.map(LiveSnapshot::intensity_score).unwrap_or(0.0),
        };
        let probabilities = calibrate_match_probabilities(self.calibrator.as_ref(), raw, &s, &meta);

        Evaluation {
            phase,
            raw,
            probabilities,
            book,
            matrix,
            lambda_home,
            lambda_away,
            home,
            away,
            adjustments,
            horizon,
        }
    }
}

/// Free-function entry point over an engine.
pub fn project_match_outcome(
    engine: &ForecastEngine,
    request: &ProjectionRequest,
) -> MatchProjection {
    engine.project_match_outcome(request)
}

/// Share of the second half still to play; 1.0 at the interval.
fn second_half_left(snapshot: &LiveSnapshot) -> f64 {
    let elapsed = snapshot.elapsed_minute().max(HALF_MINUTES);
    REGULATION_MINUTES.saturating_sub(elapsed) as f64 / HALF_MINUTES as f64
}
