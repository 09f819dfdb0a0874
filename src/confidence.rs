use serde::{Deserialize, Serialize};

use crate::calibration::{Outcome, Prob3};
use crate::projection::{ForecastEngine, ProjectionRequest};

/// Goal-expectancy perturbations re-run through the whole pipeline.
pub const LAMBDA_SCALES: [f64; 2] = [0.9, 1.1];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityInterval {
    pub low: f64,
    pub high: f64,
}

impl ProbabilityInterval {
    pub fn width(&self) -> f64 {
        self.high - self.low
    }

    pub fn contains(&self, p: f64) -> bool {
        self.low <= p && p <= self.high
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutcomeIntervals {
    pub home: ProbabilityInterval,
    pub draw: ProbabilityInterval,
    pub away: ProbabilityInterval,
}

impl OutcomeIntervals {
    pub fn get(&self, outcome: Outcome) -> ProbabilityInterval {
        match outcome {
            Outcome::Home => self.home,
            Outcome::Draw => self.draw,
            Outcome::Away => self.away,
        }
    }
}

fn bracket(point: f64, scenarios: impl Iterator<Item = f64>) -> ProbabilityInterval {
    let (low, high) = scenarios
        .filter(|p| p.is_finite())
        .fold((point, point), |(lo, hi), p| (lo.min(p), hi.max(p)));
    ProbabilityInterval {
        low: low.clamp(0.0, 1.0),
        high: high.clamp(0.0, 1.0),
    }
}

/// Min/max per outcome over the point estimate and its scenarios.
pub fn interval_from_scenarios(point: Prob3, scenarios: &[Prob3]) -> OutcomeIntervals {
    OutcomeIntervals {
        home: bracket(point.home, scenarios.iter().map(|p| p.home)),
        draw: bracket(point.draw, scenarios.iter().map(|p| p.draw)),
        away: bracket(point.away, scenarios.iter().map(|p| p.away)),
    }
}

pub fn probability_confidence_interval(
    engine: &ForecastEngine,
    request: &ProjectionRequest,
) -> OutcomeIntervals {
    let point = engine.evaluate(request, 1.0).probabilities;
    let scenarios: Vec<Prob3> = LAMBDA_SCALES
        .iter()
        .map(|scale| engine.evaluate(request, *scale).probabilities)
        .collect();
    interval_from_scenarios(point, &scenarios)
}
