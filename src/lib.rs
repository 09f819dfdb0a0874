//! Football match outcome forecasting: team ratings, scoreline distributions, in-play
//! adjustment and market probabilities.

pub mod calibration;
pub mod confidence;
pub mod config;
pub mod context;
pub mod elo;
pub mod league_baseline;
pub mod markets;
pub mod markov;
pub mod projection;
pub mod rating_store;
pub mod scoreline;
pub mod snapshot;
pub mod strength;

pub use calibration::{OutcomeCalibrator, Prob3};
pub use config::EngineConfig;
pub use projection::{
    Fixture, ForecastEngine, MatchProjection, ProjectionRequest, project_match_outcome,
};
pub use rating_store::RatingStore;
