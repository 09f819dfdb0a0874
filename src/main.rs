use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use matchcast::{EngineConfig, ForecastEngine, ProjectionRequest};

#[derive(Parser)]
#[command(name = "matchcast")]
#[command(version, about = "Football match outcome projections", long_about = None)]
struct Cli {
    /// Rating table path (overrides MATCHCAST_RATINGS_PATH)
    #[arg(long, global = true)]
    ratings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Project one fixture from a request JSON file
    Project {
        request: PathBuf,

        /// Add the lambda-perturbation confidence interval
        #[arg(long)]
        interval: bool,

        /// Include the full scoreline table
        #[arg(long)]
        matrix: bool,
    },
    /// Apply a finished result to the rating table
    Record {
        home_id: u32,
        away_id: u32,
        goals_home: u8,
        goals_away: u8,

        #[arg(long)]
        season: Option<String>,
    },
    /// Print the rating table, strongest first
    Ratings {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = EngineConfig::from_env();
    if let Some(path) = cli.ratings {
        config.ratings_path = Some(path);
    }
    if let Some(dir) = config.ratings_path.as_ref().and_then(|p| p.parent()) {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }
    }
    let engine = ForecastEngine::from_config(config);

    match cli.command {
        Commands::Project {
            request,
            interval,
            matrix,
        } => {
            let raw = fs::read_to_string(&request)
                .with_context(|| format!("read request {}", request.display()))?;
            let mut req: ProjectionRequest = serde_json::from_str(&raw)
                .with_context(|| format!("parse request {}", request.display()))?;
            req.with_interval |= interval;
            req.include_matrix |= matrix;
            let projection = engine.project_match_outcome(&req);
            println!("{}", serde_json::to_string_pretty(&projection)?);
        }
        Commands::Record {
            home_id,
            away_id,
            goals_home,
            goals_away,
            season,
        } => {
            if home_id == away_id {
                bail!("home and away team ids must differ");
            }
            let update =
                engine.record_result(home_id, away_id, goals_home, goals_away, season.as_deref());
            engine.ratings().flush()?;
            info!(
                path = ?engine.ratings().path(),
                home_id,
                away_id,
                home = update.home_rating,
                away = update.away_rating,
                "result recorded"
            );
            println!("{}", serde_json::to_string_pretty(&update)?);
        }
        Commands::Ratings { limit } => {
            let rows = engine.ratings().snapshot();
            if rows.is_empty() {
                println!("no ratings yet");
            }
            for (rank, row) in rows.iter().take(limit).enumerate() {
                println!(
                    "{:>3}. {:<28} {:>7.1}  games={:<4} season={}",
                    rank + 1,
                    if row.team_name.is_empty() {
                        format!("#{}", row.team_id)
                    } else {
                        row.team_name.clone()
                    },
                    row.rating,
                    row.games_played,
                    row.last_season.as_deref().unwrap_or("-")
                );
            }
        }
    }

    Ok(())
}
