use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::Utc;
use parquet::data_type::{ByteArray, ByteArrayType, DoubleType, Int64Type};
use parquet::file::properties::WriterProperties;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::file::writer::SerializedFileWriter;
use parquet::record::RowAccessor;
use parquet::schema::parser::parse_message_type;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::elo::{self, DEFAULT_RATING, FinishedResult, RatingUpdate};

const RATINGS_SCHEMA: &str = "
message team_ratings {
    REQUIRED INT64 team_id;
    REQUIRED BYTE_ARRAY team_name (UTF8);
    REQUIRED DOUBLE rating;
    REQUIRED INT64 games_played;
    OPTIONAL BYTE_ARRAY last_season (UTF8);
    REQUIRED INT64 updated_at;
}
";
const RATINGS_COLUMNS: usize = 6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamRating {
    pub team_id: u32,
    pub team_name: String,
    pub rating: f64,
    pub games_played: u32,
    pub last_season: Option<String>,
    // Unix millis.
    pub updated_at: i64,
}

impl TeamRating {
    fn fresh(team_id: u32, name: Option<&str>, rating: f64) -> Self {
        Self {
            team_id,
            team_name: name.map(str::to_string).unwrap_or_default(),
            rating,
            games_played: 0,
            last_season: None,
            updated_at: Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RatingTableError {
    #[error("rating table has {found} columns, expected {expected}")]
    SchemaMismatch { found: usize, expected: usize },
    #[error("row {row} is missing column {column}")]
    MissingColumn { row: usize, column: &'static str },
    #[error("team {team_id} has a non-finite rating")]
    NonFinite { team_id: u32 },
}

/// Durable Elo table, one row per team.
///
/// Opened once and shared by reference; every mutation rewrites the backing file while the
/// table lock is held, so concurrent updates within a process never lose writes.
#[derive(Debug)]
pub struct RatingStore {
    path: Option<PathBuf>,
    table: Mutex<BTreeMap<u32, TeamRating>>,
}

impl RatingStore {
    /// Opens the table at `path`. A missing or unreadable file yields an empty table.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let table = if path.exists() {
            match read_table(&path) {
                Ok(rows) => {
                    info!(path = %path.display(), teams = rows.len(), "rating table loaded");
                    rows
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        "rating table unreadable, starting empty: {err:#}"
                    );
                    BTreeMap::new()
                }
            }
        } else {
            debug!(path = %path.display(), "no rating table yet");
            BTreeMap::new()
        };
        Self {
            path: Some(path),
            table: Mutex::new(table),
        }
    }

    /// Table that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            table: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get_rating(&self, team_id: u32, name: Option<&str>, default: f64) -> f64 {
        self.get_team_rating_or(team_id, name, default).rating
    }

    pub fn get_team_rating(&self, team_id: u32, name: Option<&str>) -> TeamRating {
        self.get_team_rating_or(team_id, name, DEFAULT_RATING)
    }

    fn get_team_rating_or(&self, team_id: u32, name: Option<&str>, default: f64) -> TeamRating {
        let default = if default.is_finite() {
            default
        } else {
            DEFAULT_RATING
        };
        let mut table = self.lock();
        if let Some(row) = table.get(&team_id) {
            return row.clone();
        }
        let row = TeamRating::fresh(team_id, name, default);
        table.insert(team_id, row.clone());
        debug!(team_id, rating = default, "materialized unseen team");
        self.persist_locked(&table);
        row
    }

    pub fn contains(&self, team_id: u32) -> bool {
        self.lock().contains_key(&team_id)
    }

    pub fn update_match(
        &self,
        home_id: u32,
        away_id: u32,
        goals_home: u8,
        goals_away: u8,
        season: Option<&str>,
        k_factor: f64,
    ) -> RatingUpdate {
        let mut table = self.lock();
        let home = table
            .get(&home_id)
            .map(|r| r.rating)
            .unwrap_or(DEFAULT_RATING);
        let away = table
            .get(&away_id)
            .map(|r| r.rating)
            .unwrap_or(DEFAULT_RATING);

        let mut update = elo::rate_match(home, away, goals_home, goals_away, k_factor);
        if !update.home_rating.is_finite() || !update.away_rating.is_finite() {
            warn!(home_id, away_id, "non-finite rating update discarded");
            update.home_rating = home;
            update.away_rating = away;
            update.delta_home = 0.0;
            update.delta_away = 0.0;
        }

        let now = Utc::now().timestamp_millis();
        for (team_id, rating) in [(home_id, update.home_rating), (away_id, update.away_rating)] {
            let row = table
                .entry(team_id)
                .or_insert_with(|| TeamRating::fresh(team_id, None, DEFAULT_RATING));
            row.rating = rating;
            row.games_played = row.games_played.saturating_add(1);
            if let Some(season) = season {
                row.last_season = Some(season.to_string());
            }
            row.updated_at = now;
        }

        debug!(
            home_id,
            away_id,
            goals_home,
            goals_away,
            delta_home = update.delta_home,
            "ratings updated"
        );
        self.persist_locked(&table);
        update
    }

    /// Applies finished results in kickoff order and persists once at the end.
    pub fn replay_results(&self, results: &[FinishedResult], k_factor: f64) -> usize {
        let mut table = self.lock();
        let initial: HashMap<u32, f64> = table.iter().map(|(id, r)| (*id, r.rating)).collect();
        let replayed = elo::replay_ratings(&initial, results, k_factor);

        let mut games: HashMap<u32, u32> = HashMap::new();
        let mut seasons: HashMap<u32, &str> = HashMap::new();
        for m in results {
            *games.entry(m.home_id).or_default() += 1;
            *games.entry(m.away_id).or_default() += 1;
            if let Some(season) = m.season.as_deref() {
                seasons.insert(m.home_id, season);
                seasons.insert(m.away_id, season);
            }
        }

        let now = Utc::now().timestamp_millis();
        for (team_id, rating) in replayed {
            if !rating.is_finite() {
                continue;
            }
            let row = table
                .entry(team_id)
                .or_insert_with(|| TeamRating::fresh(team_id, None, DEFAULT_RATING));
            row.rating = rating;
            row.games_played = row
                .games_played
                .saturating_add(games.get(&team_id).copied().unwrap_or(0));
            if let Some(season) = seasons.get(&team_id) {
                row.last_season = Some((*season).to_string());
            }
            row.updated_at = now;
        }
        self.persist_locked(&table);
        results.len()
    }

    /// All rows, strongest first.
    pub fn snapshot(&self) -> Vec<TeamRating> {
        let mut rows: Vec<TeamRating> = self.lock().values().cloned().collect();
        rows.sort_by(|a, b| b.rating.total_cmp(&a.rating).then(a.team_id.cmp(&b.team_id)));
        rows
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn flush(&self) -> Result<()> {
        let table = self.lock();
        match self.path.as_deref() {
            Some(path) => write_table(path, &table),
            None => Ok(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u32, TeamRating>> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist_locked(&self, table: &BTreeMap<u32, TeamRating>) {
        let Some(path) = self.path.as_deref() else {
            return;
        };
        if let Err(err) = write_table(path, table) {
            warn!(path = %path.display(), "rating table write failed: {err:#}");
        }
    }
}

impl Drop for RatingStore {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            warn!("rating table flush on close failed: {err:#}");
        }
    }
}

fn read_table(path: &Path) -> Result<BTreeMap<u32, TeamRating>> {
    let file = fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let reader = SerializedFileReader::new(file).context("open parquet reader ratings")?;
    let columns = reader.metadata().file_metadata().schema_descr().num_columns();
    if columns != RATINGS_COLUMNS {
        return Err(RatingTableError::SchemaMismatch {
            found: columns,
            expected: RATINGS_COLUMNS,
        }
        .into());
    }

    let mut out = BTreeMap::new();
    let iter = reader.get_row_iter(None).context("iterate rating rows")?;
    for (idx, row) in iter.enumerate() {
        let row = row.with_context(|| format!("decode rating row {idx}"))?;
        let team_id = row
            .get_long(0)
            .map_err(|_| RatingTableError::MissingColumn {
                row: idx,
                column: "team_id",
            })?;
        let Ok(team_id) = u32::try_from(team_id) else {
            continue;
        };
        let rating = row
            .get_double(2)
            .map_err(|_| RatingTableError::MissingColumn {
                row: idx,
                column: "rating",
            })?;
        if !rating.is_finite() {
            return Err(RatingTableError::NonFinite { team_id }.into());
        }
        let team_name = row
            .get_string(1)
            .ok()
            .map(|s| s.to_string())
            .unwrap_or_default();
        let games_played = row
            .get_long(3)
            .ok()
            .and_then(|g| u32::try_from(g).ok())
            .unwrap_or(0);
        let last_season = row.get_string(4).ok().map(|s| s.to_string());
        let updated_at = row.get_long(5).unwrap_or(0);

        out.insert(
            team_id,
            TeamRating {
                team_id,
                team_name,
                rating,
                games_played,
                last_season,
                updated_at,
            },
        );
    }
    Ok(out)
}

fn write_table(path: &Path, table: &BTreeMap<u32, TeamRating>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).ok();
    }
    let schema = Arc::new(parse_message_type(RATINGS_SCHEMA).context("parse ratings schema")?);
    let props = Arc::new(WriterProperties::builder().build());
    let tmp = path.with_extension("parquet.tmp");
    let file = fs::File::create(&tmp).with_context(|| format!("create {}", tmp.display()))?;
    let mut writer =
        SerializedFileWriter::new(file, schema, props).context("open parquet writer ratings")?;

    if !table.is_empty() {
        let rows: Vec<&TeamRating> = table.values().collect();
        let ids: Vec<i64> = rows.iter().map(|r| r.team_id as i64).collect();
        let names: Vec<ByteArray> = rows
            .iter()
            .map(|r| ByteArray::from(r.team_name.as_str()))
            .collect();
        let ratings: Vec<f64> = rows.iter().map(|r| r.rating).collect();
        let games: Vec<i64> = rows.iter().map(|r| r.games_played as i64).collect();
        let seasons: Vec<ByteArray> = rows
            .iter()
            .filter_map(|r| r.last_season.as_deref().map(ByteArray::from))
            .collect();
        let season_levels: Vec<i16> = rows
            .iter()
            .map(|r| i16::from(r.last_season.is_some()))
            .collect();
        let updated: Vec<i64> = rows.iter().map(|r| r.updated_at).collect();

        let mut row_group = writer.next_row_group().context("start rating row group")?;
        let mut col_idx = 0usize;
        while let Some(mut column) = row_group.next_column().context("next rating column")? {
            match col_idx {
                0 => {
                    column.typed::<Int64Type>().write_batch(&ids, None, None)?;
                }
                1 => {
                    column
                        .typed::<ByteArrayType>()
                        .write_batch(&names, None, None)?;
                }
                2 => {
                    column
                        .typed::<DoubleType>()
                        .write_batch(&ratings, None, None)?;
                }
                3 => {
                    column.typed::<Int64Type>().write_batch(&games, None, None)?;
                }
                4 => {
                    column.typed::<ByteArrayType>().write_batch(
                        &seasons,
                        Some(&season_levels),
                        None,
                    )?;
                }
                _ => {
                    column
                        .typed::<Int64Type>()
                        .write_batch(&updated, None, None)?;
                }
            }
            column.close().context("close rating column")?;
            col_idx += 1;
        }
        row_group.close().context("close rating row group")?;
    }
    writer.close().context("finish rating table")?;
    fs::rename(&tmp, path).context("swap rating table")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_store_materializes_default() {
        let store = RatingStore::in_memory();
        assert!(!store.contains(7));
        assert_eq!(store.get_rating(7, Some("Seven"), DEFAULT_RATING), 1500.0);
        assert!(store.contains(7));
        assert_eq!(store.get_team_rating(7, None).team_name, "Seven");
    }

    #[test]
    fn non_finite_default_falls_back() {
        let store = RatingStore::in_memory();
        assert_eq!(store.get_rating(1, None, f64::NAN), DEFAULT_RATING);
    }

    #[test]
    fn update_counts_games_and_season() {
        let store = RatingStore::in_memory();
        let u = store.update_match(1, 2, 3, 0, Some("2024/2025"), 20.0);
        assert!(u.delta_home > 0.0);
        let home = store.get_team_rating(1, None);
        assert_eq!(home.games_played, 1);
        assert_eq!(home.last_season.as_deref(), Some("2024/2025"));
        assert!((home.rating - (1500.0 + 24.0 * 0.5)).abs() < 1e-9);
    }

    #[test]
    fn snapshot_sorts_strongest_first() {
        let store = RatingStore::in_memory();
        store.update_match(1, 2, 0, 2, None, 20.0);
        let rows = store.snapshot();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].team_id, 2);
    }
}
