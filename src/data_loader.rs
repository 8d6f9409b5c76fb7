//! Season corpus access: the `SeasonSource` collaborator boundary, the
//! sqlite-backed store, and the corpus validation shared by every source.
//!
//! The core makes no assumption about where records physically come from;
//! whatever ingests data upstream writes rows here (with a provenance tag),
//! and everything read back passes the same validation rules.

use std::path::Path;

use chrono::Utc;
use rusqlite::{Connection, Row, params};
use tracing::info;

use crate::error::PredictorError;
use crate::team_season::{
    PlayoffHistory, SeasonLabels, SeriesRecord, TeamSeason, division_of, normalize_team_code,
    validate_record,
};

pub trait SeasonSource {
    /// The labeled historical corpus for every configured training season.
    fn load_training(&self) -> Result<Vec<TeamSeason>, PredictorError>;
    /// The unlabeled 32-team snapshot of one season.
    fn load_current(&self, season_id: &str) -> Result<Vec<TeamSeason>, PredictorError>;
    /// Historical best-of-seven series outcomes.
    fn load_series(&self) -> Result<Vec<SeriesRecord>, PredictorError>;
}

/// Duplicate detection plus the per-record rule table, applied to any
/// training corpus regardless of its source.
pub fn validate_training(records: &[TeamSeason]) -> Result<(), PredictorError> {
    if records.is_empty() {
        return Err(PredictorError::InsufficientData {
            detail: "training corpus is empty".to_string(),
        });
    }
    let mut seen = std::collections::HashSet::new();
    for record in records {
        if !seen.insert((record.season.clone(), record.team.clone())) {
            return Err(PredictorError::IdentifierConflict {
                season: record.season.clone(),
                team: record.team.clone(),
            });
        }
        validate_record(record)?;
    }
    Ok(())
}

/// The current-season snapshot must be the complete 32-team league.
pub fn validate_current(records: &[TeamSeason], season_id: &str) -> Result<(), PredictorError> {
    if records.len() != 32 {
        return Err(PredictorError::InsufficientData {
            detail: format!(
                "current season {season_id} has {} teams, expected 32",
                records.len()
            ),
        });
    }
    let mut seen = std::collections::HashSet::new();
    for record in records {
        if record.season != season_id {
            return Err(PredictorError::malformed(
                &record.season,
                &record.team,
                format!("record does not belong to requested season {season_id}"),
            ));
        }
        if !seen.insert(record.team.clone()) {
            return Err(PredictorError::IdentifierConflict {
                season: record.season.clone(),
                team: record.team.clone(),
            });
        }
        validate_record(record)?;
    }
    Ok(())
}

/// Persistent corpus in sqlite. Schema is created on open; writes are
/// upserts keyed by (season, team).
pub struct SqliteSeasonStore {
    conn: Connection,
    training_seasons: Vec<String>,
}

impl SqliteSeasonStore {
    pub fn open(path: &Path, training_seasons: Vec<String>) -> Result<Self, PredictorError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        Ok(Self {
            conn,
            training_seasons,
        })
    }

    pub fn open_in_memory(training_seasons: Vec<String>) -> Result<Self, PredictorError> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn,
            training_seasons,
        })
    }

    pub fn upsert_team_season(
        &self,
        record: &TeamSeason,
        source: &str,
    ) -> Result<(), PredictorError> {
        let history = &record.playoff_history;
        let labels = record.labels;
        self.conn.execute(
            "INSERT INTO team_seasons (
                season, team, source,
                games_played, wins, losses, ot_losses, points, goals_for, goals_against,
                shot_attempt_pct, high_danger_pct, xg_for, xg_against,
                gsax_starter, gsax_backup, pdo, pp_pct, pk_pct,
                recent_points_pct, recent_goal_diff,
                top_scorer_ppg, scorers_forty_plus, top_line_goal_share,
                road_wins, road_losses, road_ot_losses,
                one_goal_wins, one_goal_losses, ot_wins, ot_game_losses, comebacks, blown_leads,
                app_3y, rounds_3y, finals_3y, cups_3y,
                app_5y, rounds_5y, finals_5y, cups_5y,
                qualified, reached_final, won_cup, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20,
                ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30,
                ?31, ?32, ?33, ?34, ?35, ?36, ?37, ?38, ?39, ?40,
                ?41, ?42, ?43, ?44, ?45
            )
            ON CONFLICT(season, team) DO UPDATE SET
                source = excluded.source,
                games_played = excluded.games_played,
                wins = excluded.wins,
                losses = excluded.losses,
                ot_losses = excluded.ot_losses,
                points = excluded.points,
                goals_for = excluded.goals_for,
                goals_against = excluded.goals_against,
                shot_attempt_pct = excluded.shot_attempt_pct,
                high_danger_pct = excluded.high_danger_pct,
                xg_for = excluded.xg_for,
                xg_against = excluded.xg_against,
                gsax_starter = excluded.gsax_starter,
                gsax_backup = excluded.gsax_backup,
                pdo = excluded.pdo,
                pp_pct = excluded.pp_pct,
                pk_pct = excluded.pk_pct,
                recent_points_pct = excluded.recent_points_pct,
                recent_goal_diff = excluded.recent_goal_diff,
                top_scorer_ppg = excluded.top_scorer_ppg,
                scorers_forty_plus = excluded.scorers_forty_plus,
                top_line_goal_share = excluded.top_line_goal_share,
                road_wins = excluded.road_wins,
                road_losses = excluded.road_losses,
                road_ot_losses = excluded.road_ot_losses,
                one_goal_wins = excluded.one_goal_wins,
                one_goal_losses = excluded.one_goal_losses,
                ot_wins = excluded.ot_wins,
                ot_game_losses = excluded.ot_game_losses,
                comebacks = excluded.comebacks,
                blown_leads = excluded.blown_leads,
                app_3y = excluded.app_3y,
                rounds_3y = excluded.rounds_3y,
                finals_3y = excluded.finals_3y,
                cups_3y = excluded.cups_3y,
                app_5y = excluded.app_5y,
                rounds_5y = excluded.rounds_5y,
                finals_5y = excluded.finals_5y,
                cups_5y = excluded.cups_5y,
                qualified = excluded.qualified,
                reached_final = excluded.reached_final,
                won_cup = excluded.won_cup,
                updated_at = excluded.updated_at",
            params![
                record.season,
                normalize_team_code(&record.team),
                source,
                record.games_played,
                record.wins,
                record.losses,
                record.ot_losses,
                record.points,
                record.goals_for,
                record.goals_against,
                record.shot_attempt_pct,
                record.high_danger_pct,
                record.xg_for,
                record.xg_against,
                record.gsax_starter,
                record.gsax_backup,
                record.pdo,
                record.pp_pct,
                record.pk_pct,
                record.recent_points_pct,
                record.recent_goal_diff,
                record.top_scorer_ppg,
                record.scorers_forty_plus,
                record.top_line_goal_share,
                record.road_wins,
                record.road_losses,
                record.road_ot_losses,
                record.one_goal_wins,
                record.one_goal_losses,
                record.ot_wins,
                record.ot_game_losses,
                record.comebacks,
                record.blown_leads,
                history.appearances_3y,
                history.rounds_won_3y,
                history.finals_3y,
                history.cups_3y,
                history.appearances_5y,
                history.rounds_won_5y,
                history.finals_5y,
                history.cups_5y,
                labels.map(|l| l.qualified),
                labels.map(|l| l.reached_final),
                labels.map(|l| l.won_cup),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn upsert_series(&self, record: &SeriesRecord) -> Result<(), PredictorError> {
        self.conn.execute(
            "INSERT INTO series (season, round, higher_seed, lower_seed, higher_seed_won)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(season, round, higher_seed, lower_seed)
             DO UPDATE SET higher_seed_won = excluded.higher_seed_won",
            params![
                record.season,
                record.round,
                normalize_team_code(&record.higher_seed),
                normalize_team_code(&record.lower_seed),
                record.higher_seed_won,
            ],
        )?;
        Ok(())
    }

    fn load_season(&self, season: &str) -> Result<Vec<TeamSeason>, PredictorError> {
        let mut stmt = self.conn.prepare(
            "SELECT season, team,
                    games_played, wins, losses, ot_losses, points, goals_for, goals_against,
                    shot_attempt_pct, high_danger_pct, xg_for, xg_against,
                    gsax_starter, gsax_backup, pdo, pp_pct, pk_pct,
                    recent_points_pct, recent_goal_diff,
                    top_scorer_ppg, scorers_forty_plus, top_line_goal_share,
                    road_wins, road_losses, road_ot_losses,
                    one_goal_wins, one_goal_losses, ot_wins, ot_game_losses, comebacks, blown_leads,
                    app_3y, rounds_3y, finals_3y, cups_3y,
                    app_5y, rounds_5y, finals_5y, cups_5y,
                    qualified, reached_final, won_cup
             FROM team_seasons WHERE season = ?1 ORDER BY team",
        )?;
        let rows = stmt.query_map(params![season], row_to_team)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

impl SeasonSource for SqliteSeasonStore {
    fn load_training(&self) -> Result<Vec<TeamSeason>, PredictorError> {
        let mut out = Vec::new();
        for season in &self.training_seasons {
            let rows = self.load_season(season)?;
            if rows.is_empty() {
                return Err(PredictorError::MissingData {
                    season: season.clone(),
                });
            }
            out.extend(rows);
        }
        validate_training(&out)?;
        info!(
            seasons = self.training_seasons.len(),
            records = out.len(),
            "training corpus loaded"
        );
        Ok(out)
    }

    fn load_current(&self, season_id: &str) -> Result<Vec<TeamSeason>, PredictorError> {
        let rows = self.load_season(season_id)?;
        validate_current(&rows, season_id)?;
        Ok(rows)
    }

    fn load_series(&self) -> Result<Vec<SeriesRecord>, PredictorError> {
        let mut stmt = self.conn.prepare(
            "SELECT season, round, higher_seed, lower_seed, higher_seed_won
             FROM series ORDER BY season, round, higher_seed",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(SeriesRecord {
                season: row.get(0)?,
                round: row.get(1)?,
                higher_seed: row.get(2)?,
                lower_seed: row.get(3)?,
                higher_seed_won: row.get(4)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn init_schema(conn: &Connection) -> Result<(), PredictorError> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS team_seasons (
            season TEXT NOT NULL,
            team TEXT NOT NULL,
            source TEXT NOT NULL,
            games_played INTEGER NOT NULL,
            wins INTEGER NOT NULL,
            losses INTEGER NOT NULL,
            ot_losses INTEGER NOT NULL,
            points INTEGER NOT NULL,
            goals_for INTEGER NOT NULL,
            goals_against INTEGER NOT NULL,
            shot_attempt_pct REAL NULL,
            high_danger_pct REAL NULL,
            xg_for REAL NULL,
            xg_against REAL NULL,
            gsax_starter REAL NULL,
            gsax_backup REAL NULL,
            pdo REAL NULL,
            pp_pct REAL NOT NULL,
            pk_pct REAL NOT NULL,
            recent_points_pct REAL NOT NULL,
            recent_goal_diff REAL NOT NULL,
            top_scorer_ppg REAL NOT NULL,
            scorers_forty_plus INTEGER NOT NULL,
            top_line_goal_share REAL NOT NULL,
            road_wins INTEGER NOT NULL,
            road_losses INTEGER NOT NULL,
            road_ot_losses INTEGER NOT NULL,
            one_goal_wins INTEGER NOT NULL,
            one_goal_losses INTEGER NOT NULL,
            ot_wins INTEGER NOT NULL,
            ot_game_losses INTEGER NOT NULL,
            comebacks INTEGER NOT NULL,
            blown_leads INTEGER NOT NULL,
            app_3y INTEGER NOT NULL,
            rounds_3y INTEGER NOT NULL,
            finals_3y INTEGER NOT NULL,
            cups_3y INTEGER NOT NULL,
            app_5y INTEGER NOT NULL,
            rounds_5y INTEGER NOT NULL,
            finals_5y INTEGER NOT NULL,
            cups_5y INTEGER NOT NULL,
            qualified INTEGER NULL,
            reached_final INTEGER NULL,
            won_cup INTEGER NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (season, team)
        );
        CREATE INDEX IF NOT EXISTS idx_team_seasons_season ON team_seasons(season);

        CREATE TABLE IF NOT EXISTS series (
            season TEXT NOT NULL,
            round INTEGER NOT NULL,
            higher_seed TEXT NOT NULL,
            lower_seed TEXT NOT NULL,
            higher_seed_won INTEGER NOT NULL,
            PRIMARY KEY (season, round, higher_seed, lower_seed)
        );
        "#,
    )?;
    Ok(())
}

fn row_to_team(row: &Row<'_>) -> rusqlite::Result<TeamSeason> {
    let team_raw: String = row.get(1)?;
    let team = normalize_team_code(&team_raw);
    // Alignment errors surface later in validation, where they carry
    // context; fall back here so loading itself never panics.
    let division = division_of(&team).unwrap_or(crate::team_season::Division::Atlantic);

    let qualified: Option<bool> = row.get(40)?;
    let labels = qualified.map(|qualified| SeasonLabels {
        qualified,
        reached_final: row.get::<_, Option<bool>>(41).ok().flatten().unwrap_or(false),
        won_cup: row.get::<_, Option<bool>>(42).ok().flatten().unwrap_or(false),
    });

    Ok(TeamSeason {
        season: row.get(0)?,
        team,
        conference: division.conference(),
        division,
        games_played: row.get(2)?,
        wins: row.get(3)?,
        losses: row.get(4)?,
        ot_losses: row.get(5)?,
        points: row.get(6)?,
        goals_for: row.get(7)?,
        goals_against: row.get(8)?,
        shot_attempt_pct: row.get(9)?,
        high_danger_pct: row.get(10)?,
        xg_for: row.get(11)?,
        xg_against: row.get(12)?,
        gsax_starter: row.get(13)?,
        gsax_backup: row.get(14)?,
        pdo: row.get(15)?,
        pp_pct: row.get(16)?,
        pk_pct: row.get(17)?,
        recent_points_pct: row.get(18)?,
        recent_goal_diff: row.get(19)?,
        top_scorer_ppg: row.get(20)?,
        scorers_forty_plus: row.get(21)?,
        top_line_goal_share: row.get(22)?,
        road_wins: row.get(23)?,
        road_losses: row.get(24)?,
        road_ot_losses: row.get(25)?,
        one_goal_wins: row.get(26)?,
        one_goal_losses: row.get(27)?,
        ot_wins: row.get(28)?,
        ot_game_losses: row.get(29)?,
        comebacks: row.get(30)?,
        blown_leads: row.get(31)?,
        playoff_history: PlayoffHistory {
            appearances_3y: row.get(32)?,
            rounds_won_3y: row.get(33)?,
            finals_3y: row.get(34)?,
            cups_3y: row.get(35)?,
            appearances_5y: row.get(36)?,
            rounds_won_5y: row.get(37)?,
            finals_5y: row.get(38)?,
            cups_5y: row.get(39)?,
        },
        labels,
    })
}

/// In-memory source for tests and synthetic scenarios.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    pub training: Vec<TeamSeason>,
    pub current: Vec<TeamSeason>,
    pub series: Vec<SeriesRecord>,
}

impl SeasonSource for MemorySource {
    fn load_training(&self) -> Result<Vec<TeamSeason>, PredictorError> {
        validate_training(&self.training)?;
        Ok(self.training.clone())
    }

    fn load_current(&self, season_id: &str) -> Result<Vec<TeamSeason>, PredictorError> {
        let rows: Vec<TeamSeason> = self
            .current
            .iter()
            .filter(|t| t.season == season_id)
            .cloned()
            .collect();
        validate_current(&rows, season_id)?;
        Ok(rows)
    }

    fn load_series(&self) -> Result<Vec<SeriesRecord>, PredictorError> {
        Ok(self.series.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{baseline_team, spread_corpus};

    #[test]
    fn sqlite_round_trip_preserves_records() {
        let store =
            SqliteSeasonStore::open_in_memory(vec!["2023-2024".to_string()]).unwrap();
        let mut t = baseline_team("BOS", "2023-2024");
        t.labels = Some(SeasonLabels {
            qualified: true,
            reached_final: false,
            won_cup: false,
        });
        t.gsax_backup = None;
        store.upsert_team_season(&t, "unit-test").unwrap();

        let loaded = store.load_season("2023-2024").unwrap();
        assert_eq!(loaded.len(), 1);
        let back = &loaded[0];
        assert_eq!(back.team, "BOS");
        assert_eq!(back.points, t.points);
        assert_eq!(back.gsax_backup, None);
        assert_eq!(back.labels, t.labels);
    }

    #[test]
    fn missing_training_season_is_reported() {
        let store = SqliteSeasonStore::open_in_memory(vec![
            "2022-2023".to_string(),
            "2023-2024".to_string(),
        ])
        .unwrap();
        for t in spread_corpus(1) {
            // spread_corpus starts at 2015; store it under 2022-2023.
            let mut t = t;
            t.season = "2022-2023".to_string();
            store.upsert_team_season(&t, "unit-test").unwrap();
        }
        let err = store.load_training().unwrap_err();
        assert!(matches!(err, PredictorError::MissingData { season } if season == "2023-2024"));
    }

    #[test]
    fn upsert_replaces_instead_of_conflicting() {
        let store =
            SqliteSeasonStore::open_in_memory(vec!["2023-2024".to_string()]).unwrap();
        let mut t = baseline_team("CAR", "2023-2024");
        store.upsert_team_season(&t, "first").unwrap();
        t.points = 100;
        t.wins = 45;
        t.losses = 27;
        store.upsert_team_season(&t, "second").unwrap();
        let loaded = store.load_season("2023-2024").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].points, 100);
    }

    #[test]
    fn series_round_trip_normalizes_codes() {
        let store = SqliteSeasonStore::open_in_memory(Vec::new()).unwrap();
        store
            .upsert_series(&SeriesRecord {
                season: "2023-2024".to_string(),
                round: 2,
                higher_seed: "T.B".to_string(),
                lower_seed: "bos".to_string(),
                higher_seed_won: false,
            })
            .unwrap();
        let series = store.load_series().unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].higher_seed, "TBL");
        assert_eq!(series[0].lower_seed, "BOS");
    }

    #[test]
    fn duplicate_codes_in_memory_source_conflict() {
        let mut source = MemorySource::default();
        source.training = vec![
            baseline_team("BOS", "2023-2024"),
            baseline_team("BOS", "2023-2024"),
        ];
        let err = source.load_training().unwrap_err();
        assert!(matches!(err, PredictorError::IdentifierConflict { .. }));
    }

    #[test]
    fn current_snapshot_must_be_complete() {
        let source = MemorySource {
            current: vec![baseline_team("BOS", "2024-2025")],
            ..Default::default()
        };
        assert!(source.load_current("2024-2025").is_err());
    }
}
