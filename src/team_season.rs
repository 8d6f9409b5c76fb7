use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::PredictorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Conference {
    Eastern,
    Western,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Division {
    Atlantic,
    Metropolitan,
    Central,
    Pacific,
}

impl Division {
    pub fn conference(self) -> Conference {
        match self {
            Division::Atlantic | Division::Metropolitan => Conference::Eastern,
            Division::Central | Division::Pacific => Conference::Western,
        }
    }
}

/// Post-season outcome labels, populated for historical seasons only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonLabels {
    pub qualified: bool,
    pub reached_final: bool,
    pub won_cup: bool,
}

/// Rolling playoff history entering the season.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayoffHistory {
    pub appearances_3y: u32,
    pub rounds_won_3y: u32,
    pub finals_3y: u32,
    pub cups_3y: u32,
    pub appearances_5y: u32,
    pub rounds_won_5y: u32,
    pub finals_5y: u32,
    pub cups_5y: u32,
}

/// One team's record at one point in one season. Created by the data layer
/// and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamSeason {
    pub team: String,
    pub season: String,
    pub conference: Conference,
    pub division: Division,

    pub games_played: u32,
    pub wins: u32,
    pub losses: u32,
    pub ot_losses: u32,
    pub points: u32,
    pub goals_for: u32,
    pub goals_against: u32,

    // Advanced metrics. Sources occasionally omit these for early-season
    // snapshots, hence Option: the feature builder imputes medians.
    pub shot_attempt_pct: Option<f64>,
    pub high_danger_pct: Option<f64>,
    pub xg_for: Option<f64>,
    pub xg_against: Option<f64>,
    pub gsax_starter: Option<f64>,
    pub gsax_backup: Option<f64>,
    /// Shooting% + save% sum ("the sustainability number"), around 100.
    pub pdo: Option<f64>,

    pub pp_pct: f64,
    pub pk_pct: f64,

    /// Points fraction over the configured recent window, in [0, 1].
    pub recent_points_pct: f64,
    pub recent_goal_diff: f64,

    pub top_scorer_ppg: f64,
    pub scorers_forty_plus: u32,
    /// Share of team goals produced by the top line, in [0, 1].
    pub top_line_goal_share: f64,

    pub road_wins: u32,
    pub road_losses: u32,
    pub road_ot_losses: u32,

    pub one_goal_wins: u32,
    pub one_goal_losses: u32,
    pub ot_wins: u32,
    pub ot_game_losses: u32,
    pub comebacks: u32,
    pub blown_leads: u32,

    pub playoff_history: PlayoffHistory,
    pub labels: Option<SeasonLabels>,
}

impl TeamSeason {
    pub fn points_pct(&self) -> f64 {
        if self.games_played == 0 {
            return 0.0;
        }
        self.points as f64 / (2.0 * self.games_played as f64)
    }

    pub fn road_games(&self) -> u32 {
        self.road_wins + self.road_losses + self.road_ot_losses
    }

    pub fn road_points_pct(&self) -> f64 {
        let games = self.road_games();
        if games == 0 {
            return 0.0;
        }
        (2 * self.road_wins + self.road_ot_losses) as f64 / (2.0 * games as f64)
    }

    pub fn home_points_pct(&self) -> f64 {
        let games = self.games_played.saturating_sub(self.road_games());
        if games == 0 {
            return 0.0;
        }
        let home_points = self
            .points
            .saturating_sub(2 * self.road_wins + self.road_ot_losses);
        home_points as f64 / (2.0 * games as f64)
    }
}

/// One historical best-of-seven series, keyed by the contemporary team codes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub season: String,
    /// 1 = first round .. 4 = championship final.
    pub round: u8,
    pub higher_seed: String,
    pub lower_seed: String,
    pub higher_seed_won: bool,
}

/// Contemporary three-letter codes, grouped by division.
pub const ATLANTIC: [&str; 8] = ["BOS", "BUF", "DET", "FLA", "MTL", "OTT", "TBL", "TOR"];
pub const METROPOLITAN: [&str; 8] = ["CAR", "CBJ", "NJD", "NYI", "NYR", "PHI", "PIT", "WSH"];
pub const CENTRAL: [&str; 8] = ["CHI", "COL", "DAL", "MIN", "NSH", "STL", "UTA", "WPG"];
pub const PACIFIC: [&str; 8] = ["ANA", "CGY", "EDM", "LAK", "SEA", "SJS", "VAN", "VGK"];

static ALIGNMENT: Lazy<HashMap<&'static str, Division>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for code in ATLANTIC {
        map.insert(code, Division::Atlantic);
    }
    for code in METROPOLITAN {
        map.insert(code, Division::Metropolitan);
    }
    for code in CENTRAL {
        map.insert(code, Division::Central);
    }
    for code in PACIFIC {
        map.insert(code, Division::Pacific);
    }
    map
});

// Alternate spellings seen in raw feeds, plus franchise moves mapped to the
// contemporary code.
static ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("TB", "TBL"),
        ("LA", "LAK"),
        ("NJ", "NJD"),
        ("SJ", "SJS"),
        ("MON", "MTL"),
        ("WSG", "WSH"),
        ("CLB", "CBJ"),
        ("VEG", "VGK"),
        // Franchise relocations.
        ("ARI", "UTA"),
        ("PHX", "UTA"),
        ("ATL", "WPG"),
    ])
});

/// Canonical code for a raw team label: uppercase, punctuation stripped,
/// aliases and relocated franchises resolved.
pub fn normalize_team_code(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    match ALIASES.get(cleaned.as_str()) {
        Some(canon) => (*canon).to_string(),
        None => cleaned,
    }
}

pub fn division_of(code: &str) -> Option<Division> {
    ALIGNMENT.get(code).copied()
}

pub fn league_team_count() -> usize {
    ALIGNMENT.len()
}

/// First four-digit year in a season id like "2023-2024" or "20232024".
pub fn season_start_year(season: &str) -> Option<i32> {
    let mut buf = String::new();
    for ch in season.chars() {
        if ch.is_ascii_digit() {
            buf.push(ch);
            if buf.len() == 4 {
                return buf.parse::<i32>().ok();
            }
        } else if !buf.is_empty() {
            break;
        }
    }
    None
}

struct MetricRule {
    name: &'static str,
    get: fn(&TeamSeason) -> Option<f64>,
    lo: f64,
    hi: f64,
}

// Plausible bounds per metric; anything outside is flagged as malformed
// rather than quietly clamped.
const METRIC_RULES: &[MetricRule] = &[
    MetricRule {
        name: "games_played",
        get: |t| Some(t.games_played as f64),
        lo: 1.0,
        hi: 82.0,
    },
    MetricRule {
        name: "points",
        get: |t| Some(t.points as f64),
        lo: 0.0,
        hi: 164.0,
    },
    MetricRule {
        name: "goals_for",
        get: |t| Some(t.goals_for as f64),
        lo: 0.0,
        hi: 450.0,
    },
    MetricRule {
        name: "goals_against",
        get: |t| Some(t.goals_against as f64),
        lo: 0.0,
        hi: 450.0,
    },
    MetricRule {
        name: "shot_attempt_pct",
        get: |t| t.shot_attempt_pct,
        lo: 30.0,
        hi: 70.0,
    },
    MetricRule {
        name: "high_danger_pct",
        get: |t| t.high_danger_pct,
        lo: 30.0,
        hi: 70.0,
    },
    MetricRule {
        name: "xg_for",
        get: |t| t.xg_for,
        lo: 0.0,
        hi: 400.0,
    },
    MetricRule {
        name: "xg_against",
        get: |t| t.xg_against,
        lo: 0.0,
        hi: 400.0,
    },
    MetricRule {
        name: "gsax_starter",
        get: |t| t.gsax_starter,
        lo: -60.0,
        hi: 60.0,
    },
    MetricRule {
        name: "gsax_backup",
        get: |t| t.gsax_backup,
        lo: -60.0,
        hi: 60.0,
    },
    MetricRule {
        name: "pdo",
        get: |t| t.pdo,
        lo: 90.0,
        hi: 110.0,
    },
    MetricRule {
        name: "pp_pct",
        get: |t| Some(t.pp_pct),
        lo: 0.0,
        hi: 45.0,
    },
    MetricRule {
        name: "pk_pct",
        get: |t| Some(t.pk_pct),
        lo: 55.0,
        hi: 100.0,
    },
    MetricRule {
        name: "recent_points_pct",
        get: |t| Some(t.recent_points_pct),
        lo: 0.0,
        hi: 1.0,
    },
    MetricRule {
        name: "recent_goal_diff",
        get: |t| Some(t.recent_goal_diff),
        lo: -60.0,
        hi: 60.0,
    },
    MetricRule {
        name: "top_scorer_ppg",
        get: |t| Some(t.top_scorer_ppg),
        lo: 0.0,
        hi: 3.5,
    },
    MetricRule {
        name: "top_line_goal_share",
        get: |t| Some(t.top_line_goal_share),
        lo: 0.0,
        hi: 1.0,
    },
];

/// Validate one record against the rule table and basic self-consistency.
pub fn validate_record(t: &TeamSeason) -> Result<(), PredictorError> {
    if division_of(&t.team).is_none() {
        return Err(PredictorError::malformed(
            &t.season,
            &t.team,
            "unknown team code",
        ));
    }
    if Some(t.division) != division_of(&t.team) {
        return Err(PredictorError::malformed(
            &t.season,
            &t.team,
            format!("division {:?} does not match league alignment", t.division),
        ));
    }
    if t.wins + t.losses + t.ot_losses != t.games_played {
        return Err(PredictorError::malformed(
            &t.season,
            &t.team,
            format!(
                "record {}-{}-{} does not sum to {} games",
                t.wins, t.losses, t.ot_losses, t.games_played
            ),
        ));
    }
    if t.points > 2 * t.games_played {
        return Err(PredictorError::malformed(
            &t.season,
            &t.team,
            "points exceed two per game",
        ));
    }
    if t.road_games() > t.games_played {
        return Err(PredictorError::malformed(
            &t.season,
            &t.team,
            "road games exceed games played",
        ));
    }
    for rule in METRIC_RULES {
        let Some(value) = (rule.get)(t) else {
            continue;
        };
        if !value.is_finite() {
            return Err(PredictorError::malformed(
                &t.season,
                &t.team,
                format!("{} is not finite", rule.name),
            ));
        }
        if value < rule.lo || value > rule.hi {
            return Err(PredictorError::malformed(
                &t.season,
                &t.team,
                format!(
                    "{} = {value} outside plausible range [{}, {}]",
                    rule.name, rule.lo, rule.hi
                ),
            ));
        }
    }
    Ok(())
}
