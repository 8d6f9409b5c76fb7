//! Shared synthetic league builders for the end-to-end scenarios.
#![allow(dead_code)]

use puckcast::team_season::{
    ATLANTIC, CENTRAL, METROPOLITAN, PACIFIC, PlayoffHistory, SeasonLabels, TeamSeason,
    division_of,
};

pub fn league_codes() -> Vec<&'static str> {
    ATLANTIC
        .iter()
        .chain(METROPOLITAN.iter())
        .chain(CENTRAL.iter())
        .chain(PACIFIC.iter())
        .copied()
        .collect()
}

/// A neutral, self-consistent 82-game record: every team identical.
pub fn neutral_team(code: &str, season: &str) -> TeamSeason {
    let division = division_of(code).expect("league code");
    TeamSeason {
        team: code.to_string(),
        season: season.to_string(),
        conference: division.conference(),
        division,
        games_played: 82,
        wins: 41,
        losses: 33,
        ot_losses: 8,
        points: 90,
        goals_for: 241,
        goals_against: 241,
        shot_attempt_pct: Some(50.0),
        high_danger_pct: Some(50.0),
        xg_for: Some(241.0),
        xg_against: Some(241.0),
        gsax_starter: Some(0.0),
        gsax_backup: Some(0.0),
        pdo: Some(100.0),
        pp_pct: 20.0,
        pk_pct: 80.0,
        recent_points_pct: 0.5,
        recent_goal_diff: 0.0,
        top_scorer_ppg: 1.0,
        scorers_forty_plus: 4,
        top_line_goal_share: 0.45,
        road_wins: 20,
        road_losses: 17,
        road_ot_losses: 4,
        one_goal_wins: 10,
        one_goal_losses: 10,
        ot_wins: 5,
        ot_game_losses: 5,
        comebacks: 15,
        blown_leads: 15,
        playoff_history: PlayoffHistory::default(),
        labels: None,
    }
}

pub fn labels(qualified: bool, reached_final: bool, won_cup: bool) -> Option<SeasonLabels> {
    Some(SeasonLabels {
        qualified,
        reached_final,
        won_cup,
    })
}

/// Scenario A corpus: one dominant team (+1 goal/game, wins every cup),
/// everyone else dead even and out of the playoffs.
pub fn separable_corpus(strong: &str, n_seasons: u32) -> Vec<TeamSeason> {
    let mut out = Vec::new();
    for s in 0..n_seasons {
        let season = format!("{}-{}", 2018 + s, 2019 + s);
        for code in league_codes() {
            let mut t = neutral_team(code, &season);
            if code == strong {
                t.goals_for = 282;
                t.goals_against = 200;
                t.labels = labels(true, true, true);
            } else {
                t.labels = labels(false, false, false);
            }
            out.push(t);
        }
    }
    out
}

/// Scenario B corpus: all teams identical, outcomes assigned round-robin so
/// each season has 16 qualifiers, two finalists, and one champion.
pub fn coin_flip_corpus(n_seasons: u32) -> Vec<TeamSeason> {
    let codes = league_codes();
    let mut out = Vec::new();
    for s in 0..n_seasons {
        let season = format!("{}-{}", 2018 + s, 2019 + s);
        for (i, code) in codes.iter().enumerate() {
            let mut t = neutral_team(code, &season);
            // Rotate which half of the league qualifies each season.
            let qualified = (i + s as usize) % 2 == 0;
            let champion = i == (s as usize * 11) % 32 && qualified;
            let finalist = champion || (qualified && i == (s as usize * 11 + 2) % 32);
            t.labels = labels(qualified, finalist, champion);
            out.push(t);
        }
    }
    out
}

/// The unlabeled snapshot of one season, all teams neutral.
pub fn neutral_current(season: &str) -> Vec<TeamSeason> {
    league_codes()
        .into_iter()
        .map(|code| neutral_team(code, season))
        .collect()
}
