//! Synthetic corpora for unit tests.

use crate::team_season::{
    ATLANTIC, CENTRAL, METROPOLITAN, PACIFIC, PlayoffHistory, SeasonLabels, TeamSeason,
    division_of,
};

pub fn all_codes() -> Vec<&'static str> {
    ATLANTIC
        .iter()
        .chain(METROPOLITAN.iter())
        .chain(CENTRAL.iter())
        .chain(PACIFIC.iter())
        .copied()
        .collect()
}

/// A self-consistent, mid-table record for one team.
pub fn baseline_team(code: &str, season: &str) -> TeamSeason {
    let division = division_of(code).expect("test code must be a league team");
    TeamSeason {
        team: code.to_string(),
        season: season.to_string(),
        conference: division.conference(),
        division,
        games_played: 82,
        wins: 41,
        losses: 31,
        ot_losses: 10,
        points: 92,
        goals_for: 250,
        goals_against: 240,
        shot_attempt_pct: Some(50.5),
        high_danger_pct: Some(49.5),
        xg_for: Some(245.0),
        xg_against: Some(238.0),
        gsax_starter: Some(4.0),
        gsax_backup: Some(1.0),
        pdo: Some(100.1),
        pp_pct: 21.0,
        pk_pct: 79.5,
        recent_points_pct: 0.55,
        recent_goal_diff: 3.0,
        top_scorer_ppg: 1.1,
        scorers_forty_plus: 5,
        top_line_goal_share: 0.42,
        road_wins: 20,
        road_losses: 16,
        road_ot_losses: 5,
        one_goal_wins: 12,
        one_goal_losses: 10,
        ot_wins: 6,
        ot_game_losses: 7,
        comebacks: 18,
        blown_leads: 15,
        playoff_history: PlayoffHistory::default(),
        labels: None,
    }
}

/// A graded team: rank 0 is the weakest profile, rank 31 the strongest.
pub fn graded_team(code: &str, season: &str, rank: u32) -> TeamSeason {
    let mut t = baseline_team(code, season);
    let r = rank as f64;

    t.wins = 25 + rank;
    t.ot_losses = 8;
    t.losses = 82 - t.wins - t.ot_losses;
    t.points = 2 * t.wins + t.ot_losses;

    t.goals_for = 200 + 4 * rank;
    t.goals_against = 280 - 4 * rank;
    t.shot_attempt_pct = Some(44.0 + 0.4 * r);
    t.high_danger_pct = Some(43.5 + 0.42 * r);
    t.xg_for = Some(205.0 + 3.0 * r);
    t.xg_against = Some(275.0 - 3.0 * r);
    t.gsax_starter = Some(-10.0 + 0.6 * r);
    t.gsax_backup = Some(-2.0 + 0.12 * r);
    t.pdo = Some(98.2 + 0.11 * r);
    t.pp_pct = 15.0 + 0.3 * r;
    t.pk_pct = 75.0 + 0.25 * r;
    t.recent_points_pct = 0.35 + 0.01 * r;
    t.recent_goal_diff = -8.0 + 0.5 * r;
    t.top_scorer_ppg = 0.8 + 0.03 * r;
    t.scorers_forty_plus = 2 + rank / 4;
    t.top_line_goal_share = 0.60 - 0.008 * r;

    t.road_wins = t.wins / 2;
    t.road_losses = t.losses / 2;
    t.road_ot_losses = t.ot_losses / 2;

    t.one_goal_wins = 8 + rank / 4;
    t.one_goal_losses = 14 - rank / 4;
    t.ot_wins = 4 + rank / 8;
    t.ot_game_losses = 8 - rank / 8;
    t.comebacks = 10 + rank / 2;
    t.blown_leads = 24 - rank / 2;

    t.playoff_history = PlayoffHistory {
        appearances_3y: (rank / 11).min(3),
        rounds_won_3y: rank / 12,
        finals_3y: u32::from(rank >= 30),
        cups_3y: u32::from(rank == 31),
        appearances_5y: (rank / 8).min(5),
        rounds_won_5y: rank / 9,
        finals_5y: u32::from(rank >= 29),
        cups_5y: u32::from(rank == 31),
    };
    t
}

/// `n_seasons` of labeled 32-team seasons with a deterministic strength
/// spread; qualification is top-8 per conference by points, the league's
/// strongest team wins the cup every season.
pub fn spread_corpus(n_seasons: u32) -> Vec<TeamSeason> {
    let codes = all_codes();
    let mut out = Vec::new();
    for s in 0..n_seasons {
        let season = format!("{}-{}", 2015 + s, 2016 + s);
        let mut teams: Vec<TeamSeason> = codes
            .iter()
            .enumerate()
            .map(|(i, code)| {
                // 7 is coprime with 32, so ranks spread across divisions.
                let rank = ((i as u32) * 7 + s) % 32;
                graded_team(code, &season, rank)
            })
            .collect();

        for conference in [
            crate::team_season::Conference::Eastern,
            crate::team_season::Conference::Western,
        ] {
            let mut members: Vec<usize> = teams
                .iter()
                .enumerate()
                .filter(|(_, t)| t.conference == conference)
                .map(|(idx, _)| idx)
                .collect();
            members.sort_by_key(|idx| std::cmp::Reverse(teams[*idx].points));
            for (slot, idx) in members.iter().enumerate() {
                let qualified = slot < 8;
                teams[*idx].labels = Some(SeasonLabels {
                    qualified,
                    reached_final: false,
                    won_cup: false,
                });
            }
        }

        // Final pairing: the best team per conference; strongest overall
        // takes the cup.
        let mut best: Vec<usize> = Vec::new();
        for conference in [
            crate::team_season::Conference::Eastern,
            crate::team_season::Conference::Western,
        ] {
            let idx = teams
                .iter()
                .enumerate()
                .filter(|(_, t)| t.conference == conference)
                .max_by_key(|(_, t)| t.points)
                .map(|(idx, _)| idx)
                .expect("both conferences populated");
            best.push(idx);
        }
        let champion = *best
            .iter()
            .max_by_key(|idx| teams[**idx].points)
            .expect("two finalists");
        for idx in &best {
            if let Some(labels) = teams[*idx].labels.as_mut() {
                labels.reached_final = true;
            }
        }
        if let Some(labels) = teams[champion].labels.as_mut() {
            labels.won_cup = true;
        }

        out.extend(teams);
    }
    out
}
