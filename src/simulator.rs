//! Monte Carlo post-season simulation.
//!
//! Trials are independent and partitioned across rayon workers. Every trial
//! owns an RNG seeded from the simulation seed and its trial index, so the
//! tally is identical for any worker count; only cancellation changes which
//! trials complete.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::bracket::{ConferenceField, Entrant, seed_conference};
use crate::config::BracketPolicy;
use crate::error::PredictorError;
use crate::linear::splitmix64;
use crate::series_model::{SeriesModel, SeriesTeam};
use crate::team_season::{Conference, Division};

/// How often one trial may redraw an infeasible bracket before giving up.
const MAX_SEEDING_ATTEMPTS: u32 = 100;

const CI_Z_90: f64 = 1.645;

/// Cooperative cancellation flag, polled between components and between
/// simulator trials.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Per-team immutable simulation inputs.
#[derive(Debug, Clone, Copy)]
pub struct SimTeam {
    pub conference: Conference,
    pub division: Division,
    pub strength: f64,
    pub experience: f64,
    pub playoff_prob: f64,
}

impl SimTeam {
    fn series_team(&self) -> SeriesTeam {
        SeriesTeam {
            strength: self.strength,
            experience: self.experience,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub requested_trials: u64,
    pub completed_trials: u64,
    pub partial: bool,
    /// Per team: probability of surviving rounds 1..4. `[3]` is the raw cup
    /// probability.
    pub round_probs: Vec<[f64; 4]>,
}

impl SimulationResult {
    /// 90% normal-approximation CI half-width for a probability at this
    /// trial count.
    pub fn ci_half_width(&self, p: f64) -> f64 {
        if self.completed_trials == 0 {
            return 0.5;
        }
        CI_Z_90 * (p.clamp(0.0, 1.0) * (1.0 - p.clamp(0.0, 1.0)) / self.completed_trials as f64)
            .sqrt()
    }
}

/// The deterministic seeding mode: qualification by classifier probability
/// instead of sampling, used for the projected bracket.
pub fn projected_fields(
    teams: &[SimTeam],
) -> Result<Vec<(Conference, ConferenceField)>, PredictorError> {
    let mut qualified = vec![false; teams.len()];
    for conference in [Conference::Eastern, Conference::Western] {
        let mut members: Vec<usize> = (0..teams.len())
            .filter(|i| teams[*i].conference == conference)
            .collect();
        members.sort_by(|a, b| {
            teams[*b]
                .playoff_prob
                .partial_cmp(&teams[*a].playoff_prob)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    teams[*b]
                        .strength
                        .partial_cmp(&teams[*a].strength)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(a.cmp(b))
        });
        for idx in members.into_iter().take(8) {
            qualified[idx] = true;
        }
    }

    let mut out = Vec::with_capacity(2);
    for conference in [Conference::Eastern, Conference::Western] {
        let entrants = conference_entrants(teams, conference);
        let field = seed_conference(&entrants, &qualified).ok_or(
            PredictorError::SeedingInfeasible {
                attempts: 1,
            },
        )?;
        out.push((conference, field));
    }
    Ok(out)
}

pub fn simulate(
    teams: &[SimTeam],
    series_model: &SeriesModel,
    policy: BracketPolicy,
    trials: u64,
    seed: u64,
    cancel: &CancelToken,
) -> Result<SimulationResult, PredictorError> {
    let east = conference_entrants(teams, Conference::Eastern);
    let west = conference_entrants(teams, Conference::Western);

    // Geometry that can never seed fails the same way on every draw; catch
    // it before burning trials.
    let all_in = vec![true; teams.len()];
    if seed_conference(&east, &all_in).is_none() || seed_conference(&west, &all_in).is_none() {
        return Err(PredictorError::SeedingInfeasible {
            attempts: MAX_SEEDING_ATTEMPTS,
        });
    }

    let tally = (0..trials)
        .into_par_iter()
        .fold(
            || Tally::new(teams.len()),
            |mut tally, trial| {
                if cancel.is_cancelled() {
                    return tally;
                }
                let mut rng = StdRng::seed_from_u64(splitmix64(seed.wrapping_add(trial)));
                match run_trial(teams, &east, &west, series_model, policy, &mut rng) {
                    Ok(survivors) => {
                        tally.trials += 1;
                        for (team, rounds) in survivors {
                            for (slot, survived) in
                                tally.rounds[team].iter_mut().zip(rounds.iter())
                            {
                                *slot += u64::from(*survived);
                            }
                        }
                    }
                    Err(()) => tally.infeasible += 1,
                }
                tally
            },
        )
        .reduce(|| Tally::new(teams.len()), Tally::merge);

    if tally.infeasible > 0 {
        return Err(PredictorError::SeedingInfeasible {
            attempts: MAX_SEEDING_ATTEMPTS,
        });
    }
    if tally.trials == 0 {
        return Err(PredictorError::Cancelled);
    }

    let completed = tally.trials;
    let round_probs = tally
        .rounds
        .iter()
        .map(|counts| {
            let mut probs = [0.0; 4];
            for (p, c) in probs.iter_mut().zip(counts) {
                *p = *c as f64 / completed as f64;
            }
            probs
        })
        .collect();

    Ok(SimulationResult {
        requested_trials: trials,
        completed_trials: completed,
        partial: completed < trials,
        round_probs,
    })
}

struct Tally {
    trials: u64,
    infeasible: u64,
    rounds: Vec<[u64; 4]>,
}

impl Tally {
    fn new(teams: usize) -> Self {
        Self {
            trials: 0,
            infeasible: 0,
            rounds: vec![[0; 4]; teams],
        }
    }

    fn merge(mut self, other: Self) -> Self {
        self.trials += other.trials;
        self.infeasible += other.infeasible;
        for (mine, theirs) in self.rounds.iter_mut().zip(&other.rounds) {
            for (m, t) in mine.iter_mut().zip(theirs) {
                *m += t;
            }
        }
        self
    }
}

fn conference_entrants(teams: &[SimTeam], conference: Conference) -> Vec<Entrant> {
    teams
        .iter()
        .enumerate()
        .filter(|(_, t)| t.conference == conference)
        .map(|(team, t)| Entrant {
            team,
            conference: t.conference,
            division: t.division,
            strength: t.strength,
            tiebreak: 0,
        })
        .collect()
}

type Survivors = Vec<(usize, [bool; 4])>;

fn run_trial(
    teams: &[SimTeam],
    east: &[Entrant],
    west: &[Entrant],
    series_model: &SeriesModel,
    policy: BracketPolicy,
    rng: &mut StdRng,
) -> Result<Survivors, ()> {
    let mut qualified = vec![false; teams.len()];

    // Per-trial tie-break draws keep exactly equal strengths symmetric over
    // the long run instead of favoring low indices.
    let mut tiebreaks = vec![0u64; teams.len()];
    for slot in tiebreaks.iter_mut() {
        *slot = rng.r#gen::<u64>();
    }
    let mut east = east.to_vec();
    let mut west = west.to_vec();
    for entrant in east.iter_mut().chain(west.iter_mut()) {
        entrant.tiebreak = tiebreaks[entrant.team];
    }

    let mut fields: Option<(ConferenceField, ConferenceField)> = None;
    for _attempt in 0..MAX_SEEDING_ATTEMPTS {
        for (flag, team) in qualified.iter_mut().zip(teams) {
            *flag = rng.r#gen::<f64>() < team.playoff_prob;
        }
        let east_field = seed_conference(&east, &qualified);
        let west_field = seed_conference(&west, &qualified);
        if let (Some(e), Some(w)) = (east_field, west_field) {
            fields = Some((e, w));
            break;
        }
    }
    let (east_field, west_field) = fields.ok_or(())?;

    let mut survivors: Survivors = Vec::with_capacity(16);
    let east_champion = run_conference(
        teams,
        &tiebreaks,
        &east_field,
        series_model,
        policy,
        rng,
        &mut survivors,
    );
    let west_champion = run_conference(
        teams,
        &tiebreaks,
        &west_field,
        series_model,
        policy,
        rng,
        &mut survivors,
    );

    // Cup final: the stronger conference champion is the nominal higher
    // seed.
    let (higher, lower) = order_by_strength(teams, &tiebreaks, east_champion, west_champion);
    let champion = play_series(teams, higher, lower, 4, series_model, rng);
    mark_round(&mut survivors, champion, 4);

    Ok(survivors)
}

/// Simulate rounds 1..3 of one conference, returning its champion.
fn run_conference(
    teams: &[SimTeam],
    tiebreaks: &[u64],
    field: &ConferenceField,
    series_model: &SeriesModel,
    policy: BracketPolicy,
    rng: &mut StdRng,
    survivors: &mut Survivors,
) -> usize {
    for team in field.slots {
        survivors.push((team, [false; 4]));
    }

    match policy {
        BracketPolicy::Divisional => {
            let s = &field.slots;
            // Round 1: fixed slots; the first of each pair is the nominal
            // higher seed.
            let mut r1 = [0usize; 4];
            for (game, pair) in [(0, 1), (2, 3), (4, 5), (6, 7)].iter().enumerate() {
                r1[game] = play_series(teams, s[pair.0], s[pair.1], 1, series_model, rng);
                mark_round(survivors, r1[game], 1);
            }
            // Round 2: division finals.
            let mut r2 = [0usize; 2];
            for (game, pair) in [(0, 1), (2, 3)].iter().enumerate() {
                let (higher, lower) = order_by_strength(teams, tiebreaks, r1[pair.0], r1[pair.1]);
                r2[game] = play_series(teams, higher, lower, 2, series_model, rng);
                mark_round(survivors, r2[game], 2);
            }
            // Round 3: conference final.
            let (higher, lower) = order_by_strength(teams, tiebreaks, r2[0], r2[1]);
            let champion = play_series(teams, higher, lower, 3, series_model, rng);
            mark_round(survivors, champion, 3);
            champion
        }
        BracketPolicy::ConferenceReseed => {
            // Seed order is strength order; re-pair best-vs-worst each
            // round.
            let mut alive: Vec<usize> = field.seeds.to_vec();
            for round in 1..=3u8 {
                let mut next = Vec::with_capacity(alive.len() / 2);
                let games = alive.len() / 2;
                for game in 0..games {
                    let higher = alive[game];
                    let lower = alive[alive.len() - 1 - game];
                    let winner = play_series(teams, higher, lower, round, series_model, rng);
                    mark_round(survivors, winner, round);
                    next.push(winner);
                }
                // Preserve seed order among winners for the next pairing.
                alive.retain(|t| next.contains(t));
            }
            alive[0]
        }
    }
}

fn play_series(
    teams: &[SimTeam],
    higher: usize,
    lower: usize,
    round: u8,
    series_model: &SeriesModel,
    rng: &mut StdRng,
) -> usize {
    let p = series_model.predict(
        teams[higher].series_team(),
        teams[lower].series_team(),
        round,
    );
    if rng.r#gen::<f64>() < p { higher } else { lower }
}

fn order_by_strength(teams: &[SimTeam], tiebreaks: &[u64], a: usize, b: usize) -> (usize, usize) {
    if teams[a].strength > teams[b].strength
        || (teams[a].strength == teams[b].strength && tiebreaks[a] <= tiebreaks[b])
    {
        (a, b)
    } else {
        (b, a)
    }
}

fn mark_round(survivors: &mut Survivors, team: usize, round: u8) {
    if let Some(entry) = survivors.iter_mut().find(|(t, _)| *t == team) {
        entry.1[usize::from(round) - 1] = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::team_season::{division_of, ATLANTIC, CENTRAL, METROPOLITAN, PACIFIC};

    fn league(playoff_prob: f64) -> Vec<SimTeam> {
        ATLANTIC
            .iter()
            .chain(METROPOLITAN.iter())
            .chain(CENTRAL.iter())
            .chain(PACIFIC.iter())
            .map(|code| {
                let division = division_of(code).unwrap();
                SimTeam {
                    conference: division.conference(),
                    division,
                    strength: 0.0,
                    experience: 0.0,
                    playoff_prob,
                }
            })
            .collect()
    }

    #[test]
    fn champion_mass_is_unit_and_rounds_monotone() {
        let teams = league(0.5);
        let model = SeriesModel::new();
        let cancel = CancelToken::new();
        let result = simulate(
            &teams,
            &model,
            BracketPolicy::Divisional,
            2_000,
            42,
            &cancel,
        )
        .unwrap();
        assert_eq!(result.completed_trials, 2_000);
        assert!(!result.partial);

        let champion_mass: f64 = result.round_probs.iter().map(|r| r[3]).sum();
        assert!((champion_mass - 1.0).abs() < 1e-9);
        for rounds in &result.round_probs {
            assert!(rounds[0] >= rounds[1]);
            assert!(rounds[1] >= rounds[2]);
            assert!(rounds[2] >= rounds[3]);
        }
    }

    #[test]
    fn identical_seed_identical_tally() {
        let teams = league(0.5);
        let model = SeriesModel::new();
        let cancel = CancelToken::new();
        let a = simulate(
            &teams,
            &model,
            BracketPolicy::ConferenceReseed,
            1_000,
            7,
            &cancel,
        )
        .unwrap();
        let b = simulate(
            &teams,
            &model,
            BracketPolicy::ConferenceReseed,
            1_000,
            7,
            &cancel,
        )
        .unwrap();
        assert_eq!(a.round_probs, b.round_probs);
    }

    #[test]
    fn uniform_league_is_roughly_uniform_under_both_policies() {
        let teams = league(0.5);
        let model = SeriesModel::new();
        let cancel = CancelToken::new();
        for policy in [BracketPolicy::Divisional, BracketPolicy::ConferenceReseed] {
            let result = simulate(&teams, &model, policy, 20_000, 11, &cancel).unwrap();
            for rounds in &result.round_probs {
                assert!(
                    (rounds[3] - 1.0 / 32.0).abs() < 0.012,
                    "{policy:?}: cup prob {} too far from 1/32",
                    rounds[3]
                );
            }
        }
    }

    #[test]
    fn strong_team_survives_more() {
        let mut teams = league(0.5);
        teams[0].strength = 3.0;
        teams[0].playoff_prob = 0.99;
        // Slopes must be non-zero for strength to matter.
        let mut model = SeriesModel::new();
        let weights = crate::weights::LearnedWeights::uniform();
        let examples: Vec<crate::series_model::SeriesExample> = (0..80)
            .map(|i| crate::series_model::SeriesExample {
                higher: crate::features::FeatureVector([1.0; crate::features::FEATURE_COUNT]),
                lower: crate::features::FeatureVector([-1.0; crate::features::FEATURE_COUNT]),
                round: 1 + (i % 4) as u8,
                higher_won: i % 4 != 0,
            })
            .collect();
        model.fit(&examples, &weights).unwrap();

        let cancel = CancelToken::new();
        let result = simulate(
            &teams,
            &model,
            BracketPolicy::Divisional,
            5_000,
            3,
            &cancel,
        )
        .unwrap();
        let strong_cup = result.round_probs[0][3];
        let typical_cup = result.round_probs[10][3];
        assert!(strong_cup > 3.0 * typical_cup);
    }

    #[test]
    fn cancelled_before_start_is_an_error() {
        let teams = league(0.5);
        let model = SeriesModel::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = simulate(
            &teams,
            &model,
            BracketPolicy::Divisional,
            1_000,
            1,
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(err, PredictorError::Cancelled));
    }

    #[test]
    fn ci_half_width_matches_normal_approximation() {
        let result = SimulationResult {
            requested_trials: 1_000,
            completed_trials: 1_000,
            partial: false,
            round_probs: Vec::new(),
        };
        let hw = result.ci_half_width(0.5);
        assert!((hw - 0.026).abs() < 0.0026);
    }
}
