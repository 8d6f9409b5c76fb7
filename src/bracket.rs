//! Post-season field construction: who is seeded, and how the first round
//! is paired inside each conference.
//!
//! Both bracket policies share the seeding structure of the league: three
//! division seeds per division plus two wildcards per conference. The
//! policies differ only in pairing: the divisional bracket is fixed once
//! seeded, the conference-reseed bracket re-pairs best-vs-worst each round.

use crate::team_season::{Conference, Division};

/// Per-team seeding inputs, indexed back into the caller's team list.
///
/// `tiebreak` decides ordering between exactly equal strengths. The
/// simulator draws it per trial so that ties are broken symmetrically;
/// deterministic callers leave it at 0 and fall back to the team index.
#[derive(Debug, Clone, Copy)]
pub struct Entrant {
    pub team: usize,
    pub conference: Conference,
    pub division: Division,
    pub strength: f64,
    pub tiebreak: u64,
}

/// A seeded conference: eight teams in fixed divisional bracket order plus
/// the same eight in strength order for the reseed policy.
#[derive(Debug, Clone)]
pub struct ConferenceField {
    /// Divisional bracket order: pairs (0,1), (2,3), (4,5), (6,7); the
    /// first four slots are one division's side of the bracket.
    pub slots: [usize; 8],
    /// The same teams ordered by strength, best first.
    pub seeds: [usize; 8],
}

impl ConferenceField {
    pub fn contains(&self, team: usize) -> bool {
        self.slots.contains(&team)
    }
}

/// Seed one conference from sampled qualification flags. Shortfalls are
/// repaired by promoting the strongest unqualified team eligible for the
/// open slot. Returns None only when the conference itself is malformed
/// (fewer than eight teams or a division short of three).
pub fn seed_conference(entrants: &[Entrant], qualified: &[bool]) -> Option<ConferenceField> {
    if entrants.len() < 8 {
        return None;
    }

    let mut divisions: Vec<Division> = entrants.iter().map(|e| e.division).collect();
    divisions.sort_by_key(|d| *d as u8);
    divisions.dedup();
    if divisions.len() != 2 {
        return None;
    }

    let mut division_seeds: Vec<Vec<Entrant>> = Vec::with_capacity(2);
    for division in &divisions {
        let mut members: Vec<Entrant> = entrants
            .iter()
            .filter(|e| e.division == *division)
            .copied()
            .collect();
        if members.len() < 3 {
            return None;
        }
        sort_by_strength(&mut members);

        let mut seeds: Vec<Entrant> = members
            .iter()
            .filter(|e| qualified[e.team])
            .take(3)
            .copied()
            .collect();
        // Promote the strongest unqualified team in the division until the
        // three division slots are filled.
        for candidate in &members {
            if seeds.len() == 3 {
                break;
            }
            if !seeds.iter().any(|s| s.team == candidate.team) {
                seeds.push(*candidate);
            }
        }
        division_seeds.push(seeds);
    }

    let taken: Vec<usize> = division_seeds
        .iter()
        .flatten()
        .map(|e| e.team)
        .collect();
    let mut remaining: Vec<Entrant> = entrants
        .iter()
        .filter(|e| !taken.contains(&e.team))
        .copied()
        .collect();
    sort_by_strength(&mut remaining);

    let mut wildcards: Vec<Entrant> = remaining
        .iter()
        .filter(|e| qualified[e.team])
        .take(2)
        .copied()
        .collect();
    for candidate in &remaining {
        if wildcards.len() == 2 {
            break;
        }
        if !wildcards.iter().any(|w| w.team == candidate.team) {
            wildcards.push(*candidate);
        }
    }
    sort_by_strength(&mut wildcards);

    // The stronger division winner draws the weaker wildcard.
    let (top_side, other_side) = if division_seeds[0][0].strength >= division_seeds[1][0].strength {
        (0, 1)
    } else {
        (1, 0)
    };
    let slots = [
        division_seeds[top_side][0].team,
        wildcards[1].team,
        division_seeds[top_side][1].team,
        division_seeds[top_side][2].team,
        division_seeds[other_side][0].team,
        wildcards[0].team,
        division_seeds[other_side][1].team,
        division_seeds[other_side][2].team,
    ];

    let mut all: Vec<Entrant> = division_seeds
        .into_iter()
        .flatten()
        .chain(wildcards)
        .collect();
    sort_by_strength(&mut all);
    let mut seeds = [0usize; 8];
    for (slot, entrant) in seeds.iter_mut().zip(&all) {
        *slot = entrant.team;
    }

    Some(ConferenceField { slots, seeds })
}

fn sort_by_strength(entrants: &mut [Entrant]) {
    entrants.sort_by(|a, b| {
        b.strength
            .partial_cmp(&a.strength)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.tiebreak.cmp(&b.tiebreak))
            .then(a.team.cmp(&b.team))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::team_season::{Conference, Division};

    fn western_entrants(strengths: [f64; 16]) -> Vec<Entrant> {
        (0..16)
            .map(|i| Entrant {
                team: i,
                conference: Conference::Western,
                division: if i < 8 {
                    Division::Central
                } else {
                    Division::Pacific
                },
                strength: strengths[i],
                tiebreak: 0,
            })
            .collect()
    }

    #[test]
    fn full_qualification_takes_division_top_three_plus_wildcards() {
        // Strength decreasing with index; Central 0..8, Pacific 8..16.
        let strengths: [f64; 16] = std::array::from_fn(|i| 16.0 - i as f64);
        let entrants = western_entrants(strengths);
        let qualified = vec![true; 16];
        let field = seed_conference(&entrants, &qualified).unwrap();

        // Central is the stronger division, so its winner (team 0) draws
        // the weaker wildcard.
        assert_eq!(field.slots[0], 0);
        assert_eq!(field.slots[2], 1);
        assert_eq!(field.slots[3], 2);
        assert_eq!(field.slots[4], 8);
        assert_eq!(field.slots[6], 9);
        assert_eq!(field.slots[7], 10);
        // Wildcards are the next strongest remaining (3 and 4, Central).
        assert_eq!(field.slots[5], 3); // stronger wildcard to other side
        assert_eq!(field.slots[1], 4); // weaker wildcard vs top winner
        assert_eq!(field.seeds[0], 0);
        assert_eq!(field.seeds[7], 10);
    }

    #[test]
    fn shortfall_promotes_strongest_unqualified() {
        let strengths: [f64; 16] = std::array::from_fn(|i| 16.0 - i as f64);
        let entrants = western_entrants(strengths);
        // Nobody sampled as qualified: the field must still complete, in
        // strength order.
        let qualified = vec![false; 16];
        let field = seed_conference(&entrants, &qualified).unwrap();
        assert_eq!(field.slots[0], 0);
        assert_eq!(field.slots[4], 8);
        assert!(field.contains(3) && field.contains(4));
    }

    #[test]
    fn qualified_teams_take_precedence_over_stronger_unqualified() {
        let strengths: [f64; 16] = std::array::from_fn(|i| 16.0 - i as f64);
        let entrants = western_entrants(strengths);
        let mut qualified = vec![true; 16];
        // The strongest Central team misses: next three qualified Central
        // teams take the division slots.
        qualified[0] = false;
        let field = seed_conference(&entrants, &qualified).unwrap();
        assert!(!field.contains(0));
        assert_eq!(field.slots[0], 1);
        // Wildcards come from the qualified pool: 4 and 5, the stronger one
        // (4) crossing to the weaker division winner's side.
        assert_eq!(field.slots[1], 5);
        assert_eq!(field.slots[5], 4);
    }

    #[test]
    fn undersized_conference_is_rejected() {
        let entrants: Vec<Entrant> = (0..5)
            .map(|i| Entrant {
                team: i,
                conference: Conference::Eastern,
                division: Division::Atlantic,
                strength: i as f64,
                tiebreak: 0,
            })
            .collect();
        assert!(seed_conference(&entrants, &vec![true; 5]).is_none());
    }
}
