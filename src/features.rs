//! Feature construction: raw `TeamSeason` records to fixed-order,
//! low-collinearity feature vectors.
//!
//! `fit` learns everything the transform needs from the training corpus:
//! league anchor means, per-component z-score stats for the composite
//! features, per-feature medians for imputation, per-feature location and
//! scale, and the decorrelation coefficient that strips the territorial
//! signal out of the shot-quality premium. `transform` is a pure affine map
//! after that.

use serde::{Deserialize, Serialize};

use crate::error::PredictorError;
use crate::linear::{mean, median, std_dev};
use crate::team_season::TeamSeason;

pub const FEATURE_COUNT: usize = 13;

/// Canonical feature names; index order is part of the contract.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "goal_differential_rate",
    "territorial_dominance",
    "shot_quality_premium",
    "goaltending_quality",
    "special_teams_composite",
    "road_performance",
    "recent_form",
    "roster_depth",
    "star_power",
    "clutch_performance",
    "sustainability",
    "playoff_experience",
    "dynasty_score",
];

pub const IDX_TERRITORIAL: usize = 1;
pub const IDX_SHOT_QUALITY: usize = 2;
pub const IDX_PLAYOFF_EXPERIENCE: usize = 11;

// Bounded contributions so small samples cannot dominate a feature.
const BACKUP_GSAX_CAP: f64 = 6.0;
const STAR_PPG_CAP: f64 = 2.0;

const CLUTCH_ONE_GOAL_WEIGHT: f64 = 0.35;
const CLUTCH_OVERTIME_WEIGHT: f64 = 0.35;
const CLUTCH_COMEBACK_WEIGHT: f64 = 0.30;

const EXPERIENCE_GAMES_WEIGHT: f64 = 0.3;
const EXPERIENCE_ROUNDS_WEIGHT: f64 = 0.4;
const EXPERIENCE_CUPS_WEIGHT: f64 = 0.3;

const DYNASTY_CUP_WEIGHT: f64 = 1.0;
const DYNASTY_FINAL_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(pub [f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn get(&self, idx: usize) -> f64 {
        self.0[idx]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Component {
    mean: f64,
    scale: f64,
}

impl Component {
    fn from_values(values: &[f64]) -> Self {
        let std = std_dev(values);
        Self {
            mean: mean(values),
            scale: if std > 1e-9 { std } else { 1.0 },
        }
    }

    fn z(&self, value: f64) -> f64 {
        (value - self.mean) / self.scale
    }
}

/// League anchor points and component stats computed in the first fit pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Anchors {
    pp_mean: f64,
    pk_mean: f64,
    pdo_mean: f64,
    shot_attempt: Component,
    high_danger: Component,
    xg_share: Component,
    depth_count: Component,
    depth_spread: Component,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Fitted {
    anchors: Anchors,
    medians: [f64; FEATURE_COUNT],
    // A feature with no observed training value cannot be imputed later.
    observed: [bool; FEATURE_COUNT],
    means: [f64; FEATURE_COUNT],
    scales: [f64; FEATURE_COUNT],
    shot_quality_beta: f64,
    shot_quality_scale: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureBuilder {
    fitted: Option<Fitted>,
}

impl FeatureBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// Learn anchors, medians and scales from the training corpus. Replaces
    /// any previous fit.
    pub fn fit(&mut self, training: &[TeamSeason]) -> Result<(), PredictorError> {
        if training.is_empty() {
            return Err(PredictorError::InsufficientData {
                detail: "feature builder fitted on an empty corpus".to_string(),
            });
        }

        let anchors = fit_anchors(training);

        // Raw features per record, missing entries None.
        let raw_rows: Vec<[Option<f64>; FEATURE_COUNT]> = training
            .iter()
            .map(|t| raw_features(t, &anchors))
            .collect();

        let mut medians = [0.0; FEATURE_COUNT];
        let mut observed = [false; FEATURE_COUNT];
        let mut means = [0.0; FEATURE_COUNT];
        let mut scales = [1.0; FEATURE_COUNT];

        let mut imputed_columns: Vec<Vec<f64>> = Vec::with_capacity(FEATURE_COUNT);
        for feature in 0..FEATURE_COUNT {
            let mut present: Vec<f64> = raw_rows.iter().filter_map(|row| row[feature]).collect();
            if let Some(med) = median(&mut present) {
                medians[feature] = med;
                observed[feature] = true;
            }
            let column: Vec<f64> = raw_rows
                .iter()
                .map(|row| row[feature].unwrap_or(medians[feature]))
                .collect();
            means[feature] = mean(&column);
            let std = std_dev(&column);
            scales[feature] = if std > 1e-9 { std } else { 1.0 };
            imputed_columns.push(column);
        }

        // Whiten shot-quality premium against territorial dominance on the
        // scaled columns: the two share most of their variance through the
        // expected-goal signal.
        let terr_z: Vec<f64> = imputed_columns[IDX_TERRITORIAL]
            .iter()
            .map(|v| (v - means[IDX_TERRITORIAL]) / scales[IDX_TERRITORIAL])
            .collect();
        let sq_z: Vec<f64> = imputed_columns[IDX_SHOT_QUALITY]
            .iter()
            .map(|v| (v - means[IDX_SHOT_QUALITY]) / scales[IDX_SHOT_QUALITY])
            .collect();
        let terr_var = terr_z.iter().map(|v| v * v).sum::<f64>() / terr_z.len() as f64;
        let covariance =
            terr_z.iter().zip(&sq_z).map(|(a, b)| a * b).sum::<f64>() / terr_z.len() as f64;
        let beta = if terr_var > 1e-9 {
            covariance / terr_var
        } else {
            0.0
        };
        let residuals: Vec<f64> = sq_z
            .iter()
            .zip(&terr_z)
            .map(|(sq, terr)| sq - beta * terr)
            .collect();
        let resid_std = std_dev(&residuals);
        let shot_quality_scale = if resid_std > 1e-9 { resid_std } else { 1.0 };

        self.fitted = Some(Fitted {
            anchors,
            medians,
            observed,
            means,
            scales,
            shot_quality_beta: beta,
            shot_quality_scale,
        });
        Ok(())
    }

    pub fn transform(&self, record: &TeamSeason) -> Result<FeatureVector, PredictorError> {
        let Some(fitted) = &self.fitted else {
            return Err(PredictorError::InsufficientData {
                detail: "feature transform used before fit".to_string(),
            });
        };

        let raw = raw_features(record, &fitted.anchors);
        let mut out = [0.0; FEATURE_COUNT];
        for feature in 0..FEATURE_COUNT {
            let value = match raw[feature] {
                Some(v) => v,
                None if fitted.observed[feature] => fitted.medians[feature],
                None => {
                    return Err(PredictorError::InsufficientData {
                        detail: format!(
                            "feature {} missing for {} {} and never observed at fit time",
                            FEATURE_NAMES[feature], record.team, record.season
                        ),
                    });
                }
            };
            out[feature] = (value - fitted.means[feature]) / fitted.scales[feature];
        }

        out[IDX_SHOT_QUALITY] = (out[IDX_SHOT_QUALITY]
            - fitted.shot_quality_beta * out[IDX_TERRITORIAL])
            / fitted.shot_quality_scale;

        for (feature, value) in out.iter().enumerate() {
            if !value.is_finite() {
                return Err(PredictorError::InsufficientData {
                    detail: format!(
                        "feature {} not finite for {} {}",
                        FEATURE_NAMES[feature], record.team, record.season
                    ),
                });
            }
        }
        Ok(FeatureVector(out))
    }
}

fn fit_anchors(training: &[TeamSeason]) -> Anchors {
    let pp: Vec<f64> = training.iter().map(|t| t.pp_pct).collect();
    let pk: Vec<f64> = training.iter().map(|t| t.pk_pct).collect();
    let pdo: Vec<f64> = training.iter().filter_map(|t| t.pdo).collect();

    let shot_attempt: Vec<f64> = training.iter().filter_map(|t| t.shot_attempt_pct).collect();
    let high_danger: Vec<f64> = training.iter().filter_map(|t| t.high_danger_pct).collect();
    let xg_share: Vec<f64> = training.iter().filter_map(xg_share_of).collect();

    let depth_count: Vec<f64> = training
        .iter()
        .map(|t| t.scorers_forty_plus as f64)
        .collect();
    let depth_spread: Vec<f64> = training
        .iter()
        .map(|t| 1.0 - t.top_line_goal_share)
        .collect();

    Anchors {
        pp_mean: mean(&pp),
        pk_mean: mean(&pk),
        // The league sustainability point: shooting + saving sums here in
        // the long run.
        pdo_mean: if pdo.is_empty() { 100.0 } else { mean(&pdo) },
        shot_attempt: Component::from_values(&shot_attempt),
        high_danger: Component::from_values(&high_danger),
        xg_share: Component::from_values(&xg_share),
        depth_count: Component::from_values(&depth_count),
        depth_spread: Component::from_values(&depth_spread),
    }
}

fn xg_share_of(t: &TeamSeason) -> Option<f64> {
    let (xgf, xga) = (t.xg_for?, t.xg_against?);
    let total = xgf + xga;
    if total <= 0.0 {
        return None;
    }
    Some(100.0 * xgf / total)
}

/// Pre-scaling feature values; None marks a missing raw input.
fn raw_features(t: &TeamSeason, anchors: &Anchors) -> [Option<f64>; FEATURE_COUNT] {
    let games = t.games_played.max(1) as f64;

    let goal_diff_rate = Some((t.goals_for as f64 - t.goals_against as f64) / games);

    // Mean of available possession-share z-scores, teacher-composite style.
    let territorial = {
        let mut sum = 0.0;
        let mut n = 0usize;
        if let Some(v) = t.shot_attempt_pct {
            sum += anchors.shot_attempt.z(v);
            n += 1;
        }
        if let Some(v) = t.high_danger_pct {
            sum += anchors.high_danger.z(v);
            n += 1;
        }
        if let Some(v) = xg_share_of(t) {
            sum += anchors.xg_share.z(v);
            n += 1;
        }
        (n > 0).then(|| sum / n as f64)
    };

    let shot_quality = t
        .xg_for
        .map(|xgf| (t.goals_for as f64 - xgf) / games);

    let goaltending = t.gsax_starter.map(|starter| {
        let backup = t
            .gsax_backup
            .map(|b| b.clamp(-BACKUP_GSAX_CAP, BACKUP_GSAX_CAP))
            .unwrap_or(0.0);
        starter + backup
    });

    let special_teams = Some((t.pp_pct - anchors.pp_mean) + (t.pk_pct - anchors.pk_mean));

    let road = Some(t.road_points_pct() - t.home_points_pct());

    let recent_form = Some(t.recent_points_pct);

    let depth = Some(
        (anchors.depth_count.z(t.scorers_forty_plus as f64)
            + anchors.depth_spread.z(1.0 - t.top_line_goal_share))
            / 2.0,
    );

    let star = Some(t.top_scorer_ppg.min(STAR_PPG_CAP));

    let clutch = {
        let one_goal = win_rate(t.one_goal_wins, t.one_goal_losses);
        let overtime = win_rate(t.ot_wins, t.ot_game_losses);
        let comeback = win_rate(t.comebacks, t.blown_leads);
        Some(
            CLUTCH_ONE_GOAL_WEIGHT * one_goal
                + CLUTCH_OVERTIME_WEIGHT * overtime
                + CLUTCH_COMEBACK_WEIGHT * comeback,
        )
    };

    // Oriented so that a higher value means a more sustainable profile: a
    // team running hot (pdo above the league point) scores negative.
    let sustainability = t.pdo.map(|pdo| -(pdo - anchors.pdo_mean));

    let history = &t.playoff_history;
    let experience = Some(
        EXPERIENCE_GAMES_WEIGHT * history.appearances_3y as f64
            + EXPERIENCE_ROUNDS_WEIGHT * history.rounds_won_3y as f64
            + EXPERIENCE_CUPS_WEIGHT * history.cups_3y as f64,
    );

    let dynasty = Some(
        DYNASTY_CUP_WEIGHT * history.cups_5y as f64
            + DYNASTY_FINAL_WEIGHT * history.finals_5y as f64,
    );

    [
        goal_diff_rate,
        territorial,
        shot_quality,
        goaltending,
        special_teams,
        road,
        recent_form,
        depth,
        star,
        clutch,
        sustainability,
        experience,
        dynasty,
    ]
}

fn win_rate(wins: u32, losses: u32) -> f64 {
    let total = wins + losses;
    if total == 0 {
        return 0.5;
    }
    wins as f64 / total as f64
}
