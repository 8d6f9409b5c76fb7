use serde::{Deserialize, Serialize};

use crate::error::PredictorError;

/// How qualified teams are paired into the first round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BracketPolicy {
    /// Division winner vs wildcard, 2 vs 3 inside each division; winners
    /// meet inside the division, then the conference final.
    Divisional,
    /// Conference seeds 1-8, re-paired best-vs-worst every round.
    ConferenceReseed,
}

impl BracketPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "divisional" => Some(Self::Divisional),
            "conference-reseed" | "conference_reseed" => Some(Self::ConferenceReseed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Divisional => "divisional",
            Self::ConferenceReseed => "conference-reseed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorConfig {
    /// Monte Carlo trials per prediction.
    pub num_trials: u64,
    /// Per-season recency decay lambda; 0.0 disables recency weighting.
    /// Enabling it trades top-1 precision for top-8 recall.
    pub recency_decay_rate: f64,
    /// Extra sample weight on championship seasons, active only with recency
    /// weighting on.
    pub cup_winner_boost: f64,
    /// Game count of the recent-form window the data layer aggregates over.
    pub recent_form_window: u32,
    /// Top-level seed. None means a fresh, non-reproducible run.
    pub seed: Option<u64>,
    pub bracket_policy: BracketPolicy,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            num_trials: 10_000,
            recency_decay_rate: 0.0,
            cup_winner_boost: 1.0,
            recent_form_window: 10,
            seed: None,
            bracket_policy: BracketPolicy::Divisional,
        }
    }
}

impl PredictorConfig {
    /// Validate ranges once at entry. Invalid values are errors, never
    /// silently clamped.
    pub fn validate(&self) -> Result<(), PredictorError> {
        if self.num_trials < 1_000 {
            return Err(invalid(format!(
                "num_trials = {} (minimum 1000)",
                self.num_trials
            )));
        }
        if !(0.0..=0.5).contains(&self.recency_decay_rate) {
            return Err(invalid(format!(
                "recency_decay_rate = {} outside [0.0, 0.5]",
                self.recency_decay_rate
            )));
        }
        if !(1.0..=5.0).contains(&self.cup_winner_boost) {
            return Err(invalid(format!(
                "cup_winner_boost = {} outside [1.0, 5.0]",
                self.cup_winner_boost
            )));
        }
        if self.recent_form_window == 0 {
            return Err(invalid("recent_form_window must be at least 1"));
        }
        Ok(())
    }

    /// Apply `PUCKCAST_*` environment overrides on top of `self`.
    pub fn with_env_overrides(mut self) -> Result<Self, PredictorError> {
        if let Some(raw) = env_var("PUCKCAST_NUM_TRIALS") {
            self.num_trials = raw
                .parse()
                .map_err(|_| invalid(format!("PUCKCAST_NUM_TRIALS = {raw:?}")))?;
        }
        if let Some(raw) = env_var("PUCKCAST_RECENCY_DECAY_RATE") {
            self.recency_decay_rate = raw
                .parse()
                .map_err(|_| invalid(format!("PUCKCAST_RECENCY_DECAY_RATE = {raw:?}")))?;
        }
        if let Some(raw) = env_var("PUCKCAST_CUP_WINNER_BOOST") {
            self.cup_winner_boost = raw
                .parse()
                .map_err(|_| invalid(format!("PUCKCAST_CUP_WINNER_BOOST = {raw:?}")))?;
        }
        if let Some(raw) = env_var("PUCKCAST_RECENT_FORM_WINDOW") {
            self.recent_form_window = raw
                .parse()
                .map_err(|_| invalid(format!("PUCKCAST_RECENT_FORM_WINDOW = {raw:?}")))?;
        }
        if let Some(raw) = env_var("PUCKCAST_SEED") {
            self.seed = Some(
                raw.parse()
                    .map_err(|_| invalid(format!("PUCKCAST_SEED = {raw:?}")))?,
            );
        }
        if let Some(raw) = env_var("PUCKCAST_BRACKET_POLICY") {
            self.bracket_policy = BracketPolicy::parse(&raw)
                .ok_or_else(|| invalid(format!("PUCKCAST_BRACKET_POLICY = {raw:?}")))?;
        }
        Ok(self)
    }
}

fn env_var(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => Some(raw),
        _ => None,
    }
}

fn invalid(detail: impl Into<String>) -> PredictorError {
    PredictorError::InvalidConfig {
        detail: detail.into(),
    }
}
