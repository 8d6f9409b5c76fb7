use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use tracing_subscriber::EnvFilter;

use puckcast::config::{BracketPolicy, PredictorConfig};
use puckcast::data_loader::{SeasonSource, SqliteSeasonStore};
use puckcast::pipeline::{Pipeline, PipelineProgress};
use puckcast::simulator::CancelToken;
use puckcast::{backtest, export};

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let db_path = parse_path_arg("--db")
        .or_else(|| std::env::var("PUCKCAST_DB_PATH").ok().map(PathBuf::from))
        .context("no sqlite path: pass --db or set PUCKCAST_DB_PATH")?;
    let season = parse_string_arg("--season")
        .context("no target season: pass --season, e.g. --season 2025-2026")?;
    let training_seasons = parse_string_arg("--train-seasons")
        .map(|raw| parse_season_list(&raw))
        .context("no training seasons: pass --train-seasons 2019-2020,2020-2021,...")?;
    if training_seasons.is_empty() {
        return Err(anyhow!("--train-seasons parsed to an empty list"));
    }
    let out_path = parse_path_arg("--out").unwrap_or_else(|| PathBuf::from("predictions.json"));
    let xlsx_path = parse_path_arg("--xlsx");
    let with_backtest = has_flag("--backtest");

    let mut config = PredictorConfig::default().with_env_overrides()?;
    if let Some(trials) = parse_u64_arg("--trials") {
        config.num_trials = trials;
    }
    if let Some(seed) = parse_u64_arg("--seed") {
        config.seed = Some(seed);
    }
    if let Some(raw) = parse_string_arg("--policy") {
        config.bracket_policy =
            BracketPolicy::parse(&raw).ok_or_else(|| anyhow!("unknown bracket policy {raw:?}"))?;
    }
    config.validate()?;

    let store = SqliteSeasonStore::open(&db_path, training_seasons)?;
    let cancel = CancelToken::new();

    let pipeline = Pipeline::fit_with_progress(&store, &config, &cancel, print_progress)?;
    let current = store.load_current(&season)?;
    let output = pipeline.predict_with_progress(&current, &cancel, print_progress)?;

    let summary = if with_backtest {
        let training = store.load_training()?;
        let series = store.load_series()?;
        Some(backtest::run_backtest(
            &training,
            &series,
            &config,
            &cancel,
            print_progress,
        )?)
    } else {
        None
    };

    let artifact = pipeline.artifact(&season, &output, &Utc::now().to_rfc3339(), summary);
    export::write_artifact_json(&out_path, &artifact)?;
    if let Some(xlsx_path) = &xlsx_path {
        export::write_workbook(xlsx_path, &artifact)?;
    }

    println!(
        "{} predictions for {season} -> {}",
        artifact.predictions.len(),
        out_path.display()
    );
    for p in artifact.predictions.iter().take(10) {
        println!(
            "  {:<4} strength={:+.3} playoff={:.3} cup={:.4} [{:.4}, {:.4}]",
            p.team, p.strength, p.playoff_prob, p.cup_prob, p.cup_ci_lo, p.cup_ci_hi
        );
    }
    if !artifact.warnings.is_empty() {
        for warning in &artifact.warnings {
            println!("  warning: {warning}");
        }
    }
    Ok(())
}

fn print_progress(progress: PipelineProgress) {
    eprintln!(
        "[{}/{}] {}: {}",
        progress.current, progress.total, progress.stage, progress.message
    );
}

fn parse_season_list(raw: &str) -> Vec<String> {
    let mut out = Vec::new();
    for part in raw.split([',', ';', ' ']) {
        let trimmed = part.trim();
        if !trimmed.is_empty() && !out.iter().any(|s| s == trimmed) {
            out.push(trimmed.to_string());
        }
    }
    out
}

fn parse_string_arg(name: &str) -> Option<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&format!("{name}=")) {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(next.trim().to_string());
        }
    }
    None
}

fn parse_path_arg(name: &str) -> Option<PathBuf> {
    parse_string_arg(name).map(PathBuf::from)
}

fn parse_u64_arg(name: &str) -> Option<u64> {
    parse_string_arg(name).and_then(|raw| raw.parse::<u64>().ok())
}

fn has_flag(name: &str) -> bool {
    std::env::args().skip(1).any(|arg| arg == name)
}
