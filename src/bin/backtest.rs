use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use tracing_subscriber::EnvFilter;

use puckcast::backtest::run_backtest;
use puckcast::config::{BracketPolicy, PredictorConfig};
use puckcast::data_loader::{SeasonSource, SqliteSeasonStore};
use puckcast::simulator::CancelToken;

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let db_path = parse_string_arg("--db")
        .map(PathBuf::from)
        .or_else(|| std::env::var("PUCKCAST_DB_PATH").ok().map(PathBuf::from))
        .context("no sqlite path: pass --db or set PUCKCAST_DB_PATH")?;
    let training_seasons = parse_string_arg("--train-seasons")
        .map(|raw| {
            raw.split([',', ';', ' '])
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .context("no training seasons: pass --train-seasons 2019-2020,2020-2021,...")?;
    if training_seasons.len() < 2 {
        return Err(anyhow!("leave-one-season-out needs at least two seasons"));
    }

    let mut config = PredictorConfig::default().with_env_overrides()?;
    if let Some(trials) = parse_string_arg("--trials").and_then(|raw| raw.parse().ok()) {
        config.num_trials = trials;
    }
    if let Some(seed) = parse_string_arg("--seed").and_then(|raw| raw.parse().ok()) {
        config.seed = Some(seed);
    }
    if let Some(raw) = parse_string_arg("--policy") {
        config.bracket_policy =
            BracketPolicy::parse(&raw).ok_or_else(|| anyhow!("unknown bracket policy {raw:?}"))?;
    }
    config.validate()?;

    let store = SqliteSeasonStore::open(&db_path, training_seasons)?;
    let training = store.load_training()?;
    let series = store.load_series()?;

    let summary = run_backtest(&training, &series, &config, &CancelToken::new(), |p| {
        eprintln!("[{}/{}] {}", p.current, p.total, p.message);
    })?;

    println!("Leave-one-season-out backtest");
    println!("DB: {}", db_path.display());
    println!();
    for report in &summary.seasons {
        println!(
            "season {} teams={} positives={} brier={:.4} ll={:.4} ece={:.4} champion={} rank={}",
            report.season,
            report.teams,
            report.qualification_positives,
            report.brier,
            report.log_loss,
            report.calibration_error,
            report.champion.as_deref().unwrap_or("-"),
            report
                .champion_rank
                .map(|r| r.to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
    }

    let agg = &summary.aggregate;
    println!();
    println!(
        "aggregate seasons={} samples={} positives={} brier={:.4} ll={:.4} ece={:.4}",
        agg.seasons,
        agg.qualification_samples,
        agg.qualification_positives,
        agg.brier,
        agg.log_loss,
        agg.calibration_error
    );
    for recall in &agg.top_k_recall {
        println!("top-{} champion recall: {:.1}%", recall.k, recall.recall * 100.0);
    }
    if let (Some(mean), Some(median)) = (agg.mean_champion_rank, agg.median_champion_rank) {
        println!("champion rank mean={mean:.2} median={median:.1}");
    }

    if let Some(out) = parse_string_arg("--json") {
        let json = serde_json::to_string_pretty(&summary)?;
        std::fs::write(&out, json).with_context(|| format!("write {out}"))?;
        println!("summary written to {out}");
    }
    Ok(())
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
