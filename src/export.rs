//! Artifact writers: the JSON contract file and a two-sheet spreadsheet for
//! human review.

use std::path::Path;

use anyhow::{Context, Result};
use rust_xlsxwriter::Workbook;

use crate::ensemble::Tier;
use crate::pipeline::PredictionArtifact;

pub fn artifact_json(artifact: &PredictionArtifact) -> Result<String> {
    serde_json::to_string_pretty(artifact).context("serialize prediction artifact")
}

/// Atomic write: serialize to a temp file, then swap it in.
pub fn write_artifact_json(path: &Path, artifact: &PredictionArtifact) -> Result<()> {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let json = artifact_json(artifact)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).context("write prediction artifact")?;
    std::fs::rename(&tmp, path).context("swap prediction artifact")?;
    Ok(())
}

fn tier_label(tier: Tier) -> &'static str {
    match tier {
        Tier::Elite => "Elite",
        Tier::Contender => "Contender",
        Tier::Bubble => "Bubble",
        Tier::Longshot => "Longshot",
    }
}

/// Prediction table plus backtest summary as a workbook.
pub fn write_workbook(path: &Path, artifact: &PredictionArtifact) -> Result<()> {
    let mut workbook = Workbook::new();

    let sheet = workbook.add_worksheet();
    sheet.set_name("Predictions")?;
    let headers = [
        "Team", "Season", "Tier", "Strength", "Playoff", "Round 1", "Round 2", "Round 3",
        "Round 4", "Cup", "Cup CI Lo", "Cup CI Hi",
    ];
    for (col, header) in headers.iter().enumerate() {
        sheet.write_string(0, col as u16, *header)?;
    }
    for (i, p) in artifact.predictions.iter().enumerate() {
        let row = (i + 1) as u32;
        sheet.write_string(row, 0, &p.team)?;
        sheet.write_string(row, 1, &p.season)?;
        sheet.write_string(row, 2, tier_label(p.tier))?;
        sheet.write_number(row, 3, p.strength)?;
        sheet.write_number(row, 4, p.playoff_prob)?;
        sheet.write_number(row, 5, p.round1)?;
        sheet.write_number(row, 6, p.round2)?;
        sheet.write_number(row, 7, p.round3)?;
        sheet.write_number(row, 8, p.round4)?;
        sheet.write_number(row, 9, p.cup_prob)?;
        sheet.write_number(row, 10, p.cup_ci_lo)?;
        sheet.write_number(row, 11, p.cup_ci_hi)?;
    }

    if let Some(backtest) = &artifact.backtest {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Backtest")?;
        let headers = [
            "Season", "Teams", "Positives", "Brier", "Log Loss", "Calib Err", "Champion",
            "Champ Rank",
        ];
        for (col, header) in headers.iter().enumerate() {
            sheet.write_string(0, col as u16, *header)?;
        }
        for (i, report) in backtest.seasons.iter().enumerate() {
            let row = (i + 1) as u32;
            sheet.write_string(row, 0, &report.season)?;
            sheet.write_number(row, 1, report.teams as f64)?;
            sheet.write_number(row, 2, report.qualification_positives as f64)?;
            sheet.write_number(row, 3, report.brier)?;
            sheet.write_number(row, 4, report.log_loss)?;
            sheet.write_number(row, 5, report.calibration_error)?;
            if let Some(champion) = &report.champion {
                sheet.write_string(row, 6, champion)?;
            }
            if let Some(rank) = report.champion_rank {
                sheet.write_number(row, 7, rank as f64)?;
            }
        }

        let agg = &backtest.aggregate;
        let base = backtest.seasons.len() as u32 + 2;
        sheet.write_string(base, 0, "Aggregate")?;
        sheet.write_number(base, 1, agg.qualification_samples as f64)?;
        sheet.write_number(base, 2, agg.qualification_positives as f64)?;
        sheet.write_number(base, 3, agg.brier)?;
        sheet.write_number(base, 4, agg.log_loss)?;
        sheet.write_number(base, 5, agg.calibration_error)?;
        for (i, recall) in agg.top_k_recall.iter().enumerate() {
            let row = base + 1 + i as u32;
            sheet.write_string(row, 0, format!("Top-{} recall", recall.k).as_str())?;
            sheet.write_number(row, 1, recall.recall)?;
        }
    }

    workbook.save(path).context("save workbook")?;
    Ok(())
}
