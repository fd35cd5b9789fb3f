//! Analytics commands: `stagewise report`, `stagewise velocity`.

use anyhow::{Context, Result};

use stagewise::config::StagewiseConfig;

use super::project::open_board;

fn hours(value: Option<f64>) -> String {
    value
        .map(|h| format!("{:.2}h", h))
        .unwrap_or_else(|| console::style("n/a").dim().to_string())
}

pub fn cmd_report(config: &StagewiseConfig, pipeline_id: i64, json: bool) -> Result<()> {
    let db = open_board(config)?;
    let report = db.get_pipeline_report(pipeline_id)?;

    if json {
        let out = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
        println!("{}", out);
        return Ok(());
    }

    println!(
        "{} report ({})",
        console::style(&report.pipeline.name).bold().cyan(),
        report.generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    println!();
    for stage in &report.stages {
        println!(
            "{}  items: {}  avg time in stage: {}",
            console::style(&stage.stage.name).bold(),
            stage.current_item_count,
            hours(stage.average_time_in_stage)
        );
        for dwell in &stage.items {
            println!(
                "    {:<6} {:<30} {:.2}h",
                dwell.item.id, dwell.item.title, dwell.time_in_stage
            );
        }
    }

    Ok(())
}

pub fn cmd_velocity(config: &StagewiseConfig, json: bool) -> Result<()> {
    let db = open_board(config)?;
    let report = db.get_pipeline_velocity_report()?;

    if json {
        let out =
            serde_json::to_string_pretty(&report).context("Failed to serialize velocity report")?;
        println!("{}", out);
        return Ok(());
    }

    if report.is_empty() {
        println!("No pipelines yet.");
        return Ok(());
    }
    println!("{:<6} {:<30} {:<8} Avg stage visit", "ID", "Pipeline", "Items");
    for row in &report {
        println!(
            "{:<6} {:<30} {:<8} {}",
            row.pipeline_id,
            row.pipeline_name,
            row.total_items,
            hours(row.avg_time_in_pipeline)
        );
    }
    println!();
    println!(
        "{}",
        console::style("Averages pool every closed stage visit, not whole-pipeline lifetimes.").dim()
    );

    Ok(())
}
