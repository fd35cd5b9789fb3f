//! Pipeline and stage commands: `stagewise pipeline`, `stagewise stage`.

use anyhow::Result;

use stagewise::config::StagewiseConfig;

use super::super::{PipelineCommands, StageCommands};
use super::project::open_board;

pub fn cmd_pipeline(config: &StagewiseConfig, command: PipelineCommands) -> Result<()> {
    let db = open_board(config)?;

    match command {
        PipelineCommands::Create { name, stages } => {
            let created = db.create_pipeline(&name, &stages)?;
            println!(
                "Created pipeline {} ({}) with {} stage(s)",
                created.pipeline.id,
                console::style(&created.pipeline.name).bold(),
                created.stages.len()
            );
            for stage in &created.stages {
                println!("  {:<4} {:<6} {}", stage.order, stage.id, stage.name);
            }
        }
        PipelineCommands::List => {
            let pipelines = db.list_pipelines()?;
            if pipelines.is_empty() {
                println!("No pipelines yet. Create one with `stagewise pipeline create`.");
                return Ok(());
            }
            println!("{:<6} {:<30} Created", "ID", "Name");
            println!("{:<6} {:<30} -------", "------", "------------------------------");
            for pipeline in pipelines {
                println!(
                    "{:<6} {:<30} {}",
                    pipeline.id,
                    pipeline.name,
                    pipeline.created_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        PipelineCommands::Show { id } => {
            let pipeline = db.get_pipeline_with_stages(id)?;
            let items = db.list_items(id)?;
            println!(
                "{} (pipeline {})",
                console::style(&pipeline.pipeline.name).bold().cyan(),
                pipeline.pipeline.id
            );
            println!();
            println!("{:<6} {:<6} {:<24} {:<6} Rule", "Order", "ID", "Stage", "Items");
            for stage in &pipeline.stages {
                let count = items.iter().filter(|i| i.stage_id == stage.id).count();
                let rule = match db.get_rule(stage.id)? {
                    Some(rule) => format!("\"{}\" +{}d", rule.template_title, rule.offset_days),
                    None => console::style("-").dim().to_string(),
                };
                println!(
                    "{:<6} {:<6} {:<24} {:<6} {}",
                    stage.order, stage.id, stage.name, count, rule
                );
            }
        }
    }

    Ok(())
}

pub fn cmd_stage(config: &StagewiseConfig, command: StageCommands) -> Result<()> {
    let db = open_board(config)?;

    match command {
        StageCommands::Add {
            pipeline_id,
            name,
            position,
        } => {
            let stage = db.add_stage(pipeline_id, &name, position)?;
            println!(
                "Added stage {} ({}) at position {}",
                stage.id, stage.name, stage.order
            );
        }
        StageCommands::Rename { stage_id, name } => {
            let stage = db.rename_stage(stage_id, &name)?;
            println!("Renamed stage {} to {}", stage.id, stage.name);
        }
        StageCommands::Delete { stage_id } => {
            db.delete_stage(stage_id)?;
            println!("Deleted stage {}", stage_id);
        }
    }

    Ok(())
}
