//! Item and stage-rule commands: `stagewise item`, `stagewise rule`.

use anyhow::Result;

use stagewise::board::models::NewItem;
use stagewise::config::StagewiseConfig;

use super::super::{ItemCommands, RuleCommands};
use super::project::open_board;

pub fn cmd_item(config: &StagewiseConfig, command: ItemCommands) -> Result<()> {
    let db = open_board(config)?;

    match command {
        ItemCommands::Create {
            title,
            stage,
            owner,
            person,
            org,
        } => {
            let item = db.create_item(NewItem {
                title,
                stage_id: stage,
                person_id: person,
                organization_id: org,
                owner_user_id: owner,
            })?;
            println!("Created item {} in stage {}", item.id, item.stage_id);
            for task in db.list_tasks_for_item(item.id)? {
                println!(
                    "  {} task {}: {} (due {})",
                    console::style("+").green(),
                    task.id,
                    task.title,
                    task.due_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        ItemCommands::Move { item_id, stage_id } => {
            let before = db.list_tasks_for_item(item_id)?.len();
            let item = db.move_item(item_id, stage_id)?;
            println!("Item {} is in stage {}", item.id, item.stage_id);
            for task in db.list_tasks_for_item(item_id)?.into_iter().skip(before) {
                println!(
                    "  {} task {}: {} (due {})",
                    console::style("+").green(),
                    task.id,
                    task.title,
                    task.due_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        ItemCommands::Delete { item_id } => {
            db.delete_item(item_id)?;
            println!("Deleted item {}", item_id);
        }
        ItemCommands::History { item_id } => {
            let detail = db.item_detail(item_id)?;
            println!(
                "{} (item {}, owner {})",
                console::style(&detail.item.title).bold(),
                detail.item.id,
                detail.item.owner_user_id
            );
            println!();
            println!("{:<6} {:<18} {:<18} Hours", "Stage", "Entered", "Left");
            for entry in &detail.history {
                let left = entry
                    .left_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| console::style("open").yellow().to_string());
                let hours = entry
                    .duration_hours()
                    .map(|h| format!("{:.2}", h))
                    .unwrap_or_default();
                println!(
                    "{:<6} {:<18} {:<18} {}",
                    entry.stage_id,
                    entry.entered_at.format("%Y-%m-%d %H:%M"),
                    left,
                    hours
                );
            }
            if !detail.tasks.is_empty() {
                println!();
                println!("Tasks:");
                for task in &detail.tasks {
                    println!(
                        "  {} [{}] {} (due {})",
                        task.id,
                        task.status,
                        task.title,
                        task.due_at.format("%Y-%m-%d %H:%M")
                    );
                }
            }
        }
    }

    Ok(())
}

pub fn cmd_rule(config: &StagewiseConfig, command: RuleCommands) -> Result<()> {
    let db = open_board(config)?;

    match command {
        RuleCommands::Set {
            stage_id,
            title,
            offset_days,
        } => {
            let (rule, created) = db.put_rule(stage_id, &title, offset_days)?;
            let verb = if created { "Created" } else { "Updated" };
            println!(
                "{} rule for stage {}: \"{}\" due +{} day(s)",
                verb, rule.stage_id, rule.template_title, rule.offset_days
            );
        }
        RuleCommands::Delete { stage_id } => {
            db.delete_rule(stage_id)?;
            println!("Deleted rule for stage {}", stage_id);
        }
    }

    Ok(())
}
