//! `validate` command

use crate::config::AppConfig;
use anyhow::{bail, Context, Result};
use kubediag_core::{parse_plan_document, validate};
use std::path::Path;

/// Validate a plan document and print its execution order
pub fn run(config: &AppConfig, path: &Path, json: bool) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan from {}", path.display()))?;
    let plan = parse_plan_document(&text)?;
    let catalog = super::build_catalog(config, None)?;

    let validated = match validate(plan, &catalog) {
        Ok(validated) => validated,
        Err(e) => {
            println!("❌ Plan rejected: {e}");
            bail!("plan {} is invalid", path.display());
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(validated.order())?);
        return Ok(());
    }

    println!("✅ Plan is valid ({} steps)", validated.len());
    println!();
    for (position, step) in validated.steps_in_order().enumerate() {
        let confirm = validated
            .action(step.step_id)
            .is_some_and(|a| a.requires_confirmation);
        println!(
            "  {}. step {} {}{}",
            position + 1,
            step.step_id,
            step.action,
            if confirm { "  🔒" } else { "" }
        );
        if !step.depends_on.is_empty() {
            println!("       after {:?}", step.depends_on);
        }
    }
    Ok(())
}
