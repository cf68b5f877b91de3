//! `envs` and `catalog` commands

use crate::config::AppConfig;
use anyhow::{Context, Result};
use kubediag_core::EnvironmentRegistry;

/// List configured environments
pub fn environments(config: &AppConfig) -> Result<()> {
    let path = &config.catalog.environments_path;
    let registry = EnvironmentRegistry::from_path(path)
        .with_context(|| format!("Failed to load environments from {}", path.display()))?;

    if registry.is_empty() {
        println!("⚠️  No environments defined in {}", path.display());
        return Ok(());
    }

    println!("🌐 Environments ({})", registry.len());
    for env in registry.list() {
        println!();
        println!("  {} - {}", env.name, env.display_name);
        println!("     context:    {}", env.connection_ref);
        println!("     namespaces: {}", env.namespace_patterns.join(", "));
        if let Some(ns) = &env.default_namespace {
            println!("     default:    {ns}");
        }
        if let Some(description) = &env.description {
            println!("     {description}");
        }
    }
    Ok(())
}

/// Show the actions plans may reference
pub fn actions(config: &AppConfig, json: bool) -> Result<()> {
    let catalog = super::build_catalog(config, None)?;
    let summaries = catalog.summaries();

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    println!("🧰 Actions ({})", summaries.len());
    println!();
    for summary in &summaries {
        let marker = if summary.requires_confirmation { "🔒" } else { "  " };
        println!(
            "  {marker} {:<24} [{}] {}",
            summary.action,
            summary.category.as_str(),
            summary.description
        );
    }
    println!();
    println!("🔒 = requires operator confirmation");
    Ok(())
}
