//! CLI module for kubediag
//!
//! Provides commands:
//! - `envs`: List configured environments
//! - `catalog`: Show the actions plans may use
//! - `validate`: Check a plan document against the catalog
//! - `diagnose`: Run a diagnosis against recorded observations

use crate::config::AppConfig;
use crate::fixtures::Recording;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kubediag_core::Catalog;
use kubediag_skills::{SkillCatalog, SkillRegistry};
use kubediag_tools::ToolRegistry;
use std::path::PathBuf;
use std::sync::Arc;

pub mod catalog;
pub mod diagnose;
pub mod validate;

/// Kubernetes diagnosis CLI
#[derive(Parser, Debug)]
#[command(name = "kubediag")]
#[command(about = "Plan-execute diagnosis of Kubernetes workloads")]
#[command(version)]
pub struct Cli {
    /// Emit logs (and reports) as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List configured environments
    Envs,
    /// Show the actions plans may use
    Catalog,
    /// Validate a plan document
    Validate {
        /// Plan document (JSON, optionally fenced)
        #[arg(long)]
        plan: PathBuf,
    },
    /// Diagnose a problem against recorded observations
    Diagnose {
        /// Environment id
        #[arg(long)]
        env: String,
        /// Problem statement
        #[arg(long)]
        problem: String,
        /// Recorded-observation YAML
        #[arg(long)]
        observations: PathBuf,
        /// Run this plan instead of the rule-based planner's
        #[arg(long)]
        plan: Option<PathBuf>,
        /// Hypothesis to test
        #[arg(long)]
        hypothesis: Option<String>,
    },
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let json = cli.json;
    match cli.command {
        Some(Commands::Envs) => catalog::environments(&crate::config::load_config()?),
        Some(Commands::Catalog) => catalog::actions(&crate::config::load_config()?, json),
        Some(Commands::Validate { plan }) => {
            validate::run(&crate::config::load_config()?, &plan, json)
        }
        Some(Commands::Diagnose {
            env,
            problem,
            observations,
            plan,
            hypothesis,
        }) => {
            let args = diagnose::DiagnoseArgs {
                environment: env,
                problem,
                observations,
                plan,
                hypothesis,
                json,
            };
            diagnose::run(crate::config::load_config()?, args).await
        }
        None => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            cmd.print_help()?;
            println!();
            Ok(())
        }
    }
}

/// Build the action catalog, binding recorded observations when given
pub(crate) fn build_catalog(config: &AppConfig, recording: Option<Recording>) -> Result<Arc<Catalog>> {
    let mut tools = ToolRegistry::with_builtins();
    if let Some(recording) = recording {
        recording.bind_all(&mut tools)?;
    }

    let mut skills = SkillCatalog::builtin().context("Built-in skill catalog is invalid")?;
    if let Some(path) = &config.catalog.skills_path {
        let extra = SkillCatalog::from_path(path)
            .with_context(|| format!("Failed to load skills from {}", path.display()))?;
        skills.extend(extra);
    }
    let skills = SkillRegistry::from_catalog(skills, &tools).context("Invalid skill catalog")?;

    Ok(Arc::new(Catalog::new(Arc::new(tools), Arc::new(skills))))
}
