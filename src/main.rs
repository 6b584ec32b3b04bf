// SPDX-License-Identifier: MIT

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use nodeflow::flow::config::EngineConfig;
use nodeflow::flow::engine::{Engine, ExecutionStatus};
use nodeflow::flow::server;
use nodeflow::flow::workflow::loader::WorkflowLoader;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the engine configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the HTTP API
    Serve {
        /// Port to listen on, overrides the configuration
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run a workflow file to completion and print the execution
    Run {
        /// Path to the workflow file
        #[arg(short, long)]
        file: PathBuf,

        /// Trigger data as JSON
        #[arg(short, long)]
        input: Option<String>,
    },
    /// Validate a workflow file
    Validate {
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Print the execution order of a workflow file
    Plan {
        #[arg(short, long)]
        file: PathBuf,
    },
    /// List the available node types
    NodeTypes,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let mut config = EngineConfig::load(args.config.as_deref())?;

    match args.command {
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            let addr = config.server.bind_addr();
            let engine = Engine::from_config(config).await?;

            let pruned = engine.prune_expired().await?;
            if pruned > 0 {
                log::info!("Pruned {} expired executions", pruned);
            }

            server::serve(engine, &addr).await?;
        }
        Commands::Run { file, input } => {
            let trigger_data: Value = match input {
                Some(input) => serde_json::from_str(&input).context("--input is not valid JSON")?,
                None => json!({}),
            };
            let def = WorkflowLoader::new().load_workflow(&file)?;
            let engine = Engine::from_config(config).await?;

            let execution_id = engine
                .start_definition(Arc::new(def), trigger_data, None)
                .await?;
            let execution = tokio::select! {
                execution = engine.wait_for(&execution_id) => execution?,
                _ = tokio::signal::ctrl_c() => {
                    log::warn!("Interrupted, canceling execution {}", execution_id);
                    engine.cancel_run(&execution_id).await?;
                    engine.wait_for(&execution_id).await?
                }
            };

            println!("{}", serde_json::to_string_pretty(&execution)?);
            if execution.status != ExecutionStatus::Success {
                bail!(
                    "Execution {} finished with status {}",
                    execution.id,
                    execution.status
                );
            }
        }
        Commands::Validate { file } => {
            let def = WorkflowLoader::new().load_workflow(&file)?;
            let engine = Engine::from_config(config).await?;

            let result = engine.validate(&def).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.is_valid() {
                bail!("Workflow '{}' is invalid", def.key());
            }
        }
        Commands::Plan { file } => {
            let def = WorkflowLoader::new().load_workflow(&file)?;
            let engine = Engine::from_config(config).await?;

            let plan = engine.plan(&def)?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        Commands::NodeTypes => {
            let engine = Engine::from_config(config).await?;
            let groups = engine.registry().describe().await;
            println!("{}", serde_json::to_string_pretty(&groups)?);
        }
    }

    Ok(())
}
