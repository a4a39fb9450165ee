use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use game_vision::cua::{CuaClient, CuaClientConfig};
use game_vision::{
    MockAgent, MockCapture, MockSession, RunSession, ServiceContainer, TestResult,
    default_registry, validate_str,
};

/// Game Vision - Automated behavioral testing for interactive web games
#[derive(Parser, Debug)]
#[command(
    name = "game-vision",
    about = "Automated behavioral testing for interactive web games with hybrid DOM/AI execution",
    after_help = "ENVIRONMENT VARIABLES:\n\
        GAME_VISION_CUA_ENDPOINT   Computer-use agent API endpoint URL\n\
        GAME_VISION_CUA_MODEL      Computer-use agent model name\n\
        GAME_VISION_CUA_MAX_STEPS  Max agent steps per delegated action\n\
        GAME_VISION_RUN_DIR        Base directory for run artifacts"
)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a test spec against the built-in mock session
    ///
    /// Real browser sessions are wired programmatically through
    /// ServiceContainer; this command exercises the full engine against the
    /// in-process mock collaborators, which makes it a spec dry-runner.
    Run {
        /// Path to the test spec JSON file
        #[arg(short, long)]
        spec: PathBuf,

        /// Output directory for run artifacts (default: auto-generated)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Keep artifacts after completion (default: cleanup unless --output is specified)
        #[arg(long, short = 'k')]
        keep: bool,

        /// Abort the remaining sequence on any fatal step failure
        #[arg(long)]
        halt_on_failure: bool,

        /// Use the scripted mock agent instead of the HTTP agent client
        #[arg(long)]
        mock_agent: bool,

        /// Computer-use agent endpoint URL
        #[arg(long, env = "GAME_VISION_CUA_ENDPOINT")]
        cua_endpoint: Option<String>,

        /// Output the result document as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a test spec and report errors and warnings
    Validate {
        /// Path to the test spec JSON file
        #[arg(short, long)]
        spec: PathBuf,
    },

    /// List the default registry's action types
    Actions,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("game_vision=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Some(Commands::Run {
            spec,
            output,
            keep,
            halt_on_failure,
            mock_agent,
            cua_endpoint,
            json,
        }) => {
            let raw = std::fs::read_to_string(&spec)?;
            let validated = match validate_str(&raw) {
                Ok(validated) => validated,
                Err(e) => {
                    eprintln!("Spec validation failed:");
                    for issue in &e.issues {
                        eprintln!("  error: {}", issue);
                    }
                    return Err("invalid test spec".into());
                }
            };
            for warning in &validated.warnings {
                eprintln!("Warning: {}", warning);
            }

            let spec_name = spec
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "run".to_string());
            let artifacts = if let Some(ref dir) = output {
                RunSession::in_dir(dir).keep(true)
            } else {
                RunSession::with_name(&spec_name).keep(keep)
            };
            artifacts.init()?;
            let artifacts = Arc::new(artifacts);

            let mut container = ServiceContainer::new(
                Arc::new(MockSession::new()),
                Arc::new(MockCapture::default()),
            );
            if validated.spec.needs_computer_use() {
                if mock_agent {
                    container = container.with_agent(Arc::new(MockAgent::new()));
                } else {
                    let client_config = match cua_endpoint {
                        Some(endpoint) => CuaClientConfig::new(endpoint),
                        None => CuaClientConfig::default(),
                    };
                    container = container.with_agent(Arc::new(CuaClient::new(client_config)));
                }
            }

            let orchestrator = container
                .build(validated.spec, artifacts.clone())
                .await?
                .halt_on_failure(halt_on_failure);
            let result = orchestrator.run().await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_summary(&result);
                if artifacts.keep {
                    println!("\nRun artifacts: {}", artifacts.dir.display());
                }
            }

            if !result.success {
                return Err("test run failed".into());
            }
        }

        Some(Commands::Validate { spec }) => {
            let raw = std::fs::read_to_string(&spec)?;
            match validate_str(&raw) {
                Ok(validated) => {
                    for warning in &validated.warnings {
                        println!("warning: {}", warning);
                    }
                    println!(
                        "OK: {} step(s), retries={}, total budget {}ms",
                        validated.spec.sequence.len(),
                        validated.spec.retries,
                        validated.spec.timeouts.total
                    );
                }
                Err(e) => {
                    for issue in &e.issues {
                        println!("error: {}", issue);
                    }
                    return Err(format!("{} issue(s) found", e.issues.len()).into());
                }
            }
        }

        Some(Commands::Actions) => {
            for action_type in default_registry().action_types() {
                println!("{}", action_type);
            }
        }

        None => {
            println!("Game Vision - Automated behavioral testing for interactive web games");
            println!();
            println!("Usage: game-vision <COMMAND>");
            println!();
            println!("Commands:");
            println!("  run       Execute a test spec against the built-in mock session");
            println!("  validate  Validate a test spec and report errors and warnings");
            println!("  actions   List the default registry's action types");
            println!();
            println!("Run with --help for more information.");
        }
    }

    Ok(())
}

fn print_summary(result: &TestResult) {
    println!(
        "Run {}: {} step(s) ({} dom, {} cua, {} none)",
        if result.success { "succeeded" } else { "FAILED" },
        result.action_timings.len(),
        result.action_methods.dom,
        result.action_methods.cua,
        result.action_methods.none,
    );
    for timing in &result.action_timings {
        let status = if timing.succeeded { "ok" } else { "failed" };
        print!(
            "  [{}] {} {} via {} in {}ms",
            timing.action_index,
            timing.action_type,
            status,
            timing.method.as_str(),
            timing.duration_ms
        );
        match &timing.error {
            Some(error) => println!(" - {}", error),
            None => println!(),
        }
    }
    if let Some(error) = &result.error {
        println!("  error: {}", error);
    }
    for eval in &result.evaluation_progress {
        if let Some(score) = eval.score {
            println!("  evaluation[{}]: {} (score {:.2})", eval.step_type, eval.status, score);
        }
    }
}
