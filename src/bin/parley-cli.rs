//! Parley CLI - Command-line front end for the interaction engine
//!
//! Loads a JSON document, builds it against the global plugin catalog and
//! runs, inspects or validates it.

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use parley::data::NodeList;
use parley::matcher::{MatchOutcome, try_validate};
use parley::plugin::PluginCatalog;
use parley::runtime::{Engine, EngineConfig, StepReport, load_config};
use parley::script::Document;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Scriptable, step-controllable protocol interaction harness", long_about = None)]
struct Cli {
    /// JSON configuration file layered under the document's engine settings
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a document
    Run {
        /// Document file (JSON node list)
        document: PathBuf,

        /// Execute this many interactions one at a time instead of running freely
        #[arg(short, long)]
        steps: Option<u64>,

        /// Override the number of full passes of a free run
        #[arg(short, long)]
        repeat: Option<u64>,

        /// Write logs to this file instead of stderr
        #[arg(long)]
        log_file: Option<PathBuf>,
    },

    /// List registered plugins
    Plugins,

    /// Build a document and print its endpoints and interactions
    Validate {
        /// Document file (JSON node list)
        document: PathBuf,
    },

    /// Match an expected pattern file against an actual content file
    Match {
        /// Expected pattern (JSON node list)
        expected: PathBuf,

        /// Actual content (JSON node list)
        actual: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            document,
            steps,
            repeat,
            log_file,
        } => {
            let registry = PluginCatalog::global().snapshot();
            let document = Document::build(&read_nodes(&document)?, &registry)?;

            let mut config = base_config(cli.config.as_deref())?;
            config.apply_document(document.engine())?;
            if let Some(repeat) = repeat {
                config.repeat_count = repeat;
            }
            if log_file.is_some() {
                config.log_file = log_file;
            }
            init_tracing(config.log_file.as_deref())?;

            let engine = Engine::with_config(document, &registry, config)?;
            let printer = {
                let mut reports = engine.subscribe();
                tokio::spawn(async move {
                    loop {
                        match reports.recv().await {
                            Ok(report) => print_report(&report),
                            Err(RecvError::Lagged(missed)) => {
                                println!("... {missed} report(s) skipped");
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }
                })
            };

            match steps {
                Some(count) => {
                    for _ in 0..count {
                        engine.step().await?;
                        engine.wait_until_idle().await;
                    }
                }
                None => {
                    engine.start().await?;
                    tokio::select! {
                        _ = engine.wait_until_idle() => {}
                        _ = tokio::signal::ctrl_c() => {
                            println!("Interrupted, stopping after the current interaction");
                            engine.stop().await;
                        }
                    }
                }
            }

            engine.shutdown().await;
            printer.abort();

            let status = engine.status();
            let reports = engine.reports();
            let failed = reports.iter().filter(|report| !report.passed()).count();
            println!(
                "Finished at pass {}, step {}: {} interaction(s), {} failed",
                status.flow_index,
                status.step_index,
                reports.len(),
                failed
            );
            if failed > 0 {
                bail!("{failed} interaction(s) failed");
            }
        }

        Commands::Plugins => {
            init_tracing(None)?;
            let catalogue = PluginCatalog::global().snapshot().catalogue();
            println!("Endpoint plugins:");
            for id in &catalogue.endpoints {
                println!("  {id}");
            }
            println!("Command plugins:");
            for id in &catalogue.commands {
                println!("  {id}");
            }
        }

        Commands::Validate { document } => {
            init_tracing(None)?;
            let registry = PluginCatalog::global().snapshot();
            let document = Document::build(&read_nodes(&document)?, &registry)?;

            let mut config = base_config(cli.config.as_deref())?;
            config.apply_document(document.engine())?;

            println!("Engine: {}", document.engine().name);
            println!("Endpoints:");
            for decl in document.endpoints() {
                println!("  {} ({})", decl.name, decl.plugin_id);
            }
            println!("Interactions:");
            for (index, action) in document.actions().iter().enumerate() {
                println!("  {:>3}. {action}", index + 1);
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&config.to_node(&document.engine().name))?
            );
        }

        Commands::Match { expected, actual } => {
            init_tracing(None)?;
            let expected = read_nodes(&expected)?;
            let actual = read_nodes(&actual)?;
            match try_validate(&expected, &actual) {
                MatchOutcome::Matched { consumed } => {
                    println!("Matched ({consumed} node(s) consumed)");
                }
                MatchOutcome::Failed(err) => bail!("no match: {err}"),
            }
        }
    }

    Ok(())
}

fn read_nodes(path: &Path) -> anyhow::Result<NodeList> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn base_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => load_config(path).with_context(|| format!("loading {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

fn print_report(report: &StepReport) {
    let verdict = if report.passed() { "ok" } else { "FAILED" };
    println!(
        "[{}.{}] {} ... {} ({} ms)",
        report.flow_index,
        report.step_index,
        report.action,
        verdict,
        report.elapsed.as_millis()
    );
    for failure in &report.failures {
        println!("    {:?} {:?}: {}", failure.severity, failure.kind, failure.message);
    }
}
