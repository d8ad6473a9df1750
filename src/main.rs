use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ivrcall::cases::{NewTestCase, TestCaseStore};
use ivrcall::config::{AppConfig, LogFormat};
use ivrcall::runs::RunStore;
use ivrcall::telephony::script;

#[derive(Parser)]
#[command(
    name = "ivrcall",
    about = "Real-call IVR test orchestration and result notification",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + callback endpoints)
    Serve {
        /// Bind address, overrides the config file
        #[arg(long)]
        bind: Option<String>,
    },

    /// Print the call script compiled for a DTMF sequence
    Script {
        /// Comma-separated tones, e.g. 1,4,#
        #[arg(long, value_delimiter = ',')]
        dtmf: Vec<String>,

        /// Leave out the record directive
        #[arg(long)]
        no_record: bool,
    },

    /// Manage test cases
    TestCase {
        #[command(subcommand)]
        action: TestCaseAction,
    },

    /// Inspect test runs
    Run {
        #[command(subcommand)]
        action: RunAction,
    },
}

#[derive(Subcommand)]
enum TestCaseAction {
    /// Add a test case
    Add {
        #[arg(long)]
        name: String,

        /// Destination number, any common format
        #[arg(long)]
        phone: Option<String>,

        /// Comma-separated tones
        #[arg(long, value_delimiter = ',')]
        dtmf: Vec<String>,

        /// User notified about this case's runs
        #[arg(long)]
        owner: Option<i64>,

        #[arg(long)]
        campaign: Option<i64>,

        /// Ring timeout in seconds
        #[arg(long)]
        timeout: Option<u32>,
    },

    /// List all test cases
    List,
}

#[derive(Subcommand)]
enum RunAction {
    /// Print one run and its metrics as JSON
    Show { id: i64 },
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match config.logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::resolve(cli.config.as_deref())?;
    init_tracing(&config);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            tracing::info!(bind = %config.server.bind, "Starting ivrcall daemon");
            ivrcall::serve(config).await?;
        }
        Commands::Script { dtmf, no_record } => {
            let digits: Vec<&str> = dtmf.iter().map(|d| d.trim()).filter(|d| !d.is_empty()).collect();
            println!("{}", script::compile(&digits, !no_record).to_xml());
        }
        Commands::TestCase { action } => {
            let pool = ivrcall::storage::open_pool(&config.database.path)?;
            let cases = TestCaseStore::new(pool);

            match action {
                TestCaseAction::Add {
                    name,
                    phone,
                    dtmf,
                    owner,
                    campaign,
                    timeout,
                } => {
                    let id = cases.insert(&NewTestCase {
                        name: name.clone(),
                        owner_id: owner,
                        campaign_id: campaign,
                        phone_number: phone,
                        dtmf_inputs: dtmf,
                        timeout_seconds: timeout,
                    })?;
                    println!("Test case '{}' added with id {}.", name, id);
                }
                TestCaseAction::List => {
                    let list = cases.list()?;
                    if list.is_empty() {
                        println!("No test cases found.");
                    } else {
                        println!("{:<6} | {:<24} | {:<16} | DTMF", "ID", "Name", "Phone");
                        println!("{:-<6}-|-{:-<24}-|-{:-<16}-|-{:-<12}", "", "", "", "");
                        for c in list {
                            println!(
                                "{:<6} | {:<24} | {:<16} | {}",
                                c.id,
                                c.name,
                                c.phone_number.as_deref().unwrap_or("-"),
                                c.dtmf_inputs.join(",")
                            );
                        }
                    }
                }
            }
        }
        Commands::Run { action } => {
            let pool = ivrcall::storage::open_pool(&config.database.path)?;
            let runs = RunStore::new(pool);

            match action {
                RunAction::Show { id } => {
                    let run = runs
                        .get(id)?
                        .with_context(|| format!("test run {id} not found"))?;
                    let metrics = runs.metrics(id)?;
                    let out = serde_json::json!({ "run": run, "metrics": metrics });
                    println!("{}", serde_json::to_string_pretty(&out)?);
                }
            }
        }
    }

    Ok(())
}
