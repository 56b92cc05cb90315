use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use pxfeed::core::log::init_logging;
use pxfeed::core::price::Interval;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl From<Commands> for pxfeed::AppCommand {
    fn from(cmd: Commands) -> pxfeed::AppCommand {
        match cmd {
            Commands::Serve { listen } => pxfeed::AppCommand::Serve { listen },
            Commands::Prices { ids, currency } => pxfeed::AppCommand::Prices { ids, currency },
            Commands::History {
                id,
                currency,
                days,
                interval,
                debug,
            } => pxfeed::AppCommand::History {
                id,
                currency,
                days,
                interval,
                debug,
            },
            Commands::Risk {
                ids,
                values,
                currency,
                days,
            } => pxfeed::AppCommand::Risk {
                ids,
                values,
                currency,
                days,
            },
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Serve the HTTP API
    Serve {
        /// Address to listen on, overrides the config
        #[arg(short, long)]
        listen: Option<String>,
    },
    /// Show consensus prices
    Prices {
        /// Asset ids or ticker symbols
        #[arg(required = true, value_delimiter = ',')]
        ids: Vec<String>,
        #[arg(long)]
        currency: Option<String>,
    },
    /// Show a historical price series
    History {
        id: String,
        #[arg(long)]
        currency: Option<String>,
        #[arg(short, long, default_value_t = 30, value_parser = clap::value_parser!(u32).range(1..=365))]
        days: u32,
        #[arg(short, long, default_value = "daily")]
        interval: Interval,
        /// Show the fallback stages tried
        #[arg(long)]
        debug: bool,
    },
    /// Score portfolio risk
    Risk {
        /// Asset ids or ticker symbols
        #[arg(long, required = true, value_delimiter = ',')]
        ids: Vec<String>,
        /// Position values, one per id
        #[arg(long, required = true, value_delimiter = ',')]
        values: Vec<f64>,
        #[arg(long)]
        currency: Option<String>,
        #[arg(short, long, default_value_t = 30, value_parser = clap::value_parser!(u32).range(1..=365))]
        days: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => pxfeed::cli::setup::setup(),
        Some(cmd) => pxfeed::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
