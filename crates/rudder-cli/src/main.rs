//! Rudder CLI - declarative release orchestrator for Kubernetes

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;
mod display;
mod error;
mod exit_codes;
mod util;

use commands::Session;
use error::Result;

#[derive(Parser)]
#[command(name = "rudder")]
#[command(author = "Rudder Contributors")]
#[command(version)]
#[command(about = "Declarative release orchestrator for Kubernetes", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Release ledger directory
    #[arg(long, global = true, env = "RUDDER_STORE")]
    store: Option<PathBuf>,

    /// Configuration file
    #[arg(long, global = true, env = "RUDDER_CONFIG")]
    config: Option<PathBuf>,

    /// Namespace for resources that do not set one
    #[arg(short, long, global = true)]
    namespace: Option<String>,
}

/// Value overlays, applied in order: files first, then --set
#[derive(Args, Debug)]
struct ValuesArgs {
    /// Values file(s) to merge
    #[arg(short = 'f', long = "values")]
    values: Vec<PathBuf>,

    /// Set values on command line (key=value)
    #[arg(long = "set")]
    set: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new chart
    Create {
        /// Chart name
        name: String,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Render chart templates locally
    Template {
        /// Release name (for template context)
        name: String,

        /// Chart path
        chart: PathBuf,

        #[command(flatten)]
        values: ValuesArgs,

        /// Show only templates whose id contains this text
        #[arg(short = 's', long)]
        show_only: Option<String>,

        /// Show resolved values
        #[arg(long)]
        show_values: bool,
    },

    /// Install a chart as a new release
    Install {
        /// Release name
        name: String,

        /// Chart path
        chart: PathBuf,

        #[command(flatten)]
        values: ValuesArgs,

        /// Render and plan without touching the cluster or the ledger
        #[arg(long)]
        dry_run: bool,

        /// Description recorded on the revision
        #[arg(long)]
        description: Option<String>,
    },

    /// Upgrade a release to a new chart or values
    Upgrade {
        /// Release name
        name: String,

        /// Chart path
        chart: PathBuf,

        #[command(flatten)]
        values: ValuesArgs,

        /// Install if the release does not exist
        #[arg(short, long)]
        install: bool,

        /// Start from the deployed revision's values instead of the chart defaults
        #[arg(long)]
        reuse_values: bool,

        #[arg(long)]
        dry_run: bool,

        #[arg(long)]
        description: Option<String>,
    },

    /// Roll a release back to an earlier revision
    Rollback {
        /// Release name
        name: String,

        /// Revision to restore (defaults to the previous one)
        revision: Option<u32>,

        #[arg(long)]
        dry_run: bool,

        #[arg(long)]
        description: Option<String>,
    },

    /// Delete every resource of a release
    Uninstall {
        /// Release name
        name: String,

        #[arg(long)]
        dry_run: bool,
    },

    /// List recorded releases
    List,

    /// Show the revisions of a release
    History {
        /// Release name
        name: String,

        /// Only the most recent revisions
        #[arg(long)]
        max: Option<usize>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the latest revision of a release
    Status {
        /// Release name
        name: String,

        /// Compare recorded manifests with the live cluster
        #[arg(long)]
        drift: bool,

        /// Show resolved values
        #[arg(long)]
        show_values: bool,

        #[arg(long)]
        json: bool,
    },

    /// Show manifest changes between two revisions
    Diff {
        /// Release name
        name: String,

        /// Old revision
        from: u32,

        /// New revision
        to: u32,
    },
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let session = || Session::load(cli.config.as_deref(), cli.store.clone(), cli.namespace.clone());

    match cli.command {
        Commands::Create { ref name, ref output } => commands::create::run(name, output),

        Commands::Template {
            ref name,
            ref chart,
            ref values,
            ref show_only,
            show_values,
        } => commands::template::run(
            &session()?,
            name,
            chart,
            &commands::overlays(&values.values, &values.set),
            show_only.as_deref(),
            show_values,
        ),

        Commands::Install {
            ref name,
            ref chart,
            ref values,
            dry_run,
            ref description,
        } => {
            commands::install::run(
                &session()?,
                name,
                chart,
                &commands::overlays(&values.values, &values.set),
                dry_run,
                description.clone(),
            )
            .await
        }

        Commands::Upgrade {
            ref name,
            ref chart,
            ref values,
            install,
            reuse_values,
            dry_run,
            ref description,
        } => {
            commands::upgrade::run(
                &session()?,
                name,
                chart,
                &commands::overlays(&values.values, &values.set),
                commands::upgrade::Flags {
                    install,
                    reuse_values,
                    dry_run,
                },
                description.clone(),
            )
            .await
        }

        Commands::Rollback {
            ref name,
            revision,
            dry_run,
            ref description,
        } => commands::rollback::run(&session()?, name, revision, dry_run, description.clone()).await,

        Commands::Uninstall { ref name, dry_run } => {
            commands::uninstall::run(&session()?, name, dry_run).await
        }

        Commands::List => commands::list::run(&session()?).await,

        Commands::History {
            ref name,
            max,
            json,
        } => commands::history::run(&session()?, name, max, json).await,

        Commands::Status {
            ref name,
            drift,
            show_values,
            json,
        } => commands::status::run(&session()?, name, drift, show_values, json).await,

        Commands::Diff { ref name, from, to } => {
            commands::diff::run(&session()?, name, from, to).await
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Setup miette for nice error display
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.debug);

    match run(cli).await {
        Ok(()) => ExitCode::from(exit_codes::SUCCESS as u8),
        Err(err) => {
            let code = err.exit_code();
            eprintln!("{:?}", miette::Report::new(err));
            ExitCode::from(code as u8)
        }
    }
}
