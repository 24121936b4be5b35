use brisk::{format_error_with_help, BriskError};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cli;

#[derive(Parser)]
#[command(name = "brisk")]
#[command(about = "Bundle JavaScript and TypeScript, fast")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bundle the project into the output directory
    Build {
        /// Config file (default: brisk.yaml found from the current directory upwards)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Minify the output
        #[arg(short, long)]
        minify: bool,
        /// Output directory, overriding `out_dir`
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
    },
    /// Start the dev server with hot module replacement
    Dev {
        /// Config file (default: brisk.yaml found from the current directory upwards)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Port, overriding `dev.port`
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Build { config, minify, out_dir } => cli::build::run(config, minify, out_dir).await,
        Commands::Dev { config, port } => cli::dev::run(config, port).await,
    };

    // Display error with helpful suggestions
    if let Err(e) = result {
        match e.downcast_ref::<BriskError>() {
            Some(brisk_error) => eprintln!("\n{}", format_error_with_help(brisk_error)),
            None => eprintln!("\n❌ Error: {:#}", e),
        }
        std::process::exit(1);
    }

    Ok(())
}
