//! Trellis CLI - render visual CMS content documents.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
mod config;

use commands::render::OutputFormat;
use config::Config;

#[derive(Parser)]
#[command(name = "trellis")]
#[command(about = "Render visual CMS content documents")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to trellis.toml config file
    #[arg(short, long, default_value = "trellis.toml", global = true)]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a config file and a sample content document
    Init {
        /// Overwrite existing files
        #[arg(short, long)]
        yes: bool,
    },

    /// Render one content document
    Render {
        /// Content document (JSON)
        file: PathBuf,

        /// JSON file with initial state
        #[arg(long)]
        state: Option<PathBuf>,

        /// JSON file with targeting attributes
        #[arg(long)]
        attrs: Option<PathBuf>,

        /// Locale for localized values
        #[arg(long)]
        locale: Option<String>,

        #[arg(short, long, value_enum, default_value = "html")]
        format: OutputFormat,
    },

    /// Build a static site from the content directory
    Build {
        /// Output directory (defaults to config or "dist")
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Start the live-edit preview server
    Dev {
        /// Port to listen on (defaults to config or 7777)
        #[arg(short, long)]
        port: Option<u16>,

        /// Do not open browser
        #[arg(long)]
        no_open: bool,
    },

    /// Serve a built site
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "4000")]
        port: u16,

        /// Directory to serve (defaults to the build output)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    // Render output goes to stdout
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init { yes } => {
            commands::init::run(&cli.config, yes).await?;
        }
        Commands::Render {
            file,
            state,
            attrs,
            locale,
            format,
        } => {
            let config = Config::load(&cli.config)?;
            let args = commands::render::RenderArgs {
                file,
                state,
                attrs,
                locale,
                format,
            };
            commands::render::run(&config, args).await?;
        }
        Commands::Build { output } => {
            let config = Config::load(&cli.config)?;
            commands::build::run(&config, output).await?;
        }
        Commands::Dev { port, no_open } => {
            let config = Config::load(&cli.config)?;
            commands::dev::run(&config, port, !no_open).await?;
        }
        Commands::Serve { port, dir } => {
            let config = Config::load(&cli.config)?;
            let dir = dir.unwrap_or_else(|| config.build.output.clone());
            commands::serve::run(port, dir).await?;
        }
    }

    Ok(())
}
