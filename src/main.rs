use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::debug;
use nuload::config::LoaderConfig;
use nuload::package::PackageRequest;
use nuload::{LoaderSession, Result};
use tokio_util::sync::CancellationToken;

/// nuload - load NuGet packages into memory
///
/// Resolves a package and its dependencies against NuGet v3 feeds, picks the
/// files for the target framework and loads them without touching the disk.
///
/// Examples:
///   nuload install Newtonsoft.Json                 # Highest stable release
///   nuload install Serilog --version "[2.0, 3.0)"  # Highest within a range
///   nuload resolve Microsoft.Extensions.Logging    # Show the install set
#[derive(Parser, Debug)]
#[command(author, version = env!("NULOAD_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to <config dir>/nuload/config.json)
    #[arg(long = "config", short = 'c', value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Feed service index URL, in priority order (overrides the config)
    #[arg(
        long = "source",
        short = 's',
        env = "NULOAD_SOURCES",
        value_delimiter = ',',
        value_name = "URL",
        global = true
    )]
    pub sources: Vec<String>,

    /// Target framework, e.g. net5.0 or netstandard2.0
    #[arg(long = "framework", short = 'f', value_name = "TFM", global = true)]
    pub framework: Option<String>,

    /// Log debug output
    #[arg(long = "verbose", short = 'v', global = true)]
    pub verbose: bool,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Resolve, download and load a package with its dependencies
    Install(PackageArgs),

    /// Print the install set for a package without downloading it
    Resolve(PackageArgs),
}

#[derive(clap::Args, Debug)]
pub struct PackageArgs {
    /// Package id
    #[arg(value_name = "PACKAGE")]
    pub package: String,

    /// Version range, e.g. 1.0, [1.0], [1.0,2.0)
    #[arg(long = "version", value_name = "RANGE")]
    pub version: Option<String>,

    /// Consider prerelease versions
    #[arg(long = "prerelease")]
    pub prerelease: bool,
}

impl PackageArgs {
    fn request(&self) -> PackageRequest {
        let request = PackageRequest::new(self.package.as_str()).prerelease(self.prerelease);
        match &self.version {
            Some(range) => request.version(range.as_str()),
            None => request,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    match run(cli, &cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, cancel: &CancellationToken) -> Result<()> {
    let mut config = LoaderConfig::load(cli.config.as_deref())?.with_sources(cli.sources);
    if let Some(framework) = cli.framework {
        config = config.with_framework(framework);
    }
    let session = LoaderSession::new(&config)?;

    match cli.command {
        Commands::Install(args) => {
            let outcome = session.load(&args.request(), cancel).await?;
            println!("Installed {}", outcome.root);
            for module in &outcome.modules {
                println!("  {}", module);
            }
        }
        Commands::Resolve(args) => {
            for identity in session.resolve_only(&args.request(), cancel).await? {
                println!("{}", identity);
            }
        }
    }
    Ok(())
}
