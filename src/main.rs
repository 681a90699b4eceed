use clap::Parser;

use snipbox::cli::args::{Cli, Commands};
use snipbox::cli::commands;
use snipbox::config::load_config;
use snipbox::error::Result;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.global_opts.verbose);

    match dispatch(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(if e.is_user_error() { 2 } else { 1 });
        }
    }
}

/// Run the selected subcommand. `Ok(false)` means the work itself failed.
async fn dispatch(cli: Cli) -> Result<bool> {
    // Load configuration (file + CLI overrides)
    let config = load_config(cli.global_opts.config.as_deref())?;
    let format = cli.global_opts.format.clone();

    match cli.command {
        Commands::Run(args) => commands::run(args, config, format).await,
        Commands::Check(args) => commands::check(args, config, format).await,
        Commands::Match(args) => commands::match_url(args, format).await,
        Commands::Autorun(args) => commands::autorun(args, config, format).await,
        Commands::Init(args) => commands::init(args).await.map(|_| true),
        Commands::Config(args) => commands::config(args, config).await.map(|_| true),
    }
}

fn init_logging(verbosity: u8) {
    use tracing_subscriber::EnvFilter;

    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
