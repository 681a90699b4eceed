use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(name = "snipbox")]
#[clap(version, about = "Run page script snippets in a monitored sandbox")]
#[clap(propagate_version = true)]
pub struct Cli {
    #[clap(flatten)]
    pub global_opts: GlobalOpts,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug)]
pub struct GlobalOpts {
    /// Configuration file path
    #[clap(short, long, global = true, env = "SNIPBOX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[clap(long, global = true, default_value = "text", value_enum)]
    pub format: OutputFormat,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute one snippet
    Run(RunArgs),

    /// Validate a snippet without executing it
    Check(CheckArgs),

    /// Test a URL against a trigger pattern
    Match(MatchArgs),

    /// Run every on-load snippet matching a URL
    Autorun(AutorunArgs),

    /// Initialize a new snipbox configuration
    Init(InitArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

// ============================================================================
// Execution Commands
// ============================================================================

/// Snippet source: a file, or inline code with --eval.
#[derive(Args, Debug)]
pub struct SourceArgs {
    /// Snippet file
    pub file: Option<PathBuf>,

    /// Inline snippet code
    #[clap(long = "eval", short = 'e', conflicts_with = "file")]
    pub eval: Option<String>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[clap(flatten)]
    pub source: SourceArgs,

    /// Execution id (generated if not provided)
    #[clap(long)]
    pub id: Option<String>,

    /// Timeout override in milliseconds
    #[clap(long)]
    pub timeout_ms: Option<u64>,

    /// Page location reported in error logs
    #[clap(long)]
    pub url: Option<String>,
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    #[clap(flatten)]
    pub source: SourceArgs,
}

#[derive(Args, Debug)]
pub struct MatchArgs {
    /// Location to test
    pub url: String,

    /// Trigger pattern (empty, *, *.domain, regex or substring)
    pub pattern: String,
}

#[derive(Args, Debug)]
pub struct AutorunArgs {
    /// JSON file with an array of snippets
    #[clap(long, short = 's')]
    pub snippets: PathBuf,

    /// Current page location
    #[clap(long)]
    pub url: String,

    /// Write the structured console report to this file
    #[clap(long)]
    pub export: Option<PathBuf>,
}

// ============================================================================
// Config Commands
// ============================================================================

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Force overwrite existing configuration
    #[clap(short, long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[clap(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Show configuration file path
    Path,
}

#[derive(Debug, Clone, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
