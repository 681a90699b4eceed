use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::cli::args::{
    AutorunArgs, CheckArgs, ConfigAction, ConfigArgs, InitArgs, MatchArgs, OutputFormat,
    RunArgs, SourceArgs,
};
use crate::config::{get_config_path, SnipboxConfig};
use crate::console::{ConsoleMessage, ConsoleSink};
use crate::error::{Result, SnipboxError};
use crate::host::NodeContext;
use crate::pattern;
use crate::sandbox::{
    validate_code, ExecutionContext, ExecutionRequest, ExecutionResult, ExecutionSandbox,
    SandboxOptions,
};
use crate::scheduler::AutoRunScheduler;
use crate::snippet::load_snippets;

// ============================================================================
// Execution Commands
// ============================================================================

/// Execute one snippet in the node host. Returns whether it succeeded.
pub async fn run(args: RunArgs, config: SnipboxConfig, format: OutputFormat) -> Result<bool> {
    let code = read_source(&args.source)?;
    info!(id = ?args.id, "Running snippet");

    let mut context = NodeContext::new(&config.runtime);
    context.check_available().await?;
    if let Some(url) = args.url {
        context = context.with_location(url);
    }

    let sink = Arc::new(ConsoleSink::from_config(&config.console));
    attach_live_output(&sink, &format);
    let sandbox = ExecutionSandbox::new(sink, SandboxOptions::from(&config.sandbox));

    let mut options = sandbox.options().clone();
    if let Some(timeout_ms) = args.timeout_ms {
        options.timeout = Duration::from_millis(timeout_ms);
    }

    let request = ExecutionRequest {
        code: &code,
        execution_id: args.id.as_deref(),
        snippet_name: None,
        options: Some(&options),
    };
    let context: &dyn ExecutionContext = &context;
    let result = sandbox.execute(request, Some(context)).await;

    output_result(&result, &format)?;
    Ok(result.success)
}

/// Validate a snippet without executing it. Returns whether it is valid.
pub async fn check(args: CheckArgs, config: SnipboxConfig, format: OutputFormat) -> Result<bool> {
    let code = read_source(&args.source)?;
    let report = validate_code(&code, config.sandbox.max_code_size);

    match format {
        OutputFormat::Text => {
            if report.is_valid {
                println!("OK");
            }
            for error in &report.errors {
                println!("error: {}", error);
            }
            for warning in &report.warnings {
                println!("warning: {}", warning);
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(report.is_valid)
}

/// Test a URL against a trigger pattern. Returns whether it matched.
pub async fn match_url(args: MatchArgs, format: OutputFormat) -> Result<bool> {
    let matched = pattern::matches(&args.url, &args.pattern);
    let kind = pattern::classify(&args.pattern);

    match format {
        OutputFormat::Text => {
            println!(
                "{} ({} pattern)",
                if matched { "match" } else { "no match" },
                kind.as_str()
            );
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "url": args.url,
                    "pattern": args.pattern,
                    "kind": kind.as_str(),
                    "matched": matched,
                })
            );
        }
    }

    Ok(matched)
}

/// Run every on-load snippet matching a URL. Returns whether all succeeded.
pub async fn autorun(args: AutorunArgs, config: SnipboxConfig, format: OutputFormat) -> Result<bool> {
    let snippets = load_snippets(&args.snippets)?;
    info!(count = snippets.len(), url = %args.url, "Auto-running snippets");

    let context = NodeContext::new(&config.runtime).with_location(args.url.clone());
    context.check_available().await?;

    let sink = Arc::new(ConsoleSink::from_config(&config.console));
    attach_live_output(&sink, &format);
    let sandbox = Arc::new(ExecutionSandbox::new(
        sink.clone(),
        SandboxOptions::from(&config.sandbox),
    ));
    let scheduler = AutoRunScheduler::new(sandbox);

    let context: &dyn ExecutionContext = &context;
    let results = scheduler
        .execute_on_load(&snippets, context, &args.url)
        .await;

    if let Some(path) = &args.export {
        let report = sink.export_report();
        std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
        info!(path = %path.display(), "Wrote console report");
    }

    match format {
        OutputFormat::Text => {
            let failed = results.iter().filter(|r| !r.success).count();
            println!(
                "\n{} snippet(s) executed, {} failed",
                results.len(),
                failed
            );
            let stats = sink.error_statistics();
            if stats.total_errors > 0 {
                for (category, count) in &stats.by_category {
                    println!("  {:<12} {}", category, count);
                }
            }
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "results": results,
                    "statistics": sink.error_statistics(),
                }))?
            );
        }
    }

    Ok(results.iter().all(|r| r.success))
}

// ============================================================================
// Config Commands
// ============================================================================

pub async fn init(args: InitArgs) -> Result<()> {
    let config_path = get_config_path();

    if config_path.exists() && !args.force {
        println!("Configuration already exists at: {}", config_path.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let default_config = SnipboxConfig::default();
    let toml_str = toml::to_string_pretty(&default_config)
        .map_err(|e| SnipboxError::Config(e.to_string()))?;

    std::fs::write(&config_path, toml_str)?;

    println!("Created configuration at: {}", config_path.display());
    println!("\nQuick start:");
    println!("  # Run a snippet");
    println!("  snipbox run -e 'console.log(\"hi\"); return 42'");
    println!();
    println!("  # Check a snippet for syntax errors and risky constructs");
    println!("  snipbox check ./snippet.js");
    println!();
    println!("  # Run on-load snippets for a page");
    println!("  snipbox autorun --snippets snippets.json --url https://example.com/");

    Ok(())
}

pub async fn config(args: ConfigArgs, config: SnipboxConfig) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let toml_str = toml::to_string_pretty(&config)
                .map_err(|e| SnipboxError::Config(e.to_string()))?;
            println!("{}", toml_str);
        }
        ConfigAction::Path => {
            println!("{}", get_config_path().display());
        }
    }
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn read_source(source: &SourceArgs) -> Result<String> {
    match (&source.eval, &source.file) {
        (Some(code), _) => Ok(code.clone()),
        (None, Some(path)) => Ok(std::fs::read_to_string(path)?),
        (None, None) => Err(SnipboxError::MissingSource),
    }
}

/// Print console messages as they arrive (text mode only).
fn attach_live_output(sink: &ConsoleSink, format: &OutputFormat) {
    if matches!(format, OutputFormat::Text) {
        sink.set_output_sink(|message: &ConsoleMessage| {
            println!("[{}] {}", message.level.as_str(), message.text);
        });
    }
}

fn output_result(result: &ExecutionResult, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            if let Some(value) = result.value.as_ref().filter(|v| !v.is_null()) {
                println!("=> {}", value);
            }
            for warning in &result.warnings {
                println!("warning: {}", warning);
            }
            println!(
                "({}ms, {} document mutation(s))",
                result.resource_usage.elapsed_ms, result.resource_usage.dom_mutations
            );
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?);
        }
    }
    Ok(())
}
