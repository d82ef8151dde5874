mod batch;
mod config;
mod llm;
mod logger;
mod model;
mod render;
mod repair;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::batch::{run_batch, BatchOptions};
use crate::llm::client::LlmClient;
use crate::logger::{log, LogLevel};
use crate::model::{load_storyboards, Breakdown, Budget};
use crate::render::runner::CommandRenderer;
use crate::render::workspace::Workspace;
use crate::repair::orchestrator::ProgressFn;
use crate::repair::{compat, syntax};

#[derive(Parser)]
#[command(
    name = "scenesmith",
    version,
    about = "Turns animation storyboards into rendered videos, repairing generated scene code until it renders."
)]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Animate storyboards into rendered videos
    Animate(AnimateArgs),
    /// Validate a scene source file and scan it for deprecated API usage
    Check(CheckArgs),
    /// Configure the generation provider
    Configure(ConfigureArgs),
}

#[derive(Args)]
struct AnimateArgs {
    /// Breakdown JSON: the ordered topic list
    #[arg(long)]
    breakdown: PathBuf,

    /// Storyboards JSON: one storyboard per topic, in topic order
    #[arg(long)]
    storyboards: PathBuf,

    /// Workspace directory (reset per topic; owns scene/, rendered/, attempts/)
    #[arg(long, default_value = "workspace")]
    workspace: PathBuf,

    /// Topic indices to animate (default: every storyboard)
    #[arg(long, value_delimiter = ',')]
    topics: Vec<usize>,

    #[arg(long, default_value_t = 3)]
    max_syntax_fixes: u32,

    #[arg(long, default_value_t = 2)]
    max_runtime_fixes: u32,

    /// Render ceiling in seconds; a slower render counts as a runtime failure
    #[arg(long, default_value_t = 600)]
    render_timeout: u64,

    /// Render tool executable
    #[arg(long, default_value = "manim")]
    render_program: String,

    /// Optional file of reference snippets folded into prompts
    #[arg(long)]
    reference: Option<PathBuf>,
}

#[derive(Args)]
struct CheckArgs {
    /// Scene source file to validate
    file: PathBuf,
}

#[derive(Args)]
struct ConfigureArgs {
    /// Provider name: openai or anthropic
    #[arg(long)]
    provider: String,

    #[arg(long)]
    model: String,

    #[arg(long)]
    api_key: String,

    #[arg(long)]
    base_url: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        CliCommand::Animate(args) => cmd_animate(args),
        CliCommand::Check(args) => cmd_check(args),
        CliCommand::Configure(args) => cmd_configure(args),
    };

    if let Err(e) = result {
        log(LogLevel::Error, &e);
        std::process::exit(1);
    }
}

fn cmd_animate(args: AnimateArgs) -> Result<(), String> {
    let breakdown = Breakdown::load(&args.breakdown)?;
    let storyboards = load_storyboards(&args.storyboards)?;

    let reference = match &args.reference {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {e}", path.display()))?,
        None => String::new(),
    };

    let client = LlmClient::new(config::load_or_default());
    let workspace = Workspace::new(&args.workspace);
    let renderer = CommandRenderer::new(
        workspace.clone(),
        Duration::from_secs(args.render_timeout),
    )
    .with_program(&args.render_program);

    let opts = BatchOptions {
        budget: Budget::new(args.max_syntax_fixes, args.max_runtime_fixes),
        topic_indices: if args.topics.is_empty() {
            None
        } else {
            Some(args.topics.clone())
        },
        reference,
    };

    let mut progress = |topic: usize, attempt: usize, msg: &str| {
        log(LogLevel::Info, format!("[topic {topic}][attempt {attempt}] {msg}"));
        true
    };

    let results = run_batch(
        &client,
        &renderer,
        &workspace,
        &breakdown,
        &storyboards,
        &opts,
        Some(&mut progress as &mut ProgressFn),
    );

    let succeeded = results.iter().filter(|r| r.success).count();
    for r in &results {
        if r.success {
            log(
                LogLevel::Success,
                format!(
                    "topic {} '{}' rendered: {}",
                    r.topic_index,
                    r.topic_name,
                    r.artifact
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default()
                ),
            );
        } else {
            log(
                LogLevel::Warn,
                format!(
                    "topic {} '{}' failed after {} attempt(s): {}",
                    r.topic_index,
                    r.topic_name,
                    r.attempts.len(),
                    r.failure_reason.as_deref().unwrap_or("unknown")
                ),
            );
        }
    }

    log(
        LogLevel::Info,
        format!("{succeeded}/{} topics rendered", results.len()),
    );

    if succeeded == 0 && !results.is_empty() {
        return Err("no topic rendered successfully".into());
    }
    Ok(())
}

fn cmd_check(args: CheckArgs) -> Result<(), String> {
    let source = std::fs::read_to_string(&args.file)
        .map_err(|e| format!("failed to read {}: {e}", args.file.display()))?;

    let issues = compat::scan(&source);
    for issue in &issues {
        log(
            LogLevel::Warn,
            format!(
                "line {}: {} -> {} ({})",
                issue.line, issue.matched, issue.suggestion, issue.note
            ),
        );
    }
    if issues.is_empty() {
        log(LogLevel::Info, "no deprecated API usage found");
    }

    match syntax::check(&source) {
        syntax::SyntaxDiagnostic::Ok => {
            log(LogLevel::Success, "syntax OK");
            Ok(())
        }
        syntax::SyntaxDiagnostic::Invalid(issue) => Err(format!(
            "syntax error at line {}: {}\n{}",
            issue.line,
            issue.message,
            issue.context.unwrap_or_default()
        )),
    }
}

fn cmd_configure(args: ConfigureArgs) -> Result<(), String> {
    let path = config::configure(&args.provider, args.model, args.api_key, args.base_url)?;
    log(LogLevel::Success, format!("saved {}", path.display()));
    Ok(())
}
