//! `buildloop` command line.
//!
//! Projects live under `<output>/<name>/`; engine state lives in
//! `<output>/<name>/.buildloop/` (session, config, cycle logs).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use tracing::warn;

use buildloop::core::budget::Budget;
use buildloop::core::types::{HealthStatus, ProjectKind};
use buildloop::cycle::{Collaborators, CycleController, CycleReport, RunState, RunSummary};
use buildloop::exit_codes;
use buildloop::io::agent::CommandAgent;
use buildloop::io::browser::{BrowserDriver, CommandBrowserDriver};
use buildloop::io::config::{EngineConfig, load_config, write_config};
use buildloop::io::models::{ModelRuntime, OllamaClient};
use buildloop::io::session::{ProjectPaths, SessionState, load_session};
use buildloop::logging;
use buildloop::start::{
    PreconditionError, check_preconditions, new_session, prepare_project, resume_session, slugify,
};

#[derive(Parser)]
#[command(
    name = "buildloop",
    version,
    about = "Autonomous build-and-improve loop driving a coding agent"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a new project from a description and build it until the budget runs out.
    Run {
        /// What to build, in plain language.
        description: String,
        /// Project directory name (defaults to a slug of the description).
        #[arg(long)]
        name: Option<String>,
        #[command(flatten)]
        flags: RunFlags,
    },
    /// Continue an existing project at its next cycle.
    Resume {
        name: String,
        #[command(flatten)]
        flags: RunFlags,
    },
    /// Print the persisted session of a project.
    Status {
        name: String,
        /// Directory holding projects.
        #[arg(long, default_value = "projects")]
        output: PathBuf,
    },
}

#[derive(Args)]
struct RunFlags {
    /// Wall-clock budget in hours.
    #[arg(long, default_value_t = 8.0)]
    hours: f64,
    /// Directory holding projects.
    #[arg(long, default_value = "projects")]
    output: PathBuf,
    /// Config file (defaults to `<project>/.buildloop/config.toml`).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Skip the screenshot review.
    #[arg(long)]
    no_vision: bool,
    /// Vision model id served by the model runtime.
    #[arg(long)]
    vision_model: Option<String>,
    /// Stop after this many cycles even if budget remains.
    #[arg(long)]
    max_cycles: Option<u32>,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            if err.downcast_ref::<PreconditionError>().is_some() {
                eprintln!("hint: start the missing service or set [runtime].autostart in the config");
            }
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            description,
            name,
            flags,
        } => cmd_run(&description, name, &flags),
        Command::Resume { name, flags } => cmd_resume(&name, &flags),
        Command::Status { name, output } => cmd_status(&output.join(name)),
    }
}

fn cmd_run(description: &str, name: Option<String>, flags: &RunFlags) -> Result<i32> {
    if description.trim().is_empty() {
        return Err(anyhow!("description must not be empty"));
    }
    let name = name.unwrap_or_else(|| slugify(description));
    let paths = ProjectPaths::new(&flags.output.join(&name));
    prepare_project(&paths)?;
    let config = engine_config(&paths, flags)?;
    let session = new_session(&paths, &name, description, &config.health.entry_file)?;
    drive(&paths, &config, session, flags.hours)
}

fn cmd_resume(name: &str, flags: &RunFlags) -> Result<i32> {
    let paths = ProjectPaths::new(&flags.output.join(name));
    if !paths.root.is_dir() {
        return Err(anyhow!("project {} does not exist", paths.root.display()));
    }
    let session = resume_session(&paths)?;
    prepare_project(&paths)?;
    let config = engine_config(&paths, flags)?;
    drive(&paths, &config, session, flags.hours)
}

/// Load the config file, seed the project's copy, then apply CLI overrides.
fn engine_config(paths: &ProjectPaths, flags: &RunFlags) -> Result<EngineConfig> {
    let path = flags.config.as_deref().unwrap_or(paths.config_path.as_path());
    let mut config = load_config(path)?;
    if flags.config.is_none() && !paths.config_path.exists() {
        write_config(&paths.config_path, &config).context("seed project config")?;
    }
    if flags.no_vision {
        config.vision.enabled = false;
    }
    if let Some(model) = &flags.vision_model {
        config.vision.model = model.clone();
    }
    if flags.max_cycles.is_some() {
        config.max_cycles = flags.max_cycles;
    }
    config.validate()?;
    Ok(config)
}

fn drive(paths: &ProjectPaths, config: &EngineConfig, session: SessionState, hours: f64) -> Result<i32> {
    let budget = Budget::new(budget_duration(hours)?);

    let agent = CommandAgent::new(config.agent.command.clone(), config.agent.output_limit_bytes);
    let ollama = OllamaClient::new(
        &config.runtime.base_url,
        &config.vision.model,
        Duration::from_secs(config.runtime.request_timeout_secs),
    );
    let browser = CommandBrowserDriver::new(config.health.browser_command.clone());

    // Held for the whole run; dropping it stops an autostarted runtime.
    let _runtime_service = check_preconditions(config, || ollama.reachable())?;
    if let Some(model) = &config.runtime.coding_model {
        ollama.load(model, &config.runtime.keep_alive);
    }
    if session.project_kind == ProjectKind::Web && !browser.available() {
        warn!("browser driver not found; health checks fall back to static checks and the vision gate is off");
    }

    let mut state = RunState::new(session);
    let controller = CycleController::new(
        paths,
        config,
        Collaborators {
            agent: &agent,
            browser: &browser,
            runtime: &ollama,
            vision: &ollama,
        },
        budget,
        &state,
    );
    let summary = controller.run(&mut state, print_cycle);
    print_summary(&paths.root, &summary);

    Ok(match summary.final_health {
        HealthStatus::Fail => exit_codes::UNHEALTHY,
        HealthStatus::Pass | HealthStatus::Warn => exit_codes::OK,
    })
}

fn budget_duration(hours: f64) -> Result<Duration> {
    if hours.is_nan() || hours <= 0.0 {
        return Err(anyhow!("--hours must be a positive number, got {hours}"));
    }
    Duration::try_from_secs_f64(hours * 3600.0)
        .map_err(|err| anyhow!("--hours {hours} is out of range: {err}"))
}

fn print_cycle(report: &CycleReport) {
    let health = report.health.map_or("-", HealthStatus::as_str);
    let confidence = report
        .confidence
        .map_or_else(|| "-".to_string(), |c| c.to_string());
    let mut line = format!(
        "cycle {:>3}  {:<11} health={:<4} response={}B confidence={}",
        report.cycle,
        report.phase.as_str(),
        health,
        report.response_len,
        confidence
    );
    if report.checkpoint.as_ref().is_some_and(|c| c.committed()) {
        line.push_str(" committed");
    }
    if let Some(vision) = &report.vision {
        line.push_str(&format!(
            " vision={}shots/{}critiques",
            vision.screenshots, vision.critiques
        ));
    }
    if report.vision_fix {
        line.push_str(" +fix");
    }
    println!("{line}");
}

fn print_summary(root: &Path, summary: &RunSummary) {
    println!();
    println!("project:      {}", root.display());
    println!(
        "cycles:       {} this run, {} total",
        summary.cycles, summary.total_cycles
    );
    println!("elapsed:      {}", format_duration(summary.elapsed));
    println!(
        "final health: {} ({})",
        summary.final_health, summary.final_details
    );
    if !summary.phase_confidence.is_empty() {
        println!("confidence:");
        for (phase, avg) in &summary.phase_confidence {
            println!("  {:<11} {avg:.1}", phase.as_str());
        }
    }
    println!("files:");
    for file in &summary.files {
        println!("  {file}");
    }
}

fn cmd_status(root: &Path) -> Result<i32> {
    let paths = ProjectPaths::new(root);
    let session = load_session(&paths.session_path)
        .with_context(|| format!("no session for {}", root.display()))?;

    println!("project:      {} ({})", session.project_name, session.project_kind.as_str());
    println!("description:  {}", session.description);
    println!("session id:   {}", session.session_id);
    println!("cycles:       {}", session.cycle);
    println!(
        "elapsed:      {}",
        format_duration(Duration::from_secs(session.elapsed_secs))
    );
    println!(
        "last health:  {}",
        session.last_health.map_or("-", HealthStatus::as_str)
    );
    println!("fail streak:  {}", session.consecutive_fails);
    if !session.history.is_empty() {
        println!("recent cycles:");
        for record in &session.history {
            let tag = if record.vision_fix { " (vision fix)" } else { "" };
            println!(
                "  {:>3} {:<11}{} {}",
                record.cycle,
                record.phase.as_str(),
                tag,
                record.summary
            );
        }
    }
    for (phase, scores) in &session.phase_confidence {
        if let Some(avg) = scores.average() {
            println!(
                "confidence {:<11} {avg:.1} over {} samples",
                phase.as_str(),
                scores.samples
            );
        }
    }
    Ok(exit_codes::OK)
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}h{:02}m{:02}s", secs / 3600, (secs / 60) % 60, secs % 60)
}
