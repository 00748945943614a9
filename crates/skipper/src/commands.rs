//! Skipper command implementations

use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use skipper_agent::todo::render_items;
use skipper_agent::{AgentLoop, RunOutcome, StopReason, TodoManager};
use skipper_config::{self, paths, Config};
use skipper_memory::RepositoryMemory;
use skipper_provider::OpenAiProvider;

/// Load config and apply a `--workspace` override on top of file and env
async fn load_config(workspace: Option<PathBuf>) -> Result<Config> {
    let mut config = Config::load().await.context("failed to load config")?;
    if let Some(ws) = workspace {
        config.agent.workspace = ws.to_string_lossy().into_owned();
    }
    Ok(config)
}

/// Build a fully wired agent, refusing to start on an unusable config
async fn build_agent(config: &Config) -> Result<AgentLoop<OpenAiProvider>> {
    let problems = config.validate();
    if !problems.is_empty() {
        anyhow::bail!(
            "configuration problems:\n  - {}\nEdit {} or set SKIPPER_* environment variables",
            problems.join("\n  - "),
            skipper_config::config_path().display()
        );
    }

    let provider = Arc::new(OpenAiProvider::from_config(&config.provider));
    let agent = AgentLoop::from_config(provider, config)
        .await
        .context("failed to set up agent")?;
    debug!(
        model = agent.model(),
        workspace = %agent.workspace().display(),
        tools = agent.tools().len(),
        "agent ready"
    );
    Ok(agent)
}

/// Cancel `token` on Ctrl-C until the returned handle is aborted
fn cancel_on_ctrl_c(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling run");
            token.cancel();
        }
    })
}

/// Run `agent` until it stops, cancellable with Ctrl-C
async fn run_interruptible(
    agent: &mut AgentLoop<OpenAiProvider>,
    max_steps: usize,
) -> skipper_agent::Result<RunOutcome> {
    let cancel = CancellationToken::new();
    let watcher = cancel_on_ctrl_c(cancel.clone());
    let outcome = agent.run(max_steps, &cancel).await;
    watcher.abort();
    outcome
}

fn print_outcome(outcome: &RunOutcome) {
    match outcome.stop {
        StopReason::Done => {
            println!("{}", outcome.final_text.as_deref().unwrap_or_default());
        }
        StopReason::StepLimit => {
            if let Some(text) = &outcome.final_text {
                println!("{}", text);
            }
            println!("\n[stopped after {} steps: step limit reached]", outcome.steps);
        }
        StopReason::Cancelled => {
            println!("\n[cancelled after {} steps]", outcome.steps);
        }
    }
}

/// Initialize config and workspace
pub async fn init_command() -> Result<()> {
    println!("Initializing skipper...");

    let config = skipper_config::init()
        .await
        .context("failed to initialize config")?;
    let workspace = config.workspace_path();
    create_template(&workspace, "SKIPPER.md", SKIPPER_MD).await?;

    println!("Config:    {}", skipper_config::config_path().display());
    println!("Workspace: {}", workspace.display());
    println!("\nNext steps:");
    println!("  1. Add your API key to the config, or export SKIPPER_API_KEY");
    println!("  2. Run a task: skipper run -m \"Summarize this repository\"");

    Ok(())
}

async fn create_template(dir: &Path, filename: &str, content: &str) -> Result<()> {
    let path = dir.join(filename);
    if !path.exists() {
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("created {}", path.display());
    }
    Ok(())
}

/// One-shot run
pub async fn run_command(
    message: String,
    max_steps: Option<usize>,
    workspace: Option<PathBuf>,
) -> Result<()> {
    let config = load_config(workspace).await?;
    let mut agent = build_agent(&config).await?;
    let max_steps = max_steps.unwrap_or_else(|| agent.max_steps());

    agent.add_user_message(message);
    let outcome = run_interruptible(&mut agent, max_steps)
        .await
        .context("agent run failed")?;
    print_outcome(&outcome);

    Ok(())
}

/// Interactive session
pub async fn chat_command(workspace: Option<PathBuf>) -> Result<()> {
    let config = load_config(workspace).await?;
    let mut agent = build_agent(&config).await?;

    println!("skipper chat in {} (/help for commands)", agent.workspace().display());

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        if std::io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "/quit" | "/exit" => break,
            "/help" => {
                println!("/todos   show the TODO list");
                println!("/memory  show stored repository memory");
                println!("/clear   start a fresh conversation");
                println!("/quit    leave");
                continue;
            }
            "/todos" => {
                println!("{}", render_items(&agent.list_todos().await));
                continue;
            }
            "/memory" => {
                match agent.memory() {
                    Some(memory) => println!("{}", memory.lock().await.summary()),
                    None => println!("Memory is disabled"),
                }
                continue;
            }
            "/clear" => {
                agent.reset();
                println!("Conversation cleared");
                continue;
            }
            _ => {}
        }

        agent.add_user_message(input);
        let max_steps = agent.max_steps();
        match run_interruptible(&mut agent, max_steps).await {
            Ok(outcome) => print_outcome(&outcome),
            // fatal for the run, not the session
            Err(e) => eprintln!("error: {}", e),
        }
        println!();
    }

    Ok(())
}

/// Print the persisted TODO list
pub async fn todos_command(workspace: Option<PathBuf>) -> Result<()> {
    let config = load_config(workspace).await?;
    let todos = TodoManager::load(paths::todo_file(&config.workspace_path())).await;
    println!("{}", todos.render());
    Ok(())
}

/// Print the stored memory summary
pub async fn memory_command(workspace: Option<PathBuf>) -> Result<()> {
    let config = load_config(workspace).await?;
    let memory = RepositoryMemory::load(paths::memory_file(&config.workspace_path())).await;
    println!("{}", memory.summary());
    Ok(())
}

/// Show status
pub async fn status_command() -> Result<()> {
    let config_path = skipper_config::config_path();
    let config = Config::load().await.context("failed to load config")?;
    let workspace = config.workspace_path();

    println!("skipper status");
    println!(
        "Config:    {} {}",
        config_path.display(),
        if config_path.exists() { "[OK]" } else { "[Missing]" }
    );
    println!(
        "Workspace: {} {}",
        workspace.display(),
        if workspace.exists() { "[OK]" } else { "[Missing]" }
    );
    println!("Model:     {} via {}", config.provider.model, config.provider.api_base);
    println!(
        "API Key:   {}",
        if config.has_api_key() { "[Set]" } else { "[Missing]" }
    );

    let sandbox = &config.sandbox;
    if config.agent.enable_sandbox {
        println!(
            "Sandbox:   enabled ({} extra allowed paths, {} forbidden paths, {} forbidden commands)",
            sandbox.allowed_paths.len(),
            sandbox.forbidden_paths.len(),
            sandbox.forbidden_commands.len()
        );
        if !sandbox.allowed_commands.is_empty() {
            println!("Commands:  only {}", sandbox.allowed_commands.join(", "));
        }
    } else {
        println!("Sandbox:   disabled");
    }
    println!("Max steps: {}", config.agent.max_steps);

    let problems = config.validate();
    if problems.is_empty() {
        println!("\nReady");
    } else {
        println!("\nProblems:");
        for problem in problems {
            println!("  - {}", problem);
        }
    }

    Ok(())
}

const SKIPPER_MD: &str = r#"# Workspace Notes

Instructions placed here are added to the agent's system prompt.

## Conventions

- Run the test suite before reporting a change as done
- Keep edits small and explain them
"#;
