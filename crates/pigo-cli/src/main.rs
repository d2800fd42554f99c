use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use rustyline::error::ReadlineError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pigo_agent::{Agent, AgentConfig};
use pigo_core::{AgentEvent, Ctx, Error, ToolRegistry};
use pigo_memory::{MemoryConfig, MemoryPipeline, MemoryStore};
use pigo_providers::OpenAiClient;
use pigo_tools::{create_default_registry, ToolsConfig};

mod config;
mod session;
mod skills;

use config::Config;
use skills::SkillSet;

/// Exit code for a double interrupt, matching shell convention for SIGINT.
const EXIT_INTERRUPTED: i32 = 130;

/// Window in which a second interrupt terminates the process.
const DOUBLE_INTERRUPT_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Parser)]
#[command(name = "pigo")]
#[command(author, version, about = "pigo: an AI coding assistant", long_about = None)]
struct Cli {
    /// One-shot prompt (non-interactive)
    #[arg(short, long)]
    prompt: Option<String>,

    /// Chat model (overrides config and PIGO_MODEL)
    #[arg(short, long)]
    model: Option<String>,

    /// API base URL (overrides config and OPENAI_BASE_URL)
    #[arg(long)]
    base_url: Option<String>,

    /// System prompt override
    #[arg(short, long)]
    system: Option<String>,

    /// Directory the file tools are confined to (default: current directory)
    #[arg(long)]
    allowed_dir: Option<PathBuf>,

    /// Log level
    #[arg(long, value_enum, default_value = "warn")]
    log_level: LogLevel,

    /// Write JSON logs to a file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

struct App {
    agent: Agent,
    store: Arc<MemoryStore>,
    skills: SkillSet,
    config: Config,
    allowed_dir: PathBuf,
    system_prompt: Option<String>,
    last_interrupt: Option<Instant>,
}

impl App {
    fn build(config: Config, allowed_dir: PathBuf, system_prompt: Option<String>) -> Self {
        let client = Arc::new(
            OpenAiClient::new(&config.api_key)
                .with_base_url(&config.base_url)
                .with_model(&config.model)
                .with_embed_model(&config.embed_model)
                .with_api_type(config.api_type),
        );

        let store = Arc::new(MemoryStore::new(config.memory_path()));
        if let Err(e) = store.load() {
            tracing::warn!(error = %e, "Could not load memory store, starting empty");
        }
        let pipeline = Arc::new(MemoryPipeline::new(
            store.clone(),
            client.clone(),
            MemoryConfig::default(),
        ));

        let registry: Arc<ToolRegistry> = Arc::new(create_default_registry(
            &ToolsConfig::new(&allowed_dir),
            Some(pipeline.clone()),
        ));

        let mut agent_config = AgentConfig::default();
        if let Some(prompt) = &system_prompt {
            agent_config = agent_config.with_system_prompt(prompt.clone());
        }
        let agent = Agent::new(client, registry, agent_config).with_memory(pipeline);

        let mut skill_dirs = vec![config.skills_dir(), PathBuf::from("./.pigo/skills")];
        skill_dirs.extend(config.plugins.clone());
        let skills = SkillSet::discover(&skill_dirs);

        Self {
            agent,
            store,
            skills,
            config,
            allowed_dir,
            system_prompt,
            last_interrupt: None,
        }
    }

    /// Swap the chat model, preserving conversation history.
    fn set_model(&mut self, model: &str) {
        let history = self.agent.messages()[1..].to_vec();
        let mut config = self.config.clone();
        config.model = model.to_string();
        let mut rebuilt = App::build(config, self.allowed_dir.clone(), self.system_prompt.clone());
        rebuilt.agent.restore_history(history);
        *self = rebuilt;
    }
}

/// Record an interrupt; true when it is the second inside the kill window.
fn register_interrupt(last: &mut Option<Instant>) -> bool {
    let now = Instant::now();
    let double = last
        .map(|t| now.duration_since(t) < DOUBLE_INTERRUPT_WINDOW)
        .unwrap_or(false);
    *last = Some(now);
    double
}

fn setup_logging(cli: &Cli) -> Result<()> {
    let filter = EnvFilter::new(cli.log_level.as_filter());
    if let Some(path) = &cli.log_file {
        let file = std::fs::File::create(path)
            .with_context(|| format!("failed to create log file {}", path.display()))?;
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::sync::Mutex::new(file)))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = setup_logging(&cli) {
        eprintln!("pigo: {:#}", e);
        std::process::exit(1);
    }

    let mut config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("pigo: {:#}", e);
            std::process::exit(1);
        }
    };
    if let Some(model) = &cli.model {
        config.model = model.clone();
    }
    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url.clone();
    }

    let allowed_dir = cli
        .allowed_dir
        .clone()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("/"));

    let mut app = App::build(config, allowed_dir, cli.system.clone());
    subscribe_printer(&app.agent);

    let result = match &cli.prompt {
        Some(prompt) => run_once(&mut app, prompt).await,
        None => repl(&mut app).await,
    };

    if let Err(e) = result {
        eprintln!("pigo: {:#}", e);
        std::process::exit(1);
    }
}

/// Print tool progress as it happens. Final assistant text is printed by
/// the caller from the process result.
fn subscribe_printer(agent: &Agent) {
    agent.events().subscribe(|event| match event {
        AgentEvent::ToolStart { tool_name } => {
            eprintln!("  [{}] ...", tool_name);
        }
        AgentEvent::ToolEnd { tool_name, content } => {
            if !content.is_empty() {
                eprintln!("  [{}]", tool_name);
                for line in content.lines().take(20) {
                    eprintln!("  | {}", line);
                }
            }
        }
        _ => {}
    });
}

async fn run_once(app: &mut App, prompt: &str) -> Result<()> {
    match drive(app, prompt).await {
        Ok(Some(content)) => {
            println!("{}", content);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn repl(app: &mut App) -> Result<()> {
    println!("pigo ({}) - /q to quit", app.agent.model());

    let mut editor = rustyline::DefaultEditor::new()?;
    loop {
        // rustyline blocks; run it off the async runtime so signal handling
        // for the processing phase stays responsive.
        let (returned, line) = tokio::task::spawn_blocking(move || {
            let line = editor.readline("pigo> ");
            (editor, line)
        })
        .await?;
        editor = returned;

        match line {
            Ok(line) => {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(&line);
                app.last_interrupt = None;

                if let Some(command) = line.strip_prefix('/') {
                    match handle_command(app, command).await? {
                        Flow::Continue => continue,
                        Flow::Quit => break,
                    }
                }

                match drive(app, &line).await {
                    Ok(Some(content)) => println!("{}", content),
                    Ok(None) => println!("(cancelled)"),
                    Err(e) => eprintln!("error: {}", e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                if register_interrupt(&mut app.last_interrupt) {
                    std::process::exit(EXIT_INTERRUPTED);
                }
                println!("(press ctrl-c again within 1s to quit)");
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }

    if let Err(e) = app.store.save() {
        tracing::warn!(error = %e, "Failed to save memory store on exit");
    }
    Ok(())
}

/// Run one input through the agent, translating interrupts into ctx
/// cancellation. Returns None when the turn was cancelled.
async fn drive(app: &mut App, input: &str) -> std::result::Result<Option<String>, Error> {
    let ctx = Ctx::new();
    let mut turn = Box::pin(app.agent.process(&ctx, input));

    loop {
        tokio::select! {
            result = &mut turn => {
                return match result {
                    Ok(content) => Ok(Some(content)),
                    Err(Error::Cancelled) => Ok(None),
                    Err(e) => Err(e),
                };
            }
            _ = tokio::signal::ctrl_c() => {
                if register_interrupt(&mut app.last_interrupt) {
                    std::process::exit(EXIT_INTERRUPTED);
                }
                eprintln!("(interrupted, cancelling turn; ctrl-c again within 1s to quit)");
                ctx.cancel();
            }
        }
    }
}

enum Flow {
    Continue,
    Quit,
}

async fn handle_command(app: &mut App, command: &str) -> Result<Flow> {
    let (name, args) = match command.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (command, ""),
    };

    match name {
        "q" | "quit" => return Ok(Flow::Quit),
        "c" | "clear" => {
            app.agent.clear();
            println!("history cleared");
        }
        "model" => {
            if args.is_empty() {
                println!("model: {}", app.agent.model());
            } else {
                app.set_model(args);
                subscribe_printer(&app.agent);
                println!("model set to {}", args);
            }
        }
        "usage" => {
            let usage = app.agent.usage();
            println!(
                "tokens: {} prompt + {} completion = {}",
                usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
            );
        }
        "save" => {
            let name = session::save(
                &app.config.sessions_dir(),
                (!args.is_empty()).then_some(args),
                app.agent.messages(),
            )?;
            println!("saved session '{}'", name);
        }
        "load" => {
            if args.is_empty() {
                println!("usage: /load <name>");
            } else {
                match session::load(&app.config.sessions_dir(), args) {
                    Ok(messages) => {
                        let count = messages.len();
                        app.agent.restore_history(messages);
                        println!("loaded session '{}' ({} messages)", args, count);
                    }
                    Err(e) => eprintln!("error: {}", e),
                }
            }
        }
        "sessions" => {
            let names = session::list(&app.config.sessions_dir());
            if names.is_empty() {
                println!("no saved sessions");
            } else {
                for name in names {
                    println!("{}", name);
                }
            }
        }
        "skills" => {
            if app.skills.is_empty() {
                println!("no skills installed");
            } else {
                for name in app.skills.names() {
                    println!("{}", name);
                }
            }
        }
        "memory" => {
            if args == "clear" {
                app.store.clear();
                app.store.save()?;
                println!("memory cleared");
            } else {
                let memories = app.store.all();
                println!("{} memories", memories.len());
                for memory in memories.iter().take(20) {
                    println!("[{}] {} ({})", memory.category, memory.abstract_, memory.id);
                }
            }
        }
        _ => {
            if let Some(skill_name) = name.strip_prefix("skill:") {
                match app.skills.render(skill_name, args) {
                    Some(prompt) => match drive(app, &prompt).await {
                        Ok(Some(content)) => println!("{}", content),
                        Ok(None) => println!("(cancelled)"),
                        Err(e) => eprintln!("error: {}", e),
                    },
                    None => eprintln!("no skill named '{}'", skill_name),
                }
            } else {
                eprintln!("unknown command: /{}", name);
            }
        }
    }

    Ok(Flow::Continue)
}
