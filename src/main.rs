// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use niffler_channels::{QueueReceiver, QueueSender, Shutdown};
use niffler_config::{AgentMode, Config, ModelConfig};
use niffler_core::{EngineEvent, TaskTool};
use niffler_model::ModelProvider;
use niffler_persistence::{Mode as PersistMode, Store};
use niffler_tools::{ToolEvent, ToolRegistry};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(Commands::Completions { shell }) = &cli.command {
        cli::print_completions(*shell);
        return ExitCode::SUCCESS;
    }

    let config = match niffler_config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("niffler: config error: {e:#}");
            return ExitCode::from(2);
        }
    };

    if let Some(Commands::ShowConfig) = &cli.command {
        println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
        return ExitCode::SUCCESS;
    }

    match run(cli, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("niffler: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn init_logging(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = std::env::var("NIFFLER_LOG_LEVEL")
        .ok()
        .and_then(|level| EnvFilter::try_new(level).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(default_level));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

fn resolve_db_path(override_path: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(p) = override_path {
        return Ok(p.to_path_buf());
    }
    let home = dirs::home_dir().context("could not determine home directory")?;
    let dir = home.join(".niffler");
    std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    Ok(dir.join("niffler.db"))
}

/// Resolves a model nickname to its [`ModelConfig`]: `providers` entries are
/// looked up by key, and the nickname matching the top-level `model.name`
/// falls back to the default model.
fn resolve_model_config(config: &Config, nickname: &str) -> ModelConfig {
    config.providers.get(nickname).cloned().unwrap_or_else(|| config.model.clone())
}

fn to_persist_mode(mode: AgentMode) -> PersistMode {
    match mode {
        AgentMode::Plan => PersistMode::Plan,
        AgentMode::Code => PersistMode::Code,
    }
}

fn to_model_schemas(registry: &ToolRegistry) -> Vec<niffler_model::ToolSchema> {
    registry.schemas().into_iter().map(|s| niffler_model::ToolSchema { name: s.name, description: s.description, parameters: s.parameters }).collect()
}

fn build_registry(model: Arc<dyn ModelProvider>) -> (Arc<ToolRegistry>, std::sync::mpsc::Receiver<ToolEvent>) {
    let (todo_tx, todo_rx) = std::sync::mpsc::channel();
    let mut registry = ToolRegistry::new();
    niffler_tools::register_builtins(&mut registry, todo_tx);
    registry.register(TaskTool::new(model, Arc::new(AtomicUsize::new(0))));
    (Arc::new(registry), todo_rx)
}

#[allow(clippy::type_complexity)]
fn spawn_workers(
    model: Arc<dyn ModelProvider>,
    registry: Arc<ToolRegistry>,
    store: Arc<Store>,
    tools_config: niffler_config::ToolsConfig,
) -> (QueueSender<niffler_core::ApiRequest>, QueueReceiver<niffler_core::ApiResponse>, QueueSender<niffler_core::ToolRequest>, QueueReceiver<niffler_core::ToolResponse>, Shutdown) {
    let shutdown = Shutdown::new();

    let (engine_api_tx, worker_api_rx) = niffler_channels::queue();
    let (worker_api_tx, engine_api_rx) = niffler_channels::queue();
    let (engine_tool_tx, worker_tool_rx) = niffler_channels::queue();
    let (worker_tool_tx, engine_tool_rx) = niffler_channels::queue();

    let api_shutdown = shutdown.clone();
    thread::spawn(move || niffler_core::run_api_worker(worker_api_rx, worker_api_tx, model, api_shutdown));

    let tool_shutdown = shutdown.clone();
    thread::spawn(move || niffler_core::run_tool_worker(worker_tool_rx, worker_tool_tx, registry, store, tools_config, tool_shutdown));

    (engine_api_tx, engine_api_rx, engine_tool_tx, engine_tool_rx, shutdown)
}

enum ReplAction {
    Continue,
    Exit,
}

struct Repl {
    engine: niffler_core::Engine,
    store: Arc<Store>,
    config: Config,
    model_nickname: String,
    cwd: PathBuf,
    workers_shutdown: Shutdown,
}

impl Repl {
    fn new(config: Config, store: Arc<Store>, mode: AgentMode, model_nickname: String, cwd: PathBuf) -> anyhow::Result<Self> {
        let model_cfg = resolve_model_config(&config, &model_nickname);
        let provider: Arc<dyn ModelProvider> = Arc::from(niffler_model::from_config(&model_cfg.to_model_config())?);
        let (registry, todo_rx) = build_registry(provider.clone());
        spawn_todo_relay(todo_rx);

        let tool_schemas = to_model_schemas(&registry);
        let tool_names = registry.names();
        let workspace_root = config.tools.workspace_root.clone().map(PathBuf::from).or_else(|| Some(cwd.clone()));

        let now = chrono::Utc::now().timestamp();
        let conversation = store.create_conversation("New conversation", to_persist_mode(mode), &model_nickname, now)?;
        let session = niffler_core::Session::new(conversation.id, mode);

        let (api_tx, api_rx, tool_tx, tool_rx, workers_shutdown) = spawn_workers(provider, registry, store.clone(), config.tools.clone());

        let engine = niffler_core::Engine::new(
            store.clone(),
            session,
            config.agent.clone(),
            model_nickname.clone(),
            tool_schemas,
            tool_names,
            cwd.clone(),
            workspace_root,
            api_tx,
            api_rx,
            tool_tx,
            tool_rx,
            workers_shutdown.clone(),
        );

        Ok(Self { engine, store, config, model_nickname, cwd, workers_shutdown })
    }

    fn submit(&mut self, text: &str) {
        let (events_tx, events_rx) = niffler_channels::queue::<EngineEvent>();
        let printer = thread::spawn(move || drain_events(events_rx));
        if let Err(e) = self.engine.submit_user_turn(text, &events_tx) {
            eprintln!("\nerror: {e}");
        }
        printer.join().ok();
    }

    fn handle_command(&mut self, line: &str) -> anyhow::Result<ReplAction> {
        let mut parts = line.splitn(2, ' ');
        let cmd = parts.next().unwrap_or("");
        let arg = parts.next().unwrap_or("").trim();

        match cmd {
            "new" => self.cmd_new(arg)?,
            "clear" => self.cmd_new("")?,
            "conv" => self.cmd_conv(arg)?,
            "archive" => self.cmd_toggle_archive(arg, true)?,
            "unarchive" => self.cmd_toggle_archive(arg, false)?,
            "search" => self.cmd_search(arg)?,
            "info" => self.cmd_info()?,
            "model" => self.cmd_model(arg)?,
            "mode" => self.cmd_mode()?,
            "help" => print_help(),
            "exit" | "quit" => return Ok(ReplAction::Exit),
            other => println!("unknown command: /{other} (try /help)"),
        }
        Ok(ReplAction::Continue)
    }

    fn cmd_new(&mut self, title: &str) -> anyhow::Result<()> {
        let title = if title.is_empty() { "New conversation" } else { title };
        let now = chrono::Utc::now().timestamp();
        let conversation = self.store.create_conversation(title, to_persist_mode(self.config.agent.default_mode), &self.model_nickname, now)?;
        self.engine.switch_conversation(conversation.id)?;
        println!("started conversation {} ({title:?})", conversation.id);
        Ok(())
    }

    fn cmd_conv(&mut self, arg: &str) -> anyhow::Result<()> {
        if arg.is_empty() {
            let conversations = self.store.list_conversations(true)?;
            print_conversations(&conversations);
            return Ok(());
        }
        if let Ok(id) = arg.parse::<i64>() {
            self.engine.switch_conversation(id)?;
            println!("switched to conversation {id}");
        } else {
            let matches = self.store.search_conversations(arg)?;
            print_conversations(&matches);
        }
        Ok(())
    }

    fn cmd_toggle_archive(&mut self, arg: &str, archive: bool) -> anyhow::Result<()> {
        let id: i64 = arg.parse().with_context(|| format!("expected a conversation id, got {arg:?}"))?;
        if archive {
            self.engine.archive(id)?;
            println!("archived conversation {id}");
        } else {
            self.engine.unarchive(id)?;
            println!("unarchived conversation {id}");
        }
        Ok(())
    }

    fn cmd_search(&mut self, query: &str) -> anyhow::Result<()> {
        if query.is_empty() {
            println!("usage: /search <query>");
            return Ok(());
        }
        let matches = self.store.search_conversations(query)?;
        print_conversations(&matches);
        Ok(())
    }

    fn cmd_info(&mut self) -> anyhow::Result<()> {
        let session = self.engine.session().clone();
        let conversation = self.store.load_conversation(session.conversation_id)?.ok_or_else(|| anyhow::anyhow!("active conversation vanished"))?;
        println!("conversation  : {} ({:?})", conversation.id, conversation.title);
        println!("mode          : {}", session.mode);
        println!("model         : {}", self.model_nickname);
        println!("messages      : {}", conversation.message_count);
        println!("active        : {}", conversation.is_active);
        println!("tokens (turn) : in={} out={} reasoning={}", session.token_counters.input_tokens, session.token_counters.output_tokens, session.token_counters.reasoning_tokens);
        if let Some(root) = self.engine.workspace_root() {
            println!("workspace     : {}", root.display());
        }
        Ok(())
    }

    fn cmd_model(&mut self, nickname: &str) -> anyhow::Result<()> {
        if nickname.is_empty() {
            println!("current model: {}", self.model_nickname);
            return Ok(());
        }
        self.workers_shutdown.signal();

        let session = self.engine.session().clone();
        let model_cfg = resolve_model_config(&self.config, nickname);
        let provider: Arc<dyn ModelProvider> = Arc::from(niffler_model::from_config(&model_cfg.to_model_config())?);
        let (registry, todo_rx) = build_registry(provider.clone());
        spawn_todo_relay(todo_rx);

        let tool_schemas = to_model_schemas(&registry);
        let tool_names = registry.names();
        let workspace_root = self.config.tools.workspace_root.clone().map(PathBuf::from).or_else(|| Some(self.cwd.clone()));

        let (api_tx, api_rx, tool_tx, tool_rx, workers_shutdown) = spawn_workers(provider, registry, self.store.clone(), self.config.tools.clone());

        self.model_nickname = nickname.to_string();
        self.engine = niffler_core::Engine::new(
            self.store.clone(),
            session,
            self.config.agent.clone(),
            self.model_nickname.clone(),
            tool_schemas,
            tool_names,
            self.cwd.clone(),
            workspace_root,
            api_tx,
            api_rx,
            tool_tx,
            tool_rx,
            workers_shutdown.clone(),
        );
        self.workers_shutdown = workers_shutdown;
        println!("switched to model {}", self.model_nickname);
        Ok(())
    }

    fn cmd_mode(&mut self) -> anyhow::Result<()> {
        let current = self.engine.session().mode;
        let next = match current {
            AgentMode::Plan => AgentMode::Code,
            AgentMode::Code => AgentMode::Plan,
        };
        self.engine.switch_mode(next)?;
        println!("mode: {next}");
        Ok(())
    }
}

fn spawn_todo_relay(todo_rx: std::sync::mpsc::Receiver<ToolEvent>) {
    thread::spawn(move || {
        while let Ok(ToolEvent::TodoUpdate(items)) = todo_rx.recv() {
            println!();
            for item in &items {
                println!("  [{}] {}", item.status, item.content);
            }
        }
    });
}

fn drain_events(events_rx: QueueReceiver<EngineEvent>) {
    let shutdown = Shutdown::new();
    loop {
        match events_rx.receive(Duration::from_secs(300), &shutdown) {
            Some(EngineEvent::TextDelta(delta)) => {
                print!("{delta}");
                let _ = io::stdout().flush();
            }
            Some(EngineEvent::ToolCallStarted(call)) => {
                println!("\n[tool] {} {}", call.name, call.args);
            }
            Some(EngineEvent::ToolCallFinished { tool_name, is_error, .. }) => {
                println!("[tool:{tool_name}] {}", if is_error { "error" } else { "ok" });
            }
            Some(EngineEvent::Error(message)) => {
                eprintln!("\nerror: {message}");
                break;
            }
            Some(EngineEvent::TurnComplete) => {
                println!();
                break;
            }
            Some(EngineEvent::ThinkingDelta(_) | EngineEvent::ThinkingComplete(_) | EngineEvent::TextComplete(_) | EngineEvent::TokenUsage { .. } | EngineEvent::TodoUpdate(_) | EngineEvent::ModeChanged(_)) => {}
            None => break,
        }
    }
}

fn print_conversations(conversations: &[niffler_persistence::Conversation]) {
    if conversations.is_empty() {
        println!("no conversations found.");
        return;
    }
    for c in conversations {
        let status = if c.is_active { "active" } else { "archived" };
        println!("{:>5}  {:<9}  {:<6}  {:>4} msgs  {}", c.id, status, c.mode.as_str(), c.message_count, c.title);
    }
}

fn print_help() {
    println!("Control commands:");
    println!("  /new [title]        create and switch to a new conversation");
    println!("  /conv [id|query]    list conversations, or switch/search");
    println!("  /archive <id>       mark a conversation inactive");
    println!("  /unarchive <id>     mark a conversation active");
    println!("  /search <query>     full-text search over titles and messages");
    println!("  /info               show the active conversation's metadata");
    println!("  /model <nick>       switch the active model");
    println!("  /clear              start a fresh conversation");
    println!("  /mode               toggle Plan/Code mode");
    println!("  /help               show this message");
    println!("  /exit               quit");
}

fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    let db_path = resolve_db_path(cli.db.as_deref())?;
    let store = Arc::new(Store::open(&db_path).with_context(|| format!("opening database at {}", db_path.display()))?);

    let mode = cli.mode.unwrap_or(config.agent.default_mode);
    let model_nickname = cli.model.clone().unwrap_or_else(|| config.model.name.clone());
    let cwd = std::env::current_dir().context("determining current directory")?;

    let mut repl = Repl::new(config, store, mode, model_nickname, cwd)?;

    println!("niffler — mode: {}  model: {}", repl.engine.session().mode, repl.model_nickname);
    println!("Type /help for commands, /exit to quit.");

    if let Some(prompt) = cli.prompt.clone() {
        repl.submit(&prompt);
    }

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush().ok();

        let mut line = String::new();
        let bytes_read = stdin.lock().read_line(&mut line).context("reading from stdin")?;
        if bytes_read == 0 {
            println!();
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix('/') {
            match repl.handle_command(rest) {
                Ok(ReplAction::Continue) => continue,
                Ok(ReplAction::Exit) => break,
                Err(e) => {
                    eprintln!("error: {e}");
                    continue;
                }
            }
        }

        repl.submit(line);
    }

    repl.workers_shutdown.signal();
    Ok(())
}
