use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use hearth::cli::{parse_command, Command, HELP};
use hearth::config::{self, Config, APP_NAME};
use hearth::services::{AppSettings, ChatManager, Database, SettingsService};
use hearth::ui::{NotifyLevel, Presenter, TerminalPresenter};
use hearth::OllamaBackend;

/// Chat with language models served from your own machine.
#[derive(Parser, Debug)]
#[command(name = "hearth", version, about, long_about = None)]
struct Args {
    /// Inference server base URL (overrides HEARTH_ENDPOINT / OLLAMA_HOST)
    #[arg(long)]
    endpoint: Option<String>,

    /// Database file (overrides HEARTH_DB)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Model for new chats (overrides the last used model)
    #[arg(short, long)]
    model: Option<String>,

    /// Model used to title new conversations (overrides HEARTH_TITLE_MODEL)
    #[arg(long)]
    title_model: Option<String>,

    /// Do not generate conversation titles
    #[arg(long)]
    no_titles: bool,
}

fn prompt() {
    let mut out = std::io::stdout();
    let _ = write!(out, "> ").and_then(|_| out.flush());
}

/// Drain the in-flight reply; Ctrl-C stops it.
async fn drive(manager: &mut ChatManager) {
    let Some(handle) = manager.stop_handle() else {
        return;
    };
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.request_stop();
        }
    });
    manager.run_until_idle().await;
    watcher.abort();
}

async fn export(
    manager: &ChatManager,
    presenter: &dyn Presenter,
    path: Option<String>,
) -> Result<()> {
    let Some((file_name, markdown)) = manager.export_active().await? else {
        presenter.notify("No chat is open", NotifyLevel::Warning);
        return Ok(());
    };
    let path = path.map(PathBuf::from).unwrap_or_else(|| PathBuf::from(file_name));
    std::fs::write(&path, markdown)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    presenter.notify(&format!("Exported to {}", path.display()), NotifyLevel::Info);
    Ok(())
}

async fn remember_model(db: &Database, settings: &mut AppSettings, model: &str) {
    settings.last_model = Some(model.to_string());
    if let Err(e) = SettingsService::save(db, settings).await {
        tracing::error!("Failed to save settings: {}", e);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = Config::from_env()?;
    if let Some(endpoint) = &args.endpoint {
        config.endpoint = config::parse_endpoint(endpoint)?;
    }
    if let Some(db_path) = args.db {
        config.db_path = db_path;
    }
    if let Some(title_model) = args.title_model {
        config.title_model = Some(title_model);
    }

    let db = Database::open(config.db_path.clone())
        .await
        .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?;
    let mut settings = SettingsService::load(&db).await;

    let model = args
        .model
        .or_else(|| settings.last_model.clone())
        .unwrap_or_else(|| config.default_model.clone());
    let title_model = if args.no_titles || !settings.generate_titles {
        None
    } else {
        config.title_model.clone()
    };

    let presenter = Arc::new(TerminalPresenter::stdout());
    let backend = Arc::new(OllamaBackend::new(config.endpoint.clone()));
    let mut manager = ChatManager::new(
        db.clone(),
        backend,
        presenter.clone(),
        model.clone(),
        title_model,
    );

    println!("{} - {} at {} (/help for commands)", APP_NAME, model, config.endpoint);
    let _ = manager.list_chats().await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt();
        let Some(line) = lines.next_line().await? else {
            break;
        };

        // Failures are already reported through the presenter.
        match parse_command(&line) {
            Command::Send(text) => {
                if manager.send(&text).await.is_ok() {
                    drive(&mut manager).await;
                }
            }
            Command::NewChat => {
                let _ = manager.new_chat(None).await;
            }
            Command::Model(None) => presenter.notify(
                &format!("Current model: {}", manager.state().selected_model()),
                NotifyLevel::Info,
            ),
            Command::Model(Some(name)) => {
                if manager.switch_model(&name).await.is_ok() {
                    remember_model(&db, &mut settings, &name).await;
                    presenter.notify(&format!("Switched to model: {}", name), NotifyLevel::Info);
                }
            }
            Command::Models => {
                if let Ok(models) = manager.list_models().await {
                    let current = manager.state().selected_model().to_string();
                    for m in models {
                        let marker = if m.name == current { '*' } else { ' ' };
                        println!("{} {}", marker, m.name);
                    }
                }
            }
            Command::Chats => {
                let _ = manager.list_chats().await;
            }
            Command::Open(id) => {
                let _ = manager.select_chat(id).await;
            }
            Command::Delete(id) => {
                let _ = manager.delete_chat(id).await;
            }
            Command::Export(path) => {
                if let Err(e) = export(&manager, presenter.as_ref(), path).await {
                    presenter.notify(&format!("{:#}", e), NotifyLevel::Error);
                }
            }
            Command::Help => print!("{}", HELP),
            Command::Quit => break,
            Command::Empty => {}
            Command::Invalid(message) => presenter.notify(&message, NotifyLevel::Warning),
        }
    }

    Ok(())
}
