mod client;
mod config;
mod console;
mod credentials;
mod logging;
mod paths;
mod protocol;
mod reconciler;
mod render;
mod transport;

use crate::client::ApiClient;
use crate::config::Config;
use crate::credentials::Credentials;
use crate::protocol::{AutonomyLevel, ConfigUpdate};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "autonomo", version)]
#[command(about = "Autonomo: terminal client for the autonomous agent backend", long_about = None)]
struct Cli {
    /// Backend API URL (overrides server.api_url)
    #[arg(long, global = true)]
    server: Option<String>,

    /// Echo logs to stderr as well as the log file
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive chat (default)
    Chat {
        /// Resume an existing conversation
        #[arg(long)]
        conversation: Option<String>,
    },
    /// List stored conversations
    List,
    /// Print a conversation's transcript
    History {
        /// Conversation id
        id: String,
    },
    /// Delete a conversation
    Delete {
        /// Conversation id
        id: String,
    },
    /// Show or change the agent configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// List models available for a provider
    Models {
        /// ollama, openai, anthropic or deepseek
        provider: String,
    },
    /// Manage locally stored provider API keys
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },
    /// Check that the backend is up
    Health,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Show the backend's agent config and the local client settings
    Show,
    /// Update provider, model or autonomy level
    Set {
        #[arg(long)]
        provider: Option<String>,

        #[arg(long)]
        model: Option<String>,

        /// full or semi
        #[arg(long)]
        autonomy: Option<AutonomyLevel>,
    },
}

#[derive(Subcommand, Debug)]
enum KeysAction {
    /// Store an API key (empty string removes it)
    Set { provider: String, key: String },
    /// Show which providers have keys (values redacted)
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let (mut config, config_path) = Config::load_with_path().unwrap_or_else(|e| {
        eprintln!("Warning: failed to load config, using defaults: {e}");
        (Config::default(), None)
    });

    let cli = Cli::parse();

    // Key management is local only; no backend, no tracing.
    if let Some(Command::Keys { action }) = &cli.cmd {
        return handle_keys(action);
    }

    if let Some(server) = cli.server {
        config.server.api_url = server;
        config.server.ws_url = None;
    }
    config.validate()?;

    let log_dir = match logging::setup_tracing_with_settings(logging::LoggingSettings {
        level: config.logging.level.as_deref(),
        directory: config.logging.directory.as_deref(),
        retention_days: config.logging.retention_days,
        suppress_stdout: !cli.verbose,
    }) {
        Ok(path) => Some(path),
        Err(err) => {
            eprintln!("Failed to initialize logging: {err}");
            None
        }
    };

    tracing::info!("--- Autonomo Startup ---");
    match config_path.as_ref() {
        Some(path) => tracing::info!("Config File: {}", path.display()),
        None => tracing::info!("Config File: (default)"),
    }
    tracing::info!("API URL: {}", config.server.api_base());
    if let Some(dir) = log_dir.as_ref() {
        tracing::info!("Log Directory: {}", dir.display());
    }

    let client = ApiClient::new(config.server.api_base());

    match cli.cmd.unwrap_or(Command::Chat { conversation: None }) {
        Command::Chat { conversation } => {
            let options = console::ChatOptions {
                conversation_id: conversation,
                ws_base: config.server.ws_base()?,
                connect_timeout: config.server.connect_timeout(),
            };
            console::run_chat(client, options).await?;
        }
        Command::List => {
            let list = client.list_conversations().await?;
            if list.conversations.is_empty() {
                println!("No conversations yet.");
            }
            let now = chrono::Utc::now();
            for summary in &list.conversations {
                println!("{}", render::conversation_line(summary, now));
            }
        }
        Command::History { id } => {
            let history = client.history(&id).await?;
            let mut state = reconciler::SessionState::new();
            state.load_history(history);
            for line in render::render_transcript(&state) {
                println!("{line}");
            }
        }
        Command::Delete { id } => {
            client.delete_conversation(&id).await?;
            println!("Deleted {id}");
        }
        Command::Config { action } => handle_config(action, &client, &config).await?,
        Command::Models { provider } => {
            let provider = provider.to_lowercase();
            if !client::PROVIDERS.contains(&provider.as_str()) {
                anyhow::bail!(
                    "Unknown provider '{}' (expected one of: {})",
                    provider,
                    client::PROVIDERS.join(", ")
                );
            }
            for model in client.available_models(&provider).await {
                println!("{model}");
            }
        }
        Command::Health => {
            let health = client
                .health()
                .await
                .with_context(|| format!("Backend at {} is not reachable", client.base_url()))?;
            println!(
                "{} {} ({})",
                health.service.as_deref().unwrap_or("agent"),
                health.version.as_deref().unwrap_or("?"),
                health.status
            );
        }
        Command::Keys { .. } => {}
    }

    Ok(())
}

async fn handle_config(action: ConfigAction, client: &ApiClient, config: &Config) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let agent = client.get_config().await?;
            println!("provider:     {}", agent.llm_provider);
            println!("model:        {}", agent.model);
            println!("autonomy:     {}", agent.autonomy_level);
            if let Some(t) = agent.temperature {
                println!("temperature:  {t}");
            }
            if let Some(m) = agent.max_tokens {
                println!("max tokens:   {m}");
            }
            if let Some(n) = agent.tools_count {
                println!("tools:        {n}");
            }
            println!("api url:      {}", config.server.api_base());
            println!("ws url:       {}", config.server.ws_base()?);
        }
        ConfigAction::Set {
            provider,
            model,
            autonomy,
        } => {
            let provider = provider.map(|p| p.to_lowercase());
            if let Some(p) = provider.as_deref() {
                if !client::PROVIDERS.contains(&p) {
                    anyhow::bail!("Unknown provider '{p}'");
                }
            }
            // Keys travel with provider changes so the backend can build the client.
            let api_keys = if provider.is_some() {
                Credentials::load(&paths::credentials_file()).resolved_api_keys()
            } else {
                Default::default()
            };
            let update = ConfigUpdate {
                llm_provider: provider,
                model,
                autonomy_level: autonomy,
                api_keys,
            };
            if update.is_empty() {
                anyhow::bail!("Nothing to update: pass --provider, --model or --autonomy");
            }
            match client.update_config(&update).await? {
                Some(warning) => println!("Updated, with warning: {warning}"),
                None => println!("Updated."),
            }
        }
    }
    Ok(())
}

fn handle_keys(action: &KeysAction) -> Result<()> {
    let file = paths::credentials_file();
    let mut creds = Credentials::load(&file);
    match action {
        KeysAction::Set { provider, key } => {
            creds.set_api_key(provider, key);
            creds
                .save(&file)
                .with_context(|| format!("Failed to write {}", file.display()))?;
            println!("Saved key for {} in {}", provider.to_lowercase(), file.display());
        }
        KeysAction::List => {
            let redacted = creds.redacted();
            if redacted.keys.is_empty() {
                println!("No keys stored.");
            }
            for (provider, value) in &redacted.keys {
                println!("{provider}: {value}");
            }
        }
    }
    Ok(())
}
