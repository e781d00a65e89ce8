mod cli;
mod telemetry;

use anyhow::Result;
use clap::Parser;
use openice_envoy::client::ApiClient;
use openice_envoy::config::Config;
use openice_envoy::error::ClientError;
use openice_envoy::session::ChatSession;
use openice_envoy::ui;

use cli::{Cli, Command, ConfigAction};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing()?;
    let cli = Cli::parse();

    let mut config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            return Err(e);
        }
    };
    // Per-run override, not saved.
    if let Some(server) = cli.server {
        config.server_url = server;
    }

    match cli.command.unwrap_or(Command::Chat { resume: false }) {
        Command::Chat { resume } => {
            let session = open_session(&mut config, resume).await?;
            ui::interactive_chat(&session).await?;
        }
        Command::Ask { message } => {
            let session = open_session(&mut config, false).await?;
            ui::single_message(&session, &message.join(" ")).await?;
        }
        Command::Config { action } => match action.unwrap_or(ConfigAction::Show) {
            ConfigAction::Show => {
                println!("Current config:");
                println!("  Server URL: {}", config.server_url);
                match config.chat_id {
                    Some(id) => println!("  Chat ID: {}", id),
                    None => println!("  Chat ID: none"),
                }
                println!("  Max retries: {}", config.max_retries);
                println!("  Request timeout: {}s", config.request_timeout_secs);
                println!("  File: {}", Config::config_path()?.display());
            }
            ConfigAction::SetServer { url } => {
                config.server_url = url;
                config.save()?;
                println!("Server URL updated to: {}", config.server_url);
            }
        },
    }

    Ok(())
}

async fn open_session(config: &mut Config, resume: bool) -> Result<ChatSession<ApiClient>> {
    let client = ApiClient::new(&config.client_config())?;

    if resume {
        match config.chat_id {
            Some(chat_id) => match client.get_chat(chat_id).await {
                Ok(chat) => {
                    return Ok(ChatSession::from_chat(client, &chat)
                        .with_retry_policy(config.retry_policy()));
                }
                Err(e) => eprintln!("Could not resume chat {}: {}", chat_id, e.description()),
            },
            None => eprintln!("No previous chat to resume."),
        }
    }

    let chat = client.create_chat().await.map_err(|e| {
        eprintln!("Failed to connect to the chat server at {}", config.server_url);
        report(&e);
        e
    })?;
    config.set_chat_id(chat.uuid)?;

    Ok(ChatSession::from_chat(client, &chat).with_retry_policy(config.retry_policy()))
}

fn report(err: &ClientError) {
    eprintln!("{}", err.title());
    eprintln!("  {}", err.description());
}
