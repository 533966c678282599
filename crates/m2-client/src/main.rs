mod config;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use m2_backend::HttpBackend;
use m2_providers::{AppContext, ChatsProvider, MessagesDelegate, MessagesProvider, UsersService};
use m2_stream::{Dispatcher, TcpTransport};
use m2_types::models::{Message, MessageKind};

use crate::config::Config;

/// Prints chat traffic to the terminal.
struct ConsoleDelegate {
    username: String,
}

impl MessagesDelegate for ConsoleDelegate {
    fn did_append(&self, message: &Message) {
        if message.sender == self.username {
            return;
        }
        match &message.kind {
            MessageKind::Text { text } if message.is_editing => {
                println!("{} is typing: {}", message.sender, text)
            }
            MessageKind::Text { text } => println!("{}: {}", message.sender, text),
            MessageKind::VoiceMemo => {
                println!("{} sent a voice memo ({})", message.sender, message.id)
            }
        }
    }

    fn did_update(&self, message: &Message, _index: usize) {
        if let Some(text) = message.body() {
            if message.is_editing {
                println!("{} is typing: {}", message.sender, text);
            } else {
                println!("{}: {}", message.sender, text);
            }
        }
    }

    fn did_change_active_status(&self, username: &str) {
        println!("* {} entered or left the chat", username);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "m2=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    let peer = std::env::args().nth(1);

    // Shared state
    let transport = Arc::new(TcpTransport::new(&config.stream_host, config.stream_port));
    let dispatcher = Dispatcher::new(transport);
    let backend = Arc::new(HttpBackend::new(&config.backend_url));
    let context = AppContext::new(dispatcher, backend, &config.voice_memo_dir);

    let users = UsersService::new(&context);
    users
        .login(&config.username, &config.password, None)
        .await
        .context("login failed")?;
    info!(
        "Stream {}:{}, backend {}",
        config.stream_host, config.stream_port, config.backend_url
    );

    if let Err(e) = context.friends_requests().refresh().await {
        warn!("Could not load friends requests: {}", e);
    }
    let chats = ChatsProvider::new(&context);
    for chat in chats.refresh().await? {
        info!("Chat {} with {}", chat.id, chat.other_user);
    }

    match peer {
        Some(peer) => {
            let chat = chats
                .chat_with(&peer)
                .with_context(|| format!("no chat with {}", peer))?;
            run_chat(&context, &config, MessagesProvider::new(&context, chat)).await?;
        }
        None => {
            info!("No peer given, idling until interrupted");
            tokio::signal::ctrl_c().await?;
        }
    }

    users.logout().await?;
    Ok(())
}

async fn run_chat(
    context: &AppContext,
    config: &Config,
    messages: MessagesProvider,
) -> anyhow::Result<()> {
    let delegate: Arc<dyn MessagesDelegate> = Arc::new(ConsoleDelegate {
        username: config.username.clone(),
    });
    messages.set_delegate(&delegate);
    let _presence = messages.bind_presence(|chat| {
        if chat.is_complete() {
            println!("* both of you are here");
        }
    });

    messages.enter_chat().await?;
    if messages.check_complete().await {
        println!("* {} is already here", messages.chat().other_user);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line == "/quit" {
            break;
        } else if let Some(text) = line.strip_prefix("/type ") {
            messages.type_text(text);
        } else if line == "/type" {
            messages.type_text("");
        } else if let Some(path) = line.strip_prefix("/memo ") {
            let id = messages.messages_ascending().len() as i64;
            if let Err(e) = messages.send_voice_memo(id, Path::new(path.trim())).await {
                warn!("Voice memo failed: {}", e);
            }
        } else if let Some(id) = line.strip_prefix("/fetch ") {
            let memo = messages
                .messages_ascending()
                .into_iter()
                .find(|m| m.is_voice_memo() && m.id.to_string() == id.trim());
            match memo {
                Some(memo) => match messages.download_voice_memo(&memo).await {
                    Ok(Some(path)) => println!("* saved to {}", path.display()),
                    Ok(None) => println!("* that memo is yours"),
                    Err(e) => warn!("Download failed: {}", e),
                },
                None => println!("* no voice memo {}", id.trim()),
            }
        } else if let Some(id) = line.strip_prefix("/unsend ") {
            let memo = messages
                .messages_ascending()
                .into_iter()
                .find(|m| m.is_voice_memo() && m.id.to_string() == id.trim());
            match memo {
                Some(memo) => match messages.delete_voice_memo(&memo).await {
                    Ok(true) => println!("* voice memo {} deleted", memo.id),
                    Ok(false) => println!("* the backend kept voice memo {}", memo.id),
                    Err(e) => warn!("Delete failed: {}", e),
                },
                None => println!("* no voice memo {}", id.trim()),
            }
        } else if !line.is_empty() {
            messages.send(&line);
        }
    }

    if context.dispatcher.is_active() {
        messages.leave_chat().await?;
    }
    Ok(())
}
