//! `GroupLink` command-line group chat session client.
//!
//! Connects one identity to one study group against a running chat backend,
//! prints the history and live messages, and sends each stdin line as a
//! message to the group.
//!
//! ```bash
//! cargo run --bin grouplink -- --endpoint ws://127.0.0.1:8000/api \
//!     --user-id user_42 --group-id 7 --token dev-token
//!
//! # Or via environment variables
//! GROUPLINK_ENDPOINT=ws://127.0.0.1:8000/api GROUPLINK_USER=user_42 \
//!     GROUPLINK_GROUP=7 GROUPLINK_TOKEN=dev-token cargo run --bin grouplink
//! ```

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use grouplink::auth::StaticToken;
use grouplink::config::{CliArgs, SessionConfig};
use grouplink::session::{Identity, SessionCallbacks, SessionError, SessionManager};
use grouplink_proto::message::{ContentType, GroupId, UserId};

#[tokio::main]
async fn main() {
    let cli = CliArgs::parse();

    let config = match SessionConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let (Some(user_id), Some(group_id), Some(token)) =
        (cli.user_id.clone(), cli.group_id, cli.token.clone())
    else {
        eprintln!("Usage: grouplink --user-id <id> --group-id <id> --token <token>");
        std::process::exit(2);
    };

    tracing::info!(endpoint = %config.endpoint, group = group_id, "grouplink starting");

    let callbacks = SessionCallbacks {
        on_new_message: Box::new(|message| {
            println!("[{}] {}", message.sender_id, message.content);
        }),
        on_history_loaded: Box::new(|messages| {
            println!("--- history ({} messages) ---", messages.len());
            for message in messages {
                if message.is_deleted() {
                    println!("[{}] (deleted)", message.sender_id);
                } else {
                    println!("[{}] {}", message.sender_id, message.content);
                }
            }
        }),
        on_connection_change: Box::new(|connected| {
            if connected {
                println!("* connected");
            } else {
                println!("* disconnected");
            }
        }),
    };

    let session = SessionManager::new(config, StaticToken::new(token), callbacks);
    session
        .switch(Identity {
            user_id: UserId::new(user_id),
            group_id: GroupId::new(group_id),
        })
        .await;

    // Each stdin line becomes a message; EOF (Ctrl-D) exits.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match session.send_message(trimmed, ContentType::Text).await {
                    Ok(()) => {}
                    Err(SessionError::NotConnected) => {
                        println!("* not connected, message not sent");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "send failed");
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "stdin read error");
                break;
            }
        }
    }

    session.close().await;
    tracing::info!("grouplink exiting");
}
