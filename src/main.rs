use anyhow::{Context, Result};
use messenger::chat::{ChatMessage, ChatRoom, ChatView};
use messenger::config::{load_config, MessengerConfig, TransportKind};
use messenger::greeting::{broadcast_greeting_for, GreetingClient, GreetingView, HelloMessage};
use messenger::session::{Session, SessionEvents};
use messenger::transport::{MemoryBroker, NatsTransport, Transport};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Prints greetings and chat lines to stdout
struct TerminalView;

impl GreetingView for TerminalView {
    fn show_greeting(&self, content: &str) {
        println!("> {}", content);
    }

    fn set_connected(&self, connected: bool) {
        if connected {
            println!("-- connected (type a name, /user <name>, /chat <text>, /quit)");
        } else {
            println!("-- disconnected");
        }
    }
}

impl ChatView for TerminalView {
    fn show_message(&self, message: &ChatMessage) {
        let at = message
            .emitted_at()
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_default();
        println!("[{}] {}: {}", at, message.emitter, message.content);
    }
}

#[derive(Debug, PartialEq)]
enum Command<'a> {
    Everyone(&'a str),
    User(&'a str),
    Chat(&'a str),
    Quit,
    Empty,
}

fn parse_command(line: &str) -> Command<'_> {
    let line = line.trim();
    if line.is_empty() {
        Command::Empty
    } else if line == "/quit" {
        Command::Quit
    } else if let Some(name) = line.strip_prefix("/user ") {
        Command::User(name.trim())
    } else if let Some(text) = line.strip_prefix("/chat ") {
        Command::Chat(text.trim())
    } else {
        Command::Everyone(line)
    }
}

/// Stand-in for the demo server when running against the in-process broker.
///
/// Only broadcast greetings and chat relay are answered; per-user replies need
/// a server that knows which session sent the request.
fn install_local_responders(broker: &MemoryBroker, config: &MessengerConfig) {
    let greeter = broker.clone();
    let broadcast_topic = config.greeting.broadcast_topic.clone();
    broker.listen(
        &config.greeting.everyone_destination,
        Arc::new(move |body: String| match serde_json::from_str::<HelloMessage>(&body) {
            Ok(hello) => match serde_json::to_string(&broadcast_greeting_for(&hello.name)) {
                Ok(reply) => {
                    greeter.publish(&broadcast_topic, reply);
                }
                Err(e) => warn!(error = %e, "Failed to encode greeting"),
            },
            Err(e) => warn!(error = %e, "Ignoring malformed hello message"),
        }),
    );

    let relay = broker.clone();
    let chat_topic = config.chat.topic.clone();
    broker.listen(
        &config.chat.destination,
        Arc::new(move |body: String| {
            relay.publish(&chat_topic, body);
        }),
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "messenger=info".into()),
        )
        .init();

    info!("Messenger starting...");

    let config_path =
        std::env::var("MESSENGER_CONFIG").unwrap_or_else(|_| "messenger.toml".to_string());
    let config = if std::path::Path::new(&config_path).exists() {
        load_config(&config_path)
            .with_context(|| format!("Failed to load config from '{}'", config_path))?
    } else {
        info!(path = %config_path, "No config file found, using defaults");
        MessengerConfig::default()
    };

    let transport: Arc<dyn Transport> = match config.transport.kind {
        TransportKind::Memory => {
            let broker = MemoryBroker::new();
            install_local_responders(&broker, &config);
            Arc::new(broker.transport())
        }
        TransportKind::Nats => Arc::new(NatsTransport::new()),
    };

    let events = SessionEvents::new()
        .on_disconnect(|reason| {
            if let Some(reason) = reason {
                warn!(reason = %reason, "Connection lost");
            }
        })
        .on_error(|e| warn!(error = %e, "Session error"));

    let session = Session::with_events(transport, &config.transport.endpoint, events)?;
    let view = Arc::new(TerminalView);

    let greeter = GreetingClient::connect(session.clone(), config.greeting.clone(), view.clone())
        .await
        .context("Failed to connect greeting client")?;
    let room = ChatRoom::join(session.clone(), config.chat.clone(), view)
        .await
        .context("Failed to join chat room")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let result = match parse_command(&line) {
            Command::Empty => continue,
            Command::Quit => break,
            Command::Everyone(name) => greeter.send_to_everyone(name).await,
            Command::User(name) => greeter.send_to_user(name).await,
            Command::Chat(text) => room.post(text).await,
        };

        if let Err(e) = result {
            warn!(error = %e, "Send failed");
            if !session.is_connected() {
                break;
            }
        }
    }

    if let Err(e) = room.leave().await {
        warn!(error = %e, "Failed to leave chat room");
    }
    greeter.disconnect().await;

    info!("Messenger stopped");
    Ok(())
}
