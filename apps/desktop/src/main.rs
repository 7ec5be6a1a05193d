use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    load_settings, load_settings_from, CanonicalId, ChatClient, ChatMessage, ClientEvent,
    NotificationList, SendOutcome, SharedIdentity,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

#[derive(Parser, Debug)]
struct Args {
    /// Settings file; defaults to ./client.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    server_url: Option<String>,
    /// Cookie header sent with the socket upgrade and history requests.
    #[arg(long)]
    session_cookie: Option<String>,
    /// Signed-in user id, used to tell own messages apart.
    #[arg(long)]
    user_id: Option<String>,
}

#[derive(Debug, Clone)]
enum Target {
    Contact(CanonicalId),
    Group(CanonicalId),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "client_core=info,desktop=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => load_settings_from(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => load_settings(),
    };
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }
    if let Some(cookie) = args.session_cookie {
        settings.session_cookie = Some(cookie);
    }

    let identity = Arc::new(SharedIdentity::default());
    if let Some(user_id) = args.user_id {
        identity.set(user_id);
    }
    let notifications = Arc::new(NotificationList::default());
    let client = ChatClient::new_with_session(settings, identity.clone(), notifications.clone());

    let printer = tokio::spawn(print_events(Arc::clone(&client)));
    client.connect().await?;
    println!("commands: /to <id>, /group <id>, /more, /show, /contacts, /notifications, /connect, /disconnect, /logout, /quit");

    let mut target: Option<Target> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        match command {
            "" => {}
            "/quit" => break,
            "/connect" => client.connect().await?,
            "/disconnect" => client.disconnect().await,
            "/logout" => {
                client.reset().await;
                identity.clear();
                target = None;
            }
            "/to" => {
                let contact_id = CanonicalId::from(rest);
                let loaded = client.set_active_contact(Some(contact_id.clone())).await;
                println!("chatting with {contact_id} ({loaded} messages loaded)");
                target = Some(Target::Contact(contact_id));
            }
            "/group" => {
                let group_id = CanonicalId::from(rest);
                let loaded = client.set_active_group(Some(group_id.clone())).await;
                println!("in group {group_id} ({loaded} messages loaded)");
                target = Some(Target::Group(group_id));
            }
            "/more" => {
                let added = match &target {
                    Some(Target::Contact(id)) => client.load_more_history(id).await,
                    Some(Target::Group(id)) => client.load_more_group_history(id).await,
                    None => 0,
                };
                println!("{added} older messages");
            }
            "/show" => {
                let messages = match &target {
                    Some(Target::Group(id)) => client.group_conversation(id).await.unwrap_or_default(),
                    _ => client.active_conversation().await,
                };
                for message in &messages {
                    print_message(message);
                }
            }
            "/contacts" => {
                let active = client.active_contact_id().await;
                for contact in client.contacts().await {
                    let marker = if active.as_ref() == Some(&contact.id) { "*" } else { " " };
                    let presence = if contact.is_online { "online" } else { "offline" };
                    println!(
                        "{marker} {} {} [{presence}] unread={}",
                        contact.id, contact.display_name, contact.unread
                    );
                }
            }
            "/notifications" => {
                for record in notifications.snapshot() {
                    println!("{} {} {}", record.id, record.kind, record.data);
                }
            }
            _ if command.starts_with('/') => println!("unknown command {command}"),
            _ => {
                let outcome = match &target {
                    Some(Target::Group(id)) => client.send_group_message(Some(id.clone()), line).await,
                    _ => client.send_message(None, line).await,
                };
                match outcome {
                    Ok(SendOutcome::Sent) => {}
                    Ok(SendOutcome::Queued) => println!("(queued until connected)"),
                    Err(err) => warn!(error = %err, "desktop: message not sent"),
                }
            }
        }
    }

    client.disconnect().await;
    printer.abort();
    Ok(())
}

fn print_message(message: &ChatMessage) {
    let who = if message.outgoing {
        "me"
    } else if message.sender_name.is_empty() {
        "them"
    } else {
        message.sender_name.as_str()
    };
    println!("[{}] {who}: {}", message.timestamp, message.content);
}

async fn print_events(client: Arc<ChatClient>) {
    let mut events = client.subscribe_events();
    loop {
        match events.recv().await {
            Ok(ClientEvent::ErrorQueued) => {
                while let Some(message) = client.next_error().await {
                    eprintln!("! {message}");
                }
            }
            Ok(ClientEvent::ConnectionChanged { connected }) => {
                println!("-- {}", if connected { "connected" } else { "disconnected" });
            }
            Ok(ClientEvent::ConversationUpdated { counterparty }) => {
                if client.active_contact_id().await.as_ref() == Some(&counterparty) {
                    if let Some(last) = client.active_conversation().await.last() {
                        print_message(last);
                    }
                } else {
                    println!("-- new activity from {counterparty}");
                }
            }
            Ok(ClientEvent::TypingChanged { sender_id, typing: true }) => {
                println!("-- {sender_id} is typing");
            }
            Ok(ClientEvent::NotificationMirrored { kind, .. }) => println!("-- notification: {kind}"),
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "desktop: event printer fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}
