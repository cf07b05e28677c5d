//! Trek Node - terminal client for trek-chat

mod commands;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use commands::Command;
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, instrument};
use trek_chat::{ChatConfig, ChatEvent, ChatSession, Confirm, Message, PageOutcome};
use trek_store::{SqliteChatStore, StoreConfig};

/// Trek chat - group and direct chats for trekking batches
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// SQLite database file
    #[arg(long, default_value = "trek-chat.db")]
    db: PathBuf,

    /// User to sign in as
    #[arg(short, long)]
    user: String,

    /// Messages per history page (overrides the config file)
    #[arg(long)]
    page_size: Option<usize>,

    /// JSON file with chat settings
    #[arg(short, long)]
    config: Option<PathBuf>,
}

type Lines = Arc<Mutex<mpsc::UnboundedReceiver<String>>>;

/// Asks on the terminal and reads the answer from the input line queue
struct TerminalConfirm {
    lines: Lines,
}

#[async_trait]
impl Confirm for TerminalConfirm {
    async fn confirm(&self, prompt: &str) -> bool {
        print!("{prompt} [y/N] ");
        let _ = io::stdout().flush();
        match self.lines.lock().await.recv().await {
            Some(answer) => matches!(answer.to_lowercase().as_str(), "y" | "yes"),
            None => false,
        }
    }
}

/// Tracks what has been printed for the active conversation
#[derive(Default)]
struct View {
    shown: HashMap<String, String>,
}

impl View {
    fn reset(&mut self) {
        self.shown.clear();
    }

    /// Print messages that are new or changed since they were last printed
    fn refresh(&mut self, session: &ChatSession) {
        for message in session.messages() {
            if message.pending {
                continue;
            }
            let line = render(session, &message);
            match self.shown.get(&message.id) {
                Some(previous) if *previous == line => {}
                Some(_) => println!("~ {line}"),
                None => println!("{line}"),
            }
            self.shown.insert(message.id, line);
        }
    }
}

fn render(session: &ChatSession, message: &Message) -> String {
    let time = message.created_at.format("%H:%M");
    if message.is_deleted {
        return format!("[{time}] {} (message deleted)", session.display_name(message));
    }
    let mut line = format!(
        "[{time}] {}: {}  #{}",
        session.display_name(message),
        message.content,
        message.id
    );
    if let Some(reply_to) = &message.reply_to {
        line.push_str(&format!("  (reply to #{reply_to})"));
    }
    if message.edited_at.is_some() {
        line.push_str("  (edited)");
    }
    for (emoji, users) in &message.reactions {
        line.push_str(&format!("  {emoji}{}", users.len()));
    }
    line
}

fn show_help() {
    println!("\nCommands:");
    println!("  list                      List conversations");
    println!("  open <id>                 Open a conversation");
    println!("  dm <user>                 Open a direct chat");
    println!("  send <text> | <text>      Send a message");
    println!("  reply <message-id>        Reply to a message with the next send");
    println!("  older                     Load older messages");
    println!("  react <message-id> <emoji>  Toggle a reaction");
    println!("  edit <message-id> <text>  Edit your message");
    println!("  delete <message-id>       Delete your message");
    println!("  leave                     Leave the open conversation");
    println!("  name <display name>       Set your display name");
    println!("  quit                      Exit");
}

fn load_config(args: &Args) -> Result<ChatConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            ChatConfig::from_json(&json).context("Invalid chat config")?
        }
        None => ChatConfig::default(),
    };
    if let Some(page_size) = args.page_size {
        config.page_size = page_size.max(1);
    }
    Ok(config)
}

fn print_conversations(session: &ChatSession, user_id: &str) {
    let conversations = session.conversations();
    if conversations.is_empty() {
        println!("No conversations yet. Use 'dm <user>' to start one.");
        return;
    }
    let active = session.directory().active_id();
    for conversation in conversations {
        let marker = if active.as_deref() == Some(conversation.id.as_str()) {
            "*"
        } else {
            " "
        };
        let kind = if conversation.is_direct() { "dm" } else { "group" };
        println!(
            "{marker} {:<38} {:<6} {}",
            conversation.id,
            kind,
            conversation.title(user_id, &session.config().unknown_sender_label)
        );
    }
}

/// Run one command. Returns false when the client should exit.
#[instrument(skip(session, store, view, lines))]
async fn process_command(
    command: Command,
    session: &ChatSession,
    store: &SqliteChatStore,
    view: &mut View,
    lines: &Lines,
    user_id: &str,
) -> Result<bool> {
    match command {
        Command::Help => show_help(),
        Command::List => {
            session.load_conversations().await?;
            print_conversations(session, user_id);
        }
        Command::Open(conversation_id) => {
            view.reset();
            session.select_conversation(&conversation_id).await?;
            view.refresh(session);
        }
        Command::Dm(other) => {
            view.reset();
            let conversation = session.open_direct_conversation(&other).await?;
            println!("Direct chat {} with {other}", conversation.id);
            view.refresh(session);
        }
        Command::Send(text) => {
            session.send_text(&text).await?;
        }
        Command::Reply(message_id) => {
            if session.store().message(&message_id).is_none() {
                println!("No message #{message_id} in this conversation");
            } else {
                session.reply_to(message_id);
                println!("Replying; the next message is sent as a reply");
            }
        }
        Command::Older => match session.load_older().await {
            PageOutcome::Merged { prepended, .. } => {
                println!("Loaded {prepended} older messages");
                view.reset();
                view.refresh(session);
            }
            PageOutcome::Skipped => println!("No older messages"),
            outcome => debug!(?outcome, "Older page not merged"),
        },
        Command::React { message_id, emoji } => {
            session.toggle_reaction(&message_id, &emoji).await?;
        }
        Command::Edit {
            message_id,
            content,
        } => {
            session.edit_message(&message_id, &content).await?;
        }
        Command::Delete(message_id) => {
            let confirm = TerminalConfirm {
                lines: lines.clone(),
            };
            session.delete_message(&message_id, &confirm).await?;
        }
        Command::Leave => {
            session.leave_active_conversation().await?;
            view.reset();
            println!("Left the conversation");
        }
        Command::Name(display_name) => {
            let profile = store.upsert_profile(user_id, &display_name, None).await?;
            session.profiles().insert(profile);
            println!("Display name set to {display_name}");
        }
        Command::Quit => return Ok(false),
    }
    Ok(true)
}

fn handle_event(event: ChatEvent, session: &ChatSession, view: &mut View, user_id: &str) {
    debug!(?event, "Chat event");
    match event {
        ChatEvent::MessagesChanged { conversation_id } => {
            if session.store().active_conversation_id().as_deref() == Some(conversation_id.as_str())
            {
                view.refresh(session);
            }
        }
        ChatEvent::ActionFailed { action, reason } => {
            println!("⚠️  {action:?} failed: {reason}");
        }
        ChatEvent::SignInRequired => println!("Sign in first (--user)"),
        ChatEvent::ConversationSelected { conversation_id } => {
            if let Some(conversation) = session.directory().conversation(&conversation_id) {
                let label = &session.config().unknown_sender_label;
                println!("-- {} --", conversation.title(user_id, label));
            }
        }
        ChatEvent::ConversationsLoaded { .. } | ChatEvent::OlderPageMerged { .. } => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Args::parse();
    let config = load_config(&args)?;

    let store = SqliteChatStore::open(&StoreConfig::new(&args.db)).await?;
    store.sign_in(&args.user);
    let backend = Arc::new(store.clone());
    let (session, mut events) =
        ChatSession::new(backend.clone(), backend.clone(), backend, config);

    println!("🏔️  Trek chat as {} ({})", args.user, args.db.display());
    show_help();
    session.load_conversations().await?;
    print_conversations(&session, &args.user);

    let (line_sender, line_receiver) = mpsc::unbounded_channel::<String>();
    let lines: Lines = Arc::new(Mutex::new(line_receiver));
    let stdin_handle = tokio::spawn(async move {
        use tokio::io::{AsyncBufReadExt, BufReader};
        let mut stdin = BufReader::new(tokio::io::stdin());
        let mut line = String::new();
        loop {
            line.clear();
            match stdin.read_line(&mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = line.trim().to_string();
                    if !line.is_empty() && line_sender.send(line).is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut view = View::default();
    info!("Starting main loop");
    loop {
        print!("> ");
        let _ = io::stdout().flush();

        let input = {
            let mut receiver = lines.lock().await;
            tokio::select! {
                Some(event) = events.recv() => {
                    handle_event(event, &session, &mut view, &args.user);
                    continue;
                }
                input = receiver.recv() => input,
                _ = tokio::signal::ctrl_c() => None,
            }
        };
        let Some(input) = input else {
            break;
        };

        let command = match Command::parse(&input) {
            Ok(command) => command,
            Err(usage) => {
                println!("{usage}");
                continue;
            }
        };
        match process_command(command, &session, &store, &mut view, &lines, &args.user).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => println!("⚠️  {e}"),
        }
    }

    session.close().await;
    stdin_handle.abort();
    println!("👋 Goodbye");
    Ok(())
}
