//! QueryMind terminal client
//!
//! Line-oriented chat: slash commands manage conversations, any other line
//! is asked as a question. The transcript goes to stdout, logs to stderr.

use querymind::config::{ClientConfig, HistoryBackend};
use querymind::db::{Conversation, Database};
use querymind::remote::{LoggingAnswerService, QueryMindClient};
use querymind::runtime::{
    AnswerService, LocalStorage, SessionRuntime, Storage, SubmissionReport, SubmissionStatus,
};
use querymind::state_machine::{DisplayTurn, Role, TransitionError};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type Session = SessionRuntime<Arc<dyn Storage>, Arc<dyn AnswerService>>;

const HELP: &str = "\
Commands:
  /new                   start a new conversation
  /list                  list conversations
  /open <n>              open conversation n
  /delete <n>            delete conversation n
  /rename <n> <title>    rename conversation n
  /name <display name>   change how you are greeted
  /health                check the QueryMind service
  /quit                  exit
Anything else is asked as a question.";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "querymind=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = ClientConfig::from_env();

    // Ensure database directory exists
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    tracing::info!(path = %config.db_path.display(), "Opening database");
    let db = Database::open(&config.db_path)?;

    let client = QueryMindClient::new(&config.api_url, config.ask_timeout)?;
    let storage: Arc<dyn Storage> = match config.history {
        HistoryBackend::Remote => Arc::new(client.clone()),
        HistoryBackend::Local => Arc::new(LocalStorage::new(db.clone())),
    };
    let answers: Arc<dyn AnswerService> =
        Arc::new(LoggingAnswerService::new(Arc::new(client.clone())));
    tracing::info!(
        api_url = %client.base_url(),
        history = ?config.history,
        user_id = %config.user_id,
        "QueryMind client starting"
    );

    let session: Session = SessionRuntime::new(config.user_id.clone(), storage, answers)
        .with_ask_timeout(config.ask_timeout);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    greet(&db, &config.user_id, &mut lines).await?;
    match session.refresh_conversations().await {
        Ok(conversations) => print_conversations(&conversations),
        Err(e) => println!("warning: {e}"),
    }
    println!("Type /help for commands.");

    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();

        let Some(command) = line.strip_prefix('/') else {
            let report = session.submit_question(line).await;
            print_report(&report);
            continue;
        };

        let (name, rest) = command.split_once(' ').unwrap_or((command, ""));
        let rest = rest.trim();
        match name {
            "quit" | "exit" => break,
            "help" => println!("{HELP}"),
            "new" => match session.create_conversation(None).await {
                Ok(conversation) => println!("Started \"{}\"", conversation.title),
                Err(e) => println!("warning: {e}"),
            },
            "list" => match session.refresh_conversations().await {
                Ok(conversations) => print_conversations(&conversations),
                Err(e) => println!("warning: {e}"),
            },
            "open" => {
                if let Some(conversation) = pick(&session, rest) {
                    println!("== {} ==", conversation.title);
                    for turn in session.open(conversation).await {
                        print_turn(&turn);
                    }
                }
            }
            "delete" => {
                if let Some(conversation) = pick(&session, rest) {
                    match session.delete_conversation(&conversation.id).await {
                        Ok(()) => println!("Deleted \"{}\"", conversation.title),
                        Err(e) => println!("warning: {e}"),
                    }
                }
            }
            "rename" => {
                let (index, title) = rest.split_once(' ').unwrap_or((rest, ""));
                if let Some(conversation) = pick(&session, index) {
                    match session.rename_conversation(&conversation.id, title).await {
                        Ok(renamed) => println!("Renamed to \"{}\"", renamed.title),
                        Err(e) => println!("warning: {e}"),
                    }
                }
            }
            "name" => {
                if rest.is_empty() {
                    println!("Usage: /name <display name>");
                } else {
                    db.set_display_name(&config.user_id, rest)?;
                    println!("Hello, {rest}!");
                }
            }
            "health" => match client.health().await {
                Ok(health) => println!(
                    "Service {} (device: {}, passages: {})",
                    health.status,
                    health.device.as_deref().unwrap_or("unknown"),
                    health
                        .passages_count
                        .map_or_else(|| "unknown".to_string(), |n| n.to_string())
                ),
                Err(e) => println!("warning: service unreachable: {e}"),
            },
            _ => println!("Unknown command /{name}. Type /help for commands."),
        }
    }

    Ok(())
}

/// Greet by stored display name, asking for one the first time
async fn greet(
    db: &Database,
    user_id: &str,
    lines: &mut Lines<BufReader<Stdin>>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(name) = db.get_display_name(user_id)? {
        println!("Welcome back, {name}!");
        return Ok(());
    }

    print!("What should I call you? ");
    std::io::stdout().flush()?;
    let name = lines.next_line().await?.unwrap_or_default();
    let name = name.trim();
    if name.is_empty() {
        println!("Welcome!");
    } else {
        db.set_display_name(user_id, name)?;
        println!("Nice to meet you, {name}!");
    }
    Ok(())
}

/// Conversation at a 1-based position in the last listing
fn pick(session: &Session, arg: &str) -> Option<Conversation> {
    let conversation = arg
        .trim()
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| session.conversations().into_iter().nth(i));
    if conversation.is_none() {
        println!("No conversation \"{arg}\". Use /list to see numbers.");
    }
    conversation
}

fn print_conversations(conversations: &[Conversation]) {
    if conversations.is_empty() {
        println!("No conversations yet. Ask something or use /new.");
        return;
    }
    for (i, conversation) in conversations.iter().enumerate() {
        println!(
            "{:>3}. {}  ({})",
            i + 1,
            conversation.title,
            conversation.created_at.format("%Y-%m-%d %H:%M")
        );
    }
}

fn print_turn(turn: &DisplayTurn) {
    match turn.role {
        Role::User => println!("you: {}", turn.content),
        Role::Assistant => println!("querymind: {}", turn.content),
    }
}

fn print_report(report: &SubmissionReport) {
    match &report.status {
        SubmissionStatus::Rejected(TransitionError::EmptyQuestion) => return,
        SubmissionStatus::Rejected(reason) => {
            println!("warning: {reason}");
            return;
        }
        SubmissionStatus::Detached => {
            println!("(answer arrived after you left that conversation)");
        }
        SubmissionStatus::Answered | SubmissionStatus::AskFailed(_) => {}
    }

    for turn in report
        .timeline_delta
        .iter()
        .filter(|t| t.role == Role::Assistant)
    {
        print_turn(turn);
    }
    for warning in report.warnings() {
        println!("warning: {warning}");
    }
}
