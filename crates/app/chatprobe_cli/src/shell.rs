//! Interactive console front end for the orchestrator.

use std::io::Write;
use std::sync::Arc;

use chatprobe_core::auth::Credential;
use chatprobe_core::config::ClientConfig;
use chatprobe_core::context::RequestContext;
use chatprobe_core::hub::{HubOptions, HubState, WsChannelFactory};
use chatprobe_core::models::{Conversation, Notification};
use chatprobe_core::orchestrator::{AlertLevel, Orchestrator, SessionSink};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::{Error, Result};

const HELP: &str = "\
Commands:
  /list                     show conversations
  /select <n>               join conversation n and load its history
  /refresh                  reload conversations
  /test                     test the API and both hubs
  /direct <user-id>         create a direct conversation
  /group <name> | <ids>     create a group (comma separated user ids)
  /state                    show hub states
  /help                     show this help
  /quit                     leave
Any other line is sent to the selected conversation.";

/// Prints everything the session reports to stdout.
struct ConsoleSink;

impl ConsoleSink {
    fn print(&self, line: &str) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{line}");
        let _ = out.flush();
    }
}

impl SessionSink for ConsoleSink {
    fn status(&self, line: &str) {
        self.print(&format!("* {line}"));
    }

    fn chat_line(&self, line: &str) {
        self.print(line);
    }

    fn clear_chat(&self) {
        self.print("--------------------------------");
    }

    fn conversations(&self, snapshot: &[Conversation]) {
        self.print(&format_conversations(snapshot));
    }

    fn notification(&self, notification: &Notification) {
        if let Some(caption) = &notification.caption {
            self.print(&format!("  ({caption})"));
        }
    }

    fn alert(&self, level: AlertLevel, title: &str, message: &str) {
        let tag = match level {
            AlertLevel::Info => "INFO",
            AlertLevel::Warning => "WARN",
            AlertLevel::Error => "ERROR",
        };
        self.print(&format!("[{tag}] {title}: {message}"));
    }
}

fn format_conversations(conversations: &[Conversation]) -> String {
    if conversations.is_empty() {
        return "No conversations".into();
    }
    conversations
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let kind = if c.is_group { "group" } else { "direct" };
            let name = if c.conversation_name.is_empty() {
                c.id.to_string()
            } else {
                c.conversation_name.clone()
            };
            format!("{:>3}. {name} [{kind}] ({})", i + 1, c.id)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_state(label: &str, state: Option<HubState>) -> String {
    match state {
        Some(state) => format!("{label}: {state}"),
        None => format!("{label}: not initialized"),
    }
}

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    List,
    /// Zero-based index.
    Select(usize),
    Refresh,
    Test,
    Direct(String),
    Group { name: String, participants: String },
    State,
    Help,
    Quit,
    Send(String),
    Empty,
    Invalid(String),
}

impl ShellCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Self::Send(line.to_string());
        };
        let (verb, arg) = match rest.split_once(char::is_whitespace) {
            Some((verb, arg)) => (verb, arg.trim()),
            None => (rest, ""),
        };
        match verb.to_ascii_lowercase().as_str() {
            "list" | "ls" => Self::List,
            "select" | "s" => match arg.parse::<usize>() {
                Ok(n) if n >= 1 => Self::Select(n - 1),
                _ => Self::Invalid(format!("/select expects a number from 1, got '{arg}'")),
            },
            "refresh" => Self::Refresh,
            "test" => Self::Test,
            "direct" => Self::Direct(arg.to_string()),
            "group" => match arg.split_once('|') {
                Some((name, ids)) => Self::Group {
                    name: name.trim().to_string(),
                    participants: ids.trim().to_string(),
                },
                None => Self::Group {
                    name: arg.to_string(),
                    participants: String::new(),
                },
            },
            "state" => Self::State,
            "help" | "?" => Self::Help,
            "quit" | "exit" | "q" => Self::Quit,
            other => Self::Invalid(format!("Unknown command /{other}. Type /help")),
        }
    }
}

/// Log in and run the interactive loop until `/quit` or end of input.
pub async fn run(config: ClientConfig, credential: Credential) -> Result<()> {
    let base_url = config.base_url()?;
    let ctx = RequestContext::new(base_url, credential)?;
    let options = HubOptions {
        skip_negotiation: config.skip_negotiation,
        ..HubOptions::default()
    };
    let factory = Arc::new(WsChannelFactory::with_options(ctx.clone(), options));
    let sink = Arc::new(ConsoleSink);
    let orchestrator = Orchestrator::new(config, ctx, factory, sink.clone());

    if !orchestrator.connect().await {
        orchestrator.shutdown().await;
        return Err(Error::Custom("Login failed".into()));
    }
    sink.print(HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match ShellCommand::parse(&line) {
            ShellCommand::Empty => {}
            ShellCommand::List => sink.print(&format_conversations(&orchestrator.conversations())),
            ShellCommand::Select(index) => {
                orchestrator.select_conversation(index).await;
            }
            ShellCommand::Refresh => {
                orchestrator.refresh_conversations().await;
            }
            ShellCommand::Test => orchestrator.test_connection().await,
            ShellCommand::Direct(user) => {
                orchestrator.create_direct(&user).await;
            }
            ShellCommand::Group { name, participants } => {
                orchestrator.create_group(&name, &participants).await;
            }
            ShellCommand::State => {
                sink.print(&format_state("Chat hub", orchestrator.chat_state().await));
                sink.print(&format_state(
                    "Notification hub",
                    orchestrator.notification_state().await,
                ));
            }
            ShellCommand::Help => sink.print(HELP),
            ShellCommand::Quit => break,
            ShellCommand::Send(content) => {
                orchestrator.send_message(&content).await;
            }
            ShellCommand::Invalid(reason) => sink.print(&reason),
        }
    }

    orchestrator.shutdown().await;
    Ok(())
}
