use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use leaddesk_app::app::{self, AppState};
use leaddesk_app::conversation::ConversationView;
use leaddesk_app::leads::{self, extract_user_id, LeadRow, UserSummary};
use leaddesk_app::messaging;
use leaddesk_app::protocol::{UiUpdate, UserCommand, View};
use leaddesk_app::stats;
use leaddesk_core::config::Config;
use leaddesk_core::db::Database;
use leaddesk_core::import;
use leaddesk_core::store::ConfiguredOperator;

use crate::render;

#[derive(Parser)]
#[command(name = "leaddesk")]
#[command(version)]
#[command(about = "Mortgage lead dashboard and live client messaging", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show how many mortgages fall into each loan-size bucket
    Stats,
    /// List the most recent leads
    Leads {
        /// Number of leads to show (defaults to the configured limit)
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Show a user's profile, by user id or lead path
    User { id: String },
    /// List every user
    Users,
    /// Send a message to a user
    Send {
        id: String,
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Follow the conversation with a user; each stdin line is sent
    Chat { id: String },
    /// Seed the database from CSV files
    Import {
        #[arg(long)]
        users: Option<PathBuf>,
        #[arg(long)]
        mortgages: Option<PathBuf>,
    },
}

pub async fn run(command: Commands, config: Config, db: Arc<Database>) -> Result<()> {
    match command {
        Commands::Stats => show_stats(&config, &db).await,
        Commands::Leads { limit } => show_leads(&config, &db, limit).await,
        Commands::User { id } => show_user(&config, &db, &id).await,
        Commands::Users => show_users(&config, &db).await,
        Commands::Send { id, text } => send(&config, &db, &id, &text.join(" ")).await,
        Commands::Chat { id } => chat(config, db, id).await,
        Commands::Import { users, mortgages } => {
            if users.is_none() && mortgages.is_none() {
                anyhow::bail!("nothing to import: pass --users and/or --mortgages");
            }
            let summary = import::import_files(&db, users.as_deref(), mortgages.as_deref())?;
            println!(
                "Imported {} users and {} mortgages",
                summary.users, summary.mortgages
            );
            Ok(())
        }
    }
}

async fn show_stats(config: &Config, db: &Database) -> Result<()> {
    let stats = stats::load_stats(db, &config.statistics, &config.display.currency_symbol)
        .await
        .context("failed to aggregate mortgage statistics")?;
    print!("{}", render::stats(&stats));
    Ok(())
}

async fn show_leads(config: &Config, db: &Database, limit: Option<usize>) -> Result<()> {
    let limit = limit.unwrap_or(config.leads.limit);
    let leads = leads::recent_leads(db, &config.leads, limit)
        .await
        .context("failed to fetch recent leads")?;
    let rows: Vec<LeadRow> = leads
        .iter()
        .map(|lead| LeadRow::new(lead, &config.display.currency_symbol))
        .collect();
    print!("{}", render::leads(&rows));
    Ok(())
}

async fn show_user(config: &Config, db: &Database, id_or_path: &str) -> Result<()> {
    let id = if id_or_path.contains('/') {
        extract_user_id(id_or_path)?
    } else {
        id_or_path.to_string()
    };
    match leads::fetch_user(db, &config.messages.users_collection, &id).await? {
        Some(profile) => print!("{}", render::profile(&id, &profile)),
        None => anyhow::bail!("no user with id `{id}`"),
    }
    Ok(())
}

async fn show_users(config: &Config, db: &Database) -> Result<()> {
    let users = leads::list_users(db, &config.messages.users_collection).await?;
    print!("{}", render::users(&users));
    Ok(())
}

async fn send(config: &Config, db: &Database, id: &str, text: &str) -> Result<()> {
    match messaging::send_message(db, &config.messages, id, text).await? {
        Some(path) => println!("Sent {}", path.as_str()),
        None => println!("Nothing to send"),
    }
    Ok(())
}

/// Run the event loop the way an interactive front end does: sign in,
/// open the conversation, then forward stdin lines until EOF or Ctrl+C.
async fn chat(config: Config, db: Arc<Database>, id: String) -> Result<()> {
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (ui_tx, mut ui_rx) = mpsc::channel(256);
    let (stream_tx, stream_rx) = mpsc::unbounded_channel();

    let auth = Arc::new(ConfiguredOperator::new(config.operator_identity()));
    let state = AppState::new(config, db, auth, stream_tx);
    let app_handle = tokio::spawn(app::run(cmd_rx, stream_rx, ui_tx, state));

    for cmd in [
        UserCommand::SignIn,
        UserCommand::ShowView(View::Messages),
        UserCommand::SelectUser(id),
    ] {
        cmd_tx.send(cmd).await.context("application loop stopped")?;
    }

    let input_handle = tokio::spawn(forward_stdin(cmd_tx));

    let mut printer = ChatPrinter::default();
    while let Some(update) = ui_rx.recv().await {
        print!("{}", printer.render(&update));
    }

    input_handle.abort();
    app_handle.await.context("application loop panicked")??;
    info!("Chat session ended");
    Ok(())
}

async fn forward_stdin(cmd_tx: mpsc::Sender<UserCommand>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(text)) => {
                    if cmd_tx.send(UserCommand::SendMessage(text)).await.is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("stdin read failed: {}", e);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    let _ = cmd_tx.send(UserCommand::Quit).await;
}

/// Turns the full-state updates the loop pushes into incremental
/// terminal output.
#[derive(Default)]
struct ChatPrinter {
    counterpart: Option<UserSummary>,
    printed: HashSet<String>,
    placeholder: Option<&'static str>,
    notices_seen: usize,
}

impl ChatPrinter {
    fn render(&mut self, update: &UiUpdate) -> String {
        match update {
            UiUpdate::SignedIn(identity) => format!("Signed in as {}\n", identity.display_name),
            UiUpdate::SignedOut => "Signed out\n".to_string(),
            UiUpdate::Conversation { counterpart, view } => {
                self.conversation(counterpart.as_ref(), view)
            }
            UiUpdate::Notices(notices) => {
                if notices.len() < self.notices_seen {
                    self.notices_seen = 0;
                }
                let fresh: String = notices[self.notices_seen..]
                    .iter()
                    .map(render::notice)
                    .collect();
                self.notices_seen = notices.len();
                fresh
            }
            _ => String::new(),
        }
    }

    fn conversation(
        &mut self,
        counterpart: Option<&UserSummary>,
        view: &ConversationView,
    ) -> String {
        if counterpart.map(|c| &c.id) != self.counterpart.as_ref().map(|c| &c.id) {
            self.counterpart = counterpart.cloned();
            self.printed = view
                .messages()
                .iter()
                .map(|m| m.path.as_str().to_string())
                .collect();
            self.placeholder = view.placeholder();
            return render::conversation(counterpart, view);
        }

        if let Some(placeholder) = view.placeholder() {
            let fresh = self.placeholder != Some(placeholder);
            self.placeholder = Some(placeholder);
            return if fresh {
                format!("{placeholder}\n")
            } else {
                String::new()
            };
        }
        self.placeholder = None;

        let mut out = String::new();
        for message in view.messages() {
            if self.printed.insert(message.path.as_str().to_string()) {
                out.push_str(&render::message_line(counterpart, message));
            }
        }
        out
    }
}
