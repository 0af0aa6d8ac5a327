//! Command-line front end for swapmail.
//!
//! Every command prints JSON on stdout; logs go to stderr.

#![forbid(unsafe_code)]

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use swapmail_core::{Config, MessageId, ProjectId, SenderDisplay, ThreadKey, UserId, resolve};
use swapmail_store::{MessageStore, StoreError};
use swapmail_sync::{MessagingClient, Session, SyncContext};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Core(#[from] swapmail_core::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type CliResult<T> = Result<T, CliError>;

#[derive(Parser, Debug)]
#[command(name = "swapmail", version, about = "Marketplace conversations from the command line")]
pub struct Cli {
    /// Journal file; overrides `SWAPMAIL_JOURNAL_PATH`.
    #[arg(long, global = true)]
    pub journal: Option<PathBuf>,
    /// User to act as.
    #[arg(long = "as", global = true)]
    pub user: Option<String>,
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,
    #[command(subcommand)]
    pub command: Commands,
}

/// Thread selection shared by several commands.
#[derive(Args, Debug, Clone, Default)]
pub struct ThreadArgs {
    #[arg(long)]
    pub project: Option<String>,
    /// Other participant (direct threads) or recipient (project threads).
    #[arg(long)]
    pub with: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the canonical key for a thread.
    Resolve {
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        a: Option<String>,
        #[arg(long)]
        b: Option<String>,
    },
    /// Send a message and print the stored copy.
    Send {
        #[arg(long)]
        to: String,
        #[arg(long)]
        project: Option<String>,
        content: String,
    },
    /// Print a thread's messages, oldest first.
    List {
        #[command(flatten)]
        thread: ThreadArgs,
    },
    /// Mark a message read.
    Read { id: String },
    /// Poll a thread once as its view would, sending read receipts, and
    /// print what the view renders.
    Open {
        #[command(flatten)]
        thread: ThreadArgs,
    },
    /// Conversations involving the acting user, newest first.
    Inbox,
    /// Unread messages addressed to the acting user.
    Unread,
    /// Set the acting user's display profile.
    Profile {
        #[arg(long)]
        name: String,
        #[arg(long)]
        avatar: Option<String>,
    },
}

/// Parse arguments, run, and return the process exit code.
#[must_use]
pub fn run() -> i32 {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match execute(cli, config, &mut out) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {err}");
            exit_code(&err)
        }
    }
}

fn exit_code(err: &CliError) -> i32 {
    match err {
        CliError::InvalidArgument(_) => 2,
        CliError::Core(e) if e.is_validation() => 2,
        CliError::Store(StoreError::InvalidArgument { .. } | StoreError::InvalidThread(_)) => 2,
        _ => 1,
    }
}

/// Run `cli` against the store described by `config`, writing JSON to `out`.
pub fn execute(cli: Cli, mut config: Config, out: &mut dyn Write) -> CliResult<()> {
    if let Commands::Resolve { project, a, b } = &cli.command {
        let key = resolve(
            project_id(project.as_deref()).as_ref(),
            a.as_deref().map(UserId::from).as_ref(),
            b.as_deref().map(UserId::from).as_ref(),
        )?;
        return emit(out, &key, cli.pretty);
    }

    let user = cli
        .user
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(UserId::from)
        .ok_or_else(|| CliError::InvalidArgument("--as <USER> is required".into()))?;
    if cli.journal.is_some() {
        config.journal_path.clone_from(&cli.journal);
    }
    tracing::debug!(journal = ?config.journal_path, "opening store");
    let store = Arc::new(MessageStore::from_config(&config)?);
    let client = MessagingClient::new(
        Session::new(user.clone()),
        SyncContext::local(Arc::clone(&store), config.sync.clone()),
    );

    match cli.command {
        // Handled before the store is opened.
        Commands::Resolve { .. } => Ok(()),
        Commands::Send {
            to,
            project,
            content,
        } => {
            let message =
                client.send_now(&UserId::from(to), project_id(project.as_deref()).as_ref(), &content)?;
            tracing::info!(message_id = %message.id, "message sent");
            emit(out, &message, cli.pretty)
        }
        Commands::List { thread } => {
            let key = thread_key(&user, &thread)?;
            emit(out, &client.list_messages(&key)?, cli.pretty)
        }
        Commands::Read { id } => {
            let id: MessageId = id.parse()?;
            emit(out, &client.mark_message_read(id)?, cli.pretty)
        }
        Commands::Open { thread } => {
            let key = thread_key(&user, &thread)?;
            let counterpart = thread.with.as_deref().map(UserId::from);
            let view = client.open_thread(key, counterpart)?;
            let now = Instant::now();
            // The first poll sends receipts, which makes a refresh due at once.
            view.tick(now);
            view.tick(now);
            emit(out, &view.snapshot(), cli.pretty)
        }
        Commands::Inbox => emit(out, &client.inbox()?, cli.pretty),
        Commands::Unread => emit(
            out,
            &serde_json::json!({ "user": user, "unread": client.unread_count()? }),
            cli.pretty,
        ),
        Commands::Profile { name, avatar } => {
            let profile = SenderDisplay {
                id: user,
                name,
                avatar_url: avatar,
            };
            store.upsert_profile(profile.clone())?;
            emit(out, &profile, cli.pretty)
        }
    }
}

fn project_id(raw: Option<&str>) -> Option<ProjectId> {
    raw.map(ProjectId::from).filter(|p| !p.is_blank())
}

fn thread_key(user: &UserId, args: &ThreadArgs) -> CliResult<ThreadKey> {
    let project = project_id(args.project.as_deref());
    let other = args.with.as_deref().map(UserId::from);
    if project.is_none() && other.is_none() {
        return Err(CliError::InvalidArgument(
            "pass --project <ID> or --with <USER>".into(),
        ));
    }
    Ok(resolve(project.as_ref(), Some(user), other.as_ref())?)
}

fn emit<T: Serialize + ?Sized>(out: &mut dyn Write, value: &T, pretty: bool) -> CliResult<()> {
    if pretty {
        serde_json::to_writer_pretty(&mut *out, value)?;
    } else {
        serde_json::to_writer(&mut *out, value)?;
    }
    writeln!(out)?;
    Ok(())
}
