use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::cli::commands::*;
use crate::cli::output::*;
use crate::coordinator::{Coordinator, Pending};
use crate::io::config_io;
use crate::io::medium::FileMedium;
use crate::model::config::Config;
use crate::model::task::Task;
use crate::store::LocalStore;
use crate::view::{self, TaskFilter};

type Session = Coordinator<LocalStore<FileMedium>>;
type CmdResult = Result<(), Box<dyn std::error::Error>>;

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub fn dispatch(cli: Cli) -> CmdResult {
    let dir = config_io::data_dir(cli.data_dir.as_deref().map(Path::new));
    let config = config_io::read_config(&dir)?;
    init_logging(&config);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cli.command, cli.json, dir, config))
}

/// Log to stderr so `--json` output on stdout stays parseable.
/// OPTIMIST_LOG takes precedence over the configured filter.
fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_env("OPTIMIST_LOG")
        .unwrap_or_else(|_| EnvFilter::new(&config.log.filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run(command: Commands, json: bool, dir: PathBuf, config: Config) -> CmdResult {
    let medium = Arc::new(FileMedium::new(dir, config.store.namespace.clone()));
    tracing::debug!(medium = %medium.path().display(), "opening store");
    let session = Coordinator::new(LocalStore::new(medium, config.store.latency()));
    session.load().await;

    match command {
        Commands::List(args) => cmd_list(&session, args, json),
        Commands::Add(args) => {
            let pending = session.add_task(&args.title, args.notes.as_deref());
            finish(&session, pending, json).await
        }
        Commands::Toggle(args) => {
            let id = match_id(&session.tasks(), &args.id);
            finish(&session, session.toggle_complete(&id), json).await
        }
        Commands::Edit(args) => cmd_edit(&session, args, json).await,
        Commands::Rm(args) => {
            let id = match_id(&session.tasks(), &args.id);
            finish(&session, session.delete_task(&id), json).await
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Expand a short id to the full id of the single task it identifies.
/// Anything ambiguous or unknown is passed through unchanged.
fn match_id(tasks: &[Task], given: &str) -> String {
    if tasks.iter().any(|t| t.id == given) {
        return given.to_string();
    }
    let mut hits = tasks.iter().filter(|t| short_id(&t.id) == given);
    match (hits.next(), hits.next()) {
        (Some(task), None) => task.id.clone(),
        _ => given.to_string(),
    }
}

/// Wait for the store, then report the confirmed record or the rollback.
async fn finish(session: &Session, pending: Pending, json: bool) -> CmdResult {
    let intent = pending.intent();
    let target = pending.target().to_string();
    let optimistic = pending.tasks().to_vec();
    let outcome = pending.settle().await;

    if json {
        let (task, error) = match &outcome {
            Ok(task) => (task.clone(), None),
            Err(notice) => (None, Some(notice_to_json(notice))),
        };
        let out = MutationJson {
            intent: intent.to_string(),
            target: target.clone(),
            optimistic,
            settled: session.tasks(),
            task,
            error,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
    }

    match outcome {
        Ok(task) => {
            if !json {
                println!("{}", format_outcome(intent, task.as_ref(), &target));
            }
            Ok(())
        }
        Err(notice) => Err(Box::new(notice)),
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_list(session: &Session, args: ListArgs, json: bool) -> CmdResult {
    let filter = TaskFilter::parse_filter(&args.filter).ok_or_else(|| {
        format!(
            "invalid filter '{}' (expected all, active, or completed)",
            args.filter
        )
    })?;
    let query = args.search.clone().unwrap_or_default();
    let tasks = session.tasks();
    let shown = view::visible(&tasks, filter, &query);

    if json {
        let out = TaskListJson {
            filter: filter.to_string(),
            search: args.search,
            tasks: shown,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if shown.is_empty() {
        println!("{}", EMPTY_STATE);
    } else {
        for line in format_task_lines(&shown) {
            println!("{}", line);
        }
    }
    Ok(())
}

async fn cmd_edit(session: &Session, args: EditArgs, json: bool) -> CmdResult {
    let tasks = session.tasks();
    let id = match_id(&tasks, &args.id);
    let current = tasks
        .iter()
        .find(|t| t.id == id)
        .ok_or_else(|| format!("task not found: {}", args.id))?;
    let title = args.title.unwrap_or_else(|| current.title.clone());
    let notes = args.notes.unwrap_or_else(|| current.notes.clone());
    finish(session, session.save_task(&id, &title, &notes), json).await
}
