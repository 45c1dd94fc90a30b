use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "opt", about = concat!("optimist v", env!("CARGO_PKG_VERSION"), " - a task list that never waits"), version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Use a different data directory (default: $OPTIMIST_DIR or ~/.local/share/optimist)
    #[arg(short = 'C', long = "data-dir", global = true)]
    pub data_dir: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List tasks, newest first
    List(ListArgs),
    /// Add a task to the top of the list
    Add(AddArgs),
    /// Flip a task between active and completed
    Toggle(IdArg),
    /// Change a task's title and/or notes
    Edit(EditArgs),
    /// Delete a task
    Rm(IdArg),
}

#[derive(Args)]
pub struct ListArgs {
    /// Which tasks to show (all, active, completed)
    #[arg(long, default_value = "all")]
    pub filter: String,
    /// Only tasks whose title or notes contain this text
    #[arg(long)]
    pub search: Option<String>,
}

#[derive(Args)]
pub struct AddArgs {
    /// Task title
    pub title: String,
    /// Optional notes
    #[arg(long)]
    pub notes: Option<String>,
}

#[derive(Args)]
pub struct IdArg {
    /// Task ID (full, or the short form shown by `opt list`)
    pub id: String,
}

#[derive(Args)]
pub struct EditArgs {
    /// Task ID (full, or the short form shown by `opt list`)
    pub id: String,
    /// New title (default: keep current)
    #[arg(long)]
    pub title: Option<String>,
    /// New notes (default: keep current; pass "" to clear)
    #[arg(long)]
    pub notes: Option<String>,
}
