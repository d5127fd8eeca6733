//! Command-line definition for triage-runner.

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "triage-runner")]
#[command(about = "Batch fraud-case triage against file-backed collaborators", long_about = None)]
pub struct Cli {
    /// Directory holding triage/triage_config.json
    #[arg(long, global = true, default_value = "./data")]
    pub data_dir: String,

    /// Investigation cache database
    #[arg(long, global = true, default_value = "triage.db")]
    pub db: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Investigate a batch of cases
    Run(RunArgs),

    /// Inspect or maintain the investigation cache
    Cache {
        #[command(subcommand)]
        action: CacheCommands,
    },
}

#[derive(Args)]
pub struct RunArgs {
    /// Case ids to investigate
    pub case_ids: Vec<String>,

    /// File with one case id per line (# starts a comment)
    #[arg(long)]
    pub file: Option<String>,

    /// Investigate every open case the case source reports
    #[arg(long)]
    pub fetch_open: bool,

    /// Ignore cached results
    #[arg(long)]
    pub force: bool,

    /// Stop at the first failed case
    #[arg(long)]
    pub stop_on_error: bool,

    /// Write verdicts to the ticket log instead of a dry run
    #[arg(long)]
    pub live: bool,

    /// Worker threads (defaults to the config value)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Directory of <case_id>.json case files
    #[arg(long, default_value = "./cases")]
    pub cases_dir: String,

    /// Evidence fixture file (rows per stage)
    #[arg(long)]
    pub fixtures: String,

    /// Shell command answering classification requests on stdin
    #[arg(long)]
    pub classifier_cmd: String,

    /// Where live ticket updates are appended, one JSON object per line
    #[arg(long, default_value = "ticket_updates.jsonl")]
    pub ticket_log: String,

    /// Print the full report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Totals, fraud split, average confidence, cost avoided
    Stats,
    /// Most recent cached investigations
    Recent {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Full cached outcome of one case
    Show { case_id: String },
    /// Audit trail of one case
    Events { case_id: String },
    /// Drop one case from the cache
    Delete { case_id: String },
    /// Drop every cached case
    Clear,
}
