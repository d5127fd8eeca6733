//! triage-runner: batch fraud-case triage.
//!
//! Usage:
//!   triage-runner run C-1001 C-1002 --fixtures evidence.json --classifier-cmd ./classify.sh
//!   triage-runner run --fetch-open --live --workers 4 --fixtures ... --classifier-cmd ...
//!   triage-runner cache stats

mod backends;
mod cli;

use anyhow::{Context, Result};
use backends::{CommandClassifier, DirCaseSource, JsonlTicketUpdater};
use clap::Parser;
use cli::{CacheCommands, Cli, Commands, RunArgs};
use std::sync::Arc;
use triage_core::{
    batch::{BatchPolicy, BatchRunner, ErrorPolicy},
    cache::InvestigationCache,
    config::TriageConfig,
    testkit::MemoryEvidenceStore,
    InvestigationEngine,
};

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let cache = Arc::new(
        InvestigationCache::open(&cli.db).with_context(|| format!("opening cache {}", cli.db))?,
    );

    match cli.command {
        Commands::Run(args) => {
            let config = Arc::new(TriageConfig::load(&cli.data_dir)?);
            let failed = run(config, cache, args)?;
            if failed {
                std::process::exit(1);
            }
        }
        Commands::Cache { action } => cache_command(&cache, action)?,
    }
    Ok(())
}

fn run(config: Arc<TriageConfig>, cache: Arc<InvestigationCache>, args: RunArgs) -> Result<bool> {
    let evidence = Arc::new(MemoryEvidenceStore::load(&args.fixtures)?);
    let engine = InvestigationEngine::new(
        Arc::clone(&config),
        Arc::new(DirCaseSource::new(&args.cases_dir)),
        evidence,
        Arc::new(CommandClassifier::new(&args.classifier_cmd, &config.timeouts)),
        cache,
    );

    let mut case_ids = args.case_ids.clone();
    if let Some(file) = &args.file {
        let content = std::fs::read_to_string(file).with_context(|| format!("reading {file}"))?;
        case_ids.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(String::from),
        );
    }
    if args.fetch_open {
        case_ids.extend(engine.open_case_ids()?);
    }
    let mut seen = std::collections::HashSet::new();
    case_ids.retain(|id| seen.insert(id.clone()));
    if case_ids.is_empty() {
        anyhow::bail!("no case ids given (pass ids, --file or --fetch-open)");
    }

    let policy = BatchPolicy {
        on_error: if args.stop_on_error { ErrorPolicy::Stop } else { ErrorPolicy::Continue },
        force:    args.force,
        dry_run:  !args.live,
        workers:  args.workers.unwrap_or(config.workers),
    };
    log::info!(
        "Investigating {} cases ({} workers, {})",
        case_ids.len(),
        policy.workers,
        if policy.dry_run { "dry run" } else { "live" },
    );
    let mut runner = BatchRunner::new(&engine, policy);
    if args.live {
        runner = runner.with_updater(Arc::new(JsonlTicketUpdater::new(&args.ticket_log)));
    }
    let report = runner.run(&case_ids);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for case in &report.cases {
            println!("{}", case.line());
        }
        let s = &report.summary;
        println!();
        println!("Cases:          {}", s.total);
        println!("  succeeded:    {}", s.succeeded);
        println!("  cached:       {}", s.cached);
        println!("  no account:   {}", s.no_account);
        println!("  manual review: {}", s.manual_review);
        println!("  failed:       {}", s.failed);
        println!("  not run:      {}", s.not_run);
        println!("Fraud likely:   {}  Not fraud: {}", s.fraud_likely, s.not_fraud);
        if let Some(avg) = s.avg_confidence {
            println!("Avg confidence: {avg:.2}");
        }
        println!("Stages:         {} executed, {} skipped", s.stages_executed, s.stages_skipped);
        println!("Cost avoided:   ~{}ms", s.cost_avoided_ms);
        println!("Mode:           {}", if args.live { "live" } else { "dry run" });
    }
    Ok(report.exit_failed())
}

fn cache_command(cache: &InvestigationCache, action: CacheCommands) -> Result<()> {
    match action {
        CacheCommands::Stats => {
            let stats = cache.stats()?;
            println!("Cached cases:   {}", stats.total);
            println!("Fraud likely:   {}", stats.fraud_likely);
            println!("Not fraud:      {}", stats.not_fraud);
            match stats.avg_confidence {
                Some(avg) => println!("Avg confidence: {avg:.2}"),
                None => println!("Avg confidence: -"),
            }
            println!("Cost avoided:   ~{}ms", cache.cost_avoided_total_ms()?);
        }
        CacheCommands::Recent { limit } => {
            for s in cache.list_recent(limit)? {
                println!(
                    "{}  {}  {:<14} {}",
                    s.investigated_at,
                    s.case_id,
                    s.state.as_str(),
                    s.status.map_or("-", |v| v.as_str()),
                );
            }
        }
        CacheCommands::Show { case_id } => match cache.get_full(&case_id)? {
            Some(outcome) => println!("{}", serde_json::to_string_pretty(&outcome)?),
            None => println!("{case_id}: not cached"),
        },
        CacheCommands::Events { case_id } => {
            for e in cache.events_for_case(&case_id)? {
                println!("{} {} #{:<3} {:<22} {}", e.created_at, e.attempt_id, e.seq, e.event_type, e.payload);
            }
        }
        CacheCommands::Delete { case_id } => {
            if cache.delete(&case_id)? {
                println!("{case_id}: deleted");
            } else {
                println!("{case_id}: not cached");
            }
        }
        CacheCommands::Clear => println!("Cleared {} cases", cache.clear()?),
    }
    Ok(())
}
