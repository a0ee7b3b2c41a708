//! Operator entry point for the community reply agent
//!
//! Wires the request store, forum client, delivery client, and approval
//! coordinator together and exposes them to operator tooling: listing
//! requests, executing decisions, inspecting audit history, and
//! monitoring the intake directory the scheduler drops drafts into.

use agent_core::{
    ActorId, AgentConfig, ApprovalCoordinator, AuditLog, Decision, DecisionOutcome,
    DeliveryClient, IntakeRecord, RedditClient, RequestFilter, RequestId, RequestStatus,
    RequestStore,
};
use clap::{Arg, Command};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging with INFO as default if RUST_LOG not set
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = Command::new("agent-server")
        .version("1.0.0")
        .about("Community reply agent: approval and delivery pipeline")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config/credentials.json"),
        )
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .value_name("DIR")
                .help("Data directory for request and audit files")
                .default_value("data"),
        )
        .arg(
            Arg::new("actor")
                .long("actor")
                .value_name("ID")
                .help("Reviewer id recorded in the audit trail")
                .default_value("admin"),
        )
        .arg(
            Arg::new("list")
                .long("list")
                .help("List requests")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("status")
                .long("status")
                .value_name("STATUS")
                .help("Filter --list by status (pending|approved|rejected|error)"),
        )
        .arg(
            Arg::new("history")
                .long("history")
                .value_name("REQUEST_ID")
                .help("Show the audit history of a request"),
        )
        .arg(
            Arg::new("decide")
                .long("decide")
                .value_name("REQUEST_ID")
                .help("Execute a decision on a request"),
        )
        .arg(
            Arg::new("approve")
                .long("approve")
                .help("Approve the request given to --decide")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("reject")
                .long("reject")
                .help("Reject the request given to --decide")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("feedback")
                .long("feedback")
                .value_name("TEXT")
                .help("Reviewer feedback recorded with the decision"),
        )
        .arg(
            Arg::new("edited-reply")
                .long("edited-reply")
                .value_name("FILE")
                .help("File with an edited reply to post instead of the draft"),
        )
        .arg(
            Arg::new("monitor-intake")
                .long("monitor-intake")
                .help("Watch the intake directory for new drafts")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    // Load configuration
    let config_path = matches.get_one::<String>("config").unwrap();
    let config = AgentConfig::from_file(config_path)?;
    log::info!("Loaded configuration from {}", config_path);

    if config.delivery.dry_run {
        log::info!("Dry run is ON: approved replies will be recorded, not posted");
    }

    let data_dir = PathBuf::from(matches.get_one::<String>("data-dir").unwrap());
    log::info!("Using data directory: {}", data_dir.display());

    let store = Arc::new(RequestStore::new(&data_dir)?);
    let audit = Arc::new(AuditLog::new(&data_dir)?);
    let forum = Arc::new(RedditClient::new(config.forum.clone()));
    let delivery = Arc::new(DeliveryClient::new(forum, &config.delivery));
    let coordinator = Arc::new(ApprovalCoordinator::new(
        store.clone(),
        delivery,
        audit.clone(),
        config.delivery.dry_run,
    ));

    let actor = ActorId::new(matches.get_one::<String>("actor").unwrap().clone());

    if matches.get_flag("list") {
        let filter = match matches.get_one::<String>("status") {
            Some(s) => {
                let status = RequestStatus::parse(s)
                    .ok_or_else(|| format!("Unknown status filter: {}", s))?;
                RequestFilter::with_status(status)
            }
            None => RequestFilter::default(),
        };

        let requests = store.list(&filter)?;
        for request in &requests {
            println!(
                "{}  {:<9} {:<12} conf={:.2}  {}  {}",
                request.id,
                request.status,
                request.channel,
                request.agent_confidence,
                request.created_at.format("%Y-%m-%d %H:%M"),
                request.title,
            );
        }

        let counts = store.status_counts()?;
        let total: usize = counts.values().sum();
        println!(
            "\n{} total ({} pending, {} approved, {} rejected, {} error)",
            total,
            counts[&RequestStatus::Pending],
            counts[&RequestStatus::Approved],
            counts[&RequestStatus::Rejected],
            counts[&RequestStatus::Error],
        );
    } else if let Some(id) = matches.get_one::<String>("history") {
        let request_id = RequestId::from_string(id)?;
        for event in audit.history(&request_id)? {
            println!(
                "{}  {:<17} actor={}  {}",
                event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                format!("{:?}", event.action),
                event.actor,
                event.payload,
            );
        }
    } else if let Some(id) = matches.get_one::<String>("decide") {
        let request_id = RequestId::from_string(id)?;

        let decision = match (matches.get_flag("approve"), matches.get_flag("reject")) {
            (true, false) => Decision::Approve,
            (false, true) => Decision::Reject,
            _ => return Err("Pass exactly one of --approve or --reject with --decide".into()),
        };

        let feedback = matches.get_one::<String>("feedback").cloned();
        let edited_reply = match matches.get_one::<String>("edited-reply") {
            Some(path) => Some(std::fs::read_to_string(path)?),
            None => None,
        };

        let outcome = coordinator
            .decide(&request_id, decision, &actor, feedback, edited_reply)
            .await?;

        match outcome {
            DecisionOutcome::Rejected => println!("Request {} rejected", request_id),
            DecisionOutcome::Approved {
                reply_id,
                already_sent,
                simulated,
            } => {
                if simulated {
                    println!("Request {} approved (dry run, nothing posted)", request_id);
                } else if already_sent {
                    println!(
                        "Request {} approved; the item already had our reply",
                        request_id
                    );
                } else {
                    println!(
                        "Request {} approved and posted as reply {}",
                        request_id,
                        reply_id.map(|r| r.to_string()).unwrap_or_default()
                    );
                }
            }
            DecisionOutcome::DeliveryFailed { error } => {
                eprintln!(
                    "Delivery failed for request {}: {} (request kept in error state for retry)",
                    request_id, error
                );
                std::process::exit(1);
            }
        }
    } else if matches.get_flag("monitor-intake") {
        monitor_intake(coordinator, &data_dir).await?;
    } else {
        log::error!("No action specified. Use --help for options.");
        std::process::exit(1);
    }

    Ok(())
}

/// Watch the intake directory and feed every dropped record through the
/// coordinator, moving files to processed/ or failed/
async fn monitor_intake(
    coordinator: Arc<ApprovalCoordinator>,
    data_dir: &Path,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let intake_dir = data_dir.join("intake");
    let processed_dir = intake_dir.join("processed");
    let failed_dir = intake_dir.join("failed");

    std::fs::create_dir_all(&processed_dir)?;
    std::fs::create_dir_all(&failed_dir)?;

    log::info!("Monitoring intake directory {}/", intake_dir.display());

    // Set up file system watcher
    let (tx, rx) = channel();
    let mut watcher = RecommendedWatcher::new(
        move |result: Result<Event, notify::Error>| {
            if let Ok(event) = result {
                let _ = tx.send(event);
            }
        },
        notify::Config::default(),
    )?;
    watcher.watch(&intake_dir, RecursiveMode::NonRecursive)?;

    // Process files that were already present
    for entry in std::fs::read_dir(&intake_dir)? {
        let entry = entry?;
        if entry.path().is_file() {
            process_intake_file(&coordinator, &entry.path(), &processed_dir, &failed_dir);
        }
    }

    loop {
        match rx.recv() {
            Ok(event) => {
                if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    for path in event.paths {
                        if path.is_file() {
                            process_intake_file(&coordinator, &path, &processed_dir, &failed_dir);
                        }
                    }
                }
            }
            Err(e) => {
                log::error!("Watcher error: {}", e);
                tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
            }
        }
    }
}

fn process_intake_file(
    coordinator: &ApprovalCoordinator,
    path: &Path,
    processed_dir: &Path,
    failed_dir: &Path,
) {
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return;
    };
    if !file_name.ends_with(".json") {
        return;
    }

    log::info!("Processing intake file: {}", file_name);

    let result = std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|content| {
            serde_json::from_str::<IntakeRecord>(&content).map_err(|e| e.to_string())
        })
        .and_then(|record| {
            coordinator
                .intake(record.item, record.draft, record.moderation)
                .map_err(|e| e.to_string())
        });

    let destination_dir = match &result {
        Ok(request_id) => {
            log::info!("Intake file {} queued as request {}", file_name, request_id);
            processed_dir
        }
        Err(e) => {
            log::error!("Failed to process intake file {}: {}", file_name, e);
            failed_dir
        }
    };

    if let Err(e) = std::fs::rename(path, destination_dir.join(file_name)) {
        log::error!("Failed to move intake file {}: {}", file_name, e);
    }
}
