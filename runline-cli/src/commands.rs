//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use runline_core::checkpoint::naming::LOG_FILE;
use runline_core::config::{default_config_toml, load_config};
use runline_core::lineage::LineageNode;
use runline_core::progress::LogRecord;
use runline_core::{
    CheckpointManifest, CheckpointScan, EpochMetrics, LineageTree, ProgressLog,
    RunDirectoryResolver, RunMode, RunSession, SplitMetrics,
};
use std::path::{Path, PathBuf};
use tracing::info;

const DEFAULT_CONFIG_FILE: &str = "runline.toml";

/// Handle a CLI subcommand.
pub fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Resolve { config } => handle_resolve(&config),
        Commands::Tree { dir, json } => handle_tree(&dir, json),
        Commands::Inspect { run_dir, json } => handle_inspect(&run_dir, json),
        Commands::Log { run_dir } => handle_log(&run_dir),
        Commands::Config { action } => handle_config(action),
        Commands::Simulate { config, epochs } => handle_simulate(&config, epochs),
    }
}

fn handle_resolve(config_path: &Path) -> anyhow::Result<()> {
    let mut config = load_config(config_path, None)
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
    config.runtime.print_only = true;

    let run = RunDirectoryResolver::new().resolve(&config)?;
    println!("Mode:  {}", run.mode.name());
    println!("Root:  {}", run.root.planned().display());
    match &run.mode {
        RunMode::Fresh => {}
        RunMode::Resume { checkpoint, epoch } => {
            println!("From:  {} (epoch {})", checkpoint.display(), epoch);
        }
        RunMode::Branch {
            checkpoint,
            fork_epoch,
            ..
        } => {
            println!("From:  {} (fork epoch {})", checkpoint.display(), fork_epoch);
        }
    }
    Ok(())
}

fn handle_tree(dir: &Path, json: bool) -> anyhow::Result<()> {
    let tree = LineageTree::discover(dir)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&tree)?);
        return Ok(());
    }
    println!("{} ({} runs)", dir.display(), tree.run_count());
    print_node(&tree.root, 0);
    Ok(())
}

fn print_node(node: &LineageNode, depth: usize) {
    let name = node
        .fork
        .map(|f| f.to_string())
        .unwrap_or_else(|| "root".to_string());
    let latest = node
        .latest_epoch
        .map(|e| format!("last epoch {e}"))
        .unwrap_or_else(|| "no checkpoints".to_string());
    println!("{}{} ({})", "  ".repeat(depth + 1), name, latest);
    for child in &node.children {
        print_node(child, depth + 1);
    }
}

#[derive(Debug, serde::Serialize)]
struct InspectReport {
    run_dir: PathBuf,
    epochs: Vec<u64>,
    latest_epoch: Option<u64>,
    best_epoch: Option<u64>,
    log_rows: usize,
    branch_points: usize,
}

fn inspect(run_dir: &Path) -> anyhow::Result<InspectReport> {
    let scan = CheckpointScan::scan(run_dir)?;
    let manifest = CheckpointManifest::load(run_dir)?;
    let (log_rows, branch_points) = if run_dir.join(LOG_FILE).is_file() {
        let records = ProgressLog::at(run_dir).records()?;
        let separators = records
            .iter()
            .filter(|r| matches!(r, LogRecord::Separator))
            .count();
        (records.len() - separators, separators)
    } else {
        (0, 0)
    };
    Ok(InspectReport {
        run_dir: run_dir.to_path_buf(),
        latest_epoch: scan.latest(),
        epochs: scan.epochs.into_iter().collect(),
        best_epoch: manifest.best_epoch,
        log_rows,
        branch_points,
    })
}

fn handle_inspect(run_dir: &Path, json: bool) -> anyhow::Result<()> {
    let report = inspect(run_dir)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    let fmt_epoch = |e: Option<u64>| e.map(|e| e.to_string()).unwrap_or_else(|| "-".into());
    println!("Run directory: {}", report.run_dir.display());
    println!("  Checkpointed epochs: {}", report.epochs.len());
    println!("  Latest epoch:        {}", fmt_epoch(report.latest_epoch));
    println!("  Best epoch:          {}", fmt_epoch(report.best_epoch));
    println!("  Log rows:            {}", report.log_rows);
    if report.branch_points > 0 {
        println!("  Branch points:       {}", report.branch_points);
    }
    Ok(())
}

fn handle_log(run_dir: &Path) -> anyhow::Result<()> {
    for record in ProgressLog::at(run_dir).records()? {
        match record {
            LogRecord::Entry(e) => println!(
                "{:>5}  lr={:<10} train_top1={:.4}  test_loss={:.4}  test_top1={:.4}",
                e.epoch, e.lr, e.metrics.train.top1, e.metrics.test.loss, e.metrics.test.top1
            ),
            LogRecord::Separator => println!("{:->5}  (branch point)", ""),
        }
    }
    Ok(())
}

fn handle_config(action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init { path } => {
            let config_path = path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }
            if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&config_path, default_config_toml()?)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show { config } => {
            let config = load_config(&config, None)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}

/// Learning-rate decay by `gamma` at each schedule milestone already passed.
fn scheduled_lr(base: f64, gamma: f64, milestones: &[f64], epoch: u64) -> f64 {
    let passed = milestones.iter().filter(|m| **m <= epoch as f64).count();
    base * gamma.powi(passed as i32)
}

/// Smooth accuracy curve approaching `ceiling`.
fn synthetic_metrics(epoch: u64, ceiling: f64) -> EpochMetrics {
    let progress = 1.0 - (-0.35 * (epoch + 1) as f64).exp();
    let split = |scale: f64| SplitMetrics {
        loss: 2.3 * (1.0 - progress * scale),
        top1: ceiling * progress * scale,
        top5: (ceiling * progress * scale * 1.2).min(1.0),
    };
    EpochMetrics {
        train: split(1.0),
        test: split(0.95),
        val: split(0.93),
    }
}

fn handle_simulate(config_path: &Path, epochs: Option<u64>) -> anyhow::Result<()> {
    let config = load_config(config_path, None)
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
    let mut session = RunSession::start(config, Some(config_path.to_path_buf()))?;

    let planned = session.epochs();
    let limit = epochs.unwrap_or(planned.end.saturating_sub(planned.start));
    info!(
        mode = session.run().mode.name(),
        start_epoch = planned.start,
        epochs = limit,
        "Starting simulated run"
    );
    if let Some(model) = session.model_checkpoint() {
        println!("Loading weights from {}", model.display());
    }

    let hp = session.config().hyperparameters.clone();
    for epoch in planned.take(limit as usize) {
        let lr = scheduled_lr(hp.learning_rate, hp.gamma, &hp.lr_schedule, epoch);
        let metrics = synthetic_metrics(epoch, 0.9);
        let weights = format!("{}:{}:{epoch}", hp.architecture, hp.depth);
        let saved = session.checkpoint(epoch, lr, metrics, weights.as_bytes())?;
        let marker = if saved.as_ref().is_some_and(|s| s.is_best) {
            " *"
        } else {
            ""
        };
        println!(
            "epoch {:>4}  lr {:<10.6} test_top1 {:.4}{}",
            epoch, lr, metrics.test.top1, marker
        );
    }

    match session.run().root.dir() {
        Some(dir) => println!("Run directory: {}", dir.display()),
        None => println!(
            "Dry run, nothing written (would use {})",
            session.run().root.planned().display()
        ),
    }
    Ok(())
}
