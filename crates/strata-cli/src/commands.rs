use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::DateTime;
use colored::Colorize;
use serde_json::json;
use strata_history::{HistoryStore, StoreConfig};
use strata_refresh::{
    platform_file_system, sync_report, Discrepancy, NodeId, RefreshResult, ResourceKind, UnifiedTree,
    UnifiedTreeVisitor, WorkspaceTree,
};
use strata_types::{to_millis, CancelToken, Depth, HistoryState, ResourcePath};

use crate::cli::*;

const CONFIG_FILE_NAME: &str = "config.toml";

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let store = open_store(&cli.store, cli.config.as_deref())?;
    let json = matches!(cli.format, OutputFormat::Json);
    let result = match cli.command {
        Command::Snapshot(args) => cmd_snapshot(&store, args),
        Command::Log(args) => cmd_log(&store, args, json),
        Command::Show(args) => cmd_show(&store, args),
        Command::Files(args) => cmd_files(&store, args, json),
        Command::Copy(args) => cmd_copy(&store, args),
        Command::Forget(args) => cmd_forget(&store, args),
        Command::Clean(_) => cmd_clean(&store),
        Command::Gc(_) => cmd_gc(&store),
        Command::Status(args) => cmd_status(&store, args, json),
        Command::Sync(args) => cmd_sync(&store, args),
    };
    store.close().context("failed to close history store")?;
    result
}

fn open_store(dir: &Path, config: Option<&Path>) -> anyhow::Result<HistoryStore> {
    let default_config = dir.join(CONFIG_FILE_NAME);
    let config = match config {
        Some(path) => StoreConfig::load(path).with_context(|| format!("cannot load {}", path.display()))?,
        None if default_config.is_file() => StoreConfig::load(&default_config)
            .with_context(|| format!("cannot load {}", default_config.display()))?,
        None => StoreConfig::default(),
    };
    HistoryStore::open(dir, config).with_context(|| format!("cannot open history store at {}", dir.display()))
}

fn format_time(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn cmd_snapshot(store: &HistoryStore, args: SnapshotArgs) -> anyhow::Result<()> {
    let path = ResourcePath::new(&args.path)?;
    let modified = fs::metadata(&args.file)
        .and_then(|m| m.modified())
        .with_context(|| format!("cannot stat {}", args.file.display()))?;
    match store.add_state(&path, &args.file, to_millis(modified), false) {
        Some(state) => println!(
            "{} Recorded {} as {}",
            "✓".green().bold(),
            path.as_str().bold(),
            state.blob_id.short_hex().yellow()
        ),
        None => println!("{} {} not recorded (too large or unreadable)", "!".yellow().bold(), path),
    }
    Ok(())
}

fn cmd_log(store: &HistoryStore, args: LogArgs, json: bool) -> anyhow::Result<()> {
    let path = ResourcePath::new(&args.path)?;
    let mut states = store.get_states(&path)?;
    if let Some(limit) = args.limit {
        states.truncate(limit);
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&states)?);
        return Ok(());
    }
    if states.is_empty() {
        println!("No history for {}.", path);
        return Ok(());
    }
    for (index, state) in states.iter().enumerate() {
        print_state(store, index, state, args.oneline);
    }
    Ok(())
}

fn print_state(store: &HistoryStore, index: usize, state: &HistoryState, oneline: bool) {
    let time = format_time(state.last_modified);
    if oneline {
        println!("{} {} {}", index.to_string().yellow(), state.blob_id.short_hex().dimmed(), time);
        return;
    }
    println!("{}  {}", format!("#{index}").yellow().bold(), state.blob_id.to_hex().dimmed());
    println!("  Modified: {}", time);
    if !store.exists(state) {
        println!("  {}", "content missing".red());
    }
}

fn cmd_show(store: &HistoryStore, args: ShowArgs) -> anyhow::Result<()> {
    let path = ResourcePath::new(&args.path)?;
    let states = store.get_states(&path)?;
    let state = states
        .get(args.index)
        .with_context(|| format!("{} has {} recorded states", path, states.len()))?;
    let content = store.get_contents(state)?;
    std::io::stdout().write_all(&content)?;
    Ok(())
}

fn cmd_files(store: &HistoryStore, args: FilesArgs, json: bool) -> anyhow::Result<()> {
    let base = ResourcePath::new(&args.base)?;
    let depth = match args.depth {
        DepthArg::Zero => Depth::Zero,
        DepthArg::One => Depth::One,
        DepthArg::Infinite => Depth::Infinite,
    };
    let files = store.all_files(&base, depth)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&files)?);
    } else {
        for path in &files {
            println!("{}", path);
        }
    }
    Ok(())
}

fn cmd_copy(store: &HistoryStore, args: CopyArgs) -> anyhow::Result<()> {
    let source = ResourcePath::new(&args.source)?;
    let destination = ResourcePath::new(&args.destination)?;
    let copied = store.copy_history(&source, &destination, args.is_move)?;
    let verb = if args.is_move { "Moved" } else { "Copied" };
    println!(
        "{} {} {} entries: {} → {}",
        "✓".green().bold(),
        verb,
        copied,
        source.as_str().bold(),
        destination.as_str().bold()
    );
    Ok(())
}

fn cmd_forget(store: &HistoryStore, args: ForgetArgs) -> anyhow::Result<()> {
    let path = ResourcePath::new(&args.path)?;
    let removed = store.remove(&path);
    println!("{} Forgot {} states under {}", "✓".green(), removed, path.as_str().bold());
    Ok(())
}

fn cmd_clean(store: &HistoryStore) -> anyhow::Result<()> {
    let report = store.clean(&CancelToken::new())?;
    println!("{} Clean complete.", "✓".green().bold());
    println!("  Entries visited: {}", report.entries_visited);
    println!("  States removed: {}", report.states_removed);
    println!("  Blobs deleted: {}", report.blobs_deleted);
    Ok(())
}

fn cmd_gc(store: &HistoryStore) -> anyhow::Result<()> {
    let deleted = store.remove_garbage()?;
    println!("{} GC: {} blobs removed.", "✓".green(), deleted);
    Ok(())
}

/// Workspace view of `project` built from history: every path with
/// recorded states, synchronized at its newest state whatever its age.
fn workspace_from_history(store: &HistoryStore, project: &ResourcePath) -> anyhow::Result<WorkspaceTree> {
    let mut workspace = WorkspaceTree::new();
    workspace.add_folder(project);
    for path in store.all_files(project, Depth::Infinite)? {
        if let Some(newest) = store.newest_state(&path)? {
            workspace.add_file(&path, newest.last_modified);
        }
    }
    Ok(workspace)
}

fn cmd_status(store: &HistoryStore, args: StatusArgs, json: bool) -> anyhow::Result<()> {
    let project = ResourcePath::project(&args.project)?;
    let workspace = workspace_from_history(store, &project)?;
    let local = platform_file_system();
    let report = sync_report(&local, &workspace, &project, &args.dir, Depth::Infinite)?;

    if json {
        let findings: Vec<_> = report
            .findings
            .iter()
            .map(|f| json!({ "path": f.path.as_str(), "location": f.location.display().to_string(), "change": label(f.kind) }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&findings)?);
        return Ok(());
    }
    if report.is_synchronized() {
        println!("{} {} matches its history.", "✓".green().bold(), args.dir.display());
        return Ok(());
    }
    for finding in &report.findings {
        let tag = match finding.kind {
            Discrepancy::MissingOnDisk => label(finding.kind).red(),
            Discrepancy::MissingInWorkspace { .. } => label(finding.kind).green(),
            Discrepancy::KindChanged | Discrepancy::Modified { .. } => label(finding.kind).yellow(),
        };
        println!("  {:>13} {}", tag, finding.path);
    }
    Ok(())
}

fn label(kind: Discrepancy) -> &'static str {
    match kind {
        Discrepancy::MissingOnDisk => "deleted:",
        Discrepancy::MissingInWorkspace { is_folder: true } => "new folder:",
        Discrepancy::MissingInWorkspace { is_folder: false } => "new:",
        Discrepancy::KindChanged => "kind changed:",
        Discrepancy::Modified { .. } => "modified:",
    }
}

/// Collects the files on disk whose content history has not seen yet.
#[derive(Default)]
struct ChangedFiles {
    found: Vec<(ResourcePath, PathBuf, i64)>,
}

impl UnifiedTreeVisitor for ChangedFiles {
    fn visit(&mut self, tree: &mut UnifiedTree<'_>, id: NodeId) -> RefreshResult<bool> {
        let node = tree.node(id);
        if node.is_file() {
            let recorded = node
                .workspace_info()
                .is_some_and(|info| info.kind == ResourceKind::File && info.local_sync == node.last_modified());
            if !recorded {
                self.found
                    .push((node.path().clone(), node.location().to_path_buf(), node.last_modified()));
            }
            return Ok(false);
        }
        Ok(node.is_folder())
    }
}

fn changed_files(store: &HistoryStore, project: &ResourcePath, dir: &Path) -> anyhow::Result<ChangedFiles> {
    let workspace = workspace_from_history(store, project)?;
    let local = platform_file_system();
    let mut changed = ChangedFiles::default();
    UnifiedTree::new(&local, &workspace, project.clone(), dir).accept(&mut changed, Depth::Infinite)?;
    Ok(changed)
}

fn cmd_sync(store: &HistoryStore, args: SyncArgs) -> anyhow::Result<()> {
    let project = ResourcePath::project(&args.project)?;
    let changed = changed_files(store, &project, &args.dir)?;
    let mut recorded = 0;
    for (path, location, modified) in &changed.found {
        if args.dry_run {
            println!("  {} {}", "would record:".cyan(), path);
            continue;
        }
        match store.add_state(path, location, *modified, false) {
            Some(_) => {
                recorded += 1;
                println!("  {} {}", "recorded:".green(), path);
            }
            None => println!("  {} {}", "skipped:".yellow(), path),
        }
    }
    if !args.dry_run {
        println!("{} Recorded {} of {} changed files.", "✓".green().bold(), recorded, changed.found.len());
    }
    Ok(())
}
