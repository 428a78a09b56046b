//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use crate::config::LoshConfig;
use losh_core::{
    Graph, Identity, Kind, LoshError, NodeRef, NodeStore, RedbStore, SaveReport, Saver, Schema,
    Uid, dump_json, load_graph, order_for_save, parse_trees, reconstruct_forest,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Output switches shared by every command.
#[derive(Debug, Clone, Copy, Default)]
pub struct Output {
    pub json_mode: bool,
    pub quiet: bool,
}

impl Output {
    fn json(self, value: &serde_json::Value) {
        println!(
            "{}",
            serde_json::to_string_pretty(value).unwrap_or_default()
        );
    }

    fn say(self, line: impl AsRef<str>) {
        if !self.quiet {
            println!("{}", line.as_ref());
        }
    }
}

/// How `export` picks its root record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootSelector {
    Id(Uid),
    Alt(Kind, String),
}

// =============================================================================
// FILE VALIDATION
// =============================================================================

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), LoshError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| LoshError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(LoshError::InvalidInput(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Resolve an input path to an existing regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, LoshError> {
    // Canonicalize resolves "..", symlinks, and validates existence
    let canonical = path.canonicalize().map_err(|e| {
        LoshError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(LoshError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Resolve an output path whose parent directory must exist.
fn validate_output_path(path: &Path) -> Result<PathBuf, LoshError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        LoshError::IoError(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(LoshError::IoError(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| LoshError::IoError("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

/// Read a JSON import file and rebuild its graph.
pub fn read_trees(config: &LoshConfig, file: &Path) -> Result<(Graph, Vec<NodeRef>), LoshError> {
    let path = validate_file_path(file)?;
    validate_file_size(&path, config.max_import_bytes)?;
    let bytes = std::fs::read(&path)
        .map_err(|e| LoshError::IoError(format!("Cannot read {}: {}", path.display(), e)))?;
    let trees = parse_trees(&bytes).map_err(|e| match e {
        LoshError::SerializationError(msg) => {
            LoshError::SerializationError(format!("{}: {}", path.display(), msg))
        }
        other => other,
    })?;
    reconstruct_forest(Arc::new(Schema::catalog()), &trees)
}

/// Open the configured database.
pub fn open_store(config: &LoshConfig) -> Result<RedbStore, LoshError> {
    if !config.database.exists() {
        return Err(LoshError::NotFound(format!(
            "database {} (run `losh init` first)",
            config.database.display()
        )));
    }
    RedbStore::open(&config.database, Arc::new(Schema::catalog()))
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Initialize a new database.
pub fn cmd_init(config: &LoshConfig, out: Output, force: bool) -> Result<(), LoshError> {
    let db_path = &config.database;
    if db_path.exists() {
        if !force {
            return Err(LoshError::InvalidInput(format!(
                "Database already exists at {}. Use --force to overwrite.",
                db_path.display()
            )));
        }
        std::fs::remove_file(db_path).map_err(|e| LoshError::IoError(e.to_string()))?;
    }

    RedbStore::open(db_path, Arc::new(Schema::catalog()))?;
    tracing::info!(database = %db_path.display(), "initialized database");

    if out.json_mode {
        out.json(&serde_json::json!({
            "success": true,
            "database": db_path.to_string_lossy(),
        }));
    } else {
        out.say(format!("Initialized new database at {}", db_path.display()));
    }
    Ok(())
}

// =============================================================================
// IMPORT COMMAND
// =============================================================================

/// Save every tree in a JSON file into the database.
pub fn cmd_import(config: &LoshConfig, out: Output, file: &Path) -> Result<(), LoshError> {
    let (mut graph, roots) = read_trees(config, file)?;
    let mut store = open_store(config)?;
    let report = Saver::new(&mut store).save_all(&mut graph, &roots)?;

    let saved: Vec<String> = roots
        .iter()
        .map(|r| graph.node(*r).describe())
        .collect();

    if out.json_mode {
        out.json(&serde_json::json!({
            "success": true,
            "roots": saved,
            "report": report,
        }));
        return Ok(());
    }

    out.say(format!("Imported {} root(s) from {}", roots.len(), file.display()));
    for root in &saved {
        out.say(format!("  {root}"));
    }
    print_report(out, &report);
    Ok(())
}

fn print_report(out: Output, report: &SaveReport) {
    out.say(format!("Created:  {}", report.created));
    out.say(format!("Updated:  {}", report.updated));
    out.say(format!("Skipped:  {}", report.skipped));
    out.say(format!("Deferred: {}", report.deferred));
}

// =============================================================================
// EXPORT COMMAND
// =============================================================================

/// Write a stored entity graph as a JSON tree.
pub fn cmd_export(
    config: &LoshConfig,
    out: Output,
    root: &RootSelector,
    output: Option<&Path>,
) -> Result<(), LoshError> {
    let store = open_store(config)?;
    let uid = match root {
        RootSelector::Id(uid) => *uid,
        RootSelector::Alt(kind, alt) => store
            .find_id_by_alt_key(*kind, alt)?
            .ok_or_else(|| LoshError::NotFound(format!("{kind} {alt:?}")))?,
    };

    let (graph, node) = load_graph(&store, Arc::clone(store.schema()), uid)?;
    let bytes = dump_json(&graph, node, config.pretty_json)?;

    match output {
        Some(path) => {
            let path = validate_output_path(path)?;
            std::fs::write(&path, &bytes)
                .map_err(|e| LoshError::IoError(format!("Cannot write {}: {}", path.display(), e)))?;
            if out.json_mode {
                out.json(&serde_json::json!({
                    "success": true,
                    "root": uid.to_string(),
                    "entities": graph.len(),
                    "output": path.to_string_lossy(),
                }));
            } else {
                out.say(format!(
                    "Exported {} entities reachable from {} to {}",
                    graph.len(),
                    uid,
                    path.display()
                ));
            }
        }
        None => println!("{}", String::from_utf8_lossy(&bytes)),
    }
    Ok(())
}

// =============================================================================
// ORDER COMMAND
// =============================================================================

/// Print the write order of a JSON tree without touching the database.
pub fn cmd_order(config: &LoshConfig, out: Output, file: &Path) -> Result<(), LoshError> {
    let (graph, roots) = read_trees(config, file)?;

    let mut plans = Vec::with_capacity(roots.len());
    for root in &roots {
        let order = order_for_save(&graph, *root)?;
        let steps: Vec<(String, &'static str)> = order
            .iter()
            .map(|r| {
                let node = graph.node(r);
                (node.describe(), write_action(&graph, r))
            })
            .collect();
        plans.push((graph.node(*root).describe(), steps));
    }

    if out.json_mode {
        let json: Vec<serde_json::Value> = plans
            .iter()
            .map(|(root, steps)| {
                serde_json::json!({
                    "root": root,
                    "steps": steps
                        .iter()
                        .map(|(entity, action)| serde_json::json!({"entity": entity, "action": action}))
                        .collect::<Vec<_>>(),
                })
            })
            .collect();
        out.json(&serde_json::Value::Array(json));
        return Ok(());
    }

    for (root, steps) in &plans {
        println!("Write order for {root}");
        for (i, (entity, action)) in steps.iter().enumerate() {
            println!("{:>4}. {:<8} {}", i + 1, action, entity);
        }
    }
    Ok(())
}

/// What the first pass would do with a node, before identity resolution.
fn write_action(graph: &Graph, r: NodeRef) -> &'static str {
    let node = graph.node(r);
    if graph.schema().kind(node.kind()).immutable {
        "keep"
    } else if node.id().is_some() {
        if node.is_stub() { "keep" } else { "update" }
    } else if node.alt_id().is_some() {
        "upsert"
    } else {
        "create"
    }
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show record counts per kind.
pub fn cmd_status(config: &LoshConfig, out: Output) -> Result<(), LoshError> {
    let store = open_store(config)?;
    let total = store.len()?;
    let counts = store.count_by_kind()?;

    if out.json_mode {
        let per_kind: serde_json::Map<String, serde_json::Value> = counts
            .iter()
            .map(|(kind, n)| (kind.to_string(), serde_json::json!(n)))
            .collect();
        out.json(&serde_json::json!({
            "database": config.database.to_string_lossy(),
            "records": total,
            "kinds": per_kind,
        }));
        return Ok(());
    }

    println!("Catalog Database Status");
    println!("=======================");
    println!("Database: {}", config.database.display());
    println!("Records:  {}", total);
    if !counts.is_empty() {
        println!();
        for (kind, n) in &counts {
            println!("  {:<24} {}", kind, n);
        }
    }
    Ok(())
}

// =============================================================================
// CONFIG COMMANDS
// =============================================================================

/// Print the effective configuration.
pub fn cmd_config_show(config: &LoshConfig) -> Result<(), LoshError> {
    print!("{}", config.to_toml()?);
    Ok(())
}

/// Write the effective configuration to a file.
pub fn cmd_config_init(
    config: &LoshConfig,
    out: Output,
    path: &Path,
    force: bool,
) -> Result<(), LoshError> {
    config.write(path, force)?;
    if out.json_mode {
        out.json(&serde_json::json!({
            "success": true,
            "config": path.to_string_lossy(),
        }));
    } else {
        out.say(format!("Wrote configuration to {}", path.display()));
    }
    Ok(())
}
