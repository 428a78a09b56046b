//! CLI parsing and end-to-end command tests against a temporary database.

use clap::Parser;
use losh::cli::{
    Cli, Commands, ConfigAction, Output, RootSelector, cmd_export, cmd_import, cmd_init,
    cmd_order, cmd_status, execute, open_store, read_trees,
};
use losh::config::LoshConfig;
use losh_core::{Identity, Kind, NodeStore, RecordSource, Uid};
use std::path::Path;
use tempfile::tempdir;

const PRODUCT_TREE: &str = r#"{
    "kind": "Component",
    "altId": "github.com/o/printer/frame",
    "attrs": {"name": "Frame", "version": "2.1"},
    "links": {
        "dataSource": {"kind": "Repository", "altId": "github.com/o/printer",
            "links": {"host": {"kind": "Host", "altId": "github.com"}}},
        "repository": {"kind": "Repository", "altId": "github.com/o/printer"},
        "licensor": {"kind": "User", "altId": "o",
            "links": {"host": {"kind": "Host", "altId": "github.com"}}},
        "readme": {"kind": "File", "altId": "github.com/o/printer/README.md",
            "attrs": {"path": "README.md"},
            "links": {"dataSource": {"kind": "Repository", "altId": "github.com/o/printer"}}}
    }
}"#;

fn config_in(dir: &Path) -> LoshConfig {
    LoshConfig {
        database: dir.join("catalog.redb"),
        ..LoshConfig::default()
    }
}

fn quiet() -> Output {
    Output {
        json_mode: false,
        quiet: true,
    }
}

// =============================================================================
// PARSING
// =============================================================================

#[test]
fn parses_export_selectors() {
    let cli = Cli::try_parse_from(["losh", "export", "--id", "0x1f"]).expect("parse");
    match cli.command {
        Some(Commands::Export { id, kind, .. }) => {
            assert_eq!(id, Some(Uid(0x1f)));
            assert_eq!(kind, None);
        }
        other => unreachable!("unexpected command {other:?}"),
    }

    let cli = Cli::try_parse_from([
        "losh", "--json-mode", "export", "--kind", "product", "--alt", "x", "-o", "out.json",
    ])
    .expect("parse");
    assert!(cli.json_mode);
    match cli.command {
        Some(Commands::Export { kind, alt, output, .. }) => {
            assert_eq!(kind, Some(Kind::Product));
            assert_eq!(alt.as_deref(), Some("x"));
            assert!(output.is_some());
        }
        other => unreachable!("unexpected command {other:?}"),
    }

    assert!(Cli::try_parse_from(["losh", "export", "--kind", "product"]).is_err());
    assert!(Cli::try_parse_from(["losh", "export", "--id", "1", "--kind", "tag", "--alt", "a"]).is_err());
    assert!(Cli::try_parse_from(["losh", "export", "--kind", "gadget", "--alt", "a"]).is_err());
}

#[test]
fn parses_globals_and_config_subcommands() {
    let cli = Cli::try_parse_from(["losh", "status", "-D", "x.redb", "--quiet"]).expect("parse");
    assert!(cli.quiet);
    let config = cli.effective_config(LoshConfig::default());
    assert_eq!(config.database, Path::new("x.redb"));

    let cli = Cli::try_parse_from(["losh", "config", "init", "--force"]).expect("parse");
    assert!(matches!(
        cli.command,
        Some(Commands::Config {
            action: ConfigAction::Init { force: true }
        })
    ));
}

// =============================================================================
// COMMANDS
// =============================================================================

#[test]
fn init_refuses_to_clobber_without_force() {
    let dir = tempdir().expect("temp dir");
    let config = config_in(dir.path());
    cmd_init(&config, quiet(), false).expect("init");
    assert!(cmd_init(&config, quiet(), false).is_err());
    cmd_init(&config, quiet(), true).expect("force init");
}

#[test]
fn commands_need_an_initialized_database() {
    let dir = tempdir().expect("temp dir");
    let config = config_in(dir.path());
    assert!(cmd_status(&config, quiet()).is_err());
}

#[test]
fn import_export_round_trip() {
    let dir = tempdir().expect("temp dir");
    let config = config_in(dir.path());
    let input = dir.path().join("frame.json");
    std::fs::write(&input, PRODUCT_TREE).expect("write input");

    cmd_init(&config, quiet(), false).expect("init");
    cmd_order(&config, quiet(), &input).expect("order");
    cmd_import(&config, quiet(), &input).expect("import");
    cmd_status(&config, quiet()).expect("status");

    // Re-importing resolves every entity by alternate key: no new records.
    cmd_import(&config, quiet(), &input).expect("re-import");
    {
        let store = open_store(&config).expect("open");
        assert_eq!(store.len().expect("len"), 5);
        let counts = store.count_by_kind().expect("counts");
        assert_eq!(counts.get(&Kind::Repository), Some(&1));
    }

    let output = dir.path().join("export.json");
    cmd_export(
        &config,
        quiet(),
        &RootSelector::Alt(Kind::Component, "github.com/o/printer/frame".into()),
        Some(&output),
    )
    .expect("export");

    let (graph, roots) = read_trees(&config, &output).expect("read export");
    assert_eq!(roots.len(), 1);
    assert_eq!(graph.len(), 5);
    let root = graph.node(roots[0]);
    assert_eq!(root.alt_id(), Some("github.com/o/printer/frame"));
    assert!(root.id().is_some());
    assert_eq!(root.attr("version").and_then(|v| v.as_str()), Some("2.1"));

    let store = open_store(&config).expect("open");
    let uid = store
        .find_id_by_alt_key(Kind::File, "github.com/o/printer/README.md")
        .expect("lookup")
        .expect("present");
    let readme = store.get(uid).expect("get").expect("present");
    assert!(readme.links.contains_key("dataSource"));
}

#[test]
fn deep_reference_chain_exports_and_reads_back() {
    let dir = tempdir().expect("temp dir");
    let config = config_in(dir.path());
    cmd_init(&config, quiet(), false).expect("init");

    let depth = 100;
    let mut json = format!(r#"{{"kind":"Category","altId":"c{}"}}"#, depth - 1);
    for i in (0..depth - 1).rev() {
        json = format!(r#"{{"kind":"Category","altId":"c{i}","links":{{"parent":{json}}}}}"#);
    }
    let input = dir.path().join("chain.json");
    std::fs::write(&input, json).expect("write input");
    cmd_import(&config, quiet(), &input).expect("import");

    let output = dir.path().join("chain-export.json");
    cmd_export(
        &config,
        quiet(),
        &RootSelector::Alt(Kind::Category, "c0".into()),
        Some(&output),
    )
    .expect("export");
    let (graph, roots) = read_trees(&config, &output).expect("read export");
    assert_eq!(roots.len(), 1);
    assert_eq!(graph.len(), depth);
}

#[test]
fn import_rejects_oversized_and_malformed_files() {
    let dir = tempdir().expect("temp dir");
    let mut config = config_in(dir.path());
    cmd_init(&config, quiet(), false).expect("init");

    let bad = dir.path().join("bad.json");
    std::fs::write(&bad, r#"{"kind": "Host", "links": {"owner": {"kind": "User"}}}"#)
        .expect("write");
    assert!(cmd_import(&config, quiet(), &bad).is_err());

    let input = dir.path().join("frame.json");
    std::fs::write(&input, PRODUCT_TREE).expect("write");
    config.max_import_bytes = 16;
    assert!(cmd_import(&config, quiet(), &input).is_err());
}

#[test]
fn execute_dispatches_config_init() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("losh.toml");
    let cli = Cli::try_parse_from([
        "losh",
        "--quiet",
        "--config",
        path.to_str().expect("utf-8 path"),
        "config",
        "init",
    ])
    .expect("parse");
    execute(cli, LoshConfig::default()).expect("config init");
    assert!(LoshConfig::from_file(&path).is_ok());
}
