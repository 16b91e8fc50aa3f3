//! TabGrid: layout state and persistence reconciliation for tabbed widget dashboards.
//!
//! Entry point: runs a console walkthrough of the engine against a SQLite
//! file. Set `RUST_LOG=debug` to watch gestures, reconciliation, and saves.
//!
//! ```text
//! tabgrid [DB_PATH] [--settings PATH] [--set KEY=VALUE]... [--reset-settings]
//! ```
//!
//! `--set` values are parsed as JSON and fall back to a plain string, so
//! `--set persistence.debounce_ms=250` and
//! `--set widgets.chart.max_size={"w":6,"h":4}` both work.

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tabgrid::app::App;
use tabgrid::services::settings_engine::{SettingsEngine, SettingsEngineTrait};
use tabgrid::services::tab_defaults::StaticTabDefaults;
use tabgrid::types::grid::{CellRect, GridSnapshot, Placement, WidgetInstance};
use tabgrid::types::interaction::GestureKind;

const DEMO_TAB: &str = "overview";

#[derive(Debug, Default, PartialEq)]
struct Options {
    db_path: Option<String>,
    settings_path: Option<PathBuf>,
    overrides: Vec<(String, Value)>,
    reset_settings: bool,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Options, String> {
    let mut options = Options::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--settings" => {
                let path = args.next().ok_or("--settings needs a path")?;
                options.settings_path = Some(PathBuf::from(path));
            }
            "--set" => {
                let pair = args.next().ok_or("--set needs KEY=VALUE")?;
                let (key, raw) = pair
                    .split_once('=')
                    .ok_or_else(|| format!("--set {}: expected KEY=VALUE", pair))?;
                let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
                options.overrides.push((key.to_string(), value));
            }
            "--reset-settings" => options.reset_settings = true,
            flag if flag.starts_with("--") => return Err(format!("unknown option {}", flag)),
            path => {
                if options.db_path.is_some() {
                    return Err(format!("unexpected argument {}", path));
                }
                options.db_path = Some(path.to_string());
            }
        }
    }
    Ok(options)
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options = parse_args(std::env::args().skip(1))?;
    if options.reset_settings {
        SettingsEngine::new(options.settings_path.clone()).reset()?;
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(options))
}

fn defaults() -> Arc<StaticTabDefaults> {
    Arc::new(StaticTabDefaults::new().with_layout(
        DEMO_TAB,
        vec![WidgetInstance::new("welcome", "text", CellRect::new(0, 0, 3, 2))],
    ))
}

async fn run(options: Options) -> Result<(), Box<dyn Error>> {
    let db_path = options.db_path.as_deref().unwrap_or("tabgrid-demo.db");
    println!();
    println!("TabGrid v{} demo", env!("CARGO_PKG_VERSION"));
    println!("Database: {}", db_path);
    println!();

    section("Open tab");
    let mut app = App::new(db_path, options.settings_path, &options.overrides, defaults())?;
    let settings = app.settings_engine.get_settings();
    println!(
        "  Settings: {} ({} columns, {} ms debounce)",
        app.settings_engine.get_config_path().display(),
        settings.grid.columns,
        settings.persistence.debounce_ms
    );
    let source = app.session.load_from_persistence(DEMO_TAB).await?;
    println!("  Opened '{}' from {:?}", DEMO_TAB, source);
    print_snapshot(app.session.get_snapshot(DEMO_TAB));

    section("Add widgets");
    let chart = app.session.add_widget(DEMO_TAB, "chart", Placement::Auto)?;
    let table = app.session.add_widget(DEMO_TAB, "table", Placement::Auto)?;
    println!("  Added chart {}", short(&chart));
    println!("  Added table {}", short(&table));
    print_snapshot(app.session.get_snapshot(DEMO_TAB));

    section("Drag chart onto the table");
    app.session.begin_gesture(DEMO_TAB, &chart, GestureKind::Drag)?;
    let table_rect = app
        .session
        .get_snapshot(DEMO_TAB)
        .and_then(|s| s.get(&table))
        .map(|w| w.rect)
        .unwrap_or(CellRect::new(0, 0, 1, 1));
    for step in 0..5 {
        let live = CellRect::new(table_rect.x, step, 2, 2);
        app.session.update_gesture(DEMO_TAB, &chart, live);
    }
    let result = app
        .session
        .commit_gesture(DEMO_TAB, &chart, CellRect::new(table_rect.x, table_rect.y, 2, 2))?;
    println!("  Commit result: {:?}", result);
    print_snapshot(app.session.get_snapshot(DEMO_TAB));

    section("Debounced save");
    println!("  Save state: {:?}", app.session.save_state(DEMO_TAB));
    tokio::time::sleep(Duration::from_millis(700)).await;
    app.session.pump();
    println!("  Save state after debounce: {:?}", app.session.save_state(DEMO_TAB));
    print_snapshot(app.session.get_snapshot(DEMO_TAB));

    section("Close and reopen");
    let outcome = app.session.close_tab(DEMO_TAB).await?;
    println!("  Final flush: {:?}", outcome);
    let source = app.session.load_from_persistence(DEMO_TAB).await?;
    println!("  Reopened from {:?}", source);
    print_snapshot(app.session.get_snapshot(DEMO_TAB));

    app.shutdown().await;
    println!();
    println!("Done.");
    Ok(())
}

fn section(name: &str) {
    println!("--- {} ---", name);
}

fn short(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn print_snapshot(snapshot: Option<&GridSnapshot>) {
    let Some(snapshot) = snapshot else {
        println!("  (tab not open)");
        return;
    };
    println!(
        "  v{} dirty={} widgets={}",
        snapshot.version,
        snapshot.dirty,
        snapshot.len()
    );
    let mut widgets: Vec<&WidgetInstance> = snapshot.widgets.values().collect();
    widgets.sort_by_key(|w| (w.rect.y, w.rect.x));
    for w in widgets {
        println!(
            "    {:<8} {:<6} x={} y={} w={} h={}",
            short(&w.instance_id),
            w.widget_kind,
            w.rect.x,
            w.rect.y,
            w.rect.w,
            w.rect.h
        );
    }
    println!();
}
