mod demo;

use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;
use std::time::Duration;

use appcore_core::ports::Supervisor;
use appcore_core::{AppError, Application, Event, EventKind, Failure, Phase, Plugin};
use clap::{ArgAction, Parser};
use serde_json::{Value, json};
use tokio::task::LocalSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Run a demo application tree through its lifecycle", long_about = None)]
struct Args {
    /// Name of the root application.
    #[arg(long, default_value = "appcore")]
    name: String,

    /// JSON file with the root options.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override an option: `key.path=value`. The value is parsed as JSON and
    /// falls back to a plain string.
    #[arg(long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,

    /// How long the warmup plugin holds STARTUP.
    #[arg(long, default_value_t = 50)]
    delay_ms: u64,

    /// Report an error when the root reaches this phase (preboot, startup, ready).
    #[arg(long)]
    fail_at: Option<String>,

    /// Give up when the tree has not settled after this long.
    #[arg(long, default_value_t = 30_000)]
    timeout_ms: u64,

    /// More logging (-v debug, -vv trace). RUST_LOG wins when set.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Print the final status tree as JSON.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("failed to read config {}: {source}", path.display())]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", path.display())]
    ParseConfig {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid --set '{0}', expected KEY=VALUE")]
    InvalidSet(String),

    #[error("invalid --fail-at '{0}', expected preboot, startup or ready")]
    InvalidFailAt(String),

    #[error(transparent)]
    App(#[from] AppError),

    #[error("failed to encode status: {0}")]
    Status(#[from] serde_json::Error),
}

/// ルートが失敗したかを覚えておき、`main` が終了コードを選べるようにする
#[derive(Default)]
struct ExitSupervisor {
    root_failed: Cell<bool>,
}

impl Supervisor for ExitSupervisor {
    fn unhandled(&self, app: &Application, failure: &Failure) {
        error!(app = %app.fullname(), error = %failure, "unhandled application error");
    }

    fn root_failed(&self, app: &Application) {
        error!(app = %app.fullname(), errors = app.errors().len(), "root application failed");
        self.root_failed.set(true);
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    match LocalSet::new().run_until(run(args)).await {
        Ok(code) => code,
        Err(err) => {
            error!(error = %err, "appcore failed");
            ExitCode::from(2)
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(args: Args) -> Result<ExitCode, CliError> {
    // (A) 引数の検証（不正な --set / --fail-at は起動前に弾く）
    let fail_at = args.fail_at.as_deref().map(parse_fail_at).transpose()?;
    let overrides = args
        .set
        .iter()
        .map(|raw| parse_override(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let options = match &args.config {
        Some(path) => load_config(path)?,
        None => Value::Null,
    };

    // (B) ルートを構築（config ファイル -> --set の順に重ねる）
    let supervisor = Rc::new(ExitSupervisor::default());
    let root = Application::builder()
        .name(args.name.clone())
        .options(options)
        .supervisor(supervisor.clone())
        .build()?;

    root.set("warmup.delayMs", json!(args.delay_ms))?;
    for (key, value) in overrides {
        root.set(key.as_str(), value)?;
    }

    // (C) リスナーとデモ用プラグインをマウント
    root.on(EventKind::Error, |app, event| {
        if let Event::Error(failure) = event {
            warn!(app = %app.fullname(), error = %failure, "error reported");
        }
        Ok(())
    });
    root.on(EventKind::State, |app, event| {
        info!(app = %app.fullname(), phase = ?event.phase(), "state");
        Ok(())
    });
    if let Some(phase) = fail_at {
        demo::fail_at(&root, phase);
    }

    root.use_plugin(demo::hit_counter())?;
    root.use_plugin(demo::warmup())?;
    root.use_plugin(Plugin::factory(&demo::worker_factory(), json!({ "threads": 2 })))?;

    // (D) 終端フェーズに達するまでポーリングで待つ（timeout 付き）
    let settled = tokio::time::timeout(Duration::from_millis(args.timeout_ms), async {
        while !root.phase().is_some_and(Phase::is_terminal) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    // (E) 状態を出力し、終了コードを決める
    let status = root.status();
    if settled.is_err() {
        for app in status.unsettled() {
            warn!(app = %app.fullname, phase = ?app.phase, pending_holds = app.pending_holds, "not settled");
        }
        error!(timeout_ms = args.timeout_ms, "application tree did not settle");
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!(
            "{} {} (transitions seen: {})",
            status.fullname,
            status.phase.map_or("constructing", Phase::as_str),
            root.get("stats.transitions")
        );
        for child in &status.children {
            println!("  {} {}", child.fullname, child.phase.map_or("constructing", Phase::as_str));
        }
    }

    if settled.is_err() || supervisor.root_failed.get() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn load_config(path: &Path) -> Result<Value, CliError> {
    let raw = std::fs::read_to_string(path).map_err(|source| CliError::ReadConfig {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| CliError::ParseConfig {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_override(raw: &str) -> Result<(String, Value), CliError> {
    let (key, value) = raw
        .split_once('=')
        .filter(|(key, _)| !key.trim().is_empty())
        .ok_or_else(|| CliError::InvalidSet(raw.to_string()))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.trim().to_string(), value))
}

fn parse_fail_at(raw: &str) -> Result<Phase, CliError> {
    match raw.parse::<Phase>() {
        Ok(phase) if !phase.is_terminal() => Ok(phase),
        _ => Err(CliError::InvalidFailAt(raw.to_string())),
    }
}
