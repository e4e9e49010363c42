//! Troubleshooter: network diagnostics assistant.
//!
//! Usage:
//!   troubleshooter init              Write default config and probe catalog
//!   troubleshooter chat              Interactive session
//!   troubleshooter ask "<message>"   One turn, then exit
//!   troubleshooter tools             Print the tool schemas
//!   troubleshooter status            Analytics summary

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::future::Future;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use troubleshooter::config::{self, TroubleshooterConfig, CONFIG_FILE};
use troubleshooter::events::{EventEmitter, TracingSink};
use troubleshooter::ladder::LadderSnapshot;
use troubleshooter::runtime;
use troubleshooter::session::{SessionManager, SessionTurn};
use troubleshooter::state::{AnalyticsSink, Database};
use troubleshooter::tools::{probe_scripts, ProbeCatalog};
use troubleshooter::types::*;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "troubleshooter")]
#[command(version = "0.1.0")]
#[command(about = "LLM-driven network troubleshooting assistant")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to troubleshooter home directory [default: ~/.troubleshooter].
    #[arg(long, global = true)]
    home: Option<String>,

    /// Log level (debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write the default config, probe catalog and probe scripts.
    Init {
        /// Overwrite existing files.
        #[arg(long)]
        force: bool,
    },

    /// Start an interactive troubleshooting session.
    Chat,

    /// Send one message in a fresh conversation and print the reply.
    Ask {
        message: String,

        /// Print the reply as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the tool schemas offered to the model.
    Tools,

    /// Show analytics: turns, fallbacks, tool reliability.
    Status,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Resolve home directory
    let home_dir = cli
        .home
        .as_deref()
        .map(|h| PathBuf::from(shellexpand::tilde(h).into_owned()))
        .unwrap_or_else(config::default_home_dir);

    match cli.command {
        Commands::Init { force } => cmd_init(&home_dir, force),
        Commands::Chat => cmd_chat(&home_dir).await,
        Commands::Ask { message, json } => cmd_ask(&home_dir, message, json).await,
        Commands::Tools => cmd_tools(&home_dir),
        Commands::Status => cmd_status(&home_dir).await,
    }
}

// ---------------------------------------------------------------------------
// Command implementations
// ---------------------------------------------------------------------------

fn cmd_init(home_dir: &Path, force: bool) -> Result<()> {
    std::fs::create_dir_all(home_dir)
        .with_context(|| format!("Failed to create home directory: {}", home_dir.display()))?;

    let config_path = home_dir.join(CONFIG_FILE);
    let cfg = if config_path.exists() && !force {
        println!("{} {} exists, keeping it", "--".dimmed(), config_path.display());
        config::load_config(&config_path)?
    } else {
        let cfg = TroubleshooterConfig::default();
        config::save_config(&cfg, &config_path)?;
        println!("{} Wrote {}", ">>>".green().bold(), config_path.display());
        cfg
    };

    let catalog_path = PathBuf::from(cfg.resolved_probes_file());
    if catalog_path.exists() && !force {
        println!("{} {} exists, keeping it", "--".dimmed(), catalog_path.display());
    } else {
        let catalog = ProbeCatalog::builtin()?;
        let yaml = serde_yaml::to_string(&catalog).context("Failed to serialize probe catalog")?;
        if let Some(parent) = catalog_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&catalog_path, yaml)
            .with_context(|| format!("Failed to write {}", catalog_path.display()))?;
        println!("{} Wrote {}", ">>>".green().bold(), catalog_path.display());
    }

    let probes_dir = PathBuf::from(cfg.resolved_probes_dir());
    let written = probe_scripts::install(&probes_dir, force)?;
    println!(
        "{} Installed {} probe script(s) under {}",
        ">>>".green().bold(),
        written,
        probes_dir.display()
    );

    println!();
    println!(
        "Set {} (or another provider key) for cloud models; otherwise the local model at {} is used.",
        "OPENAI_API_KEY".bold(),
        cfg.local.base_url
    );
    Ok(())
}

async fn cmd_chat(home_dir: &Path) -> Result<()> {
    let app = bootstrap(home_dir)?;

    println!(
        "{} {} ready ({} tools). Describe your network problem. {} to reset, {} for ladder state, {} to leave.",
        ">>>".green().bold(),
        app.config.name,
        app.sessions.engine().registry().len(),
        "/reset".bold(),
        "/ladder".bold(),
        "/quit".bold(),
    );

    let mut conversation_id: Option<String> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        eprint!("{} ", "you>".cyan().bold());
        let Some(line) = next_input(&mut lines, tokio::signal::ctrl_c()).await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line {
            "/quit" | "/exit" => break,
            "/reset" => {
                if let Some(id) = &conversation_id {
                    app.sessions.reset(id).await;
                }
                println!("{}", "Conversation cleared.".dimmed());
                continue;
            }
            "/ladder" => {
                match &conversation_id {
                    Some(id) => match app.sessions.ladder(id).await {
                        Some(snapshot) => print_ladder(&snapshot),
                        None => println!("{}", "No ladder yet.".dimmed()),
                    },
                    None => println!("{}", "No ladder yet.".dimmed()),
                }
                continue;
            }
            _ => {}
        }

        let request = TurnRequest {
            message: line.to_string(),
            conversation_id: conversation_id.clone(),
        };

        // Ctrl-C cancels the in-flight turn, not the session.
        let cancel = CancellationToken::new();
        let watcher = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            })
        };
        let turn = app.sessions.handle(request, &cancel).await;
        watcher.abort();

        conversation_id = Some(turn.response.conversation_id.clone());
        print_turn(&turn);
    }

    app.analytics.flush().await;
    info!("Chat session ended");
    Ok(())
}

/// One-shot turn in a fresh session. Sessions live in memory, so history
/// never carries over between invocations; use `chat` for a conversation.
async fn cmd_ask(home_dir: &Path, message: String, json: bool) -> Result<()> {
    let app = bootstrap(home_dir)?;

    let cancel = CancellationToken::new();
    let request = TurnRequest {
        message,
        conversation_id: None,
    };
    let turn = tokio::select! {
        turn = app.sessions.handle(request, &cancel) => turn,
        _ = tokio::signal::ctrl_c() => {
            app.analytics.flush().await;
            anyhow::bail!("Interrupted");
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&turn.response)?);
    } else {
        print_turn(&turn);
    }

    app.analytics.flush().await;
    if turn.outcome.is_err() {
        std::process::exit(2);
    }
    Ok(())
}

fn cmd_tools(home_dir: &Path) -> Result<()> {
    let cfg = load_config_or_default(home_dir)?;
    let registry = runtime::build_registry(&cfg, EventEmitter::new())?;
    println!("{}", serde_json::to_string_pretty(&registry.schemas())?);
    Ok(())
}

async fn cmd_status(home_dir: &Path) -> Result<()> {
    let cfg = load_config_or_default(home_dir)?;
    let db = open_database(&cfg)?;
    let summary = db.summary()?;
    let tools = db.tool_stats()?;
    let recent = db.recent_turns(5)?;

    println!();
    println!("{}", "=== Troubleshooter Status ===".bold());
    println!();
    println!("  {}:  {}", "Name".bold(), cfg.name);
    println!("  {}:", "Providers".bold());
    for p in &cfg.providers {
        let key = if p.resolve_credential().is_some() {
            "key set".green().to_string()
        } else {
            "no key".dimmed().to_string()
        };
        println!("    {:<10} {:<28} {}", p.id, p.model, key);
    }
    println!("    {:<10} {:<28} {}", cfg.local.id, cfg.local.model, "local".cyan());
    println!();
    println!("  {}:", "Turns".bold());
    println!("    Sessions:  {}", summary.sessions);
    println!("    Turns:     {}", summary.turns);
    println!(
        "    Fallback:  {} ({:.0}%)",
        summary.fallback_turns,
        summary.fallback_rate() * 100.0
    );
    println!("    Capped:    {}", summary.capped_turns);
    println!("    Failed:    {}", summary.failed_turns);
    println!();
    println!("  {}:", "Tools".bold());
    if tools.is_empty() {
        println!("    {}", "no tool calls recorded".dimmed());
    }
    for t in &tools {
        let failures = if t.failures > 0 {
            t.failures.to_string().red().to_string()
        } else {
            "0".green().to_string()
        };
        println!(
            "    {:<24} {:>5} calls  {} failed  {:>7.0}ms avg",
            t.tool_name, t.calls, failures, t.avg_duration_ms
        );
    }
    if !recent.is_empty() {
        println!();
        println!("  {}:", "Recent turns".bold());
        for r in &recent {
            let provider = if r.is_fallback {
                format!("{} (fallback)", r.provider).yellow().to_string()
            } else {
                r.provider.clone()
            };
            let note = if r.failed {
                ", failed".red().to_string()
            } else if r.cap_hit {
                ", capped".to_string()
            } else {
                String::new()
            };
            println!(
                "    {}  {}  {} tool call(s){}",
                r.created_at, provider, r.tool_calls_made, note
            );
        }
    }
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct App {
    config: TroubleshooterConfig,
    sessions: SessionManager,
    analytics: Arc<AnalyticsSink>,
}

/// Bootstrap the runtime: load config, open analytics, build the engine.
fn bootstrap(home_dir: &Path) -> Result<App> {
    let config_path = home_dir.join(CONFIG_FILE);

    if !config_path.exists() {
        eprintln!(
            "{} No config found at {:?}. Run `troubleshooter init` first.",
            "Error:".red().bold(),
            config_path
        );
        std::process::exit(1);
    }

    let cfg = config::load_config(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db = Arc::new(Mutex::new(open_database(&cfg)?));
    let analytics = Arc::new(AnalyticsSink::new(db));
    let events = EventEmitter::new()
        .with_sink(Arc::new(TracingSink))
        .with_sink(analytics.clone());

    let engine = runtime::build_engine(&cfg, events.clone())?;
    if engine.registry().is_empty() {
        warn!("No diagnostic tools registered; answers will be unverified");
    }

    Ok(App {
        config: cfg,
        sessions: SessionManager::new(Arc::new(engine), events),
        analytics,
    })
}

fn load_config_or_default(home_dir: &Path) -> Result<TroubleshooterConfig> {
    config::load_config(&home_dir.join(CONFIG_FILE))
}

fn open_database(cfg: &TroubleshooterConfig) -> Result<Database> {
    let db_path = cfg.resolved_db_path();
    let db_path = Path::new(&db_path);
    Database::open(db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))
}

/// Next line typed at the prompt. `None` at end of input, or when
/// `interrupt` fires first (Ctrl-C while idle ends the session).
async fn next_input<R, F>(lines: &mut Lines<R>, interrupt: F) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    F: Future,
{
    tokio::select! {
        line = lines.next_line() => Ok(line?),
        _ = interrupt => Ok(None),
    }
}

fn print_turn(turn: &SessionTurn) {
    if let Some(calls) = &turn.response.tool_calls {
        for call in calls {
            let mark = if call.success {
                "ok".green()
            } else {
                "fail".red()
            };
            println!(
                "  {} {} [{}] {} {}",
                "·".dimmed(),
                call.name.bold(),
                mark,
                call.summary.dimmed(),
                format!("({}ms)", call.duration_ms).dimmed()
            );
        }
    }

    match &turn.outcome {
        Ok(result) => {
            println!("{} {}", "assistant>".green().bold(), turn.response.response);
            if result.used_fallback {
                println!(
                    "{}",
                    format!("  (answered by fallback provider {})", result.provider).yellow()
                );
            }
            if result.cap_hit {
                println!("{}", "  (step limit reached; reply may be incomplete)".yellow());
            }
        }
        Err(_) => println!("{} {}", "assistant>".red().bold(), turn.response.response),
    }
}

fn print_ladder(snapshot: &LadderSnapshot) {
    for line in snapshot.to_string().lines() {
        println!("  {}", line);
    }
}
