//! codshield-runner: headless driver for the COD risk core.
//!
//! Usage:
//!   codshield-runner --seed 12345 --orders 500 --db run.db
//!   codshield-runner --config data/risk_config.json --ipc-mode

mod traffic;

use anyhow::Result;
use codshield_core::{
    clock::SystemClock,
    config::RiskConfig,
    device_reputation::{DeviceFingerprint, DeviceSignal},
    error::RiskError,
    feedback::{FeedbackOutcome, ReturnReason},
    intelligence::CheckoutContext,
    ip_reputation::{resolve_real_ip, ConnectionInfo},
    order::{CodOrder, MemoryOrderBook},
    pipeline::{CheckoutPipeline, Disposition},
    repository::SqliteRepository,
    risk_engine::RiskLevel,
    types::{OrderId, ReputationKind},
};
use std::collections::BTreeMap;
use std::env;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use traffic::Stream;

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    Checkout {
        order:       CodOrder,
        #[serde(default)]
        checkout:    CheckoutContext,
        /// Raw request data; when present the client IP is resolved from it.
        #[serde(default)]
        connection:  Option<ConnectionInfo>,
        /// Full fingerprint payload for `checkout.device.hash`.
        #[serde(default)]
        fingerprint: Option<DeviceFingerprint>,
    },
    ComputeRisk {
        order_id: OrderId,
    },
    ReportDelivery {
        order_id:  OrderId,
        delivered: bool,
        #[serde(default)]
        reason:    Option<ReturnReason>,
    },
    CancelOrder {
        order_id: OrderId,
    },
    GetReputation {
        kind: ReputationKind,
        key:  String,
    },
    BlockIp {
        ip: String,
        #[serde(default = "default_blocked")]
        blocked: bool,
    },
    Quit,
}

fn default_blocked() -> bool {
    true
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let orders = parse_arg(&args, "--orders", 200u64);
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let db = arg_str(&args, "--db").unwrap_or(":memory:");
    let config_path = arg_str(&args, "--config");

    let config = match config_path {
        Some(path) => RiskConfig::load(path)?,
        None => RiskConfig::default(),
    };
    config.validate()?;

    if !ipc_mode {
        println!("CodShield — risk runner");
        println!("  seed:      {seed}");
        println!("  orders:    {orders}");
        println!("  db:        {db}");
        println!("  config:    {}", config_path.unwrap_or("(defaults)"));
        println!();
    }

    let repo = Arc::new(if db == ":memory:" {
        SqliteRepository::in_memory()?
    } else {
        SqliteRepository::open(db)?
    });
    repo.migrate()?;

    let book = Arc::new(MemoryOrderBook::new());
    let pipeline = CheckoutPipeline::build(config, repo.clone(), book.clone(), Arc::new(SystemClock));

    if ipc_mode {
        run_ipc_loop(&pipeline, &book)?;
    } else {
        let stats = simulate(&pipeline, &book, seed, orders)?;
        print_summary(&repo, &stats)?;
    }

    Ok(())
}

// ── Simulation ────────────────────────────────────────────────────

#[derive(Default)]
struct RunStats {
    orders:       u64,
    levels:       BTreeMap<&'static str, u64>,
    dispositions: BTreeMap<&'static str, u64>,
    delivered:    u64,
    returned:     u64,
    in_transit:   u64,
}

fn simulate(
    pipeline: &CheckoutPipeline,
    book:     &MemoryOrderBook,
    seed:     u64,
    orders:   u64,
) -> Result<RunStats> {
    let mut checkout_rng = traffic::stream(seed, Stream::Checkout);
    let mut courier_rng = traffic::stream(seed, Stream::Courier);
    let mut stats = RunStats::default();

    for order_id in 1..=orders {
        let (order, checkout) = traffic::checkout(&mut checkout_rng, order_id);
        book.insert(order.clone())?;

        let decision = pipeline.decide(&order, &checkout);
        stats.orders += 1;
        *stats.dispositions.entry(decision.disposition.as_str()).or_default() += 1;

        let Some(assessment) = decision.assessment else { continue };
        *stats.levels.entry(assessment.risk_level.as_str()).or_default() += 1;

        // Blocked orders never ship.
        if decision.disposition == Disposition::Block {
            continue;
        }
        match traffic::courier_outcome(&mut courier_rng, assessment.total_score) {
            Some((delivered, reason)) => {
                pipeline.report_delivery_outcome(order_id, delivered, reason)?;
                if delivered {
                    stats.delivered += 1;
                } else {
                    stats.returned += 1;
                }
            }
            None => stats.in_transit += 1,
        }
    }
    log::info!(
        "simulated {} checkouts ({} delivered, {} returned)",
        stats.orders, stats.delivered, stats.returned
    );
    Ok(stats)
}

fn print_summary(repo: &SqliteRepository, stats: &RunStats) -> Result<()> {
    println!("=== RUN SUMMARY ===");
    println!("  orders:         {}", stats.orders);
    println!("  delivered:      {}", stats.delivered);
    println!("  returned:       {}", stats.returned);
    println!("  in transit:     {}", stats.in_transit);
    println!("  phones tracked: {}", repo.phone_count()?);
    println!("  intelligence:   {}", repo.intelligence_count()?);

    println!();
    println!("=== RISK LEVELS ===");
    for level in [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High] {
        let n = stats.levels.get(level.as_str()).copied().unwrap_or(0);
        println!("  {:<8} {n}", level.as_str());
    }

    println!();
    println!("=== DISPOSITIONS ===");
    for (disposition, n) in &stats.dispositions {
        println!("  {disposition:<14} {n}");
    }

    println!();
    println!("=== RISKIEST PHONES ===");
    let phones = repo.riskiest_phones(5)?;
    if phones.is_empty() {
        println!("  (No phones recorded)");
    }
    for p in phones {
        println!(
            "  {} | score: {:>3} | orders: {:>3} | returns: {:>3} | return rate: {:.1}%",
            p.phone, p.risk_score, p.order_count, p.return_count, p.return_rate()
        );
    }
    Ok(())
}

// ── IPC ───────────────────────────────────────────────────────────

fn run_ipc_loop(pipeline: &CheckoutPipeline, book: &MemoryOrderBook) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                let err_json = serde_json::json!({ "error": e.to_string() });
                writeln!(stdout, "{}", err_json)?;
                stdout.flush()?;
                continue;
            }
        };

        if matches!(cmd, IpcCommand::Quit) {
            break;
        }

        let response = match handle_command(pipeline, book, cmd) {
            Ok(value) => value,
            Err(e) => serde_json::json!({
                "error":     e.to_string(),
                "retryable": e.is_retryable(),
            }),
        };
        writeln!(stdout, "{}", response)?;
        stdout.flush()?;
    }
    Ok(())
}

fn handle_command(
    pipeline: &CheckoutPipeline,
    book:     &MemoryOrderBook,
    cmd:      IpcCommand,
) -> Result<serde_json::Value, RiskError> {
    let value = match cmd {
        IpcCommand::Checkout { order, mut checkout, connection, fingerprint } => {
            if let Some(conn) = connection {
                checkout.ip = resolve_real_ip(&conn);
            }
            if let Some(fp) = fingerprint {
                checkout.device = DeviceSignal::from_fingerprint(checkout.device.hash.as_str(), &fp)?;
            }
            book.insert(order.clone())?;
            serde_json::to_value(pipeline.decide(&order, &checkout))?
        }
        IpcCommand::ComputeRisk { order_id } => {
            serde_json::to_value(pipeline.compute_risk(order_id)?)?
        }
        IpcCommand::ReportDelivery { order_id, delivered, reason } => {
            feedback_json(pipeline.report_delivery_outcome(order_id, delivered, reason)?)
        }
        IpcCommand::CancelOrder { order_id } => {
            feedback_json(pipeline.cancel_order(order_id)?)
        }
        IpcCommand::GetReputation { kind, key } => {
            serde_json::to_value(pipeline.get_reputation(kind, &key)?)?
        }
        IpcCommand::BlockIp { ip, blocked } => {
            serde_json::to_value(pipeline.block_ip(&ip, blocked)?)?
        }
        IpcCommand::Quit => serde_json::Value::Null,
    };
    Ok(value)
}

fn feedback_json(outcome: FeedbackOutcome) -> serde_json::Value {
    match outcome {
        FeedbackOutcome::Applied(rep) => serde_json::json!({ "outcome": "applied", "reputation": rep }),
        FeedbackOutcome::Unchanged    => serde_json::json!({ "outcome": "unchanged" }),
        FeedbackOutcome::InvalidPhone => serde_json::json!({ "outcome": "invalid_phone" }),
        FeedbackOutcome::NotCod       => serde_json::json!({ "outcome": "not_cod" }),
    }
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn arg_str<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}
