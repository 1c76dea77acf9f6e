//! econ-runner: headless driver for the crossword point economy.
//!
//! Usage:
//!   econ-runner --db econ.db --config economy.json --catalog puzzles.json --ipc-mode
//!   econ-runner --seed 12345 --players 8 --steps 200

mod sim;

use anyhow::Result;
use crossword_core::{
    api::{Api, ApiResponse, StaticCatalog, TokenTable},
    clock::{Clock, ManualClock, SystemClock},
    command::ApiCall,
    config::EconomyConfig,
    economy::Economy,
    feed::{ChangeFeed, Filter, Subscription},
};
use std::env;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcMessage {
    Call {
        bearer: String,
        call: ApiCall,
    },
    Subscribe {
        bearer: String,
        filter: Filter,
    },
    Unsubscribe {
        subscription: u64,
    },
    Quit,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let players = parse_arg(&args, "--players", 4usize);
    let steps = parse_arg(&args, "--steps", 100u64);
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let db = str_arg(&args, "--db").unwrap_or(":memory:");

    let mut config = match str_arg(&args, "--config") {
        Some(path) => EconomyConfig::load(path)?,
        None => EconomyConfig::default(),
    };
    let catalog = match str_arg(&args, "--catalog") {
        Some(path) => StaticCatalog::load(path)?,
        None => sim::demo_catalog(),
    };

    // For :memory: use a shared-memory URI so reopened connections see the
    // same database.
    let db_effective: String = if db == ":memory:" {
        format!("file:econ_{}?mode=memory&cache=shared", std::process::id())
    } else {
        db.to_string()
    };

    if ipc_mode {
        let economy = Economy::open(&db_effective, config.clone(), ChangeFeed::new(), Arc::new(SystemClock::new()))?;
        let api = Api::new(economy, Arc::new(TokenTable::new(config.tokens)), Arc::new(catalog));
        return run_ipc_loop(&api);
    }

    println!("econ-runner: simulation");
    println!("  seed:      {seed}");
    println!("  players:   {players}");
    println!("  steps:     {steps}");
    println!("  db:        {db}");
    println!();

    for i in 0..players {
        config.tokens.insert(sim::player_token(i), sim::player_id(i));
    }
    config.tokens.insert(sim::MODERATOR_TOKEN.to_string(), "sim-moderator".to_string());

    let clock = Arc::new(ManualClock::new());
    let shared: Arc<dyn Clock> = clock.clone();
    let economy = Economy::open(&db_effective, config.clone(), ChangeFeed::new(), shared)?;
    let api = Api::new(economy, Arc::new(TokenTable::new(config.tokens.clone())), Arc::new(catalog));

    for i in 0..players {
        signup(&api, &sim::player_token(i), &format!("Player {i}"))?;
    }
    signup(&api, sim::MODERATOR_TOKEN, "Moderator")?;
    api.economy().promote_to_moderator("sim-moderator")?;

    let report = sim::run(&api, &clock, seed, players, steps)?;
    print_summary(&api, &report)?;

    if !report.converged() {
        anyhow::bail!("clients did not converge to the server balance");
    }
    Ok(())
}

fn signup(api: &Api, bearer: &str, display_name: &str) -> Result<()> {
    let call = ApiCall {
        display_name: Some(display_name.to_string()),
        ..ApiCall::route("signup")
    };
    let ApiResponse { status, body } = api.handle(bearer, &call);
    anyhow::ensure!(status == 201, "signup for {bearer} failed ({status}): {body}");
    Ok(())
}

fn run_ipc_loop(api: &Api) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();
    let mut subscriptions: Vec<Subscription> = Vec::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let msg: IpcMessage = match serde_json::from_str(&buffer) {
            Ok(m) => m,
            Err(e) => {
                let err_json = serde_json::json!({ "type": "error", "error": e.to_string() });
                writeln!(stdout, "{}", err_json)?;
                stdout.flush()?;
                continue;
            }
        };

        let reply = match msg {
            IpcMessage::Quit => break,
            IpcMessage::Call { bearer, call } => {
                let ApiResponse { status, body } = api.handle(&bearer, &call);
                serde_json::json!({ "type": "response", "route": call.route, "status": status, "body": body })
            }
            IpcMessage::Subscribe { bearer, filter } => match api.subscribe(&bearer, filter) {
                Ok(sub) => {
                    let id = sub.id();
                    subscriptions.push(sub);
                    serde_json::json!({ "type": "subscribed", "subscription": id })
                }
                Err(e) => serde_json::json!({
                    "type": "error",
                    "status": e.status_code(),
                    "error": e.public_message(),
                }),
            },
            IpcMessage::Unsubscribe { subscription } => {
                // Dropping the handle unsubscribes; unknown ids are a no-op.
                subscriptions.retain(|s| s.id() != subscription);
                serde_json::json!({ "type": "unsubscribed", "subscription": subscription })
            }
        };
        writeln!(stdout, "{}", reply)?;

        for sub in &subscriptions {
            for change in sub.drain() {
                let push = serde_json::json!({ "type": "push", "subscription": sub.id(), "change": change });
                writeln!(stdout, "{}", push)?;
            }
        }
        stdout.flush()?;
    }
    Ok(())
}

fn print_summary(api: &Api, report: &sim::SimReport) -> Result<()> {
    let store = api.economy().store();
    println!("=== RUN SUMMARY ===");
    println!("  seed:        {}", report.seed);
    println!("  steps run:   {}", report.steps);
    println!("  approvals:   {}", report.approvals);
    println!("  rejections:  {}", report.rejections);
    println!("  rows solved: {}", store.event_count("row_completed")?);
    println!("  refused:     {}", store.event_count("debit_refused")?);
    println!();
    println!("=== BALANCES ===");
    for p in &report.players {
        let mark = if p.converged { "ok" } else { "DIVERGED" };
        println!(
            "  {:<12} | displayed {:>5} | server {:>5} | {mark}",
            p.account_id, p.displayed, p.server
        );
    }
    if log::log_enabled!(log::Level::Debug) {
        log::debug!("report: {}", serde_json::to_string(report)?);
    }
    Ok(())
}

fn str_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
