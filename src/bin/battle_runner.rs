//! Headless Battle Runner
//!
//! Plays a battle against a scripted operator and prints a summary. Every
//! decision goes through a real UI thread and battle session, so the runner
//! exercises the same paths as an interactive shell.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use ahash::AHashMap;
use battle_council::casualty::{CasualtyAllocator, CasualtyDetails, Unit};
use battle_council::core::config::{config as session_config, set_config, SessionConfig};
use battle_council::core::types::{PlayerId, Territory, UnitId, UnitTypeId};
use battle_council::session::{BattlePrompter, BattleSession, CasualtyRequest, PendingDecision};
use battle_council::sync::{ShutdownRegistry, UiThread};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

const STEPS: [&str; 4] = ["fire", "select casualties", "remove casualties", "retreat"];

/// Headless Battle Runner - scripted operator against a battle session
#[derive(Parser, Debug)]
#[command(name = "battle_runner")]
#[command(about = "Run a battle with a scripted operator and print a summary")]
struct Args {
    /// Defending infantry (1 hit point)
    #[arg(long, default_value_t = 6)]
    infantry: usize,

    /// Defending tanks (2 hit points)
    #[arg(long, default_value_t = 2)]
    tanks: usize,

    /// Attacking units rolling each round
    #[arg(long, default_value_t = 5)]
    attackers: usize,

    /// Maximum rounds before the battle is called off
    #[arg(long, default_value_t = 6)]
    max_rounds: u32,

    /// Offer the submerge shortcut instead of a destination chooser
    #[arg(long)]
    submerge: bool,

    /// Session config file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Step display cadence in milliseconds, overriding the config
    #[arg(long, default_value_t = 20)]
    step_ms: u64,

    /// Random seed for deterministic runs
    #[arg(long)]
    seed: Option<u64>,

    /// Output format: json or text
    #[arg(long, default_value = "json")]
    format: String,

    /// Log every decision to stderr
    #[arg(long, short = 'v')]
    verbose: bool,
}

/// JSON output structure
#[derive(Serialize)]
struct BattleResult {
    outcome: String,
    rounds: u32,
    hits_taken: usize,
    units_lost: usize,
    units_damaged: usize,
    survivors: usize,
    decisions: Vec<String>,
    seed: u64,
}

/// Answers every prompt from a seeded RNG
struct ScriptedOperator {
    rng: Mutex<StdRng>,
    log: Mutex<Vec<String>>,
    verbose: bool,
}

impl ScriptedOperator {
    fn new(seed: u64, verbose: bool) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            log: Mutex::new(Vec::new()),
            verbose,
        }
    }

    fn record(&self, entry: String) {
        if self.verbose {
            eprintln!("  {}", entry);
        }
        self.log.lock().unwrap_or_else(PoisonError::into_inner).push(entry);
    }

    fn take_log(&self) -> Vec<String> {
        std::mem::take(&mut *self.log.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl BattlePrompter for ScriptedOperator {
    fn present(&self, decision: PendingDecision) {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let outcome = match decision {
            PendingDecision::Confirmation(mut dialog) => {
                dialog.confirm().map(|_| format!("continued: {}", dialog.message()))
            }
            PendingDecision::Retreat(mut dialog) => {
                if !dialog.destinations().is_empty() && rng.gen_bool(0.3) {
                    let pick = rng.gen_range(0..dialog.destinations().len());
                    let to = dialog.destinations()[pick].clone();
                    let label = dialog.retreat_label();
                    dialog.retreat(&to).map(|_| format!("{} ({})", label, to))
                } else {
                    dialog.remain().map(|_| "remained".to_string())
                }
            }
            PendingDecision::Submerge(mut dialog) => {
                if rng.gen_bool(0.3) {
                    dialog.submerge().map(|_| format!("submerged at {}", dialog.location()))
                } else {
                    dialog.remain().map(|_| "remained".to_string())
                }
            }
            PendingDecision::Casualties(mut dialog) => {
                pick_casualties(dialog.allocator_mut());
                let text = dialog.button_text();
                dialog.accept().map(|_| format!("{} -> accepted", text))
            }
        };
        drop(rng);

        match outcome {
            Ok(entry) => self.record(entry),
            Err(err) => self.record(format!("rejected: {}", err)),
        }
    }

    fn battle_ended(&self, message: &str) {
        self.record(format!("battle ended: {}", message));
    }
}

fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let seed = args.seed.unwrap_or_else(rand::random);
    let mut rng = StdRng::seed_from_u64(seed);

    let mut config = match &args.config {
        Some(path) => SessionConfig::load_from_toml(path).unwrap_or_else(|e| {
            eprintln!("Warning: Failed to load config '{}': {}", path.display(), e);
            eprintln!("Using default config");
            SessionConfig::default()
        }),
        None => SessionConfig::default(),
    };
    config.step_interval_ms = args.step_ms.max(1);
    if set_config(config).is_err() {
        eprintln!("Warning: session config was already set");
    }
    let config = session_config().clone();

    let ui = match UiThread::spawn(&config.ui_thread_name) {
        Ok(ui) => ui,
        Err(e) => {
            eprintln!("Failed to start UI thread: {}", e);
            std::process::exit(1);
        }
    };
    let registry = Arc::new(ShutdownRegistry::with_dispatcher(Arc::new(ui.handle())));
    let operator = Arc::new(ScriptedOperator::new(seed.wrapping_add(1), args.verbose));
    let location = Territory::new(1, "Sea Zone 5");
    let session = BattleSession::new(
        ui.handle(),
        Arc::clone(&registry),
        operator.clone(),
        config,
        location,
    );
    session
        .steps()
        .set_steps(STEPS.iter().map(|s| s.to_string()).collect());

    let mut pool = create_defenders(args.infantry, args.tanks);
    let destinations = vec![Territory::new(2, "Sea Zone 6"), Territory::new(3, "Sea Zone 9")];
    let mut rounds = 0;
    let mut hits_taken = 0;
    let mut units_lost = 0;
    let mut units_damaged = 0;
    let mut outcome = "rounds exhausted".to_string();

    while rounds < args.max_rounds {
        rounds += 1;
        if args.verbose {
            eprintln!("=== Round {} ({} defenders) ===", rounds, pool.len());
        }

        step(&session, "fire");
        let capacity: usize = pool.iter().map(|u| u.hits_left() as usize).sum();
        let hits = (0..args.attackers).filter(|_| rng.gen_range(1..=6) <= 3).count();
        let hits = hits.min(capacity);

        if hits > 0 {
            step(&session, "select casualties");
            let request = CasualtyRequest::new(
                "Defender",
                format!("{} hits", hits),
                pool.clone(),
                Some(hits as u32),
            )
            .with_multiple_hits();
            match session.request_casualties(request) {
                Ok(Some(details)) => {
                    step(&session, "remove casualties");
                    hits_taken += details.hit_count();
                    let (lost, damaged) = apply_casualties(&mut pool, &details);
                    units_lost += lost;
                    units_damaged += damaged;
                }
                Ok(None) => {
                    outcome = "no casualty decision".to_string();
                    break;
                }
                Err(e) => {
                    eprintln!("Casualty request failed: {}", e);
                    outcome = "error".to_string();
                    break;
                }
            }
        }

        if pool.is_empty() {
            outcome = "defender destroyed".to_string();
            break;
        }

        step(&session, "retreat");
        match session.request_retreat("Defender retreat?", destinations.clone(), args.submerge) {
            Ok(Some(to)) => {
                outcome = format!("defender left for {}", to);
                break;
            }
            Ok(None) => {}
            Err(e) => {
                eprintln!("Retreat request failed: {}", e);
                outcome = "error".to_string();
                break;
            }
        }

        if let Err(e) = session.wait_for_confirmation(format!("Round {} over", rounds)) {
            eprintln!("Confirmation failed: {}", e);
        }
    }

    session.end_battle(outcome.clone());
    if let Err(e) = session.steps().wait_until_finished() {
        eprintln!("Step display did not finish: {}", e);
    }
    session.close();
    registry.shutdown();
    ui.stop();

    let result = BattleResult {
        outcome,
        rounds,
        hits_taken,
        units_lost,
        units_damaged,
        survivors: pool.len(),
        decisions: operator.take_log(),
        seed,
    };

    match args.format.as_str() {
        "json" => print_json(&result),
        "text" => {
            println!("Battle Result");
            println!("=============");
            println!("Outcome: {}", result.outcome);
            println!("Rounds: {}", result.rounds);
            println!("Hits taken: {}", result.hits_taken);
            println!("Units lost: {}", result.units_lost);
            println!("Units damaged: {}", result.units_damaged);
            println!("Survivors: {}", result.survivors);
            println!();
            println!("Decisions:");
            for decision in &result.decisions {
                println!("  {}", decision);
            }
            println!("Seed: {}", result.seed);
        }
        _ => {
            eprintln!("Unknown format '{}', defaulting to json", args.format);
            print_json(&result);
        }
    }
}

fn print_json(result: &BattleResult) {
    match serde_json::to_string_pretty(result) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize result: {}", e),
    }
}

fn step(session: &BattleSession, name: &str) {
    if let Err(e) = session.goto_step(name) {
        eprintln!("Step '{}' failed: {}", name, e);
    }
}

/// Kill what the first slots can take, then damage multi-hit units with
/// whatever is left
fn pick_casualties(allocator: &mut CasualtyAllocator) {
    allocator.select_none();
    allocator.auto_select();
    for entry in 0..allocator.entries().len() {
        let slots = allocator.entries()[entry].slot_count();
        for slot in 1..slots {
            if allocator.left_to_select() == Some(0) {
                return;
            }
            let wanted = allocator.entries()[entry].hits(slot - 1);
            if allocator.set_hits(entry, slot, wanted).is_err() {
                break;
            }
        }
    }
}

/// Defending force: infantry first, then tanks
fn create_defenders(infantry: usize, tanks: usize) -> Vec<Unit> {
    let owner = PlayerId::new(2);
    let mut units: Vec<Unit> = (0..infantry)
        .map(|_| Unit::new(owner, UnitTypeId::new(1), 1))
        .collect();
    units.extend((0..tanks).map(|_| Unit::new(owner, UnitTypeId::new(2), 2)));
    units
}

/// Remove killed units and add damage. Returns (lost, newly damaged).
fn apply_casualties(pool: &mut Vec<Unit>, details: &CasualtyDetails) -> (usize, usize) {
    let mut damage: AHashMap<UnitId, u32> = AHashMap::new();
    for unit in &details.damaged {
        *damage.entry(unit.id).or_insert(0) += 1;
    }

    let before = pool.len();
    pool.retain(|u| !details.killed.iter().any(|k| k.id == u.id));
    let lost = before - pool.len();

    let mut damaged = 0;
    for unit in pool.iter_mut() {
        if let Some(hits) = damage.get(&unit.id) {
            unit.damage = (unit.damage + hits).min(unit.hit_points.saturating_sub(1));
            damaged += 1;
        }
    }
    (lost, damaged)
}
