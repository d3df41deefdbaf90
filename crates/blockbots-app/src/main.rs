use anyhow::{Context, Result};
use blockbots_core::{
    Action, Direction, GridSettings, MatchConfig, Position, Rotation, World,
};
use clap::Parser;
use owo_colors::OwoColorize;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

/// Headless match runner: builds a seeded world, drives a simple scripted
/// policy for every agent, and prints results as JSON.
#[derive(Debug, Parser)]
#[command(name = "blockbots", about = "Headless BlockBots match runner")]
struct AppCli {
    /// Number of steps to simulate.
    #[arg(long, default_value_t = 200)]
    steps: u64,

    /// World seed; drawn from entropy when omitted.
    #[arg(long)]
    seed: Option<u64>,

    /// Grid width in cells.
    #[arg(long, default_value_t = 40)]
    width: u32,

    /// Grid height in cells.
    #[arg(long, default_value_t = 40)]
    height: u32,

    /// Agents per team.
    #[arg(long, default_value_t = 4)]
    agents: u32,

    /// Comma-separated team names.
    #[arg(long, value_delimiter = ',', default_value = "A,B")]
    teams: Vec<String>,

    /// Optional setup file applied before the first step.
    #[arg(long)]
    setup: Option<PathBuf>,

    /// Print a world snapshot as JSON every N steps (0 disables).
    #[arg(long, default_value_t = 0)]
    snapshot_every: u64,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = AppCli::parse();
    let config = compose_config(&cli);
    let seed = config.rng_seed;

    let mut world = World::new(config).context("building world")?;
    info!(
        seed = ?seed,
        agents = world.initial_percepts().len(),
        block_types = ?world.block_types(),
        "match starts"
    );

    let mut policy = DemoPolicy::new(seed.unwrap_or(0) ^ 0x5eed);
    for step in 0..cli.steps {
        let percepts = world.prepare_step(step);
        let actions: BTreeMap<String, Action> = percepts
            .keys()
            .map(|agent| (agent.clone(), policy.choose()))
            .collect();
        let results = world.dispatch_actions(&actions);
        let successes = results.values().filter(|r| r.is_success()).count();
        if step % 50 == 0 {
            info!(step, successes, total = results.len(), "progress");
        }
        if cli.snapshot_every > 0 && step % cli.snapshot_every == 0 {
            println!(
                "{}",
                serde_json::to_string(&world.snapshot()).context("serializing snapshot")?
            );
        }
    }

    print_scoreboard(&world);
    println!(
        "{}",
        serde_json::to_string(&world.result()).context("serializing result")?
    );
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn compose_config(cli: &AppCli) -> MatchConfig {
    let mut config = MatchConfig {
        steps: cli.steps,
        grid: GridSettings {
            width: cli.width,
            height: cli.height,
        },
        rng_seed: Some(cli.seed.unwrap_or_else(rand::random)),
        ..MatchConfig::default()
    };
    for team in &cli.teams {
        let roster = (1..=cli.agents)
            .map(|n| format!("agent{team}{n}"))
            .collect();
        config.teams.insert(team.clone(), roster);
    }
    if let Some(path) = &cli.setup {
        match fs::read_to_string(path) {
            Ok(contents) => {
                config.setup = contents.lines().map(str::to_string).collect();
            }
            Err(err) => warn!(path = %path.display(), %err, "setup file unreadable, continuing without it"),
        }
    }
    config
}

/// Scripted wanderer: mostly walks, sometimes rotates or digs at the cell
/// it stands next to. Enough to exercise the engine end to end.
struct DemoPolicy {
    rng: SmallRng,
}

impl DemoPolicy {
    fn new(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    fn choose(&mut self) -> Action {
        match self.rng.random_range(0..10u32) {
            0 => Action::Rotate(if self.rng.random_range(0..2) == 0 {
                Rotation::Clockwise
            } else {
                Rotation::CounterClockwise
            }),
            1 => Action::Clear {
                target: Position::new(1, 0),
            },
            2 => Action::Skip,
            _ => {
                let direction = match self.rng.random_range(0..4u32) {
                    0 => Direction::North,
                    1 => Direction::South,
                    2 => Direction::East,
                    _ => Direction::West,
                };
                Action::Move(direction)
            }
        }
    }
}

fn print_scoreboard(world: &World) {
    let mut standings: Vec<(String, u64)> = world
        .result()
        .into_iter()
        .map(|(team, result)| (team, result.score))
        .collect();
    standings.sort_by(|a, b| b.1.cmp(&a.1));
    eprintln!("{}", "final standings".bold());
    for (rank, (team, score)) in standings.iter().enumerate() {
        eprintln!(
            "  {} {} {}",
            format!("#{}", rank + 1).dimmed(),
            team.green(),
            score.bold()
        );
    }
}
