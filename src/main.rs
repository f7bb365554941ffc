//! Headless demo arena
//!
//! Spins up one simulation with a handful of AI tanks and shapes, runs
//! it for a fixed number of ticks and logs what the world looks like.
//! Useful for profiling the tick pipeline without a transport attached.

use rand::Rng;
use tracing::{info, Level};

use tank_arena_core::util::vec2::Vec2;
use tank_arena_core::{SimConfig, Simulation};

const DEMO_TICKS: u64 = 250;
const DEMO_BOTS: usize = 8;
const DEMO_SHAPES: usize = 40;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    info!("Tank Arena core v{}", env!("CARGO_PKG_VERSION"));

    let config = SimConfig::load_or_default();
    config.validate().map_err(anyhow::Error::msg)?;
    info!(
        max_entities = config.max_entities,
        cell_size = config.cell_size,
        half_extent = config.arena_half_extent,
        "configuration loaded"
    );

    let mut sim = Simulation::new(config.clone());
    let mut rng = rand::thread_rng();
    let spread = config.arena_half_extent * 0.8;

    let team_a = sim.spawn_team();
    let team_b = sim.spawn_team();
    for i in 0..DEMO_BOTS {
        let team = if i % 2 == 0 { team_a } else { team_b };
        let at = Vec2::new(rng.gen_range(-spread..spread), rng.gen_range(-spread..spread));
        sim.spawn_bot(&format!("Bot {}", i + 1), at, team);
    }
    for _ in 0..DEMO_SHAPES {
        let at = Vec2::new(rng.gen_range(-spread..spread), rng.gen_range(-spread..spread));
        sim.spawn_shape(at);
    }

    // One spectating client so the synchronizer has a view to feed
    let client = 1;
    sim.connect(client);

    let mut bytes_sent = 0usize;
    for _ in 0..DEMO_TICKS {
        for (_, packet) in sim.tick() {
            bytes_sent += packet.len();
        }
    }

    let stats = sim.stats();
    info!(
        ticks = stats.tick,
        entities = stats.entities,
        clients = stats.clients,
        bytes_sent,
        "demo finished"
    );
    Ok(())
}
