use std::{error::Error, time::Instant};

use p2p_mining_sim::prelude::*;
use tracing_subscriber::EnvFilter;

const GAMMA: f64 = 0.0;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let start = Instant::now();

    let alpha = (0..=45).percent().step_by(5);
    let simulation = SimulationBuilder::new()
        .peers(10)
        .slow_peers(5)
        .low_hash_peers(5)
        .block_mean(100.0)
        .horizon(50_000.0)
        .adversary(Strategy::Selfish(Selfish))
        .adversary_power_iter(alpha)
        .repeat_all(10)
        .record_trace(false)
        .build()?;

    let data = simulation.run_all()?;

    let results = data
        .all()
        .average(Average::Mean)
        .constant("Gamma", GAMMA)
        .adversary_power_func("Ideal SM Revenue", selfish_revenue(GAMMA))
        .build();

    println!("{}", results);
    println!("Elapsed time: {:.4} secs", start.elapsed().as_secs_f64());

    Ok(())
}
