//! `chatloop interval`: Sample proactive silence targets.

use std::time::Duration;

use chatloop_config::AppConfig;
use chatloop_engine::{compute_interval, format_duration, three_sigma_range};

pub async fn run(samples: usize) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let proactive = &config.proactive;

    let (low, high) = three_sigma_range(proactive.interval_secs, proactive.delta_sigma);
    println!("⏱  Proactive interval");
    println!("   Base:      {}s", proactive.interval_secs);
    println!("   Sigma:     {}s", proactive.delta_sigma);
    println!(
        "   3σ range:  {} .. {}",
        format_duration(Duration::from_secs(low)),
        format_duration(Duration::from_secs(high))
    );
    println!();

    let mut rng = rand::rng();
    for i in 1..=samples {
        let secs = compute_interval(proactive.interval_secs, proactive.delta_sigma, &mut rng);
        println!("   {i:>4}  {:>8}s  {}", secs, format_duration(Duration::from_secs(secs)));
    }

    Ok(())
}
