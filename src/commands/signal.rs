//! Signal command: replay a price file through the detector

use anyhow::Result;
use exhaustion_strategy::{data, Config, DetectorConfig, ExhaustionDetector};
use tracing::info;

pub fn run(data_path: String, config_path: Option<String>) -> Result<()> {
    let detector_config = match &config_path {
        Some(path) => Config::from_file(path)?.detector,
        None => DetectorConfig::default(),
    };

    let prices = data::load_closes(&data_path)?;
    let mut detector = ExhaustionDetector::new(detector_config)?;
    let signal = detector.detect_signal(&prices);

    info!(
        bars = prices.len(),
        bull_count = signal.bull_count,
        bear_count = signal.bear_count,
        "Replay complete"
    );

    let flag = |set: bool| if set { "YES" } else { "-" };

    println!("\n{}", "=".repeat(40));
    println!("SIGNAL @ {:.4}", signal.price);
    println!("{}", "=".repeat(40));
    println!("{:<8} {:>8} {:>8}", "", "Bullish", "Bearish");
    println!("{:<8} {:>8} {:>8}", "Count", signal.bull_count, signal.bear_count);
    println!("{:<8} {:>8} {:>8}", "Level 1", flag(signal.bull_l1), flag(signal.bear_l1));
    println!("{:<8} {:>8} {:>8}", "Level 2", flag(signal.bull_l2), flag(signal.bear_l2));
    println!("{:<8} {:>8} {:>8}", "Level 3", flag(signal.bull_l3), flag(signal.bear_l3));
    if !signal.has_flag() {
        println!("No level reached on the last close");
    }
    println!("{}", "=".repeat(40));

    Ok(())
}
