//! Runs the sampling loop against a simulated sixteen-input meter.
//!
//! Run with: `RUST_LOG=mux_sched=debug cargo run --example metering_loop`

use mux_sched::prelude::*;
use std::thread;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = SchedulerConfig::builder()
        .coefficients(0.4, 0.5, 0.1)
        .variability_ema_alpha(0.3)
        .build()?;
    let mut table = ChannelTable::with_defaults(config.channel_count);
    let labels = [(0, "Mains"), (1, "Oven"), (2, "Heat pump"), (3, "Lighting"), (4, "Solar")];
    for (channel, label) in labels {
        let entry = table.entry(channel);
        entry.active = true;
        entry.label = label.to_string();
    }
    table.entry(4).reverse = true;

    let mut source = SimulatedSource::new(config.channel_count, 2024)
        .with_power(0, 4200.0)
        .with_power(2, 1800.0)
        .with_power(3, 120.0)
        .with_power(4, -2500.0)
        .with_noise(15.0);
    source.set_toggle(1, 2000.0, 40.0);

    let scheduler = ChannelScheduler::new(config)?;
    let mut driver = SamplingDriver::new(scheduler, source, LatchedLines::default())?
        .with_channel_table(table)?;
    driver.scheduler_mut().enable_trace();
    let control = driver.control_handle();

    println!("Phase 1: four loads");
    driver.run(400)?;
    print_shares(&driver);

    // a configuration context switches the lighting circuit off mid-run
    thread::spawn(move || control.set_active(3, false)).join().ok();

    println!("\nPhase 2: lighting switched off");
    driver.metrics().reset();
    driver.run(400)?;
    print_shares(&driver);

    if let Some(cycles) = driver.sample_line_cycles(100) {
        println!("\nLine cycles per reading for a 100-cycle sweep: {cycles}");
    }

    let out_dir = std::env::temp_dir();
    let exporter = JsonExporter::new(out_dir.join("mux_sched_metrics.json"));
    exporter.export(&driver.metrics().snapshot())?;
    if let Some(trace) = driver.scheduler_mut().take_trace() {
        trace.save(&out_dir.join("mux_sched_trace.json"))?;
        println!("Recorded {} trace events", trace.len());
    }
    println!("Metrics and trace written to {}", out_dir.display());

    Ok(())
}

fn print_shares<S: PowerSource, L: SelectLines>(driver: &SamplingDriver<S, L>) {
    let snapshot = driver.metrics().snapshot();
    for channel in 1..driver.scheduler().channel_count() {
        let count = snapshot.selections_of(channel);
        if count == 0 {
            continue;
        }
        println!(
            "  {:<10} {:>4} samples  {:>5.1}%  weight {:.3}",
            driver.label(channel),
            count,
            snapshot.selection_share(channel) * 100.0,
            driver.scheduler().weight(channel),
        );
    }
    println!("  longest gap between samples: {} ticks", snapshot.max_gap);
}
