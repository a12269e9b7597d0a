//! Demo host: runs the simulation engine with the bridge attached.
//!
//! Stands in for a real engine embedding so the whole protocol can be
//! exercised end to end: `simbridge -v`, then point a client at
//! `http://127.0.0.1:9898`.

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use log::{debug, info};

use scenebridge::bridge::RuntimeBridge;
use scenebridge::config::BridgeConfig;
use scenebridge::sim::{demo, SimEngine};

/// Simulated game with the runtime control bridge attached
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Runtime bridge port (0 picks an ephemeral port)
    #[arg(short = 'p', long = "port", default_value = "9898")]
    port: u16,

    /// Frame rate of the simulated game loop
    #[arg(long = "fps", default_value = "60")]
    fps: u32,

    /// Stop after N seconds (default: run until killed)
    #[arg(long = "run-for", value_name = "SECONDS")]
    run_for: Option<f64>,

    /// Write logs to a file instead of stderr
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbosity: u8,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    if let Some(path) = &args.log_file {
        let file = std::fs::File::create(path)
            .with_context(|| format!("creating log file {}", path.display()))?;
        env_logger::Builder::new()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();
    } else {
        env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(log_level.as_str()),
        )
        .format_timestamp_millis()
        .init();
    }

    let mut sim = SimEngine::new("simbridge demo");
    demo::build(&mut sim);

    let config = BridgeConfig {
        runtime_port: args.port,
        ..BridgeConfig::default()
    };
    let mut bridge = RuntimeBridge::new(config);
    let addr = bridge.start(&mut sim).context("starting runtime bridge")?;
    info!("demo game running; bridge at http://{}", addr);
    println!("simbridge listening on http://{}", addr);

    let frame_time = Duration::from_secs_f64(1.0 / args.fps.max(1) as f64);
    let started = Instant::now();
    let mut last = Instant::now();

    loop {
        let now = Instant::now();
        let dt = now.duration_since(last).as_secs_f64();
        last = now;

        sim.tick(dt);
        bridge.tick(&mut sim);

        if let Some(limit) = args.run_for {
            if started.elapsed().as_secs_f64() >= limit {
                debug!("run-for limit reached, shutting down");
                break;
            }
        }

        let spent = now.elapsed();
        if spent < frame_time {
            thread::sleep(frame_time - spent);
        }
    }

    bridge.stop(&mut sim);
    info!("simbridge exiting");
    Ok(())
}
