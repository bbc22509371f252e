use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::Serialize;

use acs_engine::{HostEvent, RecordingHost, Trigger, Vm, VmConfig};

mod cli;

#[derive(Serialize)]
struct TickEvent {
    tick: u32,
    #[serde(flatten)]
    event: HostEvent,
}

#[derive(Serialize)]
struct EventLog {
    map: i32,
    ticks: u32,
    events: Vec<TickEvent>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = cli::parse()?;

    let mut config =
        VmConfig::from_json_file(args.config.as_deref()).context("loading vm config")?;
    if args.seed.is_some() {
        config.rng_seed = args.seed;
    }

    let bytes = fs::read(&args.image)
        .with_context(|| format!("reading script image {}", args.image.display()))?;
    let mut vm = Vm::new(config);
    vm.load_map(args.map, &bytes)?;

    for start in &args.starts {
        match vm.start_script(start.script, 0, start.args, Trigger::none()) {
            Ok(outcome) => log::info!("script {}: {outcome:?}", start.script),
            Err(err) => eprintln!("!! {err}"),
        }
    }

    let mut host = RecordingHost::new();
    let mut events = Vec::new();
    for tick in 0..args.ticks {
        vm.tick(&mut host);
        events.extend(
            host.take_events()
                .into_iter()
                .map(|event| TickEvent { tick, event }),
        );
        host.advance();
    }

    for event in &events {
        if let HostEvent::Print { text, .. } = &event.event {
            println!("[{:>5}] {text}", event.tick);
        }
    }
    println!(
        "Ran {} ticks on map {}: {} host events, {} scripts still live",
        args.ticks,
        args.map,
        events.len(),
        vm.instances().len()
    );

    if let Some(path) = args.event_log_json.as_ref() {
        let log = EventLog {
            map: args.map,
            ticks: args.ticks,
            events,
        };
        write_json(path, &log, "event log")?;
    }
    if let Some(path) = args.snapshot_json.as_ref() {
        write_json(path, &vm.snapshot(), "vm snapshot")?;
    }
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T, label: &str) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .with_context(|| format!("serializing {label} to JSON"))?;
    fs::write(path, json).with_context(|| format!("writing {label} to {}", path.display()))?;
    println!("Saved {label} to {}", path.display());
    Ok(())
}
