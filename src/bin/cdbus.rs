use cdbus::config::{demo_scenario, SimulationConfig};
use cdbus::journal::SnapshotJournal;
use cdbus::render;
use cdbus::{BusSimulation, StationState, Symbol, TickSnapshot};
use clap::{App, Arg};
use colored::*;
use std::path::Path;
use std::time::Duration;
use tokio::time;
use tracing::{error, info, Level};

const DEFAULT_TICKS: &str = "30";
const DEFAULT_DELAY_MS: &str = "1000";
const CLEAR_SCREEN: &str = "\x1b[2J\x1b[1;1H";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("cdbus")
        .version("0.1.0")
        .author("Network Systems Lab")
        .about("🔌 Shared-bus CSMA/CD simulator - watch frames, collisions and backoff on one cable")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Scenario file (TOML). Runs the built-in two-station demo when omitted")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("ticks")
                .short("t")
                .long("ticks")
                .value_name("N")
                .help("Number of ticks to run")
                .takes_value(true)
                .default_value(DEFAULT_TICKS)
                .validator(is_unsigned),
        )
        .arg(
            Arg::with_name("delay")
                .short("d")
                .long("delay-ms")
                .value_name("MS")
                .help("Wall-clock pause between ticks (0 runs as fast as possible)")
                .takes_value(true)
                .default_value(DEFAULT_DELAY_MS)
                .validator(is_unsigned),
        )
        .arg(
            Arg::with_name("seed")
                .short("s")
                .long("seed")
                .value_name("SEED")
                .help("Override the scenario's backoff seed")
                .takes_value(true)
                .validator(is_unsigned),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["table", "json", "compact"])
                .default_value("table"),
        )
        .arg(
            Arg::with_name("journal")
                .short("j")
                .long("journal")
                .value_name("FILE")
                .help("Append every tick snapshot to FILE as JSON lines")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("until-settled")
                .short("u")
                .long("until-settled")
                .help("Stop early once every message is settled and the cable is quiet"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable debug logging of station transitions"),
        )
        .get_matches();

    let level = if matches.is_present("verbose") {
        Level::DEBUG
    } else {
        Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match matches.value_of("config") {
        Some(path) => SimulationConfig::load(Path::new(path))?,
        None => demo_scenario(),
    };
    if let Some(seed) = matches.value_of("seed") {
        config.seed = seed.parse()?;
    }

    let ticks: u64 = matches.value_of("ticks").unwrap_or(DEFAULT_TICKS).parse()?;
    let delay_ms: u64 = matches.value_of("delay").unwrap_or(DEFAULT_DELAY_MS).parse()?;
    let format = matches.value_of("format").unwrap_or("table");
    let until_settled = matches.is_present("until-settled");

    let mut sim = BusSimulation::new(config)?;
    info!(
        bus_length = sim.config().bus_length,
        stations = sim.stations().len(),
        messages = sim.schedule().len(),
        "scenario loaded"
    );

    let mut journal = match matches.value_of("journal") {
        Some(path) => Some(SnapshotJournal::open(Path::new(path))?),
        None => None,
    };

    let mut interval = (delay_ms > 0).then(|| time::interval(Duration::from_millis(delay_ms)));

    for _ in 0..ticks {
        if let Some(interval) = interval.as_mut() {
            interval.tick().await;
        }

        let snapshot = match sim.tick() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("❌ Simulation aborted: {}", e);
                println!("{} {}", "❌".red(), e.to_string().bright_red());
                return Err(e.into());
            }
        };

        if let Some(journal) = journal.as_mut() {
            journal.append(&snapshot)?;
        }

        print_snapshot(&snapshot, format);

        if until_settled && sim.is_settled() {
            break;
        }
    }

    if let Some(journal) = journal.as_mut() {
        journal.flush()?;
        info!(path = %journal.path().display(), written = journal.written(), "journal flushed");
    }

    if format != "json" {
        print_summary(&sim);
    }
    Ok(())
}

fn is_unsigned(value: String) -> Result<(), String> {
    value
        .parse::<u64>()
        .map(|_| ())
        .map_err(|_| format!("'{}' is not a non-negative integer", value))
}

fn print_snapshot(snapshot: &TickSnapshot, format: &str) {
    match format {
        "json" => match snapshot.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => error!("Failed to encode snapshot: {}", e),
        },
        "compact" => {
            let line = render::render_compact(snapshot);
            if snapshot.has_conflict() {
                println!("{}", line.bright_red());
            } else {
                println!("{}", line);
            }
        }
        _ => {
            print!("{}", CLEAR_SCREEN);
            println!("{}", render::summary_line(snapshot).bright_blue().bold());
            println!("{}", colored_cable(snapshot));
            let (taps, labels) = render::tap_lines(snapshot);
            println!("{}", taps.dimmed());
            println!("{}", labels.bright_white().bold());
            for station in &snapshot.stations {
                let line = render::station_line(station);
                let line = match station.state {
                    StationState::Idle => line.dimmed(),
                    StationState::Selecting => line.normal(),
                    StationState::Transmitting => line.bright_green(),
                    StationState::Jamming => line.bright_red(),
                    StationState::Backoff => line.yellow(),
                };
                println!("{}", line);
            }
            for event in &snapshot.events {
                println!("  {} {}", "•".bright_cyan(), render::event_line(event));
            }
        }
    }
}

fn colored_cable(snapshot: &TickSnapshot) -> String {
    let mut line = String::from("|");
    for symbol in &snapshot.segments {
        let glyph = symbol.glyph().to_string();
        let glyph = match symbol {
            Symbol::Empty => glyph.dimmed(),
            Symbol::Data(_) => glyph.bright_green().bold(),
            Symbol::Conflict => glyph.bright_red().bold(),
            Symbol::Jam => glyph.yellow().bold(),
        };
        line.push_str(&glyph.to_string());
    }
    line.push('|');
    line
}

fn print_summary(sim: &BusSimulation) {
    let schedule = sim.schedule();
    println!();
    println!("{}", "📊 Run summary".bright_blue().bold());
    println!("{} {}", "Ticks run:".bright_white(), sim.current_tick());
    println!(
        "{} {}/{}",
        "Delivered:".bright_white(),
        schedule.completed_count().to_string().bright_green(),
        schedule.len()
    );
    if schedule.failed_count() > 0 {
        println!("{} {}", "Failed:".bright_white(), schedule.failed_count().to_string().bright_red());
    }
    println!("{} {}", "Backoff draws:".bright_white(), sim.backoff_draws());
    for station in sim.stations() {
        let stats = station.stats();
        println!(
            "  {} frames={} collisions={} deferrals={} delivered={} abandoned={}",
            render::station_label(station.id()).to_string().bright_cyan(),
            stats.frames_emitted,
            stats.collisions,
            stats.deferrals,
            stats.completed,
            stats.abandoned
        );
    }
}
