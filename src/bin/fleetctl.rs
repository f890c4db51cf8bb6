use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use fleetlink::events::{CommandReply, LogLevel, Notification, StationCommand};
use fleetlink::jobs::JobType;
use fleetlink::mission::{MissionDefinition, VehicleMapping};
use fleetlink::VehicleId;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "8080";
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> CliResult<()> {
    let matches = App::new("fleetctl")
        .version("0.1.0")
        .about("Operator console for the fleet ground station")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("host")
                .short("h")
                .long("host")
                .value_name("HOST")
                .help("Ground station host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Ground station control port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("start")
                .about("Start a sequence of missions")
                .arg(
                    Arg::with_name("missions")
                        .help("JSON file holding a list of mission definitions")
                        .required(true),
                )
                .arg(
                    Arg::with_name("map")
                        .short("m")
                        .long("map")
                        .value_name("VEHICLE=JOB")
                        .help("Vehicle to job assignment, replaces the stored mapping")
                        .takes_value(true)
                        .multiple(true),
                )
                .arg(
                    Arg::with_name("confirm")
                        .long("confirm")
                        .help("Wait for `fleetctl next` between missions"),
                ),
        )
        .subcommand(SubCommand::with_name("next").about("Start the next mission after confirmation"))
        .subcommand(SubCommand::with_name("stop").about("Stop all missions"))
        .subcommand(SubCommand::with_name("pause").about("Pause the running mission"))
        .subcommand(SubCommand::with_name("resume").about("Resume the paused mission"))
        .subcommand(
            SubCommand::with_name("send-job")
                .about("Give a single vehicle a job outside of any mission")
                .arg(Arg::with_name("vehicle").help("Vehicle id").required(true))
                .arg(Arg::with_name("job").help("Job type, e.g. isrSearch").required(true)),
        )
        .subcommand(
            SubCommand::with_name("mapping")
                .about("Set the vehicle mapping used by the next sequence")
                .arg(
                    Arg::with_name("entries")
                        .value_name("VEHICLE=JOB")
                        .required(true)
                        .multiple(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("monitor")
                .about("Stream station notifications (Ctrl+C to stop)")
                .arg(Arg::with_name("json").long("json").help("Print raw JSON")),
        )
        .get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port: u16 = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse()?;

    let command = match matches.subcommand() {
        ("start", Some(sub)) => start_command(sub)?,
        ("next", _) => StationCommand::StartNextMission,
        ("stop", _) => StationCommand::StopMissions,
        ("pause", _) => StationCommand::PauseMissions,
        ("resume", _) => StationCommand::ResumeMissions,
        ("send-job", Some(sub)) => StationCommand::SendJob {
            vehicle: sub.value_of("vehicle").unwrap_or_default().parse()?,
            job_type: parse_job(sub.value_of("job").unwrap_or_default())?,
        },
        ("mapping", Some(sub)) => StationCommand::UpdateVehicleMapping {
            mapping: parse_mapping(sub.values_of("entries").into_iter().flatten())?,
        },
        ("monitor", Some(sub)) => return monitor(host, port, sub.is_present("json")).await,
        _ => unreachable!("clap requires a subcommand"),
    };

    let reply = send_command(host, port, &command).await?;
    if reply.ok {
        println!("{} {}", "✅".green(), "Command accepted".bright_green());
        Ok(())
    } else {
        let error = reply.error.unwrap_or_else(|| "unknown error".to_string());
        println!("{} {}", "❌".red(), error.bright_red());
        std::process::exit(1);
    }
}

fn start_command(matches: &ArgMatches<'_>) -> CliResult<StationCommand> {
    let path = matches.value_of("missions").unwrap_or_default();
    let text = std::fs::read_to_string(path)?;
    let missions: Vec<MissionDefinition> = serde_json::from_str(&text)?;

    let active_vehicle_mapping = match matches.values_of("map") {
        Some(entries) => Some(parse_mapping(entries)?),
        None => None,
    };

    Ok(StationCommand::StartMissions {
        missions,
        active_vehicle_mapping,
        require_confirmation: matches.is_present("confirm"),
    })
}

fn parse_job(text: &str) -> CliResult<JobType> {
    serde_json::from_value(serde_json::Value::String(text.to_string()))
        .map_err(|_| format!("unknown job type '{text}'").into())
}

fn parse_mapping<'a>(entries: impl Iterator<Item = &'a str>) -> CliResult<VehicleMapping> {
    let mut mapping = VehicleMapping::new();
    for entry in entries {
        let (vehicle, job) = entry
            .split_once('=')
            .ok_or_else(|| format!("expected VEHICLE=JOB, got '{entry}'"))?;
        let vehicle: VehicleId = vehicle.trim().parse()?;
        mapping.insert(vehicle, parse_job(job.trim())?);
    }
    Ok(mapping)
}

async fn connect(host: &str, port: u16) -> CliResult<TcpStream> {
    let addr = format!("{host}:{port}");
    match TcpStream::connect(&addr).await {
        Ok(stream) => Ok(stream),
        Err(e) => {
            eprintln!("{} Failed to connect to ground station at {}", "❌".red(), addr.bright_white());
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                eprintln!("{} Station is not running. Start it with:", "💡".yellow());
                eprintln!("   {}", "fleet-station --config station.json".bright_cyan());
            }
            Err(e.into())
        }
    }
}

/// Send one command and wait for its reply. Notifications arriving on the
/// same connection in the meantime are skipped.
async fn send_command(host: &str, port: u16, command: &StationCommand) -> CliResult<CommandReply> {
    let stream = connect(host, port).await?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let json = serde_json::to_string(command)?;

    let exchange = async {
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;

        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "Station closed connection"));
            }
            if let Ok(reply) = serde_json::from_str::<CommandReply>(line.trim()) {
                return Ok(reply);
            }
        }
    };

    match tokio::time::timeout(REPLY_TIMEOUT, exchange).await {
        Ok(result) => Ok(result?),
        Err(_) => {
            eprintln!("{} Command timed out after {} seconds", "⏰".yellow(), REPLY_TIMEOUT.as_secs());
            Err("Command timeout".into())
        }
    }
}

async fn monitor(host: &str, port: u16, raw: bool) -> CliResult<()> {
    println!("{}", "📡 Monitoring ground station (Press Ctrl+C to stop)...".bright_blue().bold());
    let stream = connect(host, port).await?;
    let mut reader = BufReader::new(stream);

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            println!("{}", "Station closed the connection".yellow());
            return Ok(());
        }
        let trimmed = line.trim();
        if raw {
            println!("{trimmed}");
            continue;
        }
        match serde_json::from_str::<Notification>(trimmed) {
            Ok(notification) => print_notification(&notification),
            Err(_) => println!("{}", trimmed.dimmed()),
        }
    }
}

fn print_notification(notification: &Notification) {
    match notification {
        Notification::Log { level, message } => match level {
            LogLevel::Info => println!("{} {}", "ℹ".bright_blue(), message),
            LogLevel::Success => println!("{} {}", "✅".green(), message.bright_green()),
            LogLevel::Failure => println!("{} {}", "❌".red(), message.bright_red()),
        },
        Notification::VehicleUpdated(snapshot) => {
            let battery = snapshot
                .battery
                .map_or_else(|| "   --".normal(), |level| {
                    let text = format!("{:>4.0}%", level * 100.0);
                    if level < 0.2 { text.red() } else { text.green() }
                });
            println!(
                "{} {:<12} {:<12} ({:>10.6}, {:>11.6}) {}",
                "🚁".normal(),
                snapshot.name.bright_white(),
                snapshot.status.as_str().cyan(),
                snapshot.lat,
                snapshot.lng,
                battery
            );
        }
        Notification::VehicleConnected { vehicle } => println!("{} vehicle {} connected", "🔗".green(), vehicle),
        Notification::VehicleDisconnected { vehicle } => println!("{} vehicle {} disconnected", "🔌".red(), vehicle),
        Notification::MissionsStarted { missions } => {
            let names: Vec<&str> = missions.iter().map(|m| m.as_str()).collect();
            println!("{} {}", "🚀".normal(), format!("Missions started: {}", names.join(" → ")).bright_blue().bold());
        }
        Notification::MissionStarted { mission, index } => println!("{} [{}] {}", "▶".bright_blue(), index, mission),
        Notification::MissionCompleted { mission, .. } => println!("{} {} complete", "🏁".green(), mission),
        Notification::ConfirmNextMission { next } => {
            println!("{} {} is ready, run {} to continue", "⏸".yellow(), next, "fleetctl next".bright_cyan());
        }
        Notification::MissionsFinished { .. } => println!("{}", "🎉 All missions finished".bright_green().bold()),
        Notification::MissionStopped { mission, reason, .. } => {
            println!("{} {} stopped: {}", "🛑".red(), mission, reason.bright_red());
        }
        Notification::MissionsPaused => println!("{}", "⏸ Missions paused".yellow()),
        Notification::MissionsResumed => println!("{}", "▶ Missions resumed".green()),
        Notification::MissionsStopped => println!("{}", "🛑 Missions stopped".red()),
        Notification::PointOfInterest(poi) => println!(
            "{} point of interest from vehicle {} at ({:.6}, {:.6}) {:?}",
            "📍".yellow(),
            poi.vehicle,
            poi.location.lat,
            poi.location.lng,
            poi.validity
        ),
    }
}
