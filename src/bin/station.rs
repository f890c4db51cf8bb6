use clap::{App, Arg};
use fleetlink::events::{CommandReply, Notification, StationCommand};
use fleetlink::{Orchestrator, StationConfig};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio::time;
use tracing::{debug, error, info, warn};

const DEFAULT_RADIO_PORT: &str = "9000";
const DEFAULT_CONTROL_PORT: &str = "8080";
const POLL_INTERVAL_MS: u64 = 100;
const BROADCAST_BUFFER_SIZE: usize = 256;

type Station = Arc<Mutex<Orchestrator>>;

/// Channels fed by the orchestrator after every step.
#[derive(Clone)]
struct Outputs {
    frames: broadcast::Sender<String>,
    notifications: broadcast::Sender<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("fleet-station")
        .version("0.1.0")
        .about("Ground station for a fleet of autonomous vehicles")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Station configuration (JSON)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("bind")
                .long("bind")
                .value_name("ADDR")
                .help("Address to listen on")
                .takes_value(true)
                .default_value("127.0.0.1"),
        )
        .arg(
            Arg::with_name("radio-port")
                .long("radio-port")
                .value_name("PORT")
                .help("Port the radio bridge connects to")
                .takes_value(true)
                .default_value(DEFAULT_RADIO_PORT),
        )
        .arg(
            Arg::with_name("control-port")
                .long("control-port")
                .value_name("PORT")
                .help("Port for operator commands and notifications")
                .takes_value(true)
                .default_value(DEFAULT_CONTROL_PORT),
        )
        .get_matches();

    let config = match matches.value_of("config") {
        Some(path) => StationConfig::load(path)?,
        None => StationConfig::default(),
    };
    config.validate()?;

    let bind = matches.value_of("bind").unwrap_or("127.0.0.1").to_string();
    let radio_port: u16 = matches.value_of("radio-port").unwrap_or(DEFAULT_RADIO_PORT).parse()?;
    let control_port: u16 = matches.value_of("control-port").unwrap_or(DEFAULT_CONTROL_PORT).parse()?;

    println!("Fleet ground station");
    println!("====================");
    info!(vehicles = config.vehicles.len(), "Loaded configuration");

    let station: Station = Arc::new(Mutex::new(Orchestrator::new(config)));
    let (frames, _) = broadcast::channel(BROADCAST_BUFFER_SIZE);
    let (notifications, _) = broadcast::channel(BROADCAST_BUFFER_SIZE);
    let outputs = Outputs { frames, notifications };

    let radio_listener = TcpListener::bind(format!("{bind}:{radio_port}")).await?;
    info!("Radio link listening on {bind}:{radio_port}");
    let control_listener = TcpListener::bind(format!("{bind}:{control_port}")).await?;
    info!("Control interface listening on {bind}:{control_port}");

    let radio_server = tokio::spawn(serve(radio_listener, Arc::clone(&station), outputs.clone(), Channel::Radio));
    let control_server = tokio::spawn(serve(control_listener, Arc::clone(&station), outputs.clone(), Channel::Control));

    // Drives retransmissions, job timeouts and liveness checks
    let mut interval = time::interval(Duration::from_millis(POLL_INTERVAL_MS));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let mut guard = station.lock().await;
                guard.poll(now_ms());
                flush(&mut guard, &outputs);
            }
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
        }
    }

    {
        let mut guard = station.lock().await;
        guard.stop_missions(now_ms());
        flush(&mut guard, &outputs);
    }
    // Give writers a moment to push the final stop frames out
    time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;

    radio_server.abort();
    control_server.abort();
    println!("Ground station stopped");
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Channel {
    Radio,
    Control,
}

async fn serve(listener: TcpListener, station: Station, outputs: Outputs, channel: Channel) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!(?channel, "Client connected: {}", addr);
                let station = Arc::clone(&station);
                let outputs = outputs.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, station, outputs, channel).await {
                        warn!(?channel, "Client {} error: {}", addr, e);
                    }
                    info!(?channel, "Client {} disconnected", addr);
                });
            }
            Err(e) => error!("Failed to accept connection: {}", e),
        }
    }
}

/// Radio clients exchange raw frames. Control clients send commands and
/// receive replies plus the notification stream.
async fn handle_client(
    stream: TcpStream,
    station: Station,
    outputs: Outputs,
    channel: Channel,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let writer = Arc::new(Mutex::new(writer));

    let mut feed = match channel {
        Channel::Radio => outputs.frames.subscribe(),
        Channel::Control => outputs.notifications.subscribe(),
    };
    let feed_writer = Arc::clone(&writer);
    let forward = tokio::spawn(async move {
        loop {
            match feed.recv().await {
                Ok(line) => {
                    let mut guard = feed_writer.lock().await;
                    if let Err(e) = write_line(&mut guard, &line).await {
                        warn!("Failed to forward: {}", e);
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => warn!(skipped, "Client fell behind"),
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match channel {
            Channel::Radio => {
                let mut guard = station.lock().await;
                guard.handle_frame(trimmed, now_ms());
                flush(&mut guard, &outputs);
            }
            Channel::Control => {
                let reply = match serde_json::from_str::<StationCommand>(trimmed) {
                    Ok(command) => {
                        info!("Received command: {:?}", command);
                        let mut guard = station.lock().await;
                        let result = guard.handle_command(command, now_ms());
                        flush(&mut guard, &outputs);
                        match result {
                            Ok(()) => CommandReply::success(),
                            Err(e) => CommandReply::failure(e.to_string()),
                        }
                    }
                    Err(e) => {
                        warn!("Failed to parse command: {}", e);
                        CommandReply::failure(format!("Invalid command format: {e}"))
                    }
                };
                let reply = serde_json::to_string(&reply)?;
                let mut guard = writer.lock().await;
                write_line(&mut guard, &reply).await?;
            }
        }
    }

    forward.abort();
    Ok(())
}

/// Publish everything the orchestrator produced since the last step.
fn flush(station: &mut Orchestrator, outputs: &Outputs) {
    for frame in station.drain_frames() {
        debug!("Radio out: {}", frame);
        if let Err(e) = outputs.frames.send(frame) {
            debug!("No radio bridge attached, dropped frame: {}", e.0);
        }
    }
    for notification in station.drain_notifications() {
        if let Notification::Log { level, message } = &notification {
            info!(?level, "{}", message);
        }
        match serde_json::to_string(&notification) {
            Ok(json) => {
                if let Err(e) = outputs.notifications.send(json) {
                    debug!("No control client attached, dropped notification: {}", e.0);
                }
            }
            Err(e) => error!("Failed to serialize notification: {}", e),
        }
    }
}

async fn write_line(writer: &mut OwnedWriteHalf, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as u64)
}
