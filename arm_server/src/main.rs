// Console server for a serial G-code robot arm
// Run with: cargo run -p arm_server -- --port /dev/ttyUSB0
// Or against the built-in simulator: cargo run -p arm_server -- --sim

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use arm_gcode::transport::{SerialTransport, Transport};
use arm_gcode::{DeviceLink, RobotController, TrajectoryStore};
use arm_server::api_types::{ConsoleCommand, ServerResponse};
use arm_server::console::parse_line;
use arm_server::history::{CommandHistory, CsvAuditLog};
use arm_server::session::SessionManager;
use arm_server::users::UserDirectory;
use arm_server::{ConsoleSession, RobotService, ServerConfig};
use clap::Parser;
use sim::SimFirmware;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const CONFIG_ENV: &str = "ARM_SERVER_CONFIG";

#[derive(Parser, Debug)]
#[command(name = "arm_server", about = "Multi-user console for a serial G-code robot arm")]
struct Args {
    /// TOML configuration file (falls back to $ARM_SERVER_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serial device, e.g. /dev/ttyUSB0
    #[arg(long)]
    port: Option<String>,

    #[arg(long)]
    baud: Option<u32>,

    /// Directory holding .gcode trajectories
    #[arg(long)]
    trajectories: Option<PathBuf>,

    /// Talk to the in-process firmware simulator instead of a serial port
    #[arg(long)]
    sim: bool,

    /// Print responses as JSON, one object per line
    #[arg(long)]
    json: bool,
}

fn load_config(args: &Args) -> Result<ServerConfig, Box<dyn Error + Send + Sync>> {
    let path = args
        .config
        .clone()
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

    let mut config = match path {
        Some(path) => {
            info!("loading configuration from {}", path.display());
            ServerConfig::load(&path)?
        }
        None => ServerConfig::default(),
    };

    if let Some(port) = &args.port {
        config.link.port = port.clone();
    }
    if let Some(baud) = args.baud {
        config.link.baud_rate = baud;
    }
    if let Some(dir) = &args.trajectories {
        config.storage.trajectory_dir = dir.clone();
    }
    config.validate()?;
    Ok(config)
}

fn render(response: &ServerResponse, json: bool) -> String {
    if json {
        serde_json::to_string(response)
            .unwrap_or_else(|e| format!(r#"{{"type":"error","message":"{}"}}"#, e))
    } else {
        response.render()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    // A trajectory directory that cannot be created is the one fatal storage error.
    let store = TrajectoryStore::open(&config.storage.trajectory_dir).map_err(|e| {
        error!(
            "cannot create trajectory directory {}: {}",
            config.storage.trajectory_dir.display(),
            e
        );
        e
    })?;

    let users = UserDirectory::open(
        &config.storage.users_db,
        &config.auth.salt,
        &config.auth.admin_password,
    )?;
    let audit_log = CsvAuditLog::open(&config.storage.audit_log)?;

    let (transport, link_config): (Box<dyn Transport + Send>, _) = if args.sim {
        info!("using the firmware simulator");
        (Box::new(SimFirmware::new()), config.link.clone().without_delays())
    } else {
        info!("using serial port {} at {} baud", config.link.port, config.link.baud_rate);
        let serial = SerialTransport::new(config.link.port.clone(), config.link.baud_rate)
            .with_grace(config.link.grace());
        (Box::new(serial), config.link.clone())
    };

    let link = DeviceLink::new(transport, link_config);
    let controller = RobotController::new(link, store).into_shared();
    let history = CommandHistory::with_limit(config.storage.history_limit);
    let service = Arc::new(
        RobotService::new(controller, Arc::new(users), Arc::new(history))
            .with_audit_log(Arc::new(audit_log))
            .with_sessions(SessionManager::new().with_idle_timeout(config.auth.session_idle()))
            .with_default_retries(config.retries()),
    );

    let mut session = ConsoleSession::new(service);
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    if !args.json {
        stdout.write_all(b"arm_server ready, type 'help' for commands\n").await?;
        stdout.flush().await?;
    }

    while let Some(line) = lines.next_line().await? {
        let command = match parse_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                warn!("{}", message);
                let out = render(&ServerResponse::error(message), args.json);
                stdout.write_all(format!("{out}\n").as_bytes()).await?;
                stdout.flush().await?;
                continue;
            }
        };

        let quit = command == ConsoleCommand::Quit;
        let response = session.handle(command).await;
        stdout
            .write_all(format!("{}\n", render(&response, args.json)).as_bytes())
            .await?;
        stdout.flush().await?;
        if quit {
            break;
        }
    }

    info!("console closed");
    Ok(())
}
