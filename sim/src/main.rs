// Arm firmware simulator on a pseudo-terminal.
// Run with: cargo run -p sim
// then point the server at the printed device path.

use std::error::Error;
use std::fs::File;
use std::io::{Read, Write};

use nix::pty::openpty;
use nix::unistd::ttyname;
use sim::FirmwareState;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn serve(mut master: File) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut firmware = FirmwareState::default();
    let mut buffer = [0u8; 256];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let n = master.read(&mut buffer)?;
        if n == 0 {
            return Ok(());
        }
        pending.extend_from_slice(&buffer[..n]);

        while let Some(pos) = pending.iter().position(|&b| b == b'\n' || b == b'\r') {
            let line: Vec<u8> = pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
            if line.trim().is_empty() {
                continue;
            }

            let reply = firmware.respond(&line);
            info!("{} -> {}", line.trim(), reply.trim_end().replace("\r\n", " | "));
            master.write_all(reply.as_bytes())?;
        }
    }
}

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let pty = openpty(None, None)?;
    let path = ttyname(&pty.slave)?;
    println!("{}", path.display());
    info!("simulated arm firmware listening on {}", path.display());

    // the slave end stays open so the master never sees a hangup between clients
    let _slave = pty.slave;
    if let Err(e) = serve(File::from(pty.master)) {
        error!("simulator stopped: {}", e);
        return Err(e);
    }
    Ok(())
}
