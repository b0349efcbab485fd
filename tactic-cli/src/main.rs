//! TacticBoard headless client.
//!
//! Joins a room, logs everything the session reports, and with `--cap edit`
//! turns each stdin line (one Operation JSON object) into a local edit.
//!
//! ```text
//! echo '{"k":"move","id":"p1","x":10,"y":20}' | tactic-cli --room abc --token T --cap edit
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use tactic_collab::rest::RoomInfo;
use tactic_collab::session::{RoomSession, SessionEvent, SessionHandle, SessionParams, Severity};
use tactic_collab::{Capability, SessionConfig, WsConnector};
use tactic_core::Operation;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(name = "tactic-cli")]
#[command(about = "Join a TacticBoard room from the terminal", long_about = None)]
struct Args {
    /// Server origin (http, https, ws or wss)
    #[arg(long)]
    server: Option<String>,

    /// Room to join
    #[arg(long)]
    room: String,

    /// Capability token from a share link
    #[arg(long, default_value = "")]
    token: String,

    /// Requested capability
    #[arg(long, default_value = "view")]
    cap: Capability,

    /// Resume from this sequence number
    #[arg(long, default_value_t = 0)]
    since: u64,

    /// JSON config file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Room JSON as returned by GET /api/rooms/{id}, used as the initial board
    #[arg(long)]
    seed: Option<PathBuf>,

    /// Name used in log lines (default: cli-<random>)
    #[arg(long)]
    name: Option<String>,
}

impl Args {
    fn session_config(&self) -> Result<SessionConfig> {
        let mut config = match &self.config {
            Some(path) => SessionConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => SessionConfig::default(),
        };
        if let Some(server) = &self.server {
            config.server_url = server.clone();
        }
        config.validate()?;
        Ok(config)
    }

    fn seed(&self) -> Result<Option<RoomInfo>> {
        let Some(path) = &self.seed else {
            return Ok(None);
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read seed {}", path.display()))?;
        let info = serde_json::from_str(&text).context("Seed is not a room document")?;
        Ok(Some(info))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.session_config()?;
    let name = args.name.clone().unwrap_or_else(|| {
        let id = uuid::Uuid::new_v4().simple().to_string();
        format!("cli-{}", &id[..8])
    });

    let mut params = SessionParams::new(args.room.clone(), args.token.clone(), args.cap)
        .resume_from(args.since);
    if let Some(seed) = args.seed()? {
        params = params.with_seed(seed);
    }

    info!(
        "[{name}] Joining room {} at {} as {}",
        args.room,
        config.room_url(&args.room),
        args.cap
    );
    let (session, mut events) = RoomSession::spawn(&config, params, WsConnector);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut reading = args.cap.can_edit();
    let mut closing = false;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => log_event(&name, &session, event),
                None => break,
            },
            line = lines.next_line(), if reading => match line {
                Ok(Some(line)) => push_line(&session, &line),
                Ok(None) => {
                    info!("[{name}] stdin closed, leaving room");
                    reading = false;
                    closing = true;
                    session.close();
                }
                Err(e) => {
                    error!("[{name}] Failed to read stdin: {e}");
                    reading = false;
                }
            },
            _ = tokio::signal::ctrl_c(), if !closing => {
                info!("[{name}] Interrupted, leaving room");
                closing = true;
                session.close();
            }
        }
    }

    let board = session.board();
    info!(
        "[{name}] Left room {} at seq {} with {} nodes",
        args.room,
        board.latest_seq(),
        board.len()
    );
    Ok(())
}

fn push_line(session: &SessionHandle, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    match serde_json::from_str::<Operation>(line) {
        Ok(op) => {
            if !session.push(op) {
                warn!("Session ended; edit dropped");
            }
        }
        Err(e) => warn!("Ignoring invalid operation: {e}"),
    }
}

fn log_event(name: &str, session: &SessionHandle, event: SessionEvent) {
    match event {
        SessionEvent::Connected => info!("[{name}] Connected"),
        SessionEvent::Disconnected => info!("[{name}] Disconnected ({:?})", session.phase()),
        SessionEvent::BoardChanged { seq } => {
            let board = session.board();
            info!("[{name}] Board at seq {seq}: {} nodes", board.len());
            for node in board.nodes() {
                log::debug!("  {} {} ({}, {})", node.id, node.kind, node.x, node.y);
            }
        }
        SessionEvent::PresenceChanged { count } => {
            let presence = session.presence();
            let names: Vec<&str> = presence.iter().map(|e| e.name.as_str()).collect();
            info!("[{name}] {count} online: {}", names.join(", "));
        }
        SessionEvent::Notice(notice) => match notice.severity {
            Severity::Warning => warn!("[{name}] {}", notice.message),
            Severity::Error => error!("[{name}] {}", notice.message),
        },
    }
}
