//! Console request and response types.
//!
//! A request is either typed as text (`move 10 20 30`) or sent as one JSON
//! object per line (`{"type":"move","x":10,"y":20,"z":30}`); both decode to
//! [`ConsoleCommand`]. Responses are printed as text or, with `--json`, as
//! serialized [`ServerResponse`] values.

use arm_gcode::{PlaybackReport, RobotSnapshot, Role};
use serde::{Deserialize, Serialize};

use crate::history::{AuditRecord, CommandReport};
use crate::users::User;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ConsoleCommand {
    // Session
    #[serde(rename = "login")]
    Login { username: String, password: String },

    #[serde(rename = "logout")]
    Logout,

    #[serde(rename = "whoami")]
    Whoami,

    /// Change the caller's own password.
    #[serde(rename = "passwd")]
    Passwd { current: String, new_password: String },

    // Connection
    #[serde(rename = "connect")]
    Connect { retries: Option<u32> },

    #[serde(rename = "disconnect")]
    Disconnect,

    // Robot control
    #[serde(rename = "home")]
    Home,

    #[serde(rename = "move")]
    Move { x: f64, y: f64, z: f64, feed: Option<f64> },

    #[serde(rename = "gripper")]
    Gripper { on: bool },

    #[serde(rename = "motors")]
    Motors { on: bool },

    /// `"abs"` or `"rel"`.
    #[serde(rename = "mode")]
    Mode { mode: String },

    #[serde(rename = "status")]
    Status,

    /// Local controller state, no firmware round trip.
    #[serde(rename = "state")]
    State,

    // Trajectories
    #[serde(rename = "record_start")]
    RecordStart { name: String },

    #[serde(rename = "record_stop")]
    RecordStop,

    #[serde(rename = "run")]
    Run { name: String },

    /// Upload the G-code file at `path` under `name`.
    #[serde(rename = "upload")]
    Upload { name: String, path: String },

    #[serde(rename = "files")]
    Files,

    #[serde(rename = "delete")]
    Delete { name: String },

    // History
    #[serde(rename = "report")]
    Report,

    /// Admin: drop a user's in-memory history.
    #[serde(rename = "report_clear")]
    ReportClear { username: String },

    /// Admin: audit log, optionally filtered.
    #[serde(rename = "log")]
    Log { user: Option<String>, response: Option<String> },

    // Accounts (admin)
    #[serde(rename = "user_add")]
    UserAdd { username: String, password: String, role: String },

    #[serde(rename = "user_list")]
    UserList,

    #[serde(rename = "user_active")]
    UserActive { id: i64, active: bool },

    #[serde(rename = "user_passwd")]
    UserPasswd { username: String, new_password: String },

    #[serde(rename = "help")]
    Help,

    #[serde(rename = "quit")]
    Quit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerResponse {
    #[serde(rename = "success")]
    Success { message: String },

    #[serde(rename = "error")]
    Error { message: String },

    #[serde(rename = "logged_in")]
    LoggedIn { username: String, role: Role },

    #[serde(rename = "identity")]
    Identity { username: String, role: Role },

    #[serde(rename = "status")]
    Status { raw: String },

    #[serde(rename = "state")]
    State { snapshot: RobotSnapshot },

    #[serde(rename = "files")]
    Files { files: Vec<String> },

    #[serde(rename = "playback")]
    Playback { report: PlaybackReport },

    #[serde(rename = "report")]
    Report { report: CommandReport },

    #[serde(rename = "audit_log")]
    AuditLog { records: Vec<AuditRecord> },

    #[serde(rename = "users")]
    Users { users: Vec<User> },

    #[serde(rename = "help")]
    Help { text: String },

    #[serde(rename = "bye")]
    Bye,
}

impl ServerResponse {
    pub fn success(message: impl Into<String>) -> Self {
        ServerResponse::Success {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerResponse::Error {
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ServerResponse::Error { .. })
    }

    /// Plain-text rendering for an interactive terminal.
    pub fn render(&self) -> String {
        match self {
            ServerResponse::Success { message } => message.clone(),
            ServerResponse::Error { message } => format!("error: {message}"),
            ServerResponse::LoggedIn { username, role } => format!("logged in as {username} ({role})"),
            ServerResponse::Identity { username, role } => format!("{username} ({role})"),
            ServerResponse::Status { raw } => raw.clone(),
            ServerResponse::State { snapshot } => format!(
                "connected={} motors={} coordinates={:?} operation={:?} execution={:?} recording={}",
                snapshot.connected,
                if snapshot.motors_enabled { "on" } else { "off" },
                snapshot.coordinate_mode,
                snapshot.operation_mode,
                snapshot.execution_mode,
                snapshot.recording.as_deref().unwrap_or("-"),
            ),
            ServerResponse::Files { files } if files.is_empty() => "no trajectories".to_string(),
            ServerResponse::Files { files } => files.join("\n"),
            ServerResponse::Playback { report } => {
                let log = report.firmware_log();
                if log.is_empty() {
                    report.summary()
                } else {
                    format!("{}\n{}", report.summary(), log)
                }
            }
            ServerResponse::Report { report } => {
                let mut out = format!(
                    "{} commands, {} errors",
                    report.total_commands, report.total_errors
                );
                for entry in &report.entries {
                    out.push_str(&format!(
                        "\n{} {} {} {}{}",
                        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        entry.username,
                        entry.operation,
                        entry.details,
                        if entry.was_error { " [error]" } else { "" }
                    ));
                }
                out
            }
            ServerResponse::AuditLog { records } if records.is_empty() => "no matching records".to_string(),
            ServerResponse::AuditLog { records } => records
                .iter()
                .map(|r| format!("{} {} {} {}", r.timestamp, r.username, r.operation, r.response()))
                .collect::<Vec<_>>()
                .join("\n"),
            ServerResponse::Users { users } => users
                .iter()
                .map(|u| {
                    format!(
                        "{:>4} {} ({}){}",
                        u.id,
                        u.username,
                        u.role,
                        if u.is_active { "" } else { " [disabled]" }
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"),
            ServerResponse::Help { text } => text.clone(),
            ServerResponse::Bye => "bye".to_string(),
        }
    }
}
