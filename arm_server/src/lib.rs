//! Multi-user front end for the G-code arm: users and sessions, role checks,
//! command history with a CSV audit trail, and a line-oriented console.

pub mod api_types;
pub mod config;
pub mod console;
pub mod handlers;
pub mod history;
pub mod service;
pub mod session;
pub mod users;

pub use config::{ConfigError, ServerConfig};
pub use handlers::ConsoleSession;
pub use service::{RobotService, ServiceError};
