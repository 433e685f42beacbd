//! Dispatches console commands to the robot service.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::api_types::{ConsoleCommand, ServerResponse};
use crate::console::HELP;
use crate::history::LogFilter;
use crate::service::{RobotService, ServiceError};

/// One console client: the service plus the token of whoever logged in.
pub struct ConsoleSession {
    service: Arc<RobotService>,
    token: Option<String>,
}

impl ConsoleSession {
    pub fn new(service: Arc<RobotService>) -> Self {
        Self {
            service,
            token: None,
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.token.is_some()
    }

    pub async fn handle(&mut self, command: ConsoleCommand) -> ServerResponse {
        debug!("console request {:?}", command);
        match command {
            ConsoleCommand::Login { username, password } => self.login(&username, &password).await,
            ConsoleCommand::Logout => self.logout(),
            ConsoleCommand::Help => ServerResponse::Help {
                text: HELP.to_string(),
            },
            ConsoleCommand::Quit => {
                self.logout();
                ServerResponse::Bye
            }
            other => {
                let token = self.token.clone().unwrap_or_default();
                respond(self.dispatch(&token, other).await)
            }
        }
    }

    async fn login(&mut self, username: &str, password: &str) -> ServerResponse {
        if let Some(old) = self.token.take() {
            self.service.logout(&old);
        }
        match self.service.login(username, password).await {
            Ok((token, principal)) => {
                self.token = Some(token);
                ServerResponse::LoggedIn {
                    username: principal.username,
                    role: principal.role,
                }
            }
            Err(e) => ServerResponse::error(e.client_message()),
        }
    }

    fn logout(&mut self) -> ServerResponse {
        match self.token.take() {
            Some(token) => {
                self.service.logout(&token);
                ServerResponse::success("logged out")
            }
            None => ServerResponse::error("not logged in"),
        }
    }

    async fn dispatch(&self, token: &str, command: ConsoleCommand) -> Result<ServerResponse, ServiceError> {
        let service = &self.service;
        let response = match command {
            ConsoleCommand::Connect { retries } => ServerResponse::success(service.connect(token, retries).await?),
            ConsoleCommand::Disconnect => ServerResponse::success(service.disconnect(token).await?),
            ConsoleCommand::Home => ServerResponse::success(service.home(token).await?),
            ConsoleCommand::Move { x, y, z, feed } => {
                ServerResponse::success(service.move_to(token, x, y, z, feed).await?)
            }
            ConsoleCommand::Gripper { on } => ServerResponse::success(service.set_gripper(token, on).await?),
            ConsoleCommand::Motors { on } => ServerResponse::success(service.set_motors(token, on).await?),
            ConsoleCommand::Mode { mode } => ServerResponse::success(service.set_mode(token, &mode).await?),
            ConsoleCommand::Status => ServerResponse::Status {
                raw: service.status(token).await?,
            },
            ConsoleCommand::State => ServerResponse::State {
                snapshot: service.snapshot(token).await?,
            },
            ConsoleCommand::RecordStart { name } => {
                ServerResponse::success(service.start_recording(token, &name).await?)
            }
            ConsoleCommand::RecordStop => ServerResponse::success(service.stop_recording(token).await?),
            ConsoleCommand::Run { name } => ServerResponse::Playback {
                report: service.run_file(token, &name).await?,
            },
            ConsoleCommand::Upload { name, path } => {
                let content = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| ServiceError::BadRequest(format!("cannot read {path}: {e}")))?;
                let stored = service.upload_file(token, &name, &content).await?;
                ServerResponse::success(format!("stored as {stored}"))
            }
            ConsoleCommand::Files => ServerResponse::Files {
                files: service.list_files(token).await?,
            },
            ConsoleCommand::Delete { name } => {
                if service.delete_file(token, &name).await? {
                    ServerResponse::success(format!("deleted {name}"))
                } else {
                    ServerResponse::error(format!("no trajectory named {name}"))
                }
            }
            ConsoleCommand::Report => ServerResponse::Report {
                report: service.report(token).await?,
            },
            ConsoleCommand::ReportClear { username } => {
                let removed = service.clear_history(token, &username).await?;
                ServerResponse::success(format!("removed {removed} history entries of {username}"))
            }
            ConsoleCommand::Log { user, response } => ServerResponse::AuditLog {
                records: service.log_report(token, LogFilter { user, response }).await?,
            },
            ConsoleCommand::Whoami => {
                let principal = service.whoami(token)?;
                ServerResponse::Identity {
                    username: principal.username,
                    role: principal.role,
                }
            }
            ConsoleCommand::Passwd { current, new_password } => {
                service.change_password(token, None, Some(&current), &new_password).await?;
                ServerResponse::success("password changed")
            }
            ConsoleCommand::UserAdd { username, password, role } => {
                let id = service.register_user(token, &username, &password, &role).await?;
                ServerResponse::success(format!("created {username} with id {id}"))
            }
            ConsoleCommand::UserList => ServerResponse::Users {
                users: service.list_users(token).await?,
            },
            ConsoleCommand::UserActive { id, active } => {
                service.set_user_active(token, id, active).await?;
                ServerResponse::success(format!("user {id} {}", if active { "enabled" } else { "disabled" }))
            }
            ConsoleCommand::UserPasswd { username, new_password } => {
                service.change_password(token, Some(&username), None, &new_password).await?;
                ServerResponse::success(format!("password of {username} reset"))
            }
            ConsoleCommand::Login { .. }
            | ConsoleCommand::Logout
            | ConsoleCommand::Help
            | ConsoleCommand::Quit => {
                return Err(ServiceError::Internal("session command reached dispatch".to_string()))
            }
        };
        Ok(response)
    }
}

fn respond(result: Result<ServerResponse, ServiceError>) -> ServerResponse {
    match result {
        Ok(response) => response,
        Err(e) => {
            warn!("console request failed: {}", e);
            ServerResponse::error(e.client_message())
        }
    }
}
