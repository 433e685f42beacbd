//! Request-facing robot service.
//!
//! Resolves the caller's session, checks the role, runs the controller call
//! on a blocking thread while holding the controller lock, and audits the
//! attempt. All robot traffic goes through here, as does account management.

use std::sync::Arc;

use arm_gcode::trajectory::naming;
use arm_gcode::{
    ArmError, CoordinateMode, PlaybackReport, RobotController, RobotSnapshot, Role, SharedController,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::history::{
    AuditRecord, AuditSink, CommandHistory, CommandReport, CsvAuditLog, FanOut, LogFilter,
};
use crate::session::{IdentityProvider, Principal, SessionManager};
use crate::users::{User, UserDirectory, UserStoreError};

/// Feed rate used by `move_to` when the client gives none.
pub const DEFAULT_FEED: f64 = 100.0;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("not logged in")]
    Unauthenticated,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("{username} ({role}) may not perform {operation}")]
    Forbidden {
        username: String,
        role: Role,
        operation: String,
    },
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Robot(#[from] ArmError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Text shown to the client.
    pub fn client_message(&self) -> String {
        match self {
            ServiceError::Robot(e) => e.client_message(),
            other => other.to_string(),
        }
    }
}

impl From<UserStoreError> for ServiceError {
    fn from(e: UserStoreError) -> Self {
        ServiceError::Internal(e.to_string())
    }
}

pub struct RobotService {
    controller: SharedController,
    sessions: SessionManager,
    users: Arc<UserDirectory>,
    history: Arc<CommandHistory>,
    sink: Arc<dyn AuditSink>,
    audit_log: Option<Arc<CsvAuditLog>>,
    default_retries: u32,
}

impl RobotService {
    pub fn new(controller: SharedController, users: Arc<UserDirectory>, history: Arc<CommandHistory>) -> Self {
        let sink: Arc<dyn AuditSink> = history.clone();
        Self {
            controller,
            sessions: SessionManager::new(),
            users,
            history,
            sink,
            audit_log: None,
            default_retries: ServerConfig::DEFAULT_RETRIES,
        }
    }

    /// Also writes every audit record to `log`, which then backs the admin
    /// log report.
    pub fn with_audit_log(mut self, log: Arc<CsvAuditLog>) -> Self {
        let sinks: Vec<Box<dyn AuditSink>> = vec![
            Box::new(Arc::clone(&self.history)),
            Box::new(Arc::clone(&log)),
        ];
        self.sink = Arc::new(FanOut::new(sinks));
        self.audit_log = Some(log);
        self
    }

    pub fn with_sessions(mut self, sessions: SessionManager) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_default_retries(mut self, retries: u32) -> Self {
        self.default_retries = retries.max(1);
        self
    }

    // ---- sessions ----

    /// Checks credentials and opens a session. Returns the token.
    pub async fn login(&self, username: &str, password: &str) -> Result<(String, Principal), ServiceError> {
        let (user, pass) = (username.to_string(), password.to_string());
        let found = self.directory(move |users| Ok(users.login(&user, &pass))).await?;

        match found {
            Some(principal) => {
                let token = self.sessions.create(principal.clone());
                info!(
                    "[auth.login] {} logged in, {} open session(s)",
                    principal.username,
                    self.sessions.len()
                );
                self.audit(&principal.username, "auth.login", "", false);
                Ok((token, principal))
            }
            None => {
                warn!("[auth.login] rejected credentials for {}", username);
                self.audit(username, "auth.login", "invalid credentials", true);
                Err(ServiceError::InvalidCredentials)
            }
        }
    }

    pub fn logout(&self, token: &str) -> bool {
        self.sessions.remove(token)
    }

    pub fn whoami(&self, token: &str) -> Result<Principal, ServiceError> {
        self.authenticate(token)
    }

    // ---- connection ----

    pub async fn connect(&self, token: &str, retries: Option<u32>) -> Result<String, ServiceError> {
        const OP: &str = "robot.connect";
        let principal = self.operator(token, OP)?;
        let retries = retries.unwrap_or(self.default_retries).max(1);
        let result = self
            .blocking(move |c| {
                if c.connect(retries) {
                    Ok("robot connected".to_string())
                } else {
                    Err(ArmError::Transport(format!("no answer after {} attempts", retries)))
                }
            })
            .await;
        self.finish(&principal, OP, &format!("retries={retries}"), result)
    }

    pub async fn disconnect(&self, token: &str) -> Result<String, ServiceError> {
        const OP: &str = "robot.disconnect";
        let principal = self.operator(token, OP)?;
        let result = self
            .blocking(|c| {
                c.disconnect();
                Ok("robot disconnected".to_string())
            })
            .await;
        self.finish(&principal, OP, "", result)
    }

    // ---- motion and peripherals ----

    pub async fn home(&self, token: &str) -> Result<String, ServiceError> {
        const OP: &str = "robot.homing";
        let principal = self.operator(token, OP)?;
        let result = self.blocking(|c| c.home().map(|o| o.summary())).await;
        self.finish(&principal, OP, "", result)
    }

    pub async fn move_to(&self, token: &str, x: f64, y: f64, z: f64, feed: Option<f64>) -> Result<String, ServiceError> {
        const OP: &str = "robot.move";
        let principal = self.operator(token, OP)?;
        let feed = feed.unwrap_or(DEFAULT_FEED);
        if ![x, y, z, feed].iter().all(|v| v.is_finite()) {
            return self.finish(
                &principal,
                OP,
                "",
                Err(ServiceError::BadRequest("coordinates must be finite numbers".to_string())),
            );
        }
        let details = format!("X:{x} Y:{y} Z:{z} F:{feed}");
        let result = self.blocking(move |c| c.move_to(x, y, z, feed).map(|o| o.summary())).await;
        self.finish(&principal, OP, &details, result)
    }

    pub async fn set_gripper(&self, token: &str, on: bool) -> Result<String, ServiceError> {
        const OP: &str = "robot.setGripper";
        let principal = self.operator(token, OP)?;
        let result = self.blocking(move |c| c.set_gripper(on).map(|o| o.summary())).await;
        self.finish(&principal, OP, on_off(on), result)
    }

    pub async fn set_motors(&self, token: &str, on: bool) -> Result<String, ServiceError> {
        const OP: &str = "robot.setMotors";
        let principal = self.operator(token, OP)?;
        let result = self.blocking(move |c| c.set_motors(on).map(|o| o.summary())).await;
        self.finish(&principal, OP, on_off(on), result)
    }

    /// Selects `"abs"` or `"rel"` coordinates.
    pub async fn set_mode(&self, token: &str, mode: &str) -> Result<String, ServiceError> {
        const OP: &str = "robot.setMode";
        let principal = self.operator(token, OP)?;
        let parsed = match mode {
            "abs" => CoordinateMode::Absolute,
            "rel" => CoordinateMode::Relative,
            other => {
                let err = ServiceError::BadRequest(format!("unknown mode '{other}', expected 'abs' or 'rel'"));
                return self.finish(&principal, OP, mode, Err(err));
            }
        };
        let result = self
            .blocking(move |c| c.try_set_coordinate_mode(parsed).map(|o| o.summary()))
            .await;
        self.finish(&principal, OP, mode, result)
    }

    pub async fn status(&self, token: &str) -> Result<String, ServiceError> {
        const OP: &str = "robot.getStatus";
        let principal = self.authenticate(token)?;
        let result = self.blocking(|c| c.status()).await;
        self.finish(&principal, OP, "", result)
    }

    /// Local view of the controller state. Does not talk to the firmware.
    pub async fn snapshot(&self, token: &str) -> Result<RobotSnapshot, ServiceError> {
        self.authenticate(token)?;
        self.blocking(|c| Ok(c.snapshot())).await
    }

    // ---- recording ----

    pub async fn start_recording(&self, token: &str, name: &str) -> Result<String, ServiceError> {
        const OP: &str = "robot.startRecording";
        let principal = self.operator(token, OP)?;
        let owner = principal.user_id;
        let trajectory = name.to_string();
        let result = self
            .blocking(move |c| {
                if c.start_recording(owner, &trajectory) {
                    let file = c.store().recording_file().unwrap_or_default().to_string();
                    Ok(format!("recording into {file}"))
                } else {
                    Err(ArmError::InvalidState(format!(
                        "cannot start recording '{trajectory}': a recording is active or the name is invalid"
                    )))
                }
            })
            .await;
        self.finish(&principal, OP, name, result)
    }

    pub async fn stop_recording(&self, token: &str) -> Result<String, ServiceError> {
        const OP: &str = "robot.stopRecording";
        let principal = self.operator(token, OP)?;
        let result = self
            .blocking(|c| {
                c.stop_recording();
                Ok("recording stopped".to_string())
            })
            .await;
        self.finish(&principal, OP, "", result)
    }

    // ---- stored trajectories ----

    pub async fn run_file(&self, token: &str, name: &str) -> Result<PlaybackReport, ServiceError> {
        const OP: &str = "robot.runFile";
        let principal = self.operator(token, OP)?;
        if let Err(e) = check_ownership(&principal, name) {
            return self.finish(&principal, OP, name, Err(e));
        }
        let owner = principal.user_id;
        let trajectory = name.to_string();
        let result = self.blocking(move |c| c.run_file(owner, &trajectory)).await;
        let details = match &result {
            Ok(report) => report.summary(),
            Err(_) => name.to_string(),
        };
        self.finish(&principal, OP, &details, result)
    }

    /// Stores uploaded G-code and returns the filename it was saved under.
    pub async fn upload_file(&self, token: &str, name: &str, content: &str) -> Result<String, ServiceError> {
        const OP: &str = "robot.uploadFile";
        let principal = self.operator(token, OP)?;
        let owner = principal.user_id;
        let (trajectory, content) = (name.to_string(), content.to_string());
        let result = self
            .blocking(move |c| c.upload_file(owner, &trajectory, &content))
            .await;
        self.finish(&principal, OP, name, result)
    }

    pub async fn list_files(&self, token: &str) -> Result<Vec<String>, ServiceError> {
        const OP: &str = "robot.listFiles";
        let principal = self.authenticate(token)?;
        let (owner, role) = (principal.user_id, principal.role);
        let result = self.blocking(move |c| Ok(c.list_files(owner, role))).await;
        self.finish(&principal, OP, "", result)
    }

    /// `Ok(false)` when there was no such file.
    pub async fn delete_file(&self, token: &str, name: &str) -> Result<bool, ServiceError> {
        const OP: &str = "robot.deleteFile";
        let principal = self.operator(token, OP)?;
        if let Err(e) = check_ownership(&principal, name) {
            return self.finish(&principal, OP, name, Err(e));
        }
        let owner = principal.user_id;
        let trajectory = name.to_string();
        let result = self.blocking(move |c| c.delete_file(owner, &trajectory)).await;
        self.finish(&principal, OP, name, result)
    }

    /// Admins see every entry, everyone else only their own.
    pub async fn report(&self, token: &str) -> Result<CommandReport, ServiceError> {
        let principal = self.authenticate(token)?;
        let report = match principal.role {
            Role::Admin => self.history.report(None),
            _ => self.history.report(Some(&principal.username)),
        };
        info!(
            "[robot.getReport] {}: {} commands, {} errors",
            principal.username, report.total_commands, report.total_errors
        );
        Ok(report)
    }

    // ---- accounts ----

    /// Creates an account. `role` is `admin`, `op` or `viewer`. Returns the
    /// new user id.
    pub async fn register_user(
        &self,
        token: &str,
        username: &str,
        password: &str,
        role: &str,
    ) -> Result<i64, ServiceError> {
        const OP: &str = "user.register";
        let principal = self.admin(token, OP)?;
        let details = format!("{username} as {role}");
        let parsed = Role::parse(role);
        if parsed == Role::Unknown {
            let err = ServiceError::BadRequest(format!("unknown role '{role}', expected admin, op or viewer"));
            return self.finish(&principal, OP, &details, Err(err));
        }
        if username.trim().is_empty() || password.is_empty() {
            let err = ServiceError::BadRequest("username and password are required".to_string());
            return self.finish(&principal, OP, &details, Err(err));
        }

        let (user, pass) = (username.to_string(), password.to_string());
        let result = self
            .directory(move |users| {
                if users.find(&user)?.is_some() {
                    return Err(ServiceError::BadRequest(format!("user {user} already exists")));
                }
                Ok(users.create_user(&user, &pass, parsed)?)
            })
            .await;
        self.finish(&principal, OP, &details, result)
    }

    pub async fn list_users(&self, token: &str) -> Result<Vec<User>, ServiceError> {
        const OP: &str = "user.list";
        let principal = self.admin(token, OP)?;
        let result = self.directory(|users| Ok(users.list()?)).await;
        self.finish(&principal, OP, "", result)
    }

    /// Enables or disables an account. Disabling closes the user's sessions.
    pub async fn set_user_active(&self, token: &str, id: i64, active: bool) -> Result<(), ServiceError> {
        const OP: &str = "user.update";
        let principal = self.admin(token, OP)?;
        let details = format!("id={id} active={active}");
        if !active && id == principal.user_id {
            let err = ServiceError::BadRequest("cannot disable your own account".to_string());
            return self.finish(&principal, OP, &details, Err(err));
        }

        let result = self
            .directory(move |users| {
                if users.set_active(id, active)? {
                    Ok(())
                } else {
                    Err(ServiceError::BadRequest(format!("no user with id {id}")))
                }
            })
            .await;
        if result.is_ok() && !active {
            self.sessions.remove_user(id);
        }
        self.finish(&principal, OP, &details, result)
    }

    /// With `target`, an admin resets someone's password. Without it the
    /// caller changes their own and must give the current one.
    pub async fn change_password(
        &self,
        token: &str,
        target: Option<&str>,
        current: Option<&str>,
        new_password: &str,
    ) -> Result<(), ServiceError> {
        const OP: &str = "user.changePassword";
        let principal = self.authenticate(token)?;
        let details = match target {
            Some(target) => format!("reset for {target}"),
            None => "self".to_string(),
        };
        if new_password.is_empty() {
            let err = ServiceError::BadRequest("new password cannot be empty".to_string());
            return self.finish(&principal, OP, &details, Err(err));
        }

        let new_password = new_password.to_string();
        let result = match (target, current) {
            (Some(_), _) if principal.role != Role::Admin => Err(ServiceError::Forbidden {
                username: principal.username.clone(),
                role: principal.role,
                operation: OP.to_string(),
            }),
            (Some(target), _) => {
                let target = target.to_string();
                self.directory(move |users| {
                    if users.change_password(&target, &new_password)? {
                        Ok(())
                    } else {
                        Err(ServiceError::BadRequest(format!("no user named {target}")))
                    }
                })
                .await
            }
            (None, None) => Err(ServiceError::BadRequest("current password is required".to_string())),
            (None, Some(current)) => {
                let (user, current) = (principal.username.clone(), current.to_string());
                self.directory(move |users| {
                    if users.login(&user, &current).is_none() {
                        return Err(ServiceError::InvalidCredentials);
                    }
                    users.change_password(&user, &new_password)?;
                    Ok(())
                })
                .await
            }
        };
        self.finish(&principal, OP, &details, result)
    }

    // ---- audit ----

    /// Audit records matching `filter`, oldest first. Reads the CSV log when
    /// one is attached, the in-memory history otherwise.
    pub async fn log_report(&self, token: &str, filter: LogFilter) -> Result<Vec<AuditRecord>, ServiceError> {
        const OP: &str = "admin.getLogReport";
        let principal = self.admin(token, OP)?;
        let details = format!(
            "user={} response={}",
            filter.user.as_deref().unwrap_or("*"),
            filter.response.as_deref().unwrap_or("*")
        );

        let records = match &self.audit_log {
            Some(log) => {
                let log = Arc::clone(log);
                tokio::task::spawn_blocking(move || log.read_all())
                    .await
                    .map_err(|e| ServiceError::Internal(format!("audit task failed: {e}")))
                    .and_then(|read| {
                        read.map_err(|e| ServiceError::Internal(format!("cannot read audit log: {e}")))
                    })
            }
            None => Ok(self.history.all_entries().iter().map(AuditRecord::from).collect()),
        };
        let result = records.map(|records| filter.apply(records));
        self.finish(&principal, OP, &details, result)
    }

    /// Forgets `username`'s in-memory history. The CSV log is untouched.
    pub async fn clear_history(&self, token: &str, username: &str) -> Result<usize, ServiceError> {
        const OP: &str = "admin.clearHistory";
        let principal = self.admin(token, OP)?;
        let removed = self.history.clear_user(username);
        self.finish(&principal, OP, username, Ok(removed))
    }

    // ---- internals ----

    fn authenticate(&self, token: &str) -> Result<Principal, ServiceError> {
        self.sessions.get(token).ok_or(ServiceError::Unauthenticated)
    }

    /// Authenticated caller allowed to change robot state.
    fn operator(&self, token: &str, operation: &str) -> Result<Principal, ServiceError> {
        self.authorize(token, operation, Role::can_operate)
    }

    fn admin(&self, token: &str, operation: &str) -> Result<Principal, ServiceError> {
        self.authorize(token, operation, |role| *role == Role::Admin)
    }

    fn authorize(
        &self,
        token: &str,
        operation: &str,
        allowed: fn(&Role) -> bool,
    ) -> Result<Principal, ServiceError> {
        let principal = self.authenticate(token)?;
        if allowed(&principal.role) {
            return Ok(principal);
        }
        let err = ServiceError::Forbidden {
            username: principal.username.clone(),
            role: principal.role,
            operation: operation.to_string(),
        };
        warn!("[{}] {}", operation, err);
        self.audit(&principal.username, operation, &err.to_string(), true);
        Err(err)
    }

    async fn directory<T, F>(&self, f: F) -> Result<T, ServiceError>
    where
        T: Send + 'static,
        F: FnOnce(&UserDirectory) -> Result<T, ServiceError> + Send + 'static,
    {
        let users = Arc::clone(&self.users);
        tokio::task::spawn_blocking(move || f(&users))
            .await
            .map_err(|e| ServiceError::Internal(format!("user task failed: {e}")))?
    }

    /// Runs `f` on a blocking thread with the controller locked for its
    /// whole duration.
    async fn blocking<T, F>(&self, f: F) -> Result<T, ServiceError>
    where
        T: Send + 'static,
        F: FnOnce(&mut RobotController) -> Result<T, ArmError> + Send + 'static,
    {
        let controller = Arc::clone(&self.controller);
        let result = tokio::task::spawn_blocking(move || {
            let mut guard = controller.lock();
            f(&mut *guard)
        })
        .await
        .map_err(|e| ServiceError::Internal(format!("robot task failed: {e}")))?;
        Ok(result?)
    }

    fn finish<T>(
        &self,
        principal: &Principal,
        operation: &str,
        details: &str,
        result: Result<T, ServiceError>,
    ) -> Result<T, ServiceError> {
        match &result {
            Ok(_) => {
                info!("[{}] {} ok {}", operation, principal.username, details);
                self.audit(&principal.username, operation, details, false);
            }
            Err(ServiceError::Robot(e)) if e.is_protocol() => {
                warn!(
                    "[{}] firmware rejected request from {}: {} {}",
                    operation, principal.username, e, details
                );
                self.audit(&principal.username, operation, &failure_details(details, e), true);
            }
            Err(e) => {
                warn!("[{}] {} failed: {} {}", operation, principal.username, e, details);
                self.audit(&principal.username, operation, &failure_details(details, e), true);
            }
        }
        result
    }

    fn audit(&self, username: &str, operation: &str, details: &str, was_error: bool) {
        self.sink.record(username, operation, details, was_error);
    }
}

fn failure_details(details: &str, e: &dyn std::fmt::Display) -> String {
    if details.is_empty() {
        e.to_string()
    } else {
        format!("{details}: {e}")
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

/// Full stored filenames name their owner; only admins may touch other
/// users' files that way.
fn check_ownership(principal: &Principal, name: &str) -> Result<(), ServiceError> {
    if principal.role == Role::Admin || !naming::is_stored_name(name) {
        return Ok(());
    }
    if name.starts_with(&naming::owner_prefix(principal.user_id)) {
        Ok(())
    } else {
        Err(ServiceError::Forbidden {
            username: principal.username.clone(),
            role: principal.role,
            operation: format!("access to {name}"),
        })
    }
}
