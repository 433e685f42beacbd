/// Service-level tests: sessions, roles and auditing on top of the simulated firmware.
use std::sync::Arc;
use std::time::Duration;

use arm_gcode::{ArmError, DeviceLink, LinkConfig, RobotController, Role, TrajectoryStore};
use arm_server::api_types::{ConsoleCommand, ServerResponse};
use arm_server::history::{CommandHistory, CsvAuditLog, LogFilter};
use arm_server::session::SessionManager;
use arm_server::users::UserDirectory;
use arm_server::{ConsoleSession, RobotService, ServiceError};
use sim::SimFirmware;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    firmware: SimFirmware,
    service: Arc<RobotService>,
    audit_path: std::path::PathBuf,
}

fn fixture() -> Fixture {
    fixture_with_sessions(SessionManager::new())
}

fn fixture_with_sessions(sessions: SessionManager) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let firmware = SimFirmware::new();
    let config = LinkConfig::new("sim".to_string(), 115200).without_delays();
    let link = DeviceLink::new(Box::new(firmware.clone()), config);
    let store = TrajectoryStore::open(dir.path().join("trajectories")).unwrap();
    let controller = RobotController::new(link, store).into_shared();

    let users = UserDirectory::in_memory("test-salt", "root").unwrap();
    users.create_user("olga", "secret", Role::Operator).unwrap();
    users.create_user("otto", "secret", Role::Operator).unwrap();
    users.create_user("vera", "secret", Role::Viewer).unwrap();

    let audit_path = dir.path().join("audit.csv");
    let audit = CsvAuditLog::open(&audit_path).unwrap();
    let service = RobotService::new(controller, Arc::new(users), Arc::new(CommandHistory::new()))
        .with_audit_log(Arc::new(audit))
        .with_sessions(sessions);

    Fixture {
        _dir: dir,
        firmware,
        service: Arc::new(service),
        audit_path,
    }
}

async fn login(service: &RobotService, user: &str, password: &str) -> String {
    service.login(user, password).await.unwrap().0
}

#[tokio::test]
async fn test_login_rejects_bad_password() {
    let f = fixture();
    let err = f.service.login("olga", "wrong").await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidCredentials));

    let (token, principal) = f.service.login("olga", "secret").await.unwrap();
    assert_eq!(token.len(), 32);
    assert_eq!(principal.role, Role::Operator);
    assert!(f.service.logout(&token));
    assert!(matches!(
        f.service.status(&token).await,
        Err(ServiceError::Unauthenticated)
    ));
}

#[tokio::test]
async fn test_operator_moves_the_arm() {
    let f = fixture();
    let token = login(&f.service, "olga", "secret").await;

    f.service.connect(&token, Some(1)).await.unwrap();
    f.service.set_motors(&token, true).await.unwrap();
    let message = f.service.move_to(&token, 10.0, 20.0, 5.0, None).await.unwrap();
    assert_eq!(message, "LINEAR MOVE: [X:10.00 Y:20.00 Z:5.00]");
    assert_eq!(f.firmware.received().last().unwrap(), "G1 X10.00 Y20.00 Z5.00 F100");

    let status = f.service.status(&token).await.unwrap();
    assert!(status.contains("X:10.00 Y:20.00 Z:5.00"), "status was {status}");
}

#[tokio::test]
async fn test_viewer_is_read_only() {
    let f = fixture();
    let admin = login(&f.service, "admin", "root").await;
    f.service.connect(&admin, None).await.unwrap();

    let viewer = login(&f.service, "vera", "secret").await;
    let sent_before = f.firmware.received().len();
    match f.service.move_to(&viewer, 1.0, 1.0, 1.0, Some(50.0)).await {
        Err(ServiceError::Forbidden { role, .. }) => assert_eq!(role, Role::Viewer),
        other => panic!("expected forbidden, got {:?}", other),
    }
    assert_eq!(f.firmware.received().len(), sent_before);

    assert!(f.service.status(&viewer).await.is_ok());
    assert!(f.service.list_files(&viewer).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_robot_errors_are_audited() {
    let f = fixture();
    let token = login(&f.service, "olga", "secret").await;

    let err = f.service.home(&token).await.unwrap_err();
    assert!(matches!(err, ServiceError::Robot(ArmError::NotConnected)));
    assert_eq!(err.client_message(), "robot not connected");

    f.service.connect(&token, Some(1)).await.unwrap();
    let err = f.service.set_mode(&token, "polar").await.unwrap_err();
    assert!(matches!(err, ServiceError::BadRequest(_)));

    let report = f.service.report(&token).await.unwrap();
    // login, failed home, connect, bad mode
    assert_eq!(report.total_commands, 4);
    assert_eq!(report.total_errors, 2);

    let csv = std::fs::read_to_string(&f.audit_path).unwrap();
    assert!(csv.starts_with("timestamp,username,operation,details,was_error"));
    assert!(csv.contains("robot.homing"));
}

#[tokio::test]
async fn test_report_scope_depends_on_role() {
    let f = fixture();
    let olga = login(&f.service, "olga", "secret").await;
    let otto = login(&f.service, "otto", "secret").await;
    let admin = login(&f.service, "admin", "root").await;

    f.service.connect(&olga, Some(1)).await.unwrap();
    f.service.set_gripper(&otto, true).await.unwrap_err();

    let own = f.service.report(&otto).await.unwrap();
    assert!(own.entries.iter().all(|e| e.username == "otto"));

    let all = f.service.report(&admin).await.unwrap();
    assert!(all.entries.iter().any(|e| e.username == "olga"));
    assert!(all.entries.iter().any(|e| e.username == "otto"));
}

#[tokio::test]
async fn test_operators_cannot_touch_each_others_files() {
    let f = fixture();
    let olga = login(&f.service, "olga", "secret").await;
    let otto = login(&f.service, "otto", "secret").await;
    let admin = login(&f.service, "admin", "root").await;

    let stored = f
        .service
        .upload_file(&olga, "square", "G1 X0 Y0 Z0\nG1 X10 Y0 Z0\n")
        .await
        .unwrap();
    assert!(stored.starts_with("2__square__"));

    assert_eq!(f.service.list_files(&olga).await.unwrap(), vec![stored.clone()]);
    assert!(f.service.list_files(&otto).await.unwrap().is_empty());
    assert_eq!(f.service.list_files(&admin).await.unwrap(), vec![stored.clone()]);

    assert!(matches!(
        f.service.delete_file(&otto, &stored).await,
        Err(ServiceError::Forbidden { .. })
    ));
    assert!(matches!(
        f.service.run_file(&otto, &stored).await,
        Err(ServiceError::Forbidden { .. })
    ));
    // short names resolve within the caller's own files only
    assert!(!f.service.delete_file(&otto, "square").await.unwrap());
    assert!(f.service.delete_file(&olga, "square").await.unwrap());
}

#[tokio::test]
async fn test_record_and_run_through_the_service() {
    let f = fixture();
    let token = login(&f.service, "olga", "secret").await;
    f.service.connect(&token, Some(1)).await.unwrap();
    f.service.set_motors(&token, true).await.unwrap();

    let started = f.service.start_recording(&token, "Pick Place").await.unwrap();
    assert!(started.contains("2__pick_place__"), "{started}");
    assert!(f.service.start_recording(&token, "again").await.is_err());
    f.service.move_to(&token, 5.0, 5.0, 5.0, Some(40.0)).await.unwrap();
    f.service.set_gripper(&token, true).await.unwrap();
    f.service.stop_recording(&token).await.unwrap();

    let report = f.service.run_file(&token, "Pick Place").await.unwrap();
    assert_eq!(report.executed, 2);
    assert_eq!(report.skipped, 0);
    assert!(report.summary().starts_with("trajectory '2__pick_place__"));
}

#[tokio::test]
async fn test_console_session_flow() {
    let f = fixture();
    let mut console = ConsoleSession::new(Arc::clone(&f.service));

    let response = console.handle(ConsoleCommand::Status).await;
    assert_eq!(response, ServerResponse::error("not logged in"));

    let response = console
        .handle(ConsoleCommand::Login {
            username: "olga".into(),
            password: "secret".into(),
        })
        .await;
    assert_eq!(
        response,
        ServerResponse::LoggedIn { username: "olga".into(), role: Role::Operator }
    );
    assert!(console.is_logged_in());

    let response = console.handle(ConsoleCommand::Connect { retries: Some(1) }).await;
    assert_eq!(response, ServerResponse::success("robot connected"));

    let response = console.handle(ConsoleCommand::Delete { name: "nothing".into() }).await;
    assert!(response.is_error());

    assert_eq!(console.handle(ConsoleCommand::Quit).await, ServerResponse::Bye);
    assert!(!console.is_logged_in());
}

#[tokio::test]
async fn test_idle_session_expires() {
    let f = fixture_with_sessions(SessionManager::new().with_idle_timeout(Duration::ZERO));
    let token = login(&f.service, "olga", "secret").await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(matches!(
        f.service.status(&token).await,
        Err(ServiceError::Unauthenticated)
    ));
}

#[tokio::test]
async fn test_firmware_rejection_reaches_the_audit_log() {
    let f = fixture();
    let token = login(&f.service, "olga", "secret").await;
    f.service.connect(&token, Some(1)).await.unwrap();
    f.service.set_motors(&token, true).await.unwrap();

    f.firmware.fail_next("LIMIT SWITCH TRIGGERED");
    let err = f.service.home(&token).await.unwrap_err();
    assert!(matches!(&err, ServiceError::Robot(e) if e.is_protocol()));

    let csv = std::fs::read_to_string(&f.audit_path).unwrap();
    let line = csv.lines().find(|l| l.contains("robot.homing")).unwrap();
    assert!(line.contains("LIMIT SWITCH TRIGGERED"), "{line}");
    assert!(line.ends_with("true"), "{line}");
}

#[tokio::test]
async fn test_admin_log_report_filters() {
    let f = fixture();
    let olga = login(&f.service, "olga", "secret").await;
    let admin = login(&f.service, "admin", "root").await;

    f.service.home(&olga).await.unwrap_err();
    f.service.connect(&olga, Some(1)).await.unwrap();

    let everything = f.service.log_report(&admin, LogFilter::default()).await.unwrap();
    assert!(everything.iter().any(|r| r.username == "admin"));

    let filter = LogFilter { user: Some("olga".into()), response: None };
    let olga_only = f.service.log_report(&admin, filter).await.unwrap();
    // login, failed home, connect
    assert_eq!(olga_only.len(), 3);
    assert!(olga_only.iter().all(|r| r.username == "olga"));

    let filter = LogFilter { user: Some("olga".into()), response: Some("ERROR".into()) };
    let failures = f.service.log_report(&admin, filter).await.unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].operation, "robot.homing");
    assert_eq!(failures[0].response(), "ERROR: robot not connected");

    assert!(matches!(
        f.service.log_report(&olga, LogFilter::default()).await,
        Err(ServiceError::Forbidden { .. })
    ));
}

#[tokio::test]
async fn test_admin_manages_accounts() {
    let f = fixture();
    let admin = login(&f.service, "admin", "root").await;
    let olga = login(&f.service, "olga", "secret").await;

    let id = f.service.register_user(&admin, "nina", "pw", "op").await.unwrap();
    assert_eq!(id, 5);
    assert!(matches!(
        f.service.register_user(&admin, "nina", "other", "viewer").await,
        Err(ServiceError::BadRequest(_))
    ));
    assert!(matches!(
        f.service.register_user(&admin, "zed", "pw", "superuser").await,
        Err(ServiceError::BadRequest(_))
    ));
    assert!(matches!(
        f.service.register_user(&olga, "zed", "pw", "op").await,
        Err(ServiceError::Forbidden { .. })
    ));

    let users = f.service.list_users(&admin).await.unwrap();
    let names: Vec<&str> = users.iter().map(|u| u.username.as_str()).collect();
    assert_eq!(names, ["admin", "olga", "otto", "vera", "nina"]);

    let nina = login(&f.service, "nina", "pw").await;
    assert_eq!(f.service.whoami(&nina).unwrap().role, Role::Operator);

    f.service.set_user_active(&admin, id, false).await.unwrap();
    assert!(matches!(f.service.whoami(&nina), Err(ServiceError::Unauthenticated)));
    assert!(matches!(
        f.service.login("nina", "pw").await,
        Err(ServiceError::InvalidCredentials)
    ));
    assert!(matches!(
        f.service.set_user_active(&admin, 1, false).await,
        Err(ServiceError::BadRequest(_))
    ));
    assert!(matches!(
        f.service.set_user_active(&admin, 99, true).await,
        Err(ServiceError::BadRequest(_))
    ));

    f.service.set_user_active(&admin, id, true).await.unwrap();
    assert!(f.service.login("nina", "pw").await.is_ok());
}

#[tokio::test]
async fn test_password_changes() {
    let f = fixture();
    let admin = login(&f.service, "admin", "root").await;
    let olga = login(&f.service, "olga", "secret").await;

    assert!(matches!(
        f.service.change_password(&olga, None, Some("wrong"), "fresh").await,
        Err(ServiceError::InvalidCredentials)
    ));
    assert!(matches!(
        f.service.change_password(&olga, None, None, "fresh").await,
        Err(ServiceError::BadRequest(_))
    ));
    f.service.change_password(&olga, None, Some("secret"), "fresh").await.unwrap();
    assert!(f.service.login("olga", "secret").await.is_err());
    assert!(f.service.login("olga", "fresh").await.is_ok());

    assert!(matches!(
        f.service.change_password(&olga, Some("otto"), None, "hacked").await,
        Err(ServiceError::Forbidden { .. })
    ));
    f.service.change_password(&admin, Some("otto"), None, "reset").await.unwrap();
    assert!(f.service.login("otto", "reset").await.is_ok());
    assert!(matches!(
        f.service.change_password(&admin, Some("ghost"), None, "x").await,
        Err(ServiceError::BadRequest(_))
    ));
}

#[tokio::test]
async fn test_clearing_history_is_admin_only() {
    let f = fixture();
    let olga = login(&f.service, "olga", "secret").await;
    let admin = login(&f.service, "admin", "root").await;
    f.service.home(&olga).await.unwrap_err();

    assert!(matches!(
        f.service.clear_history(&olga, "olga").await,
        Err(ServiceError::Forbidden { .. })
    ));
    assert_eq!(f.service.clear_history(&admin, "olga").await.unwrap(), 3);
    assert_eq!(f.service.report(&olga).await.unwrap().total_commands, 0);

    // the on-disk log keeps everything
    let csv = CsvAuditLog::open(&f.audit_path).unwrap();
    assert!(csv.read_all().unwrap().iter().any(|r| r.username == "olga"));
}

#[tokio::test]
async fn test_console_admin_commands() {
    let f = fixture();
    let mut console = ConsoleSession::new(Arc::clone(&f.service));
    console
        .handle(ConsoleCommand::Login { username: "admin".into(), password: "root".into() })
        .await;

    assert_eq!(
        console.handle(ConsoleCommand::Whoami).await,
        ServerResponse::Identity { username: "admin".into(), role: Role::Admin }
    );

    let response = console
        .handle(ConsoleCommand::UserAdd {
            username: "nina".into(),
            password: "pw".into(),
            role: "viewer".into(),
        })
        .await;
    assert_eq!(response, ServerResponse::success("created nina with id 5"));

    match console.handle(ConsoleCommand::UserList).await {
        ServerResponse::Users { users } => assert_eq!(users.len(), 5),
        other => panic!("expected users, got {:?}", other),
    }

    match console.handle(ConsoleCommand::Log { user: Some("admin".into()), response: None }).await {
        ServerResponse::AuditLog { records } => {
            assert!(records.iter().any(|r| r.operation == "user.register"));
            assert!(records.iter().all(|r| r.username == "admin"));
        }
        other => panic!("expected audit log, got {:?}", other),
    }
}
