//! Line parser for the operator console.

use crate::api_types::ConsoleCommand;

pub const HELP: &str = "\
commands:
  login <user> <password>      open a session
  logout                       close the session
  whoami                       show who is logged in
  passwd <current> <new>       change your password
  connect [retries]            open the serial link
  disconnect                   close the serial link
  home                         home all axes
  move <x> <y> <z> [feed]      linear move (feed defaults to 100)
  gripper on|off               close or open the gripper
  motors on|off                enable or disable the steppers
  mode abs|rel                 select absolute or relative coordinates
  status                       ask the firmware for its position
  state                        show local controller state
  record start <name>          record moves into a new trajectory
  record stop                  finish the recording
  run <name>                   play back a trajectory
  upload <name> <path>         store a local G-code file as a trajectory
  files                        list visible trajectories
  delete <name>                remove a trajectory
  report                       command history with error counts
admin:
  report clear <user>          forget a user's command history
  log [user=<name>] [response=<text>]
                               audit log, filtered by user or response text
  user add <name> <pass> <role>
                               create an account (role: admin, op, viewer)
  user list                    list accounts
  user enable|disable <id>     allow or refuse logins for an account
  user passwd <name> <new>     reset someone's password
  help                         this text
  quit                         leave
lines starting with '{' are read as JSON requests";

/// Parses one console line. `Ok(None)` for blank lines and `#` comments.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    if line.starts_with('{') {
        return serde_json::from_str(line)
            .map(Some)
            .map_err(|e| format!("invalid JSON request: {e}"));
    }

    let words: Vec<&str> = line.split_whitespace().collect();
    let (keyword, args) = (words[0].to_ascii_lowercase(), &words[1..]);

    let cmd = match (keyword.as_str(), args) {
        ("login", [username, password]) => ConsoleCommand::Login {
            username: username.to_string(),
            password: password.to_string(),
        },
        ("logout", []) => ConsoleCommand::Logout,
        ("whoami", []) => ConsoleCommand::Whoami,
        ("passwd", [current, new_password]) => ConsoleCommand::Passwd {
            current: current.to_string(),
            new_password: new_password.to_string(),
        },
        ("connect", []) => ConsoleCommand::Connect { retries: None },
        ("connect", [n]) => ConsoleCommand::Connect {
            retries: Some(parse_retries(n)?),
        },
        ("disconnect", []) => ConsoleCommand::Disconnect,
        ("home", []) => ConsoleCommand::Home,
        ("move", [x, y, z]) => ConsoleCommand::Move {
            x: parse_number("x", x)?,
            y: parse_number("y", y)?,
            z: parse_number("z", z)?,
            feed: None,
        },
        ("move", [x, y, z, feed]) => ConsoleCommand::Move {
            x: parse_number("x", x)?,
            y: parse_number("y", y)?,
            z: parse_number("z", z)?,
            feed: Some(parse_number("feed", feed)?),
        },
        ("gripper", [state]) => ConsoleCommand::Gripper { on: parse_switch(state)? },
        ("motors", [state]) => ConsoleCommand::Motors { on: parse_switch(state)? },
        ("mode", [mode]) => ConsoleCommand::Mode {
            mode: mode.to_ascii_lowercase(),
        },
        ("status", []) => ConsoleCommand::Status,
        ("state", []) => ConsoleCommand::State,
        ("record", ["start", name]) => ConsoleCommand::RecordStart { name: name.to_string() },
        ("record", ["stop"]) => ConsoleCommand::RecordStop,
        ("run", [name]) => ConsoleCommand::Run { name: name.to_string() },
        ("upload", [name, path]) => ConsoleCommand::Upload {
            name: name.to_string(),
            path: path.to_string(),
        },
        ("files", []) => ConsoleCommand::Files,
        ("delete", [name]) => ConsoleCommand::Delete { name: name.to_string() },
        ("report", []) => ConsoleCommand::Report,
        ("report", ["clear", username]) => ConsoleCommand::ReportClear {
            username: username.to_string(),
        },
        ("log", filters) => parse_log_filters(filters)?,
        ("user", ["add", username, password, role]) => ConsoleCommand::UserAdd {
            username: username.to_string(),
            password: password.to_string(),
            role: role.to_ascii_lowercase(),
        },
        ("user", ["list"]) => ConsoleCommand::UserList,
        ("user", ["enable", id]) => ConsoleCommand::UserActive {
            id: parse_id(id)?,
            active: true,
        },
        ("user", ["disable", id]) => ConsoleCommand::UserActive {
            id: parse_id(id)?,
            active: false,
        },
        ("user", ["passwd", username, new_password]) => ConsoleCommand::UserPasswd {
            username: username.to_string(),
            new_password: new_password.to_string(),
        },
        ("help", _) | ("?", _) => ConsoleCommand::Help,
        ("quit", []) | ("exit", []) => ConsoleCommand::Quit,
        _ => return Err(format!("cannot parse '{line}', try 'help'")),
    };
    Ok(Some(cmd))
}

fn parse_number(what: &str, text: &str) -> Result<f64, String> {
    match text.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(format!("{what} must be a number, got '{text}'")),
    }
}

fn parse_retries(text: &str) -> Result<u32, String> {
    match text.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("retries must be a positive integer, got '{text}'")),
    }
}

fn parse_id(text: &str) -> Result<i64, String> {
    text.parse::<i64>()
        .map_err(|_| format!("user id must be an integer, got '{text}'"))
}

/// `log [user=<name>] [response=<text>]`, in any order.
fn parse_log_filters(args: &[&str]) -> Result<ConsoleCommand, String> {
    let (mut user, mut response) = (None, None);
    for arg in args {
        match arg.split_once('=') {
            Some(("user", name)) if !name.is_empty() => user = Some(name.to_string()),
            Some(("response", text)) if !text.is_empty() => response = Some(text.to_string()),
            _ => return Err(format!("unknown log filter '{arg}', expected user=<name> or response=<text>")),
        }
    }
    Ok(ConsoleCommand::Log { user, response })
}

fn parse_switch(text: &str) -> Result<bool, String> {
    match text.to_ascii_lowercase().as_str() {
        "on" | "1" | "true" => Ok(true),
        "off" | "0" | "false" => Ok(false),
        _ => Err(format!("expected on or off, got '{text}'")),
    }
}
