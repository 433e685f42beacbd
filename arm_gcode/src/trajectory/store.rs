use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::{error, info, warn};

use super::naming;
use crate::{ArmError, Role};

struct ActiveRecording {
    filename: String,
    file: File,
}

/// Directory of `.gcode` files plus at most one recording in progress.
///
/// Nothing is cached: every listing and load reads the directory again.
pub struct TrajectoryStore {
    dir: PathBuf,
    recording: Option<ActiveRecording>,
}

impl TrajectoryStore {
    /// Opens the store, creating the directory if needed. Failing to create
    /// it is the only error here.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, ArmError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        info!("trajectory store at {}", dir.display());
        Ok(Self {
            dir,
            recording: None,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// Filename of the recording in progress.
    pub fn recording_file(&self) -> Option<&str> {
        self.recording.as_ref().map(|r| r.filename.as_str())
    }

    /// Starts recording into a new file for `owner`.
    ///
    /// Returns `false` if a recording is already running (it keeps going,
    /// untouched), if the name is invalid, or if the file cannot be created.
    pub fn start_recording(&mut self, owner: i64, name: &str) -> bool {
        self.start_recording_at(owner, name, Local::now())
    }

    /// Same as [`start_recording`](Self::start_recording) with an explicit
    /// timestamp. An existing file with the generated name is never reused.
    pub fn start_recording_at(&mut self, owner: i64, name: &str, at: DateTime<Local>) -> bool {
        if let Some(active) = &self.recording {
            warn!("already recording into {}", active.filename);
            return false;
        }
        if let Err(e) = naming::validate(name) {
            warn!("refusing to record: {}", e);
            return false;
        }

        let filename = naming::filename_at(owner, name, at);
        match create_new(&self.dir.join(&filename)) {
            Ok(file) => {
                info!("recording trajectory into {}", filename);
                self.recording = Some(ActiveRecording { filename, file });
                true
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                warn!("{} already exists, not overwriting it", filename);
                false
            }
            Err(e) => {
                error!("cannot create {}: {}", filename, e);
                false
            }
        }
    }

    /// Appends one line to the active recording. `false` when idle or when
    /// the write fails; the recording stays open either way.
    pub fn append_line(&mut self, text: &str) -> bool {
        let Some(active) = self.recording.as_mut() else {
            return false;
        };
        match writeln!(active.file, "{}", text) {
            Ok(()) => true,
            Err(e) => {
                error!("failed to append to {}: {}", active.filename, e);
                false
            }
        }
    }

    /// Closes the active recording. Stopping when idle is not an error.
    pub fn stop_recording(&mut self) -> bool {
        if let Some(mut active) = self.recording.take() {
            if let Err(e) = active.file.flush() {
                warn!("flush of {} failed: {}", active.filename, e);
            }
            info!("recording {} closed", active.filename);
        }
        true
    }

    /// Files visible to `owner` acting as `role`, sorted by name.
    pub fn list(&self, owner: i64, role: Role) -> Vec<String> {
        let prefix = naming::owner_prefix(owner);
        let visible = |name: &str| match role {
            Role::Admin => true,
            Role::Operator => name.starts_with(&prefix),
            Role::Viewer | Role::Unknown => false,
        };

        let mut files: Vec<String> = self
            .gcode_files()
            .into_iter()
            .filter(|name| visible(name.as_str()))
            .collect();
        files.sort();
        files
    }

    /// Maps a client-supplied name to a stored filename.
    ///
    /// Names ending in `.gcode` are taken as they are. Anything else is
    /// looked up among `owner`'s recordings of that name and the newest one
    /// wins.
    pub fn resolve(&self, owner: i64, name: &str) -> Result<String, ArmError> {
        naming::validate(name)?;
        if naming::is_stored_name(name) {
            return Ok(name.to_string());
        }

        let prefix = naming::name_prefix(owner, name);
        self.gcode_files()
            .into_iter()
            .filter(|file| file.starts_with(&prefix))
            .max()
            .ok_or_else(|| ArmError::EmptyTrajectory(name.to_string()))
    }

    /// Reads every line of a trajectory, verbatim and in order.
    pub fn load(&self, owner: i64, name: &str) -> Result<Vec<String>, ArmError> {
        let filename = self.resolve(owner, name)?;
        let content = match fs::read_to_string(self.dir.join(&filename)) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                error!("trajectory {} not found", filename);
                return Err(ArmError::EmptyTrajectory(filename));
            }
            Err(e) => return Err(e.into()),
        };

        let lines: Vec<String> = content.lines().map(str::to_string).collect();
        if lines.is_empty() {
            error!("trajectory {} is empty", filename);
            return Err(ArmError::EmptyTrajectory(filename));
        }
        Ok(lines)
    }

    /// Stores uploaded G-code for `owner` and returns the generated filename.
    pub fn save(&mut self, owner: i64, name: &str, content: &str) -> Result<String, ArmError> {
        self.save_at(owner, name, content, Local::now())
    }

    /// Stores uploaded G-code under the name generated for `at`. Fails with
    /// `InvalidState` rather than replacing a file that already has that name.
    pub fn save_at(
        &mut self,
        owner: i64,
        name: &str,
        content: &str,
        at: DateTime<Local>,
    ) -> Result<String, ArmError> {
        naming::validate(name)?;
        let stem = name.strip_suffix(naming::EXTENSION).unwrap_or(name);
        let filename = naming::filename_at(owner, stem, at);
        if self.recording_file() == Some(filename.as_str()) {
            return Err(ArmError::InvalidState(format!("{} is being recorded", filename)));
        }

        let mut file = match create_new(&self.dir.join(&filename)) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                warn!("upload would overwrite {}", filename);
                return Err(ArmError::InvalidState(format!("{} already exists", filename)));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(content.as_bytes())?;
        if !content.is_empty() && !content.ends_with('\n') {
            file.write_all(b"\n")?;
        }
        info!("stored uploaded trajectory {}", filename);
        Ok(filename)
    }

    /// Removes a stored file. `Ok(false)` means there was nothing to remove.
    pub fn delete(&mut self, filename: &str) -> Result<bool, ArmError> {
        naming::validate(filename)?;
        if self.recording_file() == Some(filename) {
            return Err(ArmError::InvalidState(format!(
                "cannot delete {} while it is being recorded",
                filename
            )));
        }
        match fs::remove_file(self.dir.join(filename)) {
            Ok(()) => {
                info!("deleted trajectory {}", filename);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn gcode_files(&self) -> Vec<String> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                error!("cannot read {}: {}", self.dir.display(), e);
                return Vec::new();
            }
        };
        entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| naming::is_stored_name(name))
            .collect()
    }
}

fn create_new(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}
