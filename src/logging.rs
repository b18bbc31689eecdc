//! Injectable log sinks.
//!
//! The SDK never installs a process-wide subscriber. Build a [`tracing::Dispatch`]
//! from a [`LogConfig`] and hand it to [`crate::Client::with_log_dispatch`]; every
//! client and dataset call then logs through it. Without one, events go to
//! whatever subscriber the host application installed.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::Dispatch;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogDestination {
    Stdout,
    Stderr,
    File,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: LevelFilter,
    pub destinations: Vec<LogDestination>,
    /// Explicit log file. Defaults to a dated file under `log_dir`.
    pub log_file: Option<PathBuf>,
    /// Directory for the default log file. Defaults to [`default_log_dir`].
    pub log_dir: Option<PathBuf>,
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            destinations: vec![LogDestination::Stdout],
            log_file: None,
            log_dir: None,
            ansi: false,
        }
    }
}

impl LogConfig {
    pub fn console() -> Self {
        Self::default()
    }

    pub fn stderr() -> Self {
        Self {
            destinations: vec![LogDestination::Stderr],
            ..Self::default()
        }
    }

    pub fn file(log_file: Option<PathBuf>) -> Self {
        Self {
            destinations: vec![LogDestination::File],
            log_file,
            ..Self::default()
        }
    }

    pub fn console_and_file(log_file: Option<PathBuf>) -> Self {
        Self {
            destinations: vec![LogDestination::Stdout, LogDestination::File],
            log_file,
            ..Self::default()
        }
    }

    pub fn with_level(mut self, level: LevelFilter) -> Self {
        self.level = level;
        self
    }

    pub fn verbose(self, verbose: bool) -> Self {
        self.with_level(if verbose {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        })
    }

    /// Path of the file this configuration writes to, if any.
    pub fn log_file_path(&self) -> Option<PathBuf> {
        if !self.destinations.contains(&LogDestination::File) {
            return None;
        }
        Some(self.log_file.clone().unwrap_or_else(|| {
            let dir = self.log_dir.clone().unwrap_or_else(default_log_dir);
            dated_log_file(&dir)
        }))
    }

    /// Builds a dispatcher; nothing is installed globally.
    pub fn build(&self) -> Result<Dispatch> {
        let mut writer: Option<BoxMakeWriter> = None;

        for dest in &self.destinations {
            let next = match dest {
                LogDestination::Stdout => BoxMakeWriter::new(std::io::stdout),
                LogDestination::Stderr => BoxMakeWriter::new(std::io::stderr),
                LogDestination::File => {
                    let Some(path) = self.log_file_path() else {
                        continue;
                    };
                    BoxMakeWriter::new(Mutex::new(open_log_file(&path)?))
                }
            };
            writer = Some(match writer {
                Some(w) => BoxMakeWriter::new(w.and(next)),
                None => next,
            });
        }

        let writer = writer.unwrap_or_else(|| BoxMakeWriter::new(std::io::sink));
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(self.level)
            .with_ansi(self.ansi)
            .with_target(false)
            .with_writer(writer)
            .finish();
        Ok(Dispatch::new(subscriber))
    }
}

/// `<data dir>/visual-layer/logs`, falling back to `./logs`.
pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("visual-layer").join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

fn dated_log_file(dir: &Path) -> PathBuf {
    let day = chrono::Local::now().format("%Y-%m-%d");
    dir.join(format!("visual_layer_sdk_{day}.log"))
}

fn open_log_file(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log directory {}", parent.display()))?;
        }
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))
}

/// Log files (`*.log`) in `dir`, newest first.
pub fn list_log_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|e| e == "log") {
            let modified = std::fs::metadata(&path)?.modified()?;
            files.push((modified, path));
        }
    }
    files.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(files.into_iter().map(|(_, p)| p).collect())
}
