// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Shared logging setup for the p2p-net crate family and its demo binaries.
//!
//! A single [`init_logging`] entry point installs an `EnvFilter`-driven
//! `tracing-subscriber` registry, honoring the `P2P_LOG` environment
//! variable (a `RUST_LOG`-style filter string) when present and otherwise
//! falling back to a numeric verbosity count — the same dual convention
//! carried by the host family's own logging crate. The library crates
//! (`p2p-identity`, `p2p-kad`, `p2p-net`) never call this themselves; they
//! only emit events through `tracing`. Only a binary entry point (a demo or
//! a test harness) owns the decision of how those events are rendered.

#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]

use std::path::PathBuf;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Environment variable consulted before falling back to a verbosity count.
pub const LOG_ENV_VAR: &str = "P2P_LOG";

/// Errors returned while installing the global subscriber.
#[derive(Debug, Error)]
pub enum LogError {
    /// A global subscriber was already installed (e.g. a test installed one
    /// earlier in the same process).
    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,

    /// The log output directory could not be created or opened.
    #[error("failed to open log output directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Crate-local result alias.
pub type Result<T> = std::result::Result<T, LogError>;

/// Event rendering format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, one line per event.
    #[default]
    Default,
    /// Newline-delimited JSON, suited to log aggregation.
    Json,
}

/// Where rendered log events are written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogOutputDest {
    /// The process's standard output.
    Stdout,
    /// A file inside the given directory, rotated daily by the logging
    /// appender.
    Directory(PathBuf),
}

impl Default for LogOutputDest {
    fn default() -> Self {
        Self::Stdout
    }
}

/// Coarse verbosity, mirroring the host family's `minimal`/`standard`/
/// `verbose` `ANT_LOG` keywords.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerbosityLevel {
    /// Only this crate family at `info`; everything else left at its
    /// default (usually `warn`).
    Minimal,
    /// Every crate at `info`.
    Standard,
    /// Every crate at `debug`.
    Verbose,
}

impl VerbosityLevel {
    /// Map a `-v` repeat count (as collected by `clap`) to a verbosity
    /// level: `0` is minimal, `1` is standard, `2+` is verbose.
    pub fn from_count(count: u8) -> Self {
        match count {
            0 => Self::Minimal,
            1 => Self::Standard,
            _ => Self::Verbose,
        }
    }

    fn default_filter(self) -> &'static str {
        match self {
            Self::Minimal => "warn,p2p_net=info,p2p_kad=info,p2p_identity=info",
            Self::Standard => "info",
            Self::Verbose => "debug",
        }
    }
}

/// Builds and installs the process-wide `tracing` subscriber.
pub struct LogBuilder {
    verbosity: VerbosityLevel,
    format: LogFormat,
    output: LogOutputDest,
}

impl LogBuilder {
    /// Start a builder at the given verbosity, defaulting to stdout output
    /// in the default (non-JSON) format.
    pub fn new(verbosity: VerbosityLevel) -> Self {
        Self {
            verbosity,
            format: LogFormat::default(),
            output: LogOutputDest::default(),
        }
    }

    /// Override the rendering format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Override the output destination.
    pub fn with_output(mut self, output: LogOutputDest) -> Self {
        self.output = output;
        self
    }

    fn filter(&self) -> EnvFilter {
        match std::env::var(LOG_ENV_VAR) {
            Ok(value) if !value.is_empty() => EnvFilter::new(value),
            _ => EnvFilter::new(self.verbosity.default_filter()),
        }
    }

    /// Install the subscriber, returning a [`WorkerGuard`] when logging to a
    /// file — the caller must keep it alive for the life of the process, or
    /// buffered log lines are silently dropped on exit.
    pub fn init(self) -> Result<Option<WorkerGuard>> {
        match self.output {
            LogOutputDest::Stdout => {
                let filter = self.filter();
                let builder = tracing_subscriber::fmt().with_env_filter(filter);
                let installed = if self.format == LogFormat::Json {
                    builder.json().try_init()
                } else {
                    builder.try_init()
                };
                installed.map(|()| None).map_err(|_| LogError::AlreadyInitialized)
            }
            LogOutputDest::Directory(dir) => {
                std::fs::create_dir_all(&dir)?;
                let appender = tracing_appender::rolling::daily(&dir, "p2p-net.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                let filter = self.filter();

                let installed = if self.format == LogFormat::Json {
                    let layer = fmt::layer().with_writer(non_blocking).with_ansi(false).json();
                    tracing_subscriber::registry().with(filter).with(layer).try_init()
                } else {
                    let layer = fmt::layer().with_writer(non_blocking).with_ansi(false);
                    tracing_subscriber::registry().with(filter).with(layer).try_init()
                };

                installed
                    .map(|()| Some(guard))
                    .map_err(|_| LogError::AlreadyInitialized)
            }
        }
    }
}

/// Install the default subscriber for `verbosity_count` `-v` flags, writing
/// to stdout in the default format. Equivalent to
/// `LogBuilder::new(VerbosityLevel::from_count(verbosity_count)).init()`.
pub fn init_logging(verbosity_count: u8) -> Result<Option<WorkerGuard>> {
    LogBuilder::new(VerbosityLevel::from_count(verbosity_count)).init()
}
