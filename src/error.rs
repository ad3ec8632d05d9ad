//! Custom diagnostic error types for rich error reporting via miette.
//!
//! Start rejections are returned to the caller as values so the UI layer can
//! render them; nothing in here is ever raised past the supervisor boundary.

// False positive: fields are used in #[error] format strings and miette derive macros
#![allow(unused_assignments)]

use crate::external_procs::PortOccupant;
use miette::{Diagnostic, NamedSource, SourceSpan};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors reading or interpreting a project's `package.json`.
#[derive(Debug, Error, Diagnostic)]
pub enum ManifestError {
    #[error("failed to read {}", path.display())]
    #[diagnostic(
        code(tafil::manifest::read_error),
        help("make sure the project folder contains a readable package.json")
    )]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {}", path.display())]
    #[diagnostic(code(tafil::manifest::parse_error))]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no suitable start script found in {}", path.display())]
    #[diagnostic(
        code(tafil::manifest::no_start_script),
        help("add a \"dev\", \"serve\" or \"start\" script to package.json")
    )]
    NoStartScript { path: PathBuf },
}

/// Errors related to file operations.
#[derive(Debug, Error, Diagnostic)]
pub enum FileError {
    #[error("failed to read file: {}", path.display())]
    #[diagnostic(code(tafil::file::read_error))]
    ReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Error for TOML configuration parse failures with source code highlighting.
#[derive(Debug, Error, Diagnostic)]
#[error("failed to parse configuration")]
#[diagnostic(code(tafil::config::parse_error))]
pub struct ConfigParseError {
    /// The source file contents for display
    #[source_code]
    pub src: NamedSource<String>,

    /// The location of the error in the source
    #[label("{message}")]
    pub span: SourceSpan,

    /// The error message from the TOML parser
    pub message: String,

    #[help]
    pub help: Option<String>,
}

impl ConfigParseError {
    pub fn from_toml_error(path: &Path, contents: String, err: toml::de::Error) -> Self {
        let message = err.message().to_string();
        let span = err
            .span()
            .map(|r| SourceSpan::from(r.start..r.end))
            .unwrap_or_else(|| SourceSpan::from(0..0));

        Self {
            src: NamedSource::new(path.display().to_string(), contents),
            span,
            message,
            help: Some("check TOML syntax at https://toml.io".to_string()),
        }
    }
}

/// Reasons a start request is rejected or fails before the dev server runs.
#[derive(Debug, Error, Diagnostic)]
pub enum StartError {
    #[error("invalid project path: {}", path.display())]
    #[diagnostic(
        code(tafil::start::invalid_path),
        help("project paths must be absolute and point at an existing directory")
    )]
    InvalidPath { path: PathBuf },

    #[error("project is already {state}: {}", path.display())]
    #[diagnostic(
        code(tafil::start::already_running),
        help("stop the project first, or wait for it to finish stopping")
    )]
    AlreadyRunning { path: PathBuf, state: String },

    #[error("invalid custom port: {port}")]
    #[diagnostic(
        code(tafil::start::invalid_port),
        help("use a port between 1000 and 65535")
    )]
    InvalidPort { port: u32 },

    #[error("insufficient permissions to access {}", path.display())]
    #[diagnostic(code(tafil::start::permission_denied))]
    PermissionDenied {
        path: PathBuf,
        #[help]
        help: String,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Manifest(#[from] ManifestError),

    #[error("port {port} is already in use by another project managed by tafil: {project}")]
    #[diagnostic(
        code(tafil::port::conflict_managed),
        help("stop that project first, or start this one on a custom port")
    )]
    PortConflictManaged {
        port: u16,
        project: String,
        owner: PathBuf,
    },

    #[error("{}", external_conflict_message(.port, .occupant, .same_project))]
    #[diagnostic(code(tafil::port::conflict_external))]
    PortConflictExternal {
        port: u16,
        occupant: Option<PortOccupant>,
        same_project: bool,
        #[help]
        help: String,
    },

    #[error("port {port} became occupied and no fallback port is free")]
    #[diagnostic(code(tafil::port::exhausted), help("please try again"))]
    PortsExhausted { port: u16 },

    #[error("failed to launch `{command}`: {message}")]
    #[diagnostic(code(tafil::launch::failed))]
    LaunchFailed {
        command: String,
        kind: io::ErrorKind,
        os_code: Option<i32>,
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("start of {} was cancelled by a stop request", path.display())]
    #[diagnostic(code(tafil::start::cancelled))]
    Cancelled { path: PathBuf },

    #[error("the supervisor is no longer running")]
    #[diagnostic(code(tafil::supervisor::closed))]
    SupervisorClosed,

    #[error("{0}")]
    #[diagnostic(code(tafil::internal))]
    Internal(String),
}

impl StartError {
    pub fn external_conflict(port: u16, project: &Path, occupant: Option<PortOccupant>) -> Self {
        let same_project = occupant
            .as_ref()
            .and_then(|o| o.working_directory.as_deref())
            .is_some_and(|cwd| cwd == project);
        let help = match (&occupant, same_project) {
            (Some(_), true) => "stop the external process first".to_string(),
            (Some(o), false) if o.working_directory.is_some() => {
                "stop that project, or use a custom port for this one".to_string()
            }
            (Some(_), false) => {
                "stop the external application, or specify a custom port".to_string()
            }
            (None, _) => format!(
                "stop the external application using port {port}, or specify a custom port"
            ),
        };
        StartError::PortConflictExternal {
            port,
            occupant,
            same_project,
            help,
        }
    }

    /// Whether this rejection happened before any process could be spawned.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, StartError::LaunchFailed { .. })
    }
}

fn external_conflict_message(
    port: &u16,
    occupant: &Option<PortOccupant>,
    same_project: &bool,
) -> String {
    match occupant {
        Some(o) if *same_project => format!(
            "this project is already running on port {port} in an external terminal (command: {}, pid: {})",
            o.command, o.pid
        ),
        Some(o) => match o.working_directory.as_deref() {
            Some(cwd) => format!(
                "port {port} is in use by another project: {} (command: {}, pid: {})",
                project_name(cwd),
                o.command,
                o.pid
            ),
            None => format!(
                "port {port} is in use by: {} (pid: {})",
                o.command, o.pid
            ),
        },
        None => format!("port {port} is already in use by another application (not managed by tafil)"),
    }
}

/// Last path component, used wherever a project is named to the user.
pub fn project_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn occupant(cwd: Option<&str>) -> PortOccupant {
        PortOccupant {
            pid: 4242,
            port: 3000,
            command: "node server.js".to_string(),
            working_directory: cwd.map(PathBuf::from),
        }
    }

    #[test]
    fn test_managed_conflict_names_project() {
        let err = StartError::PortConflictManaged {
            port: 9999,
            project: "B".to_string(),
            owner: PathBuf::from("/work/B"),
        };
        assert!(err.to_string().contains("9999"));
        assert!(err.to_string().ends_with(": B"));
    }

    #[test]
    fn test_external_conflict_with_pid_and_command() {
        let err = StartError::external_conflict(
            3000,
            Path::new("/work/app"),
            Some(occupant(Some("/work/other"))),
        );
        let msg = err.to_string();
        assert!(msg.contains("4242"), "{msg}");
        assert!(msg.contains("node server.js"), "{msg}");
        assert!(msg.contains("other"), "{msg}");
        assert!(matches!(
            err,
            StartError::PortConflictExternal {
                same_project: false,
                ..
            }
        ));
    }

    #[test]
    fn test_external_conflict_same_project() {
        let err = StartError::external_conflict(
            3000,
            Path::new("/work/app"),
            Some(occupant(Some("/work/app"))),
        );
        assert!(err.to_string().contains("already running on port 3000"));
        assert!(matches!(
            err,
            StartError::PortConflictExternal {
                same_project: true,
                ..
            }
        ));
    }

    #[test]
    fn test_external_conflict_without_details() {
        let err = StartError::external_conflict(3000, Path::new("/work/app"), None);
        assert!(err.to_string().contains("not managed by tafil"));

        let err = StartError::external_conflict(3000, Path::new("/work/app"), Some(occupant(None)));
        assert!(err.to_string().contains("node server.js"));
        assert!(err.to_string().contains("4242"));
    }

    #[test]
    fn test_launch_failed_is_not_a_rejection() {
        let err = StartError::LaunchFailed {
            command: "npm run dev".to_string(),
            kind: io::ErrorKind::NotFound,
            os_code: Some(2),
            message: "command not found".to_string(),
            help: None,
        };
        assert!(!err.is_rejection());
        assert!(StartError::InvalidPort { port: 80 }.is_rejection());
    }

    #[test]
    fn test_config_parse_error() {
        let contents = "[detect]\ntimeout = ".to_string();
        let err = toml::from_str::<toml::Value>(&contents).unwrap_err();
        let parse_err = ConfigParseError::from_toml_error(Path::new("config.toml"), contents, err);
        assert!(parse_err.to_string().contains("failed to parse"));
    }

    #[test]
    fn test_project_name() {
        assert_eq!(project_name(Path::new("/home/me/code/shop")), "shop");
        assert_eq!(project_name(Path::new("/")), "/");
    }
}
