//! Shell selection for running npm scripts.
//!
//! Dev servers are started through a shell so that `npm run build && npm start`
//! sequences work, and so that version managers configured in the user's rc
//! file (nvm, volta, fnm) are visible to the child.

use crate::env;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Shell {
    /// POSIX-compatible shell (default on Unix)
    #[default]
    Sh,
    Bash,
    Zsh,
    /// Windows Command Prompt
    Cmd,
}

impl Shell {
    #[cfg(unix)]
    pub fn default_for_platform() -> Self {
        Shell::Sh
    }

    #[cfg(windows)]
    pub fn default_for_platform() -> Self {
        Shell::Cmd
    }

    /// Pick the shell matching the user's `$SHELL`, falling back to the platform default.
    pub fn from_login_shell(login_shell: Option<&str>) -> Self {
        let name = login_shell
            .and_then(|s| Path::new(s).file_name())
            .map(|n| n.to_string_lossy().to_string());
        match name.as_deref() {
            Some("bash") => Shell::Bash,
            Some("zsh") => Shell::Zsh,
            _ => Self::default_for_platform(),
        }
    }

    pub fn user_default() -> Self {
        Self::from_login_shell(env::USER_SHELL.as_deref())
    }

    pub fn program(&self) -> String {
        match self {
            Shell::Sh => "/bin/sh".to_string(),
            Shell::Bash => "bash".to_string(),
            Shell::Zsh => "zsh".to_string(),
            Shell::Cmd => env::COMSPEC.clone(),
        }
    }

    /// The rc file sourced before the script when profile sourcing is enabled.
    pub fn profile_prelude(&self) -> Option<&'static str> {
        match self {
            Shell::Bash => Some("source ~/.bashrc 2>/dev/null || true; "),
            Shell::Zsh => Some("source ~/.zshrc 2>/dev/null || true; "),
            Shell::Sh | Shell::Cmd => None,
        }
    }

    /// Returns the arguments needed to execute a command string
    pub fn exec_args(&self, command: &str, source_profile: bool) -> Vec<String> {
        match self {
            Shell::Sh | Shell::Bash | Shell::Zsh => {
                let prelude = if source_profile {
                    self.profile_prelude().unwrap_or_default()
                } else {
                    ""
                };
                vec!["-c".to_string(), format!("{prelude}{command}")]
            }
            Shell::Cmd => vec!["/c".to_string(), command.to_string()],
        }
    }
}

impl std::fmt::Display for Shell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Shell::Sh => write!(f, "sh"),
            Shell::Bash => write!(f, "bash"),
            Shell::Zsh => write!(f, "zsh"),
            Shell::Cmd => write!(f, "cmd"),
        }
    }
}
