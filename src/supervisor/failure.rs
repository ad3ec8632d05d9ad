//! Exit classification.
//!
//! stderr is only consulted once the process has actually exited; warnings
//! printed by a live dev server never change its state.

use crate::launcher::ExitInfo;
use crate::sniffer::strip_ansi;
use once_cell::sync::Lazy;
use regex::Regex;

pub const PORT_CONFLICT_RETRY: &str = "Port conflict detected. Please try running again.";

// zsh names the command after the phrase, sh and bash before it
static NOT_FOUND: Lazy<[Regex; 2]> = Lazy::new(|| {
    [
        r"command not found:\s*(\S+)",
        r"([^\s:]+):\s+(?:command\s+)?not found",
    ]
    .map(|p| Regex::new(p).unwrap_or_else(|e| panic!("invalid regex: {e}")))
});

static NPM_ERROR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^npm (?:ERR!|error) +(\S.*)$").unwrap_or_else(|e| panic!("invalid regex: {e}"))
});

/// What a process left behind when it exited.
#[derive(Debug, Clone, Default)]
pub struct OutputReport {
    pub stdout: String,
    pub stderr: String,
    /// create-react-app announced that its port was taken.
    pub saw_port_conflict: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitVerdict {
    Stopped(Option<String>),
    Errored(String),
}

fn missing_command(stderr: &str, command: &str) -> String {
    let name = NOT_FOUND
        .iter()
        .find_map(|re| re.captures(stderr)?.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| command.split_whitespace().next().unwrap_or("npm").to_string());
    format!("command not found: {name}")
}

/// Turn an unrequested exit into a final state and a message.
pub fn classify_exit(exit: ExitInfo, report: &OutputReport, command: &str) -> ExitVerdict {
    if exit.success() {
        if report.saw_port_conflict {
            return ExitVerdict::Stopped(Some(PORT_CONFLICT_RETRY.to_string()));
        }
        return ExitVerdict::Stopped(None);
    }

    let stderr = strip_ansi(&report.stderr);
    let lower = stderr.to_lowercase();
    if exit.code == Some(127) || NOT_FOUND.iter().any(|re| re.is_match(&stderr)) {
        return ExitVerdict::Errored(missing_command(&stderr, command));
    }
    if stderr.contains("EACCES") || lower.contains("permission denied") {
        return ExitVerdict::Errored("Process failed. Permission denied.".to_string());
    }
    if stderr.contains("Cannot find module") {
        return ExitVerdict::Errored(
            "Process failed. Missing module. Try running npm install first.".to_string(),
        );
    }
    if let Some(line) = NPM_ERROR.captures(&stderr).and_then(|c| c.get(1)) {
        return ExitVerdict::Errored(format!("Process failed. {}", line.as_str().trim()));
    }
    if let Some(line) = stderr.lines().map(str::trim).find(|l| !l.is_empty())
        && line.chars().count() < 100
    {
        return ExitVerdict::Errored(format!("Process failed. {line}"));
    }
    ExitVerdict::Errored(match (exit.code, exit.signal) {
        (Some(code), _) => format!("Process exited with code {code}. Check logs for details."),
        (None, Some(signal)) => format!("Process was terminated by signal {signal}."),
        (None, None) => "Process exited unexpectedly. Check logs for details.".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(code: i32) -> ExitInfo {
        ExitInfo {
            code: Some(code),
            signal: None,
        }
    }

    fn stderr(text: &str) -> OutputReport {
        OutputReport {
            stderr: text.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_clean_exit_is_stopped() {
        assert_eq!(
            classify_exit(code(0), &OutputReport::default(), "npm start"),
            ExitVerdict::Stopped(None)
        );
    }

    #[test]
    fn test_cra_conflict_exit() {
        let report = OutputReport {
            saw_port_conflict: true,
            ..Default::default()
        };
        assert_eq!(
            classify_exit(code(0), &report, "npm start"),
            ExitVerdict::Stopped(Some(PORT_CONFLICT_RETRY.to_string()))
        );
    }

    #[test]
    fn test_command_not_found_names_command() {
        let cases = [
            ("/bin/sh: 1: npm: not found\n", "npm"),
            ("sh: pnpm: command not found\n", "pnpm"),
            ("zsh: command not found: yarn\n", "yarn"),
            ("", "npm"),
        ];
        for (text, name) in cases {
            assert_eq!(
                classify_exit(code(127), &stderr(text), "npm run dev"),
                ExitVerdict::Errored(format!("command not found: {name}")),
                "{text}"
            );
        }
    }

    #[test]
    fn test_permission_denied() {
        assert_eq!(
            classify_exit(code(1), &stderr("Error: EACCES: permission denied, open 'x'"), "npm start"),
            ExitVerdict::Errored("Process failed. Permission denied.".to_string())
        );
    }

    #[test]
    fn test_missing_module() {
        let text = "node:internal/modules/cjs/loader:1080\n  throw err;\nError: Cannot find module 'express'\n";
        assert_eq!(
            classify_exit(code(1), &stderr(text), "npm start"),
            ExitVerdict::Errored(
                "Process failed. Missing module. Try running npm install first.".to_string()
            )
        );
    }

    #[test]
    fn test_npm_error_line() {
        let text = "npm ERR! Missing script: \"dev\"\nnpm ERR! \nnpm ERR! To see a list of scripts, run:\n";
        assert_eq!(
            classify_exit(code(1), &stderr(text), "npm run dev"),
            ExitVerdict::Errored("Process failed. Missing script: \"dev\"".to_string())
        );
    }

    #[test]
    fn test_first_stderr_line() {
        assert_eq!(
            classify_exit(code(2), &stderr("\n  boom\nstack...\n"), "npm start"),
            ExitVerdict::Errored("Process failed. boom".to_string())
        );
        let long = "x".repeat(150);
        assert_eq!(
            classify_exit(code(2), &stderr(&long), "npm start"),
            ExitVerdict::Errored("Process exited with code 2. Check logs for details.".to_string())
        );
    }

    #[test]
    fn test_signal_exit_is_errored() {
        let exit = ExitInfo {
            code: None,
            signal: Some(9),
        };
        assert_eq!(
            classify_exit(exit, &OutputReport::default(), "npm start"),
            ExitVerdict::Errored("Process was terminated by signal 9.".to_string())
        );
    }
}
