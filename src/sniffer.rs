//! Finds the port a dev server actually bound by reading its output.
//!
//! Dev servers ignore `PORT` often enough that the announced URL is the only
//! reliable answer. Output is mined line by line and lines that talk about an
//! occupied port are skipped, so "Something is already running on port 3000"
//! cannot be mistaken for a bind on 3000.

use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::RangeInclusive;

pub const ACCEPTED_PORTS: RangeInclusive<u32> = 1000..=65535;

const CRA_CONFLICT: &str = "Something is already running on port";
const PROMPT_PHRASES: &[&str] = &[
    "Would you like to run the app on another port instead?",
    "(Y/n)",
];

pub const PROMPT_ANSWER: &[u8] = b"Y\n";

struct Rule {
    name: &'static str,
    pattern: Regex,
}

const LOOPBACK: &str = r"(?:localhost|127\.0\.0\.1|0\.0\.0\.0|\[::1?\])";

fn rule(name: &'static str, pattern: &str) -> Rule {
    Rule {
        name,
        pattern: Regex::new(pattern).unwrap_or_else(|e| panic!("bad sniffer rule {name}: {e}")),
    }
}

/// Evaluated in order; the first rule yielding an acceptable port wins.
static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        rule(
            "local-url",
            &format!(r"(?i)local:\s*https?://{LOOPBACK}:(\d+)"),
        ),
        rule(
            "listening-url",
            &format!(
                r"(?i)(?:ready|running|listening|started).*?(?:on|at|:)\s*(?:https?://)?{LOOPBACK}:(\d+)"
            ),
        ),
        rule(
            "listening-port",
            r"(?i)(?:server|app|ready|listening).*?(?:on|at)\s+port[:\s]+(\d+)",
        ),
        rule(
            "network-url",
            r"(?i)on your network.*?https?://[^\s:/]+:(\d+)",
        ),
        rule("bare-url", &format!(r"(?i)https?://{LOOPBACK}:(\d+)")),
    ]
});

/// Whether this text is complaining about a port rather than announcing one.
pub fn is_error_context(text: &str) -> bool {
    text.contains(CRA_CONFLICT)
        || (text.contains("Port") && text.contains("is already in use"))
        || text.contains("EADDRINUSE")
        || text.contains("address already in use")
}

/// Port announced in `text`, with the name of the rule that found it.
pub fn extract_port(text: &str) -> Option<(u16, &'static str)> {
    if is_error_context(text) {
        return None;
    }
    RULES.iter().find_map(|rule| {
        let port = rule
            .pattern
            .captures_iter(text)
            .filter_map(|c| c.get(1)?.as_str().parse::<u32>().ok())
            .find(|p| ACCEPTED_PORTS.contains(p))?;
        Some((u16::try_from(port).ok()?, rule.name))
    })
}

// a chunk may carry a conflict notice and the replacement URL together
fn mine_lines(text: &str) -> Option<(u16, &'static str)> {
    text.split_inclusive('\n').find_map(|line| {
        if is_error_context(line) {
            trace!("ignoring port numbers in error output: {}", line.trim_end());
            return None;
        }
        extract_port(line)
    })
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Sniffed {
    pub port: Option<u16>,
    pub answer_prompt: bool,
}

/// Per-process output state.
#[derive(Debug)]
pub struct PortSniffer {
    buffer: String,
    capacity: usize,
    detected: Option<u16>,
    prompt_answered: bool,
    conflict_reported: bool,
}

impl PortSniffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: String::new(),
            capacity: capacity.max(256),
            detected: None,
            prompt_answered: false,
            conflict_reported: false,
        }
    }

    pub fn detected_port(&self) -> Option<u16> {
        self.detected
    }

    /// The child printed create-react-app's "already running" notice at some point.
    pub fn saw_port_conflict(&self) -> bool {
        self.conflict_reported
    }

    /// Feed one chunk of stdout or stderr.
    pub fn feed(&mut self, raw: &str) -> Sniffed {
        let text = strip_ansi(raw);
        let mut sniffed = Sniffed::default();
        if text.contains(CRA_CONFLICT) {
            self.conflict_reported = true;
        }
        self.push(&text);

        if !self.prompt_answered && self.is_prompting() {
            debug!("port conflict prompt detected, answering");
            self.prompt_answered = true;
            self.buffer.clear();
            sniffed.answer_prompt = true;
        }

        if self.detected.is_none()
            && let Some((port, rule)) = mine_lines(&text)
        {
            debug!("detected port {port} via {rule}");
            self.detected = Some(port);
            sniffed.port = Some(port);
        }
        sniffed
    }

    fn is_prompting(&self) -> bool {
        is_error_context(&self.buffer) && PROMPT_PHRASES.iter().any(|p| self.buffer.contains(p))
    }

    fn push(&mut self, text: &str) {
        self.buffer.push_str(text);
        if self.buffer.len() > self.capacity {
            let mut cut = self.buffer.len() - self.capacity;
            while !self.buffer.is_char_boundary(cut) {
                cut += 1;
            }
            self.buffer.drain(..cut);
        }
    }

    #[cfg(test)]
    fn buffered(&self) -> &str {
        &self.buffer
    }
}

pub fn strip_ansi(text: &str) -> String {
    let stripped = strip_ansi_escapes::strip(text.as_bytes());
    String::from_utf8_lossy(&stripped).to_string()
}
