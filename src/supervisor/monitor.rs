//! Output monitoring for one launched process.
//!
//! Reads raw chunks rather than lines: interactive prompts such as
//! create-react-app's "(Y/n)" never end with a newline.

use super::failure::OutputReport;
use super::{Event, LogEvent, LogStream};
use crate::launcher::ProcessHandle;
use crate::sniffer::{PROMPT_ANSWER, PortSniffer};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout};
use tokio::select;
use tokio::sync::{broadcast, mpsc};
use tokio::time;

/// How long to keep reading after exit; grandchildren may hold the pipes open.
const DRAIN_AFTER_EXIT: Duration = Duration::from_millis(200);
const TAIL_BYTES: usize = 4096;

pub(super) struct MonitorContext {
    pub path: PathBuf,
    pub generation: u64,
    pub handle: ProcessHandle,
    pub stdin: Option<ChildStdin>,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
    pub events: mpsc::UnboundedSender<Event>,
    pub logs: broadcast::Sender<LogEvent>,
    pub buffer_bytes: usize,
}

/// Decodes a byte stream as UTF-8 without splitting multi-byte characters
/// across chunks.
#[derive(Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let keep = match std::str::from_utf8(&self.pending) {
            Ok(_) => 0,
            Err(e) if e.error_len().is_none() => self.pending.len() - e.valid_up_to(),
            Err(_) => 0,
        };
        let split = self.pending.len() - keep;
        let rest = self.pending.split_off(split);
        let text = String::from_utf8_lossy(&self.pending).to_string();
        self.pending = rest;
        text
    }

    fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).to_string();
        self.pending.clear();
        text
    }
}

/// Last `capacity` bytes of a stream.
struct Tail {
    text: String,
    capacity: usize,
}

impl Tail {
    fn new(capacity: usize) -> Self {
        Self {
            text: String::new(),
            capacity,
        }
    }

    fn push(&mut self, s: &str) {
        self.text.push_str(s);
        if self.text.len() > self.capacity {
            let mut cut = self.text.len() - self.capacity;
            while !self.text.is_char_boundary(cut) {
                cut += 1;
            }
            self.text.drain(..cut);
        }
    }
}

struct Monitor {
    path: PathBuf,
    generation: u64,
    stdin: Option<ChildStdin>,
    events: mpsc::UnboundedSender<Event>,
    logs: broadcast::Sender<LogEvent>,
    sniffer: PortSniffer,
    stdout_tail: Tail,
    stderr_tail: Tail,
}

impl Monitor {
    async fn on_chunk(&mut self, stream: LogStream, text: String) {
        if text.is_empty() {
            return;
        }
        trace!("{stream}: {} {}", self.path.display(), text.trim_end());
        match stream {
            LogStream::Out => self.stdout_tail.push(&text),
            LogStream::Err => self.stderr_tail.push(&text),
        }
        let sniffed = self.sniffer.feed(&text);
        let _ = self.logs.send(LogEvent {
            path: self.path.clone(),
            stream,
            text,
        });
        if sniffed.answer_prompt {
            self.answer_prompt().await;
        }
        if let Some(port) = sniffed.port {
            let _ = self.events.send(Event::PortDetected {
                path: self.path.clone(),
                generation: self.generation,
                port,
            });
        }
    }

    async fn answer_prompt(&mut self) {
        let Some(stdin) = self.stdin.as_mut() else {
            warn!("cannot answer prompt for {}: stdin closed", self.path.display());
            return;
        };
        info!("answering port conflict prompt for {}", self.path.display());
        let result = async {
            stdin.write_all(PROMPT_ANSWER).await?;
            stdin.flush().await
        }
        .await;
        if let Err(e) = result {
            warn!("failed to write to stdin of {}: {e}", self.path.display());
        }
    }

    fn report(&self) -> OutputReport {
        OutputReport {
            stdout: self.stdout_tail.text.clone(),
            stderr: self.stderr_tail.text.clone(),
            saw_port_conflict: self.sniffer.saw_port_conflict(),
        }
    }
}

async fn read_chunk<R: AsyncRead + Unpin>(reader: &mut Option<R>, buf: &mut [u8]) -> Option<usize> {
    match reader {
        Some(r) => match r.read(buf).await {
            Ok(0) => None,
            Ok(n) => Some(n),
            Err(e) => {
                debug!("read from child failed: {e}");
                None
            }
        },
        None => std::future::pending().await,
    }
}

pub(super) async fn run(ctx: MonitorContext) {
    let MonitorContext {
        path,
        generation,
        handle,
        stdin,
        mut stdout,
        mut stderr,
        events,
        logs,
        buffer_bytes,
    } = ctx;
    let mut monitor = Monitor {
        path,
        generation,
        stdin,
        events,
        logs,
        sniffer: PortSniffer::new(buffer_bytes),
        stdout_tail: Tail::new(TAIL_BYTES),
        stderr_tail: Tail::new(TAIL_BYTES),
    };
    let mut out_decoder = Utf8Decoder::default();
    let mut err_decoder = Utf8Decoder::default();
    let mut out_buf = vec![0u8; 4096];
    let mut err_buf = vec![0u8; 4096];
    let mut exited = false;
    // armed once the process exits
    let drain = time::sleep(Duration::from_secs(86_400));
    tokio::pin!(drain);

    loop {
        if stdout.is_none() && stderr.is_none() {
            if !exited {
                handle.wait().await;
            }
            break;
        }
        select! {
            n = read_chunk(&mut stdout, &mut out_buf) => match n {
                Some(n) => {
                    let text = out_decoder.decode(&out_buf[..n]);
                    monitor.on_chunk(LogStream::Out, text).await;
                }
                None => {
                    stdout = None;
                    monitor.on_chunk(LogStream::Out, out_decoder.finish()).await;
                }
            },
            n = read_chunk(&mut stderr, &mut err_buf) => match n {
                Some(n) => {
                    let text = err_decoder.decode(&err_buf[..n]);
                    monitor.on_chunk(LogStream::Err, text).await;
                }
                None => {
                    stderr = None;
                    monitor.on_chunk(LogStream::Err, err_decoder.finish()).await;
                }
            },
            _ = handle.wait(), if !exited => {
                exited = true;
                drain.as_mut().reset(time::Instant::now() + DRAIN_AFTER_EXIT);
            }
            _ = &mut drain, if exited => {
                debug!("output of {} still open after exit, detaching", monitor.path.display());
                break;
            }
        }
    }

    let exit = handle.exit_info();
    let report = monitor.report();
    let _ = monitor.events.send(Event::Exited {
        path: monitor.path,
        generation: monitor.generation,
        exit,
        report,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_keeps_split_characters() {
        let mut decoder = Utf8Decoder::default();
        let bytes = "➜ Local".as_bytes();
        assert_eq!(decoder.decode(&bytes[..1]), "");
        assert_eq!(decoder.decode(&bytes[1..]), "➜ Local");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"ok \xff done"), "ok \u{fffd} done");
    }

    #[test]
    fn test_tail_keeps_end() {
        let mut tail = Tail::new(8);
        tail.push("hello ");
        tail.push("world");
        assert_eq!(tail.text, "lo world");
    }
}
