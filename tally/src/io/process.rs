//! Shell command execution with line-by-line output streaming.
//!
//! stdout and stderr share one pipe, so lines arrive in the order the
//! command wrote them. A reader thread feeds that pipe into a channel and the
//! session wakes up regularly to check for a user interrupt.
//!
//! Each command runs in its own process group; terminating it signals the
//! whole group so processes forked by the shell go down with it.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// One step of a running command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A line of output without its terminator.
    Line(String),
    /// Nothing happened within the poll interval.
    Idle,
    /// The command finished. `None` when it was killed by a signal.
    Exited(Option<i32>),
}

/// Starts commands for the session.
pub trait CommandRunner {
    fn spawn(&self, command: &str) -> Result<Box<dyn OutputStream>>;
}

/// Events of a running command, in arrival order.
///
/// After [`StreamEvent::Exited`] every further call returns the same event.
pub trait OutputStream {
    fn next_event(&mut self) -> Result<StreamEvent>;

    /// Ask the command to stop, killing it if it has not exited after the
    /// grace period.
    fn terminate(&mut self) -> Result<()>;
}

/// Runs commands through `sh -c`.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    poll_interval: Duration,
    grace: Duration,
}

impl ShellRunner {
    pub fn new(poll_interval: Duration, grace: Duration) -> Self {
        Self {
            poll_interval,
            grace,
        }
    }
}

impl CommandRunner for ShellRunner {
    #[instrument(skip_all, fields(command))]
    fn spawn(&self, command: &str) -> Result<Box<dyn OutputStream>> {
        debug!("spawning shell command");
        let (output, writer) = std::io::pipe().context("create output pipe")?;
        let mut shell = Command::new("sh");
        shell
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(writer.try_clone().context("clone output pipe")?)
            .stderr(writer);
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut shell, 0);
        let child = shell
            .spawn()
            .with_context(|| format!("spawn sh -c {command:?}"))?;
        // Our copies of the write end must go, or the reader never sees EOF.
        drop(shell);

        let (tx, rx) = mpsc::channel();
        spawn_reader(output, tx);

        Ok(Box::new(ChildStream {
            child,
            rx,
            reading: true,
            poll_interval: self.poll_interval,
            grace: self.grace,
            exited: None,
        }))
    }
}

enum ReaderMsg {
    Line(String),
    Eof,
}

fn spawn_reader<R: Read + Send + 'static>(stream: R, tx: Sender<ReaderMsg>) {
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']).to_string();
                    if tx.send(ReaderMsg::Line(line)).is_err() {
                        return;
                    }
                }
                Err(err) => {
                    warn!(err = %err, "output reader failed");
                    break;
                }
            }
        }
        let _ = tx.send(ReaderMsg::Eof);
    });
}

struct ChildStream {
    child: Child,
    rx: Receiver<ReaderMsg>,
    reading: bool,
    poll_interval: Duration,
    grace: Duration,
    exited: Option<Option<i32>>,
}

impl OutputStream for ChildStream {
    fn next_event(&mut self) -> Result<StreamEvent> {
        if let Some(code) = self.exited {
            return Ok(StreamEvent::Exited(code));
        }

        if self.reading {
            match self.rx.recv_timeout(self.poll_interval) {
                Ok(ReaderMsg::Line(line)) => return Ok(StreamEvent::Line(line)),
                Ok(ReaderMsg::Eof) | Err(RecvTimeoutError::Disconnected) => self.reading = false,
                Err(RecvTimeoutError::Timeout) => return Ok(StreamEvent::Idle),
            }
        }

        match self
            .child
            .wait_timeout(self.poll_interval)
            .context("wait for command")?
        {
            Some(status) => {
                debug!(exit_code = ?status.code(), "command finished");
                self.exited = Some(status.code());
                Ok(StreamEvent::Exited(status.code()))
            }
            None => Ok(StreamEvent::Idle),
        }
    }

    #[instrument(skip_all, fields(pid = self.child.id()))]
    fn terminate(&mut self) -> Result<()> {
        if self.exited.is_some() {
            return Ok(());
        }
        signal_group(&self.child, Signal::Terminate);

        let status = match self.child.wait_timeout(self.grace).context("wait after terminate")? {
            Some(status) => status,
            None => {
                warn!(grace_ms = self.grace.as_millis() as u64, "command ignored terminate, killing");
                signal_group(&self.child, Signal::Kill);
                self.child.kill().or_else(already_gone).context("kill command")?;
                self.child.wait().context("wait command after kill")?
            }
        };
        // The shell may be gone while its children are still around.
        signal_group(&self.child, Signal::Kill);
        self.exited = Some(status.code());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Terminate,
    Kill,
}

/// Send `signal` to every process in the child's process group.
#[cfg(unix)]
fn signal_group(child: &Child, signal: Signal) {
    use nix::sys::signal::{Signal as NixSignal, killpg};
    use nix::unistd::Pid;

    let Ok(pgid) = i32::try_from(child.id()) else {
        return;
    };
    let sig = match signal {
        Signal::Terminate => NixSignal::SIGTERM,
        Signal::Kill => NixSignal::SIGKILL,
    };
    match killpg(Pid::from_raw(pgid), sig) {
        Ok(()) => debug!(pgid, ?signal, "signalled process group"),
        Err(nix::errno::Errno::ESRCH) => debug!(pgid, ?signal, "process group already gone"),
        Err(err) => warn!(pgid, ?signal, error = %err, "failed to signal process group"),
    }
}

#[cfg(not(unix))]
fn signal_group(_child: &Child, _signal: Signal) {}

fn already_gone(err: std::io::Error) -> std::io::Result<()> {
    if err.kind() == std::io::ErrorKind::InvalidInput { Ok(()) } else { Err(err) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn runner() -> ShellRunner {
        ShellRunner::new(Duration::from_millis(20), Duration::from_millis(200))
    }

    fn drain(stream: &mut dyn OutputStream) -> (Vec<String>, Option<i32>) {
        let mut lines = Vec::new();
        loop {
            match stream.next_event().expect("event") {
                StreamEvent::Line(line) => lines.push(line),
                StreamEvent::Idle => {}
                StreamEvent::Exited(code) => return (lines, code),
            }
        }
    }

    #[test]
    fn streams_lines_and_exit_code() {
        let mut stream = runner().spawn("printf 'one\\ntwo\\n'; exit 3").expect("spawn");
        let (lines, code) = drain(stream.as_mut());
        assert_eq!(lines, vec!["one", "two"]);
        assert_eq!(code, Some(3));
        assert_eq!(stream.next_event().expect("event"), StreamEvent::Exited(Some(3)));
    }

    #[test]
    fn stderr_keeps_its_place_in_the_output() {
        let mut stream = runner()
            .spawn("echo one; echo two >&2; echo three; echo four >&2")
            .expect("spawn");
        let (lines, code) = drain(stream.as_mut());
        assert_eq!(lines, vec!["one", "two", "three", "four"]);
        assert_eq!(code, Some(0));
    }

    #[test]
    fn final_line_without_newline_is_kept() {
        let mut stream = runner().spawn("printf 'partial'").expect("spawn");
        let (lines, _) = drain(stream.as_mut());
        assert_eq!(lines, vec!["partial"]);
    }

    #[test]
    fn silent_commands_report_idle() {
        let mut stream = runner().spawn("sleep 5").expect("spawn");
        assert_eq!(stream.next_event().expect("event"), StreamEvent::Idle);
        let started = Instant::now();
        stream.terminate().expect("terminate");
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(matches!(stream.next_event().expect("event"), StreamEvent::Exited(_)));
    }

    #[test]
    fn commands_ignoring_terminate_are_killed() {
        let mut stream = runner()
            .spawn("trap '' TERM; echo ready; sleep 5")
            .expect("spawn");
        loop {
            if let StreamEvent::Line(line) = stream.next_event().expect("event") {
                assert_eq!(line, "ready");
                break;
            }
        }
        let started = Instant::now();
        stream.terminate().expect("terminate");
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    /// Running, or present but not yet reaped.
    #[cfg(target_os = "linux")]
    fn is_running(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => !stat.rsplit(')').next().is_some_and(|rest| rest.trim_start().starts_with('Z')),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn terminate_takes_down_forked_processes() {
        let mut stream = runner().spawn("sleep 37 & echo $!; wait").expect("spawn");
        let pid = loop {
            if let StreamEvent::Line(line) = stream.next_event().expect("event") {
                break line;
            }
        };
        assert!(is_running(&pid), "sleep {pid} did not start");
        stream.terminate().expect("terminate");

        let deadline = Instant::now() + Duration::from_secs(2);
        while is_running(&pid) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        assert!(!is_running(&pid), "sleep {pid} survived terminate");
    }
}
