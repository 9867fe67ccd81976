//! Subprocess execution with captured output and a wall-clock limit

use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::utils::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Captured result of a finished process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, `-1` when the process was ended by a signal
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// `program arg1 arg2 ...` for logs and reports
pub fn command_line(command: &Command) -> String {
    std::iter::once(command.get_program())
        .chain(command.get_args())
        .map(|part| part.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buffer);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    })
}

fn kill(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Run `command` to completion, feeding it `stdin` if given. The process is
/// killed once `timeout` has passed.
pub fn run_with_timeout(command: &mut Command, stdin: Option<&str>, timeout: Duration) -> Result<ProcessOutput> {
    let line = command_line(command);
    info!("Running: {}", line);

    command
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = command.spawn().map_err(|source| Error::ToolLaunch {
        program: command.get_program().to_string_lossy().into_owned(),
        source,
    })?;

    let writer = match (stdin, child.stdin.take()) {
        (Some(input), Some(mut pipe)) => {
            let input = input.to_string();
            Some(thread::spawn(move || {
                let _ = pipe.write_all(input.as_bytes());
            }))
        }
        _ => None,
    };
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let started = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if started.elapsed() >= timeout => {
                debug!("Killing {} after {:?}", line, timeout);
                kill(&mut child);
                return Err(Error::Timeout { command: line, seconds: timeout.as_secs() });
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(source) => {
                kill(&mut child);
                return Err(Error::ToolLaunch { program: line, source });
            }
        }
    };

    if let Some(writer) = writer {
        let _ = writer.join();
    }
    Ok(ProcessOutput {
        code: status.code().unwrap_or(-1),
        stdout: stdout.join().unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SECOND: Duration = Duration::from_secs(1);

    #[test]
    fn test_command_line() {
        let mut command = Command::new("ninja");
        command.args(["-C", "build", "llc"]);
        assert_eq!(command_line(&command), "ninja -C build llc");
    }

    #[test]
    fn test_captures_output_and_code() {
        let out = run_with_timeout(
            Command::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]),
            None,
            5 * SECOND,
        )
        .unwrap();
        assert_eq!(out.code, 3);
        assert_eq!(out.stdout, "out\n");
        assert_eq!(out.stderr, "err\n");
        assert!(!out.success());
    }

    #[test]
    fn test_feeds_stdin() {
        let out = run_with_timeout(&mut Command::new("cat"), Some("%0 = arith.constant 1 : i32\n"), 5 * SECOND).unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "%0 = arith.constant 1 : i32\n");
    }

    #[test]
    fn test_timeout_kills_process() {
        let err = run_with_timeout(Command::new("sleep").arg("5"), None, Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[test]
    fn test_missing_program() {
        let err = run_with_timeout(&mut Command::new("/nonexistent/iree-compile"), None, SECOND).unwrap_err();
        assert!(matches!(err, Error::ToolLaunch { .. }));
    }
}
