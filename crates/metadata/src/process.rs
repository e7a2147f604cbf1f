use std::io::{self, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError};

use crate::MetadataError;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

const EXIT_POLL: Duration = Duration::from_millis(10);

/// Command with captured stdout and no console window.
pub(crate) fn quiet_command(program: &Path) -> Command {
    let mut command = Command::new(program);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        command.creation_flags(CREATE_NO_WINDOW);
    }
    command
}

/// Runs `command` and returns its trimmed stdout. A non-zero exit or empty
/// output yields `Ok(None)`; the child is killed once `timeout` elapses.
pub(crate) fn run_with_timeout(
    mut command: Command,
    timeout: Duration,
) -> Result<Option<String>, MetadataError> {
    let deadline = Instant::now() + timeout;
    let mut child = command.spawn()?;
    let mut stdout = match child.stdout.take() {
        Some(stdout) => stdout,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(MetadataError::Io(io::Error::new(
                io::ErrorKind::Other,
                "child stdout not captured",
            )));
        }
    };

    let (tx, rx) = bounded(1);
    thread::spawn(move || {
        let mut buf = Vec::new();
        let result = stdout.read_to_end(&mut buf).map(|_| buf);
        let _ = tx.send(result);
    });

    let bytes = match rx.recv_timeout(timeout) {
        Ok(read) => read,
        Err(RecvTimeoutError::Timeout) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(MetadataError::Timeout(timeout));
        }
        Err(RecvTimeoutError::Disconnected) => {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
    };

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(MetadataError::Timeout(timeout));
        }
        thread::sleep(EXIT_POLL);
    };

    let bytes = bytes?;
    if !status.success() {
        return Ok(None);
    }
    let text = String::from_utf8_lossy(&bytes).trim().to_string();
    if text.is_empty() {
        Ok(None)
    } else {
        Ok(Some(text))
    }
}

#[cfg(test)]
mod tests {
    use super::{quiet_command, run_with_timeout};
    use crate::MetadataError;
    use std::path::Path;
    use std::time::Duration;

    #[test]
    fn missing_program_is_an_io_error() {
        let command = quiet_command(Path::new("definitely-not-a-real-probe-binary"));
        let result = run_with_timeout(command, Duration::from_secs(2));
        assert!(matches!(result, Err(MetadataError::Io(_))));
    }

    #[cfg(unix)]
    #[test]
    fn captures_trimmed_stdout() {
        let mut command = quiet_command(Path::new("sh"));
        command.args(["-c", "echo '  12.5  '"]);
        let output = run_with_timeout(command, Duration::from_secs(5)).unwrap();
        assert_eq!(output.as_deref(), Some("12.5"));
    }

    #[cfg(unix)]
    #[test]
    fn failing_exit_means_no_data() {
        let mut command = quiet_command(Path::new("sh"));
        command.args(["-c", "echo partial; exit 3"]);
        let output = run_with_timeout(command, Duration::from_secs(5)).unwrap();
        assert!(output.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn slow_child_is_killed() {
        let mut command = quiet_command(Path::new("sh"));
        command.args(["-c", "sleep 5"]);
        let result = run_with_timeout(command, Duration::from_millis(200));
        assert!(matches!(result, Err(MetadataError::Timeout(_))));
    }
}
