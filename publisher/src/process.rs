use std::{
    ffi::OsStr,
    fmt,
    io::{self, Read, Write},
    num::NonZeroI32,
    process,
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

use log::{debug, warn};

use crate::deadline::Deadline;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Makes Ctrl-C kill the running child instead of this process, so that a failed run still logs out
/// of the registry and releases its lock.
pub fn install_interrupt_handler() -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(|| {
        if !INTERRUPTED.swap(true, Ordering::SeqCst) {
            warn!("interrupt received, stopping after cleanup...");
        }
    })
}

pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

pub struct Command {
    inner: process::Command,
    deadline: Option<Deadline>,
    interruptible: bool,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

impl Command {
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        Self {
            inner: process::Command::new(program),
            deadline: None,
            interruptible: true,
        }
    }

    pub fn args<'a, I>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = &'a OsStr>,
    {
        self.inner.args(args);
        self
    }

    /// Kill the child and fail with [`ErrorKind::TimedOut`] once `deadline` passes.
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Keep the child running when the user interrupts the run. Meant for cleanup, which should be bounded by a
    /// deadline of its own.
    pub fn ignore_interrupt(mut self) -> Self {
        self.interruptible = false;
        self
    }

    pub fn program(&self) -> std::borrow::Cow<'_, str> {
        self.inner.get_program().to_string_lossy()
    }

    pub fn try_status(mut self) -> Result<ExitStatus, Error> {
        if log::log_enabled!(log::Level::Debug) {
            debug!("running `{command:?}`...", command = &self.inner);
        }

        match self.run(None, false) {
            Ok(output) => Ok(ExitStatus {
                command: self,
                status: output.status,
            }),
            Err(kind) => Err(Error {
                command: self,
                kind,
            }),
        }
    }

    pub fn status(self) -> Result<(), Error> {
        self.try_status().and_then(ExitStatus::require_success)
    }

    pub fn try_output(mut self) -> Result<Output, Error> {
        if log::log_enabled!(log::Level::Debug) {
            debug!("capturing `{command:?}`...", command = &self.inner);
        }

        match self.run(None, true) {
            Ok(output) => Ok(Output {
                command: self,
                output,
            }),
            Err(kind) => Err(Error {
                command: self,
                kind,
            }),
        }
    }

    pub fn output(self) -> Result<Output, Error> {
        self.try_output().and_then(Output::require_success)
    }

    /// Like [`Command::output`], but writes `input` to the stdin of the child. Secrets should be
    /// passed this way rather than as arguments, which are logged.
    pub fn output_with_input(mut self, input: Vec<u8>) -> Result<Output, Error> {
        if log::log_enabled!(log::Level::Debug) {
            debug!("capturing `{command:?}` with input...", command = &self.inner);
        }

        match self.run(Some(input), true) {
            Ok(output) => Output {
                command: self,
                output,
            }
            .require_success(),
            Err(kind) => Err(Error {
                command: self,
                kind,
            }),
        }
    }

    fn run(&mut self, input: Option<Vec<u8>>, capture: bool) -> Result<process::Output, ErrorKind> {
        self.inner.stdin(if input.is_some() {
            process::Stdio::piped()
        } else {
            process::Stdio::inherit()
        });
        if capture {
            self.inner
                .stdout(process::Stdio::piped())
                .stderr(process::Stdio::piped());
        }

        let mut child = self.inner.spawn()?;

        let stdin_thread = child.stdin.take().zip(input).map(|(mut stdin, input)| {
            thread::spawn(move || {
                // The child may exit without reading its input, that surfaces as its exit status.
                if let Err(error) = stdin.write_all(&input) {
                    debug!("failed to write to stdin: {error}");
                }
            })
        });
        let stdout_thread = child.stdout.take().map(|pipe| thread::spawn(|| read_pipe(pipe)));
        let stderr_thread = child.stderr.take().map(|pipe| thread::spawn(|| read_pipe(pipe)));

        let status = self.wait(&mut child);

        if let Some(thread) = stdin_thread {
            let _ = thread.join();
        }
        let stdout = join_pipe(stdout_thread);
        let stderr = join_pipe(stderr_thread);

        Ok(process::Output {
            status: status?,
            stdout,
            stderr,
        })
    }

    fn wait(&self, child: &mut process::Child) -> Result<process::ExitStatus, ErrorKind> {
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }

            let Some(kind) = self.stop_reason(interrupted()) else {
                thread::sleep(POLL_INTERVAL);
                continue;
            };

            // The child may have exited between `try_wait` and `kill`, both outcomes are fine.
            let _ = child.kill();
            let _ = child.wait();
            return Err(kind);
        }
    }

    fn stop_reason(&self, interrupted: bool) -> Option<ErrorKind> {
        if interrupted && self.interruptible {
            Some(ErrorKind::Interrupted)
        } else if self.deadline.is_some_and(|deadline| deadline.is_expired()) {
            Some(ErrorKind::TimedOut)
        } else {
            None
        }
    }
}

fn read_pipe<R: Read>(mut pipe: R) -> Vec<u8> {
    let mut buffer = Vec::new();
    if let Err(error) = pipe.read_to_end(&mut buffer) {
        debug!("failed to read child output: {error}");
    }
    buffer
}

fn join_pipe(thread: Option<thread::JoinHandle<Vec<u8>>>) -> Vec<u8> {
    thread
        .and_then(|thread| thread.join().ok())
        .unwrap_or_default()
}

#[derive(Debug)]
pub struct ExitStatus {
    command: Command,
    status: process::ExitStatus,
}

impl ExitStatus {
    pub fn require_success(self) -> Result<(), Error> {
        let ExitStatus { command, status } = self;
        if status.success() {
            Ok(())
        } else {
            Err(Error {
                command,
                kind: ErrorKind::NonZeroExitStatus(status.code().and_then(NonZeroI32::new)),
            })
        }
    }
}

#[derive(Debug)]
pub struct Output {
    pub command: Command,
    pub output: process::Output,
}

impl Output {
    pub fn require_success(self) -> Result<Output, Error> {
        let Output { command, output } = self;
        if output.status.success() {
            Ok(Output { command, output })
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            if !stderr.is_empty() {
                warn!("`{program}` reported: {stderr}", program = command.program());
            }
            Err(Error {
                command,
                kind: ErrorKind::NonZeroExitStatus(output.status.code().and_then(NonZeroI32::new)),
            })
        }
    }

    pub fn stdout_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.output.stdout)
    }
}

impl std::ops::Deref for Output {
    type Target = process::Output;

    fn deref(&self) -> &Self::Target {
        &self.output
    }
}

#[derive(Debug)]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    NonZeroExitStatus(Option<NonZeroI32>),
    /// The child was killed because its deadline passed.
    TimedOut,
    /// The child was killed because the user interrupted the run.
    Interrupted,
    Io(io::Error),
}

impl From<io::Error> for ErrorKind {
    fn from(value: io::Error) -> Self {
        match value.kind() {
            io::ErrorKind::NotFound => ErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            _ => ErrorKind::Io(value),
        }
    }
}

#[derive(Debug)]
pub struct Error {
    pub command: Command,
    pub kind: ErrorKind,
}

impl Error {
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::TimedOut)
    }

    pub fn is_interrupt(&self) -> bool {
        matches!(self.kind, ErrorKind::Interrupted)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to run `{command:?}`: ",
            command = &self.command.inner
        )?;
        match &self.kind {
            ErrorKind::NotFound => {
                let program = self.command.program();
                write!(f, "the `{program}` command is required but not available on your system, please install it")
            }
            ErrorKind::PermissionDenied => {
                let program = self.command.program();
                write!(f, "the `{program}` command is available but does not have the right permissions, please make sure the binary is executable")
            }
            ErrorKind::NonZeroExitStatus(code) => {
                if let Some(code) = code {
                    write!(f, "exited with non-zero exit code `{code}`")
                } else {
                    write!(f, "did not run succesfully")
                }
            }
            ErrorKind::TimedOut => write!(f, "killed because the deadline was exceeded"),
            ErrorKind::Interrupted => write!(f, "killed because the run was interrupted"),
            ErrorKind::Io(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ErrorKind::Io(error) => Some(error),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Creates a new [`Command`] and supplies the provided arguments, if any, while calling
/// [`std::convert::AsRef::as_ref`] on each.
macro_rules! command {
    ($program:expr, $($arg:expr),* $(,)?) => {
        $crate::process::args!($crate::process::Command::new($program), $($arg,)*)
    };
}

/// Calls [`Command::args`] on the provided [`Command`] while calling [`std::convert::AsRef::as_ref`]
/// on each argument.
macro_rules! args {
    ($program:expr, $($arg:expr),+ $(,)?) => {
        $program.args([
            $(($arg).as_ref(),)*
        ])
    }
}

pub(crate) use args;
pub(crate) use command;

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn successful_command() {
        assert!(Command::new("true").status().is_ok());
    }

    #[test]
    fn failing_command_reports_exit_code() {
        let error = Command::new("false").status().unwrap_err();
        assert!(matches!(
            error.kind,
            ErrorKind::NonZeroExitStatus(Some(code)) if code.get() == 1
        ));
        assert!(error.to_string().contains("exited with non-zero exit code `1`"));
    }

    #[test]
    fn missing_program() {
        let error = Command::new("release-publisher-does-not-exist")
            .status()
            .unwrap_err();
        assert!(matches!(error.kind, ErrorKind::NotFound));
        assert!(error.to_string().contains("is required but not available"));
    }

    #[test]
    fn captures_output() {
        let output = command!("echo", "hello").output().unwrap();
        assert_eq!(output.stdout_lossy().trim(), "hello");
    }

    #[test]
    fn feeds_input() {
        let output = Command::new("cat")
            .output_with_input(b"secret".to_vec())
            .unwrap();
        assert_eq!(&output.stdout[..], b"secret");
    }

    #[test]
    fn kills_child_after_deadline() {
        let start = Instant::now();
        let error = command!("sleep", "10")
            .with_deadline(Deadline::after(Duration::from_millis(200)))
            .status()
            .unwrap_err();
        assert!(error.is_timeout());
        assert!(!error.is_interrupt());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn interrupt_stops_only_interruptible_commands() {
        let far = Deadline::after(Duration::from_secs(30));

        let command = Command::new("true").with_deadline(far);
        assert!(matches!(
            command.stop_reason(true),
            Some(ErrorKind::Interrupted)
        ));
        assert!(command.stop_reason(false).is_none());

        let cleanup = Command::new("true").with_deadline(far).ignore_interrupt();
        assert!(cleanup.stop_reason(true).is_none());

        let expired = Command::new("true")
            .with_deadline(Deadline::after(Duration::ZERO))
            .ignore_interrupt();
        assert!(matches!(expired.stop_reason(true), Some(ErrorKind::TimedOut)));
    }

    #[test]
    fn finishes_before_deadline() {
        command!("sleep", "0")
            .with_deadline(Deadline::after(Duration::from_secs(30)))
            .status()
            .unwrap();
    }
}
