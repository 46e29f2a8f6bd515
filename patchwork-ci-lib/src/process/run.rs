use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::fmt::Write;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bstr::ByteSlice;
use itertools::Itertools;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::imp;
use crate::core::effects::Effects;

/// The exit code reported for a process which was killed because it ran past
/// its timeout (`128 + SIGKILL`).
pub const TIMED_OUT_EXIT_CODE: i32 = 137;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long to keep reading output once the process tree has been killed. A
/// descendant which left the process group can hold the pipes open forever.
const READER_GRACE: Duration = Duration::from_secs(2);

/// Error type.
///
/// These are failures to run the process at all. A process which ran and
/// returned a non-zero exit code is not an error; see
/// [`ProcessResult::exit_code`].
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("no command was provided")]
    EmptyCommand,

    #[error("could not spawn {program:?}: {source}")]
    Spawn {
        source: std::io::Error,
        program: OsString,
    },

    #[error("could not wait for {program:?} to exit: {source}")]
    Wait {
        source: std::io::Error,
        program: OsString,
    },

    #[error("the thread reading {stream} of {program:?} panicked")]
    ReaderPanicked {
        stream: &'static str,
        program: OsString,
    },
}

/// Information about how to run external processes.
#[derive(Clone)]
pub struct ProcessRunInfo {
    /// The working directory that processes are run in, unless overridden.
    pub working_directory: PathBuf,

    /// The base environment passed to every process.
    pub env: HashMap<OsString, OsString>,

    /// Kill the process (and everything it spawned) after this long.
    pub timeout: Option<Duration>,
}

impl std::fmt::Debug for ProcessRunInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<ProcessRunInfo working_directory={:?} timeout={:?} env=not shown>",
            self.working_directory, self.timeout
        )
    }
}

/// Per-invocation options for [`ProcessRunInfo::run`].
#[derive(Clone, Debug, Default)]
pub struct ProcessRunOpts {
    /// Run in this directory instead of [`ProcessRunInfo::working_directory`].
    pub working_directory: Option<PathBuf>,

    /// Variables layered over [`ProcessRunInfo::env`].
    pub env: HashMap<OsString, OsString>,

    /// File descriptors which the child should inherit.
    pub inherited_fds: Vec<i32>,

    /// Overrides [`ProcessRunInfo::timeout`] for this invocation.
    pub timeout: Option<Duration>,
}

/// The result of running an external process.
#[must_use]
#[derive(Clone, PartialEq)]
pub struct ProcessResult {
    /// The exit code of the process. A process killed by a signal reports
    /// `128 + signal`.
    pub exit_code: i32,

    /// Everything the process wrote to stdout.
    pub stdout: String,

    /// Everything the process wrote to stderr, with a leading newline so that
    /// `stdout + stderr` reads as two separate blocks.
    pub stderr: String,

    /// Wall-clock run time.
    pub elapsed: Duration,

    /// Whether the process was killed for exceeding its timeout.
    pub timed_out: bool,
}

impl std::fmt::Debug for ProcessResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<ProcessResult exit_code={:?} timed_out={:?} elapsed={:?} stdout={:?} stderr={:?}>",
            self.exit_code, self.timed_out, self.elapsed, self.stdout, self.stderr,
        )
    }
}

impl ProcessResult {
    /// Whether the process exited with code 0.
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// The wall-clock run time in seconds.
    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }

    /// Stdout followed by stderr.
    pub fn combined_output(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

impl ProcessRunInfo {
    /// Construct from the environment of the current process.
    pub fn from_current_env(
        working_directory: PathBuf,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            working_directory,
            env: std::env::vars_os().collect(),
            timeout,
        }
    }

    fn spawn_reader_thread<Stream: Read + Send + 'static>(
        stream: Option<Stream>,
        echo: Option<Effects>,
    ) -> OutputReader {
        let captured = Arc::new(Mutex::new(String::new()));
        let handle = thread::spawn({
            let captured = Arc::clone(&captured);
            move || {
                let stream = match stream {
                    Some(stream) => stream,
                    None => return,
                };
                let mut reader = BufReader::new(stream);
                let mut line = Vec::new();
                loop {
                    line.clear();
                    match reader.read_until(b'\n', &mut line) {
                        Ok(0) => break,
                        Ok(_) => {}
                        Err(err) => {
                            warn!(?err, "Reading line from subprocess");
                            break;
                        }
                    }
                    let line = line.to_str_lossy();
                    if let Some(effects) = &echo {
                        let text = line.strip_suffix('\n').unwrap_or(&line);
                        debug!(line = %text, "Subprocess output");
                        let _ = writeln!(effects.get_output_stream(), "| {text}");
                    }
                    captured.lock().unwrap().push_str(&line);
                }
            }
        });
        OutputReader { handle, captured }
    }

    /// Run `args[0]` with the remaining arguments, streaming its stdout to
    /// `effects` line by line as it is produced and capturing both stdout and
    /// stderr.
    ///
    /// A non-zero exit code is a normal result, not an error. An error is
    /// returned only if the process could not be run at all.
    #[instrument]
    pub fn run<S: AsRef<OsStr> + std::fmt::Debug>(
        &self,
        effects: &Effects,
        args: &[S],
        opts: &ProcessRunOpts,
    ) -> Result<ProcessResult, ProcessError> {
        self.run_inner(
            effects,
            args.iter().map(AsRef::as_ref).collect_vec().as_slice(),
            opts,
        )
    }

    fn run_inner(
        &self,
        effects: &Effects,
        args: &[&OsStr],
        opts: &ProcessRunOpts,
    ) -> Result<ProcessResult, ProcessError> {
        let ProcessRunInfo {
            working_directory,
            env,
            timeout,
        } = self;
        let ProcessRunOpts {
            working_directory: working_directory_override,
            env: env_overlay,
            inherited_fds,
            timeout: timeout_override,
        } = opts;
        let (program, program_args) = match args.split_first() {
            Some(split) => split,
            None => return Err(ProcessError::EmptyCommand),
        };
        let working_directory: &Path = working_directory_override
            .as_deref()
            .unwrap_or(working_directory);
        let timeout = timeout_override.or(*timeout);

        let command_string = shell_words::join(
            args.iter()
                .map(|arg| arg.to_string_lossy().into_owned())
                .collect_vec(),
        );
        let _ = writeln!(
            effects.get_output_stream(),
            "pwci: running command: {command_string}"
        );
        debug!(?working_directory, ?timeout, %command_string, "Spawning subprocess");

        let mut command = Command::new(program);
        command.args(program_args);
        command.current_dir(working_directory);
        command.env_clear();
        command.envs(env.iter());
        command.envs(env_overlay.iter());
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        imp::configure_command(&mut command, inherited_fds);

        let start = Instant::now();
        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            source,
            program: program.to_os_string(),
        })?;

        let stdout_reader = Self::spawn_reader_thread(child.stdout.take(), Some(effects.clone()));
        let stderr_reader = Self::spawn_reader_thread(child.stderr.take(), None);

        let wait_error = |source: std::io::Error| ProcessError::Wait {
            source,
            program: program.to_os_string(),
        };
        let deadline = timeout.map(|timeout| start + timeout);
        let timed_out = loop {
            if imp::has_exited(&mut child).map_err(wait_error)? {
                break false;
            }
            if deadline.map_or(false, |deadline| Instant::now() >= deadline) {
                warn!(?timeout, %command_string, "Subprocess timed out, killing it");
                break true;
            }
            thread::sleep(POLL_INTERVAL);
        };
        // Nothing the command spawned outlives it.
        imp::kill_process_tree(&mut child);
        let exit_status = child.wait().map_err(wait_error)?;

        let readers_deadline = Instant::now() + READER_GRACE;
        let stdout = stdout_reader.finish(readers_deadline, "stdout", program)?;
        let stderr = stderr_reader.finish(readers_deadline, "stderr", program)?;
        let elapsed = start.elapsed();

        let exit_code = if timed_out {
            TIMED_OUT_EXIT_CODE
        } else {
            imp::exit_code_from_status(exit_status)
        };
        let stderr = if timed_out {
            format!(
                "\n{stderr}pwci: killed after exceeding timeout of {:.1}s\n",
                elapsed.as_secs_f64()
            )
        } else {
            format!("\n{stderr}")
        };

        let _ = writeln!(
            effects.get_output_stream(),
            "pwci: command exited with code {exit_code} after {:.2}s",
            elapsed.as_secs_f64()
        );
        debug!(exit_code, ?elapsed, timed_out, "Subprocess finished");

        Ok(ProcessResult {
            exit_code,
            stdout,
            stderr,
            elapsed,
            timed_out,
        })
    }
}

/// A thread draining one of the child's output pipes.
struct OutputReader {
    handle: JoinHandle<()>,
    captured: Arc<Mutex<String>>,
}

impl OutputReader {
    /// Wait until the pipe is closed or `deadline` passes, and return what was
    /// read. Past the deadline the thread is abandoned.
    fn finish(
        self,
        deadline: Instant,
        stream: &'static str,
        program: &OsStr,
    ) -> Result<String, ProcessError> {
        let Self { handle, captured } = self;
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(POLL_INTERVAL);
        }
        if handle.is_finished() {
            handle.join().map_err(|_| ProcessError::ReaderPanicked {
                stream,
                program: program.to_os_string(),
            })?;
        } else {
            warn!(
                stream,
                ?program,
                "Output pipe still open after the process tree was killed, no longer reading it"
            );
        }
        let captured = captured.lock().unwrap().clone();
        Ok(captured)
    }
}
