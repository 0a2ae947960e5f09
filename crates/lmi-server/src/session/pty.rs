//! Process launcher backed by portable-pty.
//!
//! Opens a pseudo-terminal, spawns the shell on its slave side and hands the
//! caller blocking reader/writer ends plus a control object for the child.

use lmi_core::{LmiError, LmiResult};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use tracing::{debug, info};

/// Terminal size used for every launched shell. There is no resize protocol.
const DEFAULT_COLS: u16 = 80;
const DEFAULT_ROWS: u16 = 24;

/// Control over a launched process.
pub trait ProcessControl: Send {
    /// Terminate the process. Killing an already exited process is not an error.
    fn kill(&mut self) -> LmiResult<()>;

    /// Block until the process exits; returns its exit code when known.
    fn wait(&mut self) -> LmiResult<Option<u32>>;

    /// OS process id, if the platform exposes one.
    fn pid(&self) -> Option<u32>;
}

/// A launched process, exclusively owned by one bridge.
pub struct ProcessHandle {
    /// Process output (blocking reads).
    pub output: Box<dyn Read + Send>,
    /// Process input (blocking writes).
    pub input: Box<dyn Write + Send>,
    pub control: Box<dyn ProcessControl>,
}

impl ProcessHandle {
    /// Kill and reap the process. Blocking.
    pub fn terminate(self) {
        let ProcessHandle { mut control, .. } = self;
        if let Err(e) = control.kill() {
            debug!(error = %e, "kill failed");
        }
        let _ = control.wait();
    }
}

/// Starts shell processes.
pub trait Launcher: Send + Sync {
    /// Launch `command` (whitespace-split into program and arguments).
    /// Blocking; call from a blocking context.
    fn launch(&self, command: &str) -> LmiResult<ProcessHandle>;
}

/// Launches commands attached to a fresh pseudo-terminal.
#[derive(Debug, Default, Clone)]
pub struct PtyLauncher;

impl Launcher for PtyLauncher {
    fn launch(&self, command: &str) -> LmiResult<ProcessHandle> {
        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| LmiError::LaunchFailure("empty command".into()))?;
        let mut cmd = CommandBuilder::new(program);
        for arg in parts {
            cmd.arg(arg);
        }
        cmd.env("TERM", "xterm-256color");
        if let Ok(cwd) = std::env::current_dir() {
            cmd.cwd(cwd);
        }

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: DEFAULT_ROWS,
                cols: DEFAULT_COLS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| LmiError::LaunchFailure(format!("failed to open PTY: {e}")))?;

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| LmiError::LaunchFailure(format!("failed to spawn {program}: {e}")))?;
        // The reader only sees end-of-stream once no slave fd is left open here.
        drop(pair.slave);

        let output = pair
            .master
            .try_clone_reader()
            .map_err(|e| LmiError::LaunchFailure(format!("failed to clone PTY reader: {e}")))?;
        let input = pair
            .master
            .take_writer()
            .map_err(|e| LmiError::LaunchFailure(format!("failed to take PTY writer: {e}")))?;

        info!(program, pid = ?child.process_id(), "PTY spawned");

        Ok(ProcessHandle {
            output,
            input,
            control: Box::new(PtyControl {
                child,
                _master: pair.master,
            }),
        })
    }
}

struct PtyControl {
    child: Box<dyn Child + Send + Sync>,
    /// Held so the terminal device lives exactly as long as the process handle.
    _master: Box<dyn MasterPty + Send>,
}

impl ProcessControl for PtyControl {
    fn kill(&mut self) -> LmiResult<()> {
        if let Ok(Some(_)) = self.child.try_wait() {
            return Ok(());
        }
        self.child
            .kill()
            .map_err(|e| LmiError::Other(format!("kill failed: {e}")))
    }

    fn wait(&mut self) -> LmiResult<Option<u32>> {
        let status = self
            .child
            .wait()
            .map_err(|e| LmiError::Other(format!("wait error: {e}")))?;
        let code = status.exit_code();
        debug!(code, "PTY child exited");
        Ok(Some(code))
    }

    fn pid(&self) -> Option<u32> {
        self.child.process_id()
    }
}
