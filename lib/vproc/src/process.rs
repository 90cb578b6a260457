//! Process bookkeeping: the by-pid/by-fd tables, stdio wiring into virtual
//! files, exit tracking and bounded waiting.
//!
//! Records are removed only by explicit [`ProcessTable::cleanup`], never on
//! exit, because the exit status must stay queryable.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use sandos_vfs::{Fd, OpenStream, Vfs};
use sandos_vio::{InterestSet, InterestType};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::{ProcError, ProcessEvent, Result, SpawnOptions, Spawner};

/// Default interval between exit checks while waiting on a process.
pub const WAIT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Default cap on exit checks; together with the interval this bounds a
/// wait to roughly five seconds.
pub const WAIT_MAX_RETRIES: u32 = 100;

/// Which descriptors a spawn wires to the child's stdio. `child` fds
/// receive the child's output inside the sandbox; `parent` fds are the
/// sandbox-side ends handed to the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdioMap {
    pub stdin: Option<Fd>,
    pub stdout_child: Option<Fd>,
    pub stdout_parent: Option<Fd>,
    pub stderr_child: Option<Fd>,
    pub stderr_parent: Option<Fd>,
}

impl StdioMap {
    fn registered_fds(&self) -> impl Iterator<Item = Fd> {
        [
            self.stdout_child,
            self.stdout_parent,
            self.stderr_child,
            self.stderr_parent,
        ]
        .into_iter()
        .flatten()
    }
}

#[derive(Debug, Default)]
struct ProcState {
    exited: bool,
    exit_code: i32,
}

/// One external process as seen from the sandbox.
pub struct ProcRecord {
    pub pid: u32,
    pub stdio: StdioMap,
    state: Mutex<ProcState>,
    /// Fire when stdout data (or exit) arrives; pollers wait here.
    pub stdout_events: InterestSet,
    pub stderr_events: InterestSet,
}

impl ProcRecord {
    fn new(pid: u32, stdio: StdioMap) -> Self {
        Self {
            pid,
            stdio,
            state: Mutex::new(ProcState::default()),
            stdout_events: InterestSet::new(),
            stderr_events: InterestSet::new(),
        }
    }

    pub fn exited(&self) -> bool {
        self.state.lock().unwrap().exited
    }

    pub fn exit_code(&self) -> Option<i32> {
        let state = self.state.lock().unwrap();
        state.exited.then_some(state.exit_code)
    }

    fn mark_exited(&self, code: i32) {
        let mut state = self.state.lock().unwrap();
        state.exited = true;
        state.exit_code = code;
        drop(state);
        // Wake everything polling the process's streams.
        self.stdout_events.push(InterestType::Readable);
        self.stderr_events.push(InterestType::Readable);
    }
}

impl fmt::Debug for ProcRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("ProcRecord")
            .field("pid", &self.pid)
            .field("exited", &state.exited)
            .field("exit_code", &state.exit_code)
            .finish()
    }
}

/// One-shot status check result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcStatus {
    NoSuchProcess,
    Running,
    Exited(i32),
}

/// Lookup tables for live (and exited-but-not-cleaned) processes.
#[derive(Default)]
pub struct ProcessTable {
    by_pid: Mutex<HashMap<u32, Arc<ProcRecord>>>,
    by_fd: Mutex<HashMap<Fd, Arc<ProcRecord>>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_pid(&self, pid: u32) -> Option<Arc<ProcRecord>> {
        self.by_pid.lock().unwrap().get(&pid).cloned()
    }

    pub fn by_fd(&self, fd: Fd) -> Option<Arc<ProcRecord>> {
        self.by_fd.lock().unwrap().get(&fd).cloned()
    }

    pub fn status(&self, pid: u32) -> ProcStatus {
        match self.by_pid(pid) {
            None => ProcStatus::NoSuchProcess,
            Some(record) => match record.exit_code() {
                Some(code) => ProcStatus::Exited(code),
                None => ProcStatus::Running,
            },
        }
    }

    /// Drop the record from both tables. The only way a pid disappears.
    pub fn cleanup(&self, pid: u32) -> Result<()> {
        let record = self
            .by_pid
            .lock()
            .unwrap()
            .remove(&pid)
            .ok_or(ProcError::NoSuchProcess)?;
        let mut by_fd = self.by_fd.lock().unwrap();
        for fd in record.stdio.registered_fds() {
            by_fd.remove(&fd);
        }
        Ok(())
    }

    /// Spawn through `spawner`, register the record, and wire the child's
    /// stdio into the given virtual files. Resolves once the process is
    /// confirmed spawned (or has already exited).
    ///
    /// `stdin_data` is the captured content of the stdin descriptor, fed to
    /// the child once at startup.
    #[allow(clippy::too_many_arguments)]
    pub async fn spawn(
        &self,
        vfs: &Arc<Vfs>,
        handle: &tokio::runtime::Handle,
        spawner: &dyn Spawner,
        command: &str,
        args: &[String],
        options: &SpawnOptions,
        stdio: StdioMap,
        stdin_data: Option<Bytes>,
    ) -> Result<u32> {
        let spawned = spawner.spawn(command, args, options)?;
        let pid = spawned.pid;
        let mut events = spawned.events;

        let record = Arc::new(ProcRecord::new(pid, stdio));
        self.by_pid.lock().unwrap().insert(pid, record.clone());
        {
            let mut by_fd = self.by_fd.lock().unwrap();
            for fd in stdio.registered_fds() {
                by_fd.insert(fd, record.clone());
            }
        }

        if let (Some(tx), Some(data)) = (&spawned.stdin, stdin_data) {
            tx.send(data).ok();
        }

        // Wait until the child is confirmed before reporting the pid.
        match events.recv().await {
            Some(ProcessEvent::Spawned) => (),
            Some(ProcessEvent::Exit(code)) => record.mark_exited(code),
            Some(other) => {
                // Data before the spawn confirmation; hand it to the driver.
                deliver(vfs, &record, &writers(vfs, &record), other);
            }
            None => {
                self.cleanup(pid).ok();
                return Err(ProcError::SpawnFailed("event stream closed".to_string()));
            }
        }

        let vfs = vfs.clone();
        let driver_record = record;
        handle.spawn(async move {
            let out = writers(&vfs, &driver_record);
            while let Some(event) = events.recv().await {
                deliver(&vfs, &driver_record, &out, event);
            }
            trace!(pid, "process event stream drained");
        });

        debug!(pid, command, "process registered");
        Ok(pid)
    }

    /// Poll the record on a fixed interval until it exits. Bounded: after
    /// `max_retries` checks the wait fails instead of hanging forever.
    pub async fn wait(&self, pid: u32, interval: Duration, max_retries: u32) -> Result<i32> {
        for _ in 0..=max_retries {
            match self.status(pid) {
                ProcStatus::NoSuchProcess => return Err(ProcError::NoSuchProcess),
                ProcStatus::Exited(code) => return Ok(code),
                ProcStatus::Running => tokio::time::sleep(interval).await,
            }
        }
        Err(ProcError::TimedOut)
    }
}

impl fmt::Debug for ProcessTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessTable")
            .field("processes", &self.by_pid.lock().unwrap().len())
            .finish()
    }
}

struct StdioWriters {
    stdout: Option<OpenStream>,
    stderr: Option<OpenStream>,
}

/// Fresh write cursors over the child-side stdio files. Each keeps its own
/// monotonically advancing offset, independent of the guest's read
/// position on the same descriptor.
fn writers(vfs: &Arc<Vfs>, record: &Arc<ProcRecord>) -> StdioWriters {
    let fresh = |fd: Option<Fd>| {
        fd.and_then(|fd| vfs.stream(fd).ok())
            .map(|s| OpenStream::new(s.node, s.flags, s.seekable, s.ops.clone()))
    };
    StdioWriters {
        stdout: fresh(record.stdio.stdout_child),
        stderr: fresh(record.stdio.stderr_child),
    }
}

fn deliver(vfs: &Arc<Vfs>, record: &Arc<ProcRecord>, out: &StdioWriters, event: ProcessEvent) {
    match event {
        ProcessEvent::Spawned => (),
        ProcessEvent::Stdout(data) => {
            if let Some(writer) = &out.stdout {
                if let Err(err) = writer.ops.write(vfs, writer, &data) {
                    debug!(pid = record.pid, ?err, "stdout append failed");
                }
            }
            record.stdout_events.push(InterestType::Readable);
        }
        ProcessEvent::Stderr(data) => {
            if let Some(writer) = &out.stderr {
                if let Err(err) = writer.ops.write(vfs, writer, &data) {
                    debug!(pid = record.pid, ?err, "stderr append failed");
                }
            }
            record.stderr_events.push(InterestType::Readable);
        }
        ProcessEvent::Exit(code) => record.mark_exited(code),
    }
}
