//! The spawn plugin seam. The bridge never creates processes itself; the
//! host injects a [`Spawner`] and decides how (or whether) spawning is
//! permitted.

use std::fmt;
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{ProcError, Result};

#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpawnOptions {
    pub cwd: Option<String>,
    pub env: Option<Vec<(String, String)>>,
}

/// Events a spawned process reports back, in arrival order.
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    /// The process exists; its pid is valid.
    Spawned,
    Stdout(Bytes),
    Stderr(Bytes),
    Exit(i32),
}

/// What a [`Spawner`] hands back: the pid, the event stream, and an optional
/// stdin sink.
#[derive(Debug)]
pub struct SpawnedProcess {
    pub pid: u32,
    pub events: mpsc::UnboundedReceiver<ProcessEvent>,
    pub stdin: Option<mpsc::UnboundedSender<Bytes>>,
}

pub trait Spawner: fmt::Debug + Send + Sync {
    fn spawn(
        &self,
        command: &str,
        args: &[String],
        options: &SpawnOptions,
    ) -> Result<SpawnedProcess>;
}

/// Spawner for sandboxes where process creation is not permitted.
#[derive(Debug, Default)]
pub struct NoSpawn;

impl Spawner for NoSpawn {
    fn spawn(&self, _: &str, _: &[String], _: &SpawnOptions) -> Result<SpawnedProcess> {
        Err(ProcError::SpawnUnsupported)
    }
}

/// Spawns real host processes through a shell, bridging their stdio into
/// the event stream with plain reader threads.
#[derive(Debug, Default)]
pub struct HostSpawner;

const CHUNK: usize = 8192;

impl Spawner for HostSpawner {
    fn spawn(
        &self,
        command: &str,
        args: &[String],
        options: &SpawnOptions,
    ) -> Result<SpawnedProcess> {
        let mut cmd = Command::new("/bin/sh");
        let mut line = command.to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        cmd.arg("-c").arg(&line);
        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }
        if let Some(env) = &options.env {
            cmd.env_clear().envs(env.iter().cloned());
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn()?;
        let pid = child.id();
        debug!(pid, command, "host process spawned");

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(ProcessEvent::Spawned).ok();

        let mut stdout = child.stdout.take().expect("stdout was piped");
        let stdout_tx = tx.clone();
        std::thread::spawn(move || {
            let mut buf = [0u8; CHUNK];
            while let Ok(n) = stdout.read(&mut buf) {
                if n == 0 {
                    break;
                }
                if stdout_tx
                    .send(ProcessEvent::Stdout(Bytes::copy_from_slice(&buf[..n])))
                    .is_err()
                {
                    break;
                }
            }
        });

        let mut stderr = child.stderr.take().expect("stderr was piped");
        let stderr_tx = tx.clone();
        std::thread::spawn(move || {
            let mut buf = [0u8; CHUNK];
            while let Ok(n) = stderr.read(&mut buf) {
                if n == 0 {
                    break;
                }
                if stderr_tx
                    .send(ProcessEvent::Stderr(Bytes::copy_from_slice(&buf[..n])))
                    .is_err()
                {
                    break;
                }
            }
        });

        let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<Bytes>();
        let mut stdin = child.stdin.take().expect("stdin was piped");
        std::thread::spawn(move || {
            while let Some(data) = stdin_rx.blocking_recv() {
                if stdin.write_all(&data).is_err() {
                    break;
                }
            }
        });

        std::thread::spawn(move || {
            let code = child
                .wait()
                .ok()
                .and_then(|status| status.code())
                .unwrap_or(-1);
            tx.send(ProcessEvent::Exit(code)).ok();
        });

        Ok(SpawnedProcess {
            pid,
            events: rx,
            stdin: Some(stdin_tx),
        })
    }
}

/// Replays pre-scripted event sequences; the test double for hosts that
/// cannot or will not spawn.
#[derive(Debug, Default)]
pub struct ScriptedSpawner {
    scripts: Mutex<Vec<Vec<ProcessEvent>>>,
    next_pid: AtomicU32,
}

impl ScriptedSpawner {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(Vec::new()),
            next_pid: AtomicU32::new(1000),
        }
    }

    /// Queue the event sequence the next spawn will replay. `Spawned` is
    /// implied and sent first.
    pub fn push_script(&self, events: Vec<ProcessEvent>) {
        self.scripts.lock().unwrap().push(events);
    }
}

impl Spawner for ScriptedSpawner {
    fn spawn(&self, command: &str, _: &[String], _: &SpawnOptions) -> Result<SpawnedProcess> {
        let mut scripts = self.scripts.lock().unwrap();
        if scripts.is_empty() {
            return Err(ProcError::SpawnFailed(format!(
                "no script queued for `{command}`"
            )));
        }
        let script = scripts.remove(0);
        drop(scripts);

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(ProcessEvent::Spawned).ok();
        for event in script {
            tx.send(event).ok();
        }

        Ok(SpawnedProcess {
            pid: self.next_pid.fetch_add(1, Ordering::Relaxed),
            events: rx,
            stdin: None,
        })
    }
}
