//! Process/pipe bridging: externally-spawned processes exposed as virtual
//! file descriptors, plus the bucket pipes that carry shell-style plumbing.

mod error;
mod pipe;
mod process;
mod spawner;

pub use error::{ProcError, Result};
pub use pipe::{Pipe, PipeEnd, PipeStreamOps, BUCKET_BUFFER_SIZE};
pub use process::{
    ProcRecord, ProcStatus, ProcessTable, StdioMap, WAIT_MAX_RETRIES, WAIT_RETRY_INTERVAL,
};
pub use spawner::{
    HostSpawner, NoSpawn, ProcessEvent, ScriptedSpawner, SpawnOptions, SpawnedProcess, Spawner,
};
