//! The virtual OS instance. One [`Kernel`] owns one sandbox's filesystem,
//! socket registry, process table and suspension bridge; multiple kernels
//! coexist in one host process without shared state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sandos_vfs::{Fd, FileType, OpenFlags, OpenStream, Payload, Vfs, S_IFSOCK};
use sandos_vnet::{NoNetwork, Socket, SocketStreamOps, TransportFactory};
use sandos_vproc::{NoSpawn, ProcessTable, Spawner};
use tracing::{instrument, trace};

use crate::{syscalls, Bridge, Errno, GuestMemory, KernelConfig, Sysno};

pub struct Kernel {
    config: KernelConfig,
    vfs: Arc<Vfs>,
    bridge: Bridge,
    transports: Arc<dyn TransportFactory>,
    spawner: Arc<dyn Spawner>,
    processes: Arc<ProcessTable>,
    socket_names: AtomicU64,
    pipe_names: AtomicU64,
}

pub struct KernelBuilder {
    config: KernelConfig,
    transports: Arc<dyn TransportFactory>,
    spawner: Arc<dyn Spawner>,
}

impl Default for KernelBuilder {
    fn default() -> Self {
        Self {
            config: KernelConfig::default(),
            transports: Arc::new(NoNetwork),
            spawner: Arc::new(NoSpawn),
        }
    }
}

impl KernelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: KernelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.transports = factory;
        self
    }

    pub fn spawner(mut self, spawner: Arc<dyn Spawner>) -> Self {
        self.spawner = spawner;
        self
    }

    /// Build the kernel against the host runtime that drives transports and
    /// timers.
    pub fn build(self, handle: tokio::runtime::Handle) -> Arc<Kernel> {
        let vfs = Vfs::new(self.config.vfs.clone());
        for dir in ["/tmp", "/dev"] {
            vfs.mkdir(dir, 0o777).expect("seeding the default tree cannot fail");
        }
        Arc::new(Kernel {
            config: self.config,
            vfs,
            bridge: Bridge::new(handle),
            transports: self.transports,
            spawner: self.spawner,
            processes: Arc::new(ProcessTable::new()),
            socket_names: AtomicU64::new(0),
            pipe_names: AtomicU64::new(0),
        })
    }
}

impl Kernel {
    pub fn builder() -> KernelBuilder {
        KernelBuilder::new()
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn vfs(&self) -> &Arc<Vfs> {
        &self.vfs
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn processes(&self) -> &Arc<ProcessTable> {
        &self.processes
    }

    pub fn transports(&self) -> &Arc<dyn TransportFactory> {
        &self.transports
    }

    pub fn spawner(&self) -> &Arc<dyn Spawner> {
        &self.spawner
    }

    /// The syscall entry point: decode, dispatch, translate. Returns the
    /// non-negative result or a negated [`Errno`]; no other representation
    /// crosses this boundary.
    #[instrument(level = "trace", skip(self, mem), ret)]
    pub fn syscall(&self, mem: &dyn GuestMemory, nr: u32, args: [u64; 6]) -> i32 {
        let sysno = match Sysno::try_from(nr) {
            Ok(sysno) => sysno,
            Err(()) => {
                trace!(nr, "unknown syscall");
                return Errno::ENOSYS.as_neg();
            }
        };

        let result = match sysno {
            Sysno::Read => syscalls::fs::sys_read(self, mem, args[0] as Fd, args[1], args[2]),
            Sysno::Write => syscalls::fs::sys_write(self, mem, args[0] as Fd, args[1], args[2]),
            Sysno::Open => {
                syscalls::fs::sys_open(self, mem, args[0], args[1] as u32, args[2] as u32)
            }
            Sysno::Close => syscalls::fs::sys_close(self, args[0] as Fd),
            Sysno::Lseek => syscalls::fs::sys_lseek(
                self,
                mem,
                args[0] as Fd,
                args[1] as i64,
                args[2] as u32,
                args[3],
            ),
            Sysno::Stat => syscalls::fs::sys_stat(self, mem, args[0], args[1], true),
            Sysno::Lstat => syscalls::fs::sys_stat(self, mem, args[0], args[1], false),
            Sysno::Fstat => syscalls::fs::sys_fstat(self, mem, args[0] as Fd, args[1]),
            Sysno::Mkdir => syscalls::fs::sys_mkdir(self, mem, args[0], args[1] as u32),
            Sysno::Rmdir => syscalls::fs::sys_rmdir(self, mem, args[0]),
            Sysno::Unlink => syscalls::fs::sys_unlink(self, mem, args[0]),
            Sysno::Rename => syscalls::fs::sys_rename(self, mem, args[0], args[1]),
            Sysno::Symlink => syscalls::fs::sys_symlink(self, mem, args[0], args[1]),
            Sysno::Readlink => syscalls::fs::sys_readlink(self, mem, args[0], args[1], args[2]),
            Sysno::Getdents => syscalls::fs::sys_getdents(self, mem, args[0] as Fd, args[1], args[2]),
            Sysno::Dup => syscalls::fs::sys_dup(self, args[0] as Fd),
            Sysno::Dup2 => syscalls::fs::sys_dup2(self, args[0] as Fd, args[1] as Fd),
            Sysno::Fcntl => syscalls::fs::sys_fcntl(self, args[0] as Fd, args[1] as u32, args[2]),
            Sysno::Ioctl => syscalls::fs::sys_ioctl(self, mem, args[0] as Fd, args[1] as u32, args[2]),
            Sysno::Ftruncate => syscalls::fs::sys_ftruncate(self, args[0] as Fd, args[1]),
            Sysno::Fsync => syscalls::fs::sys_fsync(self, args[0] as Fd),
            Sysno::Pipe => syscalls::fs::sys_pipe(self, mem, args[0]),
            Sysno::Poll => syscalls::poll::sys_poll(self, mem, args[0], args[1] as u32),
            Sysno::PollFd => syscalls::poll::sys_poll_one(
                self,
                args[0] as Fd,
                args[1] as u16,
                args[2] as i64,
            ),
            Sysno::Nanosleep => syscalls::poll::sys_nanosleep(self, args[0]),
            Sysno::Socket => {
                syscalls::sock::sys_socket(self, args[0] as u16, args[1] as u32, args[2] as u32)
            }
            Sysno::Bind => syscalls::sock::sys_bind(self, mem, args[0] as Fd, args[1]),
            Sysno::Listen => syscalls::sock::sys_listen(self, args[0] as Fd),
            Sysno::Accept => {
                syscalls::sock::sys_accept(self, mem, args[0] as Fd, args[1], args[2])
            }
            Sysno::Connect => syscalls::sock::sys_connect(self, mem, args[0] as Fd, args[1]),
            Sysno::Sendto => syscalls::sock::sys_sendto(
                self,
                mem,
                args[0] as Fd,
                args[1],
                args[2],
                args[4],
            ),
            Sysno::Recvfrom => syscalls::sock::sys_recvfrom(
                self,
                mem,
                args[0] as Fd,
                args[1],
                args[2],
                args[4],
                args[5],
            ),
            Sysno::Shutdown => syscalls::sock::sys_shutdown(self, args[0] as Fd),
            Sysno::Getsockname => {
                syscalls::sock::sys_getsockname(self, mem, args[0] as Fd, args[1], args[2], false)
            }
            Sysno::Getpeername => {
                syscalls::sock::sys_getsockname(self, mem, args[0] as Fd, args[1], args[2], true)
            }
            Sysno::Spawn => syscalls::proc::sys_spawn(
                self,
                mem,
                args[0],
                args[1],
                args[2] as u32,
                args[3],
                args[4],
                args[5],
            ),
            Sysno::Waitpid => syscalls::proc::sys_waitpid(self, mem, args[0] as u32, args[1]),
            Sysno::ProcStatus => {
                syscalls::proc::sys_proc_status(self, mem, args[0] as u32, args[1])
            }
            Sysno::ProcCleanup => syscalls::proc::sys_proc_cleanup(self, args[0] as u32),
            Sysno::Popen => syscalls::proc::sys_popen(
                self,
                mem,
                args[0],
                args[1],
                args[2],
                args[3],
                args[4],
            ),
        };

        match result {
            Ok(value) => value,
            Err(errno) => errno.as_neg(),
        }
    }

    /// Register a socket as a descriptor: an anonymous socket node plus a
    /// non-seekable stream served by the socket ops.
    pub(crate) fn install_socket(
        &self,
        socket: Arc<Socket>,
        flags: OpenFlags,
    ) -> Result<Fd, Errno> {
        let ops = Arc::new(SocketStreamOps::new(socket, self.transports.clone()));
        let name = format!("socket[{}]", self.socket_names.fetch_add(1, Ordering::Relaxed));
        let node = self.vfs.insert_anonymous(
            &name,
            FileType {
                socket: true,
                ..Default::default()
            },
            S_IFSOCK | 0o666,
            Payload::Device(0),
        );
        let stream = OpenStream::new(node, flags, false, ops);
        self.vfs.insert_stream(stream).map_err(Into::into)
    }

    /// The socket behind `fd`, or `ENOTSOCK`.
    pub(crate) fn socket_for_fd(&self, fd: Fd) -> Result<Arc<Socket>, Errno> {
        let stream = self.vfs.stream(fd)?;
        let ops = stream
            .ops
            .downcast_ref::<SocketStreamOps>()
            .ok_or(Errno::ENOTSOCK)?;
        Ok(ops.socket().clone())
    }

    pub(crate) fn next_pipe_name(&self) -> u64 {
        self.pipe_names.fetch_add(1, Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("vfs", &self.vfs)
            .field("processes", &self.processes)
            .finish()
    }
}
