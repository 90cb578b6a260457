use std::sync::Arc;

use sandos::{Kernel, KernelBuilder, Sysno, VecMemory};

pub fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

pub fn build_kernel(
    rt: &tokio::runtime::Runtime,
    configure: impl FnOnce(KernelBuilder) -> KernelBuilder,
) -> Arc<Kernel> {
    configure(Kernel::builder()).build(rt.handle().clone())
}

/// Issue a syscall with up to six arguments, zero-padded.
pub fn sys(kernel: &Kernel, mem: &VecMemory, nr: Sysno, args: &[u64]) -> i32 {
    let mut padded = [0u64; 6];
    padded[..args.len()].copy_from_slice(args);
    kernel.syscall(mem, nr as u32, padded)
}
