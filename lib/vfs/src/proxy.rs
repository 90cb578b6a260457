//! Wraps another backend behind a uniform delegate - this is what lets one
//! virtual filesystem be mounted inside another, or a backend be swapped
//! underneath a live mount table during composition.

use std::sync::Arc;

use crate::{
    Backend, DirEntry, Metadata, NodeId, OpenFlags, Payload, Result, SetAttr, StreamOps, Vfs,
};

#[derive(Debug)]
pub struct ProxyBackend {
    inner: Arc<dyn Backend>,
}

impl ProxyBackend {
    pub fn new(inner: Arc<dyn Backend>) -> Self {
        Self { inner }
    }
}

impl Backend for ProxyBackend {
    fn root_payload(&self) -> Payload {
        self.inner.root_payload()
    }

    fn getattr(&self, fs: &Vfs, node: NodeId) -> Result<Metadata> {
        self.inner.getattr(fs, node)
    }

    fn setattr(&self, fs: &Vfs, node: NodeId, set: &SetAttr) -> Result<()> {
        self.inner.setattr(fs, node, set)
    }

    fn lookup(&self, fs: &Vfs, parent: NodeId, name: &str) -> Result<NodeId> {
        self.inner.lookup(fs, parent, name)
    }

    fn mknod(&self, fs: &Vfs, parent: NodeId, name: &str, mode: u32) -> Result<NodeId> {
        self.inner.mknod(fs, parent, name, mode)
    }

    fn rename(&self, fs: &Vfs, node: NodeId, new_parent: NodeId, new_name: &str) -> Result<()> {
        self.inner.rename(fs, node, new_parent, new_name)
    }

    fn unlink(&self, fs: &Vfs, parent: NodeId, name: &str) -> Result<()> {
        self.inner.unlink(fs, parent, name)
    }

    fn rmdir(&self, fs: &Vfs, parent: NodeId, name: &str) -> Result<()> {
        self.inner.rmdir(fs, parent, name)
    }

    fn readdir(&self, fs: &Vfs, node: NodeId) -> Result<Vec<DirEntry>> {
        self.inner.readdir(fs, node)
    }

    fn symlink(&self, fs: &Vfs, parent: NodeId, name: &str, target: &str) -> Result<NodeId> {
        self.inner.symlink(fs, parent, name, target)
    }

    fn readlink(&self, fs: &Vfs, node: NodeId) -> Result<String> {
        self.inner.readlink(fs, node)
    }

    fn open(&self, fs: &Vfs, node: NodeId, flags: OpenFlags) -> Result<Arc<dyn StreamOps>> {
        self.inner.open(fs, node, flags)
    }
}
