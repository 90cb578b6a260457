//! The virtual filesystem instance: node arena, name index, mount table and
//! descriptor table. One [`Vfs`] is one independent sandbox; nothing here is
//! global.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use slab::Slab;
use tracing::trace;

use crate::node::now;
use crate::{
    path, AccessMode, Backend, DirEntry, FileType, FsError, Metadata, MountId, Node, NodeId,
    OpenFlags, OpenStream, Payload, Result, SetAttr, StreamOps, Streams, Whence,
};
use crate::{mem::MemBackend, Fd};

pub const ROOT_NODE: NodeId = 0;

/// Default bound on symlink traversal during resolution.
pub const SYMLINK_DEPTH_DEFAULT: u32 = 8;

/// Default cap on the descriptor table.
pub const MAX_OPEN_FDS_DEFAULT: usize = 4096;

#[derive(Debug, Clone)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VfsConfig {
    pub symlink_depth: u32,
    pub max_open_fds: usize,
    /// Permission checks are a no-op in the default sandboxed single-user
    /// setup; turning this on enforces the owner-class mode bits.
    pub enforce_permissions: bool,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            symlink_depth: SYMLINK_DEPTH_DEFAULT,
            max_open_fds: MAX_OPEN_FDS_DEFAULT,
            enforce_permissions: false,
        }
    }
}

/// Options controlling one resolution walk.
#[derive(Debug, Clone, Copy)]
pub struct LookupOptions {
    /// Follow a symlink in the final component.
    pub follow_symlinks: bool,
    /// Cross a mountpoint in the final component; intermediate components
    /// always cross.
    pub follow_mounts: bool,
}

impl Default for LookupOptions {
    fn default() -> Self {
        Self {
            follow_symlinks: true,
            follow_mounts: true,
        }
    }
}

impl LookupOptions {
    pub fn no_follow() -> Self {
        Self {
            follow_symlinks: false,
            ..Default::default()
        }
    }

    /// Resolve to the mountpoint directory itself instead of the mounted
    /// root.
    pub fn mountpoint() -> Self {
        Self {
            follow_mounts: false,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct Mount {
    pub backend: Arc<dyn Backend>,
    pub root: NodeId,
    /// Directory node redirecting into this mount; `None` for the root mount.
    pub mountpoint: Option<NodeId>,
    /// Free-form description of where the mount comes from (host root,
    /// delegate name). Diagnostic only.
    pub source: String,
}

pub(crate) struct VfsState {
    pub(crate) nodes: Slab<Node>,
    /// Secondary index over every directory edge, keyed by `(parent id,
    /// child name)`. Kept in lockstep with the parents' child maps.
    pub(crate) name_index: HashMap<(NodeId, String), NodeId>,
    pub(crate) mounts: Vec<Mount>,
}

impl VfsState {
    fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id).ok_or(FsError::UnknownError)
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(id).ok_or(FsError::UnknownError)
    }

    /// Path of `node` relative to its mount root, `/`-rooted.
    fn mount_path(&self, id: NodeId) -> Result<String> {
        let mut parts: Vec<String> = Vec::new();
        let mut cur = self.node(id)?;
        while cur.parent != cur.id {
            parts.push(cur.name.clone());
            cur = self.node(cur.parent)?;
        }
        parts.reverse();
        Ok(format!("/{}", parts.join("/")))
    }

    /// Absolute path of `node`, crossing mount roots back up into their
    /// mountpoints.
    fn absolute_path(&self, id: NodeId) -> Result<String> {
        let mut parts: Vec<String> = Vec::new();
        let mut cur = self.node(id)?;
        loop {
            while cur.parent != cur.id {
                parts.push(cur.name.clone());
                cur = self.node(cur.parent)?;
            }
            // At a mount root; hop to the mountpoint directory if any.
            let mount = &self.mounts[cur.mount];
            match mount.mountpoint {
                Some(mp) => cur = self.node(mp)?,
                None => break,
            }
        }
        parts.reverse();
        Ok(format!("/{}", parts.join("/")))
    }

    fn assert_edge_consistency(&self, parent: NodeId, name: &str) {
        if cfg!(debug_assertions) {
            if let Some(Payload::Dir(children)) = self.nodes.get(parent).map(|n| &n.payload) {
                let in_map = children.get(name).copied();
                let in_index = self.name_index.get(&(parent, name.to_string())).copied();
                debug_assert_eq!(
                    in_map, in_index,
                    "directory map and name index disagree on ({parent}, {name})",
                );
            }
        }
    }
}

/// One virtual OS instance's filesystem.
pub struct Vfs {
    pub(crate) state: RwLock<VfsState>,
    pub(crate) streams: Mutex<Streams>,
    /// Char device streams registered against `Payload::Device` nodes that
    /// live in the in-memory tree.
    chardevs: Mutex<HashMap<NodeId, Arc<dyn StreamOps>>>,
    config: VfsConfig,
}

impl Vfs {
    pub fn new(config: VfsConfig) -> Arc<Self> {
        let mut nodes = Slab::new();
        let time = now();
        let root = nodes.insert(Node {
            id: ROOT_NODE,
            parent: ROOT_NODE,
            name: "/".to_string(),
            mode: crate::node::S_IFDIR | 0o777,
            ft: FileType::dir(),
            accessed: time,
            created: time,
            modified: time,
            mount: 0,
            mountpoint: None,
            payload: Payload::empty_dir(),
        });
        assert_eq!(root, ROOT_NODE, "the root must be the first arena entry");

        let state = VfsState {
            nodes,
            name_index: HashMap::new(),
            mounts: vec![Mount {
                backend: Arc::new(MemBackend::new()),
                root: ROOT_NODE,
                mountpoint: None,
                source: "mem".to_string(),
            }],
        };

        Arc::new(Self {
            state: RwLock::new(state),
            streams: Mutex::new(Streams::new(config.max_open_fds)),
            chardevs: Mutex::new(HashMap::new()),
            config,
        })
    }

    pub fn config(&self) -> &VfsConfig {
        &self.config
    }

    // === node helpers (the backend plugin surface) ===

    /// Insert a node under `parent`, updating the child map and the name
    /// index together.
    pub fn insert_node(
        &self,
        parent: NodeId,
        name: &str,
        ft: FileType,
        mode: u32,
        payload: Payload,
    ) -> Result<NodeId> {
        if name.is_empty() || name.contains('/') {
            return Err(FsError::InvalidInput);
        }
        if name.len() > path::NAME_MAX {
            return Err(FsError::NameTooLong);
        }

        let mut state = self.state.write().map_err(|_| FsError::Lock)?;

        let mount = state.node(parent)?.mount;
        match &state.node(parent)?.payload {
            Payload::Dir(children) => {
                if children.contains_key(name) {
                    return Err(FsError::AlreadyExists);
                }
            }
            Payload::Shadow => (),
            _ => return Err(FsError::NotADirectory),
        }

        let time = now();
        let entry = state.nodes.vacant_entry();
        let id = entry.key();
        entry.insert(Node {
            id,
            parent,
            name: name.to_string(),
            mode,
            ft,
            accessed: time,
            created: time,
            modified: time,
            mount,
            mountpoint: None,
            payload,
        });

        if let Payload::Dir(children) = &mut state.node_mut(parent)?.payload {
            children.insert(name.to_string(), id);
        }
        state.name_index.insert((parent, name.to_string()), id);
        state.node_mut(parent)?.touch_modified();
        state.assert_edge_consistency(parent, name);

        trace!(node = id, parent, name, "node created");
        Ok(id)
    }

    /// Insert a node that belongs to no directory (sockets, pipe ends). It
    /// is reachable only through a descriptor.
    pub fn insert_anonymous(&self, name: &str, ft: FileType, mode: u32, payload: Payload) -> NodeId {
        let mut state = self.state.write().unwrap();
        let time = now();
        let entry = state.nodes.vacant_entry();
        let id = entry.key();
        entry.insert(Node {
            id,
            parent: id,
            name: name.to_string(),
            mode,
            ft,
            accessed: time,
            created: time,
            modified: time,
            mount: 0,
            mountpoint: None,
            payload,
        });
        trace!(node = id, name, "anonymous node created");
        id
    }

    /// Unlink `name` from `parent` and drop the node, updating both edge
    /// structures together.
    pub fn remove_node(&self, parent: NodeId, name: &str) -> Result<NodeId> {
        let mut state = self.state.write().map_err(|_| FsError::Lock)?;

        let from_map = match &mut state.node_mut(parent)?.payload {
            Payload::Dir(children) => Some(children.remove(name).ok_or(FsError::EntryNotFound)?),
            Payload::Shadow => None,
            _ => return Err(FsError::NotADirectory),
        };
        let id = match from_map {
            Some(id) => id,
            None => state
                .name_index
                .get(&(parent, name.to_string()))
                .copied()
                .ok_or(FsError::EntryNotFound)?,
        };
        state.name_index.remove(&(parent, name.to_string()));
        state.nodes.remove(id);
        state.node_mut(parent)?.touch_modified();
        state.assert_edge_consistency(parent, name);

        trace!(node = id, parent, name, "node removed");
        Ok(id)
    }

    /// Move `node` under `new_parent` as `new_name`, updating both edge
    /// structures together. Replacement of an existing destination entry is
    /// the caller's (the backend's) responsibility.
    pub fn relink_node(&self, node: NodeId, new_parent: NodeId, new_name: &str) -> Result<()> {
        let mut state = self.state.write().map_err(|_| FsError::Lock)?;

        let (old_parent, old_name) = {
            let n = state.node(node)?;
            (n.parent, n.name.clone())
        };

        if let Payload::Dir(children) = &mut state.node_mut(old_parent)?.payload {
            children.remove(&old_name);
        }
        state.name_index.remove(&(old_parent, old_name));

        match &mut state.node_mut(new_parent)?.payload {
            Payload::Dir(children) => {
                children.insert(new_name.to_string(), node);
            }
            Payload::Shadow => (),
            _ => return Err(FsError::NotADirectory),
        }
        state.name_index.insert((new_parent, new_name.to_string()), node);

        let n = state.node_mut(node)?;
        n.parent = new_parent;
        n.name = new_name.to_string();
        n.touch_modified();
        state.node_mut(new_parent)?.touch_modified();
        state.assert_edge_consistency(new_parent, new_name);

        Ok(())
    }

    pub fn child_of(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        let state = self.state.read().unwrap();
        state.name_index.get(&(parent, name.to_string())).copied()
    }

    pub fn with_node<R>(&self, id: NodeId, f: impl FnOnce(&Node) -> R) -> Result<R> {
        let state = self.state.read().map_err(|_| FsError::Lock)?;
        Ok(f(state.node(id)?))
    }

    pub fn with_node_mut<R>(&self, id: NodeId, f: impl FnOnce(&mut Node) -> R) -> Result<R> {
        let mut state = self.state.write().map_err(|_| FsError::Lock)?;
        Ok(f(state.node_mut(id)?))
    }

    /// Run `f` over the file payload of `id`.
    pub fn with_file<R>(
        &self,
        id: NodeId,
        f: impl FnOnce(&mut crate::mem::FileBuffer) -> Result<R>,
    ) -> Result<R> {
        let mut state = self.state.write().map_err(|_| FsError::Lock)?;
        let node = state.node_mut(id)?;
        match &mut node.payload {
            Payload::File(buffer) => f(buffer),
            Payload::Dir(_) => Err(FsError::IsADirectory),
            _ => Err(FsError::InvalidInput),
        }
    }

    pub fn node_metadata(&self, id: NodeId) -> Result<Metadata> {
        self.with_node(id, |n| n.metadata())
    }

    pub fn mount_path_of(&self, id: NodeId) -> Result<String> {
        let state = self.state.read().map_err(|_| FsError::Lock)?;
        state.mount_path(id)
    }

    pub fn absolute_path_of(&self, id: NodeId) -> Result<String> {
        let state = self.state.read().map_err(|_| FsError::Lock)?;
        state.absolute_path(id)
    }

    pub fn backend_of(&self, id: NodeId) -> Result<Arc<dyn Backend>> {
        let state = self.state.read().map_err(|_| FsError::Lock)?;
        let mount = state.node(id)?.mount;
        Ok(state.mounts[mount].backend.clone())
    }

    // === mounts ===

    /// Mount `backend` over the directory at `path`. Traversal into that
    /// directory then continues inside the mounted tree.
    pub fn mount(&self, mountpoint: &str, backend: Arc<dyn Backend>, source: &str) -> Result<MountId> {
        let dir = self.resolve(mountpoint, LookupOptions::mountpoint())?;
        self.with_node(dir, |n| {
            if !n.ft.is_dir() {
                return Err(FsError::NotADirectory);
            }
            if n.mountpoint.is_some() {
                return Err(FsError::AlreadyExists);
            }
            Ok(())
        })??;

        let root_payload = backend.root_payload();
        let mut state = self.state.write().map_err(|_| FsError::Lock)?;
        let mount_id = state.mounts.len();
        let time = now();
        let entry = state.nodes.vacant_entry();
        let root = entry.key();
        entry.insert(Node {
            id: root,
            parent: root,
            name: "/".to_string(),
            mode: crate::node::S_IFDIR | 0o777,
            ft: FileType::dir(),
            accessed: time,
            created: time,
            modified: time,
            mount: mount_id,
            mountpoint: None,
            payload: root_payload,
        });
        state.mounts.push(Mount {
            backend,
            root,
            mountpoint: Some(dir),
            source: source.to_string(),
        });
        state.node_mut(dir)?.mountpoint = Some(mount_id);

        trace!(mount = mount_id, mountpoint, source, "backend mounted");
        Ok(mount_id)
    }

    // === resolution ===

    fn lookup_child(&self, parent: NodeId, name: &str) -> Result<NodeId> {
        if let Some(hit) = self.child_of(parent, name) {
            return Ok(hit);
        }
        let backend = self.backend_of(parent)?;
        backend.lookup(self, parent, name)
    }

    /// Walk `path` from the root, resolving symlinks (bounded) and crossing
    /// mountpoints.
    pub fn resolve(&self, raw_path: &str, opts: LookupOptions) -> Result<NodeId> {
        let mut pending = path::normalize(raw_path)?;
        let mut depth = 0u32;

        'restart: loop {
            let comps: Vec<String> = path::components(&pending).map(str::to_string).collect();
            let mut node = ROOT_NODE;

            for (i, name) in comps.iter().enumerate() {
                let last = i + 1 == comps.len();

                let (is_dir, mountpoint) =
                    self.with_node(node, |n| (n.ft.is_dir(), n.mountpoint))?;
                if !is_dir {
                    return Err(FsError::NotADirectory);
                }
                // Stepping *through* a mountpoint directory always crosses.
                if let Some(mount) = mountpoint {
                    node = self.mount_root(mount)?;
                }
                self.check_access(node, AccessMode::Execute)?;

                let child = self.lookup_child(node, name)?;
                let (child_ft, child_mp) =
                    self.with_node(child, |n| (n.ft, n.mountpoint))?;

                if child_ft.is_symlink() && (!last || opts.follow_symlinks) {
                    depth += 1;
                    if depth > self.config.symlink_depth {
                        return Err(FsError::TooManySymlinks);
                    }
                    let target = self.backend_of(child)?.readlink(self, child)?;
                    let parent_path = self.absolute_path_of(node)?;
                    let mut next = path::join(&parent_path, &target)?;
                    for rest in &comps[i + 1..] {
                        next = path::join(&next, rest)?;
                    }
                    pending = next;
                    continue 'restart;
                }

                if last {
                    if let Some(mount) = child_mp {
                        if opts.follow_mounts {
                            return self.mount_root(mount);
                        }
                    }
                    return Ok(child);
                }
                node = child;
            }

            // Empty component list: the path normalized to "/".
            return Ok(ROOT_NODE);
        }
    }

    /// Resolve the parent directory of `path` and return it with the final
    /// component. The parent has its mountpoint crossed, so the returned
    /// node is the directory new entries actually land in.
    pub fn resolve_parent(&self, raw_path: &str, opts: LookupOptions) -> Result<(NodeId, String)> {
        let normalized = path::normalize(raw_path)?;
        let (parent, name) = path::split(&normalized).ok_or(FsError::InvalidInput)?;
        let mut dir = self.resolve(parent, opts)?;
        let mountpoint = self.with_node(dir, |n| n.mountpoint)?;
        if let Some(mount) = mountpoint {
            dir = self.mount_root(mount)?;
        }
        let is_dir = self.with_node(dir, |n| n.ft.is_dir())?;
        if !is_dir {
            return Err(FsError::NotADirectory);
        }
        Ok((dir, name.to_string()))
    }

    fn mount_root(&self, mount: MountId) -> Result<NodeId> {
        let state = self.state.read().map_err(|_| FsError::Lock)?;
        state
            .mounts
            .get(mount)
            .map(|m| m.root)
            .ok_or(FsError::UnknownError)
    }

    fn check_access(&self, node: NodeId, mode: AccessMode) -> Result<()> {
        if !self.config.enforce_permissions {
            return Ok(());
        }
        let bits = self.with_node(node, |n| n.mode)?;
        let wanted = match mode {
            AccessMode::Read => 0o400,
            AccessMode::Write => 0o200,
            AccessMode::Execute => 0o100,
        };
        if bits & wanted == 0 {
            return Err(FsError::PermissionDenied);
        }
        Ok(())
    }

    // === path-level operations ===

    pub fn stat(&self, path: &str) -> Result<Metadata> {
        let node = self.resolve(path, LookupOptions::default())?;
        self.backend_of(node)?.getattr(self, node)
    }

    pub fn lstat(&self, path: &str) -> Result<Metadata> {
        let node = self.resolve(path, LookupOptions::no_follow())?;
        self.backend_of(node)?.getattr(self, node)
    }

    pub fn set_attr(&self, path: &str, set: &SetAttr) -> Result<()> {
        let node = self.resolve(path, LookupOptions::default())?;
        self.backend_of(node)?.setattr(self, node, set)
    }

    pub fn mkdir(&self, path: &str, mode: u32) -> Result<NodeId> {
        let (parent, name) = self.resolve_parent(path, LookupOptions::default())?;
        if self.lookup_child(parent, &name).is_ok() {
            return Err(FsError::AlreadyExists);
        }
        self.check_access(parent, AccessMode::Write)?;
        let backend = self.backend_of(parent)?;
        backend.mknod(self, parent, &name, crate::node::S_IFDIR | (mode & 0o7777))
    }

    pub fn rmdir(&self, path: &str) -> Result<()> {
        let (parent, name) = self.resolve_parent(path, LookupOptions::default())?;
        let node = self.lookup_child(parent, &name)?;
        let (is_dir, is_mountpoint) =
            self.with_node(node, |n| (n.ft.is_dir(), n.mountpoint.is_some()))?;
        if !is_dir {
            return Err(FsError::NotADirectory);
        }
        if is_mountpoint {
            return Err(FsError::InvalidInput);
        }
        self.check_access(parent, AccessMode::Write)?;
        self.backend_of(parent)?.rmdir(self, parent, &name)
    }

    pub fn unlink(&self, path: &str) -> Result<()> {
        let (parent, name) = self.resolve_parent(path, LookupOptions::default())?;
        let node = self.lookup_child(parent, &name)?;
        if self.with_node(node, |n| n.ft.is_dir())? {
            return Err(FsError::IsADirectory);
        }
        self.check_access(parent, AccessMode::Write)?;
        self.backend_of(parent)?.unlink(self, parent, &name)
    }

    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        let (from_parent, from_name) = self.resolve_parent(from, LookupOptions::default())?;
        let (to_parent, to_name) = self.resolve_parent(to, LookupOptions::default())?;

        let node = self.lookup_child(from_parent, &from_name)?;

        // Same mount on both sides, or the rename is a cross-device copy the
        // caller has to do themselves.
        let from_mount = self.with_node(from_parent, |n| n.mount)?;
        let to_mount = self.with_node(to_parent, |n| n.mount)?;
        if from_mount != to_mount {
            return Err(FsError::CrossDevice);
        }

        // A directory cannot move into its own subtree.
        let node_is_dir = self.with_node(node, |n| n.ft.is_dir())?;
        if node_is_dir {
            let mut cursor = to_parent;
            loop {
                if cursor == node {
                    return Err(FsError::InvalidInput);
                }
                let parent = self.with_node(cursor, |n| n.parent)?;
                if parent == cursor {
                    break;
                }
                cursor = parent;
            }
        }

        // Replacing an existing destination: a non-empty directory refuses.
        if let Ok(existing) = self.lookup_child(to_parent, &to_name) {
            if existing == node {
                return Ok(());
            }
            let (ex_dir, ex_children) = self.with_node(existing, |n| {
                (
                    n.ft.is_dir(),
                    match &n.payload {
                        Payload::Dir(children) => children.len(),
                        _ => 0,
                    },
                )
            })?;
            if ex_dir {
                if !node_is_dir {
                    return Err(FsError::IsADirectory);
                }
                if ex_children > 0 {
                    return Err(FsError::DirectoryNotEmpty);
                }
            } else if node_is_dir {
                return Err(FsError::NotADirectory);
            }
            self.backend_of(to_parent)?.unlink(self, to_parent, &to_name)?;
        }

        self.check_access(from_parent, AccessMode::Write)?;
        self.check_access(to_parent, AccessMode::Write)?;
        self.backend_of(node)?.rename(self, node, to_parent, &to_name)
    }

    pub fn symlink(&self, target: &str, linkpath: &str) -> Result<NodeId> {
        let (parent, name) = self.resolve_parent(linkpath, LookupOptions::default())?;
        if self.lookup_child(parent, &name).is_ok() {
            return Err(FsError::AlreadyExists);
        }
        self.backend_of(parent)?.symlink(self, parent, &name, target)
    }

    pub fn readlink(&self, path: &str) -> Result<String> {
        let node = self.resolve(path, LookupOptions::no_follow())?;
        if !self.with_node(node, |n| n.ft.is_symlink())? {
            return Err(FsError::InvalidInput);
        }
        self.backend_of(node)?.readlink(self, node)
    }

    pub fn readdir_path(&self, path: &str) -> Result<Vec<DirEntry>> {
        let node = self.resolve(path, LookupOptions::default())?;
        self.check_access(node, AccessMode::Read)?;
        self.backend_of(node)?.readdir(self, node)
    }

    pub fn readdir_fd(&self, fd: Fd) -> Result<Vec<DirEntry>> {
        let stream = self.stream(fd)?;
        self.backend_of(stream.node)?.readdir(self, stream.node)
    }

    /// Register a character device at `path`; reads and writes on the node
    /// go through `ops`.
    pub fn register_chardev(&self, path: &str, ops: Arc<dyn StreamOps>) -> Result<NodeId> {
        let (parent, name) = self.resolve_parent(path, LookupOptions::default())?;
        if self.lookup_child(parent, &name).is_ok() {
            return Err(FsError::AlreadyExists);
        }
        let ft = FileType {
            char_device: true,
            ..Default::default()
        };
        let node = self.insert_node(
            parent,
            &name,
            ft,
            crate::node::S_IFCHR | 0o666,
            Payload::Device(0),
        )?;
        self.chardevs.lock().unwrap().insert(node, ops);
        Ok(node)
    }

    pub(crate) fn chardev_ops(&self, node: NodeId) -> Option<Arc<dyn StreamOps>> {
        self.chardevs.lock().unwrap().get(&node).cloned()
    }

    // === descriptor-level operations ===

    /// Open `path` with `flags`, allocating a descriptor.
    pub fn open_path(&self, raw_path: &str, flags: OpenFlags, mode: u32) -> Result<Fd> {
        let opts = if flags.contains(OpenFlags::NOFOLLOW) {
            LookupOptions::no_follow()
        } else {
            LookupOptions::default()
        };

        let mut just_created = false;
        let node = match self.resolve(raw_path, opts) {
            Ok(node) => {
                if flags.contains(OpenFlags::CREATE | OpenFlags::EXCLUSIVE) {
                    return Err(FsError::AlreadyExists);
                }
                node
            }
            Err(FsError::EntryNotFound) if flags.contains(OpenFlags::CREATE) => {
                let (parent, name) = self.resolve_parent(raw_path, opts)?;
                self.check_access(parent, AccessMode::Write)?;
                let backend = self.backend_of(parent)?;
                just_created = true;
                backend.mknod(
                    self,
                    parent,
                    &name,
                    crate::node::S_IFREG | (mode & 0o7777),
                )?
            }
            Err(err) => return Err(err),
        };

        let ft = self.with_node(node, |n| n.ft)?;
        if ft.is_dir() && flags.writable() {
            return Err(FsError::IsADirectory);
        }
        if flags.contains(OpenFlags::DIRECTORY) && !ft.is_dir() {
            return Err(FsError::NotADirectory);
        }
        if ft.is_symlink() {
            // Only reachable with NOFOLLOW.
            return Err(FsError::TooManySymlinks);
        }
        if !just_created {
            if flags.readable() {
                self.check_access(node, AccessMode::Read)?;
            }
            if flags.writable() {
                self.check_access(node, AccessMode::Write)?;
            }
        }

        let backend = self.backend_of(node)?;
        let ops = backend.open(self, node, flags)?;

        if flags.contains(OpenFlags::TRUNCATE) && flags.writable() {
            backend.setattr(self, node, &SetAttr {
                len: Some(0),
                ..Default::default()
            })?;
        }

        let stream = OpenStream::new(node, flags, ft.is_file() || ft.is_dir(), ops);
        if flags.contains(OpenFlags::APPEND) {
            let len = backend.getattr(self, node)?.len;
            stream.set_position(len);
        }
        self.insert_stream(stream)
    }

    pub fn insert_stream(&self, stream: OpenStream) -> Result<Fd> {
        self.streams.lock().unwrap().insert(stream)
    }

    pub fn stream(&self, fd: Fd) -> Result<OpenStream> {
        self.streams.lock().unwrap().get(fd).map(|s| s.clone())
    }

    pub fn close_fd(&self, fd: Fd) -> Result<()> {
        let stream = self.streams.lock().unwrap().remove(fd)?;
        stream.ops.close(self, &stream)?;
        trace!(fd, node = stream.node, "descriptor closed");
        Ok(())
    }

    pub fn dup_fd(&self, fd: Fd) -> Result<Fd> {
        let mut streams = self.streams.lock().unwrap();
        let copy = streams.get(fd)?.clone();
        streams.insert(copy)
    }

    pub fn dup2_fd(&self, fd: Fd, new_fd: Fd) -> Result<Fd> {
        if fd == new_fd {
            self.streams.lock().unwrap().get(fd)?;
            return Ok(new_fd);
        }
        let displaced = {
            let mut streams = self.streams.lock().unwrap();
            let copy = streams.get(fd)?.clone();
            streams.insert_at(new_fd, copy)?
        };
        if let Some(old) = displaced {
            old.ops.close(self, &old)?;
        }
        Ok(new_fd)
    }

    pub fn read_fd(&self, fd: Fd, buf: &mut [u8]) -> Result<usize> {
        let stream = self.stream(fd)?;
        if !stream.flags.readable() {
            return Err(FsError::InvalidFd);
        }
        stream.ops.read(self, &stream, buf)
    }

    pub fn write_fd(&self, fd: Fd, buf: &[u8]) -> Result<usize> {
        let stream = self.stream(fd)?;
        if !stream.flags.writable() {
            return Err(FsError::InvalidFd);
        }
        stream.ops.write(self, &stream, buf)
    }

    pub fn seek_fd(&self, fd: Fd, offset: i64, whence: Whence) -> Result<u64> {
        let stream = self.stream(fd)?;
        if !stream.seekable {
            return Err(FsError::NotSeekable);
        }
        stream.ops.llseek(self, &stream, offset, whence)
    }

    pub fn fstat(&self, fd: Fd) -> Result<Metadata> {
        let stream = self.stream(fd)?;
        self.backend_of(stream.node)?.getattr(self, stream.node)
    }

    pub fn truncate_fd(&self, fd: Fd, len: u64) -> Result<()> {
        let stream = self.stream(fd)?;
        if !stream.flags.writable() {
            return Err(FsError::InvalidFd);
        }
        self.backend_of(stream.node)?.setattr(self, stream.node, &SetAttr {
            len: Some(len),
            ..Default::default()
        })
    }

    pub fn fsync_fd(&self, fd: Fd) -> Result<()> {
        let stream = self.stream(fd)?;
        stream.ops.fsync(self, &stream)
    }

    pub fn poll_fd(&self, fd: Fd) -> Result<crate::PollFlags> {
        let stream = self.stream(fd)?;
        stream.ops.poll(self, &stream)
    }

    pub fn allocate_fd(&self, fd: Fd, len: u64) -> Result<()> {
        let stream = self.stream(fd)?;
        stream.ops.allocate(self, &stream, len)
    }

    pub fn mmap_fd(&self, fd: Fd, offset: u64, len: usize) -> Result<Vec<u8>> {
        let stream = self.stream(fd)?;
        stream.ops.mmap(self, &stream, offset, len)
    }

    pub fn msync_fd(&self, fd: Fd, offset: u64, data: &[u8]) -> Result<()> {
        let stream = self.stream(fd)?;
        if !stream.flags.writable() {
            return Err(FsError::InvalidFd);
        }
        stream.ops.msync(self, &stream, offset, data)
    }

    pub fn ioctl_fd(&self, fd: Fd, request: u32, arg: &mut [u8]) -> Result<i32> {
        let stream = self.stream(fd)?;
        stream.ops.ioctl(self, &stream, request, arg)
    }
}

impl std::fmt::Debug for Vfs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read().unwrap();
        f.debug_struct("Vfs")
            .field("nodes", &state.nodes.len())
            .field("mounts", &state.mounts.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_fs() -> Arc<Vfs> {
        Vfs::new(VfsConfig::default())
    }

    fn write_file(fs: &Vfs, path: &str, data: &[u8]) -> Fd {
        let fd = fs
            .open_path(path, OpenFlags::READ_WRITE | OpenFlags::CREATE, 0o644)
            .unwrap();
        assert_eq!(fs.write_fd(fd, data).unwrap(), data.len());
        fd
    }

    #[test]
    fn create_and_remove_directories() {
        let fs = new_fs();

        assert_eq!(
            fs.mkdir("/", 0o755),
            Err(FsError::InvalidInput),
            "creating the root which already exists",
        );
        assert_eq!(fs.mkdir("/foo", 0o755).is_ok(), true, "creating a directory");
        assert!(fs.mkdir("/foo/bar", 0o755).is_ok(), "creating a sub-directory");
        assert_eq!(
            fs.mkdir("/foo", 0o755),
            Err(FsError::AlreadyExists),
            "creating a directory that exists",
        );

        assert_eq!(
            fs.rmdir("/foo"),
            Err(FsError::DirectoryNotEmpty),
            "removing a directory that has children",
        );
        assert_eq!(fs.rmdir("/foo/bar"), Ok(()), "removing a sub-directory");
        assert_eq!(fs.rmdir("/foo"), Ok(()), "removing a directory");
        assert_eq!(
            fs.rmdir("/foo"),
            Err(FsError::EntryNotFound),
            "cannot remove a directory that doesn't exist",
        );
    }

    #[test]
    fn write_then_read_round_trips() {
        let fs = new_fs();
        fs.mkdir("/tmp", 0o755).unwrap();

        let fd = write_file(&fs, "/tmp/a", b"hello");
        assert_eq!(fs.seek_fd(fd, 0, Whence::Set), Ok(0));
        let mut buf = [0u8; 5];
        assert_eq!(fs.read_fd(fd, &mut buf), Ok(5));
        assert_eq!(&buf, b"hello");
        fs.close_fd(fd).unwrap();
    }

    #[test]
    fn seek_write_extends_the_file() {
        let fs = new_fs();
        fs.mkdir("/tmp", 0o755).unwrap();

        // create /tmp/a with "hello"; seek to 5; write " world"; read all.
        let fd = write_file(&fs, "/tmp/a", b"hello");
        assert_eq!(fs.seek_fd(fd, 5, Whence::Set), Ok(5));
        assert_eq!(fs.write_fd(fd, b" world"), Ok(6));
        assert_eq!(fs.seek_fd(fd, 0, Whence::Set), Ok(0));
        let mut buf = [0u8; 16];
        assert_eq!(fs.read_fd(fd, &mut buf), Ok(11));
        assert_eq!(&buf[..11], b"hello world");
        fs.close_fd(fd).unwrap();
    }

    #[test]
    fn rename_replaces_files_but_not_full_directories() {
        let fs = new_fs();
        fs.mkdir("/a", 0o755).unwrap();
        fs.mkdir("/b", 0o755).unwrap();
        fs.mkdir("/b/full", 0o755).unwrap();
        fs.close_fd(write_file(&fs, "/b/full/inner", b"x")).unwrap();
        fs.close_fd(write_file(&fs, "/a/file", b"data")).unwrap();

        assert_eq!(
            fs.rename("/a", "/b/full"),
            Err(FsError::DirectoryNotEmpty),
            "renaming a directory onto a non-empty directory",
        );
        assert_eq!(
            fs.rename("/a", "/a/sub"),
            Err(FsError::InvalidInput),
            "renaming a directory into its own subtree",
        );

        fs.close_fd(write_file(&fs, "/b/other", b"old")).unwrap();
        assert_eq!(fs.rename("/a/file", "/b/other"), Ok(()), "replacing a file");
        let fd = fs.open_path("/b/other", OpenFlags::empty(), 0).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(fs.read_fd(fd, &mut buf), Ok(4));
        assert_eq!(&buf[..4], b"data");
        fs.close_fd(fd).unwrap();
        assert_eq!(
            fs.stat("/a/file").unwrap_err(),
            FsError::EntryNotFound,
            "the source entry is gone",
        );
    }

    #[test]
    fn rename_across_mounts_is_cross_device() {
        let fs = new_fs();
        fs.mkdir("/mnt", 0o755).unwrap();
        fs.mount("/mnt", Arc::new(MemBackend::new()), "mem").unwrap();
        fs.close_fd(write_file(&fs, "/file", b"x")).unwrap();

        assert_eq!(fs.rename("/file", "/mnt/file"), Err(FsError::CrossDevice));
    }

    #[test]
    fn symlinks_resolve_with_a_depth_bound() {
        let fs = new_fs();
        fs.mkdir("/data", 0o755).unwrap();
        fs.close_fd(write_file(&fs, "/data/real", b"content")).unwrap();

        fs.symlink("/data/real", "/link").unwrap();
        assert_eq!(fs.stat("/link").unwrap().len, 7, "stat follows the link");
        assert_eq!(fs.lstat("/link").unwrap().ft.is_symlink(), true);
        assert_eq!(fs.readlink("/link").unwrap(), "/data/real");

        let fd = fs.open_path("/link", OpenFlags::empty(), 0).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(fs.read_fd(fd, &mut buf), Ok(7));
        fs.close_fd(fd).unwrap();

        // A two-cycle of symlinks exhausts the depth bound.
        fs.symlink("/loop_b", "/loop_a").unwrap();
        fs.symlink("/loop_a", "/loop_b").unwrap();
        assert_eq!(fs.stat("/loop_a").unwrap_err(), FsError::TooManySymlinks);
    }

    #[test]
    fn relative_symlink_targets_resolve_against_their_directory() {
        let fs = new_fs();
        fs.mkdir("/dir", 0o755).unwrap();
        fs.close_fd(write_file(&fs, "/dir/target", b"ok")).unwrap();
        fs.symlink("target", "/dir/rel").unwrap();

        assert_eq!(fs.stat("/dir/rel").unwrap().len, 2);
    }

    #[test]
    fn mountpoints_are_crossed_transparently() {
        let fs = new_fs();
        fs.mkdir("/mnt", 0o755).unwrap();
        fs.mount("/mnt", Arc::new(MemBackend::new()), "mem").unwrap();

        fs.mkdir("/mnt/inside", 0o755).unwrap();
        assert!(fs.stat("/mnt/inside").unwrap().is_dir());

        // The mountpoint node itself is still addressable on request.
        let crossed = fs.resolve("/mnt", LookupOptions::default()).unwrap();
        let mountpoint = fs.resolve("/mnt", LookupOptions::mountpoint()).unwrap();
        assert_ne!(crossed, mountpoint);
        assert!(fs
            .with_node(mountpoint, |n| n.mountpoint.is_some())
            .unwrap());
    }

    #[test]
    fn unlink_rejects_directories() {
        let fs = new_fs();
        fs.mkdir("/d", 0o755).unwrap();
        assert_eq!(fs.unlink("/d"), Err(FsError::IsADirectory));
        fs.close_fd(write_file(&fs, "/f", b"x")).unwrap();
        assert_eq!(fs.unlink("/f"), Ok(()));
        assert_eq!(fs.stat("/f").unwrap_err(), FsError::EntryNotFound);
    }

    #[test]
    fn open_flags_behave() {
        let fs = new_fs();
        fs.close_fd(write_file(&fs, "/f", b"0123456789")).unwrap();

        assert_eq!(
            fs.open_path("/f", OpenFlags::CREATE | OpenFlags::EXCLUSIVE, 0o644)
                .unwrap_err(),
            FsError::AlreadyExists,
            "exclusive create on an existing file",
        );

        let fd = fs
            .open_path("/f", OpenFlags::WRITE_ONLY | OpenFlags::TRUNCATE, 0)
            .unwrap();
        fs.close_fd(fd).unwrap();
        assert_eq!(fs.stat("/f").unwrap().len, 0, "truncate empties the file");

        fs.close_fd(write_file(&fs, "/f", b"base")).unwrap();
        let fd = fs
            .open_path("/f", OpenFlags::WRITE_ONLY | OpenFlags::APPEND, 0)
            .unwrap();
        fs.write_fd(fd, b"+tail").unwrap();
        fs.close_fd(fd).unwrap();
        assert_eq!(fs.stat("/f").unwrap().len, 9, "append lands at the end");

        assert_eq!(
            fs.open_path("/", OpenFlags::WRITE_ONLY, 0).unwrap_err(),
            FsError::IsADirectory,
        );
        assert_eq!(
            fs.open_path("/f", OpenFlags::DIRECTORY, 0).unwrap_err(),
            FsError::NotADirectory,
        );
    }

    #[test]
    fn readdir_lists_the_child_map() {
        let fs = new_fs();
        fs.mkdir("/dir", 0o755).unwrap();
        fs.mkdir("/dir/sub", 0o755).unwrap();
        fs.close_fd(write_file(&fs, "/dir/a.txt", b"a")).unwrap();
        fs.close_fd(write_file(&fs, "/dir/b.txt", b"b")).unwrap();
        fs.unlink("/dir/a.txt").unwrap();
        fs.rename("/dir/b.txt", "/dir/c.txt").unwrap();

        let mut names: Vec<String> = fs
            .readdir_path("/dir")
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["c.txt".to_string(), "sub".to_string()]);
    }

    #[test]
    fn mmap_copies_out_and_msync_writes_back() {
        let fs = new_fs();
        let fd = write_file(&fs, "/mapped", b"0123456789");

        let view = fs.mmap_fd(fd, 2, 4).unwrap();
        assert_eq!(&view, b"2345");

        fs.msync_fd(fd, 2, b"XXXX").unwrap();
        let mut buf = [0u8; 10];
        fs.seek_fd(fd, 0, Whence::Set).unwrap();
        assert_eq!(fs.read_fd(fd, &mut buf), Ok(10));
        assert_eq!(&buf, b"01XXXX6789");

        fs.allocate_fd(fd, 32).unwrap();
        assert_eq!(fs.stat("/mapped").unwrap().len, 32, "allocate grows the file");
        fs.close_fd(fd).unwrap();
    }

    #[test]
    fn permission_checks_can_be_enabled() {
        let fs = Vfs::new(VfsConfig {
            enforce_permissions: true,
            ..Default::default()
        });
        fs.close_fd(
            fs.open_path("/locked", OpenFlags::READ_WRITE | OpenFlags::CREATE, 0o000)
                .unwrap(),
        )
        .unwrap();
        assert_eq!(
            fs.open_path("/locked", OpenFlags::empty(), 0).unwrap_err(),
            FsError::PermissionDenied,
        );
    }
}
