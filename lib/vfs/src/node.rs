use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

use crate::mem::FileBuffer;

/// Index of a node in the arena. Parents are stored as plain indices so the
/// graph carries no reference cycles.
pub type NodeId = usize;

/// Key of a mount in the mount table.
pub type MountId = usize;

/// Opaque handle a device-backed node carries into its owning registry
/// (socket table, pipe table, char device table).
pub type DeviceId = u64;

pub const S_IFMT: u32 = 0o170000;
pub const S_IFIFO: u32 = 0o010000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFSOCK: u32 = 0o140000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct FileType {
    pub dir: bool,
    pub file: bool,
    pub symlink: bool,
    pub char_device: bool,
    pub socket: bool,
    pub fifo: bool,
}

impl FileType {
    pub fn is_dir(&self) -> bool {
        self.dir
    }

    pub fn is_file(&self) -> bool {
        self.file
    }

    pub fn is_symlink(&self) -> bool {
        self.symlink
    }

    pub const fn dir() -> Self {
        Self {
            dir: true,
            file: false,
            symlink: false,
            char_device: false,
            socket: false,
            fifo: false,
        }
    }

    pub const fn file() -> Self {
        Self {
            dir: false,
            file: true,
            symlink: false,
            char_device: false,
            socket: false,
            fifo: false,
        }
    }

    pub const fn symlink() -> Self {
        Self {
            dir: false,
            file: false,
            symlink: true,
            char_device: false,
            socket: false,
            fifo: false,
        }
    }

    /// The `S_IFMT` bits for this type.
    pub fn as_mode_bits(&self) -> u32 {
        if self.dir {
            S_IFDIR
        } else if self.symlink {
            S_IFLNK
        } else if self.char_device {
            S_IFCHR
        } else if self.socket {
            S_IFSOCK
        } else if self.fifo {
            S_IFIFO
        } else {
            S_IFREG
        }
    }

    pub fn from_mode_bits(mode: u32) -> Self {
        let mut ft = FileType::default();
        match mode & S_IFMT {
            S_IFDIR => ft.dir = true,
            S_IFLNK => ft.symlink = true,
            S_IFCHR => ft.char_device = true,
            S_IFSOCK => ft.socket = true,
            S_IFIFO => ft.fifo = true,
            _ => ft.file = true,
        }
        ft
    }
}

/// Node metadata as reported by `getattr`. Timestamps are nanoseconds since
/// the UNIX epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Metadata {
    pub ft: FileType,
    pub mode: u32,
    pub accessed: u64,
    pub created: u64,
    pub modified: u64,
    pub len: u64,
}

impl Metadata {
    pub fn is_dir(&self) -> bool {
        self.ft.is_dir()
    }

    pub fn is_file(&self) -> bool {
        self.ft.is_file()
    }

    pub fn is_symlink(&self) -> bool {
        self.ft.is_symlink()
    }
}

/// Attribute changes accepted by `setattr`. `None` fields are untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetAttr {
    pub mode: Option<u32>,
    pub len: Option<u64>,
    pub accessed: Option<u64>,
    pub modified: Option<u64>,
}

/// Type-specific node payload.
#[derive(Debug)]
pub enum Payload {
    /// Regular file bytes (in-memory backends).
    File(FileBuffer),
    /// Directory children by name. The global name index mirrors this map.
    Dir(BTreeMap<String, NodeId>),
    /// Symlink target, as written.
    Symlink(String),
    /// A node whose data lives in the delegate filesystem; the host path is
    /// derived from the node's position inside the mount.
    Shadow,
    /// Char device, socket or pipe handle into the owning registry.
    Device(DeviceId),
}

impl Payload {
    pub fn empty_dir() -> Self {
        Payload::Dir(BTreeMap::new())
    }
}

/// An entry in the virtual filesystem's identity graph.
#[derive(Debug)]
pub struct Node {
    pub id: NodeId,
    /// Owning parent directory. The root is its own parent. Stored as an
    /// index, never as a strong reference.
    pub parent: NodeId,
    pub name: String,
    pub mode: u32,
    pub ft: FileType,
    pub accessed: u64,
    pub created: u64,
    pub modified: u64,
    /// The mount this node belongs to.
    pub mount: MountId,
    /// When set, traversal into this directory continues at the root of the
    /// given mount.
    pub mountpoint: Option<MountId>,
    pub payload: Payload,
}

impl Node {
    pub fn metadata(&self) -> Metadata {
        let len = match &self.payload {
            Payload::File(buffer) => buffer.len() as u64,
            Payload::Symlink(target) => target.len() as u64,
            _ => 0,
        };
        Metadata {
            ft: self.ft,
            mode: self.mode,
            accessed: self.accessed,
            created: self.created,
            modified: self.modified,
            len,
        }
    }

    pub fn touch_modified(&mut self) {
        self.modified = now();
    }
}

/// A single directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub ino: u64,
    pub ft: FileType,
}

pub(crate) fn now() -> u64 {
    // SAFETY: It's very unlikely that the system returns a time that
    // is before `UNIX_EPOCH` :-).
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos() as u64
}
