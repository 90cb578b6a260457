//! Host-filesystem passthrough backend. Every node operation maps 1:1 onto a
//! `std::fs` call under a configured host root; host errors are translated
//! into the node error taxonomy at this boundary and never leak upward.

use std::fs as stdfs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::UNIX_EPOCH;

use tracing::trace;

use crate::{
    Backend, DirEntry, FileType, FsError, Metadata, NodeId, OpenFlags, OpenStream, Payload,
    Result, SetAttr, StreamOps, Vfs, Whence,
};

/// Mount backend that delegates to a subtree of the host filesystem.
#[derive(Debug)]
pub struct HostBackend {
    root: PathBuf,
}

impl HostBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn host_path(&self, fs: &Vfs, node: NodeId) -> Result<PathBuf> {
        let rel = fs.mount_path_of(node)?;
        Ok(self.root.join(rel.trim_start_matches('/')))
    }

    fn metadata_of(path: &Path) -> Result<Metadata> {
        let meta = stdfs::symlink_metadata(path)?;
        Ok(host_metadata(&meta))
    }
}

fn system_time_nanos(time: std::io::Result<std::time::SystemTime>) -> u64 {
    time.ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

fn host_metadata(meta: &stdfs::Metadata) -> Metadata {
    let ft = if meta.file_type().is_dir() {
        FileType::dir()
    } else if meta.file_type().is_symlink() {
        FileType::symlink()
    } else {
        FileType::file()
    };

    #[cfg(unix)]
    let mode = {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode()
    };
    #[cfg(not(unix))]
    let mode = ft.as_mode_bits() | if meta.permissions().readonly() { 0o444 } else { 0o644 };

    Metadata {
        ft,
        mode,
        accessed: system_time_nanos(meta.accessed()),
        created: system_time_nanos(meta.created()),
        modified: system_time_nanos(meta.modified()),
        len: meta.len(),
    }
}

impl Backend for HostBackend {
    fn root_payload(&self) -> Payload {
        Payload::Shadow
    }

    fn getattr(&self, fs: &Vfs, node: NodeId) -> Result<Metadata> {
        let path = self.host_path(fs, node)?;
        Self::metadata_of(&path)
    }

    fn setattr(&self, fs: &Vfs, node: NodeId, set: &SetAttr) -> Result<()> {
        let path = self.host_path(fs, node)?;
        if let Some(len) = set.len {
            let file = stdfs::OpenOptions::new().write(true).open(&path)?;
            file.set_len(len)?;
        }
        #[cfg(unix)]
        if let Some(mode) = set.mode {
            use std::os::unix::fs::PermissionsExt;
            stdfs::set_permissions(&path, stdfs::Permissions::from_mode(mode & 0o7777))?;
        }
        Ok(())
    }

    fn lookup(&self, fs: &Vfs, parent: NodeId, name: &str) -> Result<NodeId> {
        let path = self.host_path(fs, parent)?.join(name);
        let meta = stdfs::symlink_metadata(&path).map_err(FsError::from)?;
        let host = host_metadata(&meta);

        // Materialize a shadow node for the entry; its data stays on the
        // host, only the identity lives in the arena.
        let payload = if host.ft.is_symlink() {
            let target = stdfs::read_link(&path)?;
            Payload::Symlink(target.to_string_lossy().into_owned())
        } else {
            Payload::Shadow
        };
        let node = fs.insert_node(parent, name, host.ft, host.mode, payload)?;
        trace!(node, name, path = %path.display(), "host entry materialized");
        Ok(node)
    }

    fn mknod(&self, fs: &Vfs, parent: NodeId, name: &str, mode: u32) -> Result<NodeId> {
        let path = self.host_path(fs, parent)?.join(name);
        let ft = FileType::from_mode_bits(mode);
        if ft.is_dir() {
            stdfs::create_dir(&path)?;
        } else if ft.is_file() {
            stdfs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)?;
        } else {
            return Err(FsError::NotSupported);
        }
        fs.insert_node(parent, name, ft, mode, Payload::Shadow)
    }

    fn rename(&self, fs: &Vfs, node: NodeId, new_parent: NodeId, new_name: &str) -> Result<()> {
        let from = self.host_path(fs, node)?;
        let to = self.host_path(fs, new_parent)?.join(new_name);
        stdfs::rename(&from, &to)?;
        fs.relink_node(node, new_parent, new_name)
    }

    fn unlink(&self, fs: &Vfs, parent: NodeId, name: &str) -> Result<()> {
        let path = self.host_path(fs, parent)?.join(name);
        let meta = stdfs::symlink_metadata(&path)?;
        if meta.file_type().is_dir() {
            stdfs::remove_dir(&path)?;
        } else {
            stdfs::remove_file(&path)?;
        }
        fs.remove_node(parent, name).map(|_| ())
    }

    fn rmdir(&self, fs: &Vfs, parent: NodeId, name: &str) -> Result<()> {
        let path = self.host_path(fs, parent)?.join(name);
        if stdfs::read_dir(&path)?.next().is_some() {
            return Err(FsError::DirectoryNotEmpty);
        }
        stdfs::remove_dir(&path)?;
        fs.remove_node(parent, name).map(|_| ())
    }

    fn readdir(&self, fs: &Vfs, node: NodeId) -> Result<Vec<DirEntry>> {
        let path = self.host_path(fs, node)?;
        let mut entries = Vec::new();
        for entry in stdfs::read_dir(&path)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                ino: 0,
                ft: host_metadata(&meta).ft,
            });
        }
        Ok(entries)
    }

    #[cfg(unix)]
    fn symlink(&self, fs: &Vfs, parent: NodeId, name: &str, target: &str) -> Result<NodeId> {
        let path = self.host_path(fs, parent)?.join(name);
        std::os::unix::fs::symlink(target, &path)?;
        fs.insert_node(
            parent,
            name,
            FileType::symlink(),
            crate::node::S_IFLNK | 0o777,
            Payload::Symlink(target.to_string()),
        )
    }

    fn readlink(&self, fs: &Vfs, node: NodeId) -> Result<String> {
        let path = self.host_path(fs, node)?;
        Ok(stdfs::read_link(&path)?.to_string_lossy().into_owned())
    }

    fn open(&self, fs: &Vfs, node: NodeId, flags: OpenFlags) -> Result<Arc<dyn StreamOps>> {
        let path = self.host_path(fs, node)?;
        if fs.with_node(node, |n| n.ft.is_dir())? {
            return Ok(Arc::new(HostDirOps));
        }
        let file = stdfs::OpenOptions::new()
            .read(flags.readable())
            .write(flags.writable())
            .open(&path)?;
        Ok(Arc::new(HostStreamOps {
            file: Mutex::new(file),
        }))
    }
}

/// Stream over one open host file. The virtual position is authoritative;
/// the host file is re-seeked before every transfer.
#[derive(Debug)]
pub struct HostStreamOps {
    file: Mutex<stdfs::File>,
}

impl StreamOps for HostStreamOps {
    fn read(&self, _fs: &Vfs, stream: &OpenStream, buf: &mut [u8]) -> Result<usize> {
        let mut file = self.file.lock().map_err(|_| FsError::Lock)?;
        file.seek(SeekFrom::Start(stream.position()))?;
        let read = file.read(buf)?;
        stream.advance(read as u64);
        Ok(read)
    }

    fn write(&self, _fs: &Vfs, stream: &OpenStream, buf: &[u8]) -> Result<usize> {
        let mut file = self.file.lock().map_err(|_| FsError::Lock)?;
        if stream.flags.contains(OpenFlags::APPEND) {
            let len = file.seek(SeekFrom::End(0))?;
            stream.set_position(len);
        } else {
            file.seek(SeekFrom::Start(stream.position()))?;
        }
        let written = file.write(buf)?;
        stream.advance(written as u64);
        Ok(written)
    }

    fn llseek(&self, _fs: &Vfs, stream: &OpenStream, offset: i64, whence: Whence) -> Result<u64> {
        let base = match whence {
            Whence::Set => 0,
            Whence::Current => stream.position() as i64,
            Whence::End => {
                let file = self.file.lock().map_err(|_| FsError::Lock)?;
                file.metadata()?.len() as i64
            }
        };
        let target = base.checked_add(offset).ok_or(FsError::InvalidInput)?;
        if target < 0 {
            return Err(FsError::InvalidInput);
        }
        stream.set_position(target as u64);
        Ok(target as u64)
    }

    fn allocate(&self, _fs: &Vfs, _stream: &OpenStream, len: u64) -> Result<()> {
        let file = self.file.lock().map_err(|_| FsError::Lock)?;
        if file.metadata()?.len() < len {
            file.set_len(len)?;
        }
        Ok(())
    }

    fn fsync(&self, _fs: &Vfs, _stream: &OpenStream) -> Result<()> {
        let file = self.file.lock().map_err(|_| FsError::Lock)?;
        file.sync_all()?;
        Ok(())
    }
}

#[derive(Debug)]
struct HostDirOps;

impl StreamOps for HostDirOps {
    fn read(&self, _fs: &Vfs, _stream: &OpenStream, _buf: &mut [u8]) -> Result<usize> {
        Err(FsError::IsADirectory)
    }

    fn write(&self, _fs: &Vfs, _stream: &OpenStream, _buf: &[u8]) -> Result<usize> {
        Err(FsError::IsADirectory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LookupOptions, Vfs, VfsConfig};

    fn mounted_host() -> (tempfile::TempDir, std::sync::Arc<Vfs>) {
        let dir = tempfile::tempdir().unwrap();
        let fs = Vfs::new(VfsConfig::default());
        fs.mkdir("/host", 0o755).unwrap();
        fs.mount(
            "/host",
            Arc::new(HostBackend::new(dir.path())),
            &dir.path().display().to_string(),
        )
        .unwrap();
        (dir, fs)
    }

    #[test]
    fn bytes_round_trip_through_the_host() {
        let (dir, fs) = mounted_host();

        let fd = fs
            .open_path(
                "/host/data.bin",
                OpenFlags::READ_WRITE | OpenFlags::CREATE,
                0o644,
            )
            .unwrap();
        assert_eq!(fs.write_fd(fd, b"payload").unwrap(), 7);
        fs.close_fd(fd).unwrap();

        assert_eq!(stdfs::read(dir.path().join("data.bin")).unwrap(), b"payload");

        let fd = fs.open_path("/host/data.bin", OpenFlags::empty(), 0).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(fs.read_fd(fd, &mut buf).unwrap(), 7);
        assert_eq!(&buf[..7], b"payload");
        fs.close_fd(fd).unwrap();
    }

    #[test]
    fn host_errors_translate_into_the_taxonomy() {
        let (_dir, fs) = mounted_host();

        assert_eq!(
            fs.resolve("/host/absent", LookupOptions::default())
                .unwrap_err(),
            FsError::EntryNotFound,
        );

        fs.mkdir("/host/full", 0o755).unwrap();
        let fd = fs
            .open_path(
                "/host/full/file",
                OpenFlags::WRITE_ONLY | OpenFlags::CREATE,
                0o644,
            )
            .unwrap();
        fs.close_fd(fd).unwrap();
        assert_eq!(fs.rmdir("/host/full").unwrap_err(), FsError::DirectoryNotEmpty);
        assert_eq!(fs.mkdir("/host/full", 0o755).unwrap_err(), FsError::AlreadyExists);
    }

    #[test]
    fn external_entries_are_visible() {
        let (dir, fs) = mounted_host();
        stdfs::write(dir.path().join("seeded.txt"), b"seed").unwrap();

        let meta = fs.stat("/host/seeded.txt").unwrap();
        assert!(meta.is_file());
        assert_eq!(meta.len, 4);

        let names: Vec<String> = fs
            .readdir_path("/host")
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert!(names.contains(&"seeded.txt".to_string()));
    }
}
