use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use pcitop_core::{BusDescriptor, DataSource, DeviceModel, DeviceRecord, RawDeviceDescriptor, Topology};

use crate::error::{Result, SnapshotError};
use crate::{read_snapshot, write_snapshot, Snapshot};

/// A [`DataSource`] replaying a snapshot file, and the sink that captures one.
///
/// The file is read on first use; a source created for saving never touches it until asked to
/// list something.
#[derive(Debug, Clone)]
pub struct SnapshotSource {
    path: PathBuf,
    snapshot: Option<Snapshot>,
}

impl SnapshotSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            snapshot: None,
        }
    }

    /// Opens and fully validates the snapshot at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let mut source = Self::new(path);
        source.snapshot()?;
        Ok(source)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&mut self) -> Result<&Snapshot> {
        let snapshot = match self.snapshot.take() {
            Some(snapshot) => snapshot,
            None => load(&self.path)?,
        };
        Ok(self.snapshot.insert(snapshot))
    }
}

fn load(path: &Path) -> Result<Snapshot> {
    let mut reader = BufReader::new(File::open(path)?);
    let snapshot = read_snapshot(&mut reader)?;
    tracing::info!(
        "loaded snapshot {} ({} devices, {} buses, captured at {})",
        path.display(),
        snapshot.devices.len(),
        snapshot.buses.len(),
        snapshot.created
    );
    Ok(snapshot)
}

impl DataSource for SnapshotSource {
    fn list_buses(&mut self) -> pcitop_core::Result<Vec<BusDescriptor>> {
        Ok(self.snapshot()?.buses.clone())
    }

    fn list_devices(&mut self) -> pcitop_core::Result<Vec<RawDeviceDescriptor>> {
        Ok(self.snapshot()?.devices.clone())
    }

    fn save(&mut self, topology: &Topology) -> pcitop_core::Result<()> {
        let devices: Vec<DeviceRecord<'_>> =
            topology.devices().iter().map(DeviceModel::record).collect();
        let buses = topology.bus_descriptors();
        publish_snapshot(&self.path, &devices, &buses)?;
        Ok(())
    }
}

/// Writes a snapshot to `path` so that readers only ever see a complete file.
///
/// On Linux the data goes to an unnamed `O_TMPFILE` inode in the destination directory, is
/// synced, and is then linked in as `path`; nothing appears in the directory until the file is
/// complete, and an interrupted write leaves nothing behind. Filesystems without `O_TMPFILE`
/// fall back to a hidden named temporary file that is renamed into place.
///
/// An existing `path` is never replaced: the publish fails with
/// [`SnapshotError::TargetExists`] and the old file stays as it was.
pub fn publish_snapshot(
    path: &Path,
    devices: &[DeviceRecord<'_>],
    buses: &[BusDescriptor],
) -> Result<u64> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let created = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs());

    let size = match unnamed::create_in(dir)? {
        Some(mut file) => {
            let size = write_synced(&mut file, devices, buses, created)?;
            unnamed::link(&file, path).map_err(|err| publish_error(err, path))?;
            size
        }
        None => {
            tracing::debug!(
                "{} has no O_TMPFILE support; using a named temporary",
                dir.display()
            );
            let mut tmp = tempfile::Builder::new()
                .prefix(".pcitop-")
                .suffix(".tmp")
                .tempfile_in(dir)?;
            let size = write_synced(tmp.as_file_mut(), devices, buses, created)?;
            tmp.persist_noclobber(path)
                .map_err(|err| publish_error(err.error, path))?;
            size
        }
    };

    tracing::info!(
        "saved snapshot {} ({} devices, {} buses, {size} bytes)",
        path.display(),
        devices.len(),
        buses.len()
    );
    Ok(size)
}

fn write_synced(
    file: &mut File,
    devices: &[DeviceRecord<'_>],
    buses: &[BusDescriptor],
    created: u64,
) -> Result<u64> {
    let mut writer = BufWriter::new(file);
    let size = write_snapshot(&mut writer, devices, buses, created)?;
    let file = writer.into_inner().map_err(|err| err.into_error())?;
    file.sync_all()?;
    Ok(size)
}

fn publish_error(err: io::Error, path: &Path) -> SnapshotError {
    if err.kind() == io::ErrorKind::AlreadyExists {
        SnapshotError::TargetExists(path.to_path_buf())
    } else {
        SnapshotError::Io(err)
    }
}

#[cfg(target_os = "linux")]
mod unnamed {
    use std::fs::File;
    use std::io;
    use std::os::fd::AsRawFd;
    use std::path::Path;

    use rustix::fs::{AtFlags, Mode, OFlags, CWD};
    use rustix::io::Errno;

    /// Opens an anonymous file on the filesystem holding `dir`, or `None` when the filesystem
    /// (or kernel) does not support `O_TMPFILE`.
    pub(super) fn create_in(dir: &Path) -> io::Result<Option<File>> {
        let flags = OFlags::RDWR | OFlags::TMPFILE | OFlags::CLOEXEC;
        let mode = Mode::RUSR | Mode::WUSR | Mode::RGRP | Mode::ROTH;
        match rustix::fs::open(dir, flags, mode) {
            Ok(fd) => Ok(Some(File::from(fd))),
            // Kernels without O_TMPFILE see O_DIRECTORY and answer EISDIR.
            Err(Errno::OPNOTSUPP | Errno::ISDIR | Errno::INVAL) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Gives the anonymous `file` its name. Fails with `AlreadyExists` if `path` is taken.
    pub(super) fn link(file: &File, path: &Path) -> io::Result<()> {
        let fd_path = format!("/proc/self/fd/{}", file.as_raw_fd());
        rustix::fs::linkat(CWD, fd_path.as_str(), CWD, path, AtFlags::SYMLINK_FOLLOW)?;
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
mod unnamed {
    use std::fs::File;
    use std::io;
    use std::path::Path;

    pub(super) fn create_in(_dir: &Path) -> io::Result<Option<File>> {
        Ok(None)
    }

    pub(super) fn link(_file: &File, _path: &Path) -> io::Result<()> {
        Err(io::ErrorKind::Unsupported.into())
    }
}
