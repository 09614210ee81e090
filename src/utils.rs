// Copyright 2025 Appdatad Authors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    fs::{self, File, OpenOptions},
    io::{self, ErrorKind, Write},
    os::unix::fs::MetadataExt,
    path::Path,
    process::Command,
    sync::{Mutex, OnceLock},
};

use anyhow::Context;
use rustix::fs::{Gid, Mode, Uid, chmod, chown};
use walkdir::WalkDir;

use crate::{
    defs,
    error::{Error, Result},
};

#[cfg(any(target_os = "linux", target_os = "android"))]
use extattr::{Flags as XattrFlags, lsetxattr};

const SELINUX_XATTR: &str = "security.selinux";

const APK_DATA_CONTEXT: &str = "u:object_r:apk_data_file:s0";

// --- File Logger Implementation ---
struct DaemonLogger {
    file: Option<Mutex<File>>,
}

impl log::Log for DaemonLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
            if let Some(file) = &self.file {
                let mut file = file.lock().unwrap();
                let _ = writeln!(
                    file,
                    "[{}] [{}] {}",
                    record.level(),
                    record.target(),
                    record.args()
                );
            }
        }
    }

    fn flush(&self) {
        if let Some(file) = &self.file {
            let _ = file.lock().unwrap().flush();
        }
    }
}

pub fn init_logger(verbose: bool, log_path: Option<&Path>) -> anyhow::Result<()> {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    let file = match log_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            Some(Mutex::new(file))
        }
        None => None,
    };

    log::set_boxed_logger(Box::new(DaemonLogger { file }))
        .map(|()| log::set_max_level(level))
        .map_err(|e| anyhow::anyhow!("Failed to set logger: {}", e))?;

    Ok(())
}

// --- SELinux Labeling ---

/// Labeling is skipped wholesale when no policy is loaded, the same way the
/// platform labeller behaves on permissive builds and plain Linux hosts.
pub fn selinux_enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| Path::new("/sys/fs/selinux/enforce").exists())
}

#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn lsetfilecon<P: AsRef<Path>>(path: P, con: &str) -> Result<()> {
    if !selinux_enabled() {
        return Ok(());
    }
    lsetxattr(&path, SELINUX_XATTR, con, XattrFlags::empty())
        .map_err(|e| Error::io("setfilecon", path.as_ref(), io::Error::from(e)))
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn lsetfilecon<P: AsRef<Path>>(_path: P, _con: &str) -> Result<()> {
    Ok(())
}

/// Context for a per-app data file. Trusted platform packages share the
/// system app type; everything else gets the app type plus the two
/// per-appid isolation categories.
pub fn app_data_context(seinfo: &str, uid: u32) -> String {
    let appid = uid % defs::AID_USER_OFFSET;
    let base = if seinfo == "platform" {
        "u:object_r:system_app_data_file:s0"
    } else {
        "u:object_r:app_data_file:s0"
    };
    if appid >= 10_000 {
        let index = appid - 10_000;
        format!("{}:c{},c{}", base, index % 256, 256 + index / 256)
    } else {
        base.to_string()
    }
}

pub fn set_app_label(path: &Path, seinfo: &str, uid: u32) -> Result<()> {
    lsetfilecon(path, &app_data_context(seinfo, uid))
}

/// Recursively re-applies the per-app label, root included.
pub fn restorecon_app_tree(path: &Path, seinfo: &str, uid: u32) -> Result<()> {
    let con = app_data_context(seinfo, uid);
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry.map_err(|e| {
            Error::io(
                "restorecon walk",
                path,
                e.into_io_error()
                    .unwrap_or_else(|| ErrorKind::Other.into()),
            )
        })?;
        lsetfilecon(entry.path(), &con)?;
    }
    Ok(())
}

pub fn restorecon_code_tree(path: &Path, recurse: bool) -> Result<()> {
    if !recurse {
        return lsetfilecon(path, APK_DATA_CONTEXT);
    }
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry.map_err(|e| {
            Error::io(
                "restorecon walk",
                path,
                e.into_io_error()
                    .unwrap_or_else(|| ErrorKind::Other.into()),
            )
        })?;
        lsetfilecon(entry.path(), APK_DATA_CONTEXT)?;
    }
    Ok(())
}

// --- Directory Primitives ---

/// Idempotent strict ensure: creates the directory with exactly the given
/// mode and owner, or verifies an existing one already matches.
pub fn ensure_dir(path: &Path, mode: u32, uid: u32, gid: u32) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) => {
            let found_mode = meta.mode() & 0o7777;
            if meta.is_dir() && found_mode == mode && meta.uid() == uid && meta.gid() == gid {
                return Ok(());
            }
            Err(Error::WrongAttrs {
                path: path.to_path_buf(),
                want_mode: mode,
                want_uid: uid,
                want_gid: gid,
                found_mode,
                found_uid: meta.uid(),
                found_gid: meta.gid(),
            })
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            fs::create_dir(path).map_err(|e| Error::io("mkdir", path, e))?;
            // mkdir is subject to the umask, so set the mode explicitly.
            chmod(path, Mode::from_raw_mode(mode))
                .map_err(|e| Error::errno("chmod", path, e))?;
            unsafe {
                chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)))
                    .map_err(|e| Error::errno("chown", path, e))?;
            }
            Ok(())
        }
        Err(e) => Err(Error::io("stat", path, e)),
    }
}

/// Depth-first removal of everything below `path`, and of `path` itself when
/// asked. Entries vanishing concurrently are fine; anything else is counted
/// and reported as an aggregate failure.
pub fn delete_dir_contents(path: &Path, also_delete_root: bool) -> Result<()> {
    let mut failed = 0usize;
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(Error::io("opendir", path, e)),
    };
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Failed to read entry under {}: {}", path.display(), e);
                failed += 1;
                continue;
            }
        };
        remove_entry(&entry.path(), &mut failed);
    }
    if also_delete_root && !remove_dir_tolerant(path) {
        failed += 1;
    }
    if failed > 0 {
        return Err(Error::Aggregate {
            path: path.to_path_buf(),
            failed,
        });
    }
    Ok(())
}

fn remove_entry(path: &Path, failed: &mut usize) {
    let is_dir = match fs::symlink_metadata(path) {
        Ok(meta) => meta.is_dir(),
        Err(e) if e.kind() == ErrorKind::NotFound => return,
        Err(e) => {
            log::warn!("Failed to stat {}: {}", path.display(), e);
            *failed += 1;
            return;
        }
    };
    if is_dir {
        if let Ok(entries) = fs::read_dir(path) {
            for entry in entries.flatten() {
                remove_entry(&entry.path(), failed);
            }
        }
        if !remove_dir_tolerant(path) {
            *failed += 1;
        }
    } else {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                log::warn!("Failed to unlink {}: {}", path.display(), e);
                *failed += 1;
            }
        }
    }
}

fn remove_dir_tolerant(path: &Path) -> bool {
    match fs::remove_dir(path) {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => true,
        Err(e) => {
            log::warn!("Failed to rmdir {}: {}", path.display(), e);
            false
        }
    }
}

/// Block-aligned on-disk footprint of one inode.
pub fn stat_size(meta: &fs::Metadata) -> u64 {
    meta.blocks() * 512
}

/// Sums the block footprint of everything below `path`, symlinks counted by
/// their own inode, never followed.
pub fn calculate_dir_size(path: &Path) -> u64 {
    let mut total = 0u64;
    for entry in WalkDir::new(path)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if let Ok(meta) = entry.metadata() {
            total += stat_size(&meta);
        }
    }
    total
}

/// Free bytes available to unprivileged writers on the filesystem holding
/// `path`.
pub fn data_disk_free(path: &Path) -> Result<u64> {
    let vfs = rustix::fs::statvfs(path).map_err(|e| Error::errno("statvfs", path, e))?;
    Ok(vfs.f_bavail * vfs.f_frsize)
}

/// Sets access and modification times, given as (seconds, nanoseconds)
/// pairs.
pub fn set_times(path: &Path, atime: (i64, i64), mtime: (i64, i64)) -> Result<()> {
    use rustix::fs::{AtFlags, CWD, Timestamps, utimensat};
    use rustix::time::Timespec;

    let stamps = Timestamps {
        last_access: Timespec {
            tv_sec: atime.0 as _,
            tv_nsec: atime.1 as _,
        },
        last_modification: Timespec {
            tv_sec: mtime.0 as _,
            tv_nsec: mtime.1 as _,
        },
    };
    utimensat(CWD, path, &stamps, AtFlags::empty()).map_err(|e| Error::errno("utimensat", path, e))
}

/// Copies a tree with the platform `cp`: replace existing destination files,
/// preserve attributes, recurse, never follow or dereference symlinks.
pub fn copy_tree(cp_bin: &Path, src: &Path, dst_parent: &Path) -> Result<()> {
    let status = Command::new(cp_bin)
        .args(["-F", "-p", "-R", "-P", "-d"])
        .arg(src)
        .arg(dst_parent)
        .status()
        .map_err(|e| Error::io("exec", cp_bin, e))?;
    if !status.success() {
        return Err(Error::ChildFailure {
            bin: cp_bin.display().to_string(),
            code: status.code().unwrap_or(-1),
        });
    }
    Ok(())
}

pub fn chown_path(path: &Path, uid: u32, gid: u32) -> Result<()> {
    unsafe {
        chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)))
            .map_err(|e| Error::errno("chown", path, e))
    }
}

pub fn chmod_path(path: &Path, mode: u32) -> Result<()> {
    chmod(path, Mode::from_raw_mode(mode)).map_err(|e| Error::errno("chmod", path, e))
}
