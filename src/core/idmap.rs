// Copyright 2025 Appdatad Authors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    ffi::CString,
    fs,
    os::fd::{AsFd, AsRawFd, OwnedFd},
    path::Path,
};

use rustix::fs::{Gid, Mode, OFlags, Uid, fchmod, fchown, open};

use crate::{
    conf::config::Config,
    defs,
    error::{Error, Result},
    exec, paths,
};

/// Builds the flattened idmap for an overlay package: a fresh system-owned
/// output file, then the `idmap` tool run with the overlay's uid, holding
/// the exclusive output lock.
pub fn idmap(config: &Config, target_apk: &Path, overlay_apk: &Path, uid: u32) -> Result<()> {
    log::debug!(
        "idmap target_apk={} overlay_apk={} uid={}",
        target_apk.display(),
        overlay_apk.display(),
        uid
    );

    let idmap_path = paths::idmap_path(config, overlay_apk)?;
    let _ = fs::remove_file(&idmap_path);
    let fd = open(
        &idmap_path,
        OFlags::RDWR | OFlags::CREATE | OFlags::EXCL,
        Mode::from_raw_mode(0o644),
    )
    .map_err(|e| Error::errno("open", &idmap_path, e))?;

    match build(config, target_apk, overlay_apk, uid, &idmap_path, &fd) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = fs::remove_file(&idmap_path);
            Err(e)
        }
    }
}

fn build(
    config: &Config,
    target_apk: &Path,
    overlay_apk: &Path,
    uid: u32,
    idmap_path: &Path,
    fd: &OwnedFd,
) -> Result<()> {
    unsafe {
        fchown(
            fd,
            Some(Uid::from_raw(defs::AID_SYSTEM)),
            Some(Gid::from_raw(uid)),
        )
        .map_err(|e| Error::errno("fchown", idmap_path, e))?;
    }
    fchmod(fd, Mode::from_raw_mode(0o644)).map_err(|e| Error::errno("fchmod", idmap_path, e))?;

    let arg = |s: String| CString::new(s).expect("argument contains NUL");
    let argv = vec![
        arg(config.idmap_bin.display().to_string()),
        arg("--fd".to_string()),
        arg(target_apk.display().to_string()),
        arg(overlay_apk.display().to_string()),
        arg(fd.as_raw_fd().to_string()),
    ];
    exec::run_dropped(&config.idmap_bin, &argv, uid, false, Some(fd.as_fd()))
}
