// Copyright 2025 Appdatad Authors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    fs,
    io::{self, ErrorKind},
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
};

use crate::{
    conf::config::Config,
    core::layout,
    defs,
    error::{Error, Result},
    paths, utils,
};

const BOTH_STORAGE: u32 = defs::FLAG_CE_STORAGE | defs::FLAG_DE_STORAGE;

/// Relocates a package between volumes: the code tree first, then every
/// user's private data. Any failure rolls the destination back; the source
/// is never touched here, so the caller can persist the new location before
/// destroying the old one.
pub fn move_complete_app(
    config: &Config,
    from_uuid: Option<&str>,
    to_uuid: Option<&str>,
    pkg: &str,
    data_app_name: &str,
    appid: u32,
    seinfo: &str,
) -> Result<()> {
    paths::validate_package_name(pkg)?;
    paths::validate_package_name(data_app_name)?;

    let users = paths::known_users(config, from_uuid);
    let to_code = paths::data_app_package(config, to_uuid, data_app_name);

    // Rollback deletes the destination wholesale, so starting over a
    // non-empty destination would destroy data this move never created.
    match fs::read_dir(&to_code) {
        Ok(mut entries) => {
            if entries.next().is_some() {
                return Err(Error::io(
                    "move destination check",
                    &to_code,
                    io::Error::from_raw_os_error(libc::EEXIST),
                ));
            }
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(Error::io("opendir", &to_code, e)),
    }

    match copy_app(
        config,
        from_uuid,
        to_uuid,
        pkg,
        data_app_name,
        appid,
        seinfo,
        &users,
    ) {
        Ok(()) => Ok(()),
        Err(e) => {
            log::error!("move of {} failed, rolling back: {}", pkg, e);
            rollback(config, to_uuid, pkg, data_app_name, &users);
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn copy_app(
    config: &Config,
    from_uuid: Option<&str>,
    to_uuid: Option<&str>,
    pkg: &str,
    data_app_name: &str,
    appid: u32,
    seinfo: &str,
    users: &[u32],
) -> Result<()> {
    let from_code = paths::data_app_package(config, from_uuid, data_app_name);
    let to_code = paths::data_app_package(config, to_uuid, data_app_name);
    let to_code_parent = paths::data_app_dir(config, to_uuid);

    log::debug!(
        "Copying {} to {}",
        from_code.display(),
        to_code.display()
    );
    utils::copy_tree(&config.cp_bin, &from_code, &to_code_parent)?;
    utils::restorecon_code_tree(&to_code, true)?;

    for &user in users {
        let from_pkg = paths::user_ce_package(config, from_uuid, user, pkg);
        // Not every user has data for every package.
        if !from_pkg.exists() {
            log::info!("Missing source {}", from_pkg.display());
            continue;
        }

        let to_user_root = paths::user_ce_root(config, to_uuid, user);
        utils::ensure_dir(&to_user_root, 0o771, defs::AID_SYSTEM, defs::AID_SYSTEM)?;
        layout::create_app_data(config, to_uuid, pkg, user, BOTH_STORAGE, appid, seinfo)?;

        log::debug!(
            "Copying {} to {}",
            from_pkg.display(),
            to_user_root.display()
        );
        utils::copy_tree(&config.cp_bin, &from_pkg, &to_user_root)?;
        layout::restorecon_app_data(config, to_uuid, pkg, user, BOTH_STORAGE, appid, seinfo)?;
    }

    Ok(())
}

/// Best effort: rollback trouble is logged, never surfaced.
fn rollback(
    config: &Config,
    to_uuid: Option<&str>,
    pkg: &str,
    data_app_name: &str,
    users: &[u32],
) {
    let to_code = paths::data_app_package(config, to_uuid, data_app_name);
    if let Err(e) = utils::delete_dir_contents(&to_code, true) {
        log::warn!("Failed to rollback {}: {}", to_code.display(), e);
    }
    for &user in users {
        let to_pkg = paths::user_ce_package(config, to_uuid, user, pkg);
        if let Err(e) = utils::delete_dir_contents(&to_pkg, true) {
            log::warn!("Failed to rollback {}: {}", to_pkg.display(), e);
        }
        let to_de = paths::user_de_package(config, to_uuid, user, pkg);
        if let Err(e) = utils::delete_dir_contents(&to_de, true) {
            log::warn!("Failed to rollback {}: {}", to_de.display(), e);
        }
    }
}

struct MoveTarget {
    src_root: PathBuf,
    dst_root: PathBuf,
    dst_uid: u32,
    dst_gid: u32,
}

/// Interprets the update-command files: each names a destination and source
/// package, followed by indented relative paths to carry over. Anything
/// malformed is logged and skipped; a missing package simply disables the
/// block.
pub fn movefiles(config: &Config) -> Result<()> {
    let entries = match fs::read_dir(&config.update_commands_dir) {
        Ok(entries) => entries,
        Err(_) => return Ok(()),
    };
    for entry in entries.flatten() {
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(true) {
            continue;
        }
        let file = entry.path();
        match fs::read_to_string(&file) {
            Ok(content) => run_command_file(config, &file, &content),
            Err(e) => log::warn!("Unable to read update commands {}: {}", file.display(), e),
        }
    }
    Ok(())
}

fn run_command_file(config: &Config, file: &Path, content: &str) {
    let mut target: Option<MoveTarget> = None;
    for raw in content.lines() {
        if raw.len() >= defs::PKG_PATH_MAX {
            log::warn!("Line too long in {}, skipping", file.display());
            continue;
        }
        let indented = raw.starts_with([' ', '\t']);
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if indented {
            match &target {
                None => log::warn!("Path before package line in {}: {}", file.display(), line),
                Some(t) => {
                    log::debug!("Move file: {} ({} -> {})", line, t.src_root.display(), t.dst_root.display());
                    move_file_or_dir(
                        &t.src_root.join(line),
                        &t.dst_root.join(line),
                        &t.dst_root,
                        t.dst_uid,
                        t.dst_gid,
                    );
                }
            }
        } else {
            // A line without the separator is noise, not a new block.
            match line.split_once(':') {
                None => {
                    log::warn!("Bad package spec in {}; no ':' sep: {}", file.display(), line)
                }
                Some((dst_pkg, src_pkg)) => {
                    target = resolve_move_target(config, file, dst_pkg, src_pkg)
                }
            }
        }
    }
}

fn resolve_move_target(
    config: &Config,
    file: &Path,
    dst_pkg: &str,
    src_pkg: &str,
) -> Option<MoveTarget> {
    if paths::validate_package_name(dst_pkg).is_err() || paths::validate_package_name(src_pkg).is_err() {
        log::warn!(
            "Bad package name in {}: {}:{}",
            file.display(),
            dst_pkg,
            src_pkg
        );
        return None;
    }
    let src_root = paths::user_ce_package(config, None, 0, src_pkg);
    if fs::symlink_metadata(&src_root).is_err() {
        // Source package no longer exists; skip its block.
        return None;
    }
    let dst_root = paths::user_ce_package(config, None, 0, dst_pkg);
    let dst_meta = match fs::symlink_metadata(&dst_root) {
        Ok(meta) => meta,
        // Normal with original-package renames; stay quiet.
        Err(_) => return None,
    };
    Some(MoveTarget {
        src_root,
        dst_root,
        dst_uid: dst_meta.uid(),
        dst_gid: dst_meta.gid(),
    })
}

/// Creates any missing ancestors of `dst` below `dst_base`, owned by the
/// destination package.
fn make_inner_dirs(dst: &Path, dst_base: &Path, uid: u32, gid: u32) {
    let Some(parent) = dst.parent() else { return };
    let mut missing = Vec::new();
    let mut cursor = parent;
    while cursor.starts_with(dst_base) && !cursor.exists() {
        missing.push(cursor.to_path_buf());
        match cursor.parent() {
            Some(up) => cursor = up,
            None => break,
        }
    }
    for dir in missing.into_iter().rev() {
        log::debug!("Making directory: {}", dir.display());
        if let Err(e) = fs::create_dir(&dir) {
            log::warn!("Unable to make directory {}: {}", dir.display(), e);
            continue;
        }
        let _ = utils::chmod_path(&dir, 0o771);
        let _ = utils::chown_path(&dir, uid, gid);
    }
}

fn move_file_or_dir(src: &Path, dst: &Path, dst_base: &Path, uid: u32, gid: u32) {
    let meta = match fs::symlink_metadata(src) {
        Ok(meta) => meta,
        Err(e) => {
            log::warn!("Unable to stat {}: {}", src.display(), e);
            return;
        }
    };

    if !meta.is_dir() {
        make_inner_dirs(dst, dst_base, uid, gid);
        log::debug!("Renaming {} to {} (uid {})", src.display(), dst.display(), uid);
        if let Err(e) = fs::rename(src, dst) {
            log::warn!("Unable to rename {} to {}: {}", src.display(), dst.display(), e);
            return;
        }
        if let Err(e) = utils::chown_path(dst, uid, gid) {
            log::error!("cannot chown {}: {}", dst.display(), e);
            let _ = fs::remove_file(dst);
        }
        return;
    }

    let entries = match fs::read_dir(src) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("Unable to opendir {}: {}", src.display(), e);
            return;
        }
    };
    // Empty directories stay behind in the source; the package manager
    // erases the remains when the old package goes away.
    for entry in entries.flatten() {
        let name = entry.file_name();
        move_file_or_dir(&src.join(&name), &dst.join(&name), dst_base, uid, gid);
    }
}
