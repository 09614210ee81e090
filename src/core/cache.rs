// Copyright 2025 Appdatad Authors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    fs,
    io::{self, ErrorKind},
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
};

use rayon::prelude::*;
use walkdir::WalkDir;

use crate::{
    conf::config::Config,
    defs,
    error::{Error, Result},
    paths, utils,
};

/// One deletable cache file. Ordering is mtime ascending with the inode
/// number as the tie-breaker; without reliable atime this is as close to LRU
/// as the filesystem gets.
#[derive(Debug)]
struct CacheEntry {
    mtime: i64,
    ino: u64,
    path: PathBuf,
}

/// Frees storage on a volume until at least `free_target` bytes are
/// available, deleting per-app cache files oldest-first. Success is defined
/// purely by the free-space target.
pub fn free_cache(config: &Config, uuid: Option<&str>, free_target: u64) -> Result<()> {
    let data_path = paths::volume_root(config, uuid);

    let avail = utils::data_disk_free(&data_path)?;
    log::info!("free_cache({}) avail {}", free_target, avail);
    if avail >= free_target {
        return Ok(());
    }

    let mut index = build_cache_index(config, uuid);
    index.sort_unstable_by_key(|e| (e.mtime, e.ino));
    log::debug!("cache index holds {} files", index.len());

    let mut failed = 0usize;
    let mut reached = false;
    for entry in &index {
        if utils::data_disk_free(&data_path)? >= free_target {
            reached = true;
            break;
        }
        match fs::remove_file(&entry.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                log::warn!("Failed to delete {}: {}", entry.path.display(), e);
                failed += 1;
            }
        }
    }
    if failed > 0 {
        log::warn!("free_cache left {} undeletable cache files behind", failed);
    }

    if reached || utils::data_disk_free(&data_path)? >= free_target {
        Ok(())
    } else {
        Err(Error::io(
            "free_cache",
            data_path,
            io::Error::from_raw_os_error(libc::ENOSPC),
        ))
    }
}

/// Collects every cache file on the volume: the owner's tree, every
/// secondary user, and the per-user shared media trees that carry an app
/// data area.
fn build_cache_index(config: &Config, uuid: Option<&str>) -> Vec<CacheEntry> {
    let mut roots: Vec<PathBuf> = Vec::new();

    // The owner's tree on the built-in volume.
    if uuid.is_none() {
        roots.push(paths::user_ce_root(config, None, 0));
    }

    let user_root = paths::volume_root(config, uuid).join("user");
    if let Ok(entries) = fs::read_dir(&user_root) {
        for entry in entries.flatten() {
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with(|c: char| c.is_ascii_digit()) {
                continue;
            }
            // Already indexed above.
            if uuid.is_none() && name == "0" {
                continue;
            }
            push_checked(&mut roots, entry.path());
        }
    }

    let media_root = paths::media_root(config, uuid);
    if let Ok(entries) = fs::read_dir(&media_root) {
        for entry in entries.flatten() {
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with(|c: char| c.is_ascii_digit()) {
                continue;
            }
            let path = entry.path();
            if path.join("Android").is_dir() && path.join("Android/data").is_dir() {
                push_checked(&mut roots, path.join("Android/data"));
            }
        }
    }

    roots
        .par_iter()
        .flat_map_iter(|root| scan_package_caches(root))
        .collect()
}

fn push_checked(roots: &mut Vec<PathBuf>, path: PathBuf) {
    if path.as_os_str().len() >= defs::PATH_MAX {
        log::warn!("Path exceeds limit, skipping: {}", path.display());
        return;
    }
    roots.push(path);
}

/// Indexes the `cache/` subtree of every package directory under `base`.
fn scan_package_caches(base: &Path) -> Vec<CacheEntry> {
    let mut entries = Vec::new();
    let Ok(packages) = fs::read_dir(base) else {
        return entries;
    };
    for package in packages.flatten() {
        if !package.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let cache_dir = package.path().join(defs::CACHE_DIR_NAME);
        for entry in WalkDir::new(&cache_dir)
            .min_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.path().as_os_str().len() >= defs::PATH_MAX {
                log::warn!("Path exceeds limit, skipping: {}", entry.path().display());
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            if !meta.is_file() {
                continue;
            }
            entries.push(CacheEntry {
                mtime: meta.mtime(),
                ino: meta.ino(),
                path: entry.path().to_path_buf(),
            });
        }
    }
    entries
}
