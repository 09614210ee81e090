// Copyright 2025 Appdatad Authors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{fs, os::unix::fs::MetadataExt, path::Path};

use serde::Serialize;

use crate::{conf::config::Config, defs, error::Result, paths, utils};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SizeStats {
    pub code: u64,
    pub data: u64,
    pub cache: u64,
    pub asec: u64,
}

pub struct SizeParams<'a> {
    pub uuid: Option<&'a str>,
    pub pkg: &'a str,
    /// `None` sizes every user known on the volume.
    pub user: Option<u32>,
    pub flags: u32,
    pub apk_path: &'a Path,
    pub lib_dir: Option<&'a Path>,
    pub fwdlock_apk: Option<&'a Path>,
    pub asec_path: Option<&'a Path>,
    pub isa: &'a str,
}

fn skip_sentinel(path: Option<&Path>) -> Option<&Path> {
    path.filter(|p| !p.as_os_str().as_encoded_bytes().starts_with(b"!"))
}

/// Walks one package and attributes every on-disk byte to exactly one of
/// code, data, cache, or asec.
pub fn get_app_size(config: &Config, p: &SizeParams) -> Result<SizeStats> {
    let mut stats = SizeStats::default();

    // The shipped apk counts as code unless it lives on the system image or
    // inside a mounted container.
    let on_system = paths::validate_system_app_path(config, p.apk_path).is_ok();
    let in_asec = p.apk_path.starts_with(&config.asec_dir);
    if !on_system && !in_asec {
        if let Ok(meta) = fs::metadata(p.apk_path) {
            stats.code += utils::stat_size(&meta);
            if meta.is_dir() {
                stats.code += utils::calculate_dir_size(p.apk_path);
            }
        }
    }

    if let Some(fwdlock) = skip_sentinel(p.fwdlock_apk) {
        if let Ok(meta) = fs::metadata(fwdlock) {
            stats.code += utils::stat_size(&meta);
        }
    }

    if let Ok(dex_path) = paths::dalvik_cache_path(config, p.apk_path, p.isa) {
        if let Ok(meta) = fs::metadata(&dex_path) {
            stats.code += utils::stat_size(&meta);
        }
    }

    if let Some(lib_dir) = skip_sentinel(p.lib_dir) {
        stats.code += utils::calculate_dir_size(lib_dir);
    }

    if let Some(asec) = skip_sentinel(p.asec_path) {
        if let Ok(meta) = fs::metadata(asec) {
            stats.asec += utils::stat_size(&meta);
        }
    }

    let users = match p.user {
        Some(user) => vec![user],
        None => paths::known_users(config, p.uuid),
    };

    for user in users {
        if p.flags & defs::FLAG_CE_STORAGE == 0 {
            continue;
        }
        let pkgdir = paths::user_ce_package(config, p.uuid, user, p.pkg);
        let entries = match fs::read_dir(&pkgdir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Failed to open {}: {}", pkgdir.display(), e);
                continue;
            }
        };
        // Everything in the package dir is data, except the cache tree and
        // the lib tree; a symlinked lib is code the app did not create.
        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let Ok(meta) = entry.metadata() else { continue };
            let own_size = utils::stat_size(&meta);
            let name = entry.file_name();
            if file_type.is_dir() {
                let subtree = own_size + utils::calculate_dir_size(&entry.path());
                if name == defs::LIB_DIR_NAME {
                    stats.code += subtree;
                } else if name == defs::CACHE_DIR_NAME {
                    stats.cache += subtree;
                } else {
                    stats.data += subtree;
                }
            } else if file_type.is_symlink() && name == defs::LIB_DIR_NAME {
                stats.code += own_size;
            } else {
                stats.data += own_size;
            }
        }
    }

    Ok(stats)
}
