// Copyright 2025 Appdatad Authors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE_DEFAULT: &str = "/data/system/appdatad.toml";

/// Immutable view of the device layout and helper binaries. Built once at
/// startup and handed by reference to every operation; nothing mutates it
/// after `merge_with_cli`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the primary data partition.
    pub data_dir: PathBuf,
    /// Per-user shared media trees (internal storage).
    pub media_dir: PathBuf,
    /// Mount root for encrypted application containers.
    pub asec_dir: PathBuf,
    /// Mount root for adopted (expanded) storage volumes.
    pub expand_dir: PathBuf,
    pub app_dir: PathBuf,
    pub app_private_dir: PathBuf,
    pub system_app_dir: PathBuf,
    pub misc_dir: PathBuf,
    pub resource_cache_dir: PathBuf,
    pub update_commands_dir: PathBuf,
    pub cp_bin: PathBuf,
    pub dex2oat_bin: PathBuf,
    pub patchoat_bin: PathBuf,
    pub idmap_bin: PathBuf,
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/data"),
            media_dir: PathBuf::from("/data/media"),
            asec_dir: PathBuf::from("/mnt/asec"),
            expand_dir: PathBuf::from("/mnt/expand"),
            app_dir: PathBuf::from("/data/app"),
            app_private_dir: PathBuf::from("/data/app-private"),
            system_app_dir: PathBuf::from("/system/app"),
            misc_dir: PathBuf::from("/data/misc"),
            resource_cache_dir: PathBuf::from("/data/resource-cache"),
            update_commands_dir: PathBuf::from("/system/etc/updatecmds"),
            cp_bin: PathBuf::from("/system/bin/cp"),
            dex2oat_bin: PathBuf::from("/system/bin/dex2oat"),
            patchoat_bin: PathBuf::from("/system/bin/patchoat"),
            idmap_bin: PathBuf::from("/system/bin/idmap"),
            verbose: false,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    pub fn load_default() -> Result<Self> {
        Self::from_file(Path::new(CONFIG_FILE_DEFAULT))
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    pub fn merge_with_cli(&mut self, data_dir: Option<PathBuf>, verbose: bool) {
        if let Some(dir) = data_dir {
            self.media_dir = dir.join("media");
            self.app_dir = dir.join("app");
            self.app_private_dir = dir.join("app-private");
            self.misc_dir = dir.join("misc");
            self.resource_cache_dir = dir.join("resource-cache");
            self.data_dir = dir;
        }
        if verbose {
            self.verbose = true;
        }
    }
}
