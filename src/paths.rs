// Copyright 2025 Appdatad Authors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    fs,
    path::{Component, Path, PathBuf},
};

use crate::{
    conf::config::Config,
    defs,
    error::{Error, Result},
};

pub fn multiuser_uid(user: u32, appid: u32) -> u32 {
    user * defs::AID_USER_OFFSET + appid
}

/// Root of the data tree for a volume; `None` is the built-in volume.
pub fn volume_root(config: &Config, uuid: Option<&str>) -> PathBuf {
    match uuid {
        None => config.data_dir.clone(),
        Some(uuid) => config.expand_dir.join(uuid),
    }
}

pub fn media_root(config: &Config, uuid: Option<&str>) -> PathBuf {
    match uuid {
        None => config.media_dir.clone(),
        Some(uuid) => config.expand_dir.join(uuid).join("media"),
    }
}

pub fn data_app_dir(config: &Config, uuid: Option<&str>) -> PathBuf {
    match uuid {
        None => config.app_dir.clone(),
        Some(uuid) => config.expand_dir.join(uuid).join("app"),
    }
}

pub fn data_app_package(config: &Config, uuid: Option<&str>, data_app_name: &str) -> PathBuf {
    data_app_dir(config, uuid).join(data_app_name)
}

pub fn user_ce_root(config: &Config, uuid: Option<&str>, user: u32) -> PathBuf {
    volume_root(config, uuid).join("user").join(user.to_string())
}

pub fn user_de_root(config: &Config, uuid: Option<&str>, user: u32) -> PathBuf {
    volume_root(config, uuid)
        .join("user_de")
        .join(user.to_string())
}

pub fn user_ce_package(config: &Config, uuid: Option<&str>, user: u32, pkg: &str) -> PathBuf {
    user_ce_root(config, uuid, user).join(pkg)
}

pub fn user_de_package(config: &Config, uuid: Option<&str>, user: u32, pkg: &str) -> PathBuf {
    user_de_root(config, uuid, user).join(pkg)
}

pub fn media_user_dir(config: &Config, uuid: Option<&str>, user: u32) -> PathBuf {
    media_root(config, uuid).join(user.to_string())
}

pub fn user_config_dir(config: &Config, user: u32) -> PathBuf {
    config.misc_dir.join("user").join(user.to_string())
}

pub fn dalvik_cache_dir(config: &Config, isa: &str) -> PathBuf {
    config.data_dir.join(defs::DALVIK_CACHE_DIR).join(isa)
}

pub fn boot_marker_path(config: &Config, isa: &str) -> PathBuf {
    dalvik_cache_dir(config, isa).join(defs::BOOT_MARKER_NAME)
}

/// Dalvik-cache artifact for an absolute source path: the path with its
/// leading `/` dropped and every other `/` turned into `@`.
pub fn dalvik_cache_path(config: &Config, src: &Path, isa: &str) -> Result<PathBuf> {
    let src_str = src
        .to_str()
        .ok_or_else(|| Error::BadPath(src.to_path_buf()))?;
    if !src_str.starts_with('/') || src_str.len() < 2 {
        return Err(Error::BadPath(src.to_path_buf()));
    }
    let flattened = format!(
        "{}{}",
        src_str[1..].replace('/', "@"),
        defs::DALVIK_CACHE_POSTFIX
    );
    let path = dalvik_cache_dir(config, isa).join(flattened);
    if path.as_os_str().len() >= defs::PKG_PATH_MAX {
        return Err(Error::PathTooLong(path));
    }
    Ok(path)
}

fn apk_stem(apk_path: &Path) -> Result<&str> {
    if apk_path.extension().is_none() {
        return Err(Error::BadPath(apk_path.to_path_buf()));
    }
    apk_path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::BadPath(apk_path.to_path_buf()))
}

/// Compiled output inside a caller-provided oat directory.
pub fn oat_path(oat_dir: &Path, apk_path: &Path, isa: &str) -> Result<PathBuf> {
    let path = oat_dir.join(isa).join(format!("{}.odex", apk_stem(apk_path)?));
    if path.as_os_str().len() >= defs::PKG_PATH_MAX {
        return Err(Error::PathTooLong(path));
    }
    Ok(path)
}

/// Pre-shipped relocatable input next to the package code.
pub fn odex_path(apk_path: &Path, isa: &str) -> Result<PathBuf> {
    let dir = apk_path
        .parent()
        .ok_or_else(|| Error::BadPath(apk_path.to_path_buf()))?;
    let path = dir
        .join("oat")
        .join(isa)
        .join(format!("{}.odex", apk_stem(apk_path)?));
    if path.as_os_str().len() >= defs::PKG_PATH_MAX {
        return Err(Error::PathTooLong(path));
    }
    Ok(path)
}

/// `/a/b/c.apk` becomes `<prefix>a@b@c.apk<suffix>`.
pub fn flatten_path(prefix: &str, suffix: &str, overlay: &str) -> Result<String> {
    if overlay.len() < 2 || !overlay.starts_with('/') {
        return Err(Error::BadPath(PathBuf::from(overlay)));
    }
    let flattened = format!("{}{}{}", prefix, overlay[1..].replace('/', "@"), suffix);
    if flattened.len() >= defs::PATH_MAX {
        return Err(Error::PathTooLong(PathBuf::from(flattened)));
    }
    Ok(flattened)
}

pub fn idmap_path(config: &Config, overlay_apk: &Path) -> Result<PathBuf> {
    let prefix = format!("{}/", config.resource_cache_dir.display());
    let overlay = overlay_apk
        .to_str()
        .ok_or_else(|| Error::BadPath(overlay_apk.to_path_buf()))?;
    Ok(PathBuf::from(flatten_path(
        &prefix,
        defs::IDMAP_SUFFIX,
        overlay,
    )?))
}

fn check_wellformed(path: &Path) -> Result<()> {
    if path.as_os_str().len() >= defs::PKG_PATH_MAX {
        return Err(Error::PathTooLong(path.to_path_buf()));
    }
    if path.as_os_str().as_encoded_bytes().contains(&0) {
        return Err(Error::BadPath(path.to_path_buf()));
    }
    if path
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(Error::BadPath(path.to_path_buf()));
    }
    Ok(())
}

fn depth_below(path: &Path, prefix: &Path) -> Option<usize> {
    path.strip_prefix(prefix)
        .ok()
        .map(|rest| rest.components().count())
}

/// Paths holding package code must sit directly under one of the trusted
/// roots, at most one subdirectory deep. On adopted volumes the uuid and
/// the app root consume two extra components.
pub fn validate_apk_path(config: &Config, path: &Path) -> Result<()> {
    check_wellformed(path)?;
    for root in [
        &config.app_dir,
        &config.app_private_dir,
        &config.asec_dir,
    ] {
        if let Some(depth) = depth_below(path, root) {
            if (1..=2).contains(&depth) {
                return Ok(());
            }
            return Err(Error::BadPath(path.to_path_buf()));
        }
    }
    if let Some(depth) = depth_below(path, &config.expand_dir) {
        if (3..=4).contains(&depth) {
            return Ok(());
        }
    }
    Err(Error::BadPath(path.to_path_buf()))
}

/// Same trusted roots, but arbitrary nesting is allowed.
pub fn validate_apk_path_subdirs(config: &Config, path: &Path) -> Result<()> {
    check_wellformed(path)?;
    for root in [
        &config.app_dir,
        &config.app_private_dir,
        &config.asec_dir,
    ] {
        if matches!(depth_below(path, root), Some(depth) if depth >= 1) {
            return Ok(());
        }
    }
    if matches!(depth_below(path, &config.expand_dir), Some(depth) if depth >= 3) {
        return Ok(());
    }
    Err(Error::BadPath(path.to_path_buf()))
}

pub fn validate_system_app_path(config: &Config, path: &Path) -> Result<()> {
    check_wellformed(path)?;
    match depth_below(path, &config.system_app_dir) {
        Some(depth) if depth >= 1 && depth <= 2 => Ok(()),
        _ => Err(Error::BadPath(path.to_path_buf())),
    }
}

pub fn validate_package_name(pkg: &str) -> Result<()> {
    if pkg.is_empty() || pkg.len() >= defs::PKG_NAME_MAX {
        return Err(Error::BadPath(PathBuf::from(pkg)));
    }
    if pkg == "." || pkg == ".." || pkg.contains('/') {
        return Err(Error::BadPath(PathBuf::from(pkg)));
    }
    if !pkg
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(Error::BadPath(PathBuf::from(pkg)));
    }
    Ok(())
}

/// Users known on a volume are the numeric directory names under its user
/// root.
pub fn known_users(config: &Config, uuid: Option<&str>) -> Vec<u32> {
    let root = volume_root(config, uuid).join("user");
    let mut users = Vec::new();
    if let Ok(entries) = fs::read_dir(&root) {
        for entry in entries.flatten() {
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            if let Some(user) = entry.file_name().to_str().and_then(|n| n.parse().ok()) {
                users.push(user);
            }
        }
    }
    users.sort_unstable();
    users
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(root: &Path) -> Config {
        let mut config = Config::default();
        config.merge_with_cli(Some(root.to_path_buf()), false);
        config
    }

    #[test]
    fn package_paths_follow_the_volume_layout() {
        let config = Config::default();
        assert_eq!(
            user_ce_package(&config, None, 10, "com.ex"),
            Path::new("/data/user/10/com.ex")
        );
        assert_eq!(
            user_de_package(&config, None, 10, "com.ex"),
            Path::new("/data/user_de/10/com.ex")
        );
        assert_eq!(
            user_ce_package(&config, Some("57f8f4bc"), 0, "com.ex"),
            Path::new("/mnt/expand/57f8f4bc/user/0/com.ex")
        );
        assert_eq!(
            media_user_dir(&config, None, 0),
            Path::new("/data/media/0")
        );
    }

    #[test]
    fn dalvik_cache_path_flattens_the_source() {
        let config = Config::default();
        let path =
            dalvik_cache_path(&config, Path::new("/data/app/com.ex-1/base.apk"), "arm64").unwrap();
        assert_eq!(
            path,
            Path::new("/data/dalvik-cache/arm64/data@app@com.ex-1@base.apk@classes.dex")
        );
        assert!(dalvik_cache_path(&config, Path::new("relative.apk"), "arm").is_err());
    }

    #[test]
    fn oat_and_odex_paths_replace_the_extension() {
        let oat = oat_path(
            Path::new("/data/app/com.ex-1/oat"),
            Path::new("/data/app/com.ex-1/base.apk"),
            "arm64",
        )
        .unwrap();
        assert_eq!(oat, Path::new("/data/app/com.ex-1/oat/arm64/base.odex"));

        let odex = odex_path(Path::new("/data/app/com.ex-1/base.apk"), "arm").unwrap();
        assert_eq!(odex, Path::new("/data/app/com.ex-1/oat/arm/base.odex"));

        assert!(oat_path(
            Path::new("/data/app/x/oat"),
            Path::new("/data/app/x/noext"),
            "arm"
        )
        .is_err());
    }

    #[test]
    fn flatten_path_law() {
        assert_eq!(
            flatten_path("P/", ".S", "/a/b/c.apk").unwrap(),
            "P/a@b@c.apk.S"
        );
        assert!(flatten_path("P/", ".S", "relative").is_err());
        assert!(flatten_path("P/", ".S", "/").is_err());
    }

    #[test]
    fn idmap_path_uses_the_resource_cache() {
        let config = Config::default();
        assert_eq!(
            idmap_path(&config, Path::new("/vendor/overlay/theme.apk")).unwrap(),
            Path::new("/data/resource-cache/vendor@overlay@theme.apk@idmap")
        );
    }

    #[test]
    fn apk_validation_enforces_roots_and_depth() {
        let config = Config::default();
        assert!(validate_apk_path(&config, Path::new("/data/app/com.ex-1/base.apk")).is_ok());
        assert!(validate_apk_path(&config, Path::new("/data/app/base.apk")).is_ok());
        assert!(validate_apk_path(&config, Path::new("/data/app/a/b/c.apk")).is_err());
        assert!(validate_apk_path(&config, Path::new("/data/data/com.ex/x.apk")).is_err());
        assert!(validate_apk_path(&config, Path::new("/data/app/../data/x.apk")).is_err());
        assert!(
            validate_apk_path_subdirs(&config, Path::new("/data/app/a/b/c/d.apk")).is_ok()
        );
        // Adopted volumes carry uuid/app between the root and the package.
        assert!(
            validate_apk_path(&config, Path::new("/mnt/expand/57f8f4bc/app/com.ex-1/base.apk"))
                .is_ok()
        );
        assert!(validate_apk_path(&config, Path::new("/mnt/expand/57f8f4bc")).is_err());
        assert!(validate_system_app_path(&config, Path::new("/system/app/Maps.apk")).is_ok());
        assert!(validate_system_app_path(&config, Path::new("/data/app/x.apk")).is_err());
    }

    #[test]
    fn package_names_are_constrained() {
        assert!(validate_package_name("com.example.app").is_ok());
        assert!(validate_package_name("pkg_1-x").is_ok());
        assert!(validate_package_name("..").is_err());
        assert!(validate_package_name("a/b").is_err());
        assert!(validate_package_name("").is_err());
        assert!(validate_package_name("bad\u{0}name").is_err());
    }

    #[test]
    fn known_users_lists_numeric_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let user_root = tmp.path().join("user");
        fs::create_dir_all(user_root.join("0")).unwrap();
        fs::create_dir_all(user_root.join("11")).unwrap();
        fs::create_dir_all(user_root.join("lost+found")).unwrap();
        fs::write(user_root.join("5"), b"file not dir").unwrap();
        assert_eq!(known_users(&config, None), vec![0, 11]);
        assert!(known_users(&config, Some("missing")).is_empty());
    }

    #[test]
    fn multiuser_uid_combines_user_and_appid() {
        assert_eq!(multiuser_uid(0, 10042), 10042);
        assert_eq!(multiuser_uid(10, 10042), 1_010_042);
    }
}
