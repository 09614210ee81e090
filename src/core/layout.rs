// Copyright 2025 Appdatad Authors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    fs,
    io::ErrorKind,
    os::unix::fs::{MetadataExt, symlink},
    path::Path,
};

use crate::{
    conf::config::Config,
    defs,
    error::{Error, Result},
    paths, utils,
};

/// Prepares the CE and/or DE package directory for one user: mode `0751`,
/// owned by the synthetic per-user app uid, labeled for the app. Either step
/// failing is fatal; the caller retries or destroys.
pub fn create_app_data(
    config: &Config,
    uuid: Option<&str>,
    pkg: &str,
    user: u32,
    flags: u32,
    appid: u32,
    seinfo: &str,
) -> Result<()> {
    paths::validate_package_name(pkg)?;
    let uid = paths::multiuser_uid(user, appid);
    if flags & defs::FLAG_CE_STORAGE != 0 {
        let path = paths::user_ce_package(config, uuid, user, pkg);
        utils::ensure_dir(&path, 0o751, uid, uid)?;
        utils::set_app_label(&path, seinfo, uid)?;
    }
    if flags & defs::FLAG_DE_STORAGE != 0 {
        let path = paths::user_de_package(config, uuid, user, pkg);
        utils::ensure_dir(&path, 0o751, uid, uid)?;
        utils::set_app_label(&path, seinfo, uid)?;
    }
    Ok(())
}

fn clear_suffix(flags: u32) -> Option<&'static str> {
    if flags & defs::FLAG_CLEAR_CACHE_ONLY != 0 {
        Some(defs::CACHE_DIR_NAME)
    } else if flags & defs::FLAG_CLEAR_CODE_CACHE_ONLY != 0 {
        Some(defs::CODE_CACHE_DIR_NAME)
    } else {
        None
    }
}

fn accumulate(res: &mut Result<()>, step: Result<()>) {
    if let Err(e) = step {
        log::error!("{}", e);
        if res.is_ok() {
            *res = Err(e);
        }
    }
}

/// Empties the package directory (or just its cache/code_cache subtree),
/// leaving the directory itself in place. Missing directories are success.
pub fn clear_app_data(
    config: &Config,
    uuid: Option<&str>,
    pkg: &str,
    user: u32,
    flags: u32,
) -> Result<()> {
    paths::validate_package_name(pkg)?;
    let suffix = clear_suffix(flags);
    let mut res = Ok(());
    if flags & defs::FLAG_CE_STORAGE != 0 {
        let mut path = paths::user_ce_package(config, uuid, user, pkg);
        if let Some(suffix) = suffix {
            path = path.join(suffix);
        }
        accumulate(&mut res, utils::delete_dir_contents(&path, false));
    }
    if flags & defs::FLAG_DE_STORAGE != 0 {
        let mut path = paths::user_de_package(config, uuid, user, pkg);
        if let Some(suffix) = suffix {
            path = path.join(suffix);
        }
        accumulate(&mut res, utils::delete_dir_contents(&path, false));
    }
    res
}

/// Removes the package directories outright.
pub fn destroy_app_data(
    config: &Config,
    uuid: Option<&str>,
    pkg: &str,
    user: u32,
    flags: u32,
) -> Result<()> {
    paths::validate_package_name(pkg)?;
    let mut res = Ok(());
    if flags & defs::FLAG_CE_STORAGE != 0 {
        let path = paths::user_ce_package(config, uuid, user, pkg);
        accumulate(&mut res, utils::delete_dir_contents(&path, true));
    }
    if flags & defs::FLAG_DE_STORAGE != 0 {
        let path = paths::user_de_package(config, uuid, user, pkg);
        accumulate(&mut res, utils::delete_dir_contents(&path, true));
    }
    res
}

/// Recursively re-applies the app label. A failure on either storage half is
/// fatal; both halves are still attempted.
pub fn restorecon_app_data(
    config: &Config,
    uuid: Option<&str>,
    pkg: &str,
    user: u32,
    flags: u32,
    appid: u32,
    seinfo: &str,
) -> Result<()> {
    paths::validate_package_name(pkg)?;
    let uid = paths::multiuser_uid(user, appid);
    let mut res = Ok(());
    if flags & defs::FLAG_CE_STORAGE != 0 {
        let path = paths::user_ce_package(config, uuid, user, pkg);
        accumulate(&mut res, utils::restorecon_app_tree(&path, seinfo, uid));
    }
    if flags & defs::FLAG_DE_STORAGE != 0 {
        let path = paths::user_de_package(config, uuid, user, pkg);
        accumulate(&mut res, utils::restorecon_app_tree(&path, seinfo, uid));
    }
    res
}

/// Drops every per-user tree of one user on one volume. Failures aggregate;
/// every subtree is attempted.
pub fn delete_user(config: &Config, uuid: Option<&str>, user: u32) -> Result<()> {
    let mut res = Ok(());
    accumulate(
        &mut res,
        utils::delete_dir_contents(&paths::user_ce_root(config, uuid, user), true),
    );
    accumulate(
        &mut res,
        utils::delete_dir_contents(&paths::user_de_root(config, uuid, user), true),
    );
    accumulate(
        &mut res,
        utils::delete_dir_contents(&paths::media_user_dir(config, uuid, user), true),
    );
    // Config trees only exist on the built-in volume.
    if uuid.is_none() {
        accumulate(
            &mut res,
            utils::delete_dir_contents(&paths::user_config_dir(config, user), true),
        );
    }
    res
}

/// Per-user config directory: writable by the system, readable by every app
/// of that user.
pub fn make_user_config(config: &Config, user: u32) -> Result<()> {
    let path = paths::user_config_dir(config, user);
    utils::ensure_dir(
        &path,
        0o750,
        defs::AID_SYSTEM,
        paths::multiuser_uid(user, defs::AID_EVERYBODY),
    )
}

fn replace_lib_entry(lib: &Path, asec_lib_dir: &Path) -> Result<()> {
    match fs::symlink_metadata(lib) {
        Ok(meta) if meta.is_dir() => utils::delete_dir_contents(lib, true)?,
        Ok(meta) if meta.is_symlink() => {
            fs::remove_file(lib).map_err(|e| Error::io("unlink", lib, e))?
        }
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(Error::io("stat", lib, e)),
    }
    symlink(asec_lib_dir, lib).map_err(|e| Error::io("symlink", lib, e))
}

/// Swaps the package's `lib` entry for a symlink into the mounted container.
/// The package directory is handed to the install user and locked down for
/// the duration; its original owner and mode come back on every exit path.
pub fn linklib(
    config: &Config,
    uuid: Option<&str>,
    pkg: &str,
    asec_lib_dir: &Path,
    user: u32,
) -> Result<()> {
    paths::validate_package_name(pkg)?;
    let pkgdir = paths::user_ce_package(config, uuid, user, pkg);
    let lib = pkgdir.join(defs::LIB_DIR_NAME);

    let meta = fs::symlink_metadata(&pkgdir).map_err(|e| Error::io("stat", &pkgdir, e))?;
    utils::chown_path(&pkgdir, defs::AID_INSTALL, defs::AID_INSTALL)?;

    let mut res = utils::chmod_path(&pkgdir, 0o700)
        .and_then(|()| replace_lib_entry(&lib, asec_lib_dir));

    accumulate(&mut res, utils::chmod_path(&pkgdir, meta.mode() & 0o7777));
    accumulate(&mut res, utils::chown_path(&pkgdir, meta.uid(), meta.gid()));
    res
}

/// Hard-links one file between two validated package code trees.
pub fn link_file(config: &Config, relative_path: &str, from_base: &Path, to_base: &Path) -> Result<()> {
    let from = from_base.join(relative_path);
    let to = to_base.join(relative_path);
    paths::validate_apk_path_subdirs(config, &from)?;
    paths::validate_apk_path_subdirs(config, &to)?;
    fs::hard_link(&from, &to).map_err(|e| Error::io("link", &to, e))
}

/// Prepares `<oat_dir>/<isa>` for compiled output, system-owned and
/// install-group writable.
pub fn create_oat_dir(config: &Config, oat_dir: &Path, isa: &str) -> Result<()> {
    paths::validate_apk_path(config, oat_dir)?;
    utils::ensure_dir(oat_dir, 0o775, defs::AID_SYSTEM, defs::AID_INSTALL)?;
    utils::restorecon_code_tree(oat_dir, false)?;
    utils::ensure_dir(
        &oat_dir.join(isa),
        0o775,
        defs::AID_SYSTEM,
        defs::AID_INSTALL,
    )
}

pub fn rm_package_dir(config: &Config, apk_dir: &Path) -> Result<()> {
    paths::validate_apk_path(config, apk_dir)?;
    utils::delete_dir_contents(apk_dir, true)
}

/// Drops the dalvik-cache artifact for a code path. A missing artifact is
/// still a reported failure, matching the historical return convention.
pub fn rm_dex(config: &Config, apk_path: &Path, isa: &str) -> Result<()> {
    if paths::validate_apk_path(config, apk_path).is_err()
        && paths::validate_system_app_path(config, apk_path).is_err()
    {
        return Err(Error::BadPath(apk_path.to_path_buf()));
    }
    let dex_path = paths::dalvik_cache_path(config, apk_path, isa)?;
    fs::remove_file(&dex_path).map_err(|e| {
        if e.kind() != ErrorKind::NotFound {
            log::error!("Failed to unlink {}: {}", dex_path.display(), e);
        }
        Error::io("unlink", &dex_path, e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::{getegid, geteuid};
    use std::path::PathBuf;

    // Self-ownership makes the chown in ensure_dir legal without privilege,
    // as long as the caller's uid doubles as a usable gid.
    fn own_appid() -> Option<u32> {
        let uid = geteuid().as_raw();
        if uid == 0 || uid == getegid().as_raw() {
            Some(uid)
        } else {
            None
        }
    }

    fn fixture() -> (tempfile::TempDir, Config) {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.merge_with_cli(Some(tmp.path().to_path_buf()), false);
        std::fs::create_dir_all(tmp.path().join("user/0")).unwrap();
        std::fs::create_dir_all(tmp.path().join("user_de/0")).unwrap();
        (tmp, config)
    }

    const BOTH: u32 = defs::FLAG_CE_STORAGE | defs::FLAG_DE_STORAGE;

    #[test]
    fn create_then_clear_cache_keeps_files() {
        let Some(appid) = own_appid() else { return };
        let (tmp, config) = fixture();

        create_app_data(&config, None, "com.ex", 0, BOTH, appid, "default").unwrap();
        let ce = paths::user_ce_package(&config, None, 0, "com.ex");
        let de = paths::user_de_package(&config, None, 0, "com.ex");
        assert!(ce.is_dir() && de.is_dir());
        assert_eq!(fs::metadata(&ce).unwrap().mode() & 0o7777, 0o751);

        // Creating again over matching directories is a no-op.
        create_app_data(&config, None, "com.ex", 0, BOTH, appid, "default").unwrap();

        fs::create_dir(ce.join("cache")).unwrap();
        fs::create_dir(ce.join("files")).unwrap();
        fs::write(ce.join("cache/x"), b"c").unwrap();
        fs::write(ce.join("files/y"), b"d").unwrap();

        clear_app_data(
            &config,
            None,
            "com.ex",
            0,
            BOTH | defs::FLAG_CLEAR_CACHE_ONLY,
        )
        .unwrap();
        assert!(!ce.join("cache/x").exists());
        assert!(ce.join("cache").is_dir());
        assert!(ce.join("files/y").exists());

        drop(tmp);
    }

    #[test]
    fn clear_is_idempotent_and_tolerates_missing_dirs() {
        let Some(appid) = own_appid() else { return };
        let (_tmp, config) = fixture();
        create_app_data(&config, None, "com.ex", 0, BOTH, appid, "default").unwrap();

        clear_app_data(&config, None, "com.ex", 0, BOTH).unwrap();
        clear_app_data(&config, None, "com.ex", 0, BOTH).unwrap();
        // Never-created package: still success.
        clear_app_data(&config, None, "com.ghost", 0, BOTH).unwrap();
    }

    #[test]
    fn destroy_undoes_create() {
        let Some(appid) = own_appid() else { return };
        let (_tmp, config) = fixture();

        create_app_data(&config, None, "com.ex", 0, BOTH, appid, "default").unwrap();
        let ce = paths::user_ce_package(&config, None, 0, "com.ex");
        fs::write(ce.join("data"), b"x").unwrap();

        destroy_app_data(&config, None, "com.ex", 0, BOTH).unwrap();
        assert!(!ce.exists());
        assert!(!paths::user_de_package(&config, None, 0, "com.ex").exists());
    }

    #[test]
    fn create_rejects_hostile_package_names() {
        let (_tmp, config) = fixture();
        assert!(matches!(
            create_app_data(&config, None, "../escape", 0, BOTH, 10042, "default"),
            Err(Error::BadPath(_))
        ));
    }

    #[test]
    fn delete_user_clears_every_root() {
        let (tmp, config) = fixture();
        fs::create_dir_all(tmp.path().join("media/0/pics")).unwrap();
        fs::create_dir_all(tmp.path().join("misc/user/0")).unwrap();
        fs::write(tmp.path().join("user/0/junk"), b"x").unwrap();

        delete_user(&config, None, 0).unwrap();
        assert!(!tmp.path().join("user/0").exists());
        assert!(!tmp.path().join("user_de/0").exists());
        assert!(!tmp.path().join("media/0").exists());
        assert!(!tmp.path().join("misc/user/0").exists());
    }

    #[test]
    fn linklib_swaps_lib_for_a_symlink_and_restores_owner() {
        let Some(appid) = own_appid() else { return };
        if appid != 0 {
            // The temporary install-uid handoff requires privilege.
            return;
        }
        let (tmp, config) = fixture();
        create_app_data(&config, None, "com.ex", 0, BOTH, appid, "default").unwrap();
        let pkgdir = paths::user_ce_package(&config, None, 0, "com.ex");
        fs::create_dir(pkgdir.join("lib")).unwrap();
        fs::write(pkgdir.join("lib/old.so"), b"o").unwrap();

        let asec = tmp.path().join("asec-lib");
        fs::create_dir(&asec).unwrap();
        linklib(&config, None, "com.ex", &asec, 0).unwrap();

        let lib = pkgdir.join("lib");
        assert!(fs::symlink_metadata(&lib).unwrap().is_symlink());
        assert_eq!(fs::read_link(&lib).unwrap(), asec);
        let meta = fs::metadata(&pkgdir).unwrap();
        assert_eq!(meta.mode() & 0o7777, 0o751);
        assert_eq!(meta.uid(), appid);
    }

    #[test]
    fn link_file_validates_both_ends() {
        let (tmp, config) = fixture();
        let from_base = config.app_dir.join("com.ex-1");
        let to_base = config.app_dir.join("com.ex-2");
        fs::create_dir_all(&from_base).unwrap();
        fs::create_dir_all(&to_base).unwrap();
        fs::write(from_base.join("base.apk"), b"apk").unwrap();

        link_file(&config, "base.apk", &from_base, &to_base).unwrap();
        assert!(to_base.join("base.apk").exists());

        assert!(matches!(
            link_file(&config, "x", Path::new("/etc"), &to_base),
            Err(Error::BadPath(_))
        ));
        drop(tmp);
    }

    #[test]
    fn oat_dir_requires_a_trusted_prefix() {
        let (_tmp, config) = fixture();
        assert!(matches!(
            create_oat_dir(&config, Path::new("/tmp/oat"), "arm64"),
            Err(Error::BadPath(_))
        ));
    }

    #[test]
    fn create_oat_dir_builds_the_isa_tree() {
        if geteuid().as_raw() != 0 {
            return;
        }
        let (_tmp, config) = fixture();
        let oat_dir = config.app_dir.join("com.ex-1").join("oat");
        fs::create_dir_all(oat_dir.parent().unwrap()).unwrap();
        create_oat_dir(&config, &oat_dir, "arm64").unwrap();
        let meta = fs::metadata(oat_dir.join("arm64")).unwrap();
        assert_eq!(meta.mode() & 0o7777, 0o775);
        assert_eq!(meta.uid(), defs::AID_SYSTEM);
        assert_eq!(meta.gid(), defs::AID_INSTALL);
    }

    #[test]
    fn rm_package_dir_validates_then_deletes() {
        let (_tmp, config) = fixture();
        let pkg = config.app_dir.join("com.ex-1");
        fs::create_dir_all(pkg.join("oat")).unwrap();
        fs::write(pkg.join("base.apk"), b"apk").unwrap();

        rm_package_dir(&config, &pkg).unwrap();
        assert!(!pkg.exists());

        assert!(matches!(
            rm_package_dir(&config, Path::new("/etc")),
            Err(Error::BadPath(_))
        ));
    }

    #[test]
    fn rm_dex_reports_missing_artifacts() {
        let (_tmp, config) = fixture();
        let apk = config.app_dir.join("com.ex-1").join("base.apk");
        assert!(matches!(
            rm_dex(&config, &apk, "arm64"),
            Err(Error::Io { .. })
        ));

        let cache = paths::dalvik_cache_path(&config, &apk, "arm64").unwrap();
        fs::create_dir_all(cache.parent().unwrap()).unwrap();
        fs::write(&cache, b"dex").unwrap();
        rm_dex(&config, &apk, "arm64").unwrap();
        assert!(!cache.exists());

        assert!(matches!(
            rm_dex(&config, &PathBuf::from("/evil/base.apk"), "arm64"),
            Err(Error::BadPath(_))
        ));
    }
}
