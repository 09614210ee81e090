// Copyright 2025 Appdatad Authors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    ffi::CString,
    fs,
    io::ErrorKind,
    os::fd::{AsFd, AsRawFd, OwnedFd},
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
};

use rustix::fs::{Mode, OFlags, fchmod, fchown, open, openat};
use rustix::io::Errno;

use crate::{
    conf::config::Config,
    defs,
    error::{Error, Result},
    exec, paths,
    props::Props,
    utils,
};

const PATCHED_IMAGE_LOCATION: &str = "/system/framework/boot.art";

const ALWAYS_PROVIDE_SWAP_FILE: bool = false;

const DEFAULT_PROVIDE_SWAP_FILE: bool = true;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DexoptNeeded {
    Dex2oat,
    Patchoat,
    SelfPatchoat,
}

impl DexoptNeeded {
    pub fn from_raw(raw: i32) -> Result<Self> {
        match raw {
            1 => Ok(Self::Dex2oat),
            2 => Ok(Self::Patchoat),
            3 => Ok(Self::SelfPatchoat),
            _ => Err(Error::BadFlags(raw as u32)),
        }
    }
}

pub struct DexoptParams<'a> {
    pub apk_path: &'a Path,
    pub uid: u32,
    pub pkg: &'a str,
    pub isa: &'a str,
    pub needed: DexoptNeeded,
    pub oat_dir: Option<&'a Path>,
    pub flags: u32,
    pub volume_uuid: Option<&'a str>,
    pub use_profiles: bool,
}

/// Prepares a sandboxed compile of one package: opens every input and output
/// descriptor, forks the privilege-dropped compiler through the subprocess
/// driver, and stamps the output with the input's timestamps. The output
/// file never survives a failure.
pub fn dexopt(config: &Config, props: &Props, p: &DexoptParams) -> Result<()> {
    let unknown = p.flags & !defs::DEXOPT_MASK;
    if unknown != 0 {
        return Err(Error::BadFlags(unknown));
    }
    // The swap-file name needs a little headroom on top of the output path.
    if p.apk_path.as_os_str().len() >= defs::PKG_PATH_MAX - 8 {
        return Err(Error::PathTooLong(p.apk_path.to_path_buf()));
    }
    if p.isa.len() > defs::MAX_ISA_LEN {
        return Err(Error::PathTooLong(PathBuf::from(p.isa)));
    }

    let mut profile_fds = Vec::new();
    if p.use_profiles {
        profile_fds = open_profile_files(config, p.volume_uuid, p.uid, p.pkg);
        if profile_fds.is_empty() {
            // No profiles anywhere: nothing to guide the compiler with.
            log::debug!("no profiles for {}, skipping profile-guided compile", p.pkg);
            return Ok(());
        }
    }

    let out_path = match p.oat_dir {
        Some(oat_dir) => {
            paths::validate_apk_path(config, oat_dir)?;
            paths::oat_path(oat_dir, p.apk_path, p.isa)?
        }
        None => paths::dalvik_cache_path(config, p.apk_path, p.isa)?,
    };

    let input_file = match p.needed {
        DexoptNeeded::Dex2oat => p.apk_path.to_path_buf(),
        DexoptNeeded::Patchoat => paths::odex_path(p.apk_path, p.isa)?,
        DexoptNeeded::SelfPatchoat => out_path.clone(),
    };

    // Remembered up front so the finished artifact can mirror its input.
    let input_times = fs::metadata(&input_file)
        .ok()
        .map(|m| ((m.atime(), m.atime_nsec()), (m.mtime(), m.mtime_nsec())));

    let input_fd = open(&input_file, OFlags::RDONLY, Mode::empty())
        .map_err(|e| Error::errno("open", &input_file, e))?;

    match fs::remove_file(&out_path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(Error::io("unlink", &out_path, e)),
    }
    let out_fd = open(
        &out_path,
        OFlags::RDWR | OFlags::CREATE | OFlags::EXCL,
        Mode::from_raw_mode(0o644),
    )
    .map_err(|e| Error::errno("open", &out_path, e))?;

    let res = run_backend(
        config,
        props,
        p,
        &input_file,
        &input_fd,
        &out_path,
        &out_fd,
        &profile_fds,
    );
    match res {
        Ok(()) => {
            if let Some((atime, mtime)) = input_times {
                let _ = utils::set_times(&out_path, atime, mtime);
            }
            Ok(())
        }
        Err(e) => {
            let _ = fs::remove_file(&out_path);
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_backend(
    config: &Config,
    props: &Props,
    p: &DexoptParams,
    input_file: &Path,
    input_fd: &OwnedFd,
    out_path: &Path,
    out_fd: &OwnedFd,
    profile_fds: &[(OwnedFd, OwnedFd)],
) -> Result<()> {
    let is_public = p.flags & defs::DEXOPT_PUBLIC != 0;
    let boot_complete = p.flags & defs::DEXOPT_BOOTCOMPLETE != 0;

    let mode = if is_public { 0o644 } else { 0o640 };
    fchmod(out_fd, Mode::from_raw_mode(mode)).map_err(|e| Error::errno("fchmod", out_path, e))?;
    unsafe {
        fchown(
            out_fd,
            Some(rustix::fs::Uid::from_raw(defs::AID_SYSTEM)),
            Some(rustix::fs::Gid::from_raw(p.uid)),
        )
        .map_err(|e| Error::errno("fchown", out_path, e))?;
    }

    let swap_fd = if should_use_swap_file(props) {
        create_swap_file(out_path)
    } else {
        None
    };

    let profile_raw: Vec<(i32, i32)> = profile_fds
        .iter()
        .map(|(current, reference)| (current.as_raw_fd(), reference.as_raw_fd()))
        .collect();

    let (bin, argv) = match p.needed {
        DexoptNeeded::Dex2oat => (
            config.dex2oat_bin.as_path(),
            dex2oat_args(
                &config.dex2oat_bin,
                props,
                input_fd.as_raw_fd(),
                input_file,
                out_fd.as_raw_fd(),
                out_path,
                swap_fd.as_ref().map(|fd| fd.as_raw_fd()),
                p.isa,
                p.flags,
                &profile_raw,
            ),
        ),
        DexoptNeeded::Patchoat | DexoptNeeded::SelfPatchoat => (
            config.patchoat_bin.as_path(),
            patchoat_args(
                &config.patchoat_bin,
                p.isa,
                out_fd.as_raw_fd(),
                input_fd.as_raw_fd(),
            ),
        ),
    };

    log::debug!(
        "compiling {} into {} via {}",
        input_file.display(),
        out_path.display(),
        bin.display()
    );
    match exec::run_dropped(bin, &argv, p.uid, boot_complete, Some(out_fd.as_fd())) {
        Err(Error::ChildFailure { code, .. }) if code == exec::EXIT_FLOCK => {
            Err(Error::LockContended(out_path.to_path_buf()))
        }
        other => other,
    }
}

/// A swap file is offered to the compiler unless the override property says
/// otherwise; it lives only as an unlinked open descriptor.
fn should_use_swap_file(props: &Props) -> bool {
    if ALWAYS_PROVIDE_SWAP_FILE {
        return true;
    }
    if let Some(value) = props.raw("dalvik.vm.dex2oat-swap") {
        return value == "true";
    }
    if DEFAULT_PROVIDE_SWAP_FILE {
        return true;
    }
    props.get_bool("ro.config.low_ram", false)
}

fn create_swap_file(out_path: &Path) -> Option<OwnedFd> {
    let mut name = out_path.as_os_str().to_os_string();
    name.push(".swap");
    let swap_path = PathBuf::from(name);
    if swap_path.as_os_str().len() >= defs::PKG_PATH_MAX {
        log::error!("swap path too long for {}", out_path.display());
        return None;
    }
    let _ = fs::remove_file(&swap_path);
    match open(
        &swap_path,
        OFlags::RDWR | OFlags::CREATE | OFlags::EXCL,
        Mode::from_raw_mode(0o600),
    ) {
        Ok(fd) => {
            // Keep it off flash; the descriptor is the only reference.
            let _ = fs::remove_file(&swap_path);
            Some(fd)
        }
        Err(e) => {
            // The compile can still run, just without swap.
            log::error!("could not create {}: {}", swap_path.display(), e);
            None
        }
    }
}

fn arg(s: String) -> CString {
    CString::new(s).expect("argument contains NUL")
}

#[allow(clippy::too_many_arguments)]
fn dex2oat_args(
    bin: &Path,
    props: &Props,
    zip_fd: i32,
    input_file: &Path,
    oat_fd: i32,
    out_path: &Path,
    swap_fd: Option<i32>,
    isa: &str,
    flags: u32,
    profile_fds: &[(i32, i32)],
) -> Vec<CString> {
    let vm_safe_mode = flags & defs::DEXOPT_SAFEMODE != 0;
    let boot_complete = flags & defs::DEXOPT_BOOTCOMPLETE != 0;

    let xms = props.raw("dalvik.vm.dex2oat-Xms");
    let xmx = props.raw("dalvik.vm.dex2oat-Xmx");
    let threads = props.raw(if boot_complete {
        "dalvik.vm.dex2oat-threads"
    } else {
        "dalvik.vm.boot-dex2oat-threads"
    });
    let isa_variant = props.raw(&format!("dalvik.vm.isa.{}.variant", isa));
    let isa_features = props.raw(&format!("dalvik.vm.isa.{}.features", isa));
    let extra_flags = props.get_string("dalvik.vm.dex2oat-flags", "");

    // Booting against a minimal framework means the real data partition is
    // still locked; compiling now would be wasted work.
    let vold_decrypt = props.get_string("vold.decrypt", "");
    let skip_compilation =
        vold_decrypt == "trigger_restart_min_framework" || vold_decrypt == "1";

    let use_jit = flags & defs::DEXOPT_USEJIT != 0 || props.get_bool("debug.usejit", false);
    let debuggable = flags & defs::DEXOPT_DEBUGGABLE != 0
        || props.raw("dalvik.vm.always_debuggable").as_deref() == Some("1");
    let generate_debug_info = props.get_bool("debug.generate-debug-info", false);

    let compiler_filter = if skip_compilation {
        Some("verify-none".to_string())
    } else if vm_safe_mode {
        Some("interpret-only".to_string())
    } else if use_jit {
        Some("verify-at-runtime".to_string())
    } else {
        props.raw("dalvik.vm.dex2oat-filter")
    };

    let mut argv = vec![arg(bin.display().to_string())];
    argv.push(arg(format!("--zip-fd={}", zip_fd)));
    argv.push(arg(format!("--zip-location={}", input_file.display())));
    argv.push(arg(format!("--oat-fd={}", oat_fd)));
    argv.push(arg(format!("--oat-location={}", out_path.display())));
    argv.push(arg(format!("--instruction-set={}", isa)));
    if let Some(variant) = isa_variant {
        argv.push(arg(format!("--instruction-set-variant={}", variant)));
    }
    if let Some(features) = isa_features {
        argv.push(arg(format!("--instruction-set-features={}", features)));
    }
    if let Some(xms) = xms {
        argv.push(arg("--runtime-arg".to_string()));
        argv.push(arg(format!("-Xms{}", xms)));
    }
    if let Some(xmx) = xmx {
        argv.push(arg("--runtime-arg".to_string()));
        argv.push(arg(format!("-Xmx{}", xmx)));
    }
    if let Some(filter) = compiler_filter {
        argv.push(arg(format!("--compiler-filter={}", filter)));
    }
    if let Some(threads) = threads {
        argv.push(arg(format!("-j{}", threads)));
    }
    if let Some(swap_fd) = swap_fd {
        argv.push(arg(format!("--swap-fd={}", swap_fd)));
    }
    if generate_debug_info {
        argv.push(arg("--generate-debug-info".to_string()));
    }
    if debuggable {
        argv.push(arg("--debuggable".to_string()));
    }
    // Debug flags go last of the fixed set so they can override the rest.
    for flag in extra_flags.split_whitespace() {
        argv.push(arg(flag.to_string()));
    }
    if skip_compilation {
        argv.push(arg("--runtime-arg".to_string()));
        argv.push(arg("-Xnorelocate".to_string()));
    }
    for (profile_fd, reference_fd) in profile_fds {
        argv.push(arg(format!("--profile-file-fd={}", profile_fd)));
        argv.push(arg(format!("--reference-profile-file-fd={}", reference_fd)));
    }
    argv
}

fn patchoat_args(bin: &Path, isa: &str, oat_fd: i32, input_fd: i32) -> Vec<CString> {
    vec![
        arg(bin.display().to_string()),
        arg(format!("--patched-image-location={}", PATCHED_IMAGE_LOCATION)),
        arg("--no-lock-output".to_string()),
        arg(format!("--instruction-set={}", isa)),
        arg(format!("--output-oat-fd={}", oat_fd)),
        arg(format!("--input-oat-fd={}", input_fd)),
    ]
}

/// Opens the current and reference profile of every user that has one. Only
/// complete pairs are kept; a reference profile that cannot be handed to the
/// app uid costs that user its profiles, not the whole compile.
fn open_profile_files(
    config: &Config,
    uuid: Option<&str>,
    uid: u32,
    pkg: &str,
) -> Vec<(OwnedFd, OwnedFd)> {
    let mut pairs = Vec::new();
    for user in paths::known_users(config, uuid) {
        let code_cache =
            paths::user_ce_package(config, uuid, user, pkg).join(defs::CODE_CACHE_DIR_NAME);
        let dir_fd = match open(
            &code_cache,
            OFlags::PATH | OFlags::DIRECTORY | OFlags::CLOEXEC | OFlags::NOFOLLOW,
            Mode::empty(),
        ) {
            Ok(fd) => fd,
            Err(Errno::NOENT) => continue,
            Err(e) => {
                log::error!("Failed to open {}: {}", code_cache.display(), e);
                continue;
            }
        };

        // Read-write: the compiler folds the current profile into the
        // reference profile as it consumes it.
        let profile_name = format!("{}{}", pkg, defs::PROFILE_EXT);
        let profile_fd = match openat(
            &dir_fd,
            profile_name.as_str(),
            OFlags::RDWR | OFlags::NOFOLLOW,
            Mode::empty(),
        ) {
            Ok(fd) => fd,
            Err(Errno::NOENT) => continue,
            Err(e) => {
                log::error!("Failed to open profile for user {}: {}", user, e);
                continue;
            }
        };

        let reference_name = format!("{}{}", pkg, defs::REFERENCE_PROFILE_EXT);
        let reference_fd = match openat(
            &dir_fd,
            reference_name.as_str(),
            OFlags::CREATE | OFlags::RDWR | OFlags::NOFOLLOW,
            Mode::from_raw_mode(0o600),
        ) {
            Ok(fd) => fd,
            Err(e) => {
                log::error!("Failed to open reference profile for user {}: {}", user, e);
                continue;
            }
        };
        let chown_res = unsafe {
            fchown(
                &reference_fd,
                Some(rustix::fs::Uid::from_raw(uid)),
                Some(rustix::fs::Gid::from_raw(uid)),
            )
        };
        if let Err(e) = chown_res {
            log::error!("Cannot hand reference profile to uid {}: {}", uid, e);
            continue;
        }
        pairs.push((profile_fd, reference_fd));
    }
    pairs
}

/// Drops the per-isa boot marker once the framework reports a finished boot.
pub fn mark_boot_complete(config: &Config, isa: &str) -> Result<()> {
    let marker = paths::boot_marker_path(config, isa);
    fs::remove_file(&marker).map_err(|e| {
        log::error!("Unable to unlink boot marker {}: {}", marker.display(), e);
        Error::io("unlink", &marker, e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::geteuid;
    use std::os::unix::fs::PermissionsExt;

    fn fixture() -> (tempfile::TempDir, Config) {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.merge_with_cli(Some(tmp.path().to_path_buf()), false);
        (tmp, config)
    }

    fn props(pairs: &[(&str, &str)]) -> Props {
        Props::fixed(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn fake_compiler(dir: &Path, name: &str, exit_code: i32) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\nexit {}\n", exit_code)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn base_params<'a>(apk: &'a Path) -> DexoptParams<'a> {
        DexoptParams {
            apk_path: apk,
            uid: 10042,
            pkg: "com.ex",
            isa: "arm64",
            needed: DexoptNeeded::Dex2oat,
            oat_dir: None,
            flags: 0,
            volume_uuid: None,
            use_profiles: false,
        }
    }

    #[test]
    fn unknown_flag_bits_are_rejected() {
        let (_tmp, config) = fixture();
        let apk = Path::new("/data/app/com.ex-1/base.apk");
        let mut p = base_params(apk);
        p.flags = defs::DEXOPT_PUBLIC | (1 << 14);
        match dexopt(&config, &props(&[]), &p) {
            Err(Error::BadFlags(bits)) => assert_eq!(bits, 1 << 14),
            other => panic!("expected BadFlags, got {:?}", other),
        }
    }

    #[test]
    fn oversized_inputs_are_rejected() {
        let (_tmp, config) = fixture();
        let long = format!("/data/app/{}/base.apk", "x".repeat(defs::PKG_PATH_MAX));
        let long_apk = PathBuf::from(long);
        assert!(matches!(
            dexopt(&config, &props(&[]), &base_params(&long_apk)),
            Err(Error::PathTooLong(_))
        ));

        let apk = Path::new("/data/app/com.ex-1/base.apk");
        let mut p = base_params(apk);
        p.isa = "overlong-isa";
        assert!(matches!(
            dexopt(&config, &props(&[]), &p),
            Err(Error::PathTooLong(_))
        ));
    }

    #[test]
    fn profile_mode_without_profiles_is_a_clean_no_op() {
        let (_tmp, config) = fixture();
        let apk = Path::new("/data/app/com.ex-1/base.apk");
        let mut p = base_params(apk);
        p.use_profiles = true;
        dexopt(&config, &props(&[]), &p).unwrap();
        // Nothing was compiled, so no artifact appeared.
        let out = paths::dalvik_cache_path(&config, apk, "arm64").unwrap();
        assert!(!out.exists());
    }

    #[test]
    fn failed_compile_never_leaves_an_output_file() {
        let (tmp, mut config) = fixture();
        config.dex2oat_bin = fake_compiler(tmp.path(), "dex2oat", 1);

        let apk = config.app_dir.join("com.ex-1/base.apk");
        fs::create_dir_all(apk.parent().unwrap()).unwrap();
        fs::write(&apk, b"PK\x03\x04").unwrap();
        let out = paths::dalvik_cache_path(&config, &apk, "arm64").unwrap();
        fs::create_dir_all(out.parent().unwrap()).unwrap();

        let mut p = base_params(&apk);
        p.apk_path = &apk;
        assert!(dexopt(&config, &props(&[]), &p).is_err());
        assert!(!out.exists());
    }

    #[test]
    fn successful_compile_creates_a_stamped_public_artifact() {
        if !geteuid().is_root() {
            return;
        }
        let (tmp, mut config) = fixture();
        config.dex2oat_bin = fake_compiler(tmp.path(), "dex2oat", 0);

        let apk = config.app_dir.join("com.ex-1/base.apk");
        fs::create_dir_all(apk.parent().unwrap()).unwrap();
        fs::write(&apk, b"PK\x03\x04").unwrap();
        utils::set_times(&apk, (111, 0), (222, 0)).unwrap();

        let out = paths::dalvik_cache_path(&config, &apk, "arm64").unwrap();
        fs::create_dir_all(out.parent().unwrap()).unwrap();

        let mut p = base_params(&apk);
        p.apk_path = &apk;
        p.flags = defs::DEXOPT_PUBLIC;
        dexopt(&config, &props(&[]), &p).unwrap();

        let meta = fs::metadata(&out).unwrap();
        assert_eq!(meta.mode() & 0o7777, 0o644);
        assert_eq!(meta.uid(), defs::AID_SYSTEM);
        assert_eq!(meta.gid(), 10042);
        assert_eq!(meta.mtime(), 222);
        // The swap file was unlinked the moment it was opened.
        assert!(!Path::new(&format!("{}.swap", out.display())).exists());
    }

    #[test]
    fn private_artifacts_are_not_world_readable() {
        if !geteuid().is_root() {
            return;
        }
        let (tmp, mut config) = fixture();
        config.dex2oat_bin = fake_compiler(tmp.path(), "dex2oat", 0);

        let apk = config.app_dir.join("com.ex-1/base.apk");
        fs::create_dir_all(apk.parent().unwrap()).unwrap();
        fs::write(&apk, b"PK\x03\x04").unwrap();
        let out = paths::dalvik_cache_path(&config, &apk, "arm64").unwrap();
        fs::create_dir_all(out.parent().unwrap()).unwrap();

        let mut p = base_params(&apk);
        p.apk_path = &apk;
        dexopt(&config, &props(&[]), &p).unwrap();
        assert_eq!(fs::metadata(&out).unwrap().mode() & 0o7777, 0o640);
    }

    #[test]
    fn dex2oat_argv_reflects_properties_and_flags() {
        let bin = Path::new("/system/bin/dex2oat");
        let p = props(&[
            ("dalvik.vm.dex2oat-Xms", "64m"),
            ("dalvik.vm.dex2oat-Xmx", "512m"),
            ("dalvik.vm.dex2oat-threads", "4"),
            ("dalvik.vm.isa.arm64.variant", "cortex-a53"),
            ("dalvik.vm.dex2oat-flags", "--no-watch-dog --abort-on-hard-verifier-error"),
        ]);
        let argv = dex2oat_args(
            bin,
            &p,
            10,
            Path::new("/data/app/com.ex-1/base.apk"),
            11,
            Path::new("/data/dalvik-cache/arm64/out.dex"),
            Some(12),
            "arm64",
            defs::DEXOPT_BOOTCOMPLETE | defs::DEXOPT_DEBUGGABLE,
            &[(13, 14)],
        );
        let argv: Vec<&str> = argv.iter().map(|c| c.to_str().unwrap()).collect();
        assert_eq!(
            argv,
            vec![
                "/system/bin/dex2oat",
                "--zip-fd=10",
                "--zip-location=/data/app/com.ex-1/base.apk",
                "--oat-fd=11",
                "--oat-location=/data/dalvik-cache/arm64/out.dex",
                "--instruction-set=arm64",
                "--instruction-set-variant=cortex-a53",
                "--runtime-arg",
                "-Xms64m",
                "--runtime-arg",
                "-Xmx512m",
                "-j4",
                "--swap-fd=12",
                "--debuggable",
                "--no-watch-dog",
                "--abort-on-hard-verifier-error",
                "--profile-file-fd=13",
                "--reference-profile-file-fd=14",
            ]
        );
    }

    #[test]
    fn filter_priority_prefers_decrypt_then_safemode_then_jit() {
        let bin = Path::new("/system/bin/dex2oat");
        let to_strs = |argv: Vec<CString>| -> Vec<String> {
            argv.iter()
                .map(|c| c.to_str().unwrap().to_string())
                .collect()
        };
        let common = |p: &Props, flags: u32| {
            to_strs(dex2oat_args(
                bin,
                p,
                3,
                Path::new("/data/app/a/b.apk"),
                4,
                Path::new("/data/dalvik-cache/arm/out.dex"),
                None,
                "arm",
                flags,
                &[],
            ))
        };

        // An in-progress decrypt boot wins over everything and skips
        // relocation.
        let argv = common(
            &props(&[
                ("vold.decrypt", "trigger_restart_min_framework"),
                ("dalvik.vm.dex2oat-filter", "speed"),
            ]),
            defs::DEXOPT_SAFEMODE,
        );
        assert!(argv.contains(&"--compiler-filter=verify-none".to_string()));
        assert!(argv.contains(&"-Xnorelocate".to_string()));

        let argv = common(&props(&[]), defs::DEXOPT_SAFEMODE | defs::DEXOPT_USEJIT);
        assert!(argv.contains(&"--compiler-filter=interpret-only".to_string()));

        let argv = common(&props(&[("debug.usejit", "true")]), 0);
        assert!(argv.contains(&"--compiler-filter=verify-at-runtime".to_string()));

        let argv = common(&props(&[("dalvik.vm.dex2oat-filter", "speed")]), 0);
        assert!(argv.contains(&"--compiler-filter=speed".to_string()));

        let argv = common(&props(&[]), 0);
        assert!(!argv.iter().any(|a| a.starts_with("--compiler-filter=")));
    }

    #[test]
    fn patchoat_argv_is_fixed() {
        let argv = patchoat_args(Path::new("/system/bin/patchoat"), "arm", 7, 8);
        let argv: Vec<&str> = argv.iter().map(|c| c.to_str().unwrap()).collect();
        assert_eq!(
            argv,
            vec![
                "/system/bin/patchoat",
                "--patched-image-location=/system/framework/boot.art",
                "--no-lock-output",
                "--instruction-set=arm",
                "--output-oat-fd=7",
                "--input-oat-fd=8",
            ]
        );
    }

    #[test]
    fn swap_policy_prefers_the_property() {
        assert!(should_use_swap_file(&props(&[])));
        assert!(should_use_swap_file(&props(&[(
            "dalvik.vm.dex2oat-swap",
            "true"
        )])));
        assert!(!should_use_swap_file(&props(&[(
            "dalvik.vm.dex2oat-swap",
            "false"
        )])));
    }

    #[test]
    fn profile_collection_pairs_current_and_reference() {
        let uid = geteuid().as_raw();
        if uid != 0 && uid != nix::unistd::getegid().as_raw() {
            // The reference profile is chowned to (uid, uid).
            return;
        }
        let (_tmp, config) = fixture();
        let code_cache = paths::user_ce_package(&config, None, 0, "com.ex").join("code_cache");
        fs::create_dir_all(&code_cache).unwrap();
        fs::write(code_cache.join("com.ex.prof"), b"profile").unwrap();

        let pairs = open_profile_files(&config, None, uid, "com.ex");
        assert_eq!(pairs.len(), 1);
        assert!(code_cache.join("com.ex.prof.ref").exists());

        // A user without a current profile contributes nothing.
        let pairs = open_profile_files(&config, None, uid, "com.other");
        assert!(pairs.is_empty());
    }

    #[test]
    fn needed_selector_parses_the_wire_values() {
        assert_eq!(DexoptNeeded::from_raw(1).unwrap(), DexoptNeeded::Dex2oat);
        assert_eq!(DexoptNeeded::from_raw(2).unwrap(), DexoptNeeded::Patchoat);
        assert_eq!(
            DexoptNeeded::from_raw(3).unwrap(),
            DexoptNeeded::SelfPatchoat
        );
        assert!(DexoptNeeded::from_raw(9).is_err());
    }

    #[test]
    fn boot_marker_is_unlinked_once() {
        let (_tmp, config) = fixture();
        let marker = paths::boot_marker_path(&config, "arm64");
        fs::create_dir_all(marker.parent().unwrap()).unwrap();
        fs::write(&marker, b"").unwrap();
        mark_boot_complete(&config, "arm64").unwrap();
        assert!(!marker.exists());
        assert!(mark_boot_complete(&config, "arm64").is_err());
    }
}
