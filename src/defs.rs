// Copyright 2025 Appdatad Authors
// SPDX-License-Identifier: GPL-3.0-or-later

pub const PKG_NAME_MAX: usize = 128;

pub const PKG_PATH_MAX: usize = 1024;

pub const PATH_MAX: usize = 4096;

pub const AID_SYSTEM: u32 = 1000;

pub const AID_INSTALL: u32 = 1012;

pub const AID_EVERYBODY: u32 = 9997;

/// Stride between the uid ranges of consecutive users.
pub const AID_USER_OFFSET: u32 = 100_000;

pub const FLAG_CE_STORAGE: u32 = 1 << 0;

pub const FLAG_DE_STORAGE: u32 = 1 << 1;

pub const FLAG_CLEAR_CACHE_ONLY: u32 = 1 << 8;

pub const FLAG_CLEAR_CODE_CACHE_ONLY: u32 = 1 << 9;

pub const DEXOPT_PUBLIC: u32 = 1 << 1;

pub const DEXOPT_SAFEMODE: u32 = 1 << 2;

pub const DEXOPT_DEBUGGABLE: u32 = 1 << 3;

pub const DEXOPT_BOOTCOMPLETE: u32 = 1 << 4;

pub const DEXOPT_USEJIT: u32 = 1 << 5;

pub const DEXOPT_MASK: u32 =
    DEXOPT_PUBLIC | DEXOPT_SAFEMODE | DEXOPT_DEBUGGABLE | DEXOPT_BOOTCOMPLETE | DEXOPT_USEJIT;

pub const CACHE_DIR_NAME: &str = "cache";

pub const CODE_CACHE_DIR_NAME: &str = "code_cache";

pub const LIB_DIR_NAME: &str = "lib";

pub const DALVIK_CACHE_DIR: &str = "dalvik-cache";

pub const DALVIK_CACHE_POSTFIX: &str = "@classes.dex";

pub const PROFILE_EXT: &str = ".prof";

pub const REFERENCE_PROFILE_EXT: &str = ".prof.ref";

pub const BOOT_MARKER_NAME: &str = ".booting";

pub const IDMAP_SUFFIX: &str = "@idmap";

/// Instruction-set tags longer than this are rejected outright.
pub const MAX_ISA_LEN: usize = 7;
