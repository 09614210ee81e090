// Copyright 2025 Appdatad Authors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{io, path::PathBuf};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("bad path {0} (prefix not allowed)")]
    BadPath(PathBuf),
    #[error("path too long: {0}")]
    PathTooLong(PathBuf),
    #[error("unknown flag bits {0:#x}")]
    BadFlags(u32),
    #[error(
        "{path} exists with mode {found_mode:o} owner {found_uid}:{found_gid}, \
         want mode {want_mode:o} owner {want_uid}:{want_gid}"
    )]
    WrongAttrs {
        path: PathBuf,
        want_mode: u32,
        want_uid: u32,
        want_gid: u32,
        found_mode: u32,
        found_uid: u32,
        found_gid: u32,
    },
    #[error("{0} is locked by a concurrent compile")]
    LockContended(PathBuf),
    #[error("{bin} exited with code {code}")]
    ChildFailure { bin: String, code: i32 },
    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{failed} entries could not be removed under {path}")]
    Aggregate { path: PathBuf, failed: usize },
}

impl Error {
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }

    pub fn errno(op: &'static str, path: impl Into<PathBuf>, errno: rustix::io::Errno) -> Self {
        Self::io(op, path, io::Error::from(errno))
    }
}
