// Copyright 2025 Appdatad Authors
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod cache;
pub mod dexopt;
pub mod idmap;
pub mod layout;
pub mod moveapp;
pub mod size;
