// Copyright 2025 Appdatad Authors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::collections::HashMap;

/// System-property view handed to the operations that consult the property
/// store. Reads go to the live property space unless an override is present;
/// a fixed map (no live fallthrough) is used by tests and `--property`.
#[derive(Debug, Clone, Default)]
pub struct Props {
    overrides: HashMap<String, String>,
    live: bool,
}

impl Props {
    pub fn system() -> Self {
        Self {
            overrides: HashMap::new(),
            live: true,
        }
    }

    pub fn fixed(map: HashMap<String, String>) -> Self {
        Self {
            overrides: map,
            live: false,
        }
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        self.overrides.insert(key.to_string(), value.to_string());
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        if let Some(v) = self.overrides.get(key) {
            return Some(v.clone());
        }
        if self.live { system_property(key) } else { None }
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.raw(key).unwrap_or_else(|| default.to_string())
    }

    /// True iff the property is set to the literal `true`. Call sites that
    /// historically also accept `1` compare that literal themselves.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.raw(key) {
            Some(v) => v == "true",
            None => default,
        }
    }
}

#[cfg(target_os = "android")]
fn system_property(key: &str) -> Option<String> {
    use std::ffi::{CStr, CString};

    const PROP_VALUE_MAX: usize = 92;

    unsafe extern "C" {
        fn __system_property_get(
            name: *const libc::c_char,
            value: *mut libc::c_char,
        ) -> libc::c_int;
    }

    let name = CString::new(key).ok()?;
    let mut buf = [0 as libc::c_char; PROP_VALUE_MAX];
    let len = unsafe { __system_property_get(name.as_ptr(), buf.as_mut_ptr()) };
    if len <= 0 {
        return None;
    }
    let value = unsafe { CStr::from_ptr(buf.as_ptr()) };
    Some(value.to_string_lossy().into_owned())
}

#[cfg(not(target_os = "android"))]
fn system_property(_key: &str) -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> Props {
        Props::fixed(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn string_lookup_falls_back_to_default() {
        let p = props(&[("dalvik.vm.dex2oat-filter", "speed")]);
        assert_eq!(p.get_string("dalvik.vm.dex2oat-filter", ""), "speed");
        assert_eq!(p.get_string("dalvik.vm.dex2oat-Xmx", "512m"), "512m");
    }

    #[test]
    fn bool_matches_literal_true_only() {
        let p = props(&[("a", "true"), ("b", "1"), ("c", "false")]);
        assert!(p.get_bool("a", false));
        assert!(!p.get_bool("b", true));
        assert!(!p.get_bool("c", true));
        assert!(p.get_bool("missing", true));
        assert!(!p.get_bool("missing", false));
    }

    #[test]
    fn overrides_shadow_the_live_space() {
        let mut p = Props::system();
        p.insert("ro.config.low_ram", "true");
        assert_eq!(p.raw("ro.config.low_ram").as_deref(), Some("true"));
    }
}
