// Copyright 2025 Appdatad Authors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "appdatad", version, about = "Per-app storage maintenance daemon")]
pub struct Cli {
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
    #[arg(short = 'd', long = "datadir")]
    pub datadir: Option<PathBuf>,
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
    #[arg(long = "logfile")]
    pub logfile: Option<PathBuf>,
    /// Property overrides for testing, as key=value pairs.
    #[arg(long = "property", value_delimiter = ',')]
    pub property: Vec<String>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    GenConfig {
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
    },
    ShowConfig,
    #[command(name = "create-app-data")]
    CreateAppData {
        #[arg(long)]
        uuid: Option<String>,
        pkg: String,
        user: u32,
        appid: u32,
        seinfo: String,
        #[arg(long)]
        ce: bool,
        #[arg(long)]
        de: bool,
    },
    #[command(name = "clear-app-data")]
    ClearAppData {
        #[arg(long)]
        uuid: Option<String>,
        pkg: String,
        user: u32,
        #[arg(long)]
        ce: bool,
        #[arg(long)]
        de: bool,
        #[arg(long = "cache-only")]
        cache_only: bool,
        #[arg(long = "code-cache-only")]
        code_cache_only: bool,
    },
    #[command(name = "destroy-app-data")]
    DestroyAppData {
        #[arg(long)]
        uuid: Option<String>,
        pkg: String,
        user: u32,
        #[arg(long)]
        ce: bool,
        #[arg(long)]
        de: bool,
    },
    #[command(name = "restorecon-app-data")]
    RestoreconAppData {
        #[arg(long)]
        uuid: Option<String>,
        pkg: String,
        user: u32,
        appid: u32,
        seinfo: String,
        #[arg(long)]
        ce: bool,
        #[arg(long)]
        de: bool,
    },
    #[command(name = "delete-user")]
    DeleteUser {
        #[arg(long)]
        uuid: Option<String>,
        user: u32,
    },
    #[command(name = "make-user-config")]
    MakeUserConfig { user: u32 },
    Linklib {
        #[arg(long)]
        uuid: Option<String>,
        pkg: String,
        asec_lib_dir: PathBuf,
        user: u32,
    },
    #[command(name = "link-file")]
    LinkFile {
        relative_path: String,
        from_base: PathBuf,
        to_base: PathBuf,
    },
    #[command(name = "create-oat-dir")]
    CreateOatDir { oat_dir: PathBuf, isa: String },
    #[command(name = "rm-package-dir")]
    RmPackageDir { path: PathBuf },
    #[command(name = "rm-dex")]
    RmDex { path: PathBuf, isa: String },
    #[command(name = "free-cache")]
    FreeCache {
        #[arg(long)]
        uuid: Option<String>,
        free_bytes: u64,
    },
    #[command(name = "get-app-size")]
    GetAppSize {
        #[arg(long)]
        uuid: Option<String>,
        pkg: String,
        /// Negative selects every known user on the volume.
        #[arg(allow_negative_numbers = true)]
        user: i32,
        apk_path: PathBuf,
        isa: String,
        #[arg(long)]
        lib_dir: Option<PathBuf>,
        #[arg(long)]
        fwdlock_apk: Option<PathBuf>,
        #[arg(long)]
        asec_path: Option<PathBuf>,
        #[arg(long)]
        ce: bool,
    },
    Dexopt {
        apk_path: PathBuf,
        uid: u32,
        pkg: String,
        isa: String,
        needed: i32,
        #[arg(long)]
        oat_dir: Option<PathBuf>,
        #[arg(long)]
        uuid: Option<String>,
        #[arg(long)]
        public: bool,
        #[arg(long)]
        safemode: bool,
        #[arg(long)]
        debuggable: bool,
        #[arg(long)]
        bootcomplete: bool,
        #[arg(long)]
        usejit: bool,
        #[arg(long = "use-profiles")]
        use_profiles: bool,
    },
    #[command(name = "mark-boot-complete")]
    MarkBootComplete { isa: String },
    #[command(name = "move-complete-app")]
    MoveCompleteApp {
        #[arg(long)]
        from_uuid: Option<String>,
        #[arg(long)]
        to_uuid: Option<String>,
        pkg: String,
        data_app_name: String,
        appid: u32,
        seinfo: String,
    },
    Movefiles,
    Idmap {
        target_apk: PathBuf,
        overlay_apk: PathBuf,
        uid: u32,
    },
}
