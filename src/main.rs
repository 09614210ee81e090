// src/main.rs
mod conf;
mod core;
mod defs;
mod error;
mod exec;
mod paths;
mod props;
mod utils;

use std::path::Path;

use anyhow::Result;
use clap::Parser;
use mimalloc::MiMalloc;

use conf::{
    cli::{Cli, Commands},
    config::{CONFIG_FILE_DEFAULT, Config},
};
use crate::core::{cache, dexopt, idmap, layout, moveapp, size};
use props::Props;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn load_config(cli: &Cli) -> Result<Config> {
    if let Some(config_path) = &cli.config {
        return Config::from_file(config_path);
    }
    match Config::load_default() {
        Ok(config) => Ok(config),
        Err(e) => {
            if Path::new(CONFIG_FILE_DEFAULT).exists() {
                eprintln!("Error loading config: {:#}", e);
            }
            Ok(Config::default())
        }
    }
}

fn build_props(cli: &Cli) -> Props {
    let mut props = Props::system();
    for pair in &cli.property {
        match pair.split_once('=') {
            Some((key, value)) => props.insert(key, value),
            None => log::warn!("Ignoring malformed property override: {}", pair),
        }
    }
    props
}

fn storage_flags(ce: bool, de: bool, cache_only: bool, code_cache_only: bool) -> u32 {
    let mut flags = 0;
    if ce {
        flags |= defs::FLAG_CE_STORAGE;
    }
    if de {
        flags |= defs::FLAG_DE_STORAGE;
    }
    if cache_only {
        flags |= defs::FLAG_CLEAR_CACHE_ONLY;
    }
    if code_cache_only {
        flags |= defs::FLAG_CLEAR_CODE_CACHE_ONLY;
    }
    flags
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    // Handle Subcommands that never touch the filesystem state
    match &cli.command {
        Commands::GenConfig { output } => {
            Config::default().save_to_file(output)?;
            return Ok(());
        }
        Commands::ShowConfig => {
            let config = load_config(&cli)?;
            println!("{}", serde_json::to_string(&config)?);
            return Ok(());
        }
        _ => {}
    }

    let mut config = load_config(&cli)?;
    config.merge_with_cli(cli.datadir.clone(), cli.verbose);

    utils::init_logger(config.verbose, cli.logfile.as_deref())?;
    let props = build_props(&cli);

    match &cli.command {
        Commands::GenConfig { .. } | Commands::ShowConfig => unreachable!(),
        Commands::CreateAppData {
            uuid,
            pkg,
            user,
            appid,
            seinfo,
            ce,
            de,
        } => layout::create_app_data(
            &config,
            uuid.as_deref(),
            pkg,
            *user,
            storage_flags(*ce, *de, false, false),
            *appid,
            seinfo,
        )?,
        Commands::ClearAppData {
            uuid,
            pkg,
            user,
            ce,
            de,
            cache_only,
            code_cache_only,
        } => layout::clear_app_data(
            &config,
            uuid.as_deref(),
            pkg,
            *user,
            storage_flags(*ce, *de, *cache_only, *code_cache_only),
        )?,
        Commands::DestroyAppData {
            uuid,
            pkg,
            user,
            ce,
            de,
        } => layout::destroy_app_data(
            &config,
            uuid.as_deref(),
            pkg,
            *user,
            storage_flags(*ce, *de, false, false),
        )?,
        Commands::RestoreconAppData {
            uuid,
            pkg,
            user,
            appid,
            seinfo,
            ce,
            de,
        } => layout::restorecon_app_data(
            &config,
            uuid.as_deref(),
            pkg,
            *user,
            storage_flags(*ce, *de, false, false),
            *appid,
            seinfo,
        )?,
        Commands::DeleteUser { uuid, user } => {
            layout::delete_user(&config, uuid.as_deref(), *user)?
        }
        Commands::MakeUserConfig { user } => layout::make_user_config(&config, *user)?,
        Commands::Linklib {
            uuid,
            pkg,
            asec_lib_dir,
            user,
        } => layout::linklib(&config, uuid.as_deref(), pkg, asec_lib_dir, *user)?,
        Commands::LinkFile {
            relative_path,
            from_base,
            to_base,
        } => layout::link_file(&config, relative_path, from_base, to_base)?,
        Commands::CreateOatDir { oat_dir, isa } => {
            layout::create_oat_dir(&config, oat_dir, isa)?
        }
        Commands::RmPackageDir { path } => layout::rm_package_dir(&config, path)?,
        Commands::RmDex { path, isa } => layout::rm_dex(&config, path, isa)?,
        Commands::FreeCache { uuid, free_bytes } => {
            cache::free_cache(&config, uuid.as_deref(), *free_bytes)?
        }
        Commands::GetAppSize {
            uuid,
            pkg,
            user,
            apk_path,
            isa,
            lib_dir,
            fwdlock_apk,
            asec_path,
            ce,
        } => {
            let stats = size::get_app_size(
                &config,
                &size::SizeParams {
                    uuid: uuid.as_deref(),
                    pkg,
                    user: (*user >= 0).then_some(*user as u32),
                    flags: storage_flags(*ce, false, false, false),
                    apk_path,
                    lib_dir: lib_dir.as_deref(),
                    fwdlock_apk: fwdlock_apk.as_deref(),
                    asec_path: asec_path.as_deref(),
                    isa,
                },
            )?;
            println!("{}", serde_json::to_string(&stats)?);
        }
        Commands::Dexopt {
            apk_path,
            uid,
            pkg,
            isa,
            needed,
            oat_dir,
            uuid,
            public,
            safemode,
            debuggable,
            bootcomplete,
            usejit,
            use_profiles,
        } => {
            let mut flags = 0;
            if *public {
                flags |= defs::DEXOPT_PUBLIC;
            }
            if *safemode {
                flags |= defs::DEXOPT_SAFEMODE;
            }
            if *debuggable {
                flags |= defs::DEXOPT_DEBUGGABLE;
            }
            if *bootcomplete {
                flags |= defs::DEXOPT_BOOTCOMPLETE;
            }
            if *usejit {
                flags |= defs::DEXOPT_USEJIT;
            }
            dexopt::dexopt(
                &config,
                &props,
                &dexopt::DexoptParams {
                    apk_path,
                    uid: *uid,
                    pkg,
                    isa,
                    needed: dexopt::DexoptNeeded::from_raw(*needed)?,
                    oat_dir: oat_dir.as_deref(),
                    flags,
                    volume_uuid: uuid.as_deref(),
                    use_profiles: *use_profiles,
                },
            )?
        }
        Commands::MarkBootComplete { isa } => dexopt::mark_boot_complete(&config, isa)?,
        Commands::MoveCompleteApp {
            from_uuid,
            to_uuid,
            pkg,
            data_app_name,
            appid,
            seinfo,
        } => moveapp::move_complete_app(
            &config,
            from_uuid.as_deref(),
            to_uuid.as_deref(),
            pkg,
            data_app_name,
            *appid,
            seinfo,
        )?,
        Commands::Movefiles => moveapp::movefiles(&config)?,
        Commands::Idmap {
            target_apk,
            overlay_apk,
            uid,
        } => idmap::idmap(&config, target_apk, overlay_apk, *uid)?,
    }

    Ok(())
}

fn main() {
    if let Err(e) = run() {
        log::error!("Fatal Error: {:#}", e);
        eprintln!("Fatal Error: {:#}", e);
        std::process::exit(1);
    }
}
