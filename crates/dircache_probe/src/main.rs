//! dircache_probe - resolve paths through the directory cache
//!
//! Prints one JSON line per lookup and the cache statistics at the end.

use anyhow::{Context, Result};
use clap::Parser;
use dircache::{Cache, CacheConfig, NativeFs, ObjKind, ObjStat};
use serde::Serialize;
use std::path::PathBuf;

/// Resolve paths through the directory cache
#[derive(Parser, Debug)]
#[command(name = "dircache_probe")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Paths to look up
    #[arg(value_name = "PATH", required = true)]
    paths: Vec<String>,

    /// Configuration file (defaults to the per-user config)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Look every path up this many times
    #[arg(long, default_value_t = 1)]
    repeat: u32,

    /// Bump both generations between rounds
    #[arg(long)]
    bump: bool,

    /// Report Missing objects as not found
    #[arg(long)]
    no_missing: bool,

    /// Use the wide (UTF-16) entry point
    #[arg(long)]
    wide: bool,

    /// Use the portable backend even on Windows
    #[arg(long)]
    portable: bool,
}

#[derive(Serialize)]
struct LookupReport<'a> {
    round: u32,
    path: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<ObjKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    full_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    short_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stat: Option<ObjStat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = dircache_log::init()?;

    if let Err(e) = dircache_log::cleanup_old_logs(7) {
        tracing::warn!("Failed to cleanup old logs: {}", e);
    }

    let config = match &cli.config {
        Some(path) => CacheConfig::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => CacheConfig::load().unwrap_or_else(|e| {
            tracing::warn!("Ignoring unreadable config: {}", e);
            CacheConfig::default()
        }),
    };
    let options = config.options()?;

    let native_backend = !cli.portable && config.native.drive_map.is_empty();

    #[cfg(windows)]
    if native_backend {
        let mut cache = Cache::with_options(dircache::Win32Fs::new(), options);
        return run(&cli, &mut cache);
    }

    #[cfg(not(windows))]
    if native_backend {
        tracing::debug!("No Win32 backend on this platform, using std::fs");
    }

    let mut cache = Cache::with_options(config.std_fs(), options);
    run(&cli, &mut cache)
}

fn run<F: NativeFs>(cli: &Cli, cache: &mut Cache<F>) -> Result<()> {
    tracing::info!("Probing {} paths, {} rounds", cli.paths.len(), cli.repeat);

    for round in 0..cli.repeat {
        if round > 0 && cli.bump {
            cache.bump_generation();
            cache.bump_missing_generation();
        }

        for path in &cli.paths {
            let result = match (cli.wide, cli.no_missing) {
                (false, false) => cache.lookup(path),
                (false, true) => cache.lookup_no_missing(path),
                (true, no_missing) => {
                    let wide: Vec<u16> = path.encode_utf16().collect();
                    if no_missing {
                        cache.lookup_wide_no_missing(&wide)
                    } else {
                        cache.lookup_wide(&wide)
                    }
                }
            };

            let report = match result {
                Ok(id) => {
                    let obj = cache.object(id);
                    let report = LookupReport {
                        round,
                        path,
                        kind: obj.map(|o| o.kind()),
                        full_path: cache.full_path(id, '\\').ok(),
                        short_path: cache.short_full_path(id, '\\').ok(),
                        stat: obj.and_then(|o| o.stat().cloned()),
                        error: None,
                    };
                    cache.release(id);
                    report
                }
                Err(e) => LookupReport {
                    round,
                    path,
                    kind: None,
                    full_path: None,
                    short_path: None,
                    stat: None,
                    error: Some(e.to_string()),
                },
            };
            println!("{}", serde_json::to_string(&report)?);
        }
    }

    println!("{}", serde_json::to_string_pretty(&cache.stats())?);
    Ok(())
}
