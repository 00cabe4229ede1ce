//! guardctl: 服务守卫维护工具，查看限流/熔断状态、清理过期缓存
//!
//! Usage:
//!   guardctl status [--config <path>]             Show per-service limiter and breaker status
//!   guardctl sweep  [--config <path>] [--root <dir>]   Remove expired cache entries
//!   guardctl stats  [--config <path>] [--root <dir>]   Show cache statistics

use anyhow::Context;
use callshield::cache::CacheManager;
use callshield::registry::{CRAWL_SERVICE, GENERATIVE_SERVICE, VECTOR_SERVICE};
use callshield::{GuardConfig, ServiceRegistry};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    match args[1].as_str() {
        "status" => cmd_status(&args[2..]),
        "sweep" => cmd_sweep(&args[2..]).await,
        "stats" => cmd_stats(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("guardctl {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    println!(
        r#"guardctl: callshield maintenance tool

USAGE:
    guardctl <COMMAND> [OPTIONS]

COMMANDS:
    status                      Print limiter and breaker status as JSON
    sweep                       Remove expired entries from both cache tiers
    stats                       Print cache statistics as JSON
    version                     Show version information
    help                        Show this help message

OPTIONS:
    --config <path>             YAML configuration file
    --root <dir>                Cache directory (overrides config)

ENVIRONMENT:
    CALLSHIELD_CACHE_DIR        Cache directory
    CALLSHIELD_CACHE_TTL_SECS   Cache TTL in seconds
    RUST_LOG                    Log filter (default: info)"#
    );
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn load_config(args: &[String]) -> anyhow::Result<GuardConfig> {
    let config = match flag_value(args, "--config") {
        Some(path) => GuardConfig::load(path).with_context(|| format!("loading {path}"))?,
        None => GuardConfig::new(),
    };
    let mut config = config
        .with_env_overrides()
        .context("applying environment overrides")?;
    if let Some(root) = flag_value(args, "--root") {
        config.cache.root = PathBuf::from(root);
    }
    Ok(config)
}

fn cmd_status(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let mut services: Vec<String> = [GENERATIVE_SERVICE, CRAWL_SERVICE, VECTOR_SERVICE]
        .iter()
        .map(|s| s.to_string())
        .collect();
    services.extend(config.services.keys().cloned());

    let registry = ServiceRegistry::with_config(config)?;
    for service in &services {
        // materialize each service so its resolved profile is reported
        registry.rate_limiter_for(service);
        registry.circuit_breaker_for(service);
    }
    println!("{}", serde_json::to_string_pretty(&registry.status())?);
    Ok(())
}

async fn cmd_sweep(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let cache = CacheManager::new(config.cache);
    let report = cache.sweep().await;
    println!(
        "Removed {} expired entries ({} memory, {} durable)",
        report.total(),
        report.memory_removed,
        report.durable_removed
    );
    Ok(())
}

async fn cmd_stats(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let cache = CacheManager::new(config.cache);
    println!("{}", serde_json::to_string_pretty(&cache.stats().await)?);
    Ok(())
}
