//! Guarded calls walkthrough
//!
//! Drives a simulated flaky backend through the rate limiter, circuit breaker
//! and cache, printing each outcome and the final status report.
//!
//! Usage:
//!   RUST_LOG=callshield=debug cargo run --example guarded_calls

use callshield::cache::{prompt_fingerprint, CacheConfig, CacheManager, RegulationQuery};
use callshield::registry::{CRAWL_SERVICE, GENERATIVE_SERVICE};
use callshield::{Error, ServiceRegistry};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let registry = ServiceRegistry::new();
    let cache_root = std::env::temp_dir().join("callshield-demo");
    let cache = CacheManager::new(
        CacheConfig::new()
            .with_root(&cache_root)
            .with_ttl(Duration::from_secs(600)),
    );

    // Regulatory search: the second lookup is served from the cache.
    let query = RegulationQuery::new("Germany", "fintech", ["payments", "lending"]);
    for round in 1..=2 {
        let rules: Vec<String> = registry
            .guard(CRAWL_SERVICE)
            .execute_regulation_search(&cache, &query, || async {
                println!("  (crawling regulator sites)");
                Ok::<_, Error>(vec!["PSD2".to_string(), "KWG".to_string()])
            })
            .await?;
        println!("round {round}: {rules:?}");
    }

    // Generative backend that fails every other call. The built-in profile
    // trips after two consecutive failures.
    let attempts = AtomicU32::new(0);
    let fingerprint = prompt_fingerprint("Summarize PSD2 obligations", Some(0.2), Some(512));
    for i in 0..6 {
        let attempt = &attempts;
        let result = registry
            .guard(GENERATIVE_SERVICE)
            .with_timeout(Duration::from_secs(5))
            .execute(move || async move {
                let n = attempt.fetch_add(1, Ordering::SeqCst);
                if n >= 1 {
                    Err(Error::upstream("backend returned 503"))
                } else {
                    Ok("PSD2 requires strong customer authentication".to_string())
                }
            })
            .await;
        match result {
            Ok(text) => {
                cache.set_api_response("summarize", &fingerprint, &text).await;
                println!("call {i}: ok");
            }
            Err(e) if e.is_rejection() => {
                println!("call {i}: rejected, retry after {:?}", e.retry_after());
            }
            Err(e) => println!("call {i}: failed: {e}"),
        }
    }

    println!(
        "cached summary: {:?}",
        cache.get_api_response("summarize", &fingerprint).await
    );
    println!("{}", serde_json::to_string_pretty(&registry.status())?);
    println!("{}", serde_json::to_string_pretty(&cache.stats().await)?);

    cache.clear().await;
    Ok(())
}
