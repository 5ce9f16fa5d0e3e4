use std::path::PathBuf;
use std::time::{Duration, Instant};

use radiocheck_proto::config::Config;
use radiocheck_proto::protocol::SourceKind;
use radiocheck_proto::registry::load_stations_from_toml;
use radiocheck_proto::sources::build_adapters;

fn workspace_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

fn env_csv_tokens(key: &str) -> Vec<String> {
    std::env::var(key)
        .ok()
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
#[ignore = "network diagnostic harness; run explicitly with --ignored --nocapture"]
async fn poll_configured_sources_for_diagnostics() {
    let stations_path = std::env::var("RADIOCHECK_STATIONS")
        .map(PathBuf::from)
        .unwrap_or_else(|_| workspace_root().join("stations.toml"));
    let mut stations =
        load_stations_from_toml(&stations_path).expect("failed to read station file");
    stations.retain(|s| s.enabled);

    let only_match = env_csv_tokens("RADIOCHECK_ONLY_MATCH");
    if !only_match.is_empty() {
        stations.retain(|s| {
            let name = s.name.to_lowercase();
            only_match.iter().any(|t| name.contains(t))
        });
    }
    assert!(!stations.is_empty(), "expected at least one station");

    let config = Config::default();
    let adapters = build_adapters(&config).expect("failed to build adapters");

    let run_start = Instant::now();
    let mut found = 0usize;
    for adapter in &adapters {
        let kind = adapter.kind();
        let subset: Vec<_> = stations.iter().filter(|s| s.source == kind).cloned().collect();
        if subset.is_empty() {
            continue;
        }

        let started = Instant::now();
        if kind == SourceKind::PrimaryAggregator {
            let results = adapter.fetch_bulk(&subset).await;
            for station in &subset {
                match results.get(&station.name) {
                    Some(obs) => println!("{:<12} {:<20} {} - {}", kind, station.name, obs.artist, obs.title),
                    None => println!("{:<12} {:<20} (no data)", kind, station.name),
                }
            }
            found += results.len();
        } else {
            for station in &subset {
                let t0 = Instant::now();
                let result = tokio::time::timeout(Duration::from_secs(30), adapter.fetch(station))
                    .await
                    .ok()
                    .flatten();
                match result {
                    Some(obs) => {
                        found += 1;
                        println!(
                            "{:<12} {:<20} {:>5}ms {} - {}",
                            kind,
                            station.name,
                            t0.elapsed().as_millis(),
                            obs.artist,
                            obs.title
                        );
                    }
                    None => println!(
                        "{:<12} {:<20} {:>5}ms (no data)",
                        kind,
                        station.name,
                        t0.elapsed().as_millis()
                    ),
                }
            }
        }
        println!("-- {} done in {}ms", kind, started.elapsed().as_millis());
    }

    println!(
        "summary: {}/{} stations answered in {:.1}s",
        found,
        stations.len(),
        run_start.elapsed().as_secs_f64()
    );
}
