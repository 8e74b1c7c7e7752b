mod aggregator;
mod config;
mod decoder;
mod models;
mod rpc;
mod scanner;
mod watchlist;

use aggregator::VolumeAggregator;
use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use config::{Cli, Config};
use dotenv::dotenv;
use models::{BlockRange, WhaleEntry};
use rpc::RpcLogSource;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = Config::from_cli(cli)?;

    let (provider, latest) = rpc::connect(&config.rpc_url).await?;
    let range = BlockRange {
        start: latest.saturating_sub(config.lookback_blocks),
        end: latest,
    };

    log::info!(
        "Collecting whales for token {:#x} over blocks {}",
        config.token,
        range
    );

    // 1. scan
    let source = RpcLogSource::new(provider, config.token);
    let report = scanner::scan(&source, range, config.scan)
        .await
        .context("log scan failed")?;

    for seg in &report.segments {
        if let scanner::SegmentOutcome::Abandoned { reason } = &seg.outcome {
            log::warn!("Missing logs for {}: {}", seg.range, reason);
        }
    }
    let fetched: usize = report
        .segments
        .iter()
        .map(|s| match s.outcome {
            scanner::SegmentOutcome::Fetched { logs } => logs,
            scanner::SegmentOutcome::Abandoned { .. } => 0,
        })
        .sum();
    log::info!(
        "{} sub-ranges, {} logs fetched, {} blocks lost",
        report.segments.len(),
        fetched,
        report.abandoned_blocks()
    );

    // 2. decode + aggregate
    let transfers = decoder::decode_all(&report.logs);
    let mut agg = VolumeAggregator::new();
    agg.extend(&transfers);
    let stats = agg.finish(config.min_volume);

    // 3. rank
    let top = aggregator::top_n(stats, config.top);
    let captured_at = Utc::now().timestamp();
    let whales: Vec<WhaleEntry> = top
        .into_iter()
        .enumerate()
        .map(|(i, (address, stat))| WhaleEntry {
            rank: i + 1,
            address,
            volume_wei: stat.volume,
            tx_count: stat.tx_count,
            token: config.token,
            network: config.network.clone(),
            timestamp: captured_at,
        })
        .collect();

    log::info!("Top {} whales:", whales.len());
    for w in &whales {
        log::info!(
            "  #{} {:#x} | volume={} wei | tx_count={}",
            w.rank,
            w.address,
            w.volume_wei,
            w.tx_count
        );
    }

    // 4. merge into the watchlist
    watchlist::update_watchlist(&config.watchlist, &config.list_field, &whales)
        .with_context(|| format!("failed to update {}", config.watchlist.display()))?;

    Ok(())
}
