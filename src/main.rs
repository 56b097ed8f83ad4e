// ============================================================================
//  BIN POOL MIRROR v1.0: Blok Takip Servisi
//
//  v1.0 Yenilikler:
//  ✓ Heartbeat + yeniden bağlanma döngüsüyle WSS blok aboneliği
//  ✓ Yapılandırılmış her havuz için blok başına tek eth_getLogs
//  ✓ Havuz başına olay kaynaklı işleme, boşluk / bozulmada yenileme
//  ✓ Her blokta fiyatlama turu, her STATS_INTERVAL blokta oturum özeti
// ============================================================================

use alloy::primitives::{Address, U256};
use alloy::providers::{Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::Filter;
use bin_pool_mirror::state_sync::{Multicall3Reader, StateReader};
use bin_pool_mirror::types::{load_pool_configs, MirrorStats};
use bin_pool_mirror::{BinPoolLogic, EventSubscriber, MirrorConfig, PoolConfig, RawLog, StateStore};
use chrono::Local;
use colored::*;
use eyre::Result;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Bu süre içinde blok gelmezse soket ölü sayılır.
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(15);

// ─────────────────────────────────────────────────────────────────────────────
// Terminal Çıktısı
// ─────────────────────────────────────────────────────────────────────────────

fn timestamp() -> String {
    Local::now().format("%H:%M:%S%.3f").to_string()
}

fn print_banner(config: &MirrorConfig, pools: &[PoolConfig]) {
    println!();
    println!("{}", "╔══════════════════════════════════════════════════════════════════╗".cyan().bold());
    println!("{}", "║              BIN POOL MIRROR — Off-Chain Pricer                  ║".cyan().bold());
    println!("{}", "╚══════════════════════════════════════════════════════════════════╝".cyan().bold());
    println!();
    println!("  {} Pools          : {}", "▸".cyan(), format!("{} ({})", pools.len(), config.pools_file).white());
    println!("  {} Regeneration   : {}", "▸".cyan(), format!("Multicall3, {} calls/batch, {}ms timeout", config.multicall_batch_size, config.regeneration_timeout.as_millis()).white());
    println!("  {} History        : {}", "▸".cyan(), format!("{} blocks", config.max_retained_blocks).white());
    println!("  {} Quote Size     : {}", "▸".cyan(), format!("{} (token A units)", config.quote_amount).white());
    println!("  {} Started        : {}", "▸".cyan(), Local::now().format("%Y-%m-%d %H:%M:%S").to_string().yellow());
    println!();

    println!("{}", "  ┌──────────────────────────────────────────────────────────────┐".dimmed());
    for p in pools {
        println!("  {}   {} [{}] {}", "│".dimmed(), "●".cyan(), p.protocol_key, p.name.white().bold());
        println!("  {}     {}", "│".dimmed(), format!("{}", p.address).dimmed());
    }
    println!("{}", "  └──────────────────────────────────────────────────────────────┘".dimmed());
    println!();
}

fn print_block_update(block: u64, logs: usize, failed: usize, store: &StateStore, elapsed_ms: u128) {
    let ticks: Vec<String> = store
        .subscribers()
        .iter()
        .filter_map(|sub| {
            let tick = sub.current_active_tick(block)?;
            let name = &sub.logic().config().name;
            let short = name.get(..12).unwrap_or(name);
            Some(format!("{}@{}", short, tick))
        })
        .collect();

    let failed_str = if failed > 0 {
        format!(" | {} failed", failed).red().to_string()
    } else {
        String::new()
    };
    println!(
        "  {} [{}] Block #{} | logs: {} | {} | {}ms{}",
        "🧱".blue(),
        timestamp().dimmed(),
        format!("{}", block).white().bold(),
        logs,
        ticks.join(" | "),
        elapsed_ms,
        failed_str,
    );
}

/// Bir fiyatlama turunu yazdır; kotasyon veren havuz sayısını döndürür.
fn print_quotes(store: &StateStore, block: u64, amount: U256) -> usize {
    let quotes = store.quote_all(block, amount, true, false);
    for q in &quotes {
        let name = store
            .subscribers()
            .iter()
            .find(|s| s.address() == q.pool)
            .map(|s| s.logic().config().name.clone())
            .unwrap_or_default();
        if q.amount_other.is_zero() {
            println!("     {} {:<16} no liquidity", "·".dimmed(), name);
        } else {
            println!(
                "     {} {:<16} {} A → {} B ({} ticks)",
                "📊".yellow(),
                name,
                amount,
                q.amount_other.to_string().green(),
                q.ticks_crossed,
            );
        }
    }
    quotes.len()
}

fn print_stats_summary(stats: &MirrorStats, store: &StateStore) {
    println!();
    println!("{}", "  ┌───── SESSION ───────────────────────────────────────────────┐".yellow());
    println!("  {}  Uptime               : {}", "│".yellow(), stats.uptime_str().white().bold());
    println!("  {}  Blocks Processed     : {}", "│".yellow(), format!("{}", stats.total_blocks_processed).white());
    println!("  {}  Logs Folded          : {}", "│".yellow(), stats.total_logs);
    println!("  {}  Quotes               : {}", "│".yellow(), stats.total_quotes);
    println!(
        "  {}  Failed Pool-Blocks   : {}",
        "│".yellow(),
        if stats.failed_pool_blocks > 0 {
            format!("{}", stats.failed_pool_blocks).red().bold().to_string()
        } else {
            format!("{}", stats.failed_pool_blocks).dimmed().to_string()
        }
    );
    println!("  {}  Avg. Block Latency   : {:.1}ms", "│".yellow(), stats.avg_block_latency_ms);
    println!("  {}  Max. Block Latency   : {:.1}ms", "│".yellow(), stats.max_block_latency_ms);
    for sub in store.subscribers() {
        if let Some(state) = sub.latest() {
            println!(
                "  {}  {:<20}: tick {} | {} bins",
                "│".yellow(),
                sub.logic().config().name,
                state.active_tick,
                state.bins.len(),
            );
        }
    }
    println!("{}", "  └──────────────────────────────────────────────────────────────┘".yellow());
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Giriş Noktası: Yeniden Bağlanma Döngüsü
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = MirrorConfig::from_env()?;
    let pools = load_pool_configs(&config.pools_file)?;

    print_banner(&config, &pools);

    let mut retry_count: u32 = 0;
    loop {
        if retry_count > 0 {
            println!("  {} Reconnect attempt #{}", "🔄".yellow(), retry_count);
        }

        match run_mirror(&config, &pools).await {
            Ok(_) => println!("\n  {} Connection closed. Reconnecting...", "⚠️".yellow()),
            Err(e) => println!("\n  {} Error: {:#}", "❌".red(), e),
        }

        retry_count += 1;
        if config.max_retries > 0 && retry_count >= config.max_retries {
            println!("  {} Max retries ({}) reached. Shutting down.", "🛑".red(), config.max_retries);
            return Err(eyre::eyre!("max reconnect attempts exceeded"));
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ayna Döngüsü: Blok → Log'lar → İşleme → Kotasyon
// ─────────────────────────────────────────────────────────────────────────────

async fn run_mirror(config: &MirrorConfig, pools: &[PoolConfig]) -> Result<()> {
    println!("  {} Connecting over WSS...", "🌐".cyan());
    let connect_start = Instant::now();
    let provider = ProviderBuilder::new()
        .connect_ws(WsConnect::new(config.rpc_wss_url.as_str()))
        .await?;
    println!("  {} Connected ({}ms)", "✅".green(), connect_start.elapsed().as_millis());

    let block = provider.get_block_number().await?;
    println!("  {} Current block: #{}", "🧱".blue(), format!("{}", block).white().bold());

    // ══════════════ AYNA KURULUMU ══════════════
    let reader: Arc<dyn StateReader> = Arc::new(Multicall3Reader::new(provider.clone(), config.multicall_batch_size));
    let store = StateStore::new();
    for pool in pools {
        store.insert(EventSubscriber::new(
            BinPoolLogic::new(pool.clone(), Arc::clone(&reader)),
            config.max_retained_blocks,
            config.regeneration_timeout,
        ));
    }

    println!("\n  {} Regenerating pool state at #{}...", "🔄".yellow(), block);
    for sub in store.subscribers() {
        match sub.initialize(block).await {
            Ok(state) => println!(
                "  {} {} | tick {} | {} bins",
                "✅".green(),
                sub.logic().config().name,
                state.active_tick,
                state.bins.len(),
            ),
            Err(e) => println!("  {} {} : {}", "⚠️".yellow(), sub.logic().config().name, e),
        }
    }

    let addresses: Vec<Address> = pools.iter().map(|p| p.address).collect();
    let sub = provider.subscribe_blocks().await?;
    let mut stream = sub.into_stream();
    let mut stats = MirrorStats::new();

    // ══════════════ ANA DÖNGÜ ══════════════
    loop {
        let header = match tokio::time::timeout(HEARTBEAT_TIMEOUT, stream.next()).await {
            Ok(Some(header)) => header,
            Ok(None) => return Err(eyre::eyre!("block stream closed")),
            Err(_) => {
                println!("  {} No block for {}s, reconnecting", "💔".red(), HEARTBEAT_TIMEOUT.as_secs());
                return Err(eyre::eyre!("heartbeat timeout"));
            }
        };

        let block_start = Instant::now();
        let block_number = header.number;

        let filter = Filter::new()
            .from_block(block_number)
            .to_block(block_number)
            .address(addresses.clone());
        let logs: Vec<RawLog> = match provider.get_logs(&filter).await {
            Ok(logs) => logs.iter().filter_map(RawLog::from_rpc).collect(),
            Err(e) => {
                // bu bloğun log'ları olmadan her havuz yenilenmeli
                warn!(block = block_number, error = %e, "log fetch failed, scheduling resync");
                for sub in store.subscribers() {
                    sub.resync();
                }
                Vec::new()
            }
        };

        let outcomes = store.process_block(block_number, &logs).await;
        let failed = outcomes.iter().filter(|(_, r)| r.is_err()).count();
        for (pool, outcome) in &outcomes {
            if let Err(e) = outcome {
                info!(pool = %pool, block = block_number, error = %e, "pool skipped this block");
            }
        }

        let elapsed = block_start.elapsed().as_millis();
        stats.update_latency(elapsed as f64);
        stats.total_blocks_processed += 1;
        stats.total_logs += logs.len() as u64;
        stats.failed_pool_blocks += failed as u64;

        print_block_update(block_number, logs.len(), failed, &store, elapsed);
        stats.total_quotes += print_quotes(&store, block_number, config.quote_amount) as u64;

        if stats.total_blocks_processed % config.stats_interval == 0 {
            print_stats_summary(&stats, &store);
        }
    }
}
