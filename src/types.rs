// ============================================================================
//  TYPES v1.0: Ortak Tipler, Havuz Durumu ve Yapılandırma
//
//  v1.0 Yenilikler:
//  ✓ PoolState / Bin: aynalanan zincir üstü bin tablosu (id indeksli arena)
//  ✓ RawLog: blok başına log akışının tek bir girdisi
//  ✓ SwapResult / SwapMode: matematik motorunun döndürdükleri
//  ✓ PoolConfig / MirrorConfig: .env + JSON havuz listesi
// ============================================================================

use alloy::primitives::{Address, Bytes, B256, U256};
use eyre::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::bin_map::BinMap;
use crate::error::{PoolError, PoolResult};

/// Havuz kontratının atadığı bin kimliği (0 = yok).
pub type BinId = u128;

/// Likidite şekli türleri: statik, sağ, sol, her ikisi.
pub const KIND_COUNT: usize = 4;

// ─────────────────────────────────────────────────────────────────────────────
// Bin
// ─────────────────────────────────────────────────────────────────────────────

/// Bir tick ve bir türe bağlı tek likidite pozisyonu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bin {
    /// A token'ının 18 ondalıklı rezervi
    pub reserve_a: U256,
    /// B token'ının 18 ondalıklı rezervi
    pub reserve_b: U256,
    /// 0..=3
    pub kind: u8,
    pub lower_tick: i32,
    /// 0 = canlı; aksi halde bu bin'in birleştirildiği bin'in kimliği
    pub merge_id: BinId,
}

impl Bin {
    pub fn new(kind: u8, lower_tick: i32, reserve_a: U256, reserve_b: U256) -> Self {
        Self {
            reserve_a,
            reserve_b,
            kind,
            lower_tick,
            merge_id: 0,
        }
    }

    #[inline]
    pub fn is_live(&self) -> bool {
        self.merge_id == 0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Havuz Durumu (yayınlandıktan sonra değişmez)
// ─────────────────────────────────────────────────────────────────────────────

/// Tek bir havuzun off-chain aynası.
///
/// Yayınlanan anlık görüntüler `Arc` içinde tutulur ve asla değiştirilmez;
/// her geçiş kopyalar, değiştirir ve yeniden yayınlar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolState {
    pub active_tick: i32,
    /// Şimdiye kadar görülen en yüksek bin kimliği
    pub bin_counter: BinId,
    pub bins: BTreeMap<BinId, Bin>,
    /// tür başına tick → bin kimliği (0 = boş yuva)
    pub bin_positions: BTreeMap<i32, [BinId; KIND_COUNT]>,
    pub bin_map: BinMap,
    /// Swap ücreti, 18 ondalık (0.003e18 = %0.3)
    pub fee: U256,
    pub tick_spacing: u32,
    /// Ücretten protokolün aldığı pay, 18 ondalık
    pub protocol_fee_ratio: U256,
}

impl PoolState {
    pub fn new(fee: U256, tick_spacing: u32, protocol_fee_ratio: U256) -> Self {
        Self {
            active_tick: 0,
            bin_counter: 0,
            bins: BTreeMap::new(),
            bin_positions: BTreeMap::new(),
            bin_map: BinMap::new(),
            fee,
            tick_spacing,
            protocol_fee_ratio,
        }
    }

    /// `merge_id` işaretçilerini hayatta kalan bin'e kadar izle.
    ///
    /// Bir bin yalnızca kesinlikle daha eski bir hayatta kalana işaret eder;
    /// yürüyüş bin sayısıyla sınırlıdır, daha uzunu bir döngüdür.
    pub fn resolve_root(&self, id: BinId) -> PoolResult<BinId> {
        let mut current = id;
        for _ in 0..=self.bins.len() {
            match self.bins.get(&current) {
                Some(bin) if bin.merge_id != 0 => current = bin.merge_id,
                Some(_) => return Ok(current),
                None => {
                    return Err(PoolError::MathInvariantViolation(format!(
                        "bin {} missing while resolving merge chain of {}",
                        current, id
                    )))
                }
            }
        }
        Err(PoolError::MathInvariantViolation(format!(
            "merge chain of bin {} does not terminate",
            id
        )))
    }

    /// Canlı bir bin ekle; pozisyonunu ve doluluk bitini kaydet.
    pub fn register_bin(&mut self, id: BinId, bin: Bin) {
        let (tick, kind) = (bin.lower_tick, bin.kind);
        self.bins.insert(id, bin);
        self.bin_positions.entry(tick).or_insert([0; KIND_COUNT])[kind as usize] = id;
        self.bin_map.put_type_at_tick(kind, tick);
        self.bin_counter = self.bin_counter.max(id);
    }

    /// Yuva boşsa `(tick, kind)` yuvasını `id`'ye bağla. Bağlayıp bağlamadığını döndürür.
    pub fn occupy_position(&mut self, id: BinId, tick: i32, kind: u8) -> bool {
        let slot = &mut self.bin_positions.entry(tick).or_insert([0; KIND_COUNT])[kind as usize];
        if *slot != 0 && *slot != id {
            return false;
        }
        *slot = id;
        self.bin_map.put_type_at_tick(kind, tick);
        true
    }

    /// `(tick, kind)` `id`'yi gösteriyorsa yuvayı bırak ve doluluk bitini temizle.
    pub fn release_position(&mut self, id: BinId, tick: i32, kind: u8) {
        if let Some(slots) = self.bin_positions.get_mut(&tick) {
            if slots[kind as usize] == id {
                slots[kind as usize] = 0;
                self.bin_map.remove_type_at_tick(kind, tick);
            }
            if slots.iter().all(|&s| s == 0) {
                self.bin_positions.remove(&tick);
            }
        }
    }

    /// `tick`'e kayıtlı canlı bin'ler, tür sırasıyla.
    pub fn bins_at_tick(&self, tick: i32) -> Vec<BinId> {
        self.bin_positions
            .get(&tick)
            .map(|slots| {
                slots
                    .iter()
                    .copied()
                    .filter(|&id| id != 0 && self.bins.get(&id).map_or(false, Bin::is_live))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `tick`'teki canlı bin'lerin toplam (A rezervi, B rezervi).
    pub fn reserves_at_tick(&self, tick: i32) -> (U256, U256) {
        self.bins_at_tick(tick)
            .iter()
            .filter_map(|id| self.bins.get(id))
            .fold((U256::ZERO, U256::ZERO), |(a, b), bin| {
                (a.saturating_add(bin.reserve_a), b.saturating_add(bin.reserve_b))
            })
    }

    /// Doluluk biti set ⇔ pozisyon canlı bir bin'i gösteriyor.
    pub fn occupancy_consistent(&self) -> bool {
        for (&tick, slots) in &self.bin_positions {
            let mask = self.bin_map.kinds_at_tick(tick);
            for (kind, &id) in slots.iter().enumerate() {
                let live = id != 0 && self.bins.get(&id).map_or(false, Bin::is_live);
                if live != (mask & (1 << kind) != 0) {
                    return false;
                }
            }
        }
        self.bin_map
            .occupied()
            .iter()
            .all(|(tick, kind)| self.bin_positions.get(tick).map_or(false, |s| s[*kind as usize] != 0))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Log Akışı Girdisi
// ─────────────────────────────────────────────────────────────────────────────

/// Akıştan tek bir log; blok içinde log index sırasıyla gelir.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub log_index: u64,
}

impl RawLog {
    /// RPC log'unu dönüştür. Bekleyen (blok numarası olmayan) log'lar reddedilir.
    pub fn from_rpc(log: &alloy::rpc::types::Log) -> Option<Self> {
        Some(Self {
            address: log.address(),
            topics: log.topics().to_vec(),
            data: log.data().data.clone(),
            block_number: log.block_number?,
            log_index: log.log_index.unwrap_or_default(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Swap Sonucu
// ─────────────────────────────────────────────────────────────────────────────

/// Fiyatlama swap'ları sınırlıdır; zincir üstü tekrarlar sınırsızdır.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapMode {
    /// Spekülatif kotasyon: iterasyon sınırı uygulanır
    Pricing,
    /// Gerçekleşmiş bir swap'ın tekrarı: sınır yok
    OnChain,
}

#[derive(Debug, Clone)]
pub struct SwapResult {
    /// Gerçekte alınan girdi, ücret dahil
    pub amount_in: U256,
    /// Gerçekte teslim edilen çıktı
    pub amount_out: U256,
    /// Geçilen tick sınırı sayısı
    pub ticks_crossed: u32,
    /// Tam çıktı açığı (havuzun karşılayamadığı istenen çıktı)
    pub unfilled: U256,
    /// Ücretin protokol payı, bin'lerin dışında tutulur
    pub protocol_fee: U256,
    /// Swap sonrası durum (hiçbir şey değişmediyse aynı Arc)
    pub state: Arc<PoolState>,
}

impl SwapResult {
    pub fn untouched(state: Arc<PoolState>) -> Self {
        Self {
            amount_in: U256::ZERO,
            amount_out: U256::ZERO,
            ticks_crossed: 0,
            unfilled: U256::ZERO,
            protocol_fee: U256::ZERO,
            state,
        }
    }

    /// Çağıranın belirtmediği taraftaki miktar.
    pub fn amount_other(&self, exact_output: bool) -> U256 {
        if exact_output {
            self.amount_in
        } else {
            self.amount_out
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Havuz Yapılandırması (JSON dosyası)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub address: Address,
    pub name: String,
    /// Kayıt ad alanı, örn. "maverick-v1"
    #[serde(default = "default_protocol_key")]
    pub protocol_key: String,
    #[serde(default = "default_decimals")]
    pub token_a_decimals: u8,
    #[serde(default = "default_decimals")]
    pub token_b_decimals: u8,
}

fn default_protocol_key() -> String {
    "bin-pool".into()
}

fn default_decimals() -> u8 {
    18
}

/// Havuz listesini bir JSON dosyasından oku.
pub fn load_pool_configs(path: &str) -> Result<Vec<PoolConfig>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("pool file {} could not be read: {}", path, e))?;
    let pools: Vec<PoolConfig> = serde_json::from_str(&raw)
        .map_err(|e| eyre::eyre!("pool file {} is not valid JSON: {}", path, e))?;
    if pools.is_empty() {
        return Err(eyre::eyre!("pool file {} lists no pools", path));
    }
    Ok(pools)
}

// ─────────────────────────────────────────────────────────────────────────────
// Servis Yapılandırması (.env)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// WebSocket RPC URL'si (blok aboneliği + okumalar)
    pub rpc_wss_url: String,
    /// JSON havuz listesi
    pub pools_file: String,
    /// Tek bir havuzun yenilenme zaman aşımı
    pub regeneration_timeout: Duration,
    /// Bu kadar bloktan eski anlık görüntüler atılır
    pub max_retained_blocks: u64,
    /// Multicall3 aggregate başına çağrı sayısı
    pub multicall_batch_size: usize,
    /// Her blokta kotasyonu yapılan A token miktarı (token ondalıkları)
    pub quote_amount: U256,
    /// Maksimum yeniden bağlanma denemesi (0 = sınırsız)
    pub max_retries: u32,
    /// Her N blokta bir özet yazdır
    pub stats_interval: u64,
}

impl MirrorConfig {
    pub fn from_env() -> Result<Self> {
        let rpc_wss_url = std::env::var("RPC_WSS_URL")
            .map_err(|_| eyre::eyre!("RPC_WSS_URL must be set in .env"))?;
        if rpc_wss_url.is_empty() || rpc_wss_url.starts_with("wss://your-") {
            return Err(eyre::eyre!("RPC_WSS_URL must be a real endpoint"));
        }

        let pools_file = std::env::var("POOLS_FILE").unwrap_or_else(|_| "pools.json".into());

        let regeneration_timeout =
            Duration::from_millis(Self::parse_env("REGENERATION_TIMEOUT_MS", 5_000u64));
        let max_retained_blocks = Self::parse_env("MAX_RETAINED_BLOCKS", 64u64).max(1);
        let multicall_batch_size = Self::parse_env("MULTICALL_BATCH_SIZE", 500usize).max(1);
        let quote_amount = std::env::var("QUOTE_AMOUNT")
            .ok()
            .and_then(|v| v.parse::<U256>().ok())
            .unwrap_or(U256::from(1_000_000_000_000_000_000u64));
        let max_retries = Self::parse_env("MAX_RETRIES", 0u32);
        let stats_interval = Self::parse_env("STATS_INTERVAL", 10u64).max(1);

        Ok(Self {
            rpc_wss_url,
            pools_file,
            regeneration_timeout,
            max_retained_blocks,
            multicall_batch_size,
            quote_amount,
            max_retries,
            stats_interval,
        })
    }

    fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
        std::env::var(key)
            .ok()
            .and_then(|v| v.parse::<T>().ok())
            .unwrap_or(default)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Oturum İstatistikleri
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MirrorStats {
    pub total_blocks_processed: u64,
    pub total_logs: u64,
    /// Hatayla biten havuz-bloklar (yenileme, zaman aşımı)
    pub failed_pool_blocks: u64,
    /// Tüm fiyatlama turlarında üretilen kotasyonlar
    pub total_quotes: u64,
    pub session_start: Instant,
    /// Bir bloğun tüm havuzlarda işlenme süresi ortalaması (ms)
    pub avg_block_latency_ms: f64,
    pub max_block_latency_ms: f64,
}

impl MirrorStats {
    pub fn new() -> Self {
        Self {
            total_blocks_processed: 0,
            total_logs: 0,
            failed_pool_blocks: 0,
            total_quotes: 0,
            session_start: Instant::now(),
            avg_block_latency_ms: 0.0,
            max_block_latency_ms: 0.0,
        }
    }

    /// Bir bloğun gecikmesini hareketli ortalamaya kat.
    pub fn update_latency(&mut self, latency_ms: f64) {
        if self.total_blocks_processed == 0 {
            self.avg_block_latency_ms = latency_ms;
        } else {
            let n = self.total_blocks_processed as f64;
            self.avg_block_latency_ms = (self.avg_block_latency_ms * n + latency_ms) / (n + 1.0);
        }
        self.max_block_latency_ms = self.max_block_latency_ms.max(latency_ms);
    }

    pub fn uptime_str(&self) -> String {
        let secs = self.session_start.elapsed().as_secs();
        format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

impl Default for MirrorStats {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Testler
// ─────────────────────────────────────────────────────────────────────────────
