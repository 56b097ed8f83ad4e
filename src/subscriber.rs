// ============================================================================
//  SUBSCRIBER v1.0: Olay Kaynaklı Havuz Durumu Konteyneri
//
//  v1.0 Yenilikler:
//  ✓ PoolLogic: protokol eklentisi (çözümle + uygula, yenile)
//  ✓ EventSubscriber: havuz başına anlık görüntü geçmişi, boşluk tespiti, resync
//  ✓ BinPoolLogic: bin havuzu olayları, Multicall3 ile yenileme
//  ✓ StateStore: (protokol, havuz) kaydı + fiyatlama turu
//
//  Okuyucular ArcSwap'lı geçmişten bir Arc yükler ve yazıcıyı asla
//  bloklamaz. Yazıcı blok başına bir kez yeni geçmiş haritası yayınlar;
//  okuyucu ya önceki bloğu ya da tamamen işlenmiş yenisini görür.
// ============================================================================

use alloy::primitives::{Address, U256};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::error::{PoolError, PoolResult};
use crate::handlers::apply_event;
use crate::pool_math;
use crate::state_sync::{decode_log, regenerate_pool, StateReader};
use crate::types::{PoolConfig, PoolState, RawLog};

// ─────────────────────────────────────────────────────────────────────────────
// Protokol Eklentisi
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait PoolLogic: Send + Sync {
    type State: Clone + Send + Sync + 'static;

    /// Bu havuzun log'larını tükettiği adres.
    fn address(&self) -> Address;

    /// `log`'u çözümle ve `prior`'a uygula. İzlenmeyen olaylar için `Ok(None)`.
    fn process_log(&self, prior: &Self::State, log: &RawLog) -> PoolResult<Option<Self::State>>;

    /// Tam durumu `block`'taki zincir okumalarından yeniden kur.
    async fn regenerate(&self, block: u64) -> PoolResult<Self::State>;
}

type History<S> = BTreeMap<u64, Arc<S>>;

/// Yazıcı tarafı kayıtları, tek bir kilitle korunur.
#[derive(Debug, Default)]
struct Cursor {
    last_block: Option<u64>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Olay Abonesi
// ─────────────────────────────────────────────────────────────────────────────

pub struct EventSubscriber<L: PoolLogic> {
    logic: L,
    history: ArcSwap<History<L::State>>,
    cursor: Mutex<Cursor>,
    writer: tokio::sync::Mutex<()>,
    needs_resync: AtomicBool,
    max_retained_blocks: u64,
    regeneration_timeout: Duration,
}

impl<L: PoolLogic> EventSubscriber<L> {
    pub fn new(logic: L, max_retained_blocks: u64, regeneration_timeout: Duration) -> Self {
        Self {
            logic,
            history: ArcSwap::from_pointee(BTreeMap::new()),
            cursor: Mutex::new(Cursor::default()),
            writer: tokio::sync::Mutex::new(()),
            needs_resync: AtomicBool::new(false),
            max_retained_blocks: max_retained_blocks.max(1),
            regeneration_timeout,
        }
    }

    pub fn logic(&self) -> &L {
        &self.logic
    }

    pub fn address(&self) -> Address {
        self.logic.address()
    }

    /// Anlık görüntüsü yayınlanan son blok.
    pub fn last_block(&self) -> Option<u64> {
        self.cursor.lock().last_block
    }

    /// `block`'ta yenile ve yayınla; log'lar `block + 1`'den itibaren kabul edilir.
    pub async fn initialize(&self, block: u64) -> PoolResult<Arc<L::State>> {
        let _guard = self.writer.lock().await;
        self.regenerate_at(block).await
    }

    /// Tek bir log'u çözümle ve `prior`'un kopyasına uygula.
    ///
    /// Çözümlenemeyen ve izlenmeyen log'lar durumu değiştirmez (`None`).
    /// Aynanın bozulduğunu gösteren bir işleyici hatası havuzu yeniden
    /// senkronizasyon için işaretler.
    pub fn process_log(&self, prior: &L::State, log: &RawLog) -> Option<L::State> {
        match self.logic.process_log(prior, log) {
            Ok(next) => next,
            Err(e) if e.requires_resync() => {
                warn!(pool = %self.address(), block = log.block_number, error = %e, "handler failed, resync scheduled");
                self.needs_resync.store(true, Ordering::SeqCst);
                None
            }
            Err(e) => {
                trace!(pool = %self.address(), block = log.block_number, error = %e, "log ignored");
                None
            }
        }
    }

    /// Bir bloğun log'larını işle ve sonucu yayınla.
    ///
    /// Son uygulanan bloktan beri bir boşluk, bekleyen bir resync veya
    /// işleme sırasında bulunan bozulma, bunun yerine `block`'ta yenileme
    /// yapar. Son uygulanan blok ve öncesi yok sayılır.
    pub async fn process_block(&self, block: u64, logs: &[RawLog]) -> PoolResult<Arc<L::State>> {
        let _guard = self.writer.lock().await;

        let last = self.cursor.lock().last_block;
        let Some(last) = last else {
            return self.regenerate_at(block).await;
        };
        if block <= last {
            return self.latest().ok_or(PoolError::StateUnavailable {
                pool: self.address(),
                block,
            });
        }
        if block != last + 1 {
            warn!(pool = %self.address(), last, block, "block gap, regenerating");
            return self.regenerate_at(block).await;
        }
        if self.needs_resync.load(Ordering::SeqCst) {
            warn!(pool = %self.address(), block, "resync requested, regenerating");
            return self.regenerate_at(block).await;
        }

        let Some(mut current) = self.latest() else {
            return self.regenerate_at(block).await;
        };

        let address = self.address();
        let mut ordered: Vec<&RawLog> = logs
            .iter()
            .filter(|log| log.address == address && log.block_number == block)
            .collect();
        ordered.sort_by_key(|log| log.log_index);

        let mut applied = 0usize;
        for log in &ordered {
            if let Some(next) = self.process_log(&current, log) {
                current = Arc::new(next);
                applied += 1;
            }
            if self.needs_resync.load(Ordering::SeqCst) {
                return self.regenerate_at(block).await;
            }
        }

        debug!(pool = %address, block, logs = ordered.len(), applied, "block folded");
        self.set_state(Arc::clone(&current), block);
        Ok(current)
    }

    /// `block`'ta veya öncesindeki en son anlık görüntü.
    pub fn get_state(&self, block: u64) -> Option<Arc<L::State>> {
        self.history
            .load()
            .range(..=block)
            .next_back()
            .map(|(_, state)| Arc::clone(state))
    }

    /// En güncel anlık görüntü.
    pub fn latest(&self) -> Option<Arc<L::State>> {
        self.history.load().values().next_back().cloned()
    }

    /// `state`'i `block`'ta yayınla, saklama penceresi dışındaki görüntüleri at.
    pub fn set_state(&self, state: Arc<L::State>, block: u64) {
        let oldest_kept = block.saturating_sub(self.max_retained_blocks - 1);
        self.history.rcu(|history| {
            let mut next: History<L::State> = history.range(oldest_kept..).map(|(b, s)| (*b, Arc::clone(s))).collect();
            next.insert(block, Arc::clone(&state));
            next
        });
        let mut cursor = self.cursor.lock();
        cursor.last_block = Some(cursor.last_block.map_or(block, |last| last.max(block)));
    }

    /// Bir sonraki `process_block`'ta yenile.
    pub fn resync(&self) {
        self.needs_resync.store(true, Ordering::SeqCst);
    }

    pub fn needs_resync(&self) -> bool {
        self.needs_resync.load(Ordering::SeqCst)
    }

    async fn regenerate_at(&self, block: u64) -> PoolResult<Arc<L::State>> {
        let pool = self.address();
        let state = match tokio::time::timeout(self.regeneration_timeout, self.logic.regenerate(block)).await {
            Ok(Ok(state)) => Arc::new(state),
            Ok(Err(e)) => {
                warn!(pool = %pool, block, error = %e, "regeneration failed");
                return Err(e);
            }
            Err(_) => {
                warn!(pool = %pool, block, timeout_ms = self.regeneration_timeout.as_millis() as u64, "regeneration timed out");
                return Err(PoolError::Regeneration {
                    pool,
                    block,
                    reason: format!("timed out after {:?}", self.regeneration_timeout),
                });
            }
        };

        // yenilenen durum tüm geçmişin yerini alır
        self.history.store(Arc::new(BTreeMap::from([(block, Arc::clone(&state))])));
        self.cursor.lock().last_block = Some(block);
        self.needs_resync.store(false, Ordering::SeqCst);
        Ok(state)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bin Havuzu Mantığı
// ─────────────────────────────────────────────────────────────────────────────

pub struct BinPoolLogic {
    config: PoolConfig,
    reader: Arc<dyn StateReader>,
}

impl BinPoolLogic {
    pub fn new(config: PoolConfig, reader: Arc<dyn StateReader>) -> Self {
        Self { config, reader }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }
}

#[async_trait]
impl PoolLogic for BinPoolLogic {
    type State = PoolState;

    fn address(&self) -> Address {
        self.config.address
    }

    fn process_log(&self, prior: &PoolState, log: &RawLog) -> PoolResult<Option<PoolState>> {
        let Some(event) = decode_log(log)? else {
            return Ok(None);
        };
        let decimals = (self.config.token_a_decimals, self.config.token_b_decimals);
        apply_event(prior, &event, decimals).map(Some)
    }

    async fn regenerate(&self, block: u64) -> PoolResult<PoolState> {
        regenerate_pool(self.reader.as_ref(), self.config.address, block).await
    }
}

pub type BinPoolSubscriber = EventSubscriber<BinPoolLogic>;

impl EventSubscriber<BinPoolLogic> {
    /// `block`'ta veya öncesindeki anlık görüntünün aktif tick'i.
    pub fn current_active_tick(&self, block: u64) -> Option<i32> {
        self.get_state(block).map(|state| state.active_tick)
    }

    /// `block`'ta veya öncesindeki görüntüye karşı bir swap'ı token birimlerinde fiyatla.
    pub fn swap(
        &self,
        block: u64,
        amount: U256,
        token_a_in: bool,
        exact_output: bool,
        speculative: bool,
    ) -> PoolResult<(U256, u32)> {
        let state = self.get_state(block).ok_or(PoolError::StateUnavailable {
            pool: self.address(),
            block,
        })?;
        let config = self.logic.config();
        pool_math::quote(
            &state,
            amount,
            token_a_in,
            exact_output,
            speculative,
            config.token_a_decimals,
            config.token_b_decimals,
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Durum Deposu
// ─────────────────────────────────────────────────────────────────────────────

/// Kayıt anahtarı: protokol ad alanı + havuz adresi.
pub type PoolKey = (String, Address);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub pool: Address,
    pub amount_other: U256,
    pub ticks_crossed: u32,
}

/// Havuz başına açık kayıt; havuzları süren veya fiyatlayan koda geçirilir.
#[derive(Default)]
pub struct StateStore {
    pools: RwLock<HashMap<PoolKey, Arc<BinPoolSubscriber>>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, subscriber: BinPoolSubscriber) -> Arc<BinPoolSubscriber> {
        let key = (subscriber.logic().config().protocol_key.clone(), subscriber.address());
        let subscriber = Arc::new(subscriber);
        self.pools.write().insert(key, Arc::clone(&subscriber));
        subscriber
    }

    pub fn get(&self, protocol_key: &str, pool: Address) -> Option<Arc<BinPoolSubscriber>> {
        self.pools.read().get(&(protocol_key.to_string(), pool)).cloned()
    }

    pub fn len(&self) -> usize {
        self.pools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.read().is_empty()
    }

    /// Adrese göre sıralı aboneler.
    pub fn subscribers(&self) -> Vec<Arc<BinPoolSubscriber>> {
        let mut subs: Vec<_> = self.pools.read().values().cloned().collect();
        subs.sort_by_key(|s| s.address());
        subs
    }

    /// Her havuzu eşzamanlı olarak `block`'a kadar ilerlet. Her havuzun sonucu
    /// bağımsızdır; başarısız bir havuz diğerlerini bekletmez.
    pub async fn process_block(&self, block: u64, logs: &[RawLog]) -> Vec<(Address, PoolResult<()>)> {
        let subscribers = self.subscribers();
        let futures: Vec<_> = subscribers
            .iter()
            .map(|sub| async move { (sub.address(), sub.process_block(block, logs).await.map(|_| ())) })
            .collect();
        join_all(futures).await
    }

    /// Tek fiyatlama turu: her havuzu `block`'ta fiyatla, kotasyon
    /// üreten havuzları tut.
    pub fn quote_all(&self, block: u64, amount: U256, token_a_in: bool, exact_output: bool) -> Vec<Quote> {
        self.subscribers()
            .iter()
            .filter_map(|sub| match sub.swap(block, amount, token_a_in, exact_output, true) {
                Ok((amount_other, ticks_crossed)) => Some(Quote {
                    pool: sub.address(),
                    amount_other,
                    ticks_crossed,
                }),
                Err(e) => {
                    if e.requires_resync() {
                        sub.resync();
                    }
                    warn!(pool = %sub.address(), block, error = %e, "pool excluded from pricing round");
                    None
                }
            })
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Testler
// ─────────────────────────────────────────────────────────────────────────────
