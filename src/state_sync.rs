// ============================================================================
//  STATE_SYNC v1.0: Olay ABI'si, Log Çözümleme ve Tam Durum Yenileme
//
//  v1.0 Yenilikler:
//  ✓ Havuz olay ABI'si (sol!) ve RawLog → PoolEvent çözümleme
//  ✓ StateReader: sabit blokta toplu eth_call
//  ✓ Multicall3Reader: Multicall3.aggregate3 üzerinde StateReader
//  ✓ regenerate_pool: getState + fee + tickSpacing, ardından getBin(1..=binCounter)
//
//  Mimari:
//    1. Tek batch: getState(), fee(), tickSpacing()
//    2. binCounter'a kadar her id için getBin(id), okuyucu parçalara böler
//    3. Canlı bin'ler → pozisyon + doluluk, birleşmiş bin'ler → yönlendirme kaydı
// ============================================================================

use alloy::eips::BlockId;
use alloy::network::Ethereum;
use alloy::primitives::{address, Address, Bytes, U256};
use alloy::providers::Provider;
use alloy::sol;
use alloy::sol_types::{SolCall, SolEvent};
use async_trait::async_trait;
use futures_util::future::join_all;
use std::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::{PoolError, PoolResult};
use crate::math::checked_tick;
use crate::types::{Bin, BinId, PoolState, RawLog};

// ─────────────────────────────────────────────────────────────────────────────
// Multicall3: tüm EVM zincirlerinde aynı adres
// ─────────────────────────────────────────────────────────────────────────────

pub const MULTICALL3_ADDRESS: Address = address!("cA11bde05977b3631167028862bE2a173976CA11");

sol! {
    #[sol(rpc)]
    interface IMulticall3 {
        struct Call3 {
            address target;
            bool allowFailure;
            bytes callData;
        }

        struct Result {
            bool success;
            bytes returnData;
        }

        function aggregate3(Call3[] calldata calls) external payable returns (Result[] memory returnData);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bin Havuzu Arayüzü (view'lar + olaylar)
// ─────────────────────────────────────────────────────────────────────────────

sol! {
    #[sol(all_derives)]
    interface IBinPool {
        struct BinDelta {
            uint128 deltaA;
            uint128 deltaB;
            uint256 deltaLpBalance;
            uint128 binId;
            uint8 kind;
            int32 lowerTick;
            bool isActive;
        }

        struct State {
            int32 activeTick;
            uint8 status;
            uint128 binCounter;
            uint64 protocolFeeRatio;
        }

        struct BinState {
            uint128 reserveA;
            uint128 reserveB;
            uint128 mergeBinBalance;
            uint128 mergeId;
            uint128 totalSupply;
            uint8 kind;
            int32 lowerTick;
        }

        event Swap(address sender, address recipient, bool tokenAIn, bool exactOutput, uint256 amountIn, uint256 amountOut, int32 activeTick);
        event AddLiquidity(address indexed sender, uint256 indexed tokenId, BinDelta[] binDeltas);
        event RemoveLiquidity(address indexed sender, address indexed recipient, uint256 indexed tokenId, BinDelta[] binDeltas);
        event BinMerged(uint128 indexed binId, uint128 reserveA, uint128 reserveB, uint128 mergeId);
        event BinMoved(uint128 indexed binId, int128 previousTick, int128 newTick);
        event ProtocolFeeSet(uint16 protocolFee);

        function getState() external view returns (State memory);
        function fee() external view returns (uint256);
        function tickSpacing() external view returns (uint256);
        function getBin(uint128 binId) external view returns (BinState memory);
    }
}

pub use IBinPool::BinDelta;

/// Protokol ücret oranları binde olarak bildirilir.
const PROTOCOL_FEE_UNIT: u64 = 1_000_000_000_000_000;

/// Zincir üstü binde değerinden 18 ondalıklı protokol ücret oranı.
pub fn protocol_fee_ratio(thousandths: u64) -> U256 {
    U256::from(thousandths) * U256::from(PROTOCOL_FEE_UNIT)
}

// ─────────────────────────────────────────────────────────────────────────────
// Log Çözümleme
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    Swap(IBinPool::Swap),
    AddLiquidity(Vec<BinDelta>),
    RemoveLiquidity(Vec<BinDelta>),
    BinMerged(IBinPool::BinMerged),
    BinMoved(IBinPool::BinMoved),
    ProtocolFeeSet(IBinPool::ProtocolFeeSet),
}

/// Tek bir havuz log'unu çözümle. Aynanın izlemediği olaylar için `Ok(None)`.
pub fn decode_log(log: &RawLog) -> PoolResult<Option<PoolEvent>> {
    let Some(topic0) = log.topics.first() else {
        return Ok(None);
    };
    let topics = log.topics.iter().copied();
    let data = log.data.as_ref();
    let decode_err = |e: alloy::sol_types::Error| {
        PoolError::LogDecode(format!(
            "block {} log {}: {}",
            log.block_number, log.log_index, e
        ))
    };

    let event = match *topic0 {
        IBinPool::Swap::SIGNATURE_HASH => {
            PoolEvent::Swap(IBinPool::Swap::decode_raw_log(topics, data).map_err(decode_err)?)
        }
        IBinPool::AddLiquidity::SIGNATURE_HASH => PoolEvent::AddLiquidity(
            IBinPool::AddLiquidity::decode_raw_log(topics, data)
                .map_err(decode_err)?
                .binDeltas,
        ),
        IBinPool::RemoveLiquidity::SIGNATURE_HASH => PoolEvent::RemoveLiquidity(
            IBinPool::RemoveLiquidity::decode_raw_log(topics, data)
                .map_err(decode_err)?
                .binDeltas,
        ),
        IBinPool::BinMerged::SIGNATURE_HASH => PoolEvent::BinMerged(
            IBinPool::BinMerged::decode_raw_log(topics, data).map_err(decode_err)?,
        ),
        IBinPool::BinMoved::SIGNATURE_HASH => PoolEvent::BinMoved(
            IBinPool::BinMoved::decode_raw_log(topics, data).map_err(decode_err)?,
        ),
        IBinPool::ProtocolFeeSet::SIGNATURE_HASH => PoolEvent::ProtocolFeeSet(
            IBinPool::ProtocolFeeSet::decode_raw_log(topics, data).map_err(decode_err)?,
        ),
        _ => {
            trace!(topic = %topic0, block = log.block_number, "untracked event");
            return Ok(None);
        }
    };
    Ok(Some(event))
}

/// Bir olayı akış girdisine kodla (test verileri ve tekrarlar).
pub fn encode_log<E: SolEvent>(address: Address, event: &E, block_number: u64, log_index: u64) -> RawLog {
    let data = event.encode_log_data();
    RawLog {
        address,
        topics: data.topics().to_vec(),
        data: data.data,
        block_number,
        log_index,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Toplu Durum Okuyucu
// ─────────────────────────────────────────────────────────────────────────────

/// View çağrılarını sabit blokta çalıştırır, ham dönüş verisini sırayla döndürür.
#[async_trait]
pub trait StateReader: Send + Sync {
    async fn batch_call(&self, calls: Vec<(Address, Bytes)>, block: u64) -> PoolResult<Vec<Bytes>>;
}

/// Multicall3.aggregate3 üzerinde StateReader, eth_call başına `batch_size` çağrı.
pub struct Multicall3Reader<P> {
    provider: P,
    batch_size: usize,
}

impl<P> Multicall3Reader<P> {
    pub fn new(provider: P, batch_size: usize) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
        }
    }
}

#[async_trait]
impl<P> StateReader for Multicall3Reader<P>
where
    P: Provider<Ethereum> + Send + Sync,
{
    async fn batch_call(&self, calls: Vec<(Address, Bytes)>, block: u64) -> PoolResult<Vec<Bytes>> {
        let multicall = IMulticall3::new(MULTICALL3_ADDRESS, &self.provider);

        let batches: Vec<Vec<IMulticall3::Call3>> = calls
            .chunks(self.batch_size)
            .map(|chunk| {
                chunk
                    .iter()
                    .map(|(target, data)| IMulticall3::Call3 {
                        target: *target,
                        allowFailure: true,
                        callData: data.clone(),
                    })
                    .collect()
            })
            .collect();

        let futures: Vec<_> = batches
            .into_iter()
            .map(|batch| {
                let multicall = &multicall;
                async move {
                    multicall
                        .aggregate3(batch)
                        .block(BlockId::number(block))
                        .call()
                        .await
                }
            })
            .collect();

        let mut out = Vec::with_capacity(calls.len());
        for result in join_all(futures).await {
            let results = result.map_err(|e| PoolError::Rpc(format!("Multicall3 aggregate3: {}", e)))?;
            for (i, entry) in results.into_iter().enumerate() {
                if !entry.success {
                    return Err(PoolError::Rpc(format!("call {} of batch reverted", i)));
                }
                out.push(entry.returnData);
            }
        }
        Ok(out)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Yenileme
// ─────────────────────────────────────────────────────────────────────────────

/// Bir havuzun tam durumunu `block`'taki zincir okumalarından yeniden kur.
pub async fn regenerate_pool<R: StateReader + ?Sized>(
    reader: &R,
    pool: Address,
    block: u64,
) -> PoolResult<PoolState> {
    let start = Instant::now();
    let fail = |reason: String| PoolError::Regeneration { pool, block, reason };

    let header_calls = vec![
        (pool, Bytes::from(IBinPool::getStateCall {}.abi_encode())),
        (pool, Bytes::from(IBinPool::feeCall {}.abi_encode())),
        (pool, Bytes::from(IBinPool::tickSpacingCall {}.abi_encode())),
    ];
    let header = reader
        .batch_call(header_calls, block)
        .await
        .map_err(|e| fail(e.to_string()))?;
    let [state_raw, fee_raw, spacing_raw] = header.as_slice() else {
        return Err(fail(format!("expected 3 header results, got {}", header.len())));
    };

    let pool_state = IBinPool::getStateCall::abi_decode_returns(state_raw)
        .map_err(|e| fail(format!("getState: {}", e)))?;
    let fee = IBinPool::feeCall::abi_decode_returns(fee_raw).map_err(|e| fail(format!("fee: {}", e)))?;
    let spacing = IBinPool::tickSpacingCall::abi_decode_returns(spacing_raw)
        .map_err(|e| fail(format!("tickSpacing: {}", e)))?;
    let tick_spacing = u32::try_from(spacing).map_err(|_| fail(format!("tick spacing {} too large", spacing)))?;

    let mut state = PoolState::new(fee, tick_spacing, protocol_fee_ratio(pool_state.protocolFeeRatio));
    state.active_tick = checked_tick(i128::from(pool_state.activeTick))
        .map_err(|e| fail(format!("active tick: {}", e)))?;

    let bin_counter: BinId = pool_state.binCounter;
    let bin_calls: Vec<(Address, Bytes)> = (1..=bin_counter)
        .map(|id| (pool, Bytes::from(IBinPool::getBinCall { binId: id }.abi_encode())))
        .collect();
    let bins_raw = reader
        .batch_call(bin_calls, block)
        .await
        .map_err(|e| fail(e.to_string()))?;

    let mut merged: Vec<(BinId, Bin)> = Vec::new();
    for (id, raw) in (1..=bin_counter).zip(bins_raw.iter()) {
        let bin = IBinPool::getBinCall::abi_decode_returns(raw)
            .map_err(|e| fail(format!("getBin({}): {}", id, e)))?;
        if checked_tick(i128::from(bin.lowerTick)).is_err() {
            warn!(pool = %pool, bin = id, tick = bin.lowerTick, "bin outside the tick range, not mirrored");
            continue;
        }
        let mut mirrored = Bin::new(bin.kind, bin.lowerTick, U256::from(bin.reserveA), U256::from(bin.reserveB));
        if bin.mergeId != 0 {
            mirrored.merge_id = bin.mergeId;
            merged.push((id, mirrored));
        } else if bin.totalSupply != 0 || bin.reserveA != 0 || bin.reserveB != 0 {
            state.register_bin(id, mirrored);
        }
    }
    for (id, bin) in merged {
        state.bins.insert(id, bin);
    }
    state.bin_counter = bin_counter;

    debug!(
        pool = %pool,
        block,
        bins = state.bins.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "pool regenerated"
    );
    Ok(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Testler
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::B256;
    use alloy::sol_types::SolValue;
    use std::collections::HashMap;

    const POOL: Address = address!("00000000000000000000000000000000000000aa");

    /// Calldata'ya göre hazır dönüş verisi sunar.
    struct CannedReader {
        responses: HashMap<Bytes, Bytes>,
    }

    #[async_trait]
    impl StateReader for CannedReader {
        async fn batch_call(&self, calls: Vec<(Address, Bytes)>, _block: u64) -> PoolResult<Vec<Bytes>> {
            calls
                .iter()
                .map(|(_, data)| {
                    self.responses
                        .get(data)
                        .cloned()
                        .ok_or_else(|| PoolError::Rpc("unknown call".into()))
                })
                .collect()
        }
    }

    fn calldata<C: SolCall>(call: C) -> Bytes {
        Bytes::from(call.abi_encode())
    }

    fn bin_state(a: u128, b: u128, merge_id: u128, supply: u128, kind: u8, tick: i32) -> Bytes {
        Bytes::from(
            IBinPool::BinState {
                reserveA: a,
                reserveB: b,
                mergeBinBalance: 0,
                mergeId: merge_id,
                totalSupply: supply,
                kind,
                lowerTick: tick,
            }
            .abi_encode(),
        )
    }

    #[test]
    fn test_decode_known_and_unknown_logs() {
        let moved = IBinPool::BinMoved {
            binId: 7,
            previousTick: -2,
            newTick: 3,
        };
        let log = encode_log(POOL, &moved, 10, 0);
        assert_eq!(decode_log(&log).unwrap(), Some(PoolEvent::BinMoved(moved)));

        let mut unknown = log.clone();
        unknown.topics[0] = B256::repeat_byte(0x11);
        assert_eq!(decode_log(&unknown).unwrap(), None);

        let mut truncated = log;
        truncated.data = Bytes::from_static(&[0u8; 5]);
        assert!(matches!(decode_log(&truncated), Err(PoolError::LogDecode(_))));
    }

    #[test]
    fn test_decode_liquidity_deltas() {
        let delta = BinDelta {
            deltaA: 5,
            deltaB: 6,
            deltaLpBalance: U256::from(11u8),
            binId: 3,
            kind: 1,
            lowerTick: -4,
            isActive: true,
        };
        let event = IBinPool::AddLiquidity {
            sender: POOL,
            tokenId: U256::from(1u8),
            binDeltas: vec![delta.clone()],
        };
        let log = encode_log(POOL, &event, 1, 2);
        assert_eq!(decode_log(&log).unwrap(), Some(PoolEvent::AddLiquidity(vec![delta])));
    }

    #[tokio::test]
    async fn test_regenerate_builds_positions_and_merges() {
        let mut responses = HashMap::new();
        responses.insert(
            calldata(IBinPool::getStateCall {}),
            Bytes::from(
                IBinPool::State {
                    activeTick: 2,
                    status: 0,
                    binCounter: 3,
                    protocolFeeRatio: 100,
                }
                .abi_encode(),
            ),
        );
        responses.insert(
            calldata(IBinPool::feeCall {}),
            Bytes::from(U256::from(3_000_000_000_000_000u64).abi_encode()),
        );
        responses.insert(
            calldata(IBinPool::tickSpacingCall {}),
            Bytes::from(U256::from(10u8).abi_encode()),
        );
        responses.insert(calldata(IBinPool::getBinCall { binId: 1 }), bin_state(4, 0, 0, 9, 0, 2));
        responses.insert(calldata(IBinPool::getBinCall { binId: 2 }), bin_state(0, 0, 1, 0, 0, 2));
        responses.insert(calldata(IBinPool::getBinCall { binId: 3 }), bin_state(0, 0, 0, 0, 1, 5));
        let reader = CannedReader { responses };

        let state = regenerate_pool(&reader, POOL, 100).await.unwrap();
        assert_eq!(state.active_tick, 2);
        assert_eq!(state.tick_spacing, 10);
        assert_eq!(state.bin_counter, 3);
        assert_eq!(state.protocol_fee_ratio, U256::from(100_000_000_000_000_000u64));
        assert_eq!(state.bins_at_tick(2), vec![1]);
        assert_eq!(state.bins[&2].merge_id, 1);
        assert!(!state.bins.contains_key(&3), "empty bin is not mirrored");
        assert!(state.occupancy_consistent());
    }

    #[tokio::test]
    async fn test_regenerate_skips_bins_outside_tick_range() {
        let mut responses = HashMap::new();
        responses.insert(
            calldata(IBinPool::getStateCall {}),
            Bytes::from(
                IBinPool::State {
                    activeTick: 0,
                    status: 0,
                    binCounter: 2,
                    protocolFeeRatio: 0,
                }
                .abi_encode(),
            ),
        );
        responses.insert(calldata(IBinPool::feeCall {}), Bytes::from(U256::ZERO.abi_encode()));
        responses.insert(calldata(IBinPool::tickSpacingCall {}), Bytes::from(U256::from(1u8).abi_encode()));
        responses.insert(calldata(IBinPool::getBinCall { binId: 1 }), bin_state(7, 0, 0, 1, 0, 0));
        responses.insert(calldata(IBinPool::getBinCall { binId: 2 }), bin_state(7, 0, 0, 1, 0, 2_000_000_000));
        let reader = CannedReader { responses };

        let state = regenerate_pool(&reader, POOL, 1).await.unwrap();
        assert_eq!(state.bins.keys().copied().collect::<Vec<_>>(), vec![1]);
        assert_eq!(state.bin_counter, 2);
        assert!(state.occupancy_consistent());
    }

    #[tokio::test]
    async fn test_regenerate_reports_reader_failure() {
        let reader = CannedReader {
            responses: HashMap::new(),
        };
        let err = regenerate_pool(&reader, POOL, 5).await.unwrap_err();
        assert!(matches!(err, PoolError::Regeneration { block: 5, .. }));
    }
}
