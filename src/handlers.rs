// ============================================================================
//  HANDLERS v1.0: Havuz Olayları → Sonraki Anlık Görüntü
//
//  Her işleyici önceki anlık görüntünün özel bir kopyası üzerinde çalışır;
//  önceki görüntüye asla dokunulmaz. Tutarsızlıklar (eksik bin'ler,
//  birleşme döngüleri) MathInvariantViolation olarak yüzeye çıkar ve abone
//  havuzu yeniden senkronize eder. Aralık dışı tick taşıyan log'lar
//  LogDecode ile reddedilir.
// ============================================================================

use alloy::primitives::U256;
use std::sync::Arc;
use tracing::debug;

use crate::error::{PoolError, PoolResult};
use crate::math::{checked_tick, to_scale};
use crate::pool_math;
use crate::state_sync::{protocol_fee_ratio, BinDelta, IBinPool, PoolEvent};
use crate::types::{Bin, BinId, PoolState, SwapMode, KIND_COUNT};

/// Çözümlenmiş tek bir olayı `prior`'a uygula, sonraki anlık görüntüyü döndür.
///
/// `decimals`: swap miktarlarını ölçeklemek için A / B token ondalıkları.
pub fn apply_event(prior: &PoolState, event: &PoolEvent, decimals: (u8, u8)) -> PoolResult<PoolState> {
    match event {
        PoolEvent::Swap(swap) => replay_swap(prior, swap, decimals),
        PoolEvent::AddLiquidity(deltas) => {
            let mut next = prior.clone();
            add_liquidity(&mut next, deltas)?;
            Ok(next)
        }
        PoolEvent::RemoveLiquidity(deltas) => {
            let mut next = prior.clone();
            remove_liquidity(&mut next, deltas)?;
            Ok(next)
        }
        PoolEvent::BinMerged(merged) => {
            let mut next = prior.clone();
            merge_bin(
                &mut next,
                merged.binId,
                merged.mergeId,
                U256::from(merged.reserveA),
                U256::from(merged.reserveB),
            )?;
            Ok(next)
        }
        PoolEvent::BinMoved(moved) => {
            let mut next = prior.clone();
            move_bin(&mut next, moved.binId, tick_from(moved.previousTick)?, tick_from(moved.newTick)?)?;
            Ok(next)
        }
        PoolEvent::ProtocolFeeSet(set) => {
            let mut next = prior.clone();
            next.protocol_fee_ratio = protocol_fee_ratio(u64::from(set.protocolFee));
            Ok(next)
        }
    }
}

/// Tick aralığı dışındaki tick'ler aynalanamaz; log reddedilir.
fn tick_from(raw: impl Into<i128>) -> PoolResult<i32> {
    let raw: i128 = raw.into();
    checked_tick(raw).map_err(|_| PoolError::LogDecode(format!("tick {} is outside the tick range", raw)))
}

fn missing(id: BinId) -> PoolError {
    PoolError::MathInvariantViolation(format!("bin {} is not mirrored", id))
}

// ─────────────────────────────────────────────────────────────────────────────
// Likidite
// ─────────────────────────────────────────────────────────────────────────────

/// Yeni kimlikler bin oluşturur; bilinen kimlikler birleşme zincirinin hayatta kalan köküne eklenir.
pub fn add_liquidity(state: &mut PoolState, deltas: &[BinDelta]) -> PoolResult<()> {
    for delta in deltas {
        let (delta_a, delta_b) = (U256::from(delta.deltaA), U256::from(delta.deltaB));
        if state.bins.contains_key(&delta.binId) {
            let root = state.resolve_root(delta.binId)?;
            let bin = state.bins.get_mut(&root).ok_or_else(|| missing(root))?;
            bin.reserve_a = bin.reserve_a.saturating_add(delta_a);
            bin.reserve_b = bin.reserve_b.saturating_add(delta_b);
        } else {
            if delta.kind as usize >= KIND_COUNT {
                return Err(PoolError::MathInvariantViolation(format!(
                    "bin {} has kind {}",
                    delta.binId, delta.kind
                )));
            }
            let lower_tick = tick_from(delta.lowerTick)?;
            state.register_bin(delta.binId, Bin::new(delta.kind, lower_tick, delta_a, delta_b));
        }
    }
    Ok(())
}

/// Kök bin'den çıkar (sıfırda kırpılır); bin'i pasif bildiren bir delta
/// onu pozisyonu ve doluluğuyla birlikte siler.
pub fn remove_liquidity(state: &mut PoolState, deltas: &[BinDelta]) -> PoolResult<()> {
    for delta in deltas {
        let root = state.resolve_root(delta.binId)?;
        let bin = state.bins.get_mut(&root).ok_or_else(|| missing(root))?;
        bin.reserve_a = bin.reserve_a.saturating_sub(U256::from(delta.deltaA));
        bin.reserve_b = bin.reserve_b.saturating_sub(U256::from(delta.deltaB));

        if !delta.isActive && root == delta.binId {
            let (tick, kind) = (bin.lower_tick, bin.kind);
            state.bins.remove(&root);
            state.release_position(root, tick, kind);
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Bin Yaşam Döngüsü
// ─────────────────────────────────────────────────────────────────────────────

/// `retiring`'i `survivor`'a birleştir, bildirilen rezervleri taşı.
///
/// Hayatta kalanlar her zaman onlara birleşen bin'lerden eskidir; bu,
/// birleşme zincirlerini döngüsüz tutar.
pub fn merge_bin(
    state: &mut PoolState,
    retiring: BinId,
    survivor: BinId,
    reserve_a: U256,
    reserve_b: U256,
) -> PoolResult<()> {
    if survivor == 0 || survivor >= retiring {
        return Err(PoolError::MathInvariantViolation(format!(
            "bin {} cannot merge into bin {}",
            retiring, survivor
        )));
    }
    let root = state.resolve_root(survivor)?;

    let bin = state.bins.get_mut(&retiring).ok_or_else(|| missing(retiring))?;
    let (tick, kind) = (bin.lower_tick, bin.kind);
    bin.merge_id = survivor;
    bin.reserve_a = U256::ZERO;
    bin.reserve_b = U256::ZERO;
    state.release_position(retiring, tick, kind);

    let target = state.bins.get_mut(&root).ok_or_else(|| missing(root))?;
    target.reserve_a = target.reserve_a.saturating_add(reserve_a);
    target.reserve_b = target.reserve_b.saturating_add(reserve_b);
    Ok(())
}

/// Bir bin'in alt tick'ini taşı; yeni yuva boşsa doluluğunu da taşı.
pub fn move_bin(state: &mut PoolState, id: BinId, previous_tick: i32, new_tick: i32) -> PoolResult<()> {
    let bin = state.bins.get_mut(&id).ok_or_else(|| missing(id))?;
    bin.lower_tick = new_tick;
    let (kind, live) = (bin.kind, bin.is_live());
    if !live {
        return Ok(());
    }

    state.release_position(id, previous_tick, kind);
    if !state.occupy_position(id, new_tick, kind) {
        debug!(bin = id, tick = new_tick, kind, "move target slot already taken");
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Swap Tekrarı
// ─────────────────────────────────────────────────────────────────────────────

/// Gerçekleşmiş bir swap'ı motordan tekrar geçir (iterasyon sınırı yok)
/// ve havuzun bildirdiği tick'i benimse.
pub fn replay_swap(prior: &PoolState, swap: &IBinPool::Swap, decimals: (u8, u8)) -> PoolResult<PoolState> {
    let (decimals_a, decimals_b) = decimals;
    let active_tick = tick_from(swap.activeTick)?;
    let amount = if swap.exactOutput {
        to_scale(swap.amountOut, if swap.tokenAIn { decimals_b } else { decimals_a }, false)?
    } else {
        to_scale(swap.amountIn, if swap.tokenAIn { decimals_a } else { decimals_b }, false)?
    };

    let snapshot = Arc::new(prior.clone());
    let result = pool_math::swap(&snapshot, amount, swap.tokenAIn, swap.exactOutput, SwapMode::OnChain, None)?;
    drop(snapshot);

    let mut next = Arc::try_unwrap(result.state).unwrap_or_else(|shared| (*shared).clone());
    next.active_tick = active_tick;
    Ok(next)
}

// ─────────────────────────────────────────────────────────────────────────────
// Testler
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::ONE;
    use alloy::primitives::Address;

    fn delta(id: BinId, kind: u8, tick: i32, a: u128, b: u128, active: bool) -> BinDelta {
        BinDelta {
            deltaA: a,
            deltaB: b,
            deltaLpBalance: U256::ZERO,
            binId: id,
            kind,
            lowerTick: tick,
            isActive: active,
        }
    }

    fn empty() -> PoolState {
        PoolState::new(U256::from(3_000_000_000_000_000u64), 1, U256::ZERO)
    }

    #[test]
    fn test_add_creates_then_tops_up() {
        let mut state = empty();
        add_liquidity(&mut state, &[delta(4, 2, -7, 10, 0, true)]).unwrap();
        assert_eq!(state.bin_counter, 4);
        assert_eq!(state.bins_at_tick(-7), vec![4]);
        assert_eq!(state.bin_map.kinds_at_tick(-7), 0b0100);

        add_liquidity(&mut state, &[delta(4, 2, -7, 5, 3, true)]).unwrap();
        assert_eq!(state.bins[&4].reserve_a, U256::from(15u8));
        assert_eq!(state.bins[&4].reserve_b, U256::from(3u8));
        assert!(state.occupancy_consistent());
    }

    #[test]
    fn test_add_to_merged_bin_reaches_root() {
        let mut state = empty();
        add_liquidity(&mut state, &[delta(1, 0, 0, 10, 0, true), delta(2, 0, 1, 4, 0, true)]).unwrap();
        merge_bin(&mut state, 2, 1, U256::from(4u8), U256::ZERO).unwrap();

        add_liquidity(&mut state, &[delta(2, 0, 1, 6, 0, true)]).unwrap();
        assert_eq!(state.bins[&1].reserve_a, U256::from(20u8));
        assert_eq!(state.bins[&2].reserve_a, U256::ZERO);
    }

    #[test]
    fn test_remove_clamps_and_deletes_inactive() {
        let mut state = empty();
        add_liquidity(&mut state, &[delta(1, 1, 3, 10, 10, true)]).unwrap();

        remove_liquidity(&mut state, &[delta(1, 1, 3, 4, 25, true)]).unwrap();
        assert_eq!(state.bins[&1].reserve_a, U256::from(6u8));
        assert_eq!(state.bins[&1].reserve_b, U256::ZERO, "clamped, never negative");

        remove_liquidity(&mut state, &[delta(1, 1, 3, 6, 0, false)]).unwrap();
        assert!(state.bins.is_empty());
        assert!(state.bin_map.is_empty());
        assert!(state.bin_positions.is_empty());
    }

    #[test]
    fn test_merge_moves_reserves_and_clears_position() {
        let mut state = empty();
        add_liquidity(&mut state, &[delta(1, 0, 0, 10, 2, true), delta(2, 1, 0, 5, 1, true)]).unwrap();
        merge_bin(&mut state, 2, 1, U256::from(5u8), U256::from(1u8)).unwrap();

        assert_eq!(state.bins[&1].reserve_a, U256::from(15u8));
        assert_eq!(state.bins[&1].reserve_b, U256::from(3u8));
        assert_eq!(state.bins[&2].merge_id, 1);
        assert_eq!(state.bin_map.kinds_at_tick(0), 0b0001);
        assert!(state.occupancy_consistent());
        assert_eq!(state.reserves_at_tick(0), (U256::from(15u8), U256::from(3u8)));
    }

    #[test]
    fn test_merge_into_newer_bin_is_rejected() {
        let mut state = empty();
        add_liquidity(&mut state, &[delta(1, 0, 0, 1, 0, true), delta(2, 0, 1, 1, 0, true)]).unwrap();
        let err = merge_bin(&mut state, 1, 2, U256::ZERO, U256::ZERO).unwrap_err();
        assert!(err.requires_resync());
        let err = merge_bin(&mut state, 2, 2, U256::ZERO, U256::ZERO).unwrap_err();
        assert!(err.requires_resync());
    }

    #[test]
    fn test_move_carries_occupancy() {
        let mut state = empty();
        add_liquidity(&mut state, &[delta(1, 1, 0, 1, 0, true), delta(2, 1, 5, 1, 0, true)]).unwrap();

        move_bin(&mut state, 1, 0, 2).unwrap();
        assert_eq!(state.bins[&1].lower_tick, 2);
        assert!(!state.bin_map.is_active(0));
        assert_eq!(state.bins_at_tick(2), vec![1]);

        // (5, tür 1) yuvası bin 2'de
        move_bin(&mut state, 1, 2, 5).unwrap();
        assert_eq!(state.bins_at_tick(5), vec![2]);
        assert!(!state.bin_map.is_active(2));
        assert!(state.occupancy_consistent());

        assert!(move_bin(&mut state, 9, 0, 1).unwrap_err().requires_resync());
    }

    #[test]
    fn test_out_of_range_ticks_are_rejected() {
        let mut state = empty();
        add_liquidity(&mut state, &[delta(1, 0, 0, 1, 0, true)]).unwrap();
        let prior = state.clone();

        let far = PoolEvent::AddLiquidity(vec![delta(2, 0, 1_000_000_000, 1, 0, true)]);
        let err = apply_event(&prior, &far, (18, 18)).unwrap_err();
        assert!(matches!(err, PoolError::LogDecode(_)));
        assert!(!err.requires_resync());

        let moved = PoolEvent::BinMoved(IBinPool::BinMoved {
            binId: 1,
            previousTick: 0,
            newTick: -460_541,
        });
        assert!(matches!(apply_event(&prior, &moved, (18, 18)), Err(PoolError::LogDecode(_))));

        let edge = PoolEvent::AddLiquidity(vec![delta(3, 0, -460_540, 1, 0, true)]);
        let next = apply_event(&prior, &edge, (18, 18)).unwrap();
        assert_eq!(next.bins_at_tick(-460_540), vec![3]);
        assert!(next.occupancy_consistent());
    }

    #[test]
    fn test_swap_event_replay() {
        let mut prior = empty();
        add_liquidity(&mut prior, &[delta(1, 0, 0, 0, 1_000_000_000_000_000_000, true)]).unwrap();
        let event = PoolEvent::Swap(IBinPool::Swap {
            sender: Address::ZERO,
            recipient: Address::ZERO,
            tokenAIn: true,
            exactOutput: false,
            amountIn: U256::from(100_000_000_000_000_000u64),
            amountOut: U256::ZERO,
            activeTick: 0,
        });
        let next = apply_event(&prior, &event, (18, 18)).unwrap();
        assert_eq!(next.bins[&1].reserve_a, U256::from(100_000_000_000_000_000u64));
        assert_eq!(next.bins[&1].reserve_b, ONE - U256::from(99_699_503_035_259_121u64));
        assert_eq!(prior.bins[&1].reserve_a, U256::ZERO);
    }

    #[test]
    fn test_protocol_fee_update() {
        let next = apply_event(
            &empty(),
            &PoolEvent::ProtocolFeeSet(IBinPool::ProtocolFeeSet { protocolFee: 250 }),
            (18, 18),
        )
        .unwrap();
        assert_eq!(next.protocol_fee_ratio, ONE / U256::from(4u8));
    }
}
