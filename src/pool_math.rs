// ============================================================================
//  POOL_MATH v1.0: Tick Geçişli Swap Motoru (18 ondalık, wei-hassas)
//
//  Her tick en fazla dört bin tutar. Bir tick'in likiditesi ve sqrt fiyatı,
//  canlı bin'lerinin toplam rezervlerinden ihtiyaç anında türetilir:
//
//      (A + L·pl) · (B + L/pu) = L²      pl, pu = tick kenarlarının sqrt fiyatı
//      sqrt_price = sqrt((A + L·pl) / (B + L/pu)), [pl, pu] aralığına kırpılır
//
//  A token girdisi fiyatı yukarı iter (sağa yürü), B token girdisi aşağı
//  iter (sola yürü). Girdiler yukarı, çıktılar aşağı yuvarlanır.
// ============================================================================

use alloy::primitives::U256;
use std::sync::Arc;
use tracing::trace;

use crate::bin_map::{LEFT_SENTINEL, RIGHT_SENTINEL};
use crate::error::{MathError, PoolError, PoolResult};
use crate::math::{
    self, div, div_ceil, from_scale, mul, mul_ceil, mul_div, mul_floor, tick_price, to_scale, ONE,
};
use crate::types::{BinId, PoolState, SwapMode, SwapResult};

/// Spekülatif (fiyatlama) bir swap'ın yapabileceği tick geçişi sayısı.
pub const MAX_SWAP_ITERATIONS: u32 = 250;

/// 2^60 altındaki rezervler, L çözülmeden önce bu kadar bit yukarı kaydırılır.
const PRECISION_BUMP: usize = 40;

#[inline]
fn add(a: U256, b: U256) -> Result<U256, MathError> {
    a.checked_add(b).ok_or(MathError::Overflow)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tick Likiditesi ve Fiyatı
// ─────────────────────────────────────────────────────────────────────────────

/// `tick`'in alt ve üst kenarlarının sqrt fiyatları.
pub fn tick_edges(tick_spacing: u32, tick: i32) -> Result<(U256, U256), MathError> {
    let upper_tick = tick.checked_add(1).ok_or(MathError::TickOutOfRange(i64::from(tick) + 1))?;
    Ok((tick_price(tick_spacing, tick)?, tick_price(tick_spacing, upper_tick)?))
}

/// `(A + L·pl)(B + L/pu) = L²` denklemini çözen L likiditesi.
///
/// Tek taraflı rezervler doğrusal forma iner: `L = (A/pu + B·pl) · pu / (pu - pl)`.
pub fn tick_liquidity(
    reserve_a: U256,
    reserve_b: U256,
    sqrt_lower: U256,
    sqrt_upper: U256,
) -> Result<U256, MathError> {
    let bump = if (reserve_a >> 60usize).is_zero() && (reserve_b >> 60usize).is_zero() {
        PRECISION_BUMP
    } else {
        0
    };
    let a = reserve_a << bump;
    let b = reserve_b << bump;

    let width = sqrt_upper.saturating_sub(sqrt_lower);
    if width.is_zero() {
        return Err(MathError::DivisionByZero);
    }

    let linear = add(div(a, sqrt_upper)?, mul(b, sqrt_lower)?)?;
    let liquidity = if a.is_zero() || b.is_zero() {
        mul_div(linear, sqrt_upper, width, false)?
    } else {
        let half = linear >> 1usize;
        let discriminant = add(
            mul(half, half)?,
            mul_div(mul(a, b)?, width, sqrt_upper, false)?,
        )?;
        mul_div(add(half, math::sqrt(discriminant)?)?, sqrt_upper, width, false)?
    };
    Ok(liquidity >> bump)
}

/// Bir tick'in güncel sqrt fiyatı; boş taraf fiyatı ilgili kenara sabitler.
pub fn tick_sqrt_price(
    reserve_a: U256,
    reserve_b: U256,
    sqrt_lower: U256,
    sqrt_upper: U256,
    liquidity: U256,
) -> Result<U256, MathError> {
    if reserve_a.is_zero() {
        return Ok(sqrt_lower);
    }
    if reserve_b.is_zero() {
        return Ok(sqrt_upper);
    }
    let virtual_a = add(reserve_a, mul(liquidity, sqrt_lower)?)?;
    let virtual_b = add(reserve_b, div(liquidity, sqrt_upper)?)?;
    let price = math::sqrt(div(virtual_a, virtual_b)?)?;
    Ok(price.clamp(sqrt_lower, sqrt_upper))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tek Tick İçinde Kapalı Form Hareketler
// ─────────────────────────────────────────────────────────────────────────────

/// Fiyatı `from`'dan `to`'ya taşıyan girdi (yukarı yuvarlanır).
fn input_between(from: U256, to: U256, liquidity: U256, token_a_in: bool) -> Result<U256, MathError> {
    if from == to {
        return Ok(U256::ZERO);
    }
    if token_a_in {
        // ΔA = L · Δp
        mul_ceil(liquidity, to - from)
    } else {
        // ΔB = L · Δ(1/p) = L · (from - to) / (from · to)
        mul_div(liquidity, from - to, mul_floor(from, to)?, true)
    }
}

/// Fiyat `from`'dan `to`'ya giderken serbest kalan çıktı (aşağı yuvarlanır).
fn output_between(from: U256, to: U256, liquidity: U256, token_a_in: bool) -> Result<U256, MathError> {
    if from == to {
        return Ok(U256::ZERO);
    }
    if token_a_in {
        // ΔB = L · (to - from) / (from · to)
        mul_div(liquidity, to - from, mul_ceil(from, to)?, false)
    } else {
        // ΔA = L · (from - to)
        mul_floor(liquidity, from - to)
    }
}

/// `bin_in` tick'e girdikten sonra ulaşılan fiyat, trader aleyhine yuvarlanır.
fn price_after_input(price: U256, bin_in: U256, liquidity: U256, token_a_in: bool) -> Result<U256, MathError> {
    if token_a_in {
        add(price, div_ceil(bin_in, liquidity)?)
    } else {
        let denominator = add(liquidity, mul_floor(bin_in, price)?)?;
        mul_div(liquidity, price, denominator, true)
    }
}

/// Tam olarak `amount_out` tick'ten çıktığındaki fiyat, trader aleyhine
/// yuvarlanır. Sanal rezerv bunu karşılayamıyorsa `None`.
fn price_after_output(
    price: U256,
    amount_out: U256,
    liquidity: U256,
    token_a_in: bool,
) -> Result<Option<U256>, MathError> {
    if token_a_in {
        let virtual_b = div(liquidity, price)?;
        if amount_out >= virtual_b {
            return Ok(None);
        }
        div_ceil(liquidity, virtual_b - amount_out).map(Some)
    } else {
        let virtual_a = mul(liquidity, price)?;
        if amount_out >= virtual_a {
            return Ok(None);
        }
        div(virtual_a - amount_out, liquidity).map(Some)
    }
}

/// Tek tick içindeki işlemin sonucu.
#[derive(Debug, Clone, Copy, Default)]
struct TickStep {
    /// Brüt girdi, ücret dahil
    amount_in: U256,
    fee_basis: U256,
    amount_out: U256,
    /// Hareket `target` üzerinde bitti
    reached_target: bool,
}

struct TickQuote {
    price: U256,
    liquidity: U256,
    reserve_out: U256,
    /// Hareket yönündeki tick kenarı veya fiyat limiti
    target: U256,
    /// `target` tick kenarıdır (tick'i boşaltmak mümkün)
    target_is_edge: bool,
}

fn compute_step(
    tick: &TickQuote,
    remaining: U256,
    fee: U256,
    token_a_in: bool,
    exact_output: bool,
) -> Result<TickStep, MathError> {
    let net_ratio = ONE.checked_sub(fee).ok_or(MathError::Overflow)?;
    let full_in = input_between(tick.price, tick.target, tick.liquidity, token_a_in)?;
    let full_out = if full_in.is_zero() {
        U256::ZERO
    } else if tick.target_is_edge {
        tick.reserve_out
    } else {
        output_between(tick.price, tick.target, tick.liquidity, token_a_in)?.min(tick.reserve_out)
    };

    if exact_output {
        let (bin_in, amount_out, reached_target) = if remaining >= full_out {
            (full_in, full_out, true)
        } else {
            match price_after_output(tick.price, remaining, tick.liquidity, token_a_in)? {
                Some(next) => {
                    let next = if token_a_in { next.min(tick.target) } else { next.max(tick.target) };
                    let bin_in = input_between(tick.price, next, tick.liquidity, token_a_in)?;
                    (bin_in.min(full_in), remaining, false)
                }
                None => (full_in, full_out, true),
            }
        };
        let amount_in = div_ceil(bin_in, net_ratio)?;
        return Ok(TickStep {
            amount_in,
            fee_basis: amount_in - bin_in,
            amount_out,
            reached_target,
        });
    }

    let gross_full = div_ceil(full_in, net_ratio)?;
    if remaining >= gross_full {
        return Ok(TickStep {
            amount_in: gross_full,
            fee_basis: gross_full - full_in,
            amount_out: full_out,
            reached_target: true,
        });
    }

    let fee_basis = mul_ceil(remaining, fee)?;
    let bin_in = remaining.saturating_sub(fee_basis);
    let next = price_after_input(tick.price, bin_in, tick.liquidity, token_a_in)?;
    let next = if token_a_in { next.min(tick.target) } else { next.max(tick.target) };
    let amount_out = output_between(tick.price, next, tick.liquidity, token_a_in)?.min(tick.reserve_out);
    Ok(TickStep {
        amount_in: remaining,
        fee_basis,
        amount_out,
        reached_target: false,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Bin Dağılımı
// ─────────────────────────────────────────────────────────────────────────────

/// Tick deltalarını canlı bin'lere, çıktı tarafı rezervine göre ağırlıklı dağıt.
///
/// Toplamlar birebirdir: çıktı artıkları yeri kalan bin'lere, girdi
/// artıkları en ağır bin'e gider.
fn apply_tick_delta(
    state: &mut PoolState,
    tick: i32,
    token_a_in: bool,
    delta_in: U256,
    delta_out: U256,
) -> PoolResult<()> {
    let ids: Vec<BinId> = state.bins_at_tick(tick);
    let weights: Vec<U256> = ids
        .iter()
        .map(|id| {
            state
                .bins
                .get(id)
                .map(|bin| if token_a_in { bin.reserve_b } else { bin.reserve_a })
                .unwrap_or_default()
        })
        .collect();
    let total = weights.iter().try_fold(U256::ZERO, |acc, w| add(acc, *w))?;
    if total.is_zero() {
        return Err(PoolError::MathInvariantViolation(format!(
            "tick {} has no output reserve to trade against",
            tick
        )));
    }

    let mut outs = Vec::with_capacity(ids.len());
    let mut ins = Vec::with_capacity(ids.len());
    for weight in &weights {
        outs.push(mul_div(delta_out, *weight, total, false)?);
        ins.push(mul_div(delta_in, *weight, total, false)?);
    }

    let mut left_out = delta_out - outs.iter().fold(U256::ZERO, |acc, v| acc + *v);
    for (out, weight) in outs.iter_mut().zip(&weights) {
        let take = (*weight - *out).min(left_out);
        *out += take;
        left_out -= take;
    }
    if !left_out.is_zero() {
        return Err(PoolError::MathInvariantViolation(format!(
            "tick {} cannot cover an output of {}",
            tick, delta_out
        )));
    }

    let left_in = delta_in - ins.iter().fold(U256::ZERO, |acc, v| acc + *v);
    let heaviest = weights
        .iter()
        .enumerate()
        .max_by_key(|(_, w)| **w)
        .map(|(i, _)| i)
        .unwrap_or(0);
    ins[heaviest] += left_in;

    for ((id, bin_in), bin_out) in ids.iter().zip(ins).zip(outs) {
        if let Some(bin) = state.bins.get_mut(id) {
            if token_a_in {
                bin.reserve_a = add(bin.reserve_a, bin_in)?;
                bin.reserve_b = bin.reserve_b.saturating_sub(bin_out);
            } else {
                bin.reserve_b = add(bin.reserve_b, bin_in)?;
                bin.reserve_a = bin.reserve_a.saturating_sub(bin_out);
            }
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Swap
// ─────────────────────────────────────────────────────────────────────────────

/// `amount`'u (18 ondalık) bir anlık görüntüye karşı swap et.
///
/// `exact_output == false`: `amount` brüt girdidir; aksi halde istenen
/// çıktıdır ve açık `SwapResult::unfilled`'a yazılır.
/// `sqrt_price_limit` fiyat ona ulaşınca yürüyüşü durdurur. Girdi
/// görüntüsüne asla dokunulmaz; hiçbir şey değiştirmeyen swap aynı `Arc`'ı döndürür.
pub fn swap(
    state: &Arc<PoolState>,
    amount: U256,
    token_a_in: bool,
    exact_output: bool,
    mode: SwapMode,
    sqrt_price_limit: Option<U256>,
) -> PoolResult<SwapResult> {
    if amount.is_zero() {
        return Ok(SwapResult::untouched(Arc::clone(state)));
    }

    let sentinel = if token_a_in { RIGHT_SENTINEL } else { LEFT_SENTINEL };
    let mut tick = state.active_tick;
    if !state.bin_map.is_active(tick) {
        tick = state.bin_map.next_active(tick, token_a_in);
    }

    let mut next: Option<PoolState> = None;
    let mut remaining = amount;
    let mut result = SwapResult::untouched(Arc::clone(state));

    while tick != sentinel && !remaining.is_zero() {
        let (reserve_a, reserve_b) = next.as_ref().unwrap_or(&**state).reserves_at_tick(tick);
        let reserve_out = if token_a_in { reserve_b } else { reserve_a };

        let priced = if reserve_out.is_zero() {
            None
        } else {
            let (sqrt_lower, sqrt_upper) = tick_edges(state.tick_spacing, tick)?;
            let liquidity = tick_liquidity(reserve_a, reserve_b, sqrt_lower, sqrt_upper)?;
            if liquidity.is_zero() {
                trace!(tick, "dust reserves, tick skipped");
                None
            } else {
                Some((sqrt_lower, sqrt_upper, liquidity))
            }
        };

        let mut drained = false;
        if let Some((sqrt_lower, sqrt_upper, liquidity)) = priced {
            let price = tick_sqrt_price(reserve_a, reserve_b, sqrt_lower, sqrt_upper, liquidity)?;

            let edge = if token_a_in { sqrt_upper } else { sqrt_lower };
            let target = match sqrt_price_limit {
                Some(limit) if token_a_in && limit < edge => limit.max(price),
                Some(limit) if !token_a_in && limit > edge => limit.min(price),
                _ => edge,
            };
            let tick_quote = TickQuote {
                price,
                liquidity,
                reserve_out,
                target,
                target_is_edge: target == edge,
            };

            let step = compute_step(&tick_quote, remaining, state.fee, token_a_in, exact_output)?;
            if !step.amount_in.is_zero() || !step.amount_out.is_zero() {
                let protocol_fee = mul_floor(step.fee_basis, state.protocol_fee_ratio)?;
                let to_bins = step.amount_in.saturating_sub(protocol_fee);

                trace!(tick, amount_in = %step.amount_in, amount_out = %step.amount_out, protocol_fee = %protocol_fee, "tick step");
                let working = next.get_or_insert_with(|| (**state).clone());
                apply_tick_delta(working, tick, token_a_in, to_bins, step.amount_out)?;
                working.active_tick = tick;

                result.amount_in = add(result.amount_in, step.amount_in)?;
                result.amount_out = add(result.amount_out, step.amount_out)?;
                result.protocol_fee = add(result.protocol_fee, protocol_fee)?;
                remaining = if exact_output {
                    remaining.saturating_sub(step.amount_out)
                } else {
                    remaining.saturating_sub(step.amount_in)
                };
            }

            // tick içinde veya fiyat limitinde durdu
            if !step.reached_target || !tick_quote.target_is_edge {
                break;
            }
            drained = true;
        }

        // swap'lar doluluğu değiştirmez; girdi görüntüsünün haritası günceldir
        let following = state.bin_map.next_active(tick, token_a_in);
        if drained && following != sentinel {
            if let Some(working) = next.as_mut() {
                working.active_tick = following;
            }
        }
        if remaining.is_zero() || following == sentinel {
            break;
        }
        result.ticks_crossed += 1;
        if mode == SwapMode::Pricing && result.ticks_crossed > MAX_SWAP_ITERATIONS {
            return Err(PoolError::IterationLimitExceeded {
                limit: MAX_SWAP_ITERATIONS,
            });
        }
        tick = following;
    }

    if exact_output {
        result.unfilled = remaining;
    }
    if let Some(state) = next {
        result.state = Arc::new(state);
    }
    Ok(result)
}

// ─────────────────────────────────────────────────────────────────────────────
// Kotasyon (sınırda token ondalıkları)
// ─────────────────────────────────────────────────────────────────────────────

/// Bir swap'ı token birimlerinde fiyatla: `(amount_other, ticks_crossed)` döndürür.
///
/// `speculative` iterasyon sınırını uygular; sınıra takılmak veya havuzun
/// tamamen dolduramadığı tam çıktı isteği `(0, 0)` olarak bildirilir.
pub fn quote(
    state: &Arc<PoolState>,
    amount: U256,
    token_a_in: bool,
    exact_output: bool,
    speculative: bool,
    decimals_a: u8,
    decimals_b: u8,
) -> PoolResult<(U256, u32)> {
    let (decimals_in, decimals_out) = if token_a_in {
        (decimals_a, decimals_b)
    } else {
        (decimals_b, decimals_a)
    };
    let scaled = if exact_output {
        to_scale(amount, decimals_out, true)?
    } else {
        to_scale(amount, decimals_in, false)?
    };
    let mode = if speculative { SwapMode::Pricing } else { SwapMode::OnChain };

    let result = match swap(state, scaled, token_a_in, exact_output, mode, None) {
        Ok(result) => result,
        Err(PoolError::IterationLimitExceeded { .. }) => return Ok((U256::ZERO, 0)),
        Err(e) => return Err(e),
    };
    if !result.unfilled.is_zero() {
        return Ok((U256::ZERO, 0));
    }

    let other = if exact_output {
        from_scale(result.amount_in, decimals_in, true)?
    } else {
        from_scale(result.amount_out, decimals_out, false)?
    };
    Ok((other, result.ticks_crossed))
}

// ─────────────────────────────────────────────────────────────────────────────
// Testler
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Bin;
    use proptest::prelude::*;

    const FEE_30_BPS: u64 = 3_000_000_000_000_000;

    fn e17(n: u64) -> U256 {
        U256::from(n) * U256::from(100_000_000_000_000_000u64)
    }

    fn pool(fee: u64, spacing: u32, bins: &[(BinId, u8, i32, U256, U256)]) -> Arc<PoolState> {
        let mut state = PoolState::new(U256::from(fee), spacing, U256::ZERO);
        for &(id, kind, tick, a, b) in bins {
            state.register_bin(id, Bin::new(kind, tick, a, b));
        }
        Arc::new(state)
    }

    #[test]
    fn test_liquidity_satisfies_invariant() {
        let (pl, pu) = tick_edges(1, 10).unwrap();
        let (a, b) = (e17(30), e17(20));
        let l = tick_liquidity(a, b, pl, pu).unwrap();
        // (A + L·pl)(B + L/pu) ≈ L²
        let lhs = mul(a + mul(l, pl).unwrap(), b + div(l, pu).unwrap()).unwrap();
        let rhs = mul(l, l).unwrap();
        let diff = if lhs > rhs { lhs - rhs } else { rhs - lhs };
        assert!(diff * U256::from(1_000_000_000u64) < rhs, "lhs={} rhs={}", lhs, rhs);
    }

    #[test]
    fn test_one_sided_price_sits_on_edge() {
        let (pl, pu) = tick_edges(1, 0).unwrap();
        let l = tick_liquidity(U256::ZERO, ONE, pl, pu).unwrap();
        assert_eq!(l, U256::from(20_001_499_987_500_662_572_187u128));
        assert_eq!(tick_sqrt_price(U256::ZERO, ONE, pl, pu, l).unwrap(), pl);
        assert_eq!(tick_sqrt_price(ONE, U256::ZERO, pl, pu, l).unwrap(), pu);
        assert_eq!(tick_liquidity(ONE, ONE, pu, pu), Err(MathError::DivisionByZero));
    }

    #[test]
    fn test_zero_amount_returns_same_snapshot() {
        let state = pool(FEE_30_BPS, 1, &[(1, 0, 0, U256::ZERO, ONE)]);
        let result = swap(&state, U256::ZERO, true, false, SwapMode::Pricing, None).unwrap();
        assert_eq!((result.amount_in, result.amount_out), (U256::ZERO, U256::ZERO));
        assert!(Arc::ptr_eq(&state, &result.state));
    }

    #[test]
    fn test_single_bin_exact_input() {
        let state = pool(FEE_30_BPS, 1, &[(1, 0, 0, U256::ZERO, ONE)]);
        let amount = e17(1);
        let result = swap(&state, amount, true, false, SwapMode::OnChain, None).unwrap();

        // spot fiyat 1.0'da ücretsiz tahmin 0.1 B
        assert!(result.amount_out < amount);
        assert_eq!(result.amount_out, U256::from(99_699_503_035_259_121u64));
        assert_eq!(result.amount_in, amount);
        assert_eq!(result.ticks_crossed, 0);

        let bin = &result.state.bins[&1];
        assert_eq!(bin.reserve_a, amount, "fee-inclusive input lands in the bin");
        assert_eq!(bin.reserve_b, ONE - result.amount_out);
        // orijinal görüntüye dokunulmadı
        assert_eq!(state.bins[&1].reserve_a, U256::ZERO);
    }

    #[test]
    fn test_token_b_in_walks_left() {
        let state = pool(FEE_30_BPS, 1, &[(1, 0, 0, ONE, U256::ZERO)]);
        let result = swap(&state, e17(1), false, false, SwapMode::OnChain, None).unwrap();
        assert!(result.amount_out > U256::ZERO && result.amount_out < e17(1));
        let bin = &result.state.bins[&1];
        assert_eq!(bin.reserve_b, e17(1));
        assert_eq!(bin.reserve_a, ONE - result.amount_out);
    }

    #[test]
    fn test_protocol_fee_is_skimmed() {
        let mut state = PoolState::new(U256::from(FEE_30_BPS), 1, ONE / U256::from(2u8));
        state.register_bin(1, Bin::new(0, 0, U256::ZERO, ONE));
        let state = Arc::new(state);
        let result = swap(&state, e17(1), true, false, SwapMode::OnChain, None).unwrap();
        // fee_basis = 0.1 · %0.3 = 3e14, yarısı protokole
        assert_eq!(result.protocol_fee, U256::from(150_000_000_000_000u64));
        assert_eq!(result.state.bins[&1].reserve_a, e17(1) - result.protocol_fee);
    }

    #[test]
    fn test_exact_output_crosses_and_carries_excess() {
        let state = pool(
            FEE_30_BPS,
            1,
            &[(1, 0, 0, U256::ZERO, ONE), (2, 0, 1, U256::ZERO, ONE)],
        );

        let result = swap(&state, e17(15), true, true, SwapMode::OnChain, None).unwrap();
        assert_eq!(result.amount_out, e17(15));
        assert_eq!(result.unfilled, U256::ZERO);
        assert_eq!(result.ticks_crossed, 1);
        assert_eq!(result.state.bins[&1].reserve_b, U256::ZERO);
        assert_eq!(result.state.bins[&2].reserve_b, e17(5));
        assert_eq!(result.state.active_tick, 1);
        assert_eq!(
            result.amount_in,
            U256::from(1_003_059_176_278_899_194u64) + U256::from(501_567_202_231_689_447u64)
        );

        let drained = swap(&state, e17(30), true, true, SwapMode::OnChain, None).unwrap();
        assert_eq!(drained.amount_out, e17(20));
        assert_eq!(drained.unfilled, e17(10));
    }

    #[test]
    fn test_skips_empty_active_tick() {
        let mut state = PoolState::new(U256::from(FEE_30_BPS), 1, U256::ZERO);
        state.register_bin(1, Bin::new(0, 5, U256::ZERO, ONE));
        state.active_tick = -3;
        let state = Arc::new(state);
        let result = swap(&state, e17(1), true, false, SwapMode::Pricing, None).unwrap();
        assert!(result.amount_out > U256::ZERO);
        assert_eq!(result.ticks_crossed, 0);
        assert_eq!(result.state.active_tick, 5);

        let wrong_way = swap(&state, e17(1), false, false, SwapMode::Pricing, None).unwrap();
        assert_eq!(wrong_way.amount_out, U256::ZERO);
        assert!(Arc::ptr_eq(&state, &wrong_way.state));
    }

    #[test]
    fn test_dust_tick_is_skipped() {
        // uzak bir tick'teki 5 wei A sıfır likiditeye yuvarlanır
        let mut state = PoolState::new(U256::from(FEE_30_BPS), 1, U256::ZERO);
        state.register_bin(1, Bin::new(0, 0, ONE, U256::ZERO));
        state.register_bin(2, Bin::new(0, 400_000, U256::from(5u8), U256::ZERO));
        state.active_tick = 400_000;
        let state = Arc::new(state);
        let (pl, pu) = tick_edges(1, 400_000).unwrap();
        assert!(tick_liquidity(U256::from(5u8), U256::ZERO, pl, pu).unwrap().is_zero());

        let result = swap(&state, e17(1), false, false, SwapMode::Pricing, None).unwrap();
        assert_eq!(result.amount_out, U256::from(99_709_472_935_834_531u64));
        assert_eq!(result.ticks_crossed, 1);
        assert_eq!(result.state.active_tick, 0);
        assert_eq!(result.state.bins[&2].reserve_a, U256::from(5u8), "dust bin untouched");
        assert_eq!(result.state.bins[&1].reserve_b, e17(1));

        let quoted = quote(&state, e17(1), false, false, true, 18, 18).unwrap();
        assert_eq!(quoted, (U256::from(99_709_472_935_834_531u64), 1));
    }

    #[test]
    fn test_draining_a_tick_moves_active_tick() {
        let state = pool(
            FEE_30_BPS,
            1,
            &[(1, 0, 0, U256::ZERO, ONE), (2, 0, 3, U256::ZERO, ONE)],
        );
        // tam ilk tick'in rezervi: miktar kenarında tükenir
        let result = swap(&state, ONE, true, true, SwapMode::OnChain, None).unwrap();
        assert_eq!(result.amount_out, ONE);
        assert_eq!(result.unfilled, U256::ZERO);
        assert_eq!(result.ticks_crossed, 0);
        assert_eq!(result.state.bins[&1].reserve_b, U256::ZERO);
        assert_eq!(result.state.bins[&2].reserve_b, ONE);
        assert_eq!(result.state.active_tick, 3);
    }

    #[test]
    fn test_price_limit_stops_inside_tick() {
        let state = pool(FEE_30_BPS, 1, &[(1, 0, 0, U256::ZERO, ONE)]);
        let (pl, pu) = tick_edges(1, 0).unwrap();
        let limit = pl + (pu - pl) / U256::from(4u8);
        let result = swap(&state, ONE, true, false, SwapMode::OnChain, Some(limit)).unwrap();
        assert!(result.amount_in < ONE);
        assert!(result.amount_out > U256::ZERO);
        assert_eq!(result.ticks_crossed, 0);
        assert!(result.state.bins[&1].reserve_b > U256::ZERO);
    }

    #[test]
    fn test_bins_share_tick_deltas_by_weight() {
        let state = pool(
            FEE_30_BPS,
            1,
            &[(1, 0, 0, U256::ZERO, e17(3)), (2, 1, 0, U256::ZERO, e17(1))],
        );
        let result = swap(&state, e17(1), true, false, SwapMode::OnChain, None).unwrap();
        let (b1, b2) = (&result.state.bins[&1], &result.state.bins[&2]);

        assert_eq!(b1.reserve_a + b2.reserve_a, result.amount_in);
        assert_eq!(e17(4) - b1.reserve_b - b2.reserve_b, result.amount_out);
        let taken1 = e17(3) - b1.reserve_b;
        let taken2 = e17(1) - b2.reserve_b;
        let skew = if taken1 > taken2 * U256::from(3u8) {
            taken1 - taken2 * U256::from(3u8)
        } else {
            taken2 * U256::from(3u8) - taken1
        };
        assert!(skew <= U256::from(4u8), "taken1={} taken2={}", taken1, taken2);
    }

    #[test]
    fn test_pricing_mode_caps_iterations() {
        let count = MAX_SWAP_ITERATIONS as i32 + 2;
        let bins: Vec<_> = (0..count)
            .map(|i| (i as BinId + 1, 0u8, i, U256::ZERO, U256::from(1_000_000u64)))
            .collect();
        let state = pool(0, 1, &bins);

        let err = swap(&state, ONE, true, false, SwapMode::Pricing, None).unwrap_err();
        assert!(matches!(err, PoolError::IterationLimitExceeded { limit } if limit == MAX_SWAP_ITERATIONS));

        let onchain = swap(&state, ONE, true, false, SwapMode::OnChain, None).unwrap();
        assert_eq!(onchain.ticks_crossed, count as u32 - 1);
        assert_eq!(onchain.amount_out, U256::from(1_000_000u64) * U256::from(count as u64));

        assert_eq!(quote(&state, ONE, true, false, true, 18, 18).unwrap(), (U256::ZERO, 0));
    }

    #[test]
    fn test_quote_scales_token_decimals() {
        // A token: 6 ondalık, B token: 18 ondalık
        let state = pool(FEE_30_BPS, 1, &[(1, 0, 0, U256::ZERO, ONE)]);
        let (out, crossed) = quote(&state, U256::from(100_000u64), true, false, true, 6, 18).unwrap();
        assert_eq!(out, U256::from(99_699_503_035_259_121u64));
        assert_eq!(crossed, 0);

        let (needed, _) = quote(&state, out, true, true, true, 6, 18).unwrap();
        assert!(needed >= U256::from(99_999u64) && needed <= U256::from(100_001u64), "needed={}", needed);

        // havuzun tuttuğundan fazla
        assert_eq!(quote(&state, ONE * U256::from(2u8), true, true, true, 6, 18).unwrap(), (U256::ZERO, 0));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        #[test]
        fn stress_exact_in_then_exact_out(
            reserve_a in 1_000_000_000_000_000u128..1_000_000_000_000_000_000_000_000,
            reserve_b in 1_000_000_000_000_000u128..1_000_000_000_000_000_000_000_000,
            tick in -2_000i32..2_000,
            fee_index in 0usize..4,
            per_mille in 1u64..500,
            token_a_in in any::<bool>(),
        ) {
            let fee = [0u64, 100_000_000_000_000, FEE_30_BPS, 10_000_000_000_000_000][fee_index];
            let state = pool(fee, 1, &[(1, 0, tick, U256::from(reserve_a), U256::from(reserve_b))]);
            let mut state_at_tick = (*state).clone();
            state_at_tick.active_tick = tick;
            let state = Arc::new(state_at_tick);

            let (pl, pu) = tick_edges(1, tick).unwrap();
            let (a, b) = (U256::from(reserve_a), U256::from(reserve_b));
            let l = tick_liquidity(a, b, pl, pu).unwrap();
            let p = tick_sqrt_price(a, b, pl, pu, l).unwrap();
            let edge = if token_a_in { pu } else { pl };
            let capacity = div_ceil(input_between(p, edge, l, token_a_in).unwrap(), ONE - U256::from(fee)).unwrap();
            let amount = capacity * U256::from(per_mille) / U256::from(1_000u64);
            prop_assume!(amount > U256::from(1_000u64));

            let forward = swap(&state, amount, token_a_in, false, SwapMode::OnChain, None).unwrap();
            prop_assume!(!forward.amount_out.is_zero());
            prop_assert_eq!(forward.ticks_crossed, 0);

            let back = swap(&state, forward.amount_out, token_a_in, true, SwapMode::OnChain, None).unwrap();
            prop_assert_eq!(back.unfilled, U256::ZERO);
            let diff = if back.amount_in > amount { back.amount_in - amount } else { amount - back.amount_in };
            let tolerance = amount / U256::from(1_000_000u64) + U256::from(1_000_000u64);
            prop_assert!(diff <= tolerance, "amount={} back={}", amount, back.amount_in);
        }
    }
}
