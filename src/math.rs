// ============================================================================
//  MATH v1.0: 18 Ondalıklı Sabit Nokta Kütüphanesi (U256, wei-hassas)
//
//  Neden U256? Havuz kontratı 18 ondalıklı sabit noktayla 256-bit tam
//  sayılar üzerinde çalışır. f64'ün 52-bit mantissa'sı ilk tick'ten sonra
//  kayar; buradaki her temel işlem kontratın tam sayı aritmetiğini,
//  yuvarlama yönü dahil, birebir üretir.
//
//  İçerik:
//    - mul / div           : sabit çarpma (asimetrik yuvarlama) ve bölme
//    - mul_div             : açık yuvarlamalı tam 512-bit a*b/c
//    - sqrt / sqrt_int     : bit kaydırma tohumlu Newton, yedi iyileştirme
//    - tick_price          : Q128 sihirli tablosuyla tick → sqrt fiyat
//    - to_scale/from_scale : token ondalıkları ↔ dahili 18 ondalık ölçek
// ============================================================================

use alloy::primitives::{U256, U512};

use crate::error::MathError;

// ─────────────────────────────────────────────────────────────────────────────
// Sabitler
// ─────────────────────────────────────────────────────────────────────────────

/// 18 ondalıklı sabit noktada 1.0.
pub const ONE: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

/// `mul`'u hâlâ aşağı yuvarlayan en büyük kesilmiş kalan.
const HALF_ONE_MINUS_ONE: U256 = U256::from_limbs([499_999_999_999_999_999, 0, 0, 0]);

/// Fiyat tablosunun desteklediği en büyük |tick · tick_spacing|.
pub const MAX_TICK: i64 = 460_540;

/// Her rezerv ve fiyatın dahili ondalık sayısı.
pub const INTERNAL_DECIMALS: u8 = 18;

// ─────────────────────────────────────────────────────────────────────────────
// 512-bit Yardımcılar
// ─────────────────────────────────────────────────────────────────────────────

#[inline]
fn widen(x: U256) -> U512 {
    let l = x.as_limbs();
    U512::from_limbs([l[0], l[1], l[2], l[3], 0, 0, 0, 0])
}

#[inline]
fn narrow(x: U512) -> Result<U256, MathError> {
    let l = x.as_limbs();
    if l[4..].iter().any(|&limb| limb != 0) {
        return Err(MathError::Overflow);
    }
    Ok(U256::from_limbs([l[0], l[1], l[2], l[3]]))
}

/// 512-bit ara değerle a * b / payda.
/// `round_up` sıfır olmayan kalanı +∞'a yuvarlar, aksi halde taban.
pub fn mul_div(a: U256, b: U256, denominator: U256, round_up: bool) -> Result<U256, MathError> {
    if denominator.is_zero() {
        return Err(MathError::DivisionByZero);
    }
    let product: U512 = a.widening_mul(b);
    let denominator = widen(denominator);
    let quotient = product / denominator;
    let quotient = if round_up && !(product % denominator).is_zero() {
        quotient + U512::from(1u8)
    } else {
        quotient
    };
    narrow(quotient)
}

// ─────────────────────────────────────────────────────────────────────────────
// Sabit Nokta Çarpma / Bölme
// ─────────────────────────────────────────────────────────────────────────────

/// Sabit çarpma: floor(a·b / 1e18), kesilen kalan en az yarım birimse
/// bir fazlası. Asimetrik yarıyı yukarı yuvarlama kontratın davranışıdır;
/// saf floor veya ceil ile değiştirilmemeli.
pub fn mul(a: U256, b: U256) -> Result<U256, MathError> {
    let product: U512 = a.widening_mul(b);
    let one = widen(ONE);
    let remainder = product % one;
    let quotient = narrow(product / one)?;
    if remainder > widen(HALF_ONE_MINUS_ONE) {
        quotient.checked_add(U256::from(1u8)).ok_or(MathError::Overflow)
    } else {
        Ok(quotient)
    }
}

/// floor(a·b / 1e18)
#[inline]
pub fn mul_floor(a: U256, b: U256) -> Result<U256, MathError> {
    mul_div(a, b, ONE, false)
}

/// ceil(a·b / 1e18)
#[inline]
pub fn mul_ceil(a: U256, b: U256) -> Result<U256, MathError> {
    mul_div(a, b, ONE, true)
}

/// Sabit bölme: floor(a·1e18 / b).
#[inline]
pub fn div(a: U256, b: U256) -> Result<U256, MathError> {
    mul_div(a, ONE, b, false)
}

/// ceil(a·1e18 / b)
#[inline]
pub fn div_ceil(a: U256, b: U256) -> Result<U256, MathError> {
    mul_div(a, ONE, b, true)
}

/// a - b, sıfırda kırpılır.
#[inline]
pub fn clip(a: U256, b: U256) -> U256 {
    a.saturating_sub(b)
}

// ─────────────────────────────────────────────────────────────────────────────
// Karekök
// ─────────────────────────────────────────────────────────────────────────────

/// Tam sayı karekökü, taban.
///
/// Tohum, kökün iki katı içinde kalacak şekilde `x`'in bit kaydırmalarından
/// gelir; ardından tam yedi Newton iyileştirmesi yapılır ve sonuç
/// `min(r, x / r)` ile aşağı düzeltilir. İterasyon sayısı sabittir,
/// "yakınsayana kadar" değil.
pub fn sqrt_int(x: U256) -> U256 {
    if x.is_zero() {
        return U256::ZERO;
    }

    let mut x_aux = x;
    let mut result = U256::from(1u8);

    macro_rules! seed_step {
        ($threshold_bits:expr, $shift:expr, $result_shift:expr) => {
            if x_aux >= (U256::from(1u8) << ($threshold_bits as usize)) {
                x_aux >>= $shift as usize;
                result <<= $result_shift as usize;
            }
        };
    }

    seed_step!(128, 128, 64);
    seed_step!(64, 64, 32);
    seed_step!(32, 32, 16);
    seed_step!(16, 16, 8);
    seed_step!(8, 8, 4);
    seed_step!(4, 4, 2);
    if x_aux >= U256::from(8u8) {
        result <<= 1usize;
    }

    for _ in 0..7 {
        result = (result + x / result) >> 1usize;
    }

    let rounded_down = x / result;
    if result >= rounded_down {
        rounded_down
    } else {
        result
    }
}

/// Sabit nokta karekök: 18 ondalıkta sqrt(x) = sqrt_int(x · 1e18).
pub fn sqrt(x: U256) -> Result<U256, MathError> {
    let scaled = x.checked_mul(ONE).ok_or(MathError::Overflow)?;
    Ok(sqrt_int(scaled))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tick → Sqrt Fiyat
// ─────────────────────────────────────────────────────────────────────────────

/// `tick`'in (`tick_spacing` ile ölçeklenmiş) 18 ondalıklı sqrt fiyatı.
///
/// `ratio` Q128'de 1.0'dan başlar ve |tick|'in her biti için
/// 1/sqrt(1.0001)^(2^i)'nin Q128 değeriyle çarpılır; her çarpım Q128'e
/// geri kesilir (`>> 128`). Pozitif tick'lerde sonuç ters çevrilir. Tablo
/// ve sırası sabittir.
pub fn tick_price(tick_spacing: u32, tick: i32) -> Result<U256, MathError> {
    let scaled_tick = i64::from(tick) * i64::from(tick_spacing);
    if scaled_tick.abs() > MAX_TICK {
        return Err(MathError::TickOutOfRange(scaled_tick));
    }
    let abs_tick = scaled_tick.unsigned_abs();

    let mut ratio: U256 = if abs_tick & 0x1 != 0 {
        U256::from_be_slice(&hex_literal::hex!("fffcb933bd6fad37aa2d162d1a594001"))
    } else {
        U256::from(1u8) << 128usize
    };

    macro_rules! apply_tick_bit {
        ($bit:expr, $hex:literal) => {
            if abs_tick & $bit != 0 {
                ratio = (ratio * U256::from_be_slice(&hex_literal::hex!($hex))) >> 128usize;
            }
        };
    }

    apply_tick_bit!(0x2,     "fff97272373d413259a46990580e213a");
    apply_tick_bit!(0x4,     "fff2e50f5f656932ef12357cf3c7fdcc");
    apply_tick_bit!(0x8,     "ffe5caca7e10e4e61c3624eaa0941cd0");
    apply_tick_bit!(0x10,    "ffcb9843d60f6159c9db58835c926644");
    apply_tick_bit!(0x20,    "ff973b41fa98c081472e6896dfb254c0");
    apply_tick_bit!(0x40,    "ff2ea16466c96a3843ec78b326b52861");
    apply_tick_bit!(0x80,    "fe5dee046a99a2a811c461f1969c3053");
    apply_tick_bit!(0x100,   "fcbe86c7900a88aedcffc83b479aa3a4");
    apply_tick_bit!(0x200,   "f987a7253ac413176f2b074cf7815e54");
    apply_tick_bit!(0x400,   "f3392b0822b70005940c7a398e4b70f3");
    apply_tick_bit!(0x800,   "e7159475a2c29b7443b29c7fa6e889d9");
    apply_tick_bit!(0x1000,  "d097f3bdfd2022b8845ad8f792aa5825");
    apply_tick_bit!(0x2000,  "a9f746462d870fdf8a65dc1f90e061e5");
    apply_tick_bit!(0x4000,  "70d869a156d2a1b890bb3df62baf32f7");
    apply_tick_bit!(0x8000,  "31be135f97d08fd981231505542fcfa6");
    apply_tick_bit!(0x10000, "09aa508b5b7a84e1c677de54f3e99bc9");
    apply_tick_bit!(0x20000, "005d6af8dedb81196699c329225ee604");
    apply_tick_bit!(0x40000, "00002216e584f5fa1ea926041bedfe98");
    apply_tick_bit!(0x80000, "048a170391f7dc42444e8fa2");

    if scaled_tick > 0 {
        ratio = U256::MAX / ratio;
    }

    let price = ratio.checked_mul(ONE).ok_or(MathError::Overflow)?;
    Ok(price >> 128usize)
}

/// Zincirin bildirdiği tick'i daralt; `±MAX_TICK` ötesini reddet.
pub fn checked_tick(tick: i128) -> Result<i32, MathError> {
    if tick.unsigned_abs() > MAX_TICK.unsigned_abs() as u128 {
        let clamped = i64::try_from(tick).unwrap_or(if tick < 0 { i64::MIN } else { i64::MAX });
        return Err(MathError::TickOutOfRange(clamped));
    }
    Ok(tick as i32)
}

// ─────────────────────────────────────────────────────────────────────────────
// Token Ondalıkları ↔ Dahili Ölçek
// ─────────────────────────────────────────────────────────────────────────────

#[inline]
fn pow10(exp: u8) -> U256 {
    U256::from(10u8).pow(U256::from(exp))
}

/// Token miktarı → 18 ondalıklı dahili miktar.
pub fn to_scale(amount: U256, decimals: u8, ceil: bool) -> Result<U256, MathError> {
    match decimals.cmp(&INTERNAL_DECIMALS) {
        std::cmp::Ordering::Equal => Ok(amount),
        std::cmp::Ordering::Less => amount
            .checked_mul(pow10(INTERNAL_DECIMALS - decimals))
            .ok_or(MathError::Overflow),
        std::cmp::Ordering::Greater => {
            mul_div(amount, U256::from(1u8), pow10(decimals - INTERNAL_DECIMALS), ceil)
        }
    }
}

/// 18 ondalıklı dahili miktar → token miktarı.
pub fn from_scale(amount: U256, decimals: u8, ceil: bool) -> Result<U256, MathError> {
    match decimals.cmp(&INTERNAL_DECIMALS) {
        std::cmp::Ordering::Equal => Ok(amount),
        std::cmp::Ordering::Less => {
            mul_div(amount, U256::from(1u8), pow10(INTERNAL_DECIMALS - decimals), ceil)
        }
        std::cmp::Ordering::Greater => amount
            .checked_mul(pow10(decimals - INTERNAL_DECIMALS))
            .ok_or(MathError::Overflow),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Testler
// ─────────────────────────────────────────────────────────────────────────────
