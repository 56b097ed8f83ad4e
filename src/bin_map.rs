// ============================================================================
//  BIN_MAP v1.0: Seyrek (tick, tür) Doluluk Bitmap'i
//
//  v1.0 Yenilikler:
//  ✓ index = tick · 4 + tür, 256-bit kelimelerde (anahtar: index >> 8)
//  ✓ Yalnızca sıfır olmayan kelimeler tutulur; en yakın dolu tick
//    taraması sadece dolu kelimeleri ziyaret eder
//
//  Negatif tick'ler: i32 üzerinde `>>` aritmetiktir, yani 256'ya taban
//  bölmesi; ikinin tümleyenindeki index üzerinde `& 255` doğru biti verir.
// ============================================================================

use alloy::primitives::U256;
use std::collections::BTreeMap;

use crate::math::MAX_TICK;

/// Bir tick'te bir bin'in alabileceği likidite şekli (tür) sayısı.
pub const NUMBER_OF_KINDS: i32 = 4;

/// Sağa tarama hiçbir şey bulamazsa dönen tick.
pub const RIGHT_SENTINEL: i32 = MAX_TICK as i32 + 1;
/// Sola tarama hiçbir şey bulamazsa dönen tick.
pub const LEFT_SENTINEL: i32 = -(MAX_TICK as i32) - 1;

const WORD_BITS: i32 = 256;

/// Kodlanmış (tick, tür) index'inin kelime anahtarı ve bit konumu.
#[inline]
fn map_pointer(index: i32) -> (i32, usize) {
    (index >> 8, (index & (WORD_BITS - 1)) as usize)
}

#[inline]
fn encode(tick: i32, kind: u8) -> i32 {
    tick * NUMBER_OF_KINDS + i32::from(kind)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BinMap {
    /// kelime anahtarı → 256-bit doluluk kelimesi (asla sıfır değil)
    words: BTreeMap<i32, U256>,
}

impl BinMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Boş olmayan kelime sayısı.
    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// `tick` üzerinde `kind` türünü dolu işaretle.
    pub fn put_type_at_tick(&mut self, kind: u8, tick: i32) {
        let (word, bit) = map_pointer(encode(tick, kind));
        let entry = self.words.entry(word).or_insert(U256::ZERO);
        entry.set_bit(bit, true);
    }

    /// `tick` üzerindeki `kind` bitini temizle; sıfırlanan kelime silinir.
    pub fn remove_type_at_tick(&mut self, kind: u8, tick: i32) {
        let (word, bit) = map_pointer(encode(tick, kind));
        if let Some(entry) = self.words.get_mut(&word) {
            entry.set_bit(bit, false);
            if entry.is_zero() {
                self.words.remove(&word);
            }
        }
    }

    /// `tick`'in 4-bit doluluk maskesi (k biti set ⇔ k türü dolu).
    pub fn kinds_at_tick(&self, tick: i32) -> u8 {
        let (word, bit) = map_pointer(encode(tick, 0));
        match self.words.get(&word) {
            Some(w) => ((*w >> bit).as_limbs()[0] & 0xF) as u8,
            None => 0,
        }
    }

    pub fn is_active(&self, tick: i32) -> bool {
        self.kinds_at_tick(tick) != 0
    }

    /// `tick`'in kesinlikle ötesinde, herhangi bir türü dolu en yakın tick.
    ///
    /// `right == true` en düşük anlamlı set bit ile yüksek tick'lere doğru,
    /// aksi halde en yüksek anlamlı bit ile düşük tick'lere doğru tarar.
    /// Yalnızca dolu kelimeler ziyaret edilir. `±MAX_TICK` içinde bir şey
    /// bulunamazsa `RIGHT_SENTINEL` / `LEFT_SENTINEL` döner.
    pub fn next_active(&self, tick: i32, right: bool) -> i32 {
        let tick = tick.clamp(LEFT_SENTINEL, RIGHT_SENTINEL);
        let found = if right {
            self.scan_right(tick)
        } else {
            self.scan_left(tick)
        };
        match found {
            Some(t) if (t as i64).abs() <= MAX_TICK => t,
            _ if right => RIGHT_SENTINEL,
            _ => LEFT_SENTINEL,
        }
    }

    fn scan_right(&self, tick: i32) -> Option<i32> {
        let start = encode(tick + 1, 0);
        let (start_word, offset) = map_pointer(start);

        if let Some(w) = self.words.get(&start_word) {
            let masked = *w & (U256::MAX << offset);
            if !masked.is_zero() {
                return Some(Self::tick_of(start_word, masked.trailing_zeros()));
            }
        }
        self.words
            .range(start_word + 1..)
            .next()
            .map(|(&word, w)| Self::tick_of(word, w.trailing_zeros()))
    }

    fn scan_left(&self, tick: i32) -> Option<i32> {
        let end = encode(tick, 0) - 1;
        let (end_word, offset) = map_pointer(end);

        if let Some(w) = self.words.get(&end_word) {
            let masked = if offset == 255 {
                *w
            } else {
                *w & ((U256::from(1u8) << (offset + 1)) - U256::from(1u8))
            };
            if !masked.is_zero() {
                return Some(Self::tick_of(end_word, 255 - masked.leading_zeros()));
            }
        }
        self.words
            .range(..end_word)
            .next_back()
            .map(|(&word, w)| Self::tick_of(word, 255 - w.leading_zeros()))
    }

    #[inline]
    fn tick_of(word: i32, bit: usize) -> i32 {
        (word * WORD_BITS + bit as i32) >> 2
    }

    /// Artan index sırasıyla tüm dolu (tick, tür) çiftleri.
    pub fn occupied(&self) -> Vec<(i32, u8)> {
        let mut out = Vec::new();
        for (&word, w) in &self.words {
            for bit in 0..WORD_BITS as usize {
                if w.bit(bit) {
                    let index = word * WORD_BITS + bit as i32;
                    out.push((index >> 2, (index & 3) as u8));
                }
            }
        }
        out
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Testler
// ─────────────────────────────────────────────────────────────────────────────
