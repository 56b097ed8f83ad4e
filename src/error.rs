// ============================================================================
//  ERROR v1.0: Havuza Özgü Hata Sınıflandırması
//
//  Her hata tek bir havuzla sınırlıdır. Bir fiyatlama turu başarılı
//  havuzları toplar, kalanları atar; buradaki hiçbir hata süreç için
//  ölümcül değildir.
// ============================================================================

use alloy::primitives::Address;
use thiserror::Error;

/// Sabit noktalı aritmetik hataları.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MathError {
    #[error("Math error - division by zero")]
    DivisionByZero,
    #[error("Math error - overflow")]
    Overflow,
    #[error("Math error - tick {0} exceeds the maximum tick")]
    TickOutOfRange(i64),
}

/// Abone, olay işleyicileri ve swap motorunun ürettiği hatalar.
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    /// Log çözümlenemedi; yok sayılır, durum değişmez.
    #[error("log decode failed: {0}")]
    LogDecode(String),

    /// İstenen blokta veya öncesinde izlenen anlık görüntü yok.
    #[error("[{pool}] no state at or before block {block}")]
    StateUnavailable { pool: Address, block: u64 },

    /// Toplu zincir okuması başarısız (transport hatası veya revert eden çağrı).
    #[error("rpc read failed: {0}")]
    Rpc(String),

    /// Durum zincirden yeniden kurulurken zaman aşımı veya RPC hatası.
    #[error("[{pool}] regeneration failed at block {block}: {reason}")]
    Regeneration { pool: Address, block: u64, reason: String },

    /// Durum tutarsız (sıfır likiditeye bölme, birleşme döngüsü, ...).
    /// Abone bunu görünce yeniden senkronizasyonu zorlar.
    #[error("math invariant violated: {0}")]
    MathInvariantViolation(String),

    /// Spekülatif swap, fiyatlama bütçesinin izin verdiğinden fazla tick geçti.
    #[error("swap crossed more than {limit} ticks")]
    IterationLimitExceeded { limit: u32 },
}

impl From<MathError> for PoolError {
    fn from(e: MathError) -> Self {
        PoolError::MathInvariantViolation(e.to_string())
    }
}

impl PoolError {
    /// Bu hatadan sonra aynalanan duruma artık güvenilemez mi?
    pub fn requires_resync(&self) -> bool {
        matches!(self, PoolError::MathInvariantViolation(_))
    }
}

pub type PoolResult<T> = std::result::Result<T, PoolError>;
