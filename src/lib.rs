// ============================================================================
//  BIN POOL MIRROR v1.0: Off-Chain Bin Havuzu Durumu + Wei-Hassas Fiyatlama
//
//  Modüller (yapraktan köke):
//    math        : 18 ondalık sabit nokta, sqrt, tick → sqrt fiyat
//    bin_map     : seyrek (tick, tür) doluluk bitmap'i
//    types       : PoolState, Bin, RawLog, SwapResult, yapılandırma
//    pool_math   : tick geçişli swap motoru
//    state_sync  : olay ABI'si, log çözümleme, Multicall3 ile yenileme
//    handlers    : havuz olayları → sonraki anlık görüntü
//    subscriber  : olay kaynaklı konteyner, durum deposu, fiyatlama turu
// ============================================================================

pub mod bin_map;
pub mod error;
pub mod handlers;
pub mod math;
pub mod pool_math;
pub mod state_sync;
pub mod subscriber;
pub mod types;

pub use error::{MathError, PoolError, PoolResult};
pub use subscriber::{BinPoolLogic, BinPoolSubscriber, EventSubscriber, PoolLogic, Quote, StateStore};
pub use types::{Bin, MirrorConfig, PoolConfig, PoolState, RawLog, SwapMode, SwapResult};
