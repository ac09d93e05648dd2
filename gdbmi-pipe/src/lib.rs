//! gdbmi パイプ転送と子プロセス制御
//!
//! このクレートは、子プロセスとの間で複数の記述子を多重化してバイト列を運ぶ機能を提供します。
//! pollによる準備完了通知、チャネルごとの送受信バッファ、記述子を付け替えたfork/execなどを行います。

pub mod channel;
pub mod errors;
pub mod manager;
pub mod process;

pub use channel::{Channel, ChannelId, ChannelMode};
pub use errors::{Direction, PipeError};
pub use manager::{PipeManager, TickReport};
pub use process::{ChildProcess, ExitStatus};

/// パイプ転送の結果型
pub type Result<T> = std::result::Result<T, PipeError>;
