//! パイプ転送のエラー

use crate::channel::ChannelId;
use std::fmt;

/// チャネルの方向（ホストから見た向き）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// 子プロセス → ホスト
    Inbound,
    /// ホスト → 子プロセス
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

/// パイプ転送のエラー
#[derive(Debug, thiserror::Error)]
pub enum PipeError {
    /// 既に閉じた方向を再び使おうとした
    #[error("{direction} direction of channel {channel} is already closed")]
    HalfClosed {
        channel: ChannelId,
        direction: Direction,
    },

    /// would-block・EOF以外のI/Oエラー（そのチャネルだけが使えなくなる）
    #[error("I/O error on channel {channel}: {source}")]
    Io {
        channel: ChannelId,
        #[source]
        source: std::io::Error,
    },

    /// 以前のI/Oエラーで使えなくなったチャネル
    #[error("channel {0} failed earlier and is no longer usable")]
    Failed(ChannelId),

    #[error("unknown channel {0}")]
    UnknownChannel(ChannelId),

    #[error("failed to create channel: {0}")]
    Create(#[source] nix::Error),

    #[error("poll failed: {0}")]
    Poll(#[source] nix::Error),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: nix::Error,
    },

    #[error("failed to signal process {pid}: {source}")]
    Signal {
        pid: i32,
        #[source]
        source: nix::Error,
    },

    #[error("failed to wait for process {pid}: {source}")]
    Wait {
        pid: i32,
        #[source]
        source: nix::Error,
    },

    #[error("invalid spawn argument: {0}")]
    InvalidArgument(String),
}

impl PipeError {
    /// 呼び出し側のプログラミング誤りによるエラーかどうか
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, PipeError::HalfClosed { .. } | PipeError::UnknownChannel(_))
    }
}
