//! セッションのエラー

use crate::session::SessionState;
use gdbmi_pipe::PipeError;
use gdbmi_proto::{ParseError, Token};

/// セッション操作のエラー
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// MI出力行を解析できない（セッションは以後使えない）
    #[error("failed to parse MI output: {0}")]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Pipe(#[from] PipeError),

    /// 発行していないトークンの結果レコードが届いた
    #[error("result for token {0} arrived with no outstanding command")]
    UnexpectedToken(Token),

    /// トークンのない結果レコードを対応付けようとした
    #[error("result record carries no token")]
    UnmatchedResult,

    /// 応答を待っている間にデバッガが出力を閉じた
    #[error("debugger exited unexpectedly")]
    DebuggerExited,

    #[error("session is not ready for commands ({0:?})")]
    NotReady(SessionState),

    /// `^error` が返された
    #[error("{command} failed: {message}")]
    Command { command: String, message: String },

    /// デバッガの応答を解釈できない
    #[error("unexpected value from {command}: {value:?}")]
    UnexpectedValue { command: String, value: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// プロトコル上の誤り（同期が取れなくなった状態）かどうか
    pub fn is_protocol_violation(&self) -> bool {
        match self {
            Error::UnexpectedToken(_) | Error::UnmatchedResult => true,
            Error::Pipe(e) => e.is_protocol_violation(),
            _ => false,
        }
    }
}
