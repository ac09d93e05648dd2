//! 解析エラー

use crate::lexer::LexState;

/// MI出力行の解析エラー
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// 現在の字句解析状態でどの規則にも一致しない
    #[error("don't know how to lex {snippet:?} at offset {offset} ({state:?})")]
    Lex {
        state: LexState,
        offset: usize,
        snippet: String,
    },

    /// 文法に合わない字句が現れた
    #[error("expected {expected}, found {found}")]
    UnexpectedToken {
        expected: &'static str,
        found: String,
    },

    /// 行の途中で字句が尽きた
    #[error("expected {expected}, found end of line")]
    UnexpectedEnd { expected: &'static str },

    /// 数値トークンが範囲外
    #[error("token {0} does not fit in 64 bits")]
    TokenOverflow(String),
}
