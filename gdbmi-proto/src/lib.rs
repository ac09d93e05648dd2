//! gdbmi MIプロトコル解析
//!
//! このクレートは、GDB/MIの出力行を型付きレコードへ変換する機能を提供します。
//! バイト列の行分割、字句解析、構文解析を行い、I/Oは一切行いません。

pub mod errors;
pub mod lexer;
pub mod line_buffer;
pub mod parser;
pub mod record;

pub use errors::ParseError;
pub use lexer::{LexState, Lexeme, Lexer};
pub use line_buffer::LineBuffer;
pub use parser::parse;
pub use record::{
    AsyncKind, AsyncRecord, Record, ResultRecord, StreamKind, StreamRecord, Token, Tuple, Value,
};

/// 出力ブロックの終端を示す行
pub const BLOCK_TERMINATOR: &str = "(gdb)";

/// MIプロトコル解析の結果型
pub type Result<T> = std::result::Result<T, ParseError>;
