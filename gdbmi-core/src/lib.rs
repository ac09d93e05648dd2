//! gdbmi のコア機能
//!
//! このクレートは、GDB/MIセッションの中核となるロジックを提供します。
//! コマンドへのトークン付与、出力ブロック単位の応答読み取り、レコードの配送、
//! デバッグ対象の標準入出力の中継を統合します。

pub mod command;
pub mod correlator;
pub mod errors;
pub mod options;
pub mod session;
pub mod settings;
pub mod wrapper;

pub use command::{quote, IssuedCommand, MiCommand, Quote};
pub use correlator::Correlator;
pub use errors::Error;
pub use options::SessionOptions;
pub use session::{Observer, Session, SessionState};
pub use wrapper::ExecWrapper;

// 他のクレートから使用するために再エクスポート
pub use gdbmi_pipe::ExitStatus;
pub use gdbmi_proto::{
    AsyncKind, AsyncRecord, Record, ResultRecord, StreamKind, StreamRecord, Token, Tuple, Value,
};

/// セッション操作の結果型
pub type Result<T> = std::result::Result<T, Error>;
