//! 行バッファ
//!
//! 任意の区切りで届くバイト列を、改行で終わる完全な行に分割します。

/// 行バッファ
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// 空の行バッファを作成する
    pub fn new() -> Self {
        Self::default()
    }

    /// 受信したバイト列を末尾に追加する
    pub fn feed(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
    }

    /// 完全な行をすべて取り出す
    ///
    /// 改行文字は取り除かれます。最後の改行より後ろの未完成の行は
    /// 次回の呼び出しのためにバッファに残ります。
    pub fn extract_lines(&mut self) -> Vec<String> {
        let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };

        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);
        complete
            .get(..last_newline)
            .unwrap_or_default()
            .split(|&b| b == b'\n')
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect()
    }

    /// 未完成の行として保持しているバイト数
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
