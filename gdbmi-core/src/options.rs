//! セッションの設定

use std::collections::BTreeMap;
use std::path::PathBuf;

/// 既定のデバッガ
pub const DEFAULT_GDB: &str = "gdb";

/// 既定のデバッガ引数（MIインタプリタ、初期化ファイルを読まない）
pub const DEFAULT_GDB_ARGS: [&str; 3] = ["--interpreter=mi4", "--nh", "--nx"];

/// セッション起動時の設定
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// 起動するデバッガ（PATHから検索）
    pub gdb: PathBuf,
    /// デバッガに渡す引数
    pub gdb_args: Vec<String>,
    /// デバッグ対象の環境変数の上書き
    pub env: BTreeMap<String, String>,
    /// 現在の環境変数を引き継がない
    pub clear_env: bool,
    /// 補助スクリプトを読み込む
    pub load_support_script: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            gdb: PathBuf::from(DEFAULT_GDB),
            gdb_args: DEFAULT_GDB_ARGS.iter().map(|s| s.to_string()).collect(),
            env: BTreeMap::new(),
            clear_env: false,
            load_support_script: true,
        }
    }
}

impl SessionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gdb(mut self, gdb: impl Into<PathBuf>) -> Self {
        self.gdb = gdb.into();
        self
    }

    pub fn with_gdb_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.gdb_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_clear_env(mut self, clear: bool) -> Self {
        self.clear_env = clear;
        self
    }

    pub fn with_support_script(mut self, load: bool) -> Self {
        self.load_support_script = load;
        self
    }

    /// デバッグ対象に渡す環境変数
    ///
    /// `clear_env` でなければ現在の環境（UTF-8のもののみ）に上書きを重ねる。
    pub fn inferior_env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        if !self.clear_env {
            env.extend(std::env::vars_os().filter_map(|(key, value)| {
                Some((key.into_string().ok()?, value.into_string().ok()?))
            }));
        }
        env.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = SessionOptions::default();
        assert_eq!(options.gdb, PathBuf::from("gdb"));
        assert_eq!(options.gdb_args, vec!["--interpreter=mi4", "--nh", "--nx"]);
        assert!(options.load_support_script);
        assert!(!options.clear_env);
    }

    #[test]
    fn test_cleared_env_contains_only_overrides() {
        let options = SessionOptions::new()
            .with_clear_env(true)
            .with_env("HOGE", "1")
            .with_env("FUGE", "two words");
        let env = options.inferior_env();
        assert_eq!(env.len(), 2);
        assert_eq!(env.get("FUGE").map(String::as_str), Some("two words"));
    }

    #[test]
    fn test_overrides_win_over_inherited() {
        let options = SessionOptions::new().with_env("PATH", "/nowhere");
        let env = options.inferior_env();
        assert_eq!(env.get("PATH").map(String::as_str), Some("/nowhere"));
    }
}
