//! デバッガ設定の読み書きと実行制御
//!
//! いずれも [`Session::execute`] の上に載った薄い呼び出しです。

use crate::command::MiCommand;
use crate::errors::Error;
use crate::session::Session;
use crate::Result;
use gdbmi_proto::ResultRecord;

/// `set auto-load` の個別設定
const AUTO_LOAD_SETTINGS: [&str; 4] = [
    "gdb-scripts",
    "libthread-db",
    "local-gdbinit",
    "python-scripts",
];

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

/// `on`/`off` を解釈する（前後の空白と大文字小文字は無視）
fn parse_on_off(command: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" => Ok(true),
        "off" => Ok(false),
        _ => Err(Error::UnexpectedValue {
            command: command.to_string(),
            value: value.to_string(),
        }),
    }
}

/// 結果レコードの `value` フィールドを取り出す
fn value_field(command: &str, record: &ResultRecord) -> Result<String> {
    record
        .fields
        .get_str("value")
        .map(str::to_string)
        .ok_or_else(|| Error::UnexpectedValue {
            command: command.to_string(),
            value: format!("{:?}", record.fields),
        })
}

impl Session {
    fn gdb_set(&mut self, words: &[&str]) -> Result<()> {
        let command = words
            .iter()
            .fold(MiCommand::new("-gdb-set"), |command, word| command.raw_param(*word));
        self.run_checked(command)?;
        Ok(())
    }

    fn gdb_show(&mut self, words: &[&str]) -> Result<String> {
        let command = words
            .iter()
            .fold(MiCommand::new("-gdb-show"), |command, word| command.raw_param(*word));
        let record = self.run_checked(command)?;
        value_field("-gdb-show", &record)
    }

    fn gdb_show_on_off(&mut self, words: &[&str]) -> Result<bool> {
        let value = self.gdb_show(words)?;
        parse_on_off(&format!("-gdb-show {}", words.join(" ")), &value)
    }

    /// debuginfodによるデバッグ情報の取得を切り替える
    pub fn set_debuginfod_enabled(&mut self, enabled: bool) -> Result<()> {
        self.gdb_set(&["debuginfod", "enabled", on_off(enabled)])
    }

    pub fn debuginfod_enabled(&mut self) -> Result<bool> {
        self.gdb_show_on_off(&["debuginfod", "enabled"])
    }

    /// スクリプト等の自動読み込みを切り替える
    ///
    /// 無効化は1コマンドで行えるが、有効化は個別設定ごとに行う必要がある。
    pub fn set_auto_load_enabled(&mut self, enabled: bool) -> Result<()> {
        if !enabled {
            return self.gdb_set(&["auto-load", "off"]);
        }
        for setting in AUTO_LOAD_SETTINGS {
            self.gdb_set(&["auto-load", setting, "on"])?;
        }
        Ok(())
    }

    /// 個別設定がすべて有効な場合のみ `true`
    pub fn auto_load_enabled(&mut self) -> Result<bool> {
        for setting in AUTO_LOAD_SETTINGS {
            if !self.gdb_show_on_off(&["auto-load", setting])? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// デバッグ対象の実行ファイルを読み込む
    pub fn set_file(&mut self, path: &str) -> Result<()> {
        self.run_checked(MiCommand::new("-file-exec-and-symbols").param(path))?;
        Ok(())
    }

    /// 現在の実行ファイル（未設定なら `None`）
    ///
    /// 補助スクリプトの `-gdbmi-get-exec-file` を使うため、補助スクリプトが必要です。
    pub fn file(&mut self) -> Result<Option<String>> {
        let record = self.run_checked(MiCommand::new("-gdbmi-get-exec-file"))?;
        let value = value_field("-gdbmi-get-exec-file", &record)?;
        Ok(Some(value).filter(|v| !v.is_empty()))
    }

    /// デバッグ対象のコマンドライン引数を設定する
    ///
    /// GDBはコマンドの残りをそのまま `set args` に渡し、起動時にシェルが分割する。
    /// そのため各引数はシェル向けにエスケープし、MIの引用はしない。
    pub fn set_arguments<S: AsRef<str>>(&mut self, args: &[S]) -> Result<()> {
        let mut command = MiCommand::new("-exec-arguments");
        for arg in args {
            let arg = arg.as_ref();
            let escaped = shlex::try_quote(arg)
                .map_err(|_| Error::InvalidArgument(format!("argument {arg:?} contains NUL")))?;
            command = command.raw_param(escaped);
        }
        self.run_checked(command)?;
        Ok(())
    }

    pub fn arguments(&mut self) -> Result<Vec<String>> {
        let value = self.gdb_show(&["args"])?;
        shlex::split(&value).ok_or(Error::UnexpectedValue {
            command: "-gdb-show args".to_string(),
            value,
        })
    }

    /// MIの非同期実行モードを切り替える
    pub fn set_mi_async(&mut self, enabled: bool) -> Result<()> {
        self.gdb_set(&["mi-async", on_off(enabled)])
    }

    /// デバッグ対象を起動する
    pub fn run(&mut self) -> Result<ResultRecord> {
        self.run_checked(MiCommand::new("-exec-run"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gdbmi_proto::{Tuple, Value};

    #[test]
    fn test_parse_on_off() {
        assert!(parse_on_off("x", "on").unwrap());
        assert!(parse_on_off("x", " ON \n").unwrap());
        assert!(!parse_on_off("x", "Off").unwrap());
        assert!(matches!(
            parse_on_off("x", "auto"),
            Err(Error::UnexpectedValue { .. })
        ));
    }

    #[test]
    fn test_value_field() {
        let mut fields = Tuple::new();
        fields.push("value", Value::String("hoge fuge".to_string()));
        let record = ResultRecord {
            token: Some(0),
            class: "done".to_string(),
            fields,
        };
        assert_eq!(value_field("-gdb-show", &record).unwrap(), "hoge fuge");

        let empty = ResultRecord {
            token: Some(1),
            class: "done".to_string(),
            fields: Tuple::new(),
        };
        assert!(matches!(
            value_field("-gdb-show", &empty),
            Err(Error::UnexpectedValue { .. })
        ));
    }
}
