//! デバッグ対象の起動ラッパー
//!
//! GDBの `exec-wrapper` に設定するシェルスクリプトを一時ファイルとして作成します。
//! ラッパーは環境変数を置き換え、記述子3/4/5をデバッグ対象の0/1/2に付け替えてから閉じます。

use crate::errors::Error;
use crate::Result;
use std::collections::BTreeMap;
use std::fs::Permissions;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::TempPath;

/// 起動ラッパーのスクリプト
#[derive(Debug)]
pub struct ExecWrapper {
    path: TempPath,
}

impl ExecWrapper {
    /// スクリプトを一時ファイルに書き出す
    pub fn create(env: &BTreeMap<String, String>) -> Result<Self> {
        let script = render_script(env)?;

        let mut file = tempfile::Builder::new()
            .prefix("gdbmi_exec_wrapper")
            .suffix(".sh")
            .tempfile()?;
        file.write_all(script.as_bytes())?;
        file.as_file().set_permissions(Permissions::from_mode(0o755))?;

        // 書き込み用の記述子は閉じておく（開いたままだとexecがETXTBSYになる）
        Ok(Self {
            path: file.into_temp_path(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// スクリプトを削除する
    pub fn remove(self) -> Result<()> {
        self.path.close()?;
        Ok(())
    }
}

/// スクリプト本体を生成する
pub fn render_script(env: &BTreeMap<String, String>) -> Result<String> {
    let mut script = String::from("#!/bin/sh\nexec env -i");
    for (key, value) in env {
        if key.is_empty() || key.contains('=') {
            return Err(Error::InvalidArgument(format!(
                "invalid environment variable name {key:?}"
            )));
        }
        let assignment = format!("{key}={value}");
        let quoted = shlex::try_quote(&assignment).map_err(|_| {
            Error::InvalidArgument(format!("environment variable {key:?} contains NUL"))
        })?;
        script.push_str(" \\\n  ");
        script.push_str(&quoted);
    }
    script.push_str(" \\\n  \"$@\" <&3 >&4 2>&5 3<&- 4>&- 5>&-\n");
    Ok(script)
}
