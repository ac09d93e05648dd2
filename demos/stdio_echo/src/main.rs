//! gdbmiのテスト用プログラム
//!
//! 引数と環境変数 `GDBMI_TEST` を表示し、標準入力から1行読んでそのまま出力します。

use std::io::{self, BufRead, Write};

fn main() -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    for arg in std::env::args().skip(1) {
        writeln!(stdout, "arg: {arg}")?;
    }
    if let Ok(value) = std::env::var("GDBMI_TEST") {
        writeln!(stdout, "env: GDBMI_TEST={value}")?;
    }

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    write!(stdout, "{line}")?;
    stdout.flush()?;

    eprintln!("stdio_echo: done");
    Ok(())
}
