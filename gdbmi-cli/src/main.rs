//! gdbmi CLI - コマンドラインインターフェース
//!
//! GDB/MIセッションを対話的に操作するREPL

use anyhow::{Context, Result};
use clap::Parser;
use gdbmi_core::{
    AsyncKind, Quote, Record, ResultRecord, Session, SessionOptions, SessionState, StreamKind,
    Tuple, Value,
};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// gdbmi - GDB/MI session shell
#[derive(Parser)]
#[command(name = "gdbmi")]
#[command(version = "0.1.0")]
#[command(about = "Drive gdb through its machine interface", long_about = None)]
struct Cli {
    /// Debugger executable
    #[arg(long, default_value = "gdb")]
    gdb: PathBuf,

    /// Log every MI line sent and received
    #[arg(short, long)]
    verbose: bool,

    /// Environment variable for the program
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env)]
    env: Vec<(String, String)>,

    /// Do not inherit the current environment
    #[arg(long)]
    clear_env: bool,

    /// Program to debug and its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    program: Vec<String>,
}

fn parse_env(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got {s:?}"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    println!("gdbmi - GDB/MI session shell");
    println!("Version 0.1.0");
    println!();

    let mut session = init_session(&cli)?;
    run_repl(&mut session)?;
    session.close()?;

    Ok(())
}

/// ログ出力を初期化する（標準エラー出力へ）
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// デバッガを起動し、指定があればプログラムを読み込む
fn init_session(cli: &Cli) -> Result<Session> {
    let mut options = SessionOptions::new()
        .with_gdb(&cli.gdb)
        .with_clear_env(cli.clear_env);
    for (key, value) in &cli.env {
        options = options.with_env(key, value);
    }
    debug!(
        gdb = %cli.gdb.display(),
        env = cli.env.len(),
        clear_env = cli.clear_env,
        "starting debugger"
    );

    let mut session = Session::start(options)
        .with_context(|| format!("failed to start {}", cli.gdb.display()))?;
    session.subscribe(print_record);
    println!("Debugger started (pid {})", session.pid().unwrap_or_default());

    if let Some((program, args)) = cli.program.split_first() {
        println!("Loading program: {}", program);
        session.set_file(program)?;
        session.set_arguments(args)?;
        println!("Use 'run' to start the program");
    }
    println!();

    Ok(session)
}

/// REPLループを実行する
fn run_repl(session: &mut Session) -> Result<()> {
    println!("Lines starting with '-' are MI commands, anything else is a console command.");
    println!("Type 'quit' to exit.");
    println!();

    let mut rl = DefaultEditor::new()?;

    loop {
        let readline = rl.readline("(gdbmi) ");
        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                rl.add_history_entry(line)?;

                if line == "quit" {
                    println!("Goodbye!");
                    break;
                }

                if let Err(e) = handle_command(session, line) {
                    eprintln!("Error: {}", e);
                }
                if session.state() == SessionState::Failed {
                    eprintln!("Session is no longer usable");
                    break;
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    Ok(())
}

fn handle_command(session: &mut Session, line: &str) -> Result<()> {
    let result = if line.starts_with('-') {
        let words = shlex::split(line).context("unbalanced quotes")?;
        let (name, params) = words.split_first().context("empty command")?;
        debug!(command = %name, params = params.len(), "MI command");
        session.run_command(name, params, Quote::Always)?
    } else {
        debug!(command = %line, "console command");
        session.run_console_command(&[line])?
    };

    print_result(&result);
    drain_program_output(session)
}

/// デバッグ対象の出力を表示する
fn drain_program_output(session: &mut Session) -> Result<()> {
    session.pump_io(Some(Duration::ZERO))?;

    if session.has_program_stdout() {
        let data = session.take_program_stdout()?;
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(&data)?;
        stdout.flush()?;
    }
    if session.has_program_stderr() {
        let data = session.take_program_stderr()?;
        std::io::stderr().write_all(&data)?;
    }
    Ok(())
}

/// 結果レコードを表示する
fn print_result(result: &ResultRecord) {
    if let Some(message) = result.error_message() {
        println!("^error: {}", message);
    } else if result.fields.is_empty() {
        println!("^{}", result.class);
    } else {
        println!("^{} {}", result.class, format_tuple(&result.fields));
    }
}

/// ストリームと非同期レコードを表示するオブザーバ
fn print_record(record: &Record) {
    match record {
        Record::Stream(stream) => match stream.kind {
            StreamKind::Console | StreamKind::Target => print!("{}", stream.text),
            StreamKind::Log => eprint!("{}", stream.text),
        },
        Record::Async(record) => {
            let prefix = match record.kind {
                AsyncKind::Exec => '*',
                AsyncKind::Status => '+',
                AsyncKind::Notify => '=',
            };
            println!("{}{} {}", prefix, record.class, format_tuple(&record.fields));
        }
        Record::Result(_) => {}
    }
}

fn format_tuple(tuple: &Tuple) -> String {
    let fields: Vec<String> = tuple
        .iter()
        .map(|(key, value)| format!("{}={}", key, format_value(value)))
        .collect();
    format!("{{{}}}", fields.join(", "))
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("{:?}", s),
        Value::Tuple(tuple) => format_tuple(tuple),
        Value::List(items) => {
            let items: Vec<String> = items.iter().map(format_value).collect();
            format!("[{}]", items.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env() {
        assert_eq!(
            parse_env("KEY=a=b").unwrap(),
            ("KEY".to_string(), "a=b".to_string())
        );
        assert!(parse_env("novalue").is_err());
    }

    #[test]
    fn test_format_value() {
        let mut frame = Tuple::new();
        frame.push("func", Value::String("main".to_string()));
        frame.push("line", Value::String("3".to_string()));
        let value = Value::List(vec![Value::Tuple(frame), Value::String("x\"y".to_string())]);
        assert_eq!(
            format_value(&value),
            r#"[{func="main", line="3"}, "x\"y"]"#
        );
    }

    #[test]
    fn test_cli_arguments() {
        let cli = Cli::parse_from([
            "gdbmi", "--gdb", "/usr/bin/gdb", "--env", "A=1", "--env", "B=2", "--clear-env",
            "./prog", "-x", "arg",
        ]);
        assert_eq!(cli.gdb, PathBuf::from("/usr/bin/gdb"));
        assert_eq!(cli.env.len(), 2);
        assert!(cli.clear_env);
        assert_eq!(cli.program, vec!["./prog", "-x", "arg"]);
    }
}
