//! 擬似デバッガを使ったセッションのテスト
//!
//! MIの応答を返すシェルスクリプトをデバッガの代わりに起動するので、gdbは不要です。

use gdbmi_core::{
    AsyncKind, Error, Observer, Quote, Record, Session, SessionOptions, SessionState, StreamKind,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// トークンを取り出してコマンドごとに応答する擬似デバッガ
const FAKE_GDB: &str = r#"
printf '=thread-group-added,id="i1"\n'
printf '~"fake gdb\\n"\n'
printf '(gdb)\n'
while IFS= read -r line; do
  token=${line%%-*}
  command=${line#"$token"}
  case "$command" in
    "-gdb-show args") printf '%s^done,value="hoge fuge"\n' "$token" ;;
    -gdb-show\ *) printf '%s^done,value="on"\n' "$token" ;;
    -gdbmi-get-exec-file) printf '%s^done,value=""\n' "$token" ;;
    '-file-exec-and-symbols "/bin/true"')
      printf '%s^done,exact="true"\n' "$token" ;;
    -file-exec-and-symbols\ \"/nonexistent*)
      printf '%s^error,msg="/nonexistent: No such file or directory."\n' "$token" ;;
    -bogus*) printf '%s^error,msg="Undefined MI command: bogus"\n' "$token" ;;
    -garbage*) printf 'this is not mi\n' ;;
    -stray*) printf '99^done\n' ;;
    -tokenless*) printf '^done\n%s^done,after="tokenless"\n' "$token" ;;
    -crash*) exit 1 ;;
    -gdb-exit*) printf '%s^exit\n' "$token"; exit 0 ;;
    -echo-program*)
      IFS= read -r input <&3
      printf '%s\n' "$input" >&4
      printf 'marker\n' >&5
      printf '%s^done\n' "$token" ;;
    -exec-run*)
      printf '%s^running\n*running,thread-id="all"\n(gdb)\n' "$token"
      printf '*stopped,reason="exited-normally"\n' ;;
    *) printf '%s^done\n' "$token" ;;
  esac
  printf '(gdb)\n'
done
"#;

fn fake_options() -> SessionOptions {
    SessionOptions::new()
        .with_gdb("/bin/sh")
        .with_gdb_args(["-c", FAKE_GDB])
}

#[test]
fn test_start_and_execute() {
    let mut session = Session::start(fake_options()).expect("Failed to start session");
    assert_eq!(session.state(), SessionState::Ready);
    assert!(session.pid().is_some());

    let result = session
        .run_command("-list-features", &[] as &[&str], Quote::Always)
        .expect("Command should succeed");
    assert_eq!(result.class, "done");
    assert!(result.token.is_some());

    // ^error は呼び出し元への結果として返る
    let result = session
        .run_command("-bogus", &["x"], Quote::Never)
        .expect("Error result should still be delivered");
    assert!(result.is_error());
    assert_eq!(result.error_message(), Some("Undefined MI command: bogus"));
    assert_eq!(session.state(), SessionState::Ready);

    session.close().expect("Failed to close session");
    assert_eq!(session.state(), SessionState::Closed);
    session.close().expect("Closing twice should be fine");
}

#[test]
fn test_file_command_wire_format() {
    let mut session = Session::start(fake_options()).expect("Failed to start session");
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    session.subscribe(move |record| sink.borrow_mut().push(record.token()));

    let result = session
        .run_command("-file-exec-and-symbols", &["/bin/true"], Quote::Always)
        .unwrap();
    assert_eq!(result.class, "done");
    // 起動時に補助スクリプトの読み込み(0)と起動ラッパーの設定(1)でトークンを使う
    assert_eq!(result.token, Some(2));
    // 引用された形でそのまま届いている
    assert_eq!(result.fields.get_str("exact"), Some("true"));
    // ブロック内の最後の結果レコードが呼び出し元のもの
    assert_eq!(seen.borrow().last().copied().flatten(), result.token);
}

#[test]
fn test_tokens_increase_per_command() {
    let mut session = Session::start(fake_options()).expect("Failed to start session");
    let first = session.run_console_command(&["info", "args"]).unwrap();
    let second = session.run_console_command(&["info", "args"]).unwrap();
    assert!(second.token > first.token);
}

#[test]
fn test_observers_see_startup_block() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let observer: Observer = Box::new(move |record: &Record| {
        let label = match record {
            Record::Result(r) => format!("result:{}", r.class),
            Record::Async(a) => format!("async:{}", a.class),
            Record::Stream(s) if s.kind == StreamKind::Console => format!("console:{}", s.text),
            Record::Stream(s) => format!("stream:{}", s.text),
        };
        sink.borrow_mut().push(label);
    });

    let mut session = Session::start_with_observers(fake_options(), vec![observer])
        .expect("Failed to start session");

    {
        let seen = seen.borrow();
        assert_eq!(seen[0], "async:thread-group-added");
        assert_eq!(seen[1], "console:fake gdb\n");
    }

    let order = Rc::new(RefCell::new(Vec::new()));
    for name in ["first", "second"] {
        let order = Rc::clone(&order);
        session.subscribe(move |_| order.borrow_mut().push(name));
    }
    session.run_command("-noop", &[] as &[&str], Quote::Always).unwrap();
    assert_eq!(*order.borrow(), vec!["first", "second"]);
    assert_eq!(seen.borrow().last().map(String::as_str), Some("result:done"));
}

#[test]
fn test_tokenless_result_is_ignored() {
    let mut session = Session::start(fake_options()).expect("Failed to start session");
    let result = session
        .run_command("-tokenless", &[] as &[&str], Quote::Always)
        .unwrap();
    assert_eq!(result.fields.get_str("after"), Some("tokenless"));
    assert_eq!(session.state(), SessionState::Ready);
}

#[test]
fn test_parse_error_fails_session() {
    let mut session = Session::start(fake_options()).expect("Failed to start session");
    let err = session
        .run_command("-garbage", &[] as &[&str], Quote::Always)
        .unwrap_err();
    assert!(matches!(err, Error::Parse(_)), "unexpected error: {err}");
    assert_eq!(session.state(), SessionState::Failed);

    let err = session
        .run_command("-noop", &[] as &[&str], Quote::Always)
        .unwrap_err();
    assert!(matches!(err, Error::NotReady(SessionState::Failed)));
}

#[test]
fn test_stray_token_is_protocol_violation() {
    let mut session = Session::start(fake_options()).expect("Failed to start session");
    let err = session
        .run_command("-stray", &[] as &[&str], Quote::Always)
        .unwrap_err();
    assert!(matches!(err, Error::UnexpectedToken(99)));
    assert!(err.is_protocol_violation());
    assert_eq!(session.state(), SessionState::Failed);
}

#[test]
fn test_debugger_exit_while_waiting() {
    let mut session = Session::start(fake_options()).expect("Failed to start session");
    let err = session
        .run_command("-crash", &[] as &[&str], Quote::Always)
        .unwrap_err();
    assert!(matches!(err, Error::DebuggerExited), "unexpected error: {err}");
}

#[test]
fn test_gdb_exit_returns_exit_result() {
    let mut session = Session::start(fake_options()).expect("Failed to start session");
    let result = session
        .run_command("-gdb-exit", &[] as &[&str], Quote::Always)
        .unwrap();
    assert_eq!(result.class, "exit");

    // 終了したデバッガには以降のコマンドを送らない
    assert_eq!(session.state(), SessionState::Closing);
    let err = session
        .run_command("-noop", &[] as &[&str], Quote::Always)
        .unwrap_err();
    assert!(matches!(err, Error::NotReady(SessionState::Closing)));

    session.close().expect("Failed to close session");
    assert_eq!(session.state(), SessionState::Closed);
}

#[test]
fn test_settings_accessors() {
    let mut session = Session::start(fake_options()).expect("Failed to start session");

    session.set_debuginfod_enabled(false).unwrap();
    assert!(session.debuginfod_enabled().unwrap());
    session.set_auto_load_enabled(true).unwrap();
    assert!(session.auto_load_enabled().unwrap());
    session.set_mi_async(true).unwrap();

    session.set_arguments(&["hoge", "two words"]).unwrap();
    assert_eq!(session.arguments().unwrap(), vec!["hoge", "fuge"]);

    session.set_file("/bin/true").unwrap();
    assert_eq!(session.file().unwrap(), None);

    let err = session.set_file("/nonexistent/program").unwrap_err();
    match err {
        Error::Command { command, message } => {
            assert_eq!(command, "-file-exec-and-symbols");
            assert!(message.contains("No such file"));
        }
        other => panic!("unexpected error: {other}"),
    }
    // ^error はセッションを壊さない
    assert_eq!(session.state(), SessionState::Ready);
}

#[test]
fn test_run_and_wait_for_stop() {
    let mut session = Session::start(fake_options()).expect("Failed to start session");
    let result = session.run().unwrap();
    assert_eq!(result.class, "running");

    session
        .wait_for(|record| record.is_async(AsyncKind::Exec, "stopped"))
        .expect("Should observe *stopped");
    assert_eq!(session.state(), SessionState::Ready);
}

#[test]
fn test_program_stdio() {
    let mut session = Session::start(fake_options()).expect("Failed to start session");

    session.write_program_stdin(b"hello program\n").unwrap();
    session
        .run_command("-echo-program", &[] as &[&str], Quote::Always)
        .unwrap();

    // 結果の前に書かれた出力は既に受信済み
    assert!(session.has_program_stdout());
    assert_eq!(session.take_program_stdout().unwrap(), b"hello program\n");
    assert_eq!(session.take_program_stderr().unwrap(), b"marker\n");

    // 何も届いていなければ空
    session.pump_io(Some(Duration::from_millis(10))).unwrap();
    assert!(session.take_program_stdout().unwrap().is_empty());
}

#[test]
fn test_open_tears_down() {
    let wrapper = Session::open(fake_options(), |session| {
        let path = session
            .exec_wrapper_path()
            .expect("Exec wrapper should be installed")
            .to_path_buf();
        assert!(path.exists());
        Ok(path)
    })
    .expect("Scoped session should succeed");
    assert!(!wrapper.exists(), "Exec wrapper should be removed on close");

    let err = Session::open(fake_options(), |session| {
        session.run_command("-garbage", &[] as &[&str], Quote::Always)
    })
    .unwrap_err();
    assert!(matches!(err, Error::Parse(_)));
}

#[test]
fn test_missing_debugger() {
    let options = SessionOptions::new().with_gdb("/nonexistent/gdb");
    let err = Session::start(options).err().expect("Start should fail");
    assert!(matches!(err, Error::Pipe(_)), "unexpected error: {err}");
}
