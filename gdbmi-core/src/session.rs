//! GDB/MIセッション
//!
//! コマンドにトークンを付けて送信し、出力ブロック（`(gdb)` で終わる行の並び）を
//! 単位として応答を読み取ります。読み取ったレコードは登録順にオブザーバへ配送され、
//! 結果レコードはトークンで呼び出し元に対応付けられます。
//!
//! 一度に応答待ちにできるコマンドは1つです。

use crate::command::{quote, MiCommand, Quote};
use crate::correlator::Correlator;
use crate::errors::Error;
use crate::options::SessionOptions;
use crate::wrapper::ExecWrapper;
use crate::Result;
use gdbmi_pipe::{ChannelId, ChannelMode, ChildProcess, PipeManager};
use gdbmi_proto::{LineBuffer, Record, ResultRecord, Token, BLOCK_TERMINATOR};
use std::collections::{BTreeMap, VecDeque};
use std::io::Write;
use std::os::fd::RawFd;
use std::path::Path;
use std::time::Duration;
use tempfile::TempPath;
use tracing::{debug, warn};

/// デバッガ側の記述子番号
const GDB_STDIN: RawFd = 0;
const GDB_STDOUT: RawFd = 1;

/// デバッグ対象の標準入出力として引き渡す記述子番号（起動ラッパーが0/1/2に付け替える）
const PROGRAM_STDIN: RawFd = 3;
const PROGRAM_STDOUT: RawFd = 4;
const PROGRAM_STDERR: RawFd = 5;

/// 補助スクリプト
const SUPPORT_SCRIPT: &str = include_str!("support.py");

/// セッションの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// 起動直後のブロックを読んでいる
    Starting,
    /// コマンドを受け付けられる
    Ready,
    /// 指定トークンの結果を待っている
    AwaitingResult(Token),
    /// 解析エラーやプロトコル違反で使えなくなった
    Failed,
    /// デバッガが終了した、または終了処理中
    Closing,
    Closed,
}

/// レコードを受け取るオブザーバ
pub type Observer = Box<dyn FnMut(&Record)>;

/// GDB/MIセッション
pub struct Session {
    pipes: PipeManager,
    control: ChannelId,
    program_stdin: ChannelId,
    program_stdout: ChannelId,
    program_stderr: ChannelId,
    child: Option<ChildProcess>,
    lines: LineBuffer,
    pending_lines: VecDeque<String>,
    correlator: Correlator,
    observers: Vec<Observer>,
    state: SessionState,
    exec_wrapper: Option<ExecWrapper>,
    support_script: Option<TempPath>,
}

impl Session {
    /// デバッガを起動してセッションを開始する
    pub fn start(options: SessionOptions) -> Result<Self> {
        Self::start_with_observers(options, Vec::new())
    }

    /// オブザーバを登録した状態でセッションを開始する
    ///
    /// 起動直後の出力ブロックのレコードもオブザーバに届きます。
    pub fn start_with_observers(options: SessionOptions, observers: Vec<Observer>) -> Result<Self> {
        let mut pipes = PipeManager::new();
        let control = pipes.open_channel(ChannelMode::Bidirectional, &[GDB_STDIN, GDB_STDOUT])?;
        let program_stdin = pipes.open_channel(ChannelMode::Outbound, &[PROGRAM_STDIN])?;
        let program_stdout = pipes.open_channel(ChannelMode::Inbound, &[PROGRAM_STDOUT])?;
        let program_stderr = pipes.open_channel(ChannelMode::Inbound, &[PROGRAM_STDERR])?;

        let child = ChildProcess::spawn(&options.gdb, &options.gdb_args, &pipes.child_fd_map())?;
        pipes.release_child_ends();
        debug!(pid = child.pid(), gdb = %options.gdb.display(), "debugger started");

        let mut session = Self {
            pipes,
            control,
            program_stdin,
            program_stdout,
            program_stderr,
            child: Some(child),
            lines: LineBuffer::new(),
            pending_lines: VecDeque::new(),
            correlator: Correlator::new(),
            observers,
            state: SessionState::Starting,
            exec_wrapper: None,
            support_script: None,
        };

        // 失敗した場合はDropで後始末される
        session.initialize(&options)?;
        Ok(session)
    }

    /// セッションを開始してクロージャを実行し、必ず終了処理を行う
    pub fn open<T, F>(options: SessionOptions, f: F) -> Result<T>
    where
        F: FnOnce(&mut Session) -> Result<T>,
    {
        let mut session = Self::start(options)?;
        let outcome = f(&mut session);
        let closed = session.close();
        let value = outcome?;
        closed?;
        Ok(value)
    }

    fn initialize(&mut self, options: &SessionOptions) -> Result<()> {
        if let Err(e) = self.read_output_block(&mut |_: &Record| {}) {
            self.state = SessionState::Failed;
            return Err(e);
        }
        self.state = SessionState::Ready;

        if options.load_support_script {
            self.load_support_script()?;
        }
        self.install_exec_wrapper(&options.inferior_env())?;
        Ok(())
    }

    fn load_support_script(&mut self) -> Result<()> {
        let mut file = tempfile::Builder::new()
            .prefix("gdbmi_support")
            .suffix(".py")
            .tempfile()?;
        file.write_all(SUPPORT_SCRIPT.as_bytes())?;
        let path = file.into_temp_path();
        let source = format!("source {}", path.display());
        self.support_script = Some(path);

        let result = self.run_console_command(&[source])?;
        if result.is_error() {
            warn!(
                message = result.error_message().unwrap_or_default(),
                "failed to load support script"
            );
        }
        Ok(())
    }

    fn install_exec_wrapper(&mut self, env: &BTreeMap<String, String>) -> Result<()> {
        let wrapper = ExecWrapper::create(env)?;
        let path = quote(&wrapper.path().to_string_lossy());
        self.exec_wrapper = Some(wrapper);
        self.run_checked(
            MiCommand::new("-gdb-set")
                .raw_param("exec-wrapper")
                .raw_param(path),
        )?;
        Ok(())
    }

    /// 現在の状態
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// デバッガのプロセスID
    pub fn pid(&self) -> Option<i32> {
        self.child.as_ref().map(ChildProcess::pid)
    }

    /// 起動ラッパーのパス（終了処理で削除される）
    pub fn exec_wrapper_path(&self) -> Option<&Path> {
        self.exec_wrapper.as_ref().map(ExecWrapper::path)
    }

    /// オブザーバを登録する（登録順に呼ばれる）
    pub fn subscribe<F>(&mut self, observer: F)
    where
        F: FnMut(&Record) + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    /// コマンドを送信し、対応する結果レコードを待つ
    ///
    /// `^error` も結果として返します。エラーになるのはセッションが使えなくなった場合です。
    pub fn execute(&mut self, command: MiCommand) -> Result<ResultRecord> {
        if self.state != SessionState::Ready {
            return Err(Error::NotReady(self.state));
        }

        let issued = command.issue(self.correlator.issue());
        let token = issued.token();
        let line = issued.line();
        debug!("GDB/MI <- {}", line);

        let mut bytes = line.into_bytes();
        bytes.push(b'\n');
        self.state = SessionState::AwaitingResult(token);

        match self.send_and_wait(&bytes, token) {
            Ok(record) => {
                if self.state == SessionState::AwaitingResult(token) {
                    self.state = SessionState::Ready;
                }
                Ok(record)
            }
            Err(e) => {
                self.state = SessionState::Failed;
                Err(e)
            }
        }
    }

    /// 名前とパラメータからコマンドを組み立てて実行する
    pub fn run_command<S: AsRef<str>>(
        &mut self,
        name: &str,
        params: &[S],
        quote: Quote,
    ) -> Result<ResultRecord> {
        self.execute(MiCommand::with_params(name, params, quote))
    }

    /// コンソールコマンドを実行する（単語は空白で連結される）
    pub fn run_console_command<S: AsRef<str>>(&mut self, words: &[S]) -> Result<ResultRecord> {
        let command = words
            .iter()
            .map(|word| word.as_ref())
            .collect::<Vec<&str>>()
            .join(" ");
        self.execute(MiCommand::console(command))
    }

    /// コマンドを実行し、`^error` を [`Error::Command`] に変換する
    pub(crate) fn run_checked(&mut self, command: MiCommand) -> Result<ResultRecord> {
        let name = command.name().to_string();
        let result = self.execute(command)?;
        if result.is_error() {
            return Err(Error::Command {
                command: name,
                message: result.error_message().unwrap_or_default().to_string(),
            });
        }
        Ok(result)
    }

    fn send_and_wait(&mut self, bytes: &[u8], token: Token) -> Result<ResultRecord> {
        self.pipes.queue_outbound(self.control, bytes)?;
        loop {
            let block = self.read_output_block(&mut |_: &Record| {});
            if let Some(record) = self.correlator.take(token) {
                // `^exit` の後は `(gdb)` を出さずに終了する
                match block {
                    Ok(()) => return Ok(record),
                    Err(Error::DebuggerExited) => {
                        self.state = SessionState::Closing;
                        return Ok(record);
                    }
                    Err(e) => return Err(e),
                }
            }
            block?;
        }
    }

    /// 述語を満たすレコードが現れるまで出力ブロックを読み続ける
    pub fn wait_for<F>(&mut self, mut predicate: F) -> Result<()>
    where
        F: FnMut(&Record) -> bool,
    {
        if self.state != SessionState::Ready {
            return Err(Error::NotReady(self.state));
        }
        loop {
            let mut satisfied = false;
            let outcome = self.read_output_block(&mut |record: &Record| {
                if predicate(record) {
                    satisfied = true;
                }
            });
            if let Err(e) = outcome {
                self.state = SessionState::Failed;
                return Err(e);
            }
            if satisfied {
                return Ok(());
            }
        }
    }

    /// 出力ブロックを1つ読み取り、各レコードを配送する
    fn read_output_block(&mut self, inspect: &mut dyn FnMut(&Record)) -> Result<()> {
        loop {
            let raw = self.next_line()?;
            let line = raw.trim();
            debug!("GDB/MI -> {}", line);

            if line == BLOCK_TERMINATOR {
                return Ok(());
            }
            if line.is_empty() {
                continue;
            }

            let record = gdbmi_proto::parse(line)?;
            for observer in &mut self.observers {
                observer(&record);
            }
            inspect(&record);

            if let Record::Result(result) = record {
                if result.token.is_none() {
                    warn!(class = %result.class, "ignoring result record without token");
                    continue;
                }
                self.correlator.deliver(result)?;
            }
        }
    }

    fn next_line(&mut self) -> Result<String> {
        loop {
            if let Some(line) = self.pending_lines.pop_front() {
                return Ok(line);
            }

            if self.pipes.has_inbound(self.control) {
                let data = self.pipes.take_inbound(self.control)?;
                self.lines.feed(&data);
                self.pending_lines.extend(self.lines.extract_lines());
                continue;
            }

            if !self.pipes.is_inbound_open(self.control) {
                return Err(Error::DebuggerExited);
            }

            self.pump(None)?;
        }
    }

    fn pump(&mut self, timeout: Option<Duration>) -> Result<()> {
        let report = self.pipes.tick(timeout)?;
        for (id, error) in report.failed {
            if id == self.control {
                return Err(error.into());
            }
            warn!(channel = %id, %error, "program stdio channel failed");
        }
        Ok(())
    }

    /// デバッグ対象の標準入力に書き込む（送信は次のtickで行われる）
    pub fn write_program_stdin(&mut self, data: &[u8]) -> Result<()> {
        self.pipes.queue_outbound(self.program_stdin, data)?;
        Ok(())
    }

    /// デバッグ対象の標準出力から受信済みのデータを取り出す
    pub fn take_program_stdout(&mut self) -> Result<Vec<u8>> {
        Ok(self.pipes.take_inbound(self.program_stdout)?)
    }

    /// デバッグ対象の標準エラー出力から受信済みのデータを取り出す
    pub fn take_program_stderr(&mut self) -> Result<Vec<u8>> {
        Ok(self.pipes.take_inbound(self.program_stderr)?)
    }

    /// 未取得の標準出力があるかどうか
    pub fn has_program_stdout(&self) -> bool {
        self.pipes.has_inbound(self.program_stdout)
    }

    /// 未取得の標準エラー出力があるかどうか
    pub fn has_program_stderr(&self) -> bool {
        self.pipes.has_inbound(self.program_stderr)
    }

    /// コマンドを待たずにI/Oを1回分進める
    ///
    /// デバッガの出力は次のコマンドや [`Session::wait_for`] で読まれるまで保持されます。
    pub fn pump_io(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.pump(timeout)
    }

    /// セッションを終了する（何度呼んでもよい）
    ///
    /// デバッガにSIGTERMを送って終了を待ち、チャネルと一時ファイルを片付けます。
    pub fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.state = SessionState::Closing;
        let mut outcome = Ok(());

        if let Some(mut child) = self.child.take() {
            let terminated = child.terminate().and_then(|()| child.wait());
            match terminated {
                Ok(status) => debug!(?status, "debugger exited"),
                Err(e) => {
                    warn!(error = %e, "failed to terminate debugger");
                    outcome = Err(e.into());
                }
            }
        }

        self.pipes.close_all();

        if let Some(wrapper) = self.exec_wrapper.take() {
            if let Err(e) = wrapper.remove() {
                warn!(error = %e, "failed to remove exec wrapper");
                outcome = outcome.and(Err(e));
            }
        }
        if let Some(script) = self.support_script.take() {
            if let Err(e) = script.close() {
                warn!(error = %e, "failed to remove support script");
                outcome = outcome.and(Err(e.into()));
            }
        }

        self.state = SessionState::Closed;
        outcome
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
