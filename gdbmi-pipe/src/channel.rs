//! チャネル管理
//!
//! チャネルは子プロセスとの1本の論理バイトストリームです。
//! ホスト側の記述子と、子プロセスへ渡す側の記述子を組で持ち、
//! 方向ごとにバッファと半クローズ状態を管理します。

use crate::errors::{Direction, PipeError};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::PollFlags;
use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use std::fmt;
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use tracing::{debug, trace};

/// 1回のreadで読み込むバイト数
const READ_CHUNK_SIZE: usize = 4096;

/// 1回のtickで1つの記述子から読み込む最大回数
///
/// 書き込みが途切れない記述子があっても、他の記述子の処理が遅れないようにする。
pub const MAX_READS_PER_TICK: usize = 16;

/// チャネルID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub(crate) usize);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// チャネルの向き（ホストから見た向き）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    /// 子プロセスが書き、ホストが読む（パイプ）
    Inbound,
    /// ホストが書き、子プロセスが読む（パイプ）
    Outbound,
    /// 両方向（UNIXドメインソケットペア）
    Bidirectional,
}

/// 1回の読み込み処理の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct ReadOutcome {
    pub received: usize,
    pub eof: bool,
}

/// チャネル
pub struct Channel {
    id: ChannelId,
    mode: ChannelMode,
    /// 子プロセス側での記述子番号
    child_fds: Vec<RawFd>,
    /// ホスト側の記述子（ノンブロッキング）
    host: Option<File>,
    /// 子プロセスへ渡す記述子（spawn後に閉じる）
    child: Option<OwnedFd>,
    inbound: Vec<u8>,
    outbound: Vec<u8>,
    inbound_closed: bool,
    outbound_closed: bool,
    failed: bool,
}

impl Channel {
    /// OSのパイプまたはソケットペアを作成してチャネルを開く
    pub(crate) fn open(
        id: ChannelId,
        mode: ChannelMode,
        child_fds: &[RawFd],
    ) -> Result<Self, PipeError> {
        let (host, child) = match mode {
            ChannelMode::Inbound => {
                let (read, write) =
                    nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(PipeError::Create)?;
                (read, write)
            }
            ChannelMode::Outbound => {
                let (read, write) =
                    nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(PipeError::Create)?;
                (write, read)
            }
            ChannelMode::Bidirectional => socketpair(
                AddressFamily::Unix,
                SockType::Stream,
                None,
                SockFlag::SOCK_CLOEXEC,
            )
            .map_err(PipeError::Create)?,
        };

        // 子プロセス側はブロッキングのまま、ホスト側だけノンブロッキングにする
        set_nonblocking(&host)?;

        debug!(%id, ?mode, ?child_fds, "opened channel");

        Ok(Self {
            id,
            mode,
            child_fds: child_fds.to_vec(),
            host: Some(File::from(host)),
            child: Some(child),
            inbound: Vec::new(),
            outbound: Vec::new(),
            inbound_closed: mode == ChannelMode::Outbound,
            outbound_closed: mode == ChannelMode::Inbound,
            failed: false,
        })
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn mode(&self) -> ChannelMode {
        self.mode
    }

    /// 子プロセス側での記述子番号
    pub fn child_fds(&self) -> &[RawFd] {
        &self.child_fds
    }

    pub fn is_inbound_closed(&self) -> bool {
        self.inbound_closed
    }

    pub fn is_outbound_closed(&self) -> bool {
        self.outbound_closed
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// 受信済みで未取得のバイト数
    pub fn pending_inbound(&self) -> usize {
        self.inbound.len()
    }

    /// 送信待ちのバイト数
    pub fn pending_outbound(&self) -> usize {
        self.outbound.len()
    }

    /// 子プロセスへ渡す記述子
    pub(crate) fn child_end(&self) -> Option<BorrowedFd<'_>> {
        self.child.as_ref().map(AsFd::as_fd)
    }

    /// spawn後に親プロセス側で子プロセス用の記述子を閉じる
    pub(crate) fn release_child_end(&mut self) {
        self.child = None;
    }

    #[cfg(test)]
    pub(crate) fn take_child_end(&mut self) -> Option<OwnedFd> {
        self.child.take()
    }

    /// pollで監視する記述子とイベント
    ///
    /// 送信バッファが空のときは書き込み可能を監視しない。
    pub(crate) fn poll_interest(&self) -> Option<(BorrowedFd<'_>, PollFlags)> {
        let host = self.host.as_ref()?;
        let mut flags = PollFlags::empty();
        if !self.inbound_closed {
            flags |= PollFlags::POLLIN;
        }
        if self.wants_write() {
            flags |= PollFlags::POLLOUT;
        }
        if flags.is_empty() {
            None
        } else {
            Some((host.as_fd(), flags))
        }
    }

    pub(crate) fn wants_write(&self) -> bool {
        !self.outbound_closed && !self.outbound.is_empty()
    }

    /// 読み込み可能になった記述子から受信バッファへ読み込む
    pub(crate) fn fill_inbound(&mut self) -> Result<ReadOutcome, PipeError> {
        if self.failed {
            return Err(PipeError::Failed(self.id));
        }
        if self.inbound_closed {
            return Err(self.half_closed(Direction::Inbound));
        }
        let Some(host) = self.host.as_mut() else {
            return Err(PipeError::Failed(self.id));
        };

        let mut outcome = ReadOutcome::default();
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let mut reads = 0;
        while reads < MAX_READS_PER_TICK {
            match host.read(&mut chunk) {
                Ok(0) => {
                    outcome.eof = true;
                    break;
                }
                Ok(n) => {
                    self.inbound.extend_from_slice(chunk.get(..n).unwrap_or_default());
                    outcome.received += n;
                    reads += 1;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(source) => {
                    self.fail();
                    return Err(PipeError::Io {
                        channel: self.id,
                        source,
                    });
                }
            }
        }

        if outcome.eof {
            debug!(id = %self.id, "inbound end of stream");
            self.inbound_closed = true;
            self.release_host_if_done();
        }
        trace!(id = %self.id, received = outcome.received, "read");
        Ok(outcome)
    }

    /// 書き込み可能になった記述子へ送信バッファを書き出す
    ///
    /// 書き込めた分だけ送信バッファの先頭から取り除く。
    pub(crate) fn flush_outbound(&mut self) -> Result<usize, PipeError> {
        if self.failed {
            return Err(PipeError::Failed(self.id));
        }
        if self.outbound_closed {
            return Err(self.half_closed(Direction::Outbound));
        }
        let Some(host) = self.host.as_mut() else {
            return Err(PipeError::Failed(self.id));
        };

        loop {
            match host.write(&self.outbound) {
                Ok(n) => {
                    self.outbound.drain(..n);
                    trace!(id = %self.id, written = n, "write");
                    return Ok(n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(0),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                    // 相手が読み込み側を閉じた
                    debug!(
                        id = %self.id,
                        discarded = self.outbound.len(),
                        "outbound closed by peer"
                    );
                    self.outbound.clear();
                    self.outbound_closed = true;
                    self.release_host_if_done();
                    return Ok(0);
                }
                Err(source) => {
                    self.fail();
                    return Err(PipeError::Io {
                        channel: self.id,
                        source,
                    });
                }
            }
        }
    }

    /// 受信バッファの内容を取り出す
    ///
    /// 相手側がストリームを閉じた後、バッファが空の状態で呼ぶとエラーになる。
    pub(crate) fn take_inbound(&mut self) -> Result<Vec<u8>, PipeError> {
        if !self.inbound.is_empty() {
            return Ok(std::mem::take(&mut self.inbound));
        }
        if self.failed {
            return Err(PipeError::Failed(self.id));
        }
        if self.inbound_closed {
            return Err(self.half_closed(Direction::Inbound));
        }
        Ok(Vec::new())
    }

    /// 送信バッファに追加する
    pub(crate) fn queue_outbound(&mut self, data: &[u8]) -> Result<(), PipeError> {
        if self.failed {
            return Err(PipeError::Failed(self.id));
        }
        if self.outbound_closed {
            return Err(self.half_closed(Direction::Outbound));
        }
        self.outbound.extend_from_slice(data);
        Ok(())
    }

    /// 両方向を閉じる（何度呼んでもよい）
    pub(crate) fn close(&mut self) {
        if self.host.is_some() || self.child.is_some() {
            debug!(id = %self.id, "closing channel");
        }
        self.host = None;
        self.child = None;
        self.inbound_closed = true;
        self.outbound_closed = true;
    }

    /// 受信済みのデータは取り出せるまで残す
    fn fail(&mut self) {
        self.close();
        self.outbound.clear();
        self.failed = true;
    }

    /// 両方向とも閉じたらホスト側の記述子を解放する
    fn release_host_if_done(&mut self) {
        if self.inbound_closed && self.outbound_closed {
            self.host = None;
        }
    }

    fn half_closed(&self, direction: Direction) -> PipeError {
        PipeError::HalfClosed {
            channel: self.id,
            direction,
        }
    }
}

fn set_nonblocking(fd: &OwnedFd) -> Result<(), PipeError> {
    let raw = fd.as_raw_fd();
    let flags = fcntl(raw, FcntlArg::F_GETFL).map_err(PipeError::Create)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(raw, FcntlArg::F_SETFL(flags)).map_err(PipeError::Create)?;
    Ok(())
}
