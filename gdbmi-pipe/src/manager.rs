//! 子プロセスとのパイプをまとめて管理する
//!
//! チャネルごとにスレッドを立てるのではなく、pollで準備完了の記述子を問い合わせ、
//! 1回のtickで読み書きできるだけ処理します。

use crate::channel::{Channel, ChannelId, ChannelMode};
use crate::errors::PipeError;
use crate::Result;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;
use tracing::{trace, warn};

/// 1回のtickの結果
#[derive(Debug, Default)]
pub struct TickReport {
    /// 新たにデータを受信したチャネル
    pub received: Vec<ChannelId>,
    /// 今回のtickでEOFに達したチャネル
    pub eof: Vec<ChannelId>,
    /// I/Oエラーで使えなくなったチャネル
    pub failed: Vec<(ChannelId, PipeError)>,
}

impl TickReport {
    /// 何も起きなかったかどうか
    pub fn is_idle(&self) -> bool {
        self.received.is_empty() && self.eof.is_empty() && self.failed.is_empty()
    }
}

/// パイプマネージャ
#[derive(Default)]
pub struct PipeManager {
    channels: Vec<Channel>,
}

impl PipeManager {
    /// 新しいパイプマネージャを作成する
    pub fn new() -> Self {
        Self::default()
    }

    /// チャネルを開く
    ///
    /// `child_fds` は子プロセス側で割り当てる記述子番号です。
    /// 双方向チャネルは複数の番号（例えば0と1）に同じソケットを割り当てられます。
    pub fn open_channel(&mut self, mode: ChannelMode, child_fds: &[RawFd]) -> Result<ChannelId> {
        let id = ChannelId(self.channels.len());
        let channel = Channel::open(id, mode, child_fds)?;
        self.channels.push(channel);
        Ok(id)
    }

    /// チャネルを取得する
    pub fn channel(&self, id: ChannelId) -> Result<&Channel> {
        self.channels
            .get(id.0)
            .ok_or(PipeError::UnknownChannel(id))
    }

    fn channel_mut(&mut self, id: ChannelId) -> Result<&mut Channel> {
        self.channels
            .get_mut(id.0)
            .ok_or(PipeError::UnknownChannel(id))
    }

    /// spawnに渡す記述子の対応表（子プロセス側の番号, 親プロセス側の記述子）
    pub fn child_fd_map(&self) -> Vec<(RawFd, RawFd)> {
        self.channels
            .iter()
            .filter_map(|channel| {
                let source = channel.child_end()?.as_raw_fd();
                Some(
                    channel
                        .child_fds()
                        .iter()
                        .map(move |&target| (target, source)),
                )
            })
            .flatten()
            .collect()
    }

    /// spawn後に子プロセス用の記述子を親プロセス側で閉じる
    ///
    /// これを行わないと、子プロセスが終了してもEOFが届かない。
    pub fn release_child_ends(&mut self) {
        for channel in &mut self.channels {
            channel.release_child_end();
        }
    }

    /// 送信バッファにデータを追加する
    pub fn queue_outbound(&mut self, id: ChannelId, data: &[u8]) -> Result<()> {
        self.channel_mut(id)?.queue_outbound(data)
    }

    /// 受信バッファの内容を取り出す
    ///
    /// EOF後にバッファが空の状態で呼ぶと [`PipeError::HalfClosed`] を返します。
    pub fn take_inbound(&mut self, id: ChannelId) -> Result<Vec<u8>> {
        self.channel_mut(id)?.take_inbound()
    }

    /// 未取得の受信データがあるかどうか
    pub fn has_inbound(&self, id: ChannelId) -> bool {
        self.channel(id).is_ok_and(|c| c.pending_inbound() > 0)
    }

    /// 受信方向がまだ開いているかどうか
    pub fn is_inbound_open(&self, id: ChannelId) -> bool {
        self.channel(id).is_ok_and(|c| !c.is_inbound_closed())
    }

    /// 1回分の多重化I/Oを行う
    ///
    /// `timeout` が `None` の場合は、いずれかの記述子が準備完了になるまで待機します。
    /// 監視対象が1つもない場合は待機せずに戻ります。
    pub fn tick(&mut self, timeout: Option<Duration>) -> Result<TickReport> {
        let mut report = TickReport::default();

        let ready: Vec<(usize, PollFlags)> = {
            let mut slots = Vec::new();
            let mut fds = Vec::new();
            for (index, channel) in self.channels.iter().enumerate() {
                if let Some((fd, flags)) = channel.poll_interest() {
                    slots.push(index);
                    fds.push(PollFd::new(fd, flags));
                }
            }

            if fds.is_empty() {
                trace!("no channel to poll");
                return Ok(report);
            }

            match poll(&mut fds, poll_timeout(timeout)) {
                Ok(_) => {}
                Err(Errno::EINTR) => return Ok(report),
                Err(e) => return Err(PipeError::Poll(e)),
            }

            slots
                .into_iter()
                .zip(fds.iter())
                .filter_map(|(index, fd)| {
                    fd.revents()
                        .filter(|revents| !revents.is_empty())
                        .map(|revents| (index, revents))
                })
                .collect()
        };

        for (index, revents) in ready {
            let Some(channel) = self.channels.get_mut(index) else {
                continue;
            };
            let id = channel.id();
            trace!(%id, ?revents, "ready");

            let readable = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR;
            if revents.intersects(readable) && !channel.is_inbound_closed() {
                match channel.fill_inbound() {
                    Ok(outcome) => {
                        if outcome.received > 0 {
                            report.received.push(id);
                        }
                        if outcome.eof {
                            report.eof.push(id);
                        }
                    }
                    Err(e) => {
                        warn!(%id, error = %e, "channel failed while reading");
                        report.failed.push((id, e));
                        continue;
                    }
                }
            }

            let writable = PollFlags::POLLOUT | PollFlags::POLLHUP | PollFlags::POLLERR;
            if revents.intersects(writable) && channel.wants_write() {
                if let Err(e) = channel.flush_outbound() {
                    warn!(%id, error = %e, "channel failed while writing");
                    report.failed.push((id, e));
                }
            }
        }

        Ok(report)
    }

    /// チャネルを両方向とも閉じる
    pub fn close(&mut self, id: ChannelId) -> Result<()> {
        self.channel_mut(id)?.close();
        Ok(())
    }

    /// すべてのチャネルを閉じる（既に閉じている方向があっても構わない）
    pub fn close_all(&mut self) {
        for channel in &mut self.channels {
            channel.close();
        }
    }
}

fn poll_timeout(timeout: Option<Duration>) -> PollTimeout {
    match timeout {
        None => PollTimeout::NONE,
        Some(duration) => u16::try_from(duration.as_millis())
            .map(PollTimeout::from)
            .unwrap_or(PollTimeout::MAX),
    }
}
