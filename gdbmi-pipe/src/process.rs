//! 子プロセスの起動と終了待ち

use crate::errors::PipeError;
use crate::Result;
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::signal::{kill, signal, SigHandler, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{dup2, fork, ForkResult, Pid};
use std::ffi::CString;
use std::fs::File;
use std::io::Read;
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;
use tracing::debug;

/// 子プロセスへ割り当てられる記述子番号の上限（この値未満）
const FIRST_SCRATCH_FD: RawFd = 10;

/// 一度に割り当てられる記述子の最大数
const MAX_MAPPED_FDS: usize = 16;

/// 子プロセスの終了状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// 終了コード付きで終了
    Exited(i32),
    /// シグナルで終了
    Signaled(Signal),
}

/// 起動した子プロセス
pub struct ChildProcess {
    pid: Pid,
    status: Option<ExitStatus>,
}

impl ChildProcess {
    /// 記述子を付け替えて子プロセスを起動する
    ///
    /// `fd_map` は（子プロセス側の番号, 親プロセス側の記述子）の組です。
    /// 対応表にない記述子のうち、0〜2は親プロセスから継承します。
    /// `program` はPATHから検索されます。
    pub fn spawn<P: AsRef<Path>>(
        program: P,
        args: &[String],
        fd_map: &[(RawFd, RawFd)],
    ) -> Result<Self> {
        let program_path = program
            .as_ref()
            .to_str()
            .ok_or_else(|| PipeError::InvalidArgument("program path is not UTF-8".to_string()))?;
        let program_cstring = CString::new(program_path)
            .map_err(|_| PipeError::InvalidArgument(format!("NUL in program {program_path:?}")))?;

        let mut argv = vec![program_cstring.clone()];
        for arg in args {
            argv.push(
                CString::new(arg.as_str())
                    .map_err(|_| PipeError::InvalidArgument(format!("NUL in argument {arg:?}")))?,
            );
        }
        // fork後の子プロセスではメモリを確保できないので、execvpに渡す配列を先に作る
        let argv_ptrs: Vec<*const nix::libc::c_char> = argv
            .iter()
            .map(|arg| arg.as_ptr())
            .chain(std::iter::once(std::ptr::null()))
            .collect();

        if fd_map.len() > MAX_MAPPED_FDS {
            return Err(PipeError::InvalidArgument(format!(
                "at most {MAX_MAPPED_FDS} descriptors can be mapped"
            )));
        }
        if let Some((target, _)) = fd_map
            .iter()
            .find(|(target, _)| !(0..FIRST_SCRATCH_FD).contains(target))
        {
            return Err(PipeError::InvalidArgument(format!(
                "child descriptor {target} is out of range"
            )));
        }

        let spawn_error = |source: Errno| PipeError::Spawn {
            program: program_path.to_string(),
            source,
        };

        // exec失敗を親に伝えるためのパイプ（exec成功時はCLOEXECで閉じられる）
        let (error_read, error_write) =
            nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(spawn_error)?;

        // forkしてプロセスを生成
        match unsafe { fork() }.map_err(spawn_error)? {
            ForkResult::Parent { child } => {
                drop(error_write);

                let mut errno_bytes = [0u8; 4];
                let mut report = File::from(error_read);
                let exec_error = match report.read(&mut errno_bytes) {
                    Ok(4) => Some(Errno::from_raw(i32::from_ne_bytes(errno_bytes))),
                    _ => None,
                };

                if let Some(errno) = exec_error {
                    let _ = waitpid(child, None);
                    return Err(spawn_error(errno));
                }

                debug!(pid = child.as_raw(), program = program_path, "spawned child process");
                Ok(Self {
                    pid: child,
                    status: None,
                })
            }
            ForkResult::Child => {
                // 子プロセス: メモリ確保を伴う処理はここでは行わない
                let report_fd = fcntl(
                    error_write.as_raw_fd(),
                    FcntlArg::F_DUPFD_CLOEXEC(FIRST_SCRATCH_FD),
                )
                .unwrap_or(error_write.as_raw_fd());
                let errno = match remap_descriptors(fd_map) {
                    Ok(()) => {
                        let _ = unsafe { signal(Signal::SIGPIPE, SigHandler::SigDfl) };
                        unsafe { nix::libc::execvp(program_cstring.as_ptr(), argv_ptrs.as_ptr()) };
                        Errno::last()
                    }
                    Err(errno) => errno,
                };

                let bytes = (errno as i32).to_ne_bytes();
                unsafe {
                    nix::libc::write(
                        report_fd,
                        bytes.as_ptr().cast(),
                        bytes.len(),
                    );
                    nix::libc::_exit(127)
                }
            }
        }
    }

    /// プロセスIDを取得する
    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    /// SIGTERMを送って終了を要求する
    ///
    /// 既に終了している場合は何もしない。
    pub fn terminate(&self) -> Result<()> {
        if self.status.is_some() {
            return Ok(());
        }
        match kill(self.pid, Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(source) => Err(PipeError::Signal {
                pid: self.pid(),
                source,
            }),
        }
    }

    /// プロセスの終了を待機する
    pub fn wait(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        loop {
            match waitpid(self.pid, None) {
                Ok(WaitStatus::Exited(_, code)) => {
                    return Ok(self.record(ExitStatus::Exited(code)));
                }
                Ok(WaitStatus::Signaled(_, signal, _)) => {
                    return Ok(self.record(ExitStatus::Signaled(signal)));
                }
                Ok(_) | Err(Errno::EINTR) => continue,
                Err(source) => {
                    return Err(PipeError::Wait {
                        pid: self.pid(),
                        source,
                    })
                }
            }
        }
    }

    fn record(&mut self, status: ExitStatus) -> ExitStatus {
        debug!(pid = self.pid(), ?status, "child process exited");
        self.status = Some(status);
        status
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if self.status.is_none() {
            let _ = kill(self.pid, Signal::SIGKILL);
            let _ = waitpid(self.pid, None);
        }
    }
}

/// fork後の子プロセスで記述子を付け替える
///
/// 付け替え先の番号が他の付け替え元と重なっても壊れないよう、
/// いったん全ての付け替え元を高い番号へ複製してからdup2する。
fn remap_descriptors(fd_map: &[(RawFd, RawFd)]) -> std::result::Result<(), Errno> {
    let mut scratch = [0 as RawFd; MAX_MAPPED_FDS];
    for ((_, source), slot) in fd_map.iter().zip(scratch.iter_mut()) {
        *slot = fcntl(*source, FcntlArg::F_DUPFD_CLOEXEC(FIRST_SCRATCH_FD))?;
    }
    for ((target, _), copy) in fd_map.iter().zip(scratch.iter()) {
        dup2(*copy, *target)?;
    }
    Ok(())
}
