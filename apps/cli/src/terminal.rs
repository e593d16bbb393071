//! 键盘原始模式
//!
//! 关闭行缓冲与回显，逐字节读取；`poll` 超时返回 `TimedOut`，
//! 读线程借此观察停止标志。`Drop` 时恢复终端设置。
//! `ISIG` 保持开启，Ctrl-C 仍然产生 SIGINT。

use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::termios::{LocalFlags, SetArg, SpecialCharacterIndices, Termios, tcgetattr, tcsetattr};
use std::io::{self, Read};
use std::os::fd::AsFd;
use tracing::{debug, warn};

/// 单次等待按键的时长（ms）
const POLL_TIMEOUT_MS: u16 = 100;

/// 原始模式的标准输入
pub struct RawStdin {
    /// 非 TTY 时为 `None`，不修改终端
    original: Option<Termios>,
}

impl RawStdin {
    pub fn enable() -> io::Result<Self> {
        let stdin = io::stdin();
        let original = match tcgetattr(stdin.as_fd()) {
            Ok(t) => t,
            Err(e) => {
                debug!("stdin is not a terminal ({}), reading without raw mode", e);
                return Ok(Self { original: None });
            },
        };

        let mut raw = original.clone();
        raw.local_flags.remove(LocalFlags::ICANON | LocalFlags::ECHO);
        raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
        tcsetattr(stdin.as_fd(), SetArg::TCSANOW, &raw).map_err(io::Error::from)?;

        Ok(Self {
            original: Some(original),
        })
    }
}

impl Read for RawStdin {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let stdin = io::stdin();
        let fd = stdin.as_fd();
        let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
        let ready = poll(&mut fds, PollTimeout::from(POLL_TIMEOUT_MS)).map_err(io::Error::from)?;
        if ready == 0 {
            return Err(io::ErrorKind::TimedOut.into());
        }
        // 绕过 Stdin 的内部缓冲，poll 才能反映真实可读状态
        nix::unistd::read(fd, buf).map_err(io::Error::from)
    }
}

impl Drop for RawStdin {
    fn drop(&mut self) {
        if let Some(original) = &self.original
            && let Err(e) = tcsetattr(io::stdin().as_fd(), SetArg::TCSANOW, original)
        {
            warn!("Failed to restore terminal settings: {}", e);
        }
    }
}
