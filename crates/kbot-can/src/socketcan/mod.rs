//! SocketCAN 适配器（仅 Linux）
//!
//! 每条执行器总线对应一个 `SocketCanAdapter`。接口的波特率等配置由 `ip link` 完成，
//! 这里只负责打开 socket、收发 29-bit 扩展帧，并把控制器错误帧翻译为 `CanError`。
//!
//! 接收使用 `poll` 实现有界等待：控制环对每个执行器只给出毫秒级的应答预算，
//! 错误帧不计入预算之外的额外等待。

use crate::{CanAdapter, CanDeviceError, CanDeviceErrorKind, CanError, KbotFrame};
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use socketcan::{
    CanError as SocketCanError, CanErrorFrame, CanFrame, CanSocket, EmbeddedFrame, ExtendedId,
    Frame, Socket, StandardId,
};
use std::os::fd::BorrowedFd;
use std::os::unix::io::AsRawFd;
use std::time::{Duration, Instant};
use tracing::{error, trace, warn};

mod interface_check;

pub use interface_check::{LinkState, link_state};

/// 默认接收超时
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_millis(2);

/// SocketCAN 适配器
///
/// ```no_run
/// use kbot_can::{CanAdapter, KbotFrame, SocketCanAdapter};
///
/// let mut bus = SocketCanAdapter::new("can0").unwrap();
/// bus.send(KbotFrame::new_extended(0x0000_FD0B, &[0; 8])).unwrap();
/// ```
#[derive(Debug)]
pub struct SocketCanAdapter {
    socket: CanSocket,
    interface: String,
    read_timeout: Duration,
}

impl SocketCanAdapter {
    /// 打开接口
    ///
    /// 接口不存在返回 `NotFound`，存在但未 UP 返回 `NotUp`（附带启用命令提示）。
    pub fn new(interface: impl Into<String>) -> Result<Self, CanError> {
        let interface = interface.into();

        if link_state(&interface)? == LinkState::Down {
            return Err(CanError::Device(CanDeviceError::new(
                CanDeviceErrorKind::NotUp,
                format!(
                    "CAN interface '{}' is not UP, bring it up with:\n  sudo ip link set {} up type can bitrate 1000000",
                    interface, interface
                ),
            )));
        }

        let socket = CanSocket::open(&interface).map_err(|e| {
            let kind = if e.kind() == std::io::ErrorKind::PermissionDenied {
                CanDeviceErrorKind::AccessDenied
            } else {
                CanDeviceErrorKind::Backend
            };
            CanError::Device(CanDeviceError::new(
                kind,
                format!("failed to open CAN interface '{}': {}", interface, e),
            ))
        })?;

        // 关闭回环：本机发出的指令帧不应出现在应答流中
        let loopback: libc::c_int = 0;
        let ret = unsafe {
            libc::setsockopt(
                socket.as_raw_fd(),
                libc::SOL_CAN_RAW,
                libc::CAN_RAW_LOOPBACK,
                &loopback as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            warn!(
                "Failed to disable CAN_RAW_LOOPBACK on '{}': {}",
                interface,
                std::io::Error::last_os_error()
            );
        }

        socket
            .set_read_timeout(DEFAULT_RECEIVE_TIMEOUT)
            .map_err(CanError::Io)?;

        trace!("SocketCAN interface '{}' opened", interface);
        Ok(Self {
            socket,
            interface,
            read_timeout: DEFAULT_RECEIVE_TIMEOUT,
        })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// 等待 socket 可读，`false` 表示超时
    fn wait_readable(&self, remaining: Duration) -> Result<bool, CanError> {
        // 向上取整到毫秒，避免亚毫秒预算被截断成非阻塞轮询
        let ms = remaining.as_micros().div_ceil(1000).min(u16::MAX as u128) as u16;
        let fd = self.socket.as_raw_fd();
        let pollfd = PollFd::new(unsafe { BorrowedFd::borrow_raw(fd) }, PollFlags::POLLIN);
        match poll(&mut [pollfd], PollTimeout::from(ms)) {
            Ok(0) => Ok(false),
            Ok(_) => Ok(true),
            Err(nix::errno::Errno::EINTR) => Ok(false),
            Err(e) => Err(CanError::Io(std::io::Error::other(format!(
                "poll on '{}' failed: {}",
                self.interface, e
            )))),
        }
    }

    /// 错误帧分类：致命错误返回 `Err`，其余记录后忽略
    fn check_error_frame(&self, frame: CanFrame) -> Result<(), CanError> {
        let Ok(error_frame) = CanErrorFrame::try_from(frame) else {
            warn!("Unparseable error frame on '{}', ignoring", self.interface);
            return Ok(());
        };
        match SocketCanError::from(error_frame) {
            SocketCanError::BusOff => {
                error!("CAN bus off on '{}'", self.interface);
                Err(CanError::BusOff)
            },
            SocketCanError::ControllerProblem(problem) => {
                let text = problem.to_string();
                if text.to_ascii_lowercase().contains("overflow") {
                    error!("CAN buffer overflow on '{}': {}", self.interface, text);
                    Err(CanError::BufferOverflow)
                } else {
                    warn!("CAN controller problem on '{}': {}", self.interface, text);
                    Ok(())
                }
            },
            other => {
                warn!("CAN error frame on '{}': {}", self.interface, other);
                Ok(())
            },
        }
    }
}

fn to_kbot_frame(frame: &CanFrame) -> KbotFrame {
    let mut data = [0u8; 8];
    let payload = frame.data();
    let len = payload.len().min(8);
    data[..len].copy_from_slice(&payload[..len]);
    KbotFrame {
        id: frame.raw_id(),
        data,
        len: frame.dlc().min(8) as u8,
        is_extended: frame.is_extended(),
        timestamp_us: 0,
    }
}

impl Drop for SocketCanAdapter {
    fn drop(&mut self) {
        trace!("SocketCAN interface '{}' closed", self.interface);
    }
}

impl CanAdapter for SocketCanAdapter {
    fn name(&self) -> &str {
        &self.interface
    }

    fn send(&mut self, frame: KbotFrame) -> Result<(), CanError> {
        let payload = frame.data_slice();
        let can_frame = if frame.is_extended {
            ExtendedId::new(frame.id).and_then(|id| CanFrame::new(id, payload))
        } else {
            StandardId::new(frame.id as u16).and_then(|id| CanFrame::new(id, payload))
        }
        .ok_or_else(|| {
            CanError::Device(CanDeviceError::new(
                CanDeviceErrorKind::InvalidFrame,
                format!("cannot build CAN frame with ID 0x{:X}", frame.id),
            ))
        })?;

        self.socket.write_frame(&can_frame).map_err(CanError::Io)?;
        trace!("[{}] TX 0x{:08X} len={}", self.interface, frame.id, frame.len);
        Ok(())
    }

    fn receive(&mut self) -> Result<KbotFrame, CanError> {
        let deadline = Instant::now() + self.read_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !self.wait_readable(remaining)? {
                return Err(CanError::Timeout);
            }
            let can_frame = match self.socket.read_frame() {
                Ok(f) => f,
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    return Err(CanError::Timeout);
                },
                Err(e) => return Err(CanError::Io(e)),
            };
            if can_frame.is_error_frame() {
                self.check_error_frame(can_frame)?;
                if Instant::now() >= deadline {
                    return Err(CanError::Timeout);
                }
                continue;
            }
            let frame = to_kbot_frame(&can_frame);
            trace!("[{}] RX 0x{:08X} len={}", self.interface, frame.id, frame.len);
            return Ok(frame);
        }
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vcan_available() -> bool {
        matches!(link_state("vcan0"), Ok(LinkState::Up))
    }

    #[test]
    fn test_open_missing_interface() {
        match SocketCanAdapter::new("kbotcan98") {
            Err(CanError::Device(e)) => assert_eq!(e.kind, CanDeviceErrorKind::NotFound),
            other => panic!("expected NotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_vcan_receive_times_out() {
        if !vcan_available() {
            eprintln!("vcan0 not available, skipping");
            return;
        }
        let mut adapter = SocketCanAdapter::new("vcan0").unwrap();
        let start = Instant::now();
        let result = adapter.receive_timeout(Duration::from_millis(5));
        assert!(matches!(result, Err(CanError::Timeout)));
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[test]
    fn test_vcan_send_extended() {
        if !vcan_available() {
            eprintln!("vcan0 not available, skipping");
            return;
        }
        let mut adapter = SocketCanAdapter::new("vcan0").unwrap();
        assert!(
            adapter
                .send(KbotFrame::new_extended(0x0200_FD0B, &[0; 8]))
                .is_ok()
        );
    }
}
