//! 接口状态探测
//!
//! 扫描 `can0..can6` 时需要区分"接口不存在"、"接口存在但未 UP"两种情况：
//! 前者在当前机型上是常态（并非每条总线都接了执行器），后者需要提示运维。
//! 只读 ioctl，无需特殊权限。

use crate::{CanDeviceError, CanDeviceErrorKind, CanError};
use libc::{AF_INET, IFF_UP, SIOCGIFFLAGS, SOCK_DGRAM, if_nametoindex, ifreq};
use std::ffi::CString;
use std::io;
use tracing::trace;

/// IFNAMSIZ - 1
const MAX_IFACE_NAME_LEN: usize = 15;

/// 接口管理态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Up,
    Down,
}

struct FdGuard(libc::c_int);

impl Drop for FdGuard {
    fn drop(&mut self) {
        if self.0 >= 0 {
            unsafe { libc::close(self.0) };
        }
    }
}

/// 查询接口管理态
///
/// - 接口名非法或不存在：`CanDeviceErrorKind::NotFound`
/// - 系统调用失败：`CanError::Io`
pub fn link_state(interface: &str) -> Result<LinkState, CanError> {
    if interface.is_empty() || interface.len() > MAX_IFACE_NAME_LEN {
        return Err(CanError::Device(CanDeviceError::new(
            CanDeviceErrorKind::NotFound,
            format!("invalid interface name '{}'", interface),
        )));
    }

    let c_iface = CString::new(interface).map_err(|e| {
        CanError::Device(CanDeviceError::new(
            CanDeviceErrorKind::NotFound,
            format!("invalid interface name '{}': {}", interface, e),
        ))
    })?;

    if unsafe { if_nametoindex(c_iface.as_ptr()) } == 0 {
        return Err(CanError::Device(CanDeviceError::new(
            CanDeviceErrorKind::NotFound,
            format!(
                "CAN interface '{}' does not exist ({})",
                interface,
                io::Error::last_os_error()
            ),
        )));
    }

    let mut ifr: ifreq = unsafe { std::mem::zeroed() };
    let name = interface.as_bytes();
    unsafe {
        std::ptr::copy_nonoverlapping(
            name.as_ptr(),
            ifr.ifr_name.as_mut_ptr() as *mut u8,
            name.len(),
        );
    }
    ifr.ifr_name[name.len()] = 0;

    let sockfd = unsafe { libc::socket(AF_INET, SOCK_DGRAM, 0) };
    if sockfd < 0 {
        return Err(CanError::Io(io::Error::last_os_error()));
    }
    let _guard = FdGuard(sockfd);

    let ret = unsafe { libc::ioctl(sockfd, SIOCGIFFLAGS, &mut ifr as *mut _ as *mut libc::c_void) };
    if ret < 0 {
        return Err(CanError::Io(io::Error::last_os_error()));
    }

    // ifru_flags 是 union 的第一个字段
    let flags = unsafe { *(std::ptr::addr_of!(ifr.ifr_ifru) as *const libc::c_short) };
    let state = if flags as i32 & IFF_UP != 0 {
        LinkState::Up
    } else {
        LinkState::Down
    };
    trace!("Interface '{}' link state: {:?}", interface, state);
    Ok(state)
}
