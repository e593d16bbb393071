//! 命令模块

pub mod run;
pub mod scan;
pub mod sine;

pub use run::{CommandSourceArg, RunCommand};
pub use scan::ScanCommand;
pub use sine::SineWaveCommand;

use anyhow::{Context, Result};
use kbot_can::SocketCanAdapter;
use kbot_driver::{ActuatorBusDriver, DriverBuilder, ScanReport};
use kbot_tools::FirmwareConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// `<config_dir>/kbot/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("kbot").join("config.toml"))
}

/// `--config` 优先；否则默认路径存在时使用它
pub fn resolve_config_path(explicit: Option<&Path>, fallback: Option<PathBuf>) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => fallback.filter(|p| p.exists()),
    }
}

pub fn load_config(explicit: Option<&Path>) -> Result<FirmwareConfig> {
    let path = resolve_config_path(explicit, default_config_path());
    match &path {
        Some(p) => info!("Loading config from {}", p.display()),
        None => info!("Using built-in configuration"),
    }
    FirmwareConfig::load_or_default(path.as_deref())
}

/// 按配置构造驱动 Builder
pub fn driver_builder(config: &FirmwareConfig) -> DriverBuilder {
    DriverBuilder::new(config.robot())
        .interfaces(config.bus.interfaces.iter().cloned())
        .io_timeout(config.bus.io_timeout())
        .ping_timeout(config.bus.ping_timeout())
        .missing_response_ttl(config.bus.missing_response_ttl())
        .scan_range(config.bus.scan_range())
}

/// 打开 SocketCAN 接口并扫描
pub fn connect(
    config: &FirmwareConfig,
) -> Result<(ActuatorBusDriver<SocketCanAdapter>, ScanReport)> {
    let (driver, report) = driver_builder(config)
        .connect()
        .context("failed to bring up CAN interfaces")?;
    info!(
        "Scan: {} found, {} missing, {} unexpected",
        report.found.len(),
        report.missing.len(),
        report.unexpected.len()
    );
    Ok((driver, report))
}

/// Ctrl-C → 停止标志
pub fn install_stop_handler() -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::AcqRel) {
            warn!("Stop already requested, waiting for safe stop");
        } else {
            info!("Stop requested");
        }
    })
    .context("failed to install Ctrl-C handler")?;
    Ok(stop)
}

/// 使能前确认，`--yes` 跳过
pub fn confirm(prompt: &str, assume_yes: bool) -> Result<bool> {
    if assume_yes {
        return Ok(true);
    }
    inquire::Confirm::new(prompt)
        .with_default(false)
        .prompt()
        .context("confirmation prompt failed")
}
