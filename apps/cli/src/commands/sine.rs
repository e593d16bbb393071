//! `sine-wave`：低增益、低力矩的正弦诊断

use super::{confirm, connect, install_stop_handler, load_config};
use anyhow::{Result, bail};
use clap::Args;
use kbot_can::CanAdapter;
use kbot_control::{run_sine_wave, startup_checks};
use kbot_driver::{ActuatorBusDriver, ScanReport};
use kbot_protocol::ActuatorId;
use kbot_tools::FirmwareConfig;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::info;

#[derive(Args, Debug)]
pub struct SineWaveCommand {
    /// 配置文件（TOML）
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 跳过使能确认
    #[arg(short, long)]
    pub yes: bool,

    /// 运行时长（秒），缺省运行到 Ctrl-C
    #[arg(short, long)]
    pub duration: Option<f64>,
}

impl SineWaveCommand {
    pub fn execute(&self) -> Result<()> {
        let config = load_config(self.config.as_deref())?;
        let duration = match self.duration {
            Some(d) if !(d.is_finite() && d > 0.0) => bail!("--duration must be positive, got {}", d),
            Some(d) => Some(Duration::from_secs_f64(d)),
            None => None,
        };
        let stop = install_stop_handler()?;
        let (driver, report) = connect(&config)?;
        self.run_on(driver, &report, &config, duration, &stop)
    }

    fn run_on<A: CanAdapter>(
        &self,
        mut driver: ActuatorBusDriver<A>,
        report: &ScanReport,
        config: &FirmwareConfig,
        duration: Option<Duration>,
        stop: &AtomicBool,
    ) -> Result<()> {
        startup_checks(&mut driver, report, config.safety.max_startup_angle)?;

        let ids: Vec<ActuatorId> = report
            .found
            .iter()
            .map(|(id, _)| *id)
            .filter(|id| driver.actuator(*id).is_some())
            .collect();
        println!(
            "Sine wave: {} actuators, {} rad @ {} Hz, gain scaling {}, torque {:.0}%",
            ids.len(),
            config.sine.amplitude,
            config.sine.frequency_hz,
            config.sine.max_scaling,
            config.sine.torque_fraction * 100.0
        );
        if !confirm("Enable actuators and start the sine wave?", self.yes)? {
            info!("Aborted by operator");
            return Ok(());
        }
        if stop.load(Ordering::Acquire) {
            return Ok(());
        }

        let result = run_sine_wave(
            &mut driver,
            &ids,
            &config.sine,
            &config.safe_stop,
            duration,
            stop,
        );
        println!(
            "Sine wave finished: {} ticks, {} overruns, mean interval {:.1} us, jitter {:.1} us",
            result.ticks,
            result.overruns,
            result.intervals.mean_us,
            result.intervals.jitter_us()
        );
        if let Some(fault) = result.fault {
            bail!(
                "stopped early: actuator {} reports {}",
                fault.actuator,
                fault.code.description
            );
        }
        Ok(())
    }
}
