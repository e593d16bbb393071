//! `scan`：列出各接口上应答的执行器及其当前状态

use super::{connect, load_config};
use anyhow::{Result, bail};
use clap::Args;
use kbot_can::CanAdapter;
use kbot_driver::{ActuatorBusDriver, ScanReport};
use kbot_protocol::Telemetry;
use std::path::PathBuf;
use tracing::warn;

#[derive(Args, Debug)]
pub struct ScanCommand {
    /// 配置文件（TOML）
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl ScanCommand {
    pub fn execute(&self) -> Result<()> {
        let config = load_config(self.config.as_deref())?;
        let (driver, report) = connect(&config)?;
        print_scan(driver, &report)
    }
}

fn print_scan<A: CanAdapter>(mut driver: ActuatorBusDriver<A>, report: &ScanReport) -> Result<()> {
    if report.is_empty() {
        bail!("no actuators answered the scan");
    }

    let telemetry: Vec<_> = driver.poll_all();
    println!(
        "{:>4}  {:<24} {:<11} {:<6} {:>9} {:>9} {:>8} {:>7}  flags",
        "id", "joint", "type", "bus", "pos(rad)", "vel(r/s)", "tq(Nm)", "temp"
    );
    for (id, bus) in &report.found {
        let Some(actuator) = driver.actuator(*id) else {
            continue;
        };
        let cfg = actuator.config();
        let state = telemetry
            .iter()
            .find(|(tid, _)| tid == id)
            .and_then(|(_, r)| r.as_ref().ok());
        println!(
            "{:>4}  {:<24} {:<11} {:<6} {}",
            id,
            cfg.full_name,
            format!("{:?}", cfg.actuator_type),
            bus,
            format_state(state)
        );
    }
    for (id, bus) in report
        .found
        .iter()
        .filter(|(id, _)| driver.actuator(*id).is_none())
    {
        println!("{:>4}  {:<24} {:<11} {:<6}", id, "(not in robot table)", "-", bus);
    }

    if !report.missing.is_empty() {
        let missing: Vec<String> = report.missing.iter().map(|id| id.to_string()).collect();
        println!("missing: {}", missing.join(", "));
    }
    for fault in driver.take_fault_reports() {
        warn!(
            "Actuator {} reports {}",
            fault.actuator, fault.code.description
        );
    }
    Ok(())
}

fn format_state(state: Option<&Telemetry>) -> String {
    match state {
        Some(t) => format!(
            "{:>9.3} {:>9.3} {:>8.2} {:>6.1}C  0x{:02X}",
            t.position, t.velocity, t.torque, t.temperature, t.fault_flags
        ),
        None => format!("{:>9} {:>9} {:>8} {:>7}  -", "-", "-", "-", "-"),
    }
}
