//! `run`：扫描 → 启动检查 → 确认 → 归零 → 控制循环 → 安全停机

use super::{confirm, connect, install_stop_handler, load_config};
use crate::terminal::RawStdin;
use anyhow::{Context, Result, bail};
use clap::{Args, ValueEnum};
use kbot_can::CanAdapter;
use kbot_control::command::Gesture;
use kbot_control::{
    CommandArbiter, CommandSourceKind, ControlLoop, DummyImu, HoldPosePolicy, KeyboardSource,
    LoopReport, PolicyExecutor, PolicyMetadata, StopReason, UdpCommandListener, enable_and_home,
    spawn_keyboard_reader, startup_checks,
};
use kbot_driver::{ActuatorBusDriver, ScanReport};
use kbot_tools::{FirmwareConfig, TickLogger, default_log_dir};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use tracing::{info, warn};

/// 命令源
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CommandSourceArg {
    Keyboard,
    Udp,
}

impl From<CommandSourceArg> for CommandSourceKind {
    fn from(arg: CommandSourceArg) -> Self {
        match arg {
            CommandSourceArg::Keyboard => CommandSourceKind::Keyboard,
            CommandSourceArg::Udp => CommandSourceKind::Udp,
        }
    }
}

/// 运行策略
#[derive(Args, Debug)]
pub struct RunCommand {
    /// 策略元数据（JSON：joint_names, command_names）
    #[arg(short, long)]
    pub policy: PathBuf,

    /// 命令源
    #[arg(long, value_enum, default_value_t = CommandSourceArg::Keyboard)]
    pub command_source: CommandSourceArg,

    /// 配置文件（TOML）
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 跳过使能确认
    #[arg(short, long)]
    pub yes: bool,

    /// tick 记录目录，缺省 `~/kinfer-logs/<policy>_<timestamp>`
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// 运行指定 tick 数后停止
    #[arg(long)]
    pub max_ticks: Option<u64>,
}

impl RunCommand {
    pub fn execute(&self) -> Result<()> {
        let mut config = load_config(self.config.as_deref())?;
        if self.max_ticks.is_some() {
            config.control_loop.max_ticks = self.max_ticks;
        }
        let robot = config.robot();

        let metadata = PolicyMetadata::load(&self.policy)
            .with_context(|| format!("failed to load policy metadata {}", self.policy.display()))?;
        info!(
            "Policy '{}': {} joints, {} commands",
            metadata.name.as_deref().unwrap_or("unnamed"),
            metadata.joint_names.len(),
            metadata.command_names.len()
        );
        let policy = HoldPosePolicy::new(metadata, &robot)?;
        let executor = PolicyExecutor::new(Box::new(policy), &robot)?;

        let stop = install_stop_handler()?;
        let (driver, report) = connect(&config)?;
        self.run_on(driver, &report, &config, executor, stop)
    }

    fn run_on<A: CanAdapter>(
        &self,
        mut driver: ActuatorBusDriver<A>,
        report: &ScanReport,
        config: &FirmwareConfig,
        executor: PolicyExecutor,
        stop: Arc<AtomicBool>,
    ) -> Result<()> {
        startup_checks(&mut driver, report, config.safety.max_startup_angle)?;

        if !confirm("Enable actuators and move to the home pose?", self.yes)? {
            info!("Aborted by operator");
            return Ok(());
        }
        if stop.load(Ordering::Acquire) {
            info!("Stop requested before homing");
            return Ok(());
        }

        let ids = executor.layout().ids().to_vec();
        enable_and_home(&mut driver, &ids, &config.homing, 1.0)?;

        let policy = policy_name(executor.metadata().name.as_deref(), &self.policy);
        let log_dir = self
            .log_dir
            .clone()
            .or_else(|| config.log.dir.clone())
            .unwrap_or_else(|| default_log_dir(&policy));
        let logger = TickLogger::create(&log_dir, config.log.channel_capacity)?;
        info!("Tick log: {}", logger.path().display());

        let arbiter = CommandArbiter::new(self.command_source.into());
        let sources = spawn_command_source(self.command_source, &arbiter, config, stop.clone())?;

        let mut control = ControlLoop::new(
            driver,
            Box::new(DummyImu),
            arbiter,
            executor,
            config,
            stop.clone(),
        )
        .with_tick_log(logger);
        let report = control.run();

        stop.store(true, Ordering::Release);
        for handle in sources {
            if handle.join().is_err() {
                warn!("Command source thread panicked");
            }
        }

        print_report(&report, &log_dir);
        match report.stop_reason {
            StopReason::SafeStop { cause } => bail!("stopped by safety monitor: {}", cause),
            _ => Ok(()),
        }
    }
}

/// 元数据名，缺省取文件名
fn policy_name(name: Option<&str>, path: &Path) -> String {
    name.map(str::to_owned)
        .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "policy".to_string())
}

fn spawn_command_source(
    kind: CommandSourceArg,
    arbiter: &CommandArbiter,
    config: &FirmwareConfig,
    stop: Arc<AtomicBool>,
) -> Result<Vec<JoinHandle<()>>> {
    let handle = match kind {
        CommandSourceArg::Keyboard => {
            print_keymap();
            let stdin = RawStdin::enable().context("failed to put terminal in raw mode")?;
            spawn_keyboard_reader(stdin, KeyboardSource::new(arbiter.shared()), stop)
                .context("failed to start keyboard reader")?
        },
        CommandSourceArg::Udp => {
            let listener = UdpCommandListener::bind(
                config.udp.bind.as_str(),
                arbiter.shared(),
                Arc::new(config.robot()),
            )
            .with_context(|| format!("failed to bind UDP command socket {}", config.udp.bind))?;
            listener.spawn(stop).context("failed to start UDP listener")?
        },
    };
    Ok(vec![handle])
}

fn print_keymap() {
    println!("Keyboard control:");
    println!("  w/s  forward/backward    a/d  left/right    q/e  yaw");
    println!("  =/-  base height         r/f  base roll     t/g  base pitch");
    println!("  0    reset");
    let gestures: Vec<String> = Gesture::ALL
        .iter()
        .zip(['z', 'x', 'c', 'v', 'b', 'n'])
        .map(|(g, key)| format!("{} {}", key, g.name()))
        .collect();
    println!("  gestures: {}", gestures.join(", "));
    println!("  Ctrl-C safe stop");
}

fn print_report(report: &LoopReport, log_dir: &Path) {
    println!();
    println!("Control loop finished: {:?}", report.stop_reason);
    println!("  ticks:          {}", report.ticks);
    println!("  overruns:       {}", report.overruns);
    println!(
        "  interval:       mean {:.1} us, min {} us, max {} us, jitter {:.1} us",
        report.intervals.mean_us,
        report.intervals.min_us,
        report.intervals.max_us,
        report.intervals.jitter_us()
    );
    println!("  safety state:   {}", report.final_state);
    println!(
        "  faults:         {} ({} evicted)",
        report.faults, report.evicted_faults
    );
    if report.dropped_log_records > 0 {
        println!("  dropped log records: {}", report.dropped_log_records);
    }
    println!("  tick log:       {}", log_dir.display());
}
