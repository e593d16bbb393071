//! # Kbot CLI
//!
//! 操作员入口：
//!
//! ```bash
//! # 列出各接口上的执行器及其状态
//! kbot-cli scan
//!
//! # 启动检查 → 归零 → 50 Hz 策略循环（Ctrl-C 安全停机）
//! kbot-cli run --policy policy.json --command-source keyboard
//!
//! # 低增益正弦诊断
//! kbot-cli sine-wave --duration 10
//! ```
//!
//! 日志级别由 `RUST_LOG` 控制，缺省 `info`。

use anyhow::Result;
use tracing_subscriber::EnvFilter;

#[cfg(target_os = "linux")]
use clap::{Parser, Subcommand};

#[cfg(target_os = "linux")]
mod commands;
#[cfg(target_os = "linux")]
mod terminal;

#[cfg(target_os = "linux")]
use commands::{RunCommand, ScanCommand, SineWaveCommand};

/// Kbot CLI - 人形机器人固件
#[cfg(target_os = "linux")]
#[derive(Parser, Debug)]
#[command(name = "kbot-cli")]
#[command(about = "Operator command-line interface for the kbot humanoid", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[cfg(target_os = "linux")]
#[derive(Subcommand, Debug)]
enum Commands {
    /// 运行策略控制循环
    Run {
        #[command(flatten)]
        args: RunCommand,
    },

    /// 正弦诊断（绕过策略与命令层）
    SineWave {
        #[command(flatten)]
        args: SineWaveCommand,
    },

    /// 扫描执行器
    Scan {
        #[command(flatten)]
        args: ScanCommand,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(target_os = "linux")]
fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { args } => args.execute(),
        Commands::SineWave { args } => args.execute(),
        Commands::Scan { args } => args.execute(),
    }
}

#[cfg(not(target_os = "linux"))]
fn main() -> Result<()> {
    init_logging();
    anyhow::bail!("kbot-cli requires SocketCAN (Linux)")
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use commands::CommandSourceArg;
    use std::path::Path;

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "kbot-cli",
            "run",
            "--policy",
            "walk.json",
            "--command-source",
            "udp",
            "--yes",
        ])
        .unwrap();
        match cli.command {
            Commands::Run { args } => {
                assert_eq!(args.policy, Path::new("walk.json"));
                assert_eq!(args.command_source, CommandSourceArg::Udp);
                assert!(args.yes);
                assert!(args.config.is_none());
                assert!(args.log_dir.is_none());
            },
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_run_defaults_to_keyboard() {
        let cli = Cli::try_parse_from(["kbot-cli", "run", "--policy", "p.json"]).unwrap();
        match cli.command {
            Commands::Run { args } => {
                assert_eq!(args.command_source, CommandSourceArg::Keyboard);
                assert!(!args.yes);
            },
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_run_requires_policy() {
        assert!(Cli::try_parse_from(["kbot-cli", "run"]).is_err());
        assert!(
            Cli::try_parse_from(["kbot-cli", "run", "--policy", "p.json", "--command-source", "joystick"])
                .is_err()
        );
    }

    #[test]
    fn test_parse_sine_wave() {
        let cli =
            Cli::try_parse_from(["kbot-cli", "sine-wave", "--duration", "2.5", "-y"]).unwrap();
        match cli.command {
            Commands::SineWave { args } => {
                assert_eq!(args.duration, Some(2.5));
                assert!(args.yes);
            },
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_scan_with_config() {
        let cli = Cli::try_parse_from(["kbot-cli", "scan", "--config", "/etc/kbot.toml"]).unwrap();
        match cli.command {
            Commands::Scan { args } => {
                assert_eq!(args.config.as_deref(), Some(Path::new("/etc/kbot.toml")));
            },
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
