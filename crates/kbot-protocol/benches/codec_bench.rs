//! 协议编解码基准测试
//!
//! 一个 50 Hz tick 要为 22 个执行器各编码一帧 PD 指令并解析一帧反馈，
//! 这里测量单帧与整 tick 的开销。

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use kbot_protocol::{
    ActuatorId, FeedbackFrame, MotorMode, PdCommand, Response, RobotConfig, TorqueLimitCommand,
};

fn feedback_frame(actuator: ActuatorId) -> FeedbackFrame {
    FeedbackFrame {
        actuator,
        fault_flags: 0,
        mode: MotorMode::Run,
        angle: 0x8123,
        velocity: 0x7F00,
        torque: 0x8010,
        temperature: 312,
    }
}

fn bench_pd_encode(c: &mut Criterion) {
    let robot = RobotConfig::default();
    let config = robot.get(ActuatorId::new(34)).cloned().unwrap();
    let cmd = PdCommand::position(config.id, 0.42, 1.0);

    c.bench_function("pd_command_encode", |b| {
        b.iter(|| {
            black_box(black_box(cmd).to_frame(&config).unwrap());
        });
    });
}

fn bench_feedback_decode(c: &mut Criterion) {
    let robot = RobotConfig::default();
    let config = robot.get(ActuatorId::new(34)).cloned().unwrap();
    let frame = feedback_frame(config.id).to_frame();

    c.bench_function("feedback_parse_and_scale", |b| {
        b.iter(|| {
            if let Ok(Response::Feedback(fb)) = Response::parse(black_box(frame)) {
                black_box(fb.to_telemetry(&config));
            }
        });
    });
}

fn bench_torque_limit_encode(c: &mut Criterion) {
    let cmd = TorqueLimitCommand::new(ActuatorId::new(31), 42.0);

    c.bench_function("torque_limit_encode", |b| {
        b.iter(|| {
            black_box(black_box(cmd).to_frame());
        });
    });
}

fn bench_full_tick(c: &mut Criterion) {
    let robot = RobotConfig::default();
    let frames: Vec<_> = robot
        .actuators
        .iter()
        .map(|a| feedback_frame(a.id).to_frame())
        .collect();

    c.bench_function("tick_22_actuators", |b| {
        b.iter(|| {
            for (config, frame) in robot.actuators.iter().zip(&frames) {
                let out = PdCommand::position(config.id, config.joint_bias, 1.0).to_frame(config);
                black_box(out.ok());
                if let Ok(Response::Feedback(fb)) = Response::parse(*frame) {
                    black_box(fb.to_telemetry(config));
                }
            }
        });
    });
}

criterion_group!(
    benches,
    bench_pd_encode,
    bench_feedback_decode,
    bench_torque_limit_encode,
    bench_full_tick
);
criterion_main!(benches);
