//! 传感器汇总
//!
//! 每 tick 读一次 IMU、轮询一次全部执行器，组装固定形状的 [`RobotState`]。
//! 单个执行器失败时沿用上次有效值并产生通信故障，不会中断 tick。

use crate::fault::{Fault, FaultKind, FaultSource};
use crate::imu::{ImuReading, ImuSource};
use crate::layout::JointLayout;
use crate::state::{JointReading, RobotState};
use kbot_can::CanAdapter;
use kbot_driver::ActuatorBusDriver;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::trace;

/// 最近一次采集的耗时
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SensorTimings {
    pub imu: Duration,
    pub joints: Duration,
}

/// 传感器汇总器
pub struct SensorAggregator {
    layout: JointLayout,
    imu: Box<dyn ImuSource>,
    last_imu: ImuReading,
    staleness_ticks: u64,
    timings: SensorTimings,
}

impl SensorAggregator {
    pub fn new(layout: JointLayout, imu: Box<dyn ImuSource>, staleness_ticks: u64) -> Self {
        Self {
            layout,
            imu,
            last_imu: ImuReading::default(),
            staleness_ticks,
            timings: SensorTimings::default(),
        }
    }

    pub fn layout(&self) -> &JointLayout {
        &self.layout
    }

    pub fn imu_name(&self) -> &str {
        self.imu.name()
    }

    pub fn timings(&self) -> SensorTimings {
        self.timings
    }

    /// 采集一个 tick 的状态
    pub fn collect<A: CanAdapter>(
        &mut self,
        driver: &mut ActuatorBusDriver<A>,
        tick: u64,
    ) -> (RobotState, Vec<Fault>) {
        let mut faults = Vec::new();

        let t0 = Instant::now();
        let imu = match self.imu.read() {
            Ok(reading) => {
                self.last_imu = reading;
                reading
            },
            Err(e) => {
                faults.push(Fault::new(FaultSource::Imu, FaultKind::ImuFailure, tick, e.to_string()));
                self.last_imu
            },
        };
        let t1 = Instant::now();

        driver.set_tick(tick);
        let polled: HashMap<_, _> = driver.poll_all().into_iter().collect();
        let mut joints = Vec::with_capacity(self.layout.len());
        for &id in self.layout.ids() {
            let fresh = match polled.get(&id) {
                Some(Ok(_)) => true,
                Some(Err(e)) => {
                    faults.push(Fault::from_driver(id, e, tick));
                    false
                },
                None => false,
            };
            let Some(actuator) = driver.actuator(id) else {
                joints.push(JointReading::default());
                continue;
            };
            if !fresh {
                // 从未收到过应答的关节同样视为陈旧
                let age = actuator.staleness(tick).unwrap_or(tick + 1);
                if age > self.staleness_ticks {
                    faults.push(Fault::new(
                        FaultSource::Actuator(id),
                        FaultKind::Stale { age_ticks: age },
                        tick,
                        format!("{} last updated {} ticks ago", actuator.name(), age),
                    ));
                }
            }
            let t = actuator.telemetry();
            joints.push(JointReading {
                position: t.position,
                velocity: t.velocity,
                torque: t.torque,
                temperature: t.temperature,
                fresh,
            });
        }
        let t2 = Instant::now();

        self.timings = SensorTimings {
            imu: t1 - t0,
            joints: t2 - t1,
        };
        trace!(
            "tick {}: imu {:?}, joints {:?}, {} faults",
            tick,
            self.timings.imu,
            self.timings.joints,
            faults.len()
        );
        (RobotState::new(tick, imu, joints), faults)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ImuError;
    use crate::imu::DummyImu;
    use kbot_driver::{Behavior, BusHandle, BusSet, DriverBuilder, SimulatedBus};
    use kbot_protocol::{ActuatorId, RobotConfig};

    struct FailingImu;

    impl ImuSource for FailingImu {
        fn name(&self) -> &str {
            "failing"
        }

        fn read(&mut self) -> Result<ImuReading, ImuError> {
            Err(ImuError::Unavailable("serial port closed".into()))
        }
    }

    fn setup() -> (ActuatorBusDriver<kbot_can::MockCanAdapter>, SimulatedBus, JointLayout) {
        let robot = RobotConfig::default();
        let sim = SimulatedBus::new("can0", robot.actuators.iter().cloned());
        let mut buses = BusSet::new();
        buses.push(BusHandle::from_adapter(sim.adapter()));
        let (driver, _) = DriverBuilder::new(robot.clone())
            .io_timeout(Duration::from_millis(1))
            .build_and_scan(buses)
            .unwrap();
        let layout = JointLayout::from_names(&robot, &["dof_left_knee_04", "dof_right_knee_04"]).unwrap();
        (driver, sim, layout)
    }

    #[test]
    fn test_collect_in_layout_order() {
        let (mut driver, sim, layout) = setup();
        sim.set_position(34, 0.4);
        sim.set_position(44, -0.4);
        let mut sensors = SensorAggregator::new(layout, Box::new(DummyImu), 10);
        let (state, faults) = sensors.collect(&mut driver, 1);
        assert!(faults.is_empty());
        assert_eq!(state.len(), 2);
        assert!((state.joints()[0].position - 0.4).abs() < 1e-3);
        assert!((state.joints()[1].position + 0.4).abs() < 1e-3);
        assert!(state.joints().iter().all(|j| j.fresh));
    }

    #[test]
    fn test_silent_actuator_keeps_last_known() {
        let (mut driver, sim, layout) = setup();
        sim.set_position(34, 0.4);
        let mut sensors = SensorAggregator::new(layout, Box::new(DummyImu), 2);
        sensors.collect(&mut driver, 1);

        sim.set_behavior(34, Behavior::Silent);
        sim.set_position(34, 1.0);
        for tick in 2..=4 {
            let (state, faults) = sensors.collect(&mut driver, tick);
            assert!((state.joints()[0].position - 0.4).abs() < 1e-3);
            assert!(!state.joints()[0].fresh);
            assert!(faults.iter().any(|f| f.kind == FaultKind::NoResponse
                && f.source == FaultSource::Actuator(ActuatorId::new(34))));
            let stale = faults
                .iter()
                .any(|f| matches!(f.kind, FaultKind::Stale { .. }));
            // 最后一次成功在 tick 1
            assert_eq!(stale, tick - 1 > 2);
        }
    }

    #[test]
    fn test_imu_failure_keeps_last_sample() {
        let (mut driver, _sim, layout) = setup();
        let mut sensors = SensorAggregator::new(layout, Box::new(FailingImu), 10);
        let (state, faults) = sensors.collect(&mut driver, 1);
        assert_eq!(state.imu(), &ImuReading::default());
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].source, FaultSource::Imu);
    }
}
