//! 多总线执行器驱动
//!
//! 单线程、同步：所有收发都在调用线程内完成，每次等待都有截止时间。
//! 这与 50 Hz 控制环的节拍模型一致，控制线程自己决定何时读、何时写。
//!
//! # 应答归属
//!
//! 所有收到的帧都先经过 [`ActuatorBusDriver::absorb`]：
//! 解析仲裁 ID → 记录亲和接口 → 检查故障标志 → 反馈帧更新遥测。
//! 因此即使是"别人的"应答（上一 tick 迟到的反馈、主动上报的故障帧）也不会丢失。

use crate::actuator::Actuator;
use crate::bus::{BusSet, PendingResponse, Route};
use crate::error::DriverError;
use crate::metrics::DriverMetrics;
use kbot_can::{CanAdapter, CanError, KbotFrame};
use kbot_protocol::{
    ActuatorFaultReport, ActuatorId, PdCommand, ProtocolError, Response, ResponseId, RobotConfig,
    SimpleCommand, Telemetry, TorqueLimitCommand, faults_from_flags,
};
use smallvec::smallvec;
use std::collections::{BTreeMap, HashMap};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// 驱动时序参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    /// 单个执行器的应答预算
    pub io_timeout: Duration,
    /// 扫描时的 Ping 超时
    pub ping_timeout: Duration,
    /// 未应答请求的保留时长
    pub missing_response_ttl: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            io_timeout: Duration::from_millis(2),
            ping_timeout: Duration::from_millis(5),
            missing_response_ttl: Duration::from_secs(1),
        }
    }
}

/// 力矩上限设置应答
#[derive(Debug, Clone, PartialEq)]
pub struct TorqueLimitAck {
    pub actuator: ActuatorId,
    pub limit: f32,
    /// 应答所在接口
    pub bus: String,
}

/// 接口级故障（运行期掉线、Bus-Off）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusFault {
    pub bus: String,
    pub detail: String,
}

/// 扫描结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// 应答的执行器及其接口（按 ID 排序）
    pub found: Vec<(ActuatorId, String)>,
    /// 配置表中有但未应答
    pub missing: Vec<ActuatorId>,
    /// 应答了但不在配置表中
    pub unexpected: Vec<ActuatorId>,
}

impl ScanReport {
    pub fn is_empty(&self) -> bool {
        self.found.is_empty()
    }
}

enum Absorbed {
    Stray,
    Response { response: Response, late: bool },
    Malformed { actuator: ActuatorId, error: ProtocolError },
}

/// 多总线执行器驱动
pub struct ActuatorBusDriver<A: CanAdapter> {
    buses: BusSet<A>,
    actuators: BTreeMap<ActuatorId, Actuator>,
    config: DriverConfig,
    fault_reports: Vec<ActuatorFaultReport>,
    bus_faults: Vec<BusFault>,
    metrics: Arc<DriverMetrics>,
    tick: u64,
}

impl<A: CanAdapter> ActuatorBusDriver<A> {
    pub fn new(buses: BusSet<A>, robot: &RobotConfig, config: DriverConfig) -> Self {
        let actuators = robot
            .actuators
            .iter()
            .map(|a| (a.id, Actuator::new(a.clone())))
            .collect();
        Self {
            buses,
            actuators,
            config,
            fault_reports: Vec::new(),
            bus_faults: Vec::new(),
            metrics: Arc::new(DriverMetrics::new()),
            tick: 0,
        }
    }

    pub fn buses(&self) -> &BusSet<A> {
        &self.buses
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<DriverMetrics> {
        self.metrics.clone()
    }

    pub fn actuator(&self, id: ActuatorId) -> Option<&Actuator> {
        self.actuators.get(&id)
    }

    /// 按 ID 升序
    pub fn actuators(&self) -> impl Iterator<Item = &Actuator> {
        self.actuators.values()
    }

    pub fn actuator_ids(&self) -> Vec<ActuatorId> {
        self.actuators.keys().copied().collect()
    }

    /// 当前 tick 编号，用于遥测时间戳
    pub fn set_tick(&mut self, tick: u64) {
        self.tick = tick;
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// 取走累积的执行器故障报告
    pub fn take_fault_reports(&mut self) -> Vec<ActuatorFaultReport> {
        std::mem::take(&mut self.fault_reports)
    }

    /// 取走累积的接口故障
    pub fn take_bus_faults(&mut self) -> Vec<BusFault> {
        std::mem::take(&mut self.bus_faults)
    }

    // ------------------------------------------------------------------
    // 收发原语
    // ------------------------------------------------------------------

    fn link_failure(&mut self, bus: usize, error: &CanError) {
        let name = self.buses.name_of(bus).unwrap_or("?").to_string();
        self.bus_faults.push(BusFault {
            bus: name,
            detail: error.to_string(),
        });
        self.buses.mark_unreachable(bus);
    }

    fn send_on(&mut self, bus: usize, frame: KbotFrame) -> Result<(), DriverError> {
        let Some(adapter) = self.buses.get_mut(bus).and_then(|b| b.adapter_mut()) else {
            return Err(DriverError::Unrouted {
                actuator: ActuatorId::new((frame.id & 0xFF) as u8),
            });
        };
        match adapter.send(frame) {
            Ok(()) => {
                DriverMetrics::incr(&self.metrics.frames_sent);
                Ok(())
            },
            Err(e) => {
                DriverMetrics::incr(&self.metrics.send_errors);
                if e.is_link_failure() {
                    self.link_failure(bus, &e);
                } else {
                    warn!("Send on bus {} failed: {}", bus, e);
                }
                Err(e.into())
            },
        }
    }

    /// 有界接收；超时返回 `Ok(None)`
    fn recv_on(&mut self, bus: usize, timeout: Duration) -> Result<Option<KbotFrame>, DriverError> {
        let Some(adapter) = self.buses.get_mut(bus).and_then(|b| b.adapter_mut()) else {
            return Ok(None);
        };
        let result = if timeout.is_zero() {
            adapter.try_receive()
        } else {
            adapter.receive_timeout(timeout).map(Some)
        };
        match result {
            Ok(frame) => Ok(frame),
            Err(CanError::Timeout) => Ok(None),
            Err(e) => {
                if e.is_link_failure() {
                    self.link_failure(bus, &e);
                } else {
                    warn!("Receive on bus {} failed: {}", bus, e);
                }
                Err(e.into())
            },
        }
    }

    fn push_reports(&mut self, reports: Vec<ActuatorFaultReport>) {
        for report in &reports {
            debug!(
                "Actuator {} reports {} ({:?})",
                report.actuator, report.code.description, report.origin
            );
        }
        self.metrics
            .fault_reports
            .fetch_add(reports.len() as u64, std::sync::atomic::Ordering::Relaxed);
        self.fault_reports.extend(reports);
    }

    /// 处理一帧上行数据
    fn absorb(&mut self, bus: usize, frame: KbotFrame) -> Absorbed {
        DriverMetrics::incr(&self.metrics.frames_received);
        let Ok(id) = ResponseId::parse(frame.id) else {
            DriverMetrics::incr(&self.metrics.stray_frames);
            trace!("Stray frame 0x{:08X} on bus {}", frame.id, bus);
            return Absorbed::Stray;
        };
        let actuator = id.actuator;

        let response = match Response::parse(frame) {
            Ok(r) => r,
            Err(error) => {
                DriverMetrics::incr(&self.metrics.decode_errors);
                warn!("Malformed response from actuator {}: {}", actuator, error);
                return Absorbed::Malformed { actuator, error };
            },
        };

        self.buses.remember(actuator, bus);

        let mut late = false;
        if let Some(handle) = self.buses.get_mut(bus) {
            let before = handle.missing.len();
            handle.missing.retain(|p| p.actuator != actuator);
            late = handle.missing.len() != before;
        }
        if late {
            DriverMetrics::incr(&self.metrics.late_responses);
        }

        if id.fault_flags != 0 {
            self.push_reports(faults_from_flags(actuator, id.fault_flags));
        }

        match &response {
            Response::Feedback(fb) => match self.actuators.get_mut(&actuator) {
                Some(record) => {
                    let telemetry = fb.to_telemetry(record.config());
                    record.record(telemetry, self.tick);
                },
                None => {
                    DriverMetrics::incr(&self.metrics.stray_frames);
                    trace!("Feedback from unconfigured actuator {}", actuator);
                },
            },
            Response::FaultReport(report) => self.push_reports(report.reports()),
            Response::Pong(_) | Response::Other(_) => {},
        }

        Absorbed::Response { response, late }
    }

    /// 在单条总线上发送并等待目标执行器的应答
    fn exchange(
        &mut self,
        bus: usize,
        actuator: ActuatorId,
        frame: KbotFrame,
        accept: fn(&Response) -> bool,
        timeout: Duration,
    ) -> Result<Option<Response>, DriverError> {
        self.send_on(bus, frame)?;
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let Some(rx) = self.recv_on(bus, remaining)? else {
                return Ok(None);
            };
            match self.absorb(bus, rx) {
                Absorbed::Response { response, .. }
                    if response.actuator() == actuator && accept(&response) =>
                {
                    return Ok(Some(response));
                },
                Absorbed::Malformed { actuator: from, error } if from == actuator => {
                    return Err(DriverError::Decode {
                        actuator,
                        source: error,
                    });
                },
                _ => {},
            }
        }
    }

    /// 带接口回退的请求：首选接口 → 其余可达接口
    fn request(
        &mut self,
        actuator: ActuatorId,
        frame: KbotFrame,
        accept: fn(&Response) -> bool,
        timeout: Duration,
    ) -> Result<(usize, Response), DriverError> {
        if !self.actuators.contains_key(&actuator) {
            return Err(DriverError::UnknownActuator { actuator });
        }
        let route = self.buses.route(actuator);
        if route.is_empty() {
            return Err(DriverError::Unrouted { actuator });
        }
        for bus in route {
            match self.exchange(bus, actuator, frame, accept, timeout) {
                Ok(Some(response)) => return Ok((bus, response)),
                Ok(None) => {
                    DriverMetrics::incr(&self.metrics.timeouts);
                    trace!("Actuator {} silent on bus {}", actuator, bus);
                },
                Err(e @ DriverError::Decode { .. }) => return Err(e),
                Err(e) => debug!("Actuator {} request on bus {} failed: {}", actuator, bus, e),
            }
        }
        Err(DriverError::NoResponse { actuator })
    }

    // ------------------------------------------------------------------
    // 单执行器操作
    // ------------------------------------------------------------------

    /// 设置力矩上限（参数写入），返回首个应答
    pub fn configure_torque_limit(
        &mut self,
        actuator: ActuatorId,
        max_torque: f32,
    ) -> Result<TorqueLimitAck, DriverError> {
        let frame = TorqueLimitCommand::new(actuator, max_torque).to_frame();
        let (bus, _) = self.request(actuator, frame, |_| true, self.config.io_timeout)?;
        let bus = self.buses.name_of(bus).unwrap_or_default().to_string();
        debug!("Torque limit {} N·m acknowledged by {} on {}", max_torque, actuator, bus);
        Ok(TorqueLimitAck {
            actuator,
            limit: max_torque,
            bus,
        })
    }

    /// 按配置表对所有执行器设置力矩上限，`fraction` 为上限的缩放
    pub fn configure_torque_limits(
        &mut self,
        fraction: f32,
    ) -> Vec<(ActuatorId, Result<TorqueLimitAck, DriverError>)> {
        let limits: Vec<_> = self
            .actuators
            .values()
            .map(|a| (a.id(), a.max_torque() * fraction))
            .collect();
        limits
            .into_iter()
            .map(|(id, limit)| (id, self.configure_torque_limit(id, limit)))
            .collect()
    }

    /// 请求一次反馈
    pub fn poll_telemetry(&mut self, actuator: ActuatorId) -> Result<Telemetry, DriverError> {
        let frame = SimpleCommand::feedback_request(actuator).to_frame();
        self.request(
            actuator,
            frame,
            |r| matches!(r, Response::Feedback(_)),
            self.config.io_timeout,
        )?;
        self.actuators
            .get(&actuator)
            .map(|a| *a.telemetry())
            .ok_or(DriverError::UnknownActuator { actuator })
    }

    /// 使能（进入运行模式）
    pub fn enable(&mut self, actuator: ActuatorId) -> Result<(), DriverError> {
        let frame = SimpleCommand::enable(actuator).to_frame();
        self.request(actuator, frame, |_| true, self.config.io_timeout)?;
        Ok(())
    }

    pub fn enable_all(&mut self) -> Vec<(ActuatorId, Result<(), DriverError>)> {
        self.actuator_ids()
            .into_iter()
            .map(|id| (id, self.enable(id)))
            .collect()
    }

    /// 在指定总线上 Ping，`Ok(true)` 表示应答
    pub fn ping_on(&mut self, bus: usize, actuator: ActuatorId) -> Result<bool, DriverError> {
        let frame = SimpleCommand::ping(actuator).to_frame();
        let answered = self.exchange(
            bus,
            actuator,
            frame,
            |_| true,
            self.config.ping_timeout,
        )?;
        Ok(answered.is_some())
    }

    /// 在所有可达总线上 Ping 一段 ID，按发现顺序写入亲和缓存
    pub fn scan(&mut self, ids: RangeInclusive<u8>) -> ScanReport {
        let mut found: BTreeMap<ActuatorId, usize> = BTreeMap::new();
        for bus in 0..self.buses.len() {
            let Some(name) = self
                .buses
                .get(bus)
                .filter(|b| b.is_reachable())
                .map(|b| b.name().to_string())
            else {
                continue;
            };
            let mut on_bus = Vec::new();
            for raw in ids.clone() {
                let actuator = ActuatorId::new(raw);
                match self.ping_on(bus, actuator) {
                    Ok(true) => on_bus.push(actuator),
                    Ok(false) => {},
                    Err(e) => {
                        warn!("Scan of {} aborted: {}", name, e);
                        break;
                    },
                }
            }
            for actuator in &on_bus {
                match found.get(actuator) {
                    Some(&first) => warn!(
                        "Actuator {} answers on both {} and {}, keeping {}",
                        actuator,
                        self.buses.name_of(first).unwrap_or("?"),
                        name,
                        self.buses.name_of(first).unwrap_or("?")
                    ),
                    None => {
                        found.insert(*actuator, bus);
                    },
                }
            }
            info!("{}: {} actuators {:?}", name, on_bus.len(), on_bus);
        }

        // 亲和缓存以首个应答接口为准
        for (&actuator, &bus) in &found {
            self.buses.remember(actuator, bus);
        }

        let missing = self
            .actuators
            .keys()
            .filter(|id| !found.contains_key(id))
            .copied()
            .collect();
        let unexpected = found
            .keys()
            .filter(|id| !self.actuators.contains_key(id))
            .copied()
            .collect();
        ScanReport {
            found: found
                .iter()
                .map(|(&id, &bus)| (id, self.buses.name_of(bus).unwrap_or_default().to_string()))
                .collect(),
            missing,
            unexpected,
        }
    }

    // ------------------------------------------------------------------
    // 批量操作（每 tick 一次）
    // ------------------------------------------------------------------

    /// 向所有配置的执行器请求反馈
    pub fn poll_all(&mut self) -> Vec<(ActuatorId, Result<Telemetry, DriverError>)> {
        let requests = self
            .actuators
            .keys()
            .map(|&id| (id, Ok(SimpleCommand::feedback_request(id).to_frame())))
            .collect();
        self.batch(requests)
    }

    /// 每个执行器一帧 PD 位置指令，增益按 `scaling` 缩放
    pub fn write_actions(
        &mut self,
        actions: &[(ActuatorId, f32)],
        scaling: f32,
    ) -> Vec<(ActuatorId, Result<Telemetry, DriverError>)> {
        let commands: Vec<_> = actions
            .iter()
            .map(|&(id, angle)| PdCommand::position(id, angle, scaling))
            .collect();
        self.write_commands(&commands)
    }

    pub fn write_commands(
        &mut self,
        commands: &[PdCommand],
    ) -> Vec<(ActuatorId, Result<Telemetry, DriverError>)> {
        let requests = commands
            .iter()
            .map(|cmd| {
                let frame = match self.actuators.get(&cmd.actuator) {
                    Some(a) => cmd.to_frame(a.config()).map_err(DriverError::from),
                    None => Err(DriverError::UnknownActuator {
                        actuator: cmd.actuator,
                    }),
                };
                (cmd.actuator, frame)
            })
            .collect();
        self.batch(requests)
    }

    /// 先全部发送，再逐总线收集反馈
    ///
    /// 每条总线的截止时间 = 单执行器预算 × 该总线上的待应答数；
    /// 过了截止时间仍会非阻塞地取走已到达的帧。
    /// 首选接口未应答的请求随后在其余可达接口上各补发一次，
    /// 全部未应答则清除亲和缓存，下一 tick 改为广播。
    fn batch(
        &mut self,
        requests: Vec<(ActuatorId, Result<KbotFrame, DriverError>)>,
    ) -> Vec<(ActuatorId, Result<Telemetry, DriverError>)> {
        let mut results: Vec<Option<Result<Telemetry, DriverError>>> =
            (0..requests.len()).map(|_| None).collect();
        let mut index: HashMap<ActuatorId, usize> = HashMap::with_capacity(requests.len());
        let mut sent_on: Vec<Route> = vec![Route::new(); requests.len()];
        let mut outstanding: Vec<Vec<usize>> = vec![Vec::new(); self.buses.len()];

        for (i, (actuator, frame)) in requests.iter().enumerate() {
            let frame = match frame {
                Ok(f) => *f,
                Err(_) => continue,
            };
            index.insert(*actuator, i);
            // 已知亲和关系只发一次；未知时在所有可达接口上广播
            let targets: Route = match self.buses.preferred(*actuator) {
                Some(bus) => smallvec![bus],
                None => self.buses.route(*actuator),
            };
            if targets.is_empty() {
                results[i] = Some(Err(DriverError::Unrouted {
                    actuator: *actuator,
                }));
                continue;
            }
            let mut last_err = None;
            for bus in targets {
                match self.send_on(bus, frame) {
                    Ok(()) => {
                        outstanding[bus].push(i);
                        sent_on[i].push(bus);
                    },
                    Err(e) => last_err = Some(e),
                }
            }
            if sent_on[i].is_empty() {
                results[i] = Some(Err(last_err.unwrap_or(DriverError::Unrouted {
                    actuator: *actuator,
                })));
            }
        }

        let sent_at = Instant::now();
        for bus in 0..outstanding.len() {
            if outstanding[bus].is_empty() {
                continue;
            }
            let budget = self.config.io_timeout * outstanding[bus].len() as u32;
            let deadline = sent_at + budget;
            loop {
                outstanding[bus].retain(|&i| results[i].is_none());
                if outstanding[bus].is_empty() {
                    break;
                }
                let now = Instant::now();
                let remaining = deadline.saturating_duration_since(now);
                let frame = match self.recv_on(bus, remaining) {
                    Ok(Some(f)) => f,
                    Ok(None) if remaining.is_zero() => break,
                    Ok(None) => continue,
                    Err(_) => break,
                };
                match self.absorb(bus, frame) {
                    Absorbed::Response {
                        response: Response::Feedback(fb),
                        ..
                    } => {
                        if let Some(&i) = index.get(&fb.actuator)
                            && results[i].is_none()
                            && let Some(record) = self.actuators.get(&fb.actuator)
                        {
                            results[i] = Some(Ok(*record.telemetry()));
                        }
                    },
                    Absorbed::Malformed { actuator, error } => {
                        if let Some(&i) = index.get(&actuator)
                            && results[i].is_none()
                        {
                            results[i] = Some(Err(DriverError::Decode {
                                actuator,
                                source: error,
                            }));
                        }
                    },
                    _ => {},
                }
            }
        }

        for (i, (actuator, frame)) in requests.iter().enumerate() {
            let Ok(frame) = frame else {
                continue;
            };
            if results[i].is_some() || sent_on[i].is_empty() {
                continue;
            }
            let fallback: Route = self
                .buses
                .route(*actuator)
                .into_iter()
                .filter(|bus| !sent_on[i].contains(bus))
                .collect();
            for bus in fallback {
                match self.exchange(
                    bus,
                    *actuator,
                    *frame,
                    |r| matches!(r, Response::Feedback(_)),
                    self.config.io_timeout,
                ) {
                    Ok(Some(_)) => {
                        debug!("Actuator {} answered on fallback bus {}", actuator, bus);
                        results[i] = self.actuators.get(actuator).map(|a| Ok(*a.telemetry()));
                        break;
                    },
                    Ok(None) => {
                        trace!("Actuator {} silent on fallback bus {}", actuator, bus);
                        sent_on[i].push(bus);
                    },
                    Err(e @ DriverError::Decode { .. }) => {
                        results[i] = Some(Err(e));
                        break;
                    },
                    Err(e) => debug!("Actuator {} fallback on bus {} failed: {}", actuator, bus, e),
                }
            }
            if results[i].is_none() {
                self.buses.forget(*actuator);
            }
        }

        let now = Instant::now();
        requests
            .into_iter()
            .zip(results)
            .enumerate()
            .map(|(i, ((actuator, frame), result))| {
                let result = match (frame, result) {
                    (Err(e), _) => Err(e),
                    (Ok(_), Some(r)) => r,
                    (Ok(_), None) => {
                        DriverMetrics::incr(&self.metrics.timeouts);
                        for &bus in &sent_on[i] {
                            if let Some(handle) = self.buses.get_mut(bus) {
                                handle.missing.retain(|p| p.actuator != actuator);
                                handle.missing.push(PendingResponse {
                                    actuator,
                                    sent_at: now,
                                });
                            }
                        }
                        Err(DriverError::NoResponse { actuator })
                    },
                };
                (actuator, result)
            })
            .collect()
    }

    /// 回收迟到应答：过期条目先剔除，其余总线非阻塞读空
    ///
    /// 返回本次回收的迟到应答数。
    pub fn drain_missing_responses(&mut self) -> usize {
        let ttl = self.config.missing_response_ttl;
        let now = Instant::now();
        let mut recovered = 0;
        for bus in 0..self.buses.len() {
            let Some(handle) = self.buses.get_mut(bus) else {
                continue;
            };
            handle
                .missing
                .retain(|p| now.saturating_duration_since(p.sent_at) < ttl);
            if handle.missing.is_empty() || !handle.is_reachable() {
                continue;
            }
            while let Ok(Some(frame)) = self.recv_on(bus, Duration::ZERO) {
                if let Absorbed::Response { late: true, .. } = self.absorb(bus, frame) {
                    recovered += 1;
                }
            }
        }
        if recovered > 0 {
            debug!("Recovered {} late responses", recovered);
        }
        recovered
    }

    pub fn missing_response_count(&self) -> usize {
        self.buses.iter().map(|b| b.missing_count()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusHandle;
    use kbot_can::MockCanAdapter;
    use kbot_protocol::{FeedbackFrame, MotorMode};

    fn feedback(actuator: u8, angle: u16) -> KbotFrame {
        FeedbackFrame {
            actuator: ActuatorId::new(actuator),
            fault_flags: 0,
            mode: MotorMode::Run,
            angle,
            velocity: 32767,
            torque: 32767,
            temperature: 300,
        }
        .to_frame()
    }

    fn driver_with(adapters: Vec<MockCanAdapter>) -> ActuatorBusDriver<MockCanAdapter> {
        let mut buses = BusSet::new();
        for adapter in adapters {
            buses.push(BusHandle::from_adapter(adapter));
        }
        ActuatorBusDriver::new(buses, &RobotConfig::default(), DriverConfig::default())
    }

    #[test]
    fn test_unknown_actuator_rejected() {
        let mut driver = driver_with(vec![MockCanAdapter::new("can0")]);
        assert!(matches!(
            driver.poll_telemetry(ActuatorId::new(99)),
            Err(DriverError::UnknownActuator { .. })
        ));
    }

    #[test]
    fn test_no_reachable_bus_is_unrouted() {
        let mut buses: BusSet<MockCanAdapter> = BusSet::new();
        buses.push(BusHandle::unreachable("can0"));
        let mut driver =
            ActuatorBusDriver::new(buses, &RobotConfig::default(), DriverConfig::default());
        assert!(matches!(
            driver.poll_telemetry(ActuatorId::new(11)),
            Err(DriverError::Unrouted { .. })
        ));
    }

    #[test]
    fn test_poll_falls_back_and_remembers_bus() {
        let silent = MockCanAdapter::new("can0");
        let answering = MockCanAdapter::new("can1").with_responder(|frame| {
            let id = (frame.id & 0xFF) as u8;
            vec![feedback(id, 40000)]
        });
        let mut driver = driver_with(vec![silent, answering]);

        let telemetry = driver.poll_telemetry(ActuatorId::new(21)).unwrap();
        assert!(telemetry.position > 0.0);
        assert_eq!(driver.buses().preferred(ActuatorId::new(21)), Some(1));
        assert_eq!(driver.buses().route(ActuatorId::new(21)).as_slice(), &[1, 0]);
    }

    #[test]
    fn test_late_feedback_updates_telemetry() {
        let adapter = MockCanAdapter::new("can0");
        let handle = adapter.handle();
        let mut driver = driver_with(vec![adapter]);
        driver.set_tick(3);

        let results = driver.write_actions(&[(ActuatorId::new(11), 0.0)], 1.0);
        assert!(matches!(results[0].1, Err(DriverError::NoResponse { .. })));
        assert_eq!(driver.missing_response_count(), 1);

        handle.inject(feedback(11, 40000));
        assert_eq!(driver.drain_missing_responses(), 1);
        assert_eq!(driver.missing_response_count(), 0);
        let record = driver.actuator(ActuatorId::new(11)).unwrap();
        assert!(record.telemetry().position > 0.0);
        assert_eq!(record.last_tick(), Some(3));
    }

    #[test]
    fn test_missing_responses_pruned_after_ttl() {
        let adapter = MockCanAdapter::new("can0");
        let mut buses = BusSet::new();
        buses.push(BusHandle::from_adapter(adapter));
        let config = DriverConfig {
            missing_response_ttl: Duration::ZERO,
            ..Default::default()
        };
        let mut driver = ActuatorBusDriver::new(buses, &RobotConfig::default(), config);
        driver.write_actions(&[(ActuatorId::new(12), 0.0)], 1.0);
        assert_eq!(driver.missing_response_count(), 1);
        driver.drain_missing_responses();
        assert_eq!(driver.missing_response_count(), 0);
    }

    #[test]
    fn test_fault_flags_queued() {
        let adapter = MockCanAdapter::new("can0").with_responder(|frame| {
            let mut fb = FeedbackFrame::try_from(feedback((frame.id & 0xFF) as u8, 32767)).unwrap();
            fb.fault_flags = 0x04;
            vec![fb.to_frame()]
        });
        let mut driver = driver_with(vec![adapter]);
        driver.poll_telemetry(ActuatorId::new(31)).unwrap();
        let reports = driver.take_fault_reports();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].is_critical());
        assert!(driver.take_fault_reports().is_empty());
    }

    #[test]
    fn test_link_failure_marks_bus_unreachable() {
        let adapter = MockCanAdapter::new("can0");
        let handle = adapter.handle();
        let mut driver = driver_with(vec![adapter]);
        handle.set_link_down(true);
        assert!(driver.poll_telemetry(ActuatorId::new(11)).is_err());
        assert_eq!(driver.buses().reachable_count(), 0);
        let faults = driver.take_bus_faults();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].bus, "can0");
    }
}
