//! 故障码表
//!
//! 两个来源：
//! - 每个上行帧仲裁 ID 的 bit 16-21（6-bit 故障标志）
//! - Mux 0x15 故障上报帧载荷（小端 `u32 fault, u32 warning`）
//!
//! 故障按位匹配，一帧可以同时携带多个故障。

use crate::{ActuatorId, KbotFrame, Mux, ProtocolError, ResponseId, bytes_to_u32_le};

/// 单条故障码定义
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultCode {
    pub code: u32,
    pub critical: bool,
    pub description: &'static str,
}

impl FaultCode {
    const fn new(code: u32, critical: bool, description: &'static str) -> Self {
        Self {
            code,
            critical,
            description,
        }
    }
}

/// 仲裁 ID 内的故障标志
pub const CAN_ID_FAULT_CODES: &[FaultCode] = &[
    FaultCode::new(0x20, false, "Uncalibrated"),
    FaultCode::new(0x10, false, "Gridlock overload fault"),
    FaultCode::new(0x08, false, "Magnetic coding fault"),
    FaultCode::new(0x04, true, "Overtemperature"),
    FaultCode::new(0x02, true, "Overcurrent"),
    FaultCode::new(0x01, false, "Undervoltage"),
];

/// Mux 0x15 故障字
pub const FAULT_REPORT_FAULT_CODES: &[FaultCode] = &[
    FaultCode::new(0x01, true, "Motor over-temperature (>145°C)"),
    FaultCode::new(0x02, true, "Driver fault (DRV status)"),
    FaultCode::new(0x04, false, "Undervoltage (VBUS < 12V)"),
    FaultCode::new(0x08, false, "Overvoltage (VBUS > 60V)"),
    FaultCode::new(0x80, false, "Encoder uncalibrated"),
    FaultCode::new(0x4000, true, "Stall/I²t overload"),
];

/// Mux 0x15 告警字
pub const FAULT_REPORT_WARNING_CODES: &[FaultCode] = &[FaultCode::new(
    0x01,
    false,
    "Motor over-temperature warning (default 135°C)",
)];

/// 按位匹配故障表
pub fn match_faults(table: &'static [FaultCode], value: u32) -> Vec<FaultCode> {
    table
        .iter()
        .filter(|f| value & f.code != 0)
        .copied()
        .collect()
}

/// 执行器上报的一条故障
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActuatorFaultReport {
    pub actuator: ActuatorId,
    pub code: FaultCode,
    pub origin: FaultOrigin,
}

impl ActuatorFaultReport {
    pub fn is_critical(&self) -> bool {
        self.code.critical
    }
}

/// 故障来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOrigin {
    /// 仲裁 ID 故障标志
    CanId,
    /// Mux 0x15 故障字
    FaultWord,
    /// Mux 0x15 告警字
    WarningWord,
}

/// 从仲裁 ID 故障标志生成故障报告
pub fn faults_from_flags(actuator: ActuatorId, flags: u8) -> Vec<ActuatorFaultReport> {
    match_faults(CAN_ID_FAULT_CODES, flags as u32)
        .into_iter()
        .map(|code| ActuatorFaultReport {
            actuator,
            code,
            origin: FaultOrigin::CanId,
        })
        .collect()
}

/// Mux 0x15 故障上报帧
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultReportFrame {
    pub actuator: ActuatorId,
    pub fault: u32,
    pub warning: u32,
}

impl FaultReportFrame {
    pub fn reports(&self) -> Vec<ActuatorFaultReport> {
        let faults = match_faults(FAULT_REPORT_FAULT_CODES, self.fault)
            .into_iter()
            .map(|code| (code, FaultOrigin::FaultWord));
        let warnings = match_faults(FAULT_REPORT_WARNING_CODES, self.warning)
            .into_iter()
            .map(|code| (code, FaultOrigin::WarningWord));
        faults
            .chain(warnings)
            .map(|(code, origin)| ActuatorFaultReport {
                actuator: self.actuator,
                code,
                origin,
            })
            .collect()
    }

    /// 构建上报帧（模拟执行器与测试使用）
    pub fn to_frame(self) -> KbotFrame {
        let id = ResponseId {
            host_id: crate::HOST_ID,
            actuator: self.actuator,
            fault_flags: 0,
            mode: crate::MotorMode::Run,
            mux: Mux::FaultReport,
        };
        let mut data = [0u8; 8];
        data[..4].copy_from_slice(&self.fault.to_le_bytes());
        data[4..].copy_from_slice(&self.warning.to_le_bytes());
        KbotFrame::new_extended(id.encode(), &data)
    }
}

impl TryFrom<KbotFrame> for FaultReportFrame {
    type Error = ProtocolError;

    fn try_from(frame: KbotFrame) -> Result<Self, Self::Error> {
        let id = ResponseId::parse(frame.id)?;
        if id.mux != Mux::FaultReport {
            return Err(ProtocolError::UnexpectedMux {
                expected: Mux::FaultReport.into(),
                actual: id.mux.into(),
            });
        }
        frame.require_len(8)?;
        let d = frame.data;
        Ok(Self {
            actuator: id.actuator,
            fault: bytes_to_u32_le([d[0], d[1], d[2], d[3]]),
            warning: bytes_to_u32_le([d[4], d[5], d[6], d[7]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_match_bitwise() {
        let reports = faults_from_flags(ActuatorId::new(31), 0x04 | 0x20);
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().any(|r| r.is_critical()));
        assert!(reports.iter().any(|r| r.code.description == "Uncalibrated"));
    }

    #[test]
    fn test_no_flags_no_reports() {
        assert!(faults_from_flags(ActuatorId::new(31), 0).is_empty());
    }

    #[test]
    fn test_undervoltage_is_not_critical() {
        let reports = faults_from_flags(ActuatorId::new(11), 0x01);
        assert_eq!(reports.len(), 1);
        assert!(!reports[0].is_critical());
    }

    #[test]
    fn test_fault_report_frame_parse() {
        let frame = FaultReportFrame {
            actuator: ActuatorId::new(44),
            fault: 0x4000,
            warning: 0x01,
        }
        .to_frame();
        // 小端 u32
        assert_eq!(&frame.data[..4], &[0x00, 0x40, 0x00, 0x00]);

        let parsed = FaultReportFrame::try_from(frame).unwrap();
        assert_eq!(parsed.actuator, ActuatorId::new(44));
        let reports = parsed.reports();
        assert_eq!(reports.len(), 2);
        assert!(reports[0].is_critical());
        assert_eq!(reports[0].origin, FaultOrigin::FaultWord);
        assert_eq!(reports[1].origin, FaultOrigin::WarningWord);
        assert!(!reports[1].is_critical());
    }

    #[test]
    fn test_fault_report_wrong_mux() {
        let id = ResponseId {
            host_id: crate::HOST_ID,
            actuator: ActuatorId::new(44),
            fault_flags: 0,
            mode: crate::MotorMode::Run,
            mux: Mux::Feedback,
        };
        let frame = KbotFrame::new_extended(id.encode(), &[0; 8]);
        assert!(matches!(
            FaultReportFrame::try_from(frame),
            Err(ProtocolError::UnexpectedMux { .. })
        ));
    }

    #[test]
    fn test_fault_report_short_payload() {
        let mut frame = FaultReportFrame {
            actuator: ActuatorId::new(44),
            fault: 1,
            warning: 0,
        }
        .to_frame();
        frame.len = 4;
        assert!(matches!(
            FaultReportFrame::try_from(frame),
            Err(ProtocolError::InvalidLength { .. })
        ));
    }
}
