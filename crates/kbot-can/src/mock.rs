//! 无硬件的 CAN 适配器
//!
//! 发送的帧记录在共享日志中；可选的应答函数在每次发送时被调用，
//! 其返回的帧进入接收队列，用于模拟总线上的执行器。

use crate::{CanAdapter, CanDeviceError, CanDeviceErrorKind, CanError, KbotFrame};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// 应答函数：输入发送的帧，返回总线上随后出现的帧
pub type Responder = Box<dyn FnMut(&KbotFrame) -> Vec<KbotFrame> + Send>;

/// Mock CAN 适配器
pub struct MockCanAdapter {
    name: String,
    receive_queue: Arc<Mutex<VecDeque<KbotFrame>>>,
    sent_frames: Arc<Mutex<Vec<KbotFrame>>>,
    link_down: Arc<AtomicBool>,
    responder: Option<Responder>,
    /// 队列为空时是否真实等待超时时长
    blocking_timeouts: bool,
    receive_timeout: Duration,
}

/// 测试侧句柄：适配器移交给驱动后仍可注入帧、读取发送记录
#[derive(Clone)]
pub struct MockCanHandle {
    receive_queue: Arc<Mutex<VecDeque<KbotFrame>>>,
    sent_frames: Arc<Mutex<Vec<KbotFrame>>>,
    link_down: Arc<AtomicBool>,
}

impl MockCanAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            receive_queue: Arc::new(Mutex::new(VecDeque::new())),
            sent_frames: Arc::new(Mutex::new(Vec::new())),
            link_down: Arc::new(AtomicBool::new(false)),
            responder: None,
            blocking_timeouts: false,
            receive_timeout: Duration::from_millis(2),
        }
    }

    pub fn with_responder(
        mut self,
        responder: impl FnMut(&KbotFrame) -> Vec<KbotFrame> + Send + 'static,
    ) -> Self {
        self.responder = Some(Box::new(responder));
        self
    }

    pub fn with_blocking_timeouts(mut self) -> Self {
        self.blocking_timeouts = true;
        self
    }

    pub fn handle(&self) -> MockCanHandle {
        MockCanHandle {
            receive_queue: self.receive_queue.clone(),
            sent_frames: self.sent_frames.clone(),
            link_down: self.link_down.clone(),
        }
    }

    fn check_link(&self) -> Result<(), CanError> {
        if self.link_down.load(Ordering::Acquire) {
            return Err(CanError::Device(CanDeviceError::new(
                CanDeviceErrorKind::NotUp,
                format!("mock interface '{}' is down", self.name),
            )));
        }
        Ok(())
    }
}

impl CanAdapter for MockCanAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, frame: KbotFrame) -> Result<(), CanError> {
        self.check_link()?;
        self.sent_frames.lock().push(frame);
        if let Some(responder) = self.responder.as_mut() {
            let responses = responder(&frame);
            self.receive_queue.lock().extend(responses);
        }
        Ok(())
    }

    fn receive(&mut self) -> Result<KbotFrame, CanError> {
        self.check_link()?;
        if let Some(frame) = self.receive_queue.lock().pop_front() {
            return Ok(frame);
        }
        if self.blocking_timeouts && !self.receive_timeout.is_zero() {
            std::thread::sleep(self.receive_timeout);
        }
        Err(CanError::Timeout)
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        self.receive_timeout = timeout;
    }
}

impl MockCanHandle {
    /// 注入一帧到接收队列
    pub fn inject(&self, frame: KbotFrame) {
        self.receive_queue.lock().push_back(frame);
    }

    pub fn sent_frames(&self) -> Vec<KbotFrame> {
        self.sent_frames.lock().clone()
    }

    pub fn clear_sent(&self) {
        self.sent_frames.lock().clear();
    }

    pub fn pending(&self) -> usize {
        self.receive_queue.lock().len()
    }

    /// 模拟接口掉线 / 恢复
    pub fn set_link_down(&self, down: bool) {
        self.link_down.store(down, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_send_and_receive() {
        let mut adapter = MockCanAdapter::new("can0");
        let handle = adapter.handle();
        adapter.send(KbotFrame::new_extended(0x1, &[1])).unwrap();
        assert_eq!(handle.sent_frames().len(), 1);

        assert!(matches!(adapter.receive(), Err(CanError::Timeout)));
        handle.inject(KbotFrame::new_extended(0x2, &[2]));
        assert_eq!(adapter.receive().unwrap().id, 0x2);
    }

    #[test]
    fn test_mock_responder() {
        let mut adapter = MockCanAdapter::new("can1")
            .with_responder(|frame| vec![KbotFrame::new_extended(frame.id + 1, &[])]);
        adapter.send(KbotFrame::new_extended(0x10, &[])).unwrap();
        assert_eq!(adapter.try_receive().unwrap().unwrap().id, 0x11);
        assert!(adapter.try_receive().unwrap().is_none());
    }

    #[test]
    fn test_mock_link_down() {
        let mut adapter = MockCanAdapter::new("can2");
        let handle = adapter.handle();
        handle.set_link_down(true);
        let err = adapter.send(KbotFrame::new_extended(0x1, &[])).unwrap_err();
        assert!(err.is_link_failure());
        handle.set_link_down(false);
        assert!(adapter.send(KbotFrame::new_extended(0x1, &[])).is_ok());
    }

    #[test]
    fn test_mock_blocking_timeout_waits() {
        let mut adapter = MockCanAdapter::new("can3").with_blocking_timeouts();
        let start = std::time::Instant::now();
        let result = adapter.receive_timeout(Duration::from_millis(3));
        assert!(matches!(result, Err(CanError::Timeout)));
        assert!(start.elapsed() >= Duration::from_millis(3));
    }
}
