//! 事件系统定义
//!
//! 用于 Engine 与 UI 之间的完全解耦通信

use flume::{Receiver, Sender};

/// 爬虫事件类型
#[derive(Debug, Clone)]
pub enum CrawlEvent {
    /// 任务开始
    TaskStarted {
        spider_id: String,
        search_type: String,
        search_nos: Vec<String>,
    },

    /// 已发出一个路由请求
    RequestIssued { rule: String, url: String },

    /// 规则处理完一页响应
    PageParsed {
        rule: String,
        items: usize,
        requests: usize,
    },

    /// 检测到阻断
    BlockDetected { reason: String },

    /// 阻断恢复中
    Recovering { reason: String },

    /// 阻断恢复完成
    RecoveryComplete,

    /// 代理会话切换
    ProxyRotated { session: Option<String> },

    /// 整轮重启排程
    RestartScheduled {
        attempt: u32,
        budget: u32,
        reason: String,
    },

    /// 任务完成
    TaskCompleted {
        spider_id: String,
        collected: usize,
        errors: usize,
    },

    /// 任务失败
    TaskFailed { error: String },

    /// 日志消息（用于 UI 显示）
    Log { level: LogLevel, message: String },
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// 事件发送器
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<CrawlEvent>,
}

impl EventSender {
    pub fn new(tx: Sender<CrawlEvent>) -> Self {
        Self { tx }
    }

    /// 发送事件
    pub fn emit(&self, event: CrawlEvent) {
        let _ = self.tx.send(event);
    }

    /// 发送日志事件
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(CrawlEvent::Log {
            level,
            message: message.into(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }
}

/// 事件接收器
pub struct EventReceiver {
    rx: Receiver<CrawlEvent>,
}

impl EventReceiver {
    pub fn new(rx: Receiver<CrawlEvent>) -> Self {
        Self { rx }
    }

    /// 非阻塞接收事件
    pub fn try_recv(&self) -> Option<CrawlEvent> {
        self.rx.try_recv().ok()
    }

    /// 异步接收事件
    pub async fn recv_async(&self) -> Option<CrawlEvent> {
        self.rx.recv_async().await.ok()
    }
}

/// 创建事件通道
pub fn create_event_channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = flume::unbounded();
    (EventSender::new(tx), EventReceiver::new(rx))
}
