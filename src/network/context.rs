//! 服务上下文 (ServiceContext)
//!
//! 统一管理所有副作用操作，包含 HTTP 服务、会话、代理与恢复协调。

use std::sync::Arc;
use std::time::Duration;

use flume::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::actors::proxy::ProxyMsg;
use crate::core::config::AppConfig;
use crate::core::coordinator::Coordinator;
use crate::core::error::{BlockReason, Result};
use crate::core::event::{CrawlEvent, EventSender};
use crate::engine::routing::{RequestOption, RoutingResponse};
use crate::network::service::HttpService;
use crate::network::session::Session;

/// 服务上下文
///
/// 封装了所有网络请求和系统恢复相关的操作
#[derive(Clone)]
pub struct ServiceContext {
    /// HTTP 服务
    pub http: Arc<HttpService>,
    /// 会话管理（Cookie、UA 等）
    pub session: Arc<Session>,
    /// 代理管理 Actor 通信
    pub proxy: Sender<ProxyMsg>,
    /// 应用配置
    pub config: Arc<AppConfig>,
    /// 全局状态协调器
    pub coordinator: Coordinator,
    /// 优雅退出令牌
    pub shutdown: CancellationToken,
    /// 事件发送器（可选）
    pub events: Option<EventSender>,
}

impl ServiceContext {
    pub fn new(
        http: Arc<HttpService>,
        session: Arc<Session>,
        proxy: Sender<ProxyMsg>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            http,
            session,
            proxy,
            config,
            coordinator: Coordinator::new(),
            shutdown: CancellationToken::new(),
            events: None,
        }
    }

    /// 设置事件发送器
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// 发送事件
    pub fn emit(&self, event: CrawlEvent) {
        if let Some(ref sender) = self.events {
            sender.emit(event);
        }
    }

    /// 执行一个声明式请求
    pub async fn execute(&self, option: &RequestOption) -> Result<RoutingResponse> {
        self.http.execute(option).await
    }

    /// 乐观执行器
    ///
    /// 封装"试错-等待-重试"的逻辑。
    pub async fn run_optimistic<F, Fut, T>(
        &self,
        desc: impl std::fmt::Display,
        max_attempts: u32,
        task: F,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match task().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if attempts >= max_attempts || self.shutdown.is_cancelled() {
                        return Err(e);
                    }

                    // 核心逻辑：失败后检查系统状态
                    self.wait_if_blocked().await;

                    let wait = Duration::from_millis(500 * attempts as u64);
                    warn!(
                        "任务失败 [{}] (第 {}/{} 次): {}。将在 {:?} 后重试...",
                        desc, attempts, max_attempts, e, wait
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    // =========================================================================
    // 恢复操作
    // =========================================================================

    /// 阻断恢复：切换代理会话并重建客户端
    ///
    /// 通过协调器确保只有一个任务执行切换，其余任务等待恢复完成。
    pub async fn recover(&self, reason: BlockReason) {
        self.emit(CrawlEvent::Recovering {
            reason: reason.to_string(),
        });

        if let Some(_guard) = self.coordinator.try_acquire_fix(reason).await {
            self.do_rotate_proxy().await;
        }

        self.emit(CrawlEvent::RecoveryComplete);
    }

    /// 实际执行代理会话切换
    async fn do_rotate_proxy(&self) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        if self.proxy.send(ProxyMsg::Rotate { reply: Some(tx) }).is_ok() {
            // 设定一个合理的超时，防止 ProxyActor 挂死导致全线崩溃
            match tokio::time::timeout(Duration::from_secs(30), rx).await {
                Ok(Ok(endpoint)) => {
                    let session_id = endpoint.as_ref().map(|e| e.session.clone());
                    if let Err(e) = self.http.recreate_client(endpoint.as_ref()) {
                        warn!("客户端重建失败: {}", e);
                        return;
                    }
                    self.emit(CrawlEvent::ProxyRotated {
                        session: session_id,
                    });
                    debug!("代理会话已完成切换");
                }
                Ok(Err(_)) => warn!("代理 Actor 已退出"),
                Err(_) => warn!("代理切换响应超时"),
            }
        }
    }

    /// 强制切换代理（不经过协调器）
    pub async fn force_rotate_proxy(&self) {
        self.do_rotate_proxy().await;
    }

    /// 等待系统恢复运行
    pub async fn wait_if_blocked(&self) {
        if !self.coordinator.is_running() {
            debug!("系统阻塞中，等待恢复...");
            self.coordinator.wait_until_running().await;
        }
    }
}
