//! 代理会话管理 Actor
//!
//! 上游网关按用户名内嵌的 session 标识分配出口 IP；
//! 切换出口只需换一个随机 session 重建客户端，无需本地代理进程。

use std::sync::Arc;

use flume::{Receiver, Sender};
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::config::{AppConfig, ProxyConfig};

const SESSION_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const SESSION_LEN: usize = 20;

/// 一个可直接交给 HTTP 客户端的代理出口
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub gateway: String,
    /// `groups-{group},session-{session},country-{country}`
    pub username: String,
    pub password: Option<String>,
    pub session: String,
}

pub enum ProxyMsg {
    /// 查询当前出口
    Current {
        reply: Sender<Option<ProxyEndpoint>>,
    },
    /// 强制切换出口 (铸造新 session)
    Rotate {
        reply: Option<tokio::sync::oneshot::Sender<Option<ProxyEndpoint>>>,
    },
}

pub struct ProxyManager {
    rx: Receiver<ProxyMsg>,
    config: ProxyConfig,
    current: Option<ProxyEndpoint>,
}

impl ProxyManager {
    pub fn start(config: Arc<AppConfig>) -> (Sender<ProxyMsg>, JoinHandle<()>) {
        let (tx, rx) = flume::unbounded();

        let mut actor = ProxyManager {
            rx,
            config: config.proxy.clone(),
            current: None,
        };

        if actor.config.is_enabled() {
            actor.current = actor.mint();
            info!("代理服务初始化完成");
        } else {
            debug!("未配置代理网关，代理层停用");
        }

        let handle = tokio::spawn(async move {
            actor.run().await;
        });

        (tx, handle)
    }

    async fn run(&mut self) {
        while let Ok(msg) = self.rx.recv_async().await {
            match msg {
                ProxyMsg::Current { reply } => {
                    let _ = reply.send(self.current.clone());
                }
                ProxyMsg::Rotate { reply } => {
                    if self.config.is_enabled() {
                        warn!("收到切换代理会话请求...");
                        self.current = self.mint();
                        if let Some(endpoint) = &self.current {
                            debug!("切换至会话: {}", endpoint.session);
                        }
                    }
                    if let Some(tx) = reply {
                        let _ = tx.send(self.current.clone());
                    }
                }
            }
        }
    }

    /// 铸造一个新的代理出口
    fn mint(&self) -> Option<ProxyEndpoint> {
        let gateway = self.config.gateway.clone()?;
        let session = generate_session_id();
        let username = format!(
            "groups-{},session-{},country-{}",
            self.config.group, session, self.config.country
        );
        Some(ProxyEndpoint {
            gateway,
            username,
            password: self.config.password.clone(),
            session,
        })
    }
}

fn generate_session_id() -> String {
    let mut rng = rand::rng();
    (0..SESSION_LEN)
        .map(|_| SESSION_CHARS[rng.random_range(0..SESSION_CHARS.len())] as char)
        .collect()
}
