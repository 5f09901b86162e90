//! 配置管理系统 (Configuration Management)
//!
//! 负责 `config.toml` 的反序列化及其层级结构映射，支持环境变量与默认值回退机制。

use std::collections::HashMap;
use std::path::Path;

use bon::Builder;
use config::{Config, File};
use serde::Deserialize;

use crate::core::error::{CrawlError, Result};

/// 全局应用配置
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct AppConfig {
    /// 原始页面与报告的持久化目录基准路径
    #[serde(default = "default_save_path")]
    pub save_path: String,

    /// 上游代理网关配置
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// 爬虫调度引擎通用参数
    #[serde(default)]
    pub engine: EngineConfig,

    /// 站点特定配置覆盖映射
    #[serde(default)]
    pub sites: HashMap<String, SiteConfig>,
}

/// 上游代理网关配置
///
/// 对应按 Session 轮换出口 IP 的代理服务；未配置 gateway 时代理层整体停用。
#[derive(Debug, Deserialize, Builder, Clone, Default)]
pub struct ProxyConfig {
    /// 网关地址，如 `http://proxy.example.com:9999`
    pub gateway: Option<String>,
    /// 账号分组标识
    #[serde(default)]
    pub group: String,
    pub password: Option<String>,
    /// 出口国别约束
    #[serde(default = "default_country")]
    pub country: String,
}

/// 调度引擎参数
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct EngineConfig {
    /// 全局请求并行度上限
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// 单次请求的乐观重试阈值
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// 整轮重启 (Restart) 预算
    #[serde(default = "default_restart_budget")]
    pub restart_budget: u32,
}

/// 站点特定配置覆盖
#[derive(Debug, Deserialize, Builder, Clone, Default)]
pub struct SiteConfig {
    /// 自定义域名 (用于镜像或测试环境)
    pub base_url: Option<String>,
    /// 站点独占请求并行度
    pub concurrent_requests: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            retry_count: default_retry_count(),
            restart_budget: default_restart_budget(),
        }
    }
}

fn default_save_path() -> String {
    "save_pages".to_string()
}
fn default_country() -> String {
    "US".to_string()
}
fn default_concurrency() -> usize {
    8
}
fn default_retry_count() -> u32 {
    3
}
fn default_restart_budget() -> u32 {
    3
}

impl AppConfig {
    /// 从文件系统中加载并解析配置
    pub fn load() -> Result<Self> {
        let config_path = Path::new("config.toml");
        let builder = Config::builder();

        let builder = if config_path.exists() {
            builder.add_source(File::from(config_path))
        } else {
            builder
        };

        let settings = builder.build().map_err(CrawlError::Config)?;
        settings.try_deserialize().map_err(CrawlError::Config)
    }

    pub fn site(&self, id: &str) -> SiteConfig {
        self.sites.get(id).cloned().unwrap_or_default()
    }
}

impl ProxyConfig {
    pub fn is_enabled(&self) -> bool {
        self.gateway.is_some()
    }
}
