//! 站点定义
//!
//! 每个承运人/码头站点实现 `Spider`：提供起始请求、规则集与可受理的查询类型。

use std::collections::HashMap;
use std::sync::Arc;

use clap::ValueEnum;
use indexmap::IndexMap;
use strum::{Display, EnumString};

use crate::core::config::SiteConfig;
use crate::core::error::{CrawlError, Result};
use crate::engine::routing::{RequestOption, RoutingRule};

pub mod aclu;
pub mod china_southern;
pub mod global_terminal;

/// 查询编号类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum SearchType {
    /// 海运提单号 (Master B/L)
    Mbl,
    /// 订舱号
    Booking,
    /// 货柜号
    Container,
    /// 空运主单号 (MAWB)
    Awb,
}

/// 一次追踪任务
///
/// `task_ids` 与 `search_nos` 为平行数组；同一查询编号可由多个任务共享，
/// 其抽取结果会展开回每个任务。
#[derive(Debug, Clone)]
pub struct TrackTask {
    pub task_ids: Vec<String>,
    pub search_nos: Vec<String>,
    pub search_type: SearchType,
    /// 站点专属附加参数 (KEY=VALUE)
    pub extra: HashMap<String, String>,
    /// 是否留存原始页面
    pub save_pages: bool,
}

impl TrackTask {
    pub fn new(
        task_ids: Vec<String>,
        search_nos: Vec<String>,
        search_type: SearchType,
    ) -> Result<Self> {
        if task_ids.len() != search_nos.len() {
            return Err(CrawlError::Custom(format!(
                "task_ids/search_nos length mismatch: {} vs {}",
                task_ids.len(),
                search_nos.len()
            )));
        }
        if search_nos.is_empty() {
            return Err(CrawlError::Custom("empty search_nos".to_string()));
        }
        Ok(Self {
            task_ids,
            search_nos,
            search_type,
            extra: HashMap::new(),
            save_pages: false,
        })
    }

    pub fn with_extra(mut self, extra: HashMap<String, String>) -> Self {
        self.extra = extra;
        self
    }

    pub fn with_save_pages(mut self, save: bool) -> Self {
        self.save_pages = save;
        self
    }

    /// 查询编号 → 任务 ID 列表
    pub fn key_map(&self) -> IndexMap<String, Vec<String>> {
        let mut map: IndexMap<String, Vec<String>> = IndexMap::new();
        for (no, tid) in self.search_nos.iter().zip(self.task_ids.iter()) {
            map.entry(no.clone()).or_default().push(tid.clone());
        }
        map
    }

    /// 去重后的查询编号，保持输入顺序
    pub fn unique_search_nos(&self) -> Vec<String> {
        self.key_map().keys().cloned().collect()
    }
}

/// 站点定义 Trait
///
/// 站点不直接发请求：起始与后续流程一律以 RequestOption 声明，
/// 由引擎统一排程。
pub trait Spider: Send + Sync {
    /// 站点唯一标识
    fn id(&self) -> &'static str;

    /// 站点配置
    fn config(&self) -> &SiteConfig;

    /// 基础 URL
    fn base_url(&self) -> &str;

    /// 可受理的查询类型
    fn accepts(&self) -> &'static [SearchType];

    /// 本站点的规则集
    fn rules(&self) -> Vec<Arc<dyn RoutingRule>>;

    /// 构造起始请求
    fn start(&self, task: &TrackTask) -> Result<Vec<RequestOption>>;

    /// 校验查询类型是否受理
    fn ensure_supported(&self, task: &TrackTask) -> Result<()> {
        if self.accepts().contains(&task.search_type) {
            Ok(())
        } else {
            Err(CrawlError::UnsupportedSearchType(format!(
                "{} does not accept `{}`",
                self.id(),
                task.search_type
            )))
        }
    }
}

// ============================================================================
// 站点注册表
// ============================================================================

type SpiderFactory = Box<dyn Fn(SiteConfig) -> Box<dyn Spider> + Send + Sync>;

pub struct SpiderRegistry {
    factories: HashMap<String, SpiderFactory>,
}

impl SpiderRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("carrier_aclu", |cfg| Box::new(aclu::AcluSpider::new(cfg)));
        registry.register("air_china_southern", |cfg| {
            Box::new(china_southern::ChinaSouthernSpider::new(cfg))
        });
        registry.register("terminal_global", |cfg| {
            Box::new(global_terminal::GlobalTerminalSpider::new(cfg))
        });
        registry
    }

    pub fn register<F>(&mut self, id: &str, factory: F)
    where
        F: Fn(SiteConfig) -> Box<dyn Spider> + Send + Sync + 'static,
    {
        self.factories.insert(id.to_string(), Box::new(factory));
    }

    pub fn create(&self, id: &str, config: SiteConfig) -> Option<Box<dyn Spider>> {
        self.factories.get(id).map(|f| f(config))
    }

    pub fn list(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for SpiderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_map_groups_duplicate_search_nos() {
        let task = TrackTask::new(
            vec!["1".into(), "2".into(), "3".into()],
            vec!["AAA".into(), "BBB".into(), "AAA".into()],
            SearchType::Container,
        )
        .unwrap();

        let map = task.key_map();
        assert_eq!(map["AAA"], vec!["1".to_string(), "3".to_string()]);
        assert_eq!(map["BBB"], vec!["2".to_string()]);
        assert_eq!(task.unique_search_nos(), vec!["AAA", "BBB"]);
    }

    #[test]
    fn mismatched_lengths_rejected() {
        let err = TrackTask::new(
            vec!["1".into()],
            vec!["AAA".into(), "BBB".into()],
            SearchType::Mbl,
        );
        assert!(err.is_err());
    }

    #[test]
    fn registry_knows_builtin_spiders() {
        let registry = SpiderRegistry::new();
        let ids = registry.list();
        assert!(ids.contains(&"carrier_aclu"));
        assert!(ids.contains(&"air_china_southern"));
        assert!(ids.contains(&"terminal_global"));
        assert!(registry.create("nope", SiteConfig::default()).is_none());
    }
}
