//! 结果管线 (Item Pipeline)
//!
//! 收集规则产出的记录流，依路由键 (货柜号/提单号/主单号) 展开回
//! 各任务，并汇总为最终追踪报告。

use indexmap::IndexMap;
use serde::Serialize;
use strum::Display;
use tracing::warn;

use crate::core::error::CrawlError;
use crate::core::model::TrackingItem;
use crate::sites::TrackTask;

/// 单任务最终状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    Done,
    DataNotFound,
    Error,
}

/// 单任务汇总
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub search_no: String,
    pub status: ResultStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub items: Vec<TrackingItem>,
}

/// 整次爬取的最终报告
#[derive(Debug, Clone, Serialize)]
pub struct TrackReport {
    pub spider: String,
    pub search_type: String,
    pub results: Vec<TaskOutcome>,
}

impl TrackReport {
    pub fn collected(&self) -> usize {
        self.results.iter().map(|r| r.items.len()).sum()
    }

    pub fn error_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == ResultStatus::Error)
            .count()
    }
}

/// 记录流收集器
pub struct ItemPipeline {
    spider: String,
    search_type: String,
    /// 查询编号 → 共享该编号的任务 ID
    key_map: IndexMap<String, Vec<String>>,
    /// 任务 ID → 暂存汇总
    slots: IndexMap<String, TaskOutcome>,
    /// 无法路由的记录数 (仅计数告警，不中断)
    unrouted: usize,
}

impl ItemPipeline {
    pub fn new(spider: &str, task: &TrackTask) -> Self {
        let key_map = task.key_map();
        let mut slots = IndexMap::new();
        for (search_no, task_ids) in &key_map {
            for task_id in task_ids {
                slots.insert(
                    task_id.clone(),
                    TaskOutcome {
                        task_id: task_id.clone(),
                        search_no: search_no.clone(),
                        status: ResultStatus::DataNotFound,
                        detail: None,
                        items: Vec::new(),
                    },
                );
            }
        }
        Self {
            spider: spider.to_string(),
            search_type: task.search_type.to_string(),
            key_map,
            slots,
            unrouted: 0,
        }
    }

    /// 收集一笔记录
    pub fn collect(&mut self, item: TrackingItem) {
        let task_ids = self.route(&item);
        if task_ids.is_empty() {
            self.unrouted += 1;
            warn!(key = ?item.key(), "记录无法路由至任何任务，已丢弃");
            return;
        }

        match item {
            TrackingItem::NotFound(ref data) => {
                for task_id in &task_ids {
                    if let Some(slot) = self.slots.get_mut(task_id) {
                        slot.status = ResultStatus::DataNotFound;
                        slot.detail = data.detail.clone();
                    }
                }
            }
            TrackingItem::Error(ref data) => {
                for task_id in &task_ids {
                    if let Some(slot) = self.slots.get_mut(task_id) {
                        slot.status = ResultStatus::Error;
                        slot.detail = data.detail.clone();
                    }
                }
            }
            _ => {
                for task_id in &task_ids {
                    if let Some(slot) = self.slots.get_mut(task_id) {
                        slot.status = ResultStatus::Done;
                        slot.items.push(item.clone());
                    }
                }
            }
        }
    }

    /// 抓取层失败：整批任务标记错误
    pub fn record_failure(&mut self, err: &CrawlError) {
        for slot in self.slots.values_mut() {
            if slot.status != ResultStatus::Done {
                slot.status = ResultStatus::Error;
                slot.detail = Some(err.to_string());
            }
        }
    }

    /// 路由决策：键命中 → 对应任务；无键且仅单一查询 → 该查询的任务
    fn route(&self, item: &TrackingItem) -> Vec<String> {
        if let Some(key) = item.key()
            && let Some(task_ids) = self.key_map.get(key)
        {
            return task_ids.clone();
        }

        if self.key_map.len() == 1 {
            return self.key_map.values().next().cloned().unwrap_or_default();
        }

        Vec::new()
    }

    pub fn unrouted(&self) -> usize {
        self.unrouted
    }

    /// 汇整为最终报告
    pub fn finish(self) -> TrackReport {
        TrackReport {
            spider: self.spider,
            search_type: self.search_type,
            results: self.slots.into_values().collect(),
        }
    }
}
