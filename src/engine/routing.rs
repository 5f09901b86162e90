//! 路由规则分发核心 (Rule Dispatch Core)
//!
//! 站点爬取流程被表达为一组具名规则：每条规则解析一页响应，
//! 产出领域记录、后续请求（携带应处理该响应的规则标记）或
//! 由顶层引擎消费的整轮重启哨兵。规则名经由请求元数据往返传递，
//! 是响应与处理器之间唯一的路由机制。

use std::sync::Arc;

use bon::Builder;
use indexmap::IndexMap;
use scraper::Html;
use serde::de::DeserializeOwned;
use serde_json::Value;
use strum::Display;
use url::Url;

use crate::core::error::{CrawlError, Result};
use crate::core::model::TrackingItem;

/// 请求元数据：随请求登记、随响应原样返还的不透明键值集
pub type Meta = serde_json::Map<String, Value>;

/// 出站请求的 HTTP 方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum RequestMethod {
    Get,
    /// 表单编码 POST (application/x-www-form-urlencoded，字段顺序保序)
    PostForm,
    /// 原始 body POST (由规则自备 Content-Type)
    PostBody,
}

/// 声明式出站请求
///
/// 规则只描述"要抓什么"；实际发送、会话注入与阻断检测由网络层完成。
#[derive(Debug, Clone, Builder)]
pub struct RequestOption {
    /// 应处理该响应的规则标记
    #[builder(into)]
    pub rule_name: String,
    pub method: RequestMethod,
    #[builder(into)]
    pub url: String,
    /// 站点要求的额外 Header 覆盖
    #[builder(default)]
    pub headers: Vec<(String, String)>,
    /// 表单字段 (PostForm)，插入顺序即发送顺序
    #[builder(default)]
    pub form_data: IndexMap<String, String>,
    /// 原始请求体 (PostBody)
    pub body: Option<String>,
    /// 往返传递的请求上下文
    #[builder(default)]
    pub meta: Meta,
}

/// 一页已抓取的响应
#[derive(Debug, Clone)]
pub struct RoutingResponse {
    /// 跟随重定向后的最终 URL
    pub url: Url,
    pub status: u16,
    pub text: String,
    /// 来源 RequestOption 的元数据（含保留的规则标记键）
    pub meta: Meta,
}

impl RoutingResponse {
    /// 解析为 HTML 文档
    pub fn html(&self) -> Html {
        Html::parse_document(&self.text)
    }

    /// 解析为 JSON 载荷
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.text).map_err(CrawlError::Serialization)
    }

    /// 取出字符串型元数据
    pub fn meta_str(&self, key: &str) -> Result<&str> {
        self.meta
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| CrawlError::ResponseFormat(format!("meta missing `{}`", key)))
    }

    /// 取出字符串数组型元数据
    pub fn meta_str_vec(&self, key: &str) -> Result<Vec<String>> {
        let values = self
            .meta
            .get(key)
            .and_then(Value::as_array)
            .ok_or_else(|| CrawlError::ResponseFormat(format!("meta missing `{}`", key)))?;

        Ok(values
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect())
    }
}

/// 规则处理结果的联合型别
#[derive(Debug, Clone)]
pub enum RuleOutput {
    /// 领域记录，交由管线归档
    Item(TrackingItem),
    /// 后续请求，回到引擎队列
    Request(RequestOption),
    /// 整轮重启哨兵：仅由顶层引擎消费
    Restart { reason: String },
}

impl From<TrackingItem> for RuleOutput {
    fn from(item: TrackingItem) -> Self {
        RuleOutput::Item(item)
    }
}

impl From<RequestOption> for RuleOutput {
    fn from(option: RequestOption) -> Self {
        RuleOutput::Request(option)
    }
}

/// 单步解析规则
///
/// `handle` 是纯解析：不做 I/O、不做阻塞调用；
/// 流程推进一律以 RequestOption 表达。
pub trait RoutingRule: Send + Sync {
    /// 规则标记 (在单一站点内必须唯一)
    fn name(&self) -> &'static str;

    /// 原始页面留存时的文件名
    fn save_name(&self, _response: &RoutingResponse) -> String {
        format!("{}.html", self.name())
    }

    fn handle(&self, response: &RoutingResponse) -> Result<Vec<RuleOutput>>;
}

/// 规则管理器：规则标记 → 处理器
pub struct RuleManager {
    rules: IndexMap<String, Arc<dyn RoutingRule>>,
}

impl RuleManager {
    /// 元数据中的保留键，round-trip 规则标记
    pub const META_RULE_NAME: &'static str = "routing_rule";

    pub fn new(rules: Vec<Arc<dyn RoutingRule>>) -> Self {
        let rules = rules
            .into_iter()
            .map(|rule| (rule.name().to_string(), rule))
            .collect();
        Self { rules }
    }

    /// 为出站请求组装响应侧元数据：先照搬，保留键最后写入确保不被遮蔽
    pub fn meta_for(option: &RequestOption) -> Meta {
        let mut meta = option.meta.clone();
        meta.insert(
            Self::META_RULE_NAME.to_string(),
            Value::String(option.rule_name.clone()),
        );
        meta
    }

    /// 依响应元数据中的标记选出处理规则
    pub fn rule_for(&self, response: &RoutingResponse) -> Result<Arc<dyn RoutingRule>> {
        let tag = response
            .meta
            .get(Self::META_RULE_NAME)
            .and_then(Value::as_str)
            .ok_or_else(|| CrawlError::UnknownRule("<missing>".to_string()))?;

        self.rules
            .get(tag)
            .cloned()
            .ok_or_else(|| CrawlError::UnknownRule(tag.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.rules.keys().map(String::as_str).collect()
    }
}
