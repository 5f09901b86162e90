//! 爬虫引擎调度器
//!
//! 负责单一追踪任务的生命周期：播种起始请求 -> 受限并发抓取 ->
//! 规则分发解析 -> 结果归档，并消化规则发出的整轮重启哨兵。

pub mod pipeline;
pub mod routing;
pub mod saver;
mod task;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::core::config::AppConfig;
use crate::core::error::{BlockReason, CrawlError, Result};
use crate::core::event::CrawlEvent;
use crate::core::model::{ErrorData, TrackingItem};
use crate::network::context::ServiceContext;
use crate::sites::{Spider, TrackTask};

use pipeline::{ItemPipeline, TrackReport};
use routing::{RequestOption, RuleManager, RuleOutput};
use saver::{FileSaver, NullSaver, PageSaver};
use task::FetchTask;

/// 爬虫引擎
pub struct CrawlEngine {
    spider: Arc<dyn Spider>,
    rules: Arc<RuleManager>,
    core: ServiceContext,
    config: Arc<AppConfig>,
}

impl CrawlEngine {
    pub fn new(spider: Arc<dyn Spider>, core: ServiceContext, config: Arc<AppConfig>) -> Self {
        let rules = Arc::new(RuleManager::new(spider.rules()));
        Self {
            spider,
            rules,
            core,
            config,
        }
    }

    /// 执行追踪流程
    pub async fn run(&self, task: TrackTask) -> Result<TrackReport> {
        self.spider.ensure_supported(&task)?;

        self.core.emit(CrawlEvent::TaskStarted {
            spider_id: self.spider.id().to_string(),
            search_type: task.search_type.to_string(),
            search_nos: task.unique_search_nos(),
        });

        match self.crawl(&task).await {
            Ok(report) => {
                self.core.emit(CrawlEvent::TaskCompleted {
                    spider_id: self.spider.id().to_string(),
                    collected: report.collected(),
                    errors: report.error_count(),
                });
                info!("采集任务已完成: {}", self.spider.id());
                Ok(report)
            }
            Err(e) => {
                error!("任务执行失败: {}", e);
                self.core.emit(CrawlEvent::TaskFailed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn crawl(&self, task: &TrackTask) -> Result<TrackReport> {
        let saver = self.make_saver(task);
        let mut pipeline = ItemPipeline::new(self.spider.id(), task);

        let concurrency = self
            .spider
            .config()
            .concurrent_requests
            .unwrap_or(self.config.engine.concurrency);
        let semaphore = Arc::new(Semaphore::new(concurrency));

        let mut join_set = JoinSet::new();
        let mut restarts = 0u32;

        self.seed(&mut join_set, task, &semaphore)?;

        // 主循环：抓取并发进行，解析在调度侧顺序消化
        while let Some(joined) = join_set.join_next().await {
            if self.core.shutdown.is_cancelled() {
                warn!("收到退出信号，中止剩余抓取");
                join_set.abort_all();
                break;
            }

            let response = match joined {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    error!("抓取失败: {}", e);
                    pipeline.record_failure(&e);
                    continue;
                }
                Err(e) => {
                    error!("并发调度错误: {}", e);
                    continue;
                }
            };

            let rule = match self.rules.rule_for(&response) {
                Ok(rule) => rule,
                Err(e) => {
                    error!("路由失败: {}", e);
                    pipeline.record_failure(&e);
                    continue;
                }
            };

            if task.save_pages {
                let save_name = rule.save_name(&response);
                if let Err(e) = saver.save(&save_name, &response.text).await {
                    warn!("页面留存失败 [{}]: {}", save_name, e);
                }
            }

            match rule.handle(&response) {
                Ok(outputs) => {
                    let mut items = 0usize;
                    let mut requests = 0usize;

                    for output in outputs {
                        match output {
                            RuleOutput::Item(item) => {
                                items += 1;
                                pipeline.collect(item);
                            }
                            RuleOutput::Request(option) => {
                                requests += 1;
                                self.spawn_fetch(&mut join_set, option, &semaphore);
                            }
                            RuleOutput::Restart { reason } => {
                                restarts += 1;
                                let budget = self.config.engine.restart_budget;
                                if restarts > budget {
                                    return Err(CrawlError::MaxRetryExceeded(restarts));
                                }

                                warn!(
                                    "规则要求整轮重启 ({}/{}): {}",
                                    restarts, budget, reason
                                );
                                self.core.emit(CrawlEvent::RestartScheduled {
                                    attempt: restarts,
                                    budget,
                                    reason: reason.clone(),
                                });

                                self.core.recover(BlockReason::Custom(reason)).await;
                                self.seed(&mut join_set, task, &semaphore)?;
                            }
                        }
                    }

                    debug!(rule = rule.name(), items, requests, "规则处理完成");
                    self.core.emit(CrawlEvent::PageParsed {
                        rule: rule.name().to_string(),
                        items,
                        requests,
                    });
                }
                // 站点明确回报查无数据：降级为单查询的 NotFound 记录
                Err(CrawlError::InvalidSearchNo(search_no)) => {
                    pipeline.collect(TrackingItem::NotFound(ErrorData {
                        search_no: Some(search_no),
                        search_type: Some(task.search_type.to_string()),
                        status: "ERROR".to_string(),
                        detail: Some("Data was not found".to_string()),
                    }));
                }
                Err(e) => {
                    error!("规则解析失败 [{}]: {}", rule.name(), e);
                    pipeline.record_failure(&e);
                }
            }
        }

        Ok(pipeline.finish())
    }

    /// 播种起始请求
    fn seed(
        &self,
        join_set: &mut JoinSet<Result<routing::RoutingResponse>>,
        task: &TrackTask,
        semaphore: &Arc<Semaphore>,
    ) -> Result<()> {
        for option in self.spider.start(task)? {
            self.spawn_fetch(join_set, option, semaphore);
        }
        Ok(())
    }

    fn spawn_fetch(
        &self,
        join_set: &mut JoinSet<Result<routing::RoutingResponse>>,
        option: RequestOption,
        semaphore: &Arc<Semaphore>,
    ) {
        let ctx = self.core.clone();
        let semaphore = semaphore.clone();
        let max_attempts = self.config.engine.retry_count;
        join_set.spawn(FetchTask::new(option).run(ctx, semaphore, max_attempts));
    }

    fn make_saver(&self, task: &TrackTask) -> Arc<dyn PageSaver> {
        if task.save_pages {
            let folder = PathBuf::from(&self.config.save_path).join(format!(
                "[{}] {}",
                self.spider.id(),
                task.unique_search_nos().join(",")
            ));
            Arc::new(FileSaver::new(folder))
        } else {
            Arc::new(NullSaver)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::actors::proxy::ProxyManager;
    use crate::core::config::{EngineConfig, SiteConfig};
    use crate::core::model::Container;
    use crate::engine::pipeline::ResultStatus;
    use crate::engine::routing::{Meta, RequestMethod, RoutingResponse};
    use crate::network::service::HttpService;
    use crate::network::session::Session;
    use crate::sites::SearchType;

    fn test_config(restart_budget: u32) -> Arc<AppConfig> {
        Arc::new(
            AppConfig::builder()
                .save_path("save_pages".to_string())
                .proxy(Default::default())
                .engine(
                    EngineConfig::builder()
                        .concurrency(2)
                        .retry_count(1)
                        .restart_budget(restart_budget)
                        .build(),
                )
                .sites(Default::default())
                .build(),
        )
    }

    fn test_ctx(config: Arc<AppConfig>) -> ServiceContext {
        let (proxy_tx, _handle) = ProxyManager::start(config.clone());
        let session = Arc::new(Session::new());
        let http = Arc::new(HttpService::new(session.clone()));
        ServiceContext::new(http, session, proxy_tx, config)
    }

    /// 列表页逐行列出柜号，每行展开一个明细请求
    struct ListRule {
        base: String,
    }

    impl routing::RoutingRule for ListRule {
        fn name(&self) -> &'static str {
            "LIST"
        }

        fn handle(&self, response: &RoutingResponse) -> Result<Vec<RuleOutput>> {
            Ok(response
                .text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(|container_no| {
                    let mut meta = Meta::new();
                    meta.insert("container_no".into(), container_no.into());
                    RequestOption::builder()
                        .rule_name("DETAIL")
                        .method(RequestMethod::Get)
                        .url(format!("{}/detail", self.base))
                        .meta(meta)
                        .build()
                        .into()
                })
                .collect())
        }
    }

    struct DetailRule;

    impl routing::RoutingRule for DetailRule {
        fn name(&self) -> &'static str {
            "DETAIL"
        }

        fn handle(&self, response: &RoutingResponse) -> Result<Vec<RuleOutput>> {
            let container_no = response.meta_str("container_no")?;
            Ok(vec![
                TrackingItem::Container(Container {
                    container_no: container_no.to_string(),
                    ..Container::default()
                })
                .into(),
            ])
        }
    }

    struct ChainSpider {
        base: String,
        config: SiteConfig,
    }

    impl Spider for ChainSpider {
        fn id(&self) -> &'static str {
            "stub_chain"
        }

        fn config(&self) -> &SiteConfig {
            &self.config
        }

        fn base_url(&self) -> &str {
            &self.base
        }

        fn accepts(&self) -> &'static [SearchType] {
            &[SearchType::Container]
        }

        fn rules(&self) -> Vec<Arc<dyn routing::RoutingRule>> {
            vec![
                Arc::new(ListRule {
                    base: self.base.clone(),
                }),
                Arc::new(DetailRule),
            ]
        }

        fn start(&self, _task: &TrackTask) -> Result<Vec<RequestOption>> {
            Ok(vec![
                RequestOption::builder()
                    .rule_name("LIST")
                    .method(RequestMethod::Get)
                    .url(format!("{}/list", self.base))
                    .build(),
            ])
        }
    }

    #[tokio::test]
    async fn chained_rules_fill_the_report() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/list"))
            .respond_with(ResponseTemplate::new(200).set_body_string("CONT1\nCONT2"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/detail"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let config = test_config(1);
        let spider = Arc::new(ChainSpider {
            base: server.uri(),
            config: SiteConfig::default(),
        });
        let engine = CrawlEngine::new(spider, test_ctx(config.clone()), config);

        let task = TrackTask::new(
            vec!["1".into(), "2".into()],
            vec!["CONT1".into(), "CONT2".into()],
            SearchType::Container,
        )
        .unwrap();

        let report = engine.run(task).await.unwrap();
        assert_eq!(report.collected(), 2);
        assert!(report.results.iter().all(|r| r.status == ResultStatus::Done));
    }

    /// 首次命中要求整轮重启，之后恢复正常
    struct FlakyRule {
        calls: AtomicUsize,
    }

    impl routing::RoutingRule for FlakyRule {
        fn name(&self) -> &'static str {
            "FLAKY"
        }

        fn handle(&self, _response: &RoutingResponse) -> Result<Vec<RuleOutput>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(vec![RuleOutput::Restart {
                    reason: "session expired".to_string(),
                }])
            } else {
                Ok(vec![
                    TrackingItem::Container(Container {
                        container_no: "CONT1".to_string(),
                        ..Container::default()
                    })
                    .into(),
                ])
            }
        }
    }

    struct FlakySpider {
        base: String,
        config: SiteConfig,
    }

    impl Spider for FlakySpider {
        fn id(&self) -> &'static str {
            "stub_flaky"
        }

        fn config(&self) -> &SiteConfig {
            &self.config
        }

        fn base_url(&self) -> &str {
            &self.base
        }

        fn accepts(&self) -> &'static [SearchType] {
            &[SearchType::Container]
        }

        fn rules(&self) -> Vec<Arc<dyn routing::RoutingRule>> {
            vec![Arc::new(FlakyRule {
                calls: AtomicUsize::new(0),
            })]
        }

        fn start(&self, _task: &TrackTask) -> Result<Vec<RequestOption>> {
            Ok(vec![
                RequestOption::builder()
                    .rule_name("FLAKY")
                    .method(RequestMethod::Get)
                    .url(format!("{}/flaky", self.base))
                    .build(),
            ])
        }
    }

    async fn flaky_fixture() -> (MockServer, Arc<FlakySpider>) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("page"))
            .mount(&server)
            .await;

        let spider = Arc::new(FlakySpider {
            base: server.uri(),
            config: SiteConfig::default(),
        });
        (server, spider)
    }

    #[tokio::test]
    async fn restart_reseeds_within_budget() {
        let (_server, spider) = flaky_fixture().await;
        let config = test_config(2);
        let engine = CrawlEngine::new(spider, test_ctx(config.clone()), config);

        let task =
            TrackTask::new(vec!["1".into()], vec!["CONT1".into()], SearchType::Container).unwrap();

        let report = engine.run(task).await.unwrap();
        assert_eq!(report.collected(), 1);
        assert_eq!(report.results[0].status, ResultStatus::Done);
    }

    #[tokio::test]
    async fn restart_over_budget_aborts() {
        let (_server, spider) = flaky_fixture().await;
        let config = test_config(0);
        let engine = CrawlEngine::new(spider, test_ctx(config.clone()), config);

        let task =
            TrackTask::new(vec!["1".into()], vec!["CONT1".into()], SearchType::Container).unwrap();

        assert!(matches!(
            engine.run(task).await,
            Err(CrawlError::MaxRetryExceeded(_))
        ));
    }

    #[tokio::test]
    async fn unsupported_search_type_rejected_upfront() {
        let (_server, spider) = flaky_fixture().await;
        let config = test_config(1);
        let engine = CrawlEngine::new(spider, test_ctx(config.clone()), config);

        let task = TrackTask::new(vec!["1".into()], vec!["M1".into()], SearchType::Mbl).unwrap();
        assert!(matches!(
            engine.run(task).await,
            Err(CrawlError::UnsupportedSearchType(_))
        ));
    }
}
