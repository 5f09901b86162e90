//! 抓取任务单元
//!
//! 一个 RequestOption 对应一次受限流控制的抓取；
//! 软阻断在此处触发协调恢复，再交由乐观重试续命。

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::core::error::{CrawlError, Result};
use crate::core::event::CrawlEvent;
use crate::engine::routing::{RequestOption, RoutingResponse};
use crate::network::context::ServiceContext;

pub struct FetchTask {
    option: RequestOption,
}

impl FetchTask {
    pub fn new(option: RequestOption) -> Self {
        Self { option }
    }

    pub async fn run(
        self,
        ctx: ServiceContext,
        semaphore: Arc<Semaphore>,
        max_attempts: u32,
    ) -> Result<RoutingResponse> {
        let _permit = semaphore
            .acquire_owned()
            .await
            .map_err(|e| CrawlError::Custom(e.to_string()))?;

        if ctx.shutdown.is_cancelled() {
            return Err(CrawlError::Custom("shutdown requested".to_string()));
        }

        ctx.emit(CrawlEvent::RequestIssued {
            rule: self.option.rule_name.clone(),
            url: self.option.url.clone(),
        });

        let desc = format!("{} {}", self.option.rule_name, self.option.url);
        let option = self.option;

        ctx.run_optimistic(desc, max_attempts, || {
            let ctx = ctx.clone();
            let option = option.clone();
            async move { Self::fetch_once(&ctx, &option).await }
        })
        .await
    }

    async fn fetch_once(ctx: &ServiceContext, option: &RequestOption) -> Result<RoutingResponse> {
        match ctx.execute(option).await {
            Ok(response) => Ok(response),
            Err(e) => {
                if let Some(reason) = e.is_blocking() {
                    ctx.emit(CrawlEvent::BlockDetected {
                        reason: reason.to_string(),
                    });
                    ctx.recover(reason).await;
                }
                Err(e)
            }
        }
    }
}
