use std::sync::Arc;

use reqwest::{Request, Response, StatusCode};
use reqwest_middleware::{Middleware, Next, Result};
use tracing::warn;

use crate::core::error::{BlockReason, CrawlError};
use crate::network::session::Session;

/// 会话注入中间件
/// 负责在每次请求前，动态将 Session 中的最新 Cookie/UA 注入 Header
pub struct SessionMiddleware;

#[async_trait::async_trait]
impl Middleware for SessionMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if let Some(session) = extensions.get::<Arc<Session>>() {
            let headers = req.headers_mut();

            // 动态注入 UA；规则显式指定的 Header 优先
            let ua = session.get_ua();
            if !ua.is_empty()
                && !headers.contains_key(reqwest::header::USER_AGENT)
                && let Ok(val) = reqwest::header::HeaderValue::from_str(&ua)
            {
                headers.insert(reqwest::header::USER_AGENT, val);
            }

            // 动态注入 Cookie
            if let Some(cookie) = session.get_cookie()
                && !cookie.is_empty()
                && !headers.contains_key(reqwest::header::COOKIE)
                && let Ok(val) = reqwest::header::HeaderValue::from_str(&cookie)
            {
                headers.insert(reqwest::header::COOKIE, val);
            }

            // 动态注入其他 Headers
            let extra = session.get_headers();
            for (k, v) in extra.iter() {
                if !headers.contains_key(k) {
                    headers.insert(k.clone(), v.clone());
                }
            }
        }
        next.run(req, extensions).await
    }
}

/// 反爬中间件
///
/// 基础设施层封禁检查：发现封禁只管报错，
/// 具体的恢复（切代理、重试）交给上层引擎调度。
pub struct AntiBlockMiddleware;

#[async_trait::async_trait]
impl Middleware for AntiBlockMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        let resp = next.run(req, extensions).await?;

        let status = resp.status();
        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            warn!("检测到 {}，上报 SoftBlock...", status);
            return Err(reqwest_middleware::Error::from(anyhow::Error::new(
                CrawlError::SoftBlock(BlockReason::from(status)),
            )));
        }

        Ok(resp)
    }
}
