use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::Method;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_middleware::RequestBuilder;

use crate::actors::proxy::ProxyEndpoint;
use crate::core::error::{CrawlError, Result};
use crate::engine::routing::{RequestMethod, RequestOption, RoutingResponse, RuleManager};
use crate::network::middleware::{AntiBlockMiddleware, SessionMiddleware};
use crate::network::session::Session;

#[derive(Clone)]
pub struct HttpService {
    client: Arc<RwLock<ClientWithMiddleware>>,
    session: Arc<Session>,
}

impl HttpService {
    pub fn new(session: Arc<Session>) -> Self {
        let client = Self::try_build_internal_client(None)
            .expect("CRITICAL: Failed to initialize network client");
        Self {
            client: Arc::new(RwLock::new(client)),
            session,
        }
    }

    /// 重建内部客户端 (Hot Swap)
    ///
    /// 代理会话切换时调用。旧的 Client 会在所有引用它的任务结束后自动释放。
    pub fn recreate_client(&self, proxy: Option<&ProxyEndpoint>) -> Result<()> {
        let new_client = Self::try_build_internal_client(proxy)?;
        let mut writer = self.client.write().expect("HttpService lock poisoned");
        *writer = new_client;
        Ok(())
    }

    /// 构建底层的 HTTP 客户端
    fn try_build_internal_client(proxy: Option<&ProxyEndpoint>) -> Result<ClientWithMiddleware> {
        let mut client_builder = reqwest::Client::builder()
            .cookie_store(true)
            .pool_max_idle_per_host(8)
            .tcp_nodelay(true)
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30));

        if let Some(endpoint) = proxy {
            let mut p = reqwest::Proxy::all(&endpoint.gateway).map_err(CrawlError::Network)?;
            if let Some(password) = &endpoint.password {
                p = p.basic_auth(&endpoint.username, password);
            }
            client_builder = client_builder.proxy(p);
        }

        let client = client_builder.build().map_err(CrawlError::Network)?;

        Ok(ClientBuilder::new(client)
            .with(SessionMiddleware)
            .with(AntiBlockMiddleware)
            .build())
    }

    /// 获取当前可用的客户端副本
    pub fn client(&self) -> ClientWithMiddleware {
        self.client.read().expect("HttpService lock poisoned").clone()
    }

    /// 核心执行逻辑：将声明式 RequestOption 转为一次实际抓取
    pub async fn execute(&self, option: &RequestOption) -> Result<RoutingResponse> {
        let resp = self
            .request_builder(option)
            .send()
            .await
            .map_err(CrawlError::Middleware)?;

        let status = resp.status().as_u16();
        let url = resp.url().clone();
        let text = resp.text().await.map_err(CrawlError::Network)?;

        Ok(RoutingResponse {
            url,
            status,
            text,
            meta: RuleManager::meta_for(option),
        })
    }

    fn request_builder(&self, option: &RequestOption) -> RequestBuilder {
        let client = self.client();

        let method = match option.method {
            RequestMethod::Get => Method::GET,
            RequestMethod::PostForm | RequestMethod::PostBody => Method::POST,
        };

        let mut rb = client
            .request(method, &option.url)
            .with_extension(self.session.clone());

        for (k, v) in &option.headers {
            rb = rb.header(k.as_str(), v.as_str());
        }

        match option.method {
            RequestMethod::Get => rb,
            RequestMethod::PostForm => rb.form(&option.form_data),
            RequestMethod::PostBody => rb.body(option.body.clone().unwrap_or_default()),
        }
    }

    /// 探测方法 (用于健康检查)
    pub async fn probe(&self, url: &str) -> Result<(u16, String)> {
        let resp = self
            .client()
            .get(url)
            .with_extension(self.session.clone())
            .send()
            .await
            .map_err(CrawlError::Middleware)?;

        let status = resp.status().as_u16();
        let text = resp.text().await.map_err(CrawlError::Network)?;
        Ok((status, text))
    }
}
