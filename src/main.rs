#![allow(dead_code)]

//! 应用程序入口 (Application Entrypoint)
//!
//! 负责 CLI 指令解析、遥测层初始化、依赖注入及系统生命周期管理。

mod actors;
mod core;
mod engine;
mod extractors;
mod network;
mod sites;
mod ui;
mod utils;

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::fmt::MakeWriter;

use crate::actors::proxy::ProxyManager;
use crate::core::config::AppConfig;
use crate::core::event::create_event_channel;
use crate::engine::CrawlEngine;
use crate::network::context::ServiceContext;
use crate::network::service::HttpService;
use crate::network::session::Session;
use crate::sites::{SearchType, Spider, SpiderRegistry, TrackTask};
use crate::ui::{Ui, get_multi};

const DEFAULT_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// 进度条感知的日志写入器 (TUI-aware Log Writer)
///
/// 确保非同步日志输出不会破坏终端进度条的渲染布局。
struct IndicatifWriter;

impl io::Write for IndicatifWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let _ = get_multi().println(s.trim_end());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for IndicatifWriter {
    type Writer = IndicatifWriter;

    fn make_writer(&self) -> Self::Writer {
        IndicatifWriter
    }
}

/// 命令行界面脚手架 (CLI Scaffolding)
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 执行货况追踪任务
    Track {
        /// 目标站点标识符
        #[arg(short, long)]
        spider: String,
        /// 查询编号，可重复指定批次查询
        #[arg(short = 'n', long = "search-no", required = true)]
        search_nos: Vec<String>,
        /// 查询编号类型
        #[arg(short = 't', long = "search-type", value_enum)]
        search_type: SearchType,
        /// 外部任务流水号，与查询编号一一对应 (缺省自动编号)
        #[arg(long = "task-id")]
        task_ids: Vec<String>,
        /// 动态注入的站点参数 (KEY=VALUE)
        #[arg(short, long, value_parser = parse_key_val)]
        params: Vec<(String, String)>,
        /// 留存原始页面供除错
        #[arg(long)]
        save: bool,
    },
    /// 列出已注册站点
    Sites,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 遥测层初始化 (Telemetry Layer Initialization)
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(IndicatifWriter)
        .with_target(false)
        .with_ansi(true)
        .init();

    // 依赖项初始化与注入 (Dependency Injection)
    let config = Arc::new(AppConfig::load()?);
    let cli = Cli::parse();
    let registry = SpiderRegistry::new();

    match cli.command {
        Commands::Sites => {
            for id in registry.list() {
                let _ = get_multi().println(id);
            }
        }
        Commands::Track {
            spider: spider_id,
            search_nos,
            search_type,
            task_ids,
            params,
            save,
        } => {
            // 建立 UI 事件反馈链路 (Event feedback loop)
            let (event_sender, event_receiver) = create_event_channel();
            let ui_handle = Ui::run(event_receiver);

            // 任务域限制 (Scope isolation for proper RAII cleanup)
            let report = {
                let task_ids = if task_ids.is_empty() {
                    (1..=search_nos.len()).map(|i| i.to_string()).collect()
                } else {
                    task_ids
                };
                let task = TrackTask::new(task_ids, search_nos, search_type)?
                    .with_extra(params.into_iter().collect::<HashMap<_, _>>())
                    .with_save_pages(save);

                let (proxy_tx, _proxy_handle) = ProxyManager::start(config.clone());
                let session = Arc::new(Session::new());
                session.set_ua(DEFAULT_UA.into());
                let http = Arc::new(HttpService::new(session.clone()));

                let ctx = ServiceContext::new(http, session, proxy_tx, config.clone())
                    .with_events(event_sender);

                // 出口代理启用时，先完成首次会话挂载
                if config.proxy.is_enabled() {
                    ctx.force_rotate_proxy().await;
                }

                // 信号处理与优雅退出 (Signal Handling)
                // 仅持有取消令牌，避免事件通道因此常驻不关
                let shutdown = ctx.shutdown.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        shutdown.cancel();
                    }
                });

                let site_cfg = config.site(&spider_id);
                let spider: Arc<dyn Spider> = match registry.create(&spider_id, site_cfg) {
                    Some(s) => Arc::from(s),
                    None => {
                        tracing::error!("Unknown spider identifier: {}", spider_id);
                        return Ok(());
                    }
                };

                let engine = CrawlEngine::new(spider, ctx, config.clone());
                let report = engine.run(task).await;

                tracing::info!("Execution flow completed for: {}", spider_id);
                report
            };

            // Await UI shutdown after event sender closure
            let _ = ui_handle.await;

            if let Ok(report) = report {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
        }
    }

    Ok(())
}

/// 执行 KEY=VALUE 格式参数解析
fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no = found in {}", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}
