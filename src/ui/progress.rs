//! 终端进度渲染引擎 (Terminal UI Progress Engine)
//!
//! 基于 `indicatif` 实现非阻塞式进度条编排，支持抓取/解析/恢复状态的实时同步。

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use parking_lot::RwLock;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::core::event::{CrawlEvent, EventReceiver};

/// 全局 TUI 容器 (Singleton)
static MULTI: OnceLock<MultiProgress> = OnceLock::new();

/// 获取全局进度容器实例
pub fn get_multi() -> &'static MultiProgress {
    MULTI.get_or_init(MultiProgress::new)
}

/// TUI 状态容器
struct UiState {
    main_bar: Option<ProgressBar>,
    requests: usize,
    parsed: usize,
    items: usize,
}

impl UiState {
    fn new() -> Self {
        Self {
            main_bar: None,
            requests: 0,
            parsed: 0,
            items: 0,
        }
    }

    fn tally(&self) -> String {
        format!(
            "req {} | page {} | item {}",
            self.requests, self.parsed, self.items
        )
    }
}

static STATE: OnceLock<Arc<RwLock<UiState>>> = OnceLock::new();

fn get_state() -> &'static Arc<RwLock<UiState>> {
    STATE.get_or_init(|| Arc::new(RwLock::new(UiState::new())))
}

/// 进度协调器 (Progress Orchestrator)
pub struct Ui;

impl Ui {
    /// 激活事件监听循环，启动异步渲染管线
    pub fn run(receiver: EventReceiver) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = receiver.recv_async().await {
                Self::handle_event(event);
            }
        })
    }

    /// 执行 UI 状态转换与渲染更新
    fn handle_event(event: CrawlEvent) {
        let multi = get_multi();
        let state = get_state();
        let mut ui = state.write();

        match event {
            CrawlEvent::TaskStarted {
                spider_id,
                search_type,
                search_nos,
            } => {
                let style = ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] {msg}")
                    .unwrap()
                    .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");

                let bar = multi.add(ProgressBar::new_spinner());
                bar.set_style(style);
                bar.set_message(format!(
                    "🚢 {} [{}] {}",
                    spider_id,
                    search_type,
                    search_nos.join(",")
                ));
                bar.enable_steady_tick(Duration::from_millis(100));
                ui.main_bar = Some(bar);
            }
            CrawlEvent::RequestIssued { rule, .. } => {
                ui.requests += 1;
                let tally = ui.tally();
                if let Some(ref bar) = ui.main_bar {
                    bar.set_message(format!("⇣ {} | {}", rule, tally));
                }
            }
            CrawlEvent::PageParsed { rule, items, .. } => {
                ui.parsed += 1;
                ui.items += items;
                let tally = ui.tally();
                if let Some(ref bar) = ui.main_bar {
                    bar.set_message(format!("✔ {} | {}", rule, tally));
                }
            }
            CrawlEvent::BlockDetected { reason } => {
                if let Some(ref bar) = ui.main_bar {
                    bar.set_message(format!("⚠️ BLOCK: {}", reason));
                }
            }
            CrawlEvent::Recovering { reason } => {
                if let Some(ref bar) = ui.main_bar {
                    bar.set_message(format!("🔄 RECOVERING: {}", reason));
                }
            }
            CrawlEvent::RecoveryComplete => {
                if let Some(ref bar) = ui.main_bar {
                    bar.set_message("✅ RECOVERED: Resuming crawl...");
                }
            }
            CrawlEvent::RestartScheduled { attempt, budget, .. } => {
                if let Some(ref bar) = ui.main_bar {
                    bar.set_message(format!("♻️ RESTART {}/{}", attempt, budget));
                }
            }
            CrawlEvent::TaskCompleted {
                collected, errors, ..
            } => {
                if let Some(ref bar) = ui.main_bar {
                    bar.finish_with_message(format!(
                        "✅ FINISHED: {} records, {} errors",
                        collected, errors
                    ));
                }
            }
            CrawlEvent::TaskFailed { error } => {
                if let Some(ref bar) = ui.main_bar {
                    bar.abandon_with_message(format!("❌ FAILED: {}", error));
                }
            }
            _ => {}
        }
    }
}
