//! 原始页面留存 (Raw Page Capture)
//!
//! 供事后比对站点改版与回归测试取样使用。

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::core::error::Result;
use crate::utils::save_file;

#[async_trait]
pub trait PageSaver: Send + Sync {
    async fn save(&self, name: &str, text: &str) -> Result<()>;
}

/// 落盘留存：`<save_path>/[spider] 查询编号/<规则名>.html`
pub struct FileSaver {
    folder: PathBuf,
    /// 同名页面依序编号，避免多页流程互相覆盖
    counter: parking_lot::Mutex<std::collections::HashMap<String, u32>>,
}

impl FileSaver {
    pub fn new(folder: PathBuf) -> Self {
        Self {
            folder,
            counter: parking_lot::Mutex::new(std::collections::HashMap::new()),
        }
    }

    fn numbered(&self, name: &str) -> String {
        let mut counters = self.counter.lock();
        let n = counters.entry(name.to_string()).or_insert(0);
        *n += 1;
        if *n == 1 {
            name.to_string()
        } else {
            match name.rsplit_once('.') {
                Some((stem, ext)) => format!("{}_{}.{}", stem, n, ext),
                None => format!("{}_{}", name, n),
            }
        }
    }
}

#[async_trait]
impl PageSaver for FileSaver {
    async fn save(&self, name: &str, text: &str) -> Result<()> {
        let path = self.folder.join(self.numbered(name));
        save_file(&path, text.as_bytes()).await?;
        debug!("页面已留存: {}", path.display());
        Ok(())
    }
}

/// 不留存
pub struct NullSaver;

#[async_trait]
impl PageSaver for NullSaver {
    async fn save(&self, _name: &str, _text: &str) -> Result<()> {
        Ok(())
    }
}
