use std::path::Path;

use tokio::fs;
use url::Url;

pub fn to_absolute_url(base: &Url, href: &str) -> String {
    if href.is_empty() {
        return String::new();
    }

    if let Some(path_without_slashes) = href.strip_prefix("//") {
        return format!("{}://{}", base.scheme(), path_without_slashes);
    }

    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }

    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// 折叠连续空白并裁切首尾，等价于 XPath 的 normalize-space()
pub fn normalize_space(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 非空则归一化，否则归 None
pub fn non_empty(text: &str) -> Option<String> {
    let normalized = normalize_space(text);
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

pub async fn file_exists(path: impl AsRef<Path>) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

pub async fn save_file(path: impl AsRef<Path>, data: &[u8]) -> std::io::Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, data).await?;
    Ok(())
}
