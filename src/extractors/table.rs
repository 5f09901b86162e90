//! 通用表格抽取 (Table Extraction)
//!
//! 站点各自负责把 HTML 表格"定位"为 (上表头, 左轴) → 单元格的映射；
//! 查找与文本抽取则是共用逻辑。上表头以文字索引，左轴可为文字或行序号。

use indexmap::IndexMap;
use scraper::{ElementRef, Selector};

use crate::core::error::{CrawlError, Result};

/// 单轴表头定位方式
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Header<'a> {
    /// 该轴不参与定位 (单行/单列表格)
    None,
    /// 以表头文字定位
    Text(&'a str),
    /// 以数据行序号定位
    Index(usize),
}

/// 表格定位器：site 端解析，core 端查找
pub trait TableLocator<'a> {
    fn get_cell(&self, top: Header<'_>, left: Header<'_>) -> Result<ElementRef<'a>>;

    fn has_header(&self, top: Header<'_>, left: Header<'_>) -> bool {
        self.get_cell(top, left).is_ok()
    }
}

/// 上表头 + 行序号的通用储存容器
///
/// 绝大多数结果表都是「一列表头、多行数据」；站点解析时逐格 `push`，
/// 之后按 (表头文字, 行序号) 取格。
#[derive(Default)]
pub struct HeaderTable<'a> {
    td_map: IndexMap<String, Vec<ElementRef<'a>>>,
    data_len: usize,
}

impl<'a> HeaderTable<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 在指定表头下追加一格数据
    pub fn push(&mut self, top: impl Into<String>, cell: ElementRef<'a>) {
        let column = self.td_map.entry(top.into()).or_default();
        column.push(cell);
        self.data_len = self.data_len.max(column.len());
    }

    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.td_map.keys().map(String::as_str)
    }

    /// 迭代数据行序号
    pub fn iter_left(&self) -> std::ops::Range<usize> {
        0..self.data_len
    }

    pub fn is_empty(&self) -> bool {
        self.data_len == 0
    }
}

impl<'a> TableLocator<'a> for HeaderTable<'a> {
    fn get_cell(&self, top: Header<'_>, left: Header<'_>) -> Result<ElementRef<'a>> {
        let Header::Text(top_text) = top else {
            return Err(CrawlError::HeaderMismatch(format!(
                "top header must be text, got {:?}",
                top
            )));
        };

        let column = self.td_map.get(top_text).ok_or_else(|| {
            CrawlError::HeaderMismatch(format!("unknown top header `{}`", top_text))
        })?;

        let index = match left {
            Header::None => 0,
            Header::Index(i) => i,
            Header::Text(t) => {
                return Err(CrawlError::HeaderMismatch(format!(
                    "left header `{}` not supported by this locator",
                    t
                )));
            }
        };

        column.get(index).copied().ok_or_else(|| {
            CrawlError::HeaderMismatch(format!("row {} out of range for `{}`", index, top_text))
        })
    }
}

/// 单元格文本抽取策略
pub trait CellExtractor {
    fn extract(&self, cell: ElementRef<'_>) -> String;
}

/// 取单元格内第一段非空文本，可先以内层 CSS 选择器缩小范围
pub struct FirstTextCellExtractor {
    inner: Option<Selector>,
}

impl FirstTextCellExtractor {
    pub fn new() -> Self {
        Self { inner: None }
    }

    pub fn with_css(css: &str) -> Self {
        Self {
            inner: Some(Selector::parse(css).expect("invalid cell css")),
        }
    }

    fn first_text<'t>(texts: impl Iterator<Item = &'t str>) -> String {
        texts
            .map(str::trim)
            .find(|t| !t.is_empty())
            .unwrap_or_default()
            .to_string()
    }
}

impl Default for FirstTextCellExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl CellExtractor for FirstTextCellExtractor {
    fn extract(&self, cell: ElementRef<'_>) -> String {
        match &self.inner {
            Some(selector) => Self::first_text(cell.select(selector).flat_map(|el| el.text())),
            None => Self::first_text(cell.text()),
        }
    }
}

/// 定位 + 抽取的组合门面
pub struct TableExtractor<L> {
    locator: L,
}

impl<'a, L: TableLocator<'a>> TableExtractor<L> {
    pub fn new(locator: L) -> Self {
        Self { locator }
    }

    pub fn locator(&self) -> &L {
        &self.locator
    }

    /// 以指定抽取策略取格内文本
    pub fn extract_cell(
        &self,
        top: Header<'_>,
        left: Header<'_>,
        extractor: &dyn CellExtractor,
    ) -> Result<String> {
        let cell = self.locator.get_cell(top, left)?;
        Ok(extractor.extract(cell))
    }

    /// 取格内第一段非空文本
    pub fn extract_cell_text(&self, top: Header<'_>, left: Header<'_>) -> Result<String> {
        self.extract_cell(top, left, &FirstTextCellExtractor::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    const SAMPLE: &str = r#"
        <table>
          <thead>
            <tr><th>Container #</th><th>Discharge Date</th></tr>
          </thead>
          <tbody>
            <tr><td><a>MSDU5304871</a></td><td><span>01/02/2021</span> note</td></tr>
            <tr><td><a>TCNU1234567</a></td><td><span>03/04/2021</span></td></tr>
          </tbody>
        </table>
    "#;

    fn build_locator(doc: &Html) -> HeaderTable<'_> {
        let th_sel = Selector::parse("thead th").unwrap();
        let tr_sel = Selector::parse("tbody tr").unwrap();
        let td_sel = Selector::parse("td").unwrap();

        let headers: Vec<String> = doc
            .select(&th_sel)
            .map(|th| th.text().collect::<String>().trim().to_string())
            .collect();

        let mut table = HeaderTable::new();
        for row in doc.select(&tr_sel) {
            for (header, td) in headers.iter().zip(row.select(&td_sel)) {
                table.push(header.clone(), td);
            }
        }
        table
    }

    #[test]
    fn lookup_by_top_and_row() {
        let doc = Html::parse_fragment(SAMPLE);
        let extractor = TableExtractor::new(build_locator(&doc));

        assert_eq!(
            extractor
                .extract_cell_text(Header::Text("Container #"), Header::Index(1))
                .unwrap(),
            "TCNU1234567"
        );
        assert_eq!(
            extractor
                .extract_cell(
                    Header::Text("Discharge Date"),
                    Header::Index(0),
                    &FirstTextCellExtractor::with_css("span"),
                )
                .unwrap(),
            "01/02/2021"
        );
    }

    #[test]
    fn missing_header_is_mismatch() {
        let doc = Html::parse_fragment(SAMPLE);
        let extractor = TableExtractor::new(build_locator(&doc));

        assert!(matches!(
            extractor.extract_cell_text(Header::Text("Vessel"), Header::None),
            Err(CrawlError::HeaderMismatch(_))
        ));
        assert!(matches!(
            extractor.extract_cell_text(Header::Text("Container #"), Header::Index(9)),
            Err(CrawlError::HeaderMismatch(_))
        ));
        assert!(
            extractor
                .locator()
                .has_header(Header::Text("Container #"), Header::None)
        );
    }

    #[test]
    fn iter_left_covers_all_rows() {
        let doc = Html::parse_fragment(SAMPLE);
        let table = build_locator(&doc);
        let rows: Vec<usize> = table.iter_left().collect();
        assert_eq!(rows, vec![0, 1]);
    }
}
