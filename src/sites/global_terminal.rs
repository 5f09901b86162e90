//! Global Container Terminals (FIRMS Y178) 码头站点
//!
//! 单次 POST 可同时查询多柜；结果为表头索引的放行状态表，
//! 滞期免费期 (Last Free Day) 位于表格之外的标签格。

use std::sync::Arc;
use std::sync::OnceLock;

use indexmap::IndexMap;
use scraper::{ElementRef, Selector};
use url::Url;

use crate::core::config::SiteConfig;
use crate::core::error::{CrawlError, Result};
use crate::core::model::{ErrorData, TerminalInfo, TrackingItem};
use crate::engine::routing::{
    Meta, RequestMethod, RequestOption, RoutingResponse, RoutingRule, RuleOutput,
};
use crate::extractors::finder::{TextStartsWithRule, find_element_from};
use crate::extractors::table::{Header, HeaderTable, TableExtractor};
use crate::sites::{SearchType, Spider, TrackTask};
use crate::utils::{non_empty, normalize_space};

const DEFAULT_BASE_URL: &str = "https://payments.gcterminals.com";
pub const FIRMS_CODE: &str = "Y178";

struct SiteSelectors {
    results_table: Selector,
    not_found: Selector,
    th: Selector,
    tr: Selector,
    td: Selector,
    results_td: Selector,
}

static SELECTORS: OnceLock<SiteSelectors> = OnceLock::new();

impl SiteSelectors {
    fn get() -> &'static SiteSelectors {
        SELECTORS.get_or_init(|| SiteSelectors {
            results_table: Selector::parse("div#results-div table").unwrap(),
            not_found: Selector::parse("div.not-found-text").unwrap(),
            th: Selector::parse("th").unwrap(),
            tr: Selector::parse("tr").unwrap(),
            td: Selector::parse("td").unwrap(),
            results_td: Selector::parse("div#results-div td").unwrap(),
        })
    }
}

pub struct GlobalTerminalSpider {
    config: SiteConfig,
    base: Url,
}

impl GlobalTerminalSpider {
    pub fn new(config: SiteConfig) -> Self {
        let base_url = config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        Self {
            base: Url::parse(base_url).expect("Invalid base URL"),
            config,
        }
    }
}

impl Spider for GlobalTerminalSpider {
    fn id(&self) -> &'static str {
        "terminal_global"
    }

    fn config(&self) -> &SiteConfig {
        &self.config
    }

    fn base_url(&self) -> &str {
        self.base.as_str()
    }

    fn accepts(&self) -> &'static [SearchType] {
        &[SearchType::Container]
    }

    fn rules(&self) -> Vec<Arc<dyn RoutingRule>> {
        vec![Arc::new(ContainerRule)]
    }

    fn start(&self, task: &TrackTask) -> Result<Vec<RequestOption>> {
        Ok(vec![ContainerRule::build_request_option(
            &self.base,
            &task.unique_search_nos(),
        )])
    }
}

// -------------------------------------------------------------------------------

/// 查询结果页：一行一柜的放行状态表
pub struct ContainerRule;

impl ContainerRule {
    pub const NAME: &'static str = "CONTAINER";

    pub fn build_request_option(base: &Url, container_nos: &[String]) -> RequestOption {
        let mut form_data = IndexMap::new();
        form_data.insert("containerSelectedIndexParam".to_string(), String::new());
        form_data.insert("searchId".to_string(), "BGLOB".to_string());
        form_data.insert("searchType".to_string(), "container".to_string());
        form_data.insert("searchTextArea".to_string(), container_nos.join("\n"));
        form_data.insert("searchText".to_string(), String::new());
        form_data.insert("buttonClicked".to_string(), "Search".to_string());

        let mut meta = Meta::new();
        meta.insert("container_nos".into(), container_nos.into());

        RequestOption::builder()
            .rule_name(Self::NAME)
            .method(RequestMethod::PostForm)
            .url(format!(
                "{}/GlobalTerminal/globalSearch.do",
                base.as_str().trim_end_matches('/')
            ))
            .headers(vec![(
                "Referer".to_string(),
                format!(
                    "{}/GlobalTerminal/globalSearch.do",
                    base.as_str().trim_end_matches('/')
                ),
            )])
            .form_data(form_data)
            .meta(meta)
            .build()
    }

    fn not_found(container_no: &str) -> TrackingItem {
        TrackingItem::NotFound(ErrorData {
            search_no: Some(container_no.to_string()),
            search_type: Some(SearchType::Container.to_string()),
            status: "ERROR".to_string(),
            detail: Some("Data was not found".to_string()),
        })
    }

    /// 解析结果表为 (表头文字, 行序号) 定位器
    fn build_locator<'a>(response: &'a scraper::Html) -> Result<HeaderTable<'a>> {
        let s = SiteSelectors::get();

        let table_el = response
            .select(&s.results_table)
            .next()
            .ok_or_else(|| CrawlError::ResponseFormat("results table not found".to_string()))?;

        let titles: Vec<String> = table_el
            .select(&s.th)
            .map(|th| normalize_space(&th.text().collect::<String>()))
            .collect();
        if titles.is_empty() {
            return Err(CrawlError::ResponseFormat("results table has no header".to_string()));
        }

        let mut table = HeaderTable::new();
        for row in table_el.select(&s.tr) {
            let cells: Vec<ElementRef<'_>> = row.select(&s.td).collect();
            // 表头行与汇总行的单元格数不足，直接略过
            if cells.len() < titles.len() {
                continue;
            }
            for (title, cell) in titles.iter().zip(cells) {
                table.push(title.clone(), cell);
            }
        }

        Ok(table)
    }

    /// Last Free Day 位于标签格的下一个兄弟格
    fn extract_last_free_day(response: &scraper::Html) -> Option<String> {
        let s = SiteSelectors::get();
        let label = find_element_from(
            response.select(&s.results_td),
            &TextStartsWithRule {
                prefix: "Last Free Day",
            },
        )?;

        let value = label
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .next()?
            .text()
            .collect::<String>();
        non_empty(&value)
    }
}

impl RoutingRule for ContainerRule {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn handle(&self, response: &RoutingResponse) -> Result<Vec<RuleOutput>> {
        let requested = response.meta_str_vec("container_nos")?;

        let doc = response.html();
        let s = SiteSelectors::get();

        // 整批查无数据
        if doc.select(&s.not_found).next().is_some() {
            return Ok(requested
                .iter()
                .map(|no| Self::not_found(no).into())
                .collect());
        }

        let extractor = TableExtractor::new(Self::build_locator(&doc)?);
        let last_free_day = Self::extract_last_free_day(&doc);

        let mut seen = Vec::new();
        let mut outputs: Vec<RuleOutput> = Vec::new();

        for row in extractor.locator().iter_left() {
            let cell = |top: &str| -> Result<Option<String>> {
                Ok(non_empty(
                    &extractor.extract_cell_text(Header::Text(top), Header::Index(row))?,
                ))
            };

            let container_no = cell("Container #")?.ok_or_else(|| {
                CrawlError::ResponseFormat("row without container number".to_string())
            })?;
            seen.push(container_no.clone());

            outputs.push(
                TrackingItem::Terminal(TerminalInfo {
                    container_no,
                    carrier_release: cell("Freight Released")?,
                    customs_release: cell("Customs Released")?,
                    available: cell("Avail for Pickup")?,
                    discharge_date: cell("Discharge Date")?,
                    gate_out_date: cell("Gate Out Date")?,
                    last_free_day: last_free_day.clone(),
                    ..TerminalInfo::default()
                })
                .into(),
            );
        }

        // 要求查询但未回传的柜号，逐一回报查无数据
        for no in &requested {
            if !seen.contains(no) {
                outputs.push(Self::not_found(no).into());
            }
        }

        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::routing::RuleManager;

    fn response_for(option: &RequestOption, text: &str) -> RoutingResponse {
        RoutingResponse {
            url: Url::parse(&option.url).unwrap(),
            status: 200,
            text: text.to_string(),
            meta: RuleManager::meta_for(option),
        }
    }

    fn base() -> Url {
        Url::parse(DEFAULT_BASE_URL).unwrap()
    }

    fn nos(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    const RESULT_PAGE: &str = r##"
        <html><body>
        <div id="results-div">
          <table>
            <tr>
              <th>Container #</th><th>Freight Released</th><th>Customs Released</th>
              <th>Avail for Pickup</th><th>Discharge Date</th><th>Gate Out Date</th>
            </tr>
            <tr>
              <td><a href="#">MSDU5304871</a></td><td>YES</td><td>YES</td>
              <td>YES</td><td>02/11/2021</td><td>02/15/2021</td>
            </tr>
            <tr>
              <td><a href="#">TGHU9822140</a></td><td>NO</td><td>HOLD</td>
              <td>NO</td><td>02/11/2021</td><td></td>
            </tr>
          </table>
          <center>
            <table>
              <tr><td>Last Free Day</td><td>02/18/2021</td></tr>
            </table>
          </center>
        </div>
        </body></html>
    "##;

    #[test]
    fn request_posts_all_containers_at_once() {
        let option =
            ContainerRule::build_request_option(&base(), &nos(&["MSDU5304871", "TGHU9822140"]));
        assert_eq!(
            option.url,
            "https://payments.gcterminals.com/GlobalTerminal/globalSearch.do"
        );
        assert_eq!(
            option.form_data["searchTextArea"],
            "MSDU5304871\nTGHU9822140"
        );
        assert_eq!(option.form_data["searchId"], "BGLOB");
    }

    #[test]
    fn result_rows_become_terminal_items() {
        let option =
            ContainerRule::build_request_option(&base(), &nos(&["MSDU5304871", "TGHU9822140"]));
        let outputs = ContainerRule
            .handle(&response_for(&option, RESULT_PAGE))
            .unwrap();
        assert_eq!(outputs.len(), 2);

        match &outputs[0] {
            RuleOutput::Item(TrackingItem::Terminal(t)) => {
                assert_eq!(t.container_no, "MSDU5304871");
                assert_eq!(t.carrier_release.as_deref(), Some("YES"));
                assert_eq!(t.available.as_deref(), Some("YES"));
                assert_eq!(t.gate_out_date.as_deref(), Some("02/15/2021"));
                assert_eq!(t.last_free_day.as_deref(), Some("02/18/2021"));
            }
            other => panic!("unexpected output: {:?}", other),
        }

        match &outputs[1] {
            RuleOutput::Item(TrackingItem::Terminal(t)) => {
                assert_eq!(t.container_no, "TGHU9822140");
                assert_eq!(t.customs_release.as_deref(), Some("HOLD"));
                assert_eq!(t.gate_out_date, None);
            }
            other => panic!("unexpected output: {:?}", other),
        }
    }

    #[test]
    fn missing_container_reported_not_found() {
        let option = ContainerRule::build_request_option(
            &base(),
            &nos(&["MSDU5304871", "TGHU9822140", "XXXU0000000"]),
        );
        let outputs = ContainerRule
            .handle(&response_for(&option, RESULT_PAGE))
            .unwrap();
        assert_eq!(outputs.len(), 3);

        match &outputs[2] {
            RuleOutput::Item(TrackingItem::NotFound(e)) => {
                assert_eq!(e.search_no.as_deref(), Some("XXXU0000000"));
            }
            other => panic!("unexpected output: {:?}", other),
        }
    }

    #[test]
    fn not_found_page_reports_every_container() {
        let option = ContainerRule::build_request_option(&base(), &nos(&["AAAU1111111"]));
        let page = r#"<div class="not-found-text">No results found</div>"#;
        let outputs = ContainerRule.handle(&response_for(&option, page)).unwrap();
        assert_eq!(outputs.len(), 1);
        assert!(matches!(
            &outputs[0],
            RuleOutput::Item(TrackingItem::NotFound(_))
        ));
    }
}
