//! ACL (Atlantic Container Line) 船司站点
//!
//! 流程：查询页列出货柜与其明细路由 -> 逐柜抓取动态历史页。
//! 历史页的货况是自由文本，以有序正则解析链逐条转换为结构化事件。

use std::sync::Arc;
use std::sync::OnceLock;

use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use regex::Regex;
use scraper::Selector;
use url::Url;

use crate::core::config::SiteConfig;
use crate::core::error::{CrawlError, Result};
use crate::core::model::{Container, ContainerStatus, Location, TrackingItem};
use crate::engine::routing::{
    Meta, RequestMethod, RequestOption, RoutingResponse, RoutingRule, RuleOutput,
};
use crate::extractors::finder::{TextStartsWithRule, find_element_from};
use crate::sites::{SearchType, Spider, TrackTask};
use crate::utils::normalize_space;

const DEFAULT_BASE_URL: &str = "http://www.aclcargo.com";

struct SiteSelectors {
    subheader: Selector,
    detail_track: Selector,
    script: Selector,
    td: Selector,
}

static SELECTORS: OnceLock<SiteSelectors> = OnceLock::new();

impl SiteSelectors {
    fn get() -> &'static SiteSelectors {
        SELECTORS.get_or_init(|| SiteSelectors {
            subheader: Selector::parse("span.subheader").unwrap(),
            detail_track: Selector::parse("input#DetailedTrack").unwrap(),
            script: Selector::parse("script").unwrap(),
            td: Selector::parse("td").unwrap(),
        })
    }
}

pub struct AcluSpider {
    config: SiteConfig,
    base: Url,
}

impl AcluSpider {
    pub fn new(config: SiteConfig) -> Self {
        let base_url = config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        Self {
            base: Url::parse(base_url).expect("Invalid base URL"),
            config,
        }
    }
}

impl Spider for AcluSpider {
    fn id(&self) -> &'static str {
        "carrier_aclu"
    }

    fn config(&self) -> &SiteConfig {
        &self.config
    }

    fn base_url(&self) -> &str {
        self.base.as_str()
    }

    fn accepts(&self) -> &'static [SearchType] {
        &[SearchType::Mbl, SearchType::Container]
    }

    fn rules(&self) -> Vec<Arc<dyn RoutingRule>> {
        vec![
            Arc::new(SearchRule::new(self.base.clone())),
            Arc::new(HistoryRule::new()),
        ]
    }

    fn start(&self, task: &TrackTask) -> Result<Vec<RequestOption>> {
        Ok(task
            .unique_search_nos()
            .into_iter()
            .map(|search_no| SearchRule::build_request_option(&self.base, &search_no))
            .collect())
    }
}

// -------------------------------------------------------------------------------

/// 查询页：每个货柜带有一个 `getHistory('<route>')` 明细按钮
pub struct SearchRule {
    base: Url,
    detail_pattern: Regex,
}

impl SearchRule {
    pub const NAME: &'static str = "SEARCH";

    pub fn new(base: Url) -> Self {
        Self {
            base,
            detail_pattern: Regex::new(
                r"^getHistory\('(?P<route>.+Equino=(?P<container_no>[^&]+)[^']+)'\);$",
            )
            .unwrap(),
        }
    }

    pub fn build_request_option(base: &Url, search_no: &str) -> RequestOption {
        let encoded = utf8_percent_encode(search_no, NON_ALPHANUMERIC);
        let mut meta = Meta::new();
        meta.insert("search_no".into(), search_no.into());

        RequestOption::builder()
            .rule_name(Self::NAME)
            .method(RequestMethod::Get)
            .url(format!("{}/trackCargo.php?search_for={}", base_str(base), encoded))
            .meta(meta)
            .build()
    }

    fn check_search_no(&self, response: &RoutingResponse) -> Result<()> {
        let doc = response.html();
        let s = SiteSelectors::get();
        let search_no = response.meta_str("search_no")?;

        let first_header = doc
            .select(&s.subheader)
            .next()
            .map(|el| normalize_space(&el.text().collect::<String>()));
        if first_header.as_deref() == Some("An Error Occured:") {
            return Err(CrawlError::InvalidSearchNo(search_no.to_string()));
        }

        // 已失效单号：查询页以提示文字取代明细表
        let inactive = find_element_from(
            doc.select(&s.td),
            &TextStartsWithRule {
                prefix: "Unit is no longer active",
            },
        );
        if inactive.is_some() {
            return Err(CrawlError::InvalidSearchNo(search_no.to_string()));
        }

        Ok(())
    }
}

impl RoutingRule for SearchRule {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn handle(&self, response: &RoutingResponse) -> Result<Vec<RuleOutput>> {
        self.check_search_no(response)?;

        let doc = response.html();
        let s = SiteSelectors::get();

        let onclick_texts: Vec<String> = doc
            .select(&s.detail_track)
            .filter_map(|el| el.value().attr("onclick"))
            .map(str::to_string)
            .collect();

        if onclick_texts.is_empty() {
            return Err(CrawlError::ResponseFormat(
                "Detail track button not found".to_string(),
            ));
        }

        let mut outputs = Vec::new();
        for onclick in &onclick_texts {
            let caps = self.detail_pattern.captures(onclick).ok_or_else(|| {
                CrawlError::ResponseFormat(format!("Detail track not match: `{}`", onclick))
            })?;

            outputs.push(
                HistoryRule::build_request_option(&self.base, &caps["route"], &caps["container_no"])
                    .into(),
            );
        }

        Ok(outputs)
    }
}

// -------------------------------------------------------------------------------

/// 单一货柜动态历史条目
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct StatusInfo {
    description: String,
    local_date_time: String,
    location: String,
    vessel: String,
}

impl StatusInfo {
    fn into_item(self, container_no: &str) -> TrackingItem {
        TrackingItem::ContainerStatus(ContainerStatus {
            container_no: container_no.to_string(),
            description: Some(self.description),
            local_date_time: Some(self.local_date_time),
            location: if self.location.is_empty() {
                None
            } else {
                Some(Location::named(self.location))
            },
            vessel: if self.vessel.is_empty() {
                None
            } else {
                Some(self.vessel)
            },
            ..ContainerStatus::default()
        })
    }
}

/// 状态行的结构型态：决定命名组如何展开为事件
enum StatusShape {
    /// 仅时间：`<description> On <time>`
    Time,
    /// 地点 + 时间
    LocationTime,
    /// 船名 + 地点 + 时间
    VesselLocationTime,
    /// 装船 + 开航两事件
    LoadedFull,
    /// 装船 + 开航 + 卸港 ETA 三事件
    LoadedFullWithEta,
}

struct StatusParser {
    patt: Regex,
    shape: StatusShape,
}

impl StatusParser {
    fn parse(&self, status_text: &str) -> Option<Vec<StatusInfo>> {
        let caps = self.patt.captures(status_text)?;
        let group = |name: &str| caps.name(name).map(|m| m.as_str().to_string()).unwrap_or_default();

        Some(match self.shape {
            StatusShape::Time => vec![StatusInfo {
                description: group("description"),
                local_date_time: group("local_date_time"),
                ..StatusInfo::default()
            }],
            StatusShape::LocationTime => vec![StatusInfo {
                description: group("description"),
                location: group("location"),
                local_date_time: group("local_date_time"),
                ..StatusInfo::default()
            }],
            StatusShape::VesselLocationTime => vec![StatusInfo {
                description: group("description"),
                vessel: group("vessel"),
                location: group("location"),
                local_date_time: group("local_date_time"),
            }],
            StatusShape::LoadedFull => vec![
                StatusInfo {
                    description: group("load_event"),
                    local_date_time: group("local_date_time1"),
                    vessel: group("vessel"),
                    ..StatusInfo::default()
                },
                StatusInfo {
                    description: group("sail_event"),
                    local_date_time: group("local_date_time2"),
                    vessel: group("vessel"),
                    ..StatusInfo::default()
                },
            ],
            StatusShape::LoadedFullWithEta => vec![
                StatusInfo {
                    description: group("load_event"),
                    local_date_time: group("local_date_time1"),
                    vessel: group("vessel"),
                    ..StatusInfo::default()
                },
                StatusInfo {
                    description: group("sail_event"),
                    local_date_time: group("local_date_time2"),
                    vessel: group("vessel"),
                    ..StatusInfo::default()
                },
                StatusInfo {
                    description: group("eta_event"),
                    location: group("location"),
                    local_date_time: group("local_date_time3"),
                    vessel: group("vessel"),
                },
            ],
        })
    }
}

/// 有序解析链：依序尝试，首个命中者胜出
struct StatusTransformer {
    parsers: Vec<StatusParser>,
}

const TIME: &str = r"\w{2}/\w{2}/\w{2} \w{2}:\w{2}";

impl StatusTransformer {
    fn new() -> Self {
        let p = |patt: String, shape: StatusShape| StatusParser {
            patt: Regex::new(&patt).unwrap(),
            shape,
        };

        // 由特殊到一般排列：带船名的句式必须先于纯地点句式
        let loaded_head =
            format!(r"^(?P<load_event>Loaded full on vessel (?P<vessel>.+)) for (?P<location>.+) On (?P<local_date_time1>{TIME})");
        let parsers = vec![
            p(
                format!(
                    r"{loaded_head} (?P<sail_event>which sailed on) (?P<local_date_time2>{TIME})\. (?P<eta_event>The ETA at the port of Discharge will be) (?P<local_date_time3>{TIME})"
                ),
                StatusShape::LoadedFullWithEta,
            ),
            p(
                format!(
                    r"{loaded_head} (?P<sail_event>Sail Date) (?P<local_date_time2>{TIME})\. (?P<eta_event>The ETA at the port of Discharge) -(?P<local_date_time3>{TIME})"
                ),
                StatusShape::LoadedFullWithEta,
            ),
            p(
                format!(
                    r"{loaded_head} (?P<sail_event>which sailed on) (?P<local_date_time2>{TIME})"
                ),
                StatusShape::LoadedFull,
            ),
            p(
                format!(r"{loaded_head} (?P<sail_event>Sail Date) (?P<local_date_time2>{TIME})"),
                StatusShape::LoadedFull,
            ),
            p(
                format!(
                    r"^(?P<description>Discharged from vessel (?P<vessel>.+) at (?P<location>.+)) On (?P<local_date_time>{TIME})"
                ),
                StatusShape::VesselLocationTime,
            ),
            p(
                format!(
                    r"^(?P<description>Received for vessel (?P<vessel>.+) at (?P<location>.+)) On (?P<local_date_time>{TIME})"
                ),
                StatusShape::VesselLocationTime,
            ),
            p(
                format!(
                    r"^(?P<description>Received from vessel (?P<vessel>.+) at (?P<location>.+)) On (?P<local_date_time>{TIME})"
                ),
                StatusShape::VesselLocationTime,
            ),
            p(
                format!(
                    r"^(?P<description>Departed for (?P<location>.+) for vessel (?P<vessel>.+)) On (?P<local_date_time>{TIME})"
                ),
                StatusShape::VesselLocationTime,
            ),
            p(
                format!(
                    r"^(?P<description>Departed from (?P<location>.+) from vessel (?P<vessel>.+)) On (?P<local_date_time>{TIME})"
                ),
                StatusShape::VesselLocationTime,
            ),
            p(
                format!(
                    r"^(?P<description>Departed empty for (?P<location>.+)) On (?P<local_date_time>{TIME})"
                ),
                StatusShape::LocationTime,
            ),
            p(
                format!(
                    r"^(?P<description>Discharged empty at (?P<location>.+)) On (?P<local_date_time>{TIME})"
                ),
                StatusShape::LocationTime,
            ),
            p(
                format!(
                    r"^(?P<description>Received empty at (?P<location>.+)) On (?P<local_date_time>{TIME})"
                ),
                StatusShape::LocationTime,
            ),
            p(
                format!(r"^(?P<description>Departed for (?P<location>.+)) On (?P<local_date_time>{TIME})"),
                StatusShape::LocationTime,
            ),
            p(
                format!(r"^(?P<description>Departed from (?P<location>.+)) On (?P<local_date_time>{TIME})"),
                StatusShape::LocationTime,
            ),
            p(
                format!(r"^(?P<description>Received at (?P<location>.+)) On (?P<local_date_time>{TIME})"),
                StatusShape::LocationTime,
            ),
            p(
                format!(r"^(?P<description>Scaled in at (?P<location>.+)) On (?P<local_date_time>{TIME})"),
                StatusShape::LocationTime,
            ),
            p(
                format!(r"^(?P<description>Scaled out at ,(?P<location>.+)) On (?P<local_date_time>{TIME})"),
                StatusShape::LocationTime,
            ),
            p(
                format!(r"^(?P<description>Stripped at) On (?P<local_date_time>{TIME})"),
                StatusShape::Time,
            ),
            p(
                format!(r"^(?P<description>Stuffed at) On (?P<local_date_time>{TIME})"),
                StatusShape::Time,
            ),
        ];

        Self { parsers }
    }

    fn transform(&self, status_text: &str) -> Result<Vec<StatusInfo>> {
        self.parsers
            .iter()
            .find_map(|parser| parser.parse(status_text))
            .ok_or_else(|| {
                CrawlError::ResponseFormat(format!("Unknown status text: `{}`", status_text))
            })
    }
}

/// 明细历史页：货况以 JS 数组 `var dataContent = ['...', ...]` 内嵌
pub struct HistoryRule {
    container_no_pattern: Regex,
    quoted_pattern: Regex,
    transformer: StatusTransformer,
}

impl HistoryRule {
    pub const NAME: &'static str = "HISTORY";

    pub fn new() -> Self {
        Self {
            container_no_pattern: Regex::new(r"^Detailed tracking for: (?P<container_no>\w+)$")
                .unwrap(),
            quoted_pattern: Regex::new(r"'(?P<text>[^']+)'").unwrap(),
            transformer: StatusTransformer::new(),
        }
    }

    pub fn build_request_option(base: &Url, route: &str, container_no: &str) -> RequestOption {
        let mut meta = Meta::new();
        meta.insert("container_no".into(), container_no.into());

        RequestOption::builder()
            .rule_name(Self::NAME)
            .method(RequestMethod::Get)
            .url(format!("{}{}", base_str(base), route))
            .meta(meta)
            .build()
    }

    fn extract_container_no(&self, response: &RoutingResponse) -> Result<String> {
        let doc = response.html();
        let s = SiteSelectors::get();

        let text = doc
            .select(&s.subheader)
            .next()
            .map(|el| normalize_space(&el.text().collect::<String>()))
            .ok_or_else(|| CrawlError::ResponseFormat("Container_no not found".to_string()))?;

        let caps = self
            .container_no_pattern
            .captures(&text)
            .ok_or_else(|| CrawlError::ResponseFormat("Container_no not match".to_string()))?;

        Ok(caps["container_no"].to_string())
    }

    fn extract_status_infos(&self, response: &RoutingResponse) -> Result<Vec<StatusInfo>> {
        let doc = response.html();
        let s = SiteSelectors::get();

        let script = find_element_from(
            doc.select(&s.script),
            &TextStartsWithRule {
                prefix: "var dataContent",
            },
        )
        .ok_or_else(|| {
            CrawlError::ResponseFormat("Container_status_list not found".to_string())
        })?;

        let script_text: String = script.text().collect();

        let mut status_infos = Vec::new();
        for caps in self.quoted_pattern.captures_iter(&script_text) {
            // 站点偶混入不换行空格等特殊空白，先归一化
            let status_text = normalize_space(&caps["text"]);
            status_infos.extend(self.transformer.transform(&status_text)?);
        }

        Ok(status_infos)
    }
}

impl Default for HistoryRule {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingRule for HistoryRule {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn save_name(&self, response: &RoutingResponse) -> String {
        match response.meta_str("container_no") {
            Ok(container_no) => format!("{}_{}.html", Self::NAME, container_no),
            Err(_) => format!("{}.html", Self::NAME),
        }
    }

    fn handle(&self, response: &RoutingResponse) -> Result<Vec<RuleOutput>> {
        let container_no = self.extract_container_no(response)?;

        let mut outputs = vec![
            TrackingItem::Container(Container {
                container_no: container_no.clone(),
                ..Container::default()
            })
            .into(),
        ];

        for status_info in self.extract_status_infos(response)? {
            outputs.push(status_info.into_item(&container_no).into());
        }

        Ok(outputs)
    }
}

fn base_str(base: &Url) -> &str {
    base.as_str().trim_end_matches('/')
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

    const SEARCH_PAGE: &str = r#"
        <html><body>
        <h1>TRACK CARGO</h1>
        <input id="DetailedTrack" type="button"
               onclick="getHistory('/trackCargo.php?sid=77&amp;Equino=ACLU9679082&amp;page=1');">
        <input id="DetailedTrack" type="button"
               onclick="getHistory('/trackCargo.php?sid=77&amp;Equino=ACLU2208816&amp;page=1');">
        </body></html>
    "#;

    #[test]
    fn search_page_spawns_history_requests() {
        let option = SearchRule::build_request_option(&base(), "A123456789");
        assert_eq!(
            option.url,
            "http://www.aclcargo.com/trackCargo.php?search_for=A123456789"
        );

        let rule = SearchRule::new(base());
        let outputs = rule.handle(&response_for(&option, SEARCH_PAGE)).unwrap();
        assert_eq!(outputs.len(), 2);

        match &outputs[0] {
            RuleOutput::Request(next) => {
                assert_eq!(next.rule_name, HistoryRule::NAME);
                assert_eq!(
                    next.url,
                    "http://www.aclcargo.com/trackCargo.php?sid=77&Equino=ACLU9679082&page=1"
                );
                assert_eq!(next.meta["container_no"], "ACLU9679082");
            }
            other => panic!("unexpected output: {:?}", other),
        }
    }

    #[test]
    fn error_page_reports_invalid_search_no() {
        let option = SearchRule::build_request_option(&base(), "BAD000");
        let page = r#"<span class="subheader">An Error Occured:</span>"#;

        let rule = SearchRule::new(base());
        match rule.handle(&response_for(&option, page)) {
            Err(CrawlError::InvalidSearchNo(no)) => assert_eq!(no, "BAD000"),
            other => panic!("expected InvalidSearchNo, got {:?}", other.is_ok()),
        }
    }

    #[test]
    fn inactive_unit_reports_invalid_search_no() {
        let option = SearchRule::build_request_option(&base(), "ACLU1111111");
        let page = r#"
            <h1>TRACK CARGO</h1>
            <table><tr><td>Unit is no longer active, please contact ACL for
            additional information</td></tr></table>
        "#;

        let rule = SearchRule::new(base());
        assert!(matches!(
            rule.handle(&response_for(&option, page)),
            Err(CrawlError::InvalidSearchNo(_))
        ));
    }

    const HISTORY_PAGE: &str = r#"
        <html><body>
        <span class="subheader">Detailed tracking for: ACLU9679082</span>
        <script>
        var dataContent = ['Loaded full on vessel ATLANTIC SUN for HALIFAX,NS On 01/02/21 10:30 which sailed on 01/03/21 08:00. The ETA at the port of Discharge will be 01/10/21 09:00','Received at BALTIMORE,MD On 12/28/20 14:00'];
        </script>
        </body></html>
    "#;

    #[test]
    fn history_page_yields_container_and_statuses() {
        let rule = HistoryRule::new();
        let option =
            HistoryRule::build_request_option(&base(), "/trackCargo.php?Equino=ACLU9679082&p=1", "ACLU9679082");
        assert_eq!(rule.save_name(&response_for(&option, "")), "HISTORY_ACLU9679082.html");

        let outputs = rule.handle(&response_for(&option, HISTORY_PAGE)).unwrap();
        // 1 货柜 + (装船/开航/ETA) 3 事件 + 收柜 1 事件
        assert_eq!(outputs.len(), 5);

        match &outputs[0] {
            RuleOutput::Item(TrackingItem::Container(c)) => {
                assert_eq!(c.container_no, "ACLU9679082");
            }
            other => panic!("unexpected output: {:?}", other),
        }

        match &outputs[3] {
            RuleOutput::Item(TrackingItem::ContainerStatus(s)) => {
                assert_eq!(
                    s.description.as_deref(),
                    Some("The ETA at the port of Discharge will be")
                );
                assert_eq!(s.vessel.as_deref(), Some("ATLANTIC SUN"));
                assert_eq!(s.location, Some(Location::named("HALIFAX,NS")));
                assert_eq!(s.local_date_time.as_deref(), Some("01/10/21 09:00"));
            }
            other => panic!("unexpected output: {:?}", other),
        }

        match &outputs[4] {
            RuleOutput::Item(TrackingItem::ContainerStatus(s)) => {
                assert_eq!(s.description.as_deref(), Some("Received at BALTIMORE,MD"));
                assert!(s.vessel.is_none());
            }
            other => panic!("unexpected output: {:?}", other),
        }
    }

    #[test]
    fn transformer_handles_each_shape() {
        let transformer = StatusTransformer::new();

        let infos = transformer
            .transform("Discharged from vessel ATLANTIC SKY at NEW YORK,NY On 02/14/21 06:15")
            .unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].vessel, "ATLANTIC SKY");
        assert_eq!(infos[0].location, "NEW YORK,NY");

        let infos = transformer
            .transform("Departed empty for LIVERPOOL,GB On 03/01/21 22:00")
            .unwrap();
        assert_eq!(infos[0].description, "Departed empty for LIVERPOOL,GB");
        assert!(infos[0].vessel.is_empty());

        let infos = transformer.transform("Stuffed at On 03/02/21 09:45").unwrap();
        assert_eq!(infos[0].description, "Stuffed at");
        assert!(infos[0].location.is_empty());

        assert!(transformer.transform("Totally novel wording").is_err());
    }

    #[test]
    fn loaded_full_without_eta_yields_two_events() {
        let transformer = StatusTransformer::new();
        let infos = transformer
            .transform("Loaded full on vessel ATLANTIC STAR for ANTWERP,BE On 04/05/21 11:00 Sail Date 04/06/21 01:30")
            .unwrap();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].description, "Loaded full on vessel ATLANTIC STAR");
        assert_eq!(infos[1].description, "Sail Date");
        assert_eq!(infos[1].local_date_time, "04/06/21 01:30");
    }
}
