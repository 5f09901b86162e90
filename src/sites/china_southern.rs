//! 中国南方航空货运站点 (CSAIR Cargo)
//!
//! ASP.NET 表单站：先取查询页的 __VIEWSTATE，再以 POST 提交主单号查询。
//! 回应页含主单摘要区块与航班状态表，ATD/ATA 由状态表推导。

use std::sync::Arc;
use std::sync::OnceLock;

use scraper::Selector;
use url::Url;

use crate::core::config::SiteConfig;
use crate::core::error::{CrawlError, Result};
use crate::core::model::{AirFreight, FlightHistory, TrackingItem};
use crate::engine::routing::{
    Meta, RequestMethod, RequestOption, RoutingResponse, RoutingRule, RuleOutput,
};
use crate::sites::{SearchType, Spider, TrackTask};
use crate::utils::{non_empty, normalize_space};

const DEFAULT_BASE_URL: &str =
    "https://tang.csair.com/EN/WebFace/Tang.WebFace.Cargo/AgentAwbBrower.aspx";
/// IATA 航司前缀
const PREFIX: &str = "784";
const LANG: &str = "en-us";

const TAKEN_OFF: &str = "Flight has taken off.";
const RECEIVED: &str = "Cargo has been received.";

struct SiteSelectors {
    viewstate: Selector,
    error_info: Selector,
    summary_cells: Selector,
    state_rows: Selector,
    td: Selector,
}

static SELECTORS: OnceLock<SiteSelectors> = OnceLock::new();

impl SiteSelectors {
    fn get() -> &'static SiteSelectors {
        SELECTORS.get_or_init(|| SiteSelectors {
            viewstate: Selector::parse(r#"input[name="__VIEWSTATE"]"#).unwrap(),
            error_info: Selector::parse("span#ctl00_ContentPlaceHolder1_lblErrorInfo font")
                .unwrap(),
            summary_cells: Selector::parse("span#ctl00_ContentPlaceHolder1_awbLbl tr td").unwrap(),
            state_rows: Selector::parse("table#ctl00_ContentPlaceHolder1_gvCargoState tr").unwrap(),
            td: Selector::parse("td").unwrap(),
        })
    }
}

pub struct ChinaSouthernSpider {
    config: SiteConfig,
    base: Url,
}

impl ChinaSouthernSpider {
    pub fn new(config: SiteConfig) -> Self {
        let base_url = config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        Self {
            base: Url::parse(base_url).expect("Invalid base URL"),
            config,
        }
    }
}

impl Spider for ChinaSouthernSpider {
    fn id(&self) -> &'static str {
        "air_china_southern"
    }

    fn config(&self) -> &SiteConfig {
        &self.config
    }

    fn base_url(&self) -> &str {
        self.base.as_str()
    }

    fn accepts(&self) -> &'static [SearchType] {
        &[SearchType::Awb]
    }

    fn rules(&self) -> Vec<Arc<dyn RoutingRule>> {
        vec![
            Arc::new(FormStateRule::new(self.base.clone())),
            Arc::new(AirInfoRule),
        ]
    }

    fn start(&self, task: &TrackTask) -> Result<Vec<RequestOption>> {
        Ok(task
            .unique_search_nos()
            .into_iter()
            .map(|mawb_no| FormStateRule::build_request_option(&self.base, &mawb_no))
            .collect())
    }
}

// -------------------------------------------------------------------------------

/// 查询页：只为摘取一次性的 __VIEWSTATE
pub struct FormStateRule {
    base: Url,
}

impl FormStateRule {
    pub const NAME: &'static str = "FORM_STATE";

    pub fn new(base: Url) -> Self {
        Self { base }
    }

    pub fn build_request_option(base: &Url, mawb_no: &str) -> RequestOption {
        let mut meta = Meta::new();
        meta.insert("mawb_no".into(), mawb_no.into());

        RequestOption::builder()
            .rule_name(Self::NAME)
            .method(RequestMethod::Get)
            .url(base.as_str())
            .meta(meta)
            .build()
    }
}

impl RoutingRule for FormStateRule {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn handle(&self, response: &RoutingResponse) -> Result<Vec<RuleOutput>> {
        let mawb_no = response.meta_str("mawb_no")?;

        let doc = response.html();
        let s = SiteSelectors::get();

        let view_state = doc
            .select(&s.viewstate)
            .next()
            .and_then(|el| el.value().attr("value"))
            .ok_or_else(|| CrawlError::ResponseFormat("__VIEWSTATE not found".to_string()))?;

        Ok(vec![
            AirInfoRule::build_request_option(&self.base, mawb_no, view_state).into(),
        ])
    }
}

// -------------------------------------------------------------------------------

/// 查询结果页：主单摘要 + 航班状态表
pub struct AirInfoRule;

impl AirInfoRule {
    pub const NAME: &'static str = "AIR_INFO";

    pub fn build_request_option(base: &Url, mawb_no: &str, view_state: &str) -> RequestOption {
        let url = Url::parse_with_params(
            base.as_str(),
            &[("awbprefix", PREFIX), ("awbno", mawb_no), ("lan", LANG)],
        )
        .expect("Invalid query URL");

        let body = serde_urlencoded::to_string([
            ("__VIEWSTATE", view_state),
            ("__VIEWSTATEENCRYPTED", ""),
            ("ctl00$ContentPlaceHolder1$txtPrefix", PREFIX),
            ("ctl00$ContentPlaceHolder1$txtNo", mawb_no),
            ("ctl00$ContentPlaceHolder1$btnBrow", "Search"),
            ("ctl00$ContentPlaceHolder1$cbIsInter", "on"),
        ])
        .expect("form encode");

        let mut meta = Meta::new();
        meta.insert("mawb_no".into(), mawb_no.into());

        RequestOption::builder()
            .rule_name(Self::NAME)
            .method(RequestMethod::PostBody)
            .url(url.as_str())
            .headers(vec![
                (
                    "Content-Type".to_string(),
                    "application/x-www-form-urlencoded".to_string(),
                ),
                ("Accept".to_string(), "*/*".to_string()),
                ("Referer".to_string(), base.as_str().to_string()),
            ])
            .body(body)
            .meta(meta)
            .build()
    }

    fn is_awb_not_exist(response: &RoutingResponse) -> bool {
        let doc = response.html();
        let s = SiteSelectors::get();
        doc.select(&s.error_info)
            .next()
            .map(|el| normalize_space(&el.text().collect::<String>()))
            .is_some_and(|text| text == "Awb information does not exist")
    }

    /// 状态表逐行展开：[时间, 城市, 航班, 状态, 件数, 重量]
    fn extract_state_rows(response: &RoutingResponse) -> Vec<Vec<String>> {
        let doc = response.html();
        let s = SiteSelectors::get();

        doc.select(&s.state_rows)
            .skip(1)
            .map(|row| {
                row.select(&s.td)
                    .map(|td| normalize_space(&td.text().collect::<String>()))
                    .collect()
            })
            .filter(|cells: &Vec<String>| cells.len() >= 6)
            .collect()
    }

    /// 首航起飞时间：自上而下扫描起点城市的连续行
    fn derive_atd(rows: &[Vec<String>], origin: &str) -> Option<String> {
        for row in rows {
            if row[1] != origin {
                return None;
            }
            if row[3] == TAKEN_OFF {
                return non_empty(&row[0]);
            }
        }
        None
    }

    /// 末端收货时间：自下而上扫描终点城市的连续行
    fn derive_ata(rows: &[Vec<String>], destination: &str) -> Option<String> {
        for row in rows.iter().rev() {
            if row[1] != destination {
                return None;
            }
            if row[3] == RECEIVED {
                return non_empty(&row[0]);
            }
        }
        None
    }

    fn extract_air_freight(
        response: &RoutingResponse,
        rows: &[Vec<String>],
        search_no: &str,
    ) -> Result<AirFreight> {
        let doc = response.html();
        let s = SiteSelectors::get();

        let cells: Vec<String> = doc
            .select(&s.summary_cells)
            .map(|td| normalize_space(&td.text().collect::<String>()))
            .collect();

        if cells.len() < 6 || cells[0].is_empty() {
            return Err(CrawlError::InvalidSearchNo(search_no.to_string()));
        }

        // `784-12345675` -> `12345675`
        let mawb_no = cells[0]
            .split('-')
            .nth(1)
            .map(str::to_string)
            .ok_or_else(|| CrawlError::InvalidSearchNo(search_no.to_string()))?;

        // `CAN(Guangzhou)--AMS(Amsterdam)` -> (`CAN`, `AMS`)
        let routing: Vec<&str> = cells[2].split("--").collect();
        let origin = routing
            .first()
            .and_then(|city| city.split('(').next())
            .map(str::to_string)
            .unwrap_or_default();
        let destination = routing
            .last()
            .and_then(|city| city.split('(').next())
            .map(str::to_string)
            .unwrap_or_else(|| origin.clone());

        Ok(AirFreight {
            mawb_no,
            atd: Self::derive_atd(rows, &origin),
            ata: Self::derive_ata(rows, &destination),
            origin: non_empty(&origin),
            destination: non_empty(&destination),
            pieces: non_empty(&cells[4]),
            weight: non_empty(&cells[5]),
        })
    }
}

impl RoutingRule for AirInfoRule {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn save_name(&self, response: &RoutingResponse) -> String {
        match response.meta_str("mawb_no") {
            Ok(mawb_no) => format!("{}_{}.html", Self::NAME, mawb_no),
            Err(_) => format!("{}.html", Self::NAME),
        }
    }

    fn handle(&self, response: &RoutingResponse) -> Result<Vec<RuleOutput>> {
        let search_no = response.meta_str("mawb_no")?;

        if Self::is_awb_not_exist(response) {
            return Err(CrawlError::InvalidSearchNo(search_no.to_string()));
        }

        let rows = Self::extract_state_rows(response);
        let air_freight = Self::extract_air_freight(response, &rows, search_no)?;
        let mawb_no = air_freight.mawb_no.clone();

        let mut outputs = vec![TrackingItem::AirFreight(air_freight).into()];
        for row in &rows {
            outputs.push(
                TrackingItem::FlightHistory(FlightHistory {
                    mawb_no: mawb_no.clone(),
                    status: non_empty(&row[3]),
                    pieces: non_empty(&row[4]),
                    weight: non_empty(&row[5]),
                    time: non_empty(&row[0]),
                    location: non_empty(&row[1]),
                    flight_number: non_empty(&row[2]),
                })
                .into(),
            );
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

    #[test]
    fn form_state_feeds_search_request() {
        let option = FormStateRule::build_request_option(&base(), "12345675");
        let page = r#"
            <form>
            <input type="hidden" name="__VIEWSTATE" id="__VIEWSTATE" value="dDwtMTA3O==" />
            </form>
        "#;

        let rule = FormStateRule::new(base());
        let outputs = rule.handle(&response_for(&option, page)).unwrap();
        assert_eq!(outputs.len(), 1);

        match &outputs[0] {
            RuleOutput::Request(next) => {
                assert_eq!(next.rule_name, AirInfoRule::NAME);
                assert!(next.url.contains("awbprefix=784"));
                assert!(next.url.contains("awbno=12345675"));
                let body = next.body.as_deref().unwrap();
                assert!(body.contains("__VIEWSTATE=dDwtMTA3O%3D%3D"));
                assert!(body.contains("ctl00%24ContentPlaceHolder1%24txtNo=12345675"));
            }
            other => panic!("unexpected output: {:?}", other),
        }
    }

    #[test]
    fn missing_viewstate_is_format_error() {
        let option = FormStateRule::build_request_option(&base(), "12345675");
        let rule = FormStateRule::new(base());
        assert!(matches!(
            rule.handle(&response_for(&option, "<html></html>")),
            Err(CrawlError::ResponseFormat(_))
        ));
    }

    const RESULT_PAGE: &str = r#"
        <html><body>
        <span id="ctl00_ContentPlaceHolder1_awbLbl">
          <table>
            <tr>
              <td>784-12345675</td>
              <td>Route</td>
              <td>CAN(Guangzhou)--AMS(Amsterdam)</td>
              <td>Pieces/Weight</td>
              <td>12</td>
              <td>345.0</td>
            </tr>
          </table>
        </span>
        <table id="ctl00_ContentPlaceHolder1_gvCargoState">
          <tr><td>Time</td><td>City</td><td>Flight</td><td>Status</td><td>Pieces</td><td>Weight</td></tr>
          <tr><td>2021-08-01 10:00</td><td>CAN</td><td>CZ327</td><td>Cargo has been booked.</td><td>12</td><td>345.0</td></tr>
          <tr><td>2021-08-02 03:10</td><td>CAN</td><td>CZ327</td><td>Flight has taken off.</td><td>12</td><td>345.0</td></tr>
          <tr><td>2021-08-03 07:55</td><td>AMS</td><td>CZ327</td><td>Cargo has been received.</td><td>12</td><td>345.0</td></tr>
        </table>
        </body></html>
    "#;

    #[test]
    fn result_page_yields_summary_and_history() {
        let option = AirInfoRule::build_request_option(&base(), "12345675", "dDw=");
        let rule = AirInfoRule;
        assert_eq!(
            rule.save_name(&response_for(&option, "")),
            "AIR_INFO_12345675.html"
        );

        let outputs = rule.handle(&response_for(&option, RESULT_PAGE)).unwrap();
        assert_eq!(outputs.len(), 4);

        match &outputs[0] {
            RuleOutput::Item(TrackingItem::AirFreight(a)) => {
                assert_eq!(a.mawb_no, "12345675");
                assert_eq!(a.origin.as_deref(), Some("CAN"));
                assert_eq!(a.destination.as_deref(), Some("AMS"));
                assert_eq!(a.pieces.as_deref(), Some("12"));
                assert_eq!(a.weight.as_deref(), Some("345.0"));
                assert_eq!(a.atd.as_deref(), Some("2021-08-02 03:10"));
                assert_eq!(a.ata.as_deref(), Some("2021-08-03 07:55"));
            }
            other => panic!("unexpected output: {:?}", other),
        }

        match &outputs[2] {
            RuleOutput::Item(TrackingItem::FlightHistory(h)) => {
                assert_eq!(h.mawb_no, "12345675");
                assert_eq!(h.status.as_deref(), Some("Flight has taken off."));
                assert_eq!(h.flight_number.as_deref(), Some("CZ327"));
                assert_eq!(h.location.as_deref(), Some("CAN"));
            }
            other => panic!("unexpected output: {:?}", other),
        }
    }

    #[test]
    fn not_exist_page_reports_invalid_search_no() {
        let option = AirInfoRule::build_request_option(&base(), "99999999", "dDw=");
        let page = r#"
            <span id="ctl00_ContentPlaceHolder1_lblErrorInfo">
              <font color="red">Awb information does not exist</font>
            </span>
        "#;

        match AirInfoRule.handle(&response_for(&option, page)) {
            Err(CrawlError::InvalidSearchNo(no)) => assert_eq!(no, "99999999"),
            other => panic!("expected InvalidSearchNo, got {:?}", other.is_ok()),
        }
    }
}
