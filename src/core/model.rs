//! 领域数据模型 (Domain Items)
//!
//! 各船司/航司/码头站点抽取后的货况记录结构。日期字段保留站点原始字符串，
//! 不做时区或格式归一化。

use serde::{Deserialize, Serialize};
use strum::Display;

/// 地点信息 (港口/场站)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub un_lo_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firms_code: Option<String>,
}

impl Location {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}

/// 时刻性质标记：实际发生 (A) 或预估 (E)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum EstOrActual {
    #[serde(rename = "A")]
    #[strum(serialize = "A")]
    Actual,
    #[serde(rename = "E")]
    #[strum(serialize = "E")]
    Estimate,
}

/// 提单主档 (Master Bill of Lading)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MblInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mbl_no: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booking_no: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vessel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voyage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub por: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pol: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_of_deliv: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_dest: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ata: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deliv_eta: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deliv_ata: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cargo_cutoff_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surrendered_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_quantity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freight_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub us_customs_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub way_bill_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_update: Option<String>,
}

/// 航段船班资讯
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vessel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vessel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voyage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pol: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ata: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discharge_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping_date: Option<String>,
}

/// 货柜主档
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub container_no: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_free_day: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_pickup_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_return_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_pickup_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_return_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mt_location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub det_free_time_exp_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_for_pick_up: Option<String>,
}

/// 货柜动态事件
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub container_no: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// 站点当地时间字符串
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_date_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vessel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voyage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub est_or_actual: Option<EstOrActual>,
}

/// 码头放行状态
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TerminalInfo {
    pub container_no: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mbl_no: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vessel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carrier_release: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customs_release: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discharge_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_out_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_free_day: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demurrage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holds: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appointment_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carrier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_spec: Option<String>,
}

/// 空运主单摘要
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AirFreight {
    pub mawb_no: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pieces: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ata: Option<String>,
}

/// 空运航班历程
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlightHistory {
    pub mawb_no: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pieces: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flight_number: Option<String>,
}

/// 查询层级错误记录 (查无数据/站点回报错误)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_no: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_type: Option<String>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// 规则产出的货况记录联合型别
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackingItem {
    Mbl(MblInfo),
    Vessel(Vessel),
    Container(Container),
    ContainerStatus(ContainerStatus),
    Terminal(TerminalInfo),
    AirFreight(AirFreight),
    FlightHistory(FlightHistory),
    NotFound(ErrorData),
    Error(ErrorData),
}

impl TrackingItem {
    /// 管线路由键：决定记录归属于哪一组查询任务
    pub fn key(&self) -> Option<&str> {
        match self {
            TrackingItem::Mbl(m) => m.mbl_no.as_deref(),
            TrackingItem::Vessel(_) => None,
            TrackingItem::Container(c) => Some(&c.container_no),
            TrackingItem::ContainerStatus(s) => Some(&s.container_no),
            TrackingItem::Terminal(t) => Some(&t.container_no),
            TrackingItem::AirFreight(a) => Some(&a.mawb_no),
            TrackingItem::FlightHistory(h) => Some(&h.mawb_no),
            TrackingItem::NotFound(e) | TrackingItem::Error(e) => e.search_no.as_deref(),
        }
    }
}
