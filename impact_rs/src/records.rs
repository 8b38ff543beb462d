use std::fmt::{self, Display};

use serde::{Deserialize, Deserializer, Serialize};
use tabmove::{normalize_field, CacheRow};

use crate::accumulator::DocMetrics;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OaStatus {
    Gold,
    Diamond,
    Green,
    Hybrid,
    Bronze,
    Closed,
}

impl OaStatus {
    pub const ALL: [OaStatus; 6] = [
        OaStatus::Gold,
        OaStatus::Diamond,
        OaStatus::Green,
        OaStatus::Hybrid,
        OaStatus::Bronze,
        OaStatus::Closed,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gold" => Some(Self::Gold),
            "diamond" => Some(Self::Diamond),
            "green" => Some(Self::Green),
            "hybrid" => Some(Self::Hybrid),
            "bronze" => Some(Self::Bronze),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// Row of the article table as produced by ingestion.
///
/// Numeric and flag columns are read leniently from text: anything that does
/// not parse counts as missing. A row without id, venue or year is malformed.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ArticleRecord {
    #[serde(deserialize_with = "required_text")]
    pub id: String,
    #[serde(deserialize_with = "required_text")]
    pub venue_id: String,
    #[serde(deserialize_with = "lenient_year")]
    pub publication_year: u16,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub cited_by_count: Option<u64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub fwci: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub citation_normalized_percentile: Option<f64>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_in_top_10_percent: bool,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_in_top_1_percent: bool,
    #[serde(default, deserialize_with = "lenient_oa")]
    pub oa_status: Option<OaStatus>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct VenueRecord {
    #[serde(deserialize_with = "required_text")]
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_indexed_in_scopus: bool,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_core: bool,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_in_doaj: bool,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub works_count: Option<u64>,
}

impl VenueRecord {
    pub fn country(&self) -> Option<&str> {
        self.country_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, Hash, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    #[default]
    Venue,
    Country,
    Region,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Venue, EntityKind::Country, EntityKind::Region];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Venue => "venue",
            EntityKind::Country => "country",
            EntityKind::Region => "region",
        }
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityKey {
    pub fn new(kind: EntityKind, id: &str) -> Self {
        Self {
            kind,
            id: id.to_string(),
        }
    }

    pub fn venue(id: &str) -> Self {
        Self::new(EntityKind::Venue, id)
    }

    pub fn country(id: &str) -> Self {
        Self::new(EntityKind::Country, id)
    }

    pub fn region(id: &str) -> Self {
        Self::new(EntityKind::Region, id)
    }
}

impl Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Year(u16),
    Period(String),
}

/// Indexing coverage of an entity's venue set.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VenueStats {
    pub num_journals: u32,
    pub pct_scopus: f64,
    pub pct_core: f64,
    pub pct_doaj: f64,
}

/// One row of a metrics cache table.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct MetricsRecord {
    pub entity_type: EntityKind,
    pub entity_id: String,
    #[serde(deserialize_with = "lenient_opt_year")]
    pub year: Option<u16>,
    #[serde(deserialize_with = "empty_as_none")]
    pub period: Option<String>,
    #[serde(deserialize_with = "lenient_count")]
    pub num_documents: u64,
    #[serde(deserialize_with = "zero_f64")]
    pub fwci_avg: f64,
    #[serde(deserialize_with = "zero_f64")]
    pub avg_percentile: f64,
    #[serde(deserialize_with = "zero_f64")]
    pub pct_top_10: f64,
    #[serde(deserialize_with = "zero_f64")]
    pub pct_top_1: f64,
    #[serde(deserialize_with = "zero_f64")]
    pub pct_oa_gold: f64,
    #[serde(deserialize_with = "zero_f64")]
    pub pct_oa_diamond: f64,
    #[serde(deserialize_with = "zero_f64")]
    pub pct_oa_green: f64,
    #[serde(deserialize_with = "zero_f64")]
    pub pct_oa_hybrid: f64,
    #[serde(deserialize_with = "zero_f64")]
    pub pct_oa_bronze: f64,
    #[serde(deserialize_with = "zero_f64")]
    pub pct_oa_closed: f64,
    #[serde(deserialize_with = "lenient_opt_u32")]
    pub num_journals: Option<u32>,
    #[serde(deserialize_with = "lenient_f64")]
    pub pct_scopus: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    pub pct_core: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    pub pct_doaj: Option<f64>,
}

impl MetricsRecord {
    fn from_metrics(key: &EntityKey, m: &DocMetrics) -> Self {
        let [gold, diamond, green, hybrid, bronze, closed] = m.pct_oa;
        Self {
            entity_type: key.kind,
            entity_id: key.id.clone(),
            num_documents: m.num_documents,
            fwci_avg: m.fwci_avg,
            avg_percentile: m.avg_percentile,
            pct_top_10: m.pct_top_10,
            pct_top_1: m.pct_top_1,
            pct_oa_gold: gold,
            pct_oa_diamond: diamond,
            pct_oa_green: green,
            pct_oa_hybrid: hybrid,
            pct_oa_bronze: bronze,
            pct_oa_closed: closed,
            ..Default::default()
        }
    }

    pub fn annual(key: &EntityKey, year: u16, m: &DocMetrics) -> Self {
        Self {
            year: Some(year),
            ..Self::from_metrics(key, m)
        }
    }

    pub fn period(key: &EntityKey, label: &str, m: &DocMetrics, venues: &VenueStats) -> Self {
        Self {
            period: Some(label.to_string()),
            num_journals: Some(venues.num_journals),
            pct_scopus: Some(venues.pct_scopus),
            pct_core: Some(venues.pct_core),
            pct_doaj: Some(venues.pct_doaj),
            ..Self::from_metrics(key, m)
        }
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type, &self.entity_id)
    }

    pub fn scope(&self) -> Scope {
        match (&self.year, &self.period) {
            (Some(y), _) => Scope::Year(*y),
            (None, Some(p)) => Scope::Period(p.clone()),
            (None, None) => Scope::Period(String::new()),
        }
    }

    pub fn pct_oa(&self) -> [f64; 6] {
        [
            self.pct_oa_gold,
            self.pct_oa_diamond,
            self.pct_oa_green,
            self.pct_oa_hybrid,
            self.pct_oa_bronze,
            self.pct_oa_closed,
        ]
    }
}

impl CacheRow for MetricsRecord {
    type Entity = EntityKey;
    type Scope = Scope;

    fn entity(&self) -> EntityKey {
        self.key()
    }

    fn scope(&self) -> Scope {
        MetricsRecord::scope(self)
    }
}

// Text formats go through the lenient parsers, binary snapshots keep the
// plain representation they were written with.

fn text_field<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let raw = Option::<String>::deserialize(d)?;
    Ok(raw
        .map(|s| normalize_field(&s).to_string())
        .filter(|s| !s.is_empty()))
}

fn required_text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    if !d.is_human_readable() {
        return String::deserialize(d);
    }
    text_field(d)?.ok_or_else(|| serde::de::Error::custom("empty identifier"))
}

fn parse_number(s: &str) -> Option<f64> {
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    if !d.is_human_readable() {
        return Option::<f64>::deserialize(d);
    }
    Ok(text_field(d)?.and_then(|s| parse_number(&s)))
}

fn zero_f64<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    Ok(lenient_f64(d)?.unwrap_or(0.0))
}

pub fn lenient_u64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    if !d.is_human_readable() {
        return Option::<u64>::deserialize(d);
    }
    Ok(text_field(d)?
        .and_then(|s| parse_number(&s))
        .filter(|v| *v >= 0.0)
        .map(|v| v as u64))
}

fn lenient_count<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    Ok(lenient_u64(d)?.unwrap_or(0))
}

fn lenient_opt_u32<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
    Ok(lenient_u64(d)?.map(|v| v.min(u32::MAX as u64) as u32))
}

fn lenient_bool<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    if !d.is_human_readable() {
        return bool::deserialize(d);
    }
    Ok(match text_field(d)? {
        Some(s) => matches!(
            s.to_ascii_lowercase().as_str(),
            "true" | "t" | "1" | "1.0" | "yes"
        ),
        None => false,
    })
}

fn lenient_oa<'de, D: Deserializer<'de>>(d: D) -> Result<Option<OaStatus>, D::Error> {
    if !d.is_human_readable() {
        return Option::<OaStatus>::deserialize(d);
    }
    Ok(text_field(d)?.and_then(|s| OaStatus::parse(&s)))
}

fn parse_year(s: &str) -> Option<u16> {
    parse_number(s)
        .filter(|v| *v >= 0.0 && *v <= u16::MAX as f64 && v.fract() == 0.0)
        .map(|v| v as u16)
}

fn lenient_year<'de, D: Deserializer<'de>>(d: D) -> Result<u16, D::Error> {
    if !d.is_human_readable() {
        return u16::deserialize(d);
    }
    let raw = text_field(d)?;
    raw.as_deref()
        .and_then(parse_year)
        .ok_or_else(|| serde::de::Error::custom(format!("bad publication year {:?}", raw)))
}

fn lenient_opt_year<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u16>, D::Error> {
    if !d.is_human_readable() {
        return Option::<u16>::deserialize(d);
    }
    Ok(text_field(d)?.and_then(|s| parse_year(&s)))
}

fn empty_as_none<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    if !d.is_human_readable() {
        return Option::<String>::deserialize(d);
    }
    text_field(d)
}
