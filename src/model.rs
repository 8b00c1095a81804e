use chrono::{DateTime, FixedOffset};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;

/// One element of `data.Catalog.searchStore.elements`.
///
/// Every field is optional on the wire. A field holding the wrong JSON type
/// decodes as absent, so both missing and mismatched pieces surface as shape
/// errors during classification rather than at decode time.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CatalogEntry {
    #[serde(deserialize_with = "lenient")]
    pub title: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub description: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub seller: Option<Seller>,
    /// Decoded from the `[{key, value}]` association list.
    #[serde(deserialize_with = "attribute_map")]
    pub custom_attributes: BTreeMap<String, String>,
    #[serde(deserialize_with = "lenient")]
    pub price: Option<Price>,
    #[serde(deserialize_with = "lenient")]
    pub promotions: Option<Promotions>,
    #[serde(deserialize_with = "lenient")]
    pub url: Option<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub offer_mappings: Option<Vec<PageMapping>>,
    #[serde(deserialize_with = "lenient")]
    pub catalog_ns: Option<CatalogNamespace>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Seller {
    #[serde(deserialize_with = "lenient")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Price {
    #[serde(deserialize_with = "lenient")]
    pub total_price: Option<TotalPrice>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TotalPrice {
    #[serde(deserialize_with = "lenient")]
    pub discount_price: Option<i64>,
    #[serde(deserialize_with = "lenient")]
    pub original_price: Option<i64>,
    #[serde(deserialize_with = "lenient")]
    pub fmt_price: Option<FmtPrice>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct FmtPrice {
    #[serde(deserialize_with = "lenient")]
    pub original_price: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub discount_price: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Promotions {
    #[serde(deserialize_with = "lenient_list")]
    pub promotional_offers: Option<Vec<OfferGroup>>,
    #[serde(deserialize_with = "lenient_list")]
    pub upcoming_promotional_offers: Option<Vec<OfferGroup>>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct OfferGroup {
    #[serde(deserialize_with = "lenient_list")]
    pub promotional_offers: Option<Vec<OfferWindow>>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct OfferWindow {
    #[serde(deserialize_with = "lenient")]
    pub start_date: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PageMapping {
    #[serde(deserialize_with = "lenient")]
    pub page_slug: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub page_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct CatalogNamespace {
    #[serde(deserialize_with = "lenient_list")]
    pub mappings: Option<Vec<PageMapping>>,
}

#[derive(Deserialize)]
struct AttributePair {
    key: String,
    #[serde(default, deserialize_with = "lenient")]
    value: Option<String>,
}

/// Decode `T`, treating a null or mismatched value as absent.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Decode a list whose elements fall back to their default when mismatched,
/// so the list keeps its length.
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    match Value::deserialize(deserializer)? {
        Value::Array(items) => Ok(Some(
            items
                .into_iter()
                .map(|item| serde_json::from_value(item).unwrap_or_default())
                .collect(),
        )),
        _ => Ok(None),
    }
}

fn attribute_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let Value::Array(items) = Value::deserialize(deserializer)? else {
        return Ok(BTreeMap::new());
    };
    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<AttributePair>(item).ok())
        .filter_map(|p| p.value.map(|v| (p.key, v)))
        .collect())
}

impl Promotions {
    pub fn current(&self) -> &[OfferGroup] {
        self.promotional_offers.as_deref().unwrap_or_default()
    }

    pub fn upcoming(&self) -> &[OfferGroup] {
        self.upcoming_promotional_offers.as_deref().unwrap_or_default()
    }
}

impl OfferGroup {
    /// First window of the group, if any.
    pub fn first_window(&self) -> Option<&OfferWindow> {
        self.promotional_offers.as_deref().and_then(<[_]>::first)
    }
}

impl CatalogEntry {
    pub fn fmt_price(&self) -> Option<&FmtPrice> {
        self.total_price().and_then(|t| t.fmt_price.as_ref())
    }

    pub fn total_price(&self) -> Option<&TotalPrice> {
        self.price.as_ref().and_then(|p| p.total_price.as_ref())
    }

    pub fn seller_name(&self) -> Option<&str> {
        self.seller.as_ref().and_then(|s| s.name.as_deref())
    }

    /// True when the upcoming offer list of this entry is non-empty.
    pub fn has_upcoming(&self) -> bool {
        self.promotions
            .as_ref()
            .is_some_and(|p| !p.upcoming().is_empty())
    }
}

/// Promotion state of a qualifying game, with timestamps already in the
/// display time zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameStatus {
    CurrentlyFree { until: DateTime<FixedOffset> },
    UpcomingFree { from: DateTime<FixedOffset> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedGame {
    pub name: String,
    pub original_price: String,
    pub url: String,
    pub description: Option<String>,
    pub developer: String,
    pub publisher: String,
    pub status: GameStatus,
}

impl ClassifiedGame {
    pub fn is_free(&self) -> bool {
        matches!(self.status, GameStatus::CurrentlyFree { .. })
    }
}

/// Header followed by one block per game, current-free before upcoming-free.
pub type MessageBundle = Vec<String>;
