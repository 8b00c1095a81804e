//! Promotion classification and message rendering.
//!
//! Entries are classified one at a time into an [`Outcome`]; only included
//! games (and placeholders for upcoming games whose data is incomplete) make
//! it into the rendered [`Formatted`] output. Dates are always rendered in
//! UTC+8 so the output does not depend on the host's local zone.
use chrono::{DateTime, FixedOffset};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{Config, Display as DisplayOptions};
use crate::model::{
    CatalogEntry, ClassifiedGame, GameStatus, MessageBundle, OfferGroup, PageMapping,
};

/// Publisher used by the store for internal test listings.
pub const TEST_ACCOUNT_PUBLISHER: &str = "Epic Dev Test Account";

const DISPLAY_OFFSET_SECS: i32 = 8 * 3600;
const UNKNOWN_TITLE: &str = "未知";

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("invalid timestamp `{value}`: {source}")]
    Timestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

impl ClassifyError {
    /// Shape errors are missing or mismatched fields; anything else is unexpected.
    pub fn is_shape(&self) -> bool {
        matches!(self, ClassifyError::MissingField(_))
    }
}

/// Result of classifying a single catalog entry.
#[derive(Debug)]
pub enum Outcome {
    Included(ClassifiedGame),
    /// Upcoming game whose details could not be extracted.
    Placeholder { name: String },
    NoPromotion,
    /// On promotion, but the discounted price is not zero.
    NotFree { name: String, discount: String },
    ShapeError { name: String, error: ClassifyError },
    Unexpected { name: String, error: ClassifyError },
}

/// Rendered output of one formatting pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formatted {
    pub header: String,
    pub current: Vec<String>,
    pub upcoming: Vec<String>,
}

impl Formatted {
    fn header_only(header: String) -> Self {
        Self {
            header,
            current: Vec::new(),
            upcoming: Vec::new(),
        }
    }

    pub fn game_count(&self) -> usize {
        self.current.len() + self.upcoming.len()
    }

    /// Header, then current-free blocks, then upcoming-free blocks.
    pub fn bundle(&self) -> MessageBundle {
        let mut bundle = Vec::with_capacity(1 + self.game_count());
        bundle.push(self.header.clone());
        bundle.extend(self.current.iter().cloned());
        bundle.extend(self.upcoming.iter().cloned());
        bundle
    }
}

#[derive(Debug, Clone)]
pub struct Formatter {
    display: DisplayOptions,
    store_url: String,
}

impl Formatter {
    pub fn new(display: DisplayOptions, store_url: impl Into<String>) -> Self {
        Self {
            display,
            store_url: store_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.display.clone(), cfg.epic.store_url.clone())
    }

    pub fn display(&self) -> &DisplayOptions {
        &self.display
    }

    #[instrument(skip_all, fields(entries = entries.len()))]
    pub fn format(&self, entries: &[CatalogEntry]) -> Formatted {
        if entries.is_empty() {
            return Formatted::header_only(self.display.error_message.clone());
        }

        debug!(
            "fetched {} games: {}",
            entries.len(),
            entries
                .iter()
                .map(|e| e.title.as_deref().unwrap_or(UNKNOWN_TITLE))
                .collect::<Vec<_>>()
                .join("、")
        );

        let mut current = Vec::new();
        let mut upcoming = Vec::new();
        for entry in entries {
            match self.classify(entry) {
                Outcome::Included(game) if game.is_free() => current.push(self.render(&game)),
                Outcome::Included(game) => upcoming.push(self.render(&game)),
                Outcome::Placeholder { name } => upcoming.push(placeholder_block(&name)),
                _ => {}
            }
        }

        let count = current.len() + upcoming.len();
        let header = if count > 0 {
            self.display
                .message_template
                .replace("{game_count}", &count.to_string())
        } else {
            self.display.no_games_message.clone()
        };

        Formatted {
            header,
            current,
            upcoming,
        }
    }

    pub fn classify(&self, entry: &CatalogEntry) -> Outcome {
        let name = entry.title.as_deref().unwrap_or(UNKNOWN_TITLE).to_string();
        let Some(promotions) = entry.promotions.as_ref() else {
            debug!(game = %name, "no promotions, skipping");
            return Outcome::NoPromotion;
        };
        let (current, upcoming) = (promotions.current(), promotions.upcoming());
        debug!(
            game = %name,
            current = !current.is_empty(),
            upcoming = !upcoming.is_empty(),
            "promotion state"
        );
        if current.is_empty() && upcoming.is_empty() {
            debug!(game = %name, "no active or upcoming offers, skipping");
            return Outcome::NoPromotion;
        }

        match self.evaluate(entry, &name, current, upcoming) {
            Ok(outcome) => outcome,
            // Only this entry's own upcoming list decides the fallback.
            Err(error) if error.is_shape() && entry.has_upcoming() => {
                warn!(game = %name, %error, "incomplete upcoming game, using placeholder");
                Outcome::Placeholder { name }
            }
            Err(error) if error.is_shape() => {
                warn!(game = %name, %error, "incomplete catalog entry, skipping");
                Outcome::ShapeError { name, error }
            }
            Err(error) => {
                error!(game = %name, ?error, "failed to format catalog entry");
                Outcome::Unexpected { name, error }
            }
        }
    }

    fn evaluate(
        &self,
        entry: &CatalogEntry,
        name: &str,
        current: &[OfferGroup],
        upcoming: &[OfferGroup],
    ) -> Result<Outcome, ClassifyError> {
        let fmt_price = entry
            .fmt_price()
            .ok_or(ClassifyError::MissingField("price.totalPrice.fmtPrice"))?;
        let original_price = fmt_price
            .original_price
            .clone()
            .ok_or(ClassifyError::MissingField("fmtPrice.originalPrice"))?;

        if !current.is_empty() && !is_zero_price(entry) {
            let discount = fmt_price
                .discount_price
                .clone()
                .or_else(|| {
                    entry
                        .total_price()
                        .and_then(|t| t.discount_price)
                        .map(|p| p.to_string())
                })
                .unwrap_or_default();
            info!(game = %name, %discount, "skipping promoted game that is not free");
            return Ok(Outcome::NotFree {
                name: name.to_string(),
                discount,
            });
        }

        let developer = match entry.custom_attributes.get("developerName") {
            Some(dev) => dev.clone(),
            None => seller_name(entry)?,
        };
        let publisher = match entry.custom_attributes.get("publisherName") {
            Some(publisher) => publisher.clone(),
            None => seller_name(entry)?,
        };

        let status = if let Some(group) = current.first() {
            let end = group
                .first_window()
                .and_then(|w| w.end_date.as_deref())
                .ok_or(ClassifyError::MissingField("promotionalOffers[0].endDate"))?;
            GameStatus::CurrentlyFree {
                until: parse_offer_time(end)?,
            }
        } else {
            let start = upcoming
                .first()
                .and_then(OfferGroup::first_window)
                .and_then(|w| w.start_date.as_deref())
                .ok_or(ClassifyError::MissingField(
                    "upcomingPromotionalOffers[0].startDate",
                ))?;
            info!(game = %name, "found upcoming free game");
            GameStatus::UpcomingFree {
                from: parse_offer_time(start)?,
            }
        };

        let description = match (&entry.description, self.display.include_game_description) {
            (None, true) => return Err(ClassifyError::MissingField("description")),
            (description, _) => description.clone(),
        };

        Ok(Outcome::Included(ClassifiedGame {
            name: name.to_string(),
            original_price,
            url: resolve_url(entry, &self.store_url),
            description,
            developer,
            publisher,
            status,
        }))
    }

    /// Render one game block; each display toggle gates only its own line.
    pub fn render(&self, game: &ClassifiedGame) -> String {
        let mut block = if self.display.show_price {
            format!("🎮 {} ({})\n", game.name, game.original_price)
        } else {
            format!("🎮 {}\n", game.name)
        };
        block.push_str(&format!("🔗 {}\n", game.url));

        if self.display.include_game_description {
            if let Some(description) = &game.description {
                block.push_str(&format!("📝 {}\n", description));
            }
        }

        if self.display.include_developer_info || self.display.include_publisher_info {
            let companies = companies_clause(&game.developer, &game.publisher);
            if !companies.is_empty() {
                block.push_str(&format!("🏢 {}\n", companies));
            }
        }

        if self.display.include_end_time {
            match game.status {
                GameStatus::CurrentlyFree { until } => block.push_str(&format!(
                    "⏰ 限免至 {}，戳上方链接领取吧~",
                    render_date(&until)
                )),
                GameStatus::UpcomingFree { from } => block.push_str(&format!(
                    "⏰ 即将于 {} 开始限免，记得关注哦~",
                    render_date(&from)
                )),
            }
        }

        block
    }
}

fn seller_name(entry: &CatalogEntry) -> Result<String, ClassifyError> {
    entry
        .seller_name()
        .map(str::to_string)
        .ok_or(ClassifyError::MissingField("seller.name"))
}

fn is_zero_price(entry: &CatalogEntry) -> bool {
    match entry.fmt_price().and_then(|f| f.discount_price.as_deref()) {
        Some(fmt) => fmt == "0",
        None => entry.total_price().and_then(|t| t.discount_price) == Some(0),
    }
}

fn placeholder_block(name: &str) -> String {
    format!("🎮 {} (即将免费)\n⏰ 即将开始限免，请关注Epic商店\n", name)
}

/// `由 {developer} 开发、{publisher} 发行，`, dropping the developer part when it
/// matches the publisher, or empty for test-account listings.
pub fn companies_clause(developer: &str, publisher: &str) -> String {
    if publisher == TEST_ACCOUNT_PUBLISHER {
        return String::new();
    }
    let developer_part = if developer != publisher {
        format!("{} 开发、", developer)
    } else {
        String::new()
    };
    format!("由 {}{} 发行，", developer_part, publisher)
}

fn display_zone() -> FixedOffset {
    FixedOffset::east_opt(DISPLAY_OFFSET_SECS).expect("valid UTC+8 offset")
}

/// Parse an offer timestamp such as `2024-06-20T17:00:00.000Z` into UTC+8.
pub fn parse_offer_time(value: &str) -> Result<DateTime<FixedOffset>, ClassifyError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&display_zone()))
        .map_err(|source| ClassifyError::Timestamp {
            value: value.to_string(),
            source,
        })
}

pub fn render_date(dt: &DateTime<FixedOffset>) -> String {
    dt.with_timezone(&display_zone())
        .format("%m月%d日 %H:%M")
        .to_string()
}

/// Direct URL first, then the first product-home slug from offer mappings,
/// catalog namespace mappings, and `productSlug` attributes, in that order.
pub fn resolve_url(entry: &CatalogEntry, store_url: &str) -> String {
    if let Some(url) = entry.url.as_deref().filter(|u| !u.is_empty()) {
        return url.to_string();
    }

    let slug = product_home_slugs(entry.offer_mappings.as_ref())
        .chain(product_home_slugs(
            entry.catalog_ns.as_ref().and_then(|ns| ns.mappings.as_ref()),
        ))
        .chain(
            entry
                .custom_attributes
                .iter()
                .filter(|(key, _)| key.contains("productSlug"))
                .map(|(_, value)| value.as_str()),
        )
        .find(|slug| !slug.is_empty());

    match slug {
        Some(slug) => format!("{}/p/{}", store_url, slug),
        None => store_url.to_string(),
    }
}

fn product_home_slugs(mappings: Option<&Vec<PageMapping>>) -> impl Iterator<Item = &str> {
    mappings
        .into_iter()
        .flatten()
        .filter(|m| m.page_type.as_deref() == Some("productHome"))
        .filter_map(|m| m.page_slug.as_deref())
}
