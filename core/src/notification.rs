//! Book notifications and their validity predicate.
//!
//! A [`Notification`] is the JSON payload exchanged on the notification
//! channels. Every field is optional on the wire so that a malformed message
//! still parses and can be rejected with a precise [`RejectReason`] instead of
//! failing deserialization.
//!
//! Validation is pure: it performs field-presence and range checks only and
//! never touches the book store. A successful check yields a
//! [`ValidNotification`] whose required fields are no longer optional, so the
//! reconciler cannot observe a partially valid message.
//!
//! # Wire Format
//!
//! ```json
//! {
//!   "isbn": "9780123456789",
//!   "title": "Test Book",
//!   "author": "Test Author",
//!   "description": "Test Description",
//!   "price": 29.99,
//!   "stock": 10,
//!   "category": "FICTION",
//!   "notification_type": "NEW_BOOK",
//!   "timestamp": "2025-01-01 10:30:00"
//! }
//! ```

use crate::book::{BookFields, BookRecord};
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The kind of change a notification announces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    /// A book was added to the catalogue.
    NewBook,
    /// Only the stock level of a book changed.
    StockUpdate,
    /// Any descriptive field of a book changed.
    BookUpdate,
}

impl NotificationType {
    /// Wire name of the notification type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NewBook => "NEW_BOOK",
            Self::StockUpdate => "STOCK_UPDATE",
            Self::BookUpdate => "BOOK_UPDATE",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of catalogue categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookCategory {
    /// Novels and short stories
    Fiction,
    /// Essays, journalism, self-help
    NonFiction,
    /// Natural and formal sciences
    Science,
    /// Programming and engineering
    #[serde(alias = "TECH")]
    Technology,
    /// History
    History,
    /// Biographies and memoirs
    Biography,
    /// Fantasy
    Fantasy,
    /// Mystery and crime
    Mystery,
    /// Romance
    Romance,
    /// Children's books
    Children,
}

impl BookCategory {
    /// Wire name of the category.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Fiction => "FICTION",
            Self::NonFiction => "NON_FICTION",
            Self::Science => "SCIENCE",
            Self::Technology => "TECHNOLOGY",
            Self::History => "HISTORY",
            Self::Biography => "BIOGRAPHY",
            Self::Fantasy => "FANTASY",
            Self::Mystery => "MYSTERY",
            Self::Romance => "ROMANCE",
            Self::Children => "CHILDREN",
        }
    }
}

impl fmt::Display for BookCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a notification was rejected before reconciliation.
///
/// Checks run in declaration order and the first failing check is reported.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// `isbn` is absent or blank
    #[error("null or empty isbn")]
    MissingIsbn,

    /// `title` is absent or blank
    #[error("null or empty title")]
    MissingTitle,

    /// `author` is absent or blank
    #[error("null or empty author")]
    MissingAuthor,

    /// `price` is absent, zero or negative
    #[error("null or non-positive price")]
    InvalidPrice,

    /// `stock` is absent or negative
    #[error("null or negative stock")]
    InvalidStock,

    /// `category` is absent
    #[error("null category")]
    MissingCategory,

    /// `notification_type` is absent
    #[error("null notification type")]
    MissingNotificationType,
}

/// A stored stock level that the wire's signed 32-bit `stock` cannot carry.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("stock {0} exceeds the notification stock range")]
pub struct StockOutOfRange(pub u32);

/// A book notification as it travels on the wire.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Notification {
    /// Natural key of the book
    pub isbn: Option<String>,
    /// Book title
    pub title: Option<String>,
    /// Book author
    pub author: Option<String>,
    /// Free-form description
    pub description: Option<String>,
    /// Unit price, strictly positive when valid
    pub price: Option<Decimal>,
    /// Units in stock, non-negative when valid
    pub stock: Option<i32>,
    /// Catalogue category
    pub category: Option<BookCategory>,
    /// What kind of change this notification announces
    pub notification_type: Option<NotificationType>,
    /// When the notification was produced. Informational only.
    #[serde(with = "timestamp_format")]
    pub timestamp: Option<NaiveDateTime>,
}

impl Notification {
    /// Build a notification mirroring the authoritative state of `record`.
    ///
    /// # Errors
    ///
    /// Returns [`StockOutOfRange`] if the stored stock exceeds `i32::MAX`.
    pub fn from_record(
        record: &BookRecord,
        notification_type: NotificationType,
        timestamp: NaiveDateTime,
    ) -> Result<Self, StockOutOfRange> {
        let fields = &record.fields;
        let stock = i32::try_from(fields.stock).map_err(|_| StockOutOfRange(fields.stock))?;
        Ok(Self {
            isbn: Some(fields.isbn.clone()),
            title: Some(fields.title.clone()),
            author: Some(fields.author.clone()),
            description: fields.description.clone(),
            price: Some(fields.price),
            stock: Some(stock),
            category: Some(fields.category),
            notification_type: Some(notification_type),
            timestamp: Some(timestamp),
        })
    }

    /// Check the notification and unwrap its required fields.
    ///
    /// # Errors
    ///
    /// Returns the first [`RejectReason`] that applies.
    pub fn validate(&self) -> Result<ValidNotification, RejectReason> {
        let isbn = non_blank(self.isbn.as_deref()).ok_or(RejectReason::MissingIsbn)?;
        let title = non_blank(self.title.as_deref()).ok_or(RejectReason::MissingTitle)?;
        let author = non_blank(self.author.as_deref()).ok_or(RejectReason::MissingAuthor)?;

        let price = self
            .price
            .filter(|price| price.is_sign_positive() && !price.is_zero())
            .ok_or(RejectReason::InvalidPrice)?;

        let stock = self
            .stock
            .and_then(|stock| u32::try_from(stock).ok())
            .ok_or(RejectReason::InvalidStock)?;

        let category = self.category.ok_or(RejectReason::MissingCategory)?;
        let notification_type = self
            .notification_type
            .ok_or(RejectReason::MissingNotificationType)?;

        Ok(ValidNotification {
            isbn: isbn.to_string(),
            title: title.to_string(),
            author: author.to_string(),
            description: self.description.clone(),
            price,
            stock,
            category,
            notification_type,
            timestamp: self.timestamp,
        })
    }

    /// Whether [`Notification::validate`] would succeed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Notification {{ type: {}, isbn: {}, stock: {} }}",
            self.notification_type
                .map_or("<none>", |kind| kind.as_str()),
            self.isbn.as_deref().unwrap_or("<none>"),
            self.stock
                .map_or_else(|| "<none>".to_string(), |stock| stock.to_string()),
        )
    }
}

/// Returns the value untouched when it contains something other than whitespace.
fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// A notification that passed validation.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidNotification {
    /// Natural key of the book
    pub isbn: String,
    /// Book title
    pub title: String,
    /// Book author
    pub author: String,
    /// Free-form description
    pub description: Option<String>,
    /// Unit price (> 0)
    pub price: Decimal,
    /// Units in stock
    pub stock: u32,
    /// Catalogue category
    pub category: BookCategory,
    /// What kind of change this notification announces
    pub notification_type: NotificationType,
    /// When the notification was produced
    pub timestamp: Option<NaiveDateTime>,
}

impl ValidNotification {
    /// The record fields this notification describes.
    #[must_use]
    pub fn to_fields(&self) -> BookFields {
        BookFields {
            title: self.title.clone(),
            author: self.author.clone(),
            isbn: self.isbn.clone(),
            description: self.description.clone(),
            price: self.price,
            stock: self.stock,
            category: self.category,
        }
    }
}

/// `yyyy-MM-dd HH:mm:ss` timestamps, with ISO-8601 accepted on input.
///
/// The module itself handles `Option<NaiveDateTime>` fields; [`required`]
/// handles plain `NaiveDateTime` ones.
///
/// [`required`]: timestamp_format::required
pub mod timestamp_format {
    use chrono::{NaiveDateTime, ParseError};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Wire format of timestamps
    pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S";
    const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

    /// Parse `raw` in [`FORMAT`], falling back to ISO-8601.
    ///
    /// # Errors
    ///
    /// Returns the ISO-8601 parse error when neither format matches.
    pub fn parse(raw: &str) -> Result<NaiveDateTime, ParseError> {
        NaiveDateTime::parse_from_str(raw, FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(raw, ISO_FORMAT))
    }

    /// Serde serializer for `Option<NaiveDateTime>`.
    ///
    /// # Errors
    ///
    /// Propagates errors of `serializer`.
    #[allow(clippy::ref_option)] // Signature dictated by serde's `with` attribute
    pub fn serialize<S>(value: &Option<NaiveDateTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.collect_str(&ts.format(FORMAT)),
            None => serializer.serialize_none(),
        }
    }

    /// Serde deserializer for `Option<NaiveDateTime>`.
    ///
    /// # Errors
    ///
    /// Fails when the string matches neither format.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|raw| parse(&raw).map_err(serde::de::Error::custom))
            .transpose()
    }

    /// Same format for fields that are always present.
    pub mod required {
        use super::{FORMAT, parse};
        use chrono::NaiveDateTime;
        use serde::{Deserialize, Deserializer, Serializer};

        /// Serde serializer for `NaiveDateTime`.
        ///
        /// # Errors
        ///
        /// Propagates errors of `serializer`.
        pub fn serialize<S>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.collect_str(&value.format(FORMAT))
        }

        /// Serde deserializer for `NaiveDateTime`.
        ///
        /// # Errors
        ///
        /// Fails when the string matches neither format.
        pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
        where
            D: Deserializer<'de>,
        {
            let raw = String::deserialize(deserializer)?;
            parse(&raw).map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::book::BookId;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn valid() -> Notification {
        Notification {
            isbn: Some("9780123456789".to_string()),
            title: Some("Test Book".to_string()),
            author: Some("Test Author".to_string()),
            description: Some("Test Description".to_string()),
            price: Some(dec!(29.99)),
            stock: Some(10),
            category: Some(BookCategory::Fiction),
            notification_type: Some(NotificationType::NewBook),
            timestamp: None,
        }
    }

    #[test]
    fn valid_notification_passes() {
        let checked = valid().validate().unwrap();
        assert_eq!(checked.isbn, "9780123456789");
        assert_eq!(checked.stock, 10);
        assert_eq!(checked.notification_type, NotificationType::NewBook);
    }

    #[test]
    fn description_is_optional() {
        let notification = Notification {
            description: None,
            ..valid()
        };
        assert!(notification.is_valid());
    }

    #[test]
    fn zero_stock_is_valid() {
        let notification = Notification {
            stock: Some(0),
            ..valid()
        };
        assert!(notification.is_valid());
    }

    #[test]
    fn each_missing_field_has_its_own_reason() {
        let cases = [
            (Notification { isbn: None, ..valid() }, RejectReason::MissingIsbn),
            (Notification { isbn: Some("  ".into()), ..valid() }, RejectReason::MissingIsbn),
            (Notification { title: Some(String::new()), ..valid() }, RejectReason::MissingTitle),
            (Notification { author: None, ..valid() }, RejectReason::MissingAuthor),
            (Notification { price: Some(Decimal::ZERO), ..valid() }, RejectReason::InvalidPrice),
            (Notification { price: Some(dec!(-1.50)), ..valid() }, RejectReason::InvalidPrice),
            (Notification { price: None, ..valid() }, RejectReason::InvalidPrice),
            (Notification { stock: Some(-1), ..valid() }, RejectReason::InvalidStock),
            (Notification { stock: None, ..valid() }, RejectReason::InvalidStock),
            (Notification { category: None, ..valid() }, RejectReason::MissingCategory),
            (
                Notification { notification_type: None, ..valid() },
                RejectReason::MissingNotificationType,
            ),
        ];

        for (notification, expected) in cases {
            assert_eq!(notification.validate(), Err(expected), "{notification}");
        }
    }

    #[test]
    fn first_failing_check_wins() {
        let notification = Notification {
            title: None,
            stock: Some(-5),
            ..valid()
        };
        assert_eq!(notification.validate(), Err(RejectReason::MissingTitle));
    }

    #[test]
    fn parses_wire_json() {
        let json = r#"{
            "isbn": "978-1",
            "title": "Go",
            "author": "A",
            "description": null,
            "price": 9.99,
            "stock": 3,
            "category": "TECH",
            "notification_type": "NEW_BOOK",
            "timestamp": "2025-01-01 10:30:00"
        }"#;

        let notification: Notification = serde_json::from_str(json).unwrap();
        assert_eq!(notification.price, Some(dec!(9.99)));
        assert_eq!(notification.category, Some(BookCategory::Technology));
        assert_eq!(
            notification.timestamp.unwrap().to_string(),
            "2025-01-01 10:30:00"
        );
        assert!(notification.is_valid());
    }

    #[test]
    fn missing_fields_parse_as_none() {
        let notification: Notification = serde_json::from_str(r#"{"isbn":"1"}"#).unwrap();
        assert_eq!(notification.title, None);
        assert_eq!(notification.timestamp, None);
        assert_eq!(notification.validate(), Err(RejectReason::MissingTitle));
    }

    #[test]
    fn iso_timestamp_is_accepted() {
        let notification: Notification =
            serde_json::from_str(r#"{"timestamp":"2025-03-04T05:06:07.123"}"#).unwrap();
        assert!(notification.timestamp.is_some());
    }

    #[test]
    fn unknown_category_fails_to_parse() {
        let result = serde_json::from_str::<Notification>(r#"{"category":"POETRY"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn serializes_wire_names() {
        let notification = Notification {
            category: Some(BookCategory::NonFiction),
            notification_type: Some(NotificationType::StockUpdate),
            timestamp: timestamp_format::parse("2025-01-01 00:00:00").ok(),
            ..valid()
        };

        let value = serde_json::to_value(&notification).unwrap();
        assert_eq!(value["category"], "NON_FICTION");
        assert_eq!(value["notification_type"], "STOCK_UPDATE");
        assert_eq!(value["timestamp"], "2025-01-01 00:00:00");
    }

    #[test]
    fn from_record_mirrors_fields() {
        let record = BookRecord {
            id: BookId::new(7),
            fields: valid().validate().unwrap().to_fields(),
        };
        let ts = NaiveDateTime::parse_from_str("2025-01-01 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap();

        let notification =
            Notification::from_record(&record, NotificationType::BookUpdate, ts).unwrap();
        assert_eq!(notification.isbn.as_deref(), Some("9780123456789"));
        assert_eq!(notification.stock, Some(10));
        assert_eq!(notification.notification_type, Some(NotificationType::BookUpdate));
        assert!(notification.is_valid());
    }

    #[test]
    fn from_record_refuses_stock_beyond_wire_range() {
        let mut fields = valid().validate().unwrap().to_fields();
        fields.stock = u32::try_from(i32::MAX).unwrap() + 1;
        let record = BookRecord {
            id: BookId::new(7),
            fields,
        };
        let ts = NaiveDateTime::default();

        assert_eq!(
            Notification::from_record(&record, NotificationType::StockUpdate, ts),
            Err(StockOutOfRange(2_147_483_648))
        );

        let at_limit = record.fields.clone().with_stock(u32::try_from(i32::MAX).unwrap());
        let record = BookRecord { fields: at_limit, ..record };
        let notification =
            Notification::from_record(&record, NotificationType::StockUpdate, ts).unwrap();
        assert_eq!(notification.stock, Some(i32::MAX));
    }

    #[test]
    fn required_timestamp_accepts_both_formats() {
        #[derive(Serialize, Deserialize)]
        struct Stamped {
            #[serde(with = "timestamp_format::required")]
            at: NaiveDateTime,
        }

        let plain: Stamped = serde_json::from_str(r#"{"at":"2025-01-01 08:30:00"}"#).unwrap();
        let iso: Stamped = serde_json::from_str(r#"{"at":"2025-01-01T08:30:00.000"}"#).unwrap();
        assert_eq!(plain.at, iso.at);
        assert_eq!(
            serde_json::to_string(&plain).unwrap(),
            r#"{"at":"2025-01-01 08:30:00"}"#
        );
        assert!(serde_json::from_str::<Stamped>(r#"{"at":"yesterday"}"#).is_err());
    }

    proptest! {
        #[test]
        fn non_positive_price_is_always_rejected(cents in i64::MIN / 2..=0i64) {
            let notification = Notification { price: Some(Decimal::new(cents, 2)), ..valid() };
            prop_assert_eq!(notification.validate(), Err(RejectReason::InvalidPrice));
        }

        #[test]
        fn negative_stock_is_always_rejected(stock in i32::MIN..0i32) {
            let notification = Notification { stock: Some(stock), ..valid() };
            prop_assert_eq!(notification.validate(), Err(RejectReason::InvalidStock));
        }

        #[test]
        fn any_positive_price_and_stock_pass(cents in 1i64..10_000_000, stock in 0i32..=i32::MAX) {
            let notification = Notification {
                price: Some(Decimal::new(cents, 2)),
                stock: Some(stock),
                ..valid()
            };
            prop_assert!(notification.is_valid());
        }
    }
}
