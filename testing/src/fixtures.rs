//! Builders for notifications used across tests.

use book_sync_core::notification::{BookCategory, Notification, NotificationType};
use chrono::NaiveDateTime;
use rust_decimal::Decimal;

/// Builds a fully populated [`Notification`] and lets tests override fields.
///
/// Defaults: title `"Test Book"`, author `"Test Author"`, price `29.99`,
/// stock `10`, category `FICTION`, no description, no timestamp.
#[derive(Clone, Debug)]
pub struct NotificationBuilder {
    notification: Notification,
}

impl NotificationBuilder {
    /// Start a valid notification of `kind` for `isbn`.
    #[must_use]
    pub fn new(kind: NotificationType, isbn: impl Into<String>) -> Self {
        Self {
            notification: Notification {
                isbn: Some(isbn.into()),
                title: Some("Test Book".to_string()),
                author: Some("Test Author".to_string()),
                description: None,
                price: Some(Decimal::new(2999, 2)),
                stock: Some(10),
                category: Some(BookCategory::Fiction),
                notification_type: Some(kind),
                timestamp: None,
            },
        }
    }

    /// `NEW_BOOK` for `isbn`.
    #[must_use]
    pub fn new_book(isbn: impl Into<String>) -> Self {
        Self::new(NotificationType::NewBook, isbn)
    }

    /// `STOCK_UPDATE` for `isbn`.
    #[must_use]
    pub fn stock_update(isbn: impl Into<String>) -> Self {
        Self::new(NotificationType::StockUpdate, isbn)
    }

    /// `BOOK_UPDATE` for `isbn`.
    #[must_use]
    pub fn book_update(isbn: impl Into<String>) -> Self {
        Self::new(NotificationType::BookUpdate, isbn)
    }

    /// Set the title.
    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.notification.title = Some(title.into());
        self
    }

    /// Set the author.
    #[must_use]
    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.notification.author = Some(author.into());
        self
    }

    /// Set the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.notification.description = Some(description.into());
        self
    }

    /// Set the price.
    #[must_use]
    pub const fn price(mut self, price: Decimal) -> Self {
        self.notification.price = Some(price);
        self
    }

    /// Set the stock. Negative values build an invalid notification.
    #[must_use]
    pub const fn stock(mut self, stock: i32) -> Self {
        self.notification.stock = Some(stock);
        self
    }

    /// Set the category.
    #[must_use]
    pub const fn category(mut self, category: BookCategory) -> Self {
        self.notification.category = Some(category);
        self
    }

    /// Set the timestamp.
    #[must_use]
    pub const fn timestamp(mut self, timestamp: NaiveDateTime) -> Self {
        self.notification.timestamp = Some(timestamp);
        self
    }

    /// Apply an arbitrary change, e.g. clearing a required field.
    #[must_use]
    pub fn with(mut self, change: impl FnOnce(&mut Notification)) -> Self {
        change(&mut self.notification);
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> Notification {
        self.notification
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(NotificationBuilder::new_book("978-1").build().is_valid());
        assert!(NotificationBuilder::stock_update("978-1").build().is_valid());
        assert!(NotificationBuilder::book_update("978-1").build().is_valid());
    }

    #[test]
    fn with_can_break_a_notification() {
        let notification = NotificationBuilder::new_book("978-1")
            .with(|n| n.title = None)
            .build();
        assert!(!notification.is_valid());
    }
}
