//! Notification relay for job outcomes.
//!
//! This crate provides:
//! - `Notifier` trait for push channels, implemented by [`SubscriberHub`]
//! - `Dispatcher` that fans events out to channels and suppresses duplicates
//! - `NotificationHandler` consuming the notification queue
//! - `StatusService` for clients that poll instead of subscribing

pub mod dispatcher;
pub mod handler;
pub mod hub;
pub mod status;
pub mod traits;

pub use dispatcher::{DispatchOutcome, DispatchResult, Dispatcher};
pub use handler::NotificationHandler;
pub use hub::SubscriberHub;
pub use status::StatusService;
pub use traits::{JobEvent, Notifier, NotifyError};
