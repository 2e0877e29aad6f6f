//! Outbound notifications: transactional email and class reminders.
//!
//! In-app notifications are plain rows (see `db::Notification`); this module
//! covers what leaves the process.

pub mod email;
pub mod reminders;

pub use email::{EmailContent, Mailer, ReminderDetails};
pub use reminders::ReminderService;
