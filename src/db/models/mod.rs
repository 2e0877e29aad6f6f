//! Database models split into domain-specific modules.

pub mod class_session;
pub mod coupon;
pub mod credit;
pub mod invoice;
pub mod notification;
pub mod package;
pub mod password_reset;
pub mod profile;
pub mod review;
pub mod settlement;

pub use class_session::*;
pub use coupon::*;
pub use credit::*;
pub use invoice::*;
pub use notification::*;
pub use package::*;
pub use password_reset::*;
pub use profile::*;
pub use review::*;
pub use settlement::*;

/// Current UTC time in the RFC 3339 form stored in every timestamp column
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
