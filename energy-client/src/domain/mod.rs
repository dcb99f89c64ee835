pub mod bill;
pub mod reading_log;
pub mod user;

pub use bill::{Bill, NewBill, SlabCharge};
pub use reading_log::ReadingLog;
pub use user::User;
