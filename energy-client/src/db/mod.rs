pub mod bill_queries;
pub mod reading_log_queries;
pub mod user_queries;
