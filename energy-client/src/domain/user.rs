#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub fcm_token: Option<String>,
    /// Instantaneous power above which the user wants an alert.
    pub power_limit_w: Option<f64>,
}
