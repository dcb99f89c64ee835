use anyhow::Result;
use sqlx::PgPool;

use crate::domain::User;

pub async fn find_user_by_id(pool: &PgPool, user_id: i64) -> Result<Option<User>> {
    let row = sqlx::query_as::<_, User>(
        r#"
        SELECT id, username, email, fcm_token, power_limit_w
        FROM users
        WHERE id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

pub async fn find_user_by_email(pool: &PgPool, email: &str) -> Result<Option<User>> {
    let row = sqlx::query_as::<_, User>(
        r#"
        SELECT id, username, email, fcm_token, power_limit_w
        FROM users
        WHERE email = $1
        "#,
    )
    .bind(email)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}
