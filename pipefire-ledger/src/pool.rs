use sqlx::postgres::{PgPool, PgPoolOptions};

/// Builds the process-wide connection pool and runs pending migrations.
/// Called once at startup (spec.md §6); the resulting pool is shared by
/// every pipeline supervisor task, each of which opens its own
/// transactions against it.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}
