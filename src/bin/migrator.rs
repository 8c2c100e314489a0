use anyhow::bail;
use dotenvy::dotenv;
use finance_bridge::{
    infrastructure::{config::Config, db},
    telemetry,
};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    telemetry::init();

    let config = Config::from_env()?;
    if config.database.url.trim().is_empty() {
        bail!("the reference cache migrations need FINBRIDGE__DATABASE__URL or DATABASE_URL");
    }

    let pool = db::connect(&config.database).await?;
    db::run_migrations(&pool).await?;

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM _sqlx_migrations WHERE success")
        .fetch_one(&pool)
        .await?;
    info!(applied, "reference cache migrations completed");

    Ok(())
}
