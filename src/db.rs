use sqlx::{postgres::PgPoolOptions, PgPool};

pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str, run_migrations: bool) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;

        if run_migrations {
            sqlx::migrate!("./migrations").run(&pool).await?;
            tracing::info!("Database migrations applied");
        }

        Ok(Self { pool })
    }
}
