use sqlx::Row;

fn database_url() -> Option<String> {
    std::env::var("GRADER_TEST_DATABASE_URL").ok().filter(|url| !url.trim().is_empty())
}

#[tokio::test]
async fn migrations_apply_and_tables_exist() -> anyhow::Result<()> {
    let Some(database_url) = database_url() else {
        eprintln!("GRADER_TEST_DATABASE_URL is not set; skipping migrations smoke test");
        return Ok(());
    };

    let pool =
        sqlx::postgres::PgPoolOptions::new().max_connections(1).connect(&database_url).await?;

    let migrations_dir =
        std::env::var("GRADER_MIGRATIONS_DIR").unwrap_or_else(|_| "migrations".to_string());
    let migrator = sqlx::migrate::Migrator::new(std::path::Path::new(&migrations_dir)).await?;
    migrator.run(&pool).await?;

    for table in ["submissions", "submission_images", "system_config"] {
        let row = sqlx::query("SELECT to_regclass($1) IS NOT NULL AS present")
            .bind(format!("public.{table}"))
            .fetch_one(&pool)
            .await?;
        let present: bool = row.try_get("present")?;
        assert!(present, "table {table} should exist after migrations");
    }

    Ok(())
}

#[tokio::test]
async fn done_submission_requires_result() -> anyhow::Result<()> {
    let Some(database_url) = database_url() else {
        return Ok(());
    };

    let pool =
        sqlx::postgres::PgPoolOptions::new().max_connections(1).connect(&database_url).await?;
    let migrator = sqlx::migrate::Migrator::new(std::path::Path::new("migrations")).await?;
    migrator.run(&pool).await?;

    let id = format!("smoke-{}", uuid::Uuid::new_v4());
    let inserted = sqlx::query(
        "INSERT INTO submissions (id, homework_id, student_id, status, created_at, updated_at)
         VALUES ($1, 'hw', 'student', 'DONE', now(), now())",
    )
    .bind(&id)
    .execute(&pool)
    .await;

    assert!(inserted.is_err(), "DONE without grading_json must violate the check constraint");

    Ok(())
}
