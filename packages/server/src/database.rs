use std::time::Duration;

use sea_orm::sea_query::{Index, PostgresQueryBuilder, SchemaStatementBuilder, SqliteQueryBuilder};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, DbErr, EntityTrait,
    Schema,
};
use tracing::info;

use crate::entity::{document, user};

pub async fn init_db(db_url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(db_url.to_owned());

    if is_sqlite_memory(db_url) {
        // Every pooled connection would otherwise open its own empty database.
        opt.max_connections(1).min_connections(1);
    } else {
        opt.max_connections(100)
            .min_connections(5)
            .connect_timeout(Duration::from_secs(8))
            .acquire_timeout(Duration::from_secs(8))
            .idle_timeout(Duration::from_secs(8))
            .max_lifetime(Duration::from_secs(8));
    }
    opt.sqlx_logging(false);

    let db = Database::connect(opt).await?;
    create_schema(&db).await?;
    ensure_indexes(&db).await;

    Ok(db)
}

fn is_sqlite_memory(db_url: &str) -> bool {
    db_url.starts_with("sqlite::memory:") || db_url.contains("mode=memory")
}

/// Create tables from the entity definitions if they do not exist yet.
///
/// `user` goes first: `document.owner_id` references it.
pub async fn create_schema<C: ConnectionTrait>(db: &C) -> Result<(), DbErr> {
    create_table(db, user::Entity).await?;
    create_table(db, document::Entity).await?;
    Ok(())
}

async fn create_table<C, E>(db: &C, entity: E) -> Result<(), DbErr>
where
    C: ConnectionTrait,
    E: EntityTrait,
{
    let backend = db.get_database_backend();
    let mut stmt = Schema::new(backend).create_table_from_entity(entity);
    stmt.if_not_exists();

    db.execute_unprepared(&render(backend, &stmt)).await?;
    Ok(())
}

// Only the Postgres and SQLite drivers are compiled in.
fn render<S: SchemaStatementBuilder>(backend: DbBackend, stmt: &S) -> String {
    match backend {
        DbBackend::Postgres => stmt.to_string(PostgresQueryBuilder),
        _ => stmt.to_string(SqliteQueryBuilder),
    }
}

/// Create secondary indexes not expressible via entity attributes.
pub async fn ensure_indexes<C: ConnectionTrait>(db: &C) {
    // Owner listing ordered by creation time:
    // SELECT * FROM document WHERE owner_id = ? ORDER BY created_at
    let stmt = Index::create()
        .if_not_exists()
        .name("idx_document_owner_created")
        .table(document::Entity)
        .col(document::Column::OwnerId)
        .col(document::Column::CreatedAt)
        .to_owned();

    let sql = render(db.get_database_backend(), &stmt);

    match db.execute_unprepared(&sql).await {
        Ok(_) => info!("Ensured index idx_document_owner_created exists"),
        Err(e) => tracing::warn!("Failed to create index idx_document_owner_created: {}", e),
    }
}
