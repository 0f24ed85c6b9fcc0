use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::{Row, SqlitePool};

use contacts_api::authz::{integrity, roles, Authorizer, SqlitePermissionStore};
use contacts_api::config::AuthzSettings;
use contacts_api::models::user::RegisterRequest;
use contacts_api::routes::users::insert_user;
use contacts_api::utils::utc_now;

#[derive(Parser, Debug)]
#[command(author, version, about = "contacts-api administration tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Create a user holding the Administrator role
    CreateAdmin {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long, default_value = "System")]
        first_name: String,
        #[arg(long, default_value = "Administrator")]
        last_name: String,
    },
    /// Report rows in the RBAC tables that point at missing records
    CheckIntegrity,
    /// List every policy the permission catalog currently defines
    Policies,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if dotenv().is_err() {
        let crate_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::MigrateRun => {
            let pool = get_pool().await?;
            contacts_api::db::migrate(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let pool = get_pool().await?;
            print_status(&pool).await?;
        }
        Commands::CreateAdmin {
            username,
            email,
            password,
            first_name,
            last_name,
        } => {
            let pool = contacts_api::db::init().await?;
            let request = RegisterRequest {
                first_name,
                last_name,
                username,
                email,
                mobile: None,
                password,
            };
            create_admin(&pool, &request).await?;
        }
        Commands::CheckIntegrity => {
            let pool = contacts_api::db::init().await?;
            let issues = integrity::find_orphans(&pool).await?;
            if issues.is_empty() {
                println!("No dangling references found");
            } else {
                println!("{:<18} {:<14} {:<38} {}", "Table", "Column", "Row", "Missing");
                for issue in &issues {
                    println!(
                        "{:<18} {:<14} {:<38} {}",
                        issue.table, issue.column, issue.row_key, issue.missing_id
                    );
                }
                anyhow::bail!("{} dangling reference(s) found", issues.len());
            }
        }
        Commands::Policies => {
            let pool = contacts_api::db::init().await?;
            let store = Arc::new(SqlitePermissionStore::new(pool));
            let authz = Authorizer::build(store, AuthzSettings::default()).await?;
            for name in authz.provider().catalog_policy_names().await {
                println!("{name}");
            }
        }
    }

    Ok(())
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    let options = database_url
        .parse::<sqlx::sqlite::SqliteConnectOptions>()
        .context("invalid DATABASE_URL")?
        .create_if_missing(true)
        .foreign_keys(true);

    sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .context("failed to connect to database")
}

async fn create_admin(pool: &SqlitePool, request: &RegisterRequest) -> anyhow::Result<()> {
    let user = insert_user(pool, request, None).await?;

    let role_id: uuid::Uuid = sqlx::query_scalar("SELECT id FROM roles WHERE name = ?")
        .bind(roles::ADMINISTRATOR)
        .fetch_optional(pool)
        .await?
        .context("Administrator role missing; run migrate-run first")?;

    sqlx::query("INSERT OR IGNORE INTO user_roles (user_id, role_id, created_on) VALUES (?, ?, ?)")
        .bind(user.id)
        .bind(role_id)
        .bind(utc_now())
        .execute(pool)
        .await?;

    println!("Created administrator {} ({})", user.username, user.id);
    Ok(())
}

async fn print_status(pool: &SqlitePool) -> anyhow::Result<()> {
    let migrator = sqlx::migrate!();

    let has_table: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'",
    )
    .fetch_one(pool)
    .await?;

    let applied_versions: HashSet<i64> = if has_table > 0 {
        let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?;
        rows.iter()
            .filter_map(|row| row.try_get::<i64, _>("version").ok())
            .collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in migrator.iter() {
        let status = if applied_versions.contains(&migration.version) {
            "applied"
        } else {
            "pending"
        };
        let desc = migration.description.trim();
        let name = if desc.is_empty() { "unknown" } else { desc };
        println!("{:<8} {:<20} {}", status, migration.version, name);
    }

    Ok(())
}
