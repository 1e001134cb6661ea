use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use helpdesk_access::authz::RoleTier;
use helpdesk_access::models::user::NewUser;
use helpdesk_access::seed;

#[derive(Parser, Debug)]
#[command(author, version, about = "helpdesk-access operator tool", long_about = None)]
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
    /// Insert the built-in permissions and system roles
    Seed,
    /// Create an organization
    CreateOrg { name: String },
    /// Create a department inside an organization
    CreateDepartment {
        #[arg(long)]
        organization_id: Uuid,
        name: String,
    },
    /// Create a user and assign the system role of its tier
    CreateUser {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long, value_parser = parse_role)]
        role: RoleTier,
        #[arg(long)]
        organization_id: Option<Uuid>,
        #[arg(long)]
        department_id: Option<Uuid>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Fall back to the crate-local `.env` when run from elsewhere.
    if dotenv().is_err() {
        let crate_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }

    let cli = Cli::parse();
    let pool = get_pool().await?;

    match cli.command {
        Commands::MigrateRun => {
            let migrator = get_migrator().await?;
            migrator.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let migrator = get_migrator().await?;
            print_status(&pool, &migrator).await?;
        }
        Commands::Seed => {
            let summary = seed::seed_rbac(&pool).await?;
            println!(
                "Seeded {} permissions, {} roles, {} role-permission links",
                summary.permissions_created, summary.roles_created, summary.links_created
            );
        }
        Commands::CreateOrg { name } => {
            let organization = seed::create_organization(&pool, &name).await?;
            println!("{}\t{}", organization.id, organization.name);
        }
        Commands::CreateDepartment { organization_id, name } => {
            let department = seed::create_department(&pool, organization_id, &name).await?;
            println!("{}\t{}", department.id, department.name);
        }
        Commands::CreateUser {
            name,
            email,
            password,
            role,
            organization_id,
            department_id,
        } => {
            let user = seed::create_user(
                &pool,
                NewUser {
                    name,
                    email,
                    password,
                    role,
                    organization_id,
                    department_id,
                },
            )
            .await?;
            println!("{}\t{}\t{}", user.id, user.email, user.role);
        }
    }

    Ok(())
}

fn parse_role(value: &str) -> Result<RoleTier, String> {
    value.parse::<RoleTier>().map_err(|_| {
        let known: Vec<&str> = RoleTier::ALL.iter().map(RoleTier::as_str).collect();
        format!("unknown role '{value}', expected one of: {}", known.join(", "))
    })
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    let options = database_url
        .parse::<SqliteConnectOptions>()
        .context("invalid DATABASE_URL")?
        .create_if_missing(true)
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .context("failed to connect to database")
}

async fn print_status(pool: &SqlitePool, migrator: &sqlx::migrate::Migrator) -> anyhow::Result<()> {
    // If the migrations table doesn't exist, nothing is applied yet
    let tracked: Option<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'")
            .fetch_optional(pool)
            .await?;

    let applied_versions: HashSet<i64> = if tracked.is_some() {
        let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?;
        rows.iter().filter_map(|row| row.try_get::<i64, _>("version").ok()).collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} Name", "Status", "Version");
    for migration in migrator.iter() {
        let status = if applied_versions.contains(&migration.version) { "applied" } else { "pending" };
        let desc = migration.description.trim();
        let name = if desc.is_empty() { "unknown" } else { desc };
        println!("{:<8} {:<20} {}", status, migration.version, name);
    }

    Ok(())
}

async fn get_migrator() -> anyhow::Result<sqlx::migrate::Migrator> {
    // ./migrations when run from the repo root, the crate's own otherwise
    let local = Path::new("./migrations");
    let migrator_path = if local.exists() {
        local.to_path_buf()
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
    };

    let display = migrator_path.display().to_string();
    sqlx::migrate::Migrator::new(migrator_path)
        .await
        .with_context(|| format!("failed to load migrations from {display}"))
}
