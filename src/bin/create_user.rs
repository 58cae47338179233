//! Creates an account. This is the only way to add users; the public API
//! refuses `POST /users/`.
//!
//! Usage:
//!   cargo run --bin create_user -- --username alice --password 's3cret'
//!
//! Reads `DATABASE_URL` and `PASSWORD_ITERATIONS` from the environment or `.env`.

use std::env;

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hydroponics_service::{
    api::dto::is_valid_username,
    auth::hash_password,
    config::{Config, StorageBackend},
    db::{
        self,
        models::{NewUser, USERNAME_MAX_LEN},
    },
    store::{PgStore, Store, StoreError},
};

fn arg(args: &[String], flag: &str) -> Option<String> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].clone())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    let username = arg(&args, "--username").context("missing --username <name>")?;
    let password = arg(&args, "--password").context("missing --password <password>")?;

    let username = username.trim().to_owned();
    if username.chars().count() > USERNAME_MAX_LEN || !is_valid_username(&username) {
        bail!(
            "username must be 1-{USERNAME_MAX_LEN} letters, digits or @/./+/-/_ characters"
        );
    }
    if password.is_empty() {
        bail!("password must not be empty");
    }

    let config = Config::from_env()?;
    if config.storage_backend != StorageBackend::Postgres {
        bail!("create_user needs STORAGE_BACKEND=postgres; the memory backend is per-process");
    }
    let url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL is required")?;

    let pool = db::create_pool(url).await?;
    db::run_migrations(&pool).await?;
    let store = PgStore::new(pool);

    let password_hash = hash_password(&password, config.password_iterations)?;
    let user = match store
        .create_user(NewUser {
            username: username.clone(),
            password_hash,
        })
        .await
    {
        Ok(user) => user,
        Err(StoreError::Conflict { .. }) => bail!("a user named {username:?} already exists"),
        Err(e) => return Err(e).context("failed to create user"),
    };

    info!(user_id = user.id, username = %user.username, "User created");
    Ok(())
}
