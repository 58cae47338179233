use std::str::FromStr;

use anyhow::{Context, Result};

// ---------------------------------------------------------------------------
// StorageBackend
// ---------------------------------------------------------------------------

/// Which implementation of the storage port the service runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "postgres" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(anyhow::anyhow!("unknown storage backend: {other:?}")),
        }
    }
}

// ---------------------------------------------------------------------------
// ReadingWritePolicy
// ---------------------------------------------------------------------------

/// Who may modify or delete an existing sensor reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadingWritePolicy {
    /// Only the owner of the reading's parent system.
    #[default]
    Owner,
    /// Any authenticated caller.
    Authenticated,
}

impl FromStr for ReadingWritePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "owner" => Ok(Self::Owner),
            "authenticated" => Ok(Self::Authenticated),
            other => Err(anyhow::anyhow!("unknown reading write policy: {other:?}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub storage_backend: StorageBackend,
    /// Only required for the Postgres backend.
    pub database_url: Option<String>,
    pub server_host: String,
    pub server_port: u16,
    /// Absolute prefix for hyperlinks, e.g. `https://api.example.com`.
    /// Falls back to the request `Host` header when unset.
    pub public_base_url: Option<String>,
    /// Host names accepted in the `Host` header when `public_base_url` is
    /// unset. `.example.com` also matches subdomains, `*` matches anything.
    pub allowed_hosts: Vec<String>,
    pub page_size: u64,
    pub admin_url: String,
    pub reading_write_policy: ReadingWritePolicy,
    pub password_iterations: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let storage_backend = optional("STORAGE_BACKEND", "postgres")
            .parse::<StorageBackend>()
            .context("STORAGE_BACKEND must be 'postgres' or 'memory'")?;

        let database_url = match storage_backend {
            StorageBackend::Postgres => Some(required("DATABASE_URL")?),
            StorageBackend::Memory => std::env::var("DATABASE_URL").ok(),
        };

        Ok(Self {
            storage_backend,
            database_url,
            server_host: optional("SERVER_HOST", "0.0.0.0"),
            server_port: optional("SERVER_PORT", "8080")
                .parse()
                .context("SERVER_PORT must be a valid port number")?,
            public_base_url: std::env::var("PUBLIC_BASE_URL")
                .ok()
                .map(|s| s.trim_end_matches('/').to_owned())
                .filter(|s| !s.is_empty()),
            allowed_hosts: parse_allowed_hosts(&optional(
                "ALLOWED_HOSTS",
                DEFAULT_ALLOWED_HOSTS,
            )),
            page_size: parse_page_size(&optional("PAGE_SIZE", "10"))?,
            admin_url: optional("ADMIN_URL", "/admin/"),
            reading_write_policy: optional("READING_WRITE_POLICY", "owner")
                .parse()
                .context("READING_WRITE_POLICY must be 'owner' or 'authenticated'")?,
            password_iterations: parse_iterations(&optional("PASSWORD_ITERATIONS", "100000"))?,
        })
    }
}

pub const DEFAULT_ALLOWED_HOSTS: &str = "localhost,127.0.0.1,[::1]";

pub fn parse_allowed_hosts(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|h| h.trim().to_ascii_lowercase())
        .filter(|h| !h.is_empty())
        .collect()
}

fn parse_page_size(raw: &str) -> Result<u64> {
    let size: u64 = raw
        .trim()
        .parse()
        .with_context(|| format!("PAGE_SIZE must be a positive integer, got: {raw:?}"))?;
    anyhow::ensure!(size > 0, "PAGE_SIZE must be a positive integer, got: {raw:?}");
    Ok(size)
}

fn parse_iterations(raw: &str) -> Result<u32> {
    let iterations: u32 = raw
        .trim()
        .parse()
        .with_context(|| format!("PASSWORD_ITERATIONS must be a positive integer, got: {raw:?}"))?;
    anyhow::ensure!(
        iterations > 0,
        "PASSWORD_ITERATIONS must be a positive integer, got: {raw:?}"
    );
    Ok(iterations)
}

fn required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("missing required env var: {key}"))
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}
