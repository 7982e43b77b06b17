use std::{env, path::PathBuf};

use anyhow::{Context, Result, anyhow};

use crate::path_guard::AllowedExtensions;

const DEFAULT_STATIC_EXTENSIONS: &str =
    "html,css,js,mjs,json,svg,png,jpg,jpeg,gif,webp,ico,txt,xml,webmanifest,woff,woff2";
const DEFAULT_DATA_EXTENSIONS: &str = "json,csv,txt,md,png,jpg,jpeg,gif,webp,pdf";

/// Outgoing mail settings. Present only when both a relay host and a
/// recipient are configured.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub from: String,
    pub to: String,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub http_bind_addr: String,
    pub site_root: PathBuf,
    pub data_dir: PathBuf,
    pub leads_dir: PathBuf,
    pub site_config_file: PathBuf,
    pub service_name: String,
    pub static_extensions: AllowedExtensions,
    pub data_extensions: AllowedExtensions,
    pub admin_user: String,
    pub admin_password: Option<String>,
    pub cors_origins: Vec<String>,
    pub lead_webhook_url: Option<String>,
    pub smtp: Option<SmtpConfig>,
    pub max_path_length: usize,
    pub max_file_size_bytes: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let optional = |key: &str| {
            lookup(key).and_then(|v| {
                let trimmed = v.trim().to_string();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed)
                }
            })
        };

        let port = optional("PORT")
            .as_deref()
            .unwrap_or("5000")
            .parse::<u16>()
            .context("PORT must be a port number")?;
        let path_or = |key: &str, default: &str| {
            PathBuf::from(optional(key).unwrap_or_else(|| default.to_string()))
        };

        let http_bind_addr =
            optional("HTTP_BIND_ADDR").unwrap_or_else(|| format!("0.0.0.0:{port}"));
        let site_root = path_or("SITE_ROOT", "public");
        let data_dir = path_or("DATA_DIR", "data");
        let leads_dir = path_or("LEADS_DIR", "var/leads");
        let site_config_file = path_or("SITE_CONFIG_FILE", "site.config.json");
        let service_name = optional("SERVICE_NAME").unwrap_or_else(|| "folio-site".to_string());
        let static_extensions = AllowedExtensions::parse(
            optional("STATIC_ALLOWED_EXTENSIONS")
                .as_deref()
                .unwrap_or(DEFAULT_STATIC_EXTENSIONS),
        );
        let data_extensions = AllowedExtensions::parse(
            optional("DATA_ALLOWED_EXTENSIONS")
                .as_deref()
                .unwrap_or(DEFAULT_DATA_EXTENSIONS),
        );
        let admin_user = optional("ADMIN_USER").unwrap_or_else(|| "admin".to_string());
        let admin_password = optional("ADMIN_PASSWORD");
        let cors_origins = optional("CORS_ORIGIN")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let lead_webhook_url = optional("LEAD_WEBHOOK_URL");
        let smtp = match (optional("SMTP_HOST"), optional("SMTP_TO")) {
            (Some(host), Some(to)) => {
                let port = optional("SMTP_PORT")
                    .as_deref()
                    .unwrap_or("587")
                    .parse::<u16>()
                    .context("SMTP_PORT must be a port number")?;
                Some(SmtpConfig {
                    host,
                    port,
                    user: optional("SMTP_USER"),
                    password: optional("SMTP_PASS"),
                    from: optional("SMTP_FROM").unwrap_or_else(|| to.clone()),
                    to,
                })
            }
            _ => None,
        };
        let max_path_length = optional("MAX_PATH_LENGTH")
            .as_deref()
            .unwrap_or("512")
            .parse::<usize>()
            .context("MAX_PATH_LENGTH must be an integer")?;
        let max_file_size_bytes = optional("MAX_FILE_SIZE_BYTES")
            .as_deref()
            .unwrap_or("10485760")
            .parse::<u64>()
            .context("MAX_FILE_SIZE_BYTES must be an integer")?;

        if port == 0 {
            return Err(anyhow!("PORT must be > 0"));
        }
        if max_path_length == 0 {
            return Err(anyhow!("MAX_PATH_LENGTH must be > 0"));
        }
        if max_file_size_bytes == 0 {
            return Err(anyhow!("MAX_FILE_SIZE_BYTES must be > 0"));
        }
        if static_extensions.is_empty() || data_extensions.is_empty() {
            return Err(anyhow!("extension allow-lists must not be empty"));
        }

        Ok(Self {
            http_bind_addr,
            site_root,
            data_dir,
            leads_dir,
            site_config_file,
            service_name,
            static_extensions,
            data_extensions,
            admin_user,
            admin_password,
            cors_origins,
            lead_webhook_url,
            smtp,
            max_path_length,
            max_file_size_bytes,
        })
    }
}
