use std::path::PathBuf;

use crate::errors::AppError;
use crate::jwt::JwtConfig;

const DEFAULT_PORT: u16 = 8000;

/// Runtime settings read from the process environment (after `.env` loading).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub jwt: JwtConfig,
    pub authz: AuthzSettings,
    pub tls: Option<TlsPaths>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let port = match std::env::var("APP_PORT") {
            Ok(val) => val
                .parse::<u16>()
                .map_err(|_| AppError::configuration("APP_PORT must be a valid port number"))?,
            Err(_) => DEFAULT_PORT,
        };

        Ok(Self {
            port,
            jwt: JwtConfig::from_env()?,
            authz: AuthzSettings::from_env()?,
            tls: TlsPaths::from_env()?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthzSettings {
    /// Cache resolved permission sets per role set. Off unless `PERMISSION_CACHE=on`.
    pub permission_cache: bool,
}

impl AuthzSettings {
    pub fn from_env() -> Result<Self, AppError> {
        let permission_cache = match std::env::var("PERMISSION_CACHE")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "" | "off" | "false" | "0" => false,
            "on" | "true" | "1" => true,
            other => {
                return Err(AppError::configuration(format!(
                    "PERMISSION_CACHE must be on or off, got {other}"
                )))
            }
        };

        Ok(Self { permission_cache })
    }
}

#[derive(Debug, Clone)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl TlsPaths {
    fn from_env() -> Result<Option<Self>, AppError> {
        let cert = std::env::var("TLS_CERT_PATH").ok();
        let key = std::env::var("TLS_KEY_PATH").ok();

        match (cert, key) {
            (Some(cert), Some(key)) => Ok(Some(Self {
                cert: PathBuf::from(cert),
                key: PathBuf::from(key),
            })),
            (None, None) => Ok(None),
            _ => Err(AppError::configuration(
                "TLS_CERT_PATH and TLS_KEY_PATH must be set together",
            )),
        }
    }
}
