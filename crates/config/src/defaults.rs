//! Default values, chosen per host OS

use std::path::PathBuf;

/// Let's Encrypt production directory
pub const DEFAULT_ACME_SERVER: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Default renewal task name, also used as the crontab tag
pub const DEFAULT_TASK_NAME: &str = "autocert-renew";

/// Daily at 02:00
pub const DEFAULT_SCHEDULE: &str = "0 2 * * *";

/// Renew when fewer than this many days remain
pub const DEFAULT_RENEW_THRESHOLD_DAYS: i64 = 30;

/// Upper bound on a single CA exchange (DNS propagation can be slow)
pub const DEFAULT_CA_TIMEOUT_SECS: u64 = 3600;

pub const DEFAULT_KEY_SIZE: u32 = 2048;

/// RSA sizes the key generator accepts
pub const SUPPORTED_KEY_SIZES: [u32; 3] = [2048, 3072, 4096];

fn program_data() -> PathBuf {
    std::env::var_os("PROGRAMDATA")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(r"C:\ProgramData"))
        .join("AutoCert")
}

pub fn default_config_dir() -> PathBuf {
    if cfg!(windows) {
        program_data()
    } else {
        PathBuf::from("/etc/autocert")
    }
}

pub fn default_cert_dir() -> PathBuf {
    if cfg!(windows) {
        program_data().join("certs")
    } else {
        PathBuf::from("/etc/autocert/certs")
    }
}

pub fn default_log_dir() -> PathBuf {
    if cfg!(windows) {
        program_data().join("logs")
    } else {
        PathBuf::from("/var/log")
    }
}

pub fn default_webroot() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from(r"C:\inetpub\wwwroot")
    } else {
        PathBuf::from("/var/www/html")
    }
}

pub fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_acme_server() -> String {
    DEFAULT_ACME_SERVER.to_string()
}

pub fn default_key_type() -> String {
    "rsa".to_string()
}

pub fn default_key_size() -> u32 {
    DEFAULT_KEY_SIZE
}

pub fn default_ca_timeout_secs() -> u64 {
    DEFAULT_CA_TIMEOUT_SECS
}

pub fn default_task_name() -> String {
    DEFAULT_TASK_NAME.to_string()
}

pub fn default_schedule() -> String {
    DEFAULT_SCHEDULE.to_string()
}

pub fn default_threshold_days() -> i64 {
    DEFAULT_RENEW_THRESHOLD_DAYS
}
