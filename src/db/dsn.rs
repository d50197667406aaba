//! Connection string assembly.
//!
//! Two renditions of the same configuration are produced here: the
//! go-sql-driver style DSN string (`user:pass@tcp(host:port)/schema?...`),
//! which is what gets logged and compared across deployments, and the
//! `MySqlConnectOptions` that sqlx actually connects with.

use crate::config::{ClientConfig, DriverOptions};
use crate::duration::format_duration;
use sqlx::mysql::{MySqlConnectOptions, MySqlSslMode};
use std::collections::BTreeMap;

/// Driver parameters as `(name, value)` pairs, sorted by name.
pub fn driver_params(driver: &DriverOptions) -> BTreeMap<&'static str, String> {
    let mut params = BTreeMap::new();
    params.insert("allowAllFiles", driver.allow_all_files.to_string());
    params.insert(
        "allowCleartextPasswords",
        driver.allow_cleartext_passwords.to_string(),
    );
    params.insert(
        "allowNativePasswords",
        driver.allow_native_passwords.to_string(),
    );
    params.insert("allowOldPasswords", driver.allow_old_passwords.to_string());
    params.insert("charset", driver.charset.clone());
    params.insert("collation", driver.collation.clone());
    params.insert("clientFoundRows", driver.client_found_rows.to_string());
    params.insert("columnsWithAlias", driver.columns_with_alias.to_string());
    params.insert("interpolateParams", driver.interpolate_params.to_string());
    params.insert("loc", driver.loc.clone());
    params.insert("maxAllowedPacket", driver.max_allowed_packet.to_string());
    params.insert("multiStatements", driver.multi_statements.to_string());
    params.insert("parseTime", driver.parse_time.to_string());
    params.insert("readTimeout", format_duration(driver.read_timeout));
    params.insert("rejectReadOnly", driver.reject_read_only.to_string());
    if let Some(key) = &driver.server_pub_key {
        params.insert("serverPubKey", key.clone());
    }
    params.insert("timeout", format_duration(driver.timeout));
    params.insert("tls", driver.tls.to_string());
    params.insert("writeTimeout", format_duration(driver.write_timeout));
    params
}

fn encode_params(driver: &DriverOptions) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in driver_params(driver) {
        serializer.append_pair(key, &value);
    }
    serializer.finish()
}

/// Build the DSN string for a configuration.
pub fn build_dsn(config: &ClientConfig) -> String {
    format_dsn(config, &config.password)
}

/// The DSN with the password masked, safe to log.
pub fn redacted_dsn(config: &ClientConfig) -> String {
    format_dsn(config, "***")
}

fn format_dsn(config: &ClientConfig, password: &str) -> String {
    format!(
        "{}:{}@tcp({}:{})/{}?{}",
        config.user_name,
        password,
        config.host,
        config.port,
        config.schema,
        encode_params(&config.driver)
    )
}

/// Connect options for sqlx.
///
/// Flags sqlx has no counterpart for (`allowAllFiles`, `interpolateParams`,
/// `rejectReadOnly`, ...) only appear in the DSN string. Statement read and
/// write timeouts are enforced by the executor.
pub fn connect_options(config: &ClientConfig) -> MySqlConnectOptions {
    let driver = &config.driver;
    // charset accepts a comma separated preference list; the first entry wins.
    let charset = driver
        .charset
        .split(',')
        .map(str::trim)
        .find(|c| !c.is_empty())
        .unwrap_or(crate::config::DEFAULT_CHARSET);

    let mut options = MySqlConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user_name)
        .charset(charset)
        .collation(&driver.collation)
        .ssl_mode(if driver.tls {
            MySqlSslMode::Required
        } else {
            MySqlSslMode::Disabled
        });

    if !config.password.is_empty() {
        options = options.password(&config.password);
    }
    if !config.schema.is_empty() {
        options = options.database(&config.schema);
    }
    options
}
