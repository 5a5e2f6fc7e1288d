use super::http::{HttpConfig, Network};
use super::telemetry::{LogFormat, Metadata, TelemetryConfig};
use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use std::path::PathBuf;
use tasker_core::store::DatabaseConfig;

/// Runtime configuration for the `tasker-server` binary.
///
/// Every setting can be given as a flag or through the environment (a `.env`
/// file in the working directory is loaded first). Invalid values are rejected
/// before the server is built.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "tasker-server",
    version,
    about = "An HTTP/JSON RPC service for tasks"
)]
pub struct CliArgs {
    /// Network family to listen on: `tcp`, `tcp4`, `tcp6` or `unix`.
    ///
    /// Environment variable: `HTTP_NETWORK`
    #[arg(long, env = "HTTP_NETWORK", default_value_t = String::from("tcp"))]
    pub http_network: String,

    /// Address to listen on: `host:port` for TCP, a socket path for `unix`.
    ///
    /// Use port `0` to let the system pick a free port.
    ///
    /// Environment variable: `HTTP_ADDRESS`
    #[arg(long, env = "HTTP_ADDRESS", default_value_t = String::from("127.0.0.1:8080"))]
    pub http_address: String,

    /// Seconds in-flight requests may keep running after a shutdown signal
    /// before their connections are dropped.
    ///
    /// Environment variable: `SHUTDOWN_GRACE_PERIOD`
    #[arg(long, env = "SHUTDOWN_GRACE_PERIOD", default_value_t = 10)]
    pub shutdown_grace_period: u64,

    /// SQLite database file, created if missing. `:memory:` keeps tasks in
    /// memory for the lifetime of the process.
    ///
    /// Environment variable: `DATABASE_FILENAME`
    #[arg(long, env = "DATABASE_FILENAME", default_value_t = String::from("./data/data.db"))]
    pub database_filename: String,

    /// Directory of SQL migrations applied at startup. Empty skips
    /// migrations.
    ///
    /// Environment variable: `DATABASE_SCHEMA_DIRECTORY`
    #[arg(long, env = "DATABASE_SCHEMA_DIRECTORY", default_value_t = String::from("./schema"))]
    pub database_schema_directory: String,

    /// Maximum number of pooled database connections.
    ///
    /// Environment variable: `DATABASE_MAX_CONNECTIONS`
    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value_t = 4)]
    pub database_max_connections: u32,

    /// Log output: `pretty` for humans, `json` for log collectors.
    ///
    /// The level is taken from `RUST_LOG` and defaults to `info`.
    ///
    /// Environment variable: `LOG_FORMAT`
    #[arg(long, env = "LOG_FORMAT", default_value_t = String::from("pretty"))]
    pub log_format: String,

    /// Service name recorded on every log line.
    ///
    /// Environment variable: `K_SERVICE`
    #[arg(long, env = "K_SERVICE", default_value_t = String::from("tasker-server"))]
    pub service_name: String,

    /// Service version recorded on every log line.
    ///
    /// Environment variable: `SERVICE_VERSION`
    #[arg(long, env = "SERVICE_VERSION", default_value_t = String::from(env!("CARGO_PKG_VERSION")))]
    pub service_version: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http: HttpConfig,
    pub database: DatabaseConfig,
    pub telemetry: TelemetryConfig,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        args.http_network.parse::<Network>()?;

        if args.http_address.is_empty() {
            bail!("HTTP_ADDRESS must not be empty");
        }

        if args.database_filename.is_empty() {
            bail!("DATABASE_FILENAME must not be empty");
        }
        if args.database_max_connections == 0 {
            bail!("DATABASE_MAX_CONNECTIONS must be at least 1");
        }

        let format = match args.log_format.to_ascii_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "json" => LogFormat::Json,
            other => bail!("LOG_FORMAT must be `pretty` or `json`, got {other:?}"),
        };

        if args.service_name.is_empty() {
            bail!("K_SERVICE must not be empty");
        }

        Ok(Self {
            http: HttpConfig {
                network: args.http_network,
                address: args.http_address,
                grace_period: Duration::from_secs(args.shutdown_grace_period),
            },
            database: DatabaseConfig {
                filename: args.database_filename,
                schema_directory: Some(args.database_schema_directory)
                    .filter(|dir| !dir.is_empty())
                    .map(PathBuf::from),
                max_connections: args.database_max_connections,
            },
            telemetry: TelemetryConfig {
                format,
                metadata: Metadata {
                    service: args.service_name,
                    version: args.service_version,
                },
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<ServerConfig> {
        let args = CliArgs::try_parse_from(["tasker-server"].iter().chain(args))?;
        ServerConfig::try_from(args)
    }

    #[test]
    fn flags_override_defaults() {
        let config = parse(&[
            "--http-network",
            "unix",
            "--http-address",
            "/tmp/tasker.sock",
            "--shutdown-grace-period",
            "3",
            "--log-format",
            "JSON",
            "--service-name",
            "tasks",
            "--database-filename",
            "/var/lib/tasker/tasks.db",
            "--database-schema-directory",
            "",
            "--database-max-connections",
            "8",
        ])
        .unwrap();

        assert_eq!(config.http.network, "unix");
        assert_eq!(config.http.address, "/tmp/tasker.sock");
        assert_eq!(config.http.grace_period, Duration::from_secs(3));
        assert_eq!(config.telemetry.format, LogFormat::Json);
        assert_eq!(config.telemetry.metadata.service, "tasks");
        assert_eq!(config.database.filename, "/var/lib/tasker/tasks.db");
        assert_eq!(config.database.schema_directory, None);
        assert_eq!(config.database.max_connections, 8);
    }

    #[test]
    fn database_defaults() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.database, DatabaseConfig::default());
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(parse(&["--http-network", "udp"]).is_err());
        assert!(parse(&["--http-address", ""]).is_err());
        assert!(parse(&["--log-format", "xml"]).is_err());
        assert!(parse(&["--shutdown-grace-period", "-1"]).is_err());
        assert!(parse(&["--database-filename", ""]).is_err());
        assert!(parse(&["--database-max-connections", "0"]).is_err());
    }
}
