//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Edge gateway - mutual TLS client identity authentication for devices and modules
#[derive(Parser, Debug)]
#[command(name = "edge-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "EDGE_GATEWAY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "EDGE_GATEWAY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "EDGE_GATEWAY_HOST")]
    pub host: Option<String>,

    /// Hub name client certificates are checked against
    #[arg(long, env = "EDGE_GATEWAY_HUB_NAME", global = true)]
    pub hub_name: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "EDGE_GATEWAY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "EDGE_GATEWAY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gateway server (default)
    Serve,

    /// Certificate tooling
    #[command(subcommand)]
    Tls(TlsCommand),
}

/// Certificate subcommands
#[derive(Subcommand, Debug)]
pub enum TlsCommand {
    /// Generate a self-signed root CA (`ca.crt` / `ca.key`)
    InitCa {
        /// CA common name
        #[arg(long, default_value = "Edge Gateway Root CA")]
        cn: String,

        /// Output directory
        #[arg(short, long, default_value = "tls")]
        out_dir: PathBuf,

        /// Validity in days
        #[arg(long, default_value_t = 3650)]
        days: u32,
    },

    /// Issue the gateway's server certificate
    IssueServer {
        /// CA certificate (PEM)
        #[arg(long, default_value = "tls/ca.crt")]
        ca_cert: PathBuf,

        /// CA private key (PEM)
        #[arg(long, default_value = "tls/ca.key")]
        ca_key: PathBuf,

        /// Server common name
        #[arg(long, default_value = "localhost")]
        cn: String,

        /// DNS subject alternative names
        #[arg(long = "san-dns", default_value = "localhost")]
        san_dns: Vec<String>,

        /// Output directory
        #[arg(short, long, default_value = "tls")]
        out_dir: PathBuf,

        /// File stem for `<name>.crt` / `<name>.key`
        #[arg(long, default_value = "server")]
        name: String,

        /// Validity in days
        #[arg(long, default_value_t = 365)]
        days: u32,
    },

    /// Issue a device or module client certificate
    IssueDevice {
        /// CA certificate (PEM)
        #[arg(long, default_value = "tls/ca.crt")]
        ca_cert: PathBuf,

        /// CA private key (PEM)
        #[arg(long, default_value = "tls/ca.key")]
        ca_key: PathBuf,

        /// Device id (subject CN)
        #[arg(long, required = true)]
        device_id: String,

        /// Module id (subject OU)
        #[arg(long)]
        module_id: Option<String>,

        /// Output directory
        #[arg(short, long, default_value = "tls")]
        out_dir: PathBuf,

        /// File stem; defaults to the device (and module) id
        #[arg(long)]
        name: Option<String>,

        /// Validity in days
        #[arg(long, default_value_t = 365)]
        days: u32,
    },

    /// Print the SHA-256 thumbprint of every certificate in a PEM file
    Thumbprint {
        /// Certificate file (PEM)
        #[arg(required = true)]
        file: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_no_subcommand() {
        let cli = Cli::try_parse_from(["edge-gateway"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn parses_issue_device_with_global_hub_name() {
        let cli = Cli::try_parse_from([
            "edge-gateway",
            "tls",
            "issue-device",
            "--device-id",
            "dev1",
            "--module-id",
            "mod1",
            "--hub-name",
            "hub-a",
        ])
        .unwrap();

        assert_eq!(cli.hub_name.as_deref(), Some("hub-a"));
        let Some(Command::Tls(TlsCommand::IssueDevice {
            device_id,
            module_id,
            days,
            ..
        })) = cli.command
        else {
            panic!("expected tls issue-device");
        };
        assert_eq!(device_id, "dev1");
        assert_eq!(module_id.as_deref(), Some("mod1"));
        assert_eq!(days, 365);
    }

    #[test]
    fn issue_device_requires_device_id() {
        assert!(Cli::try_parse_from(["edge-gateway", "tls", "issue-device"]).is_err());
    }

    #[test]
    fn issue_server_accepts_repeated_sans() {
        let cli = Cli::try_parse_from([
            "edge-gateway",
            "tls",
            "issue-server",
            "--san-dns",
            "gw.local",
            "--san-dns",
            "localhost",
        ])
        .unwrap();
        let Some(Command::Tls(TlsCommand::IssueServer { san_dns, .. })) = cli.command else {
            panic!("expected tls issue-server");
        };
        assert_eq!(san_dns, ["gw.local", "localhost"]);
    }
}
