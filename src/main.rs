//! Edge Gateway - mutual TLS client identity authentication
//!
//! Serves device and module connections, and generates the certificates
//! they present.

use std::path::Path;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use edge_gateway::{
    cli::{Cli, Command, TlsCommand},
    config::Config,
    gateway::Gateway,
    identity::thumbprint,
    mtls::{CaParams, CertGenerator, DeviceCertParams, ServerCertParams, load_certs},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::Tls(ref tls_cmd)) => match run_tls_command(tls_cmd, cli.hub_name.as_deref())
        {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {e:#}");
                ExitCode::FAILURE
            }
        },
        Some(Command::Serve) | None => run_server(cli).await,
    }
}

/// Run certificate commands
fn run_tls_command(cmd: &TlsCommand, hub_name: Option<&str>) -> anyhow::Result<()> {
    match cmd {
        TlsCommand::InitCa { cn, out_dir, days } => {
            let ca = CertGenerator::init_ca(&CaParams {
                cn,
                validity_days: *days,
            })
            .context("generating CA")?;
            CertGenerator::write_to_dir(&ca, out_dir, "ca").context("writing CA")?;
            println!("CA written to {}", out_dir.join("ca.crt").display());
        }

        TlsCommand::IssueServer {
            ca_cert,
            ca_key,
            cn,
            san_dns,
            out_dir,
            name,
            days,
        } => {
            let (ca_cert_pem, ca_key_pem) = read_ca(ca_cert, ca_key)?;
            let server = CertGenerator::issue_server(
                &ServerCertParams {
                    cn,
                    san_dns: san_dns.clone(),
                    validity_days: *days,
                },
                &ca_cert_pem,
                &ca_key_pem,
            )
            .context("issuing server certificate")?;
            CertGenerator::write_to_dir(&server, out_dir, name)
                .context("writing server certificate")?;
            println!(
                "Server certificate written to {}",
                out_dir.join(format!("{name}.crt")).display()
            );
        }

        TlsCommand::IssueDevice {
            ca_cert,
            ca_key,
            device_id,
            module_id,
            out_dir,
            name,
            days,
        } => {
            let (ca_cert_pem, ca_key_pem) = read_ca(ca_cert, ca_key)?;
            let device = CertGenerator::issue_device(
                &DeviceCertParams {
                    device_id,
                    module_id: module_id.as_deref(),
                    hub_name,
                    validity_days: *days,
                },
                &ca_cert_pem,
                &ca_key_pem,
            )
            .context("issuing device certificate")?;

            let stem = name.clone().unwrap_or_else(|| match module_id {
                Some(module_id) => format!("{device_id}-{module_id}"),
                None => device_id.clone(),
            });
            CertGenerator::write_to_dir(&device, out_dir, &stem)
                .context("writing device certificate")?;

            let der = device.cert_der().context("reading back certificate")?;
            println!(
                "Device certificate written to {}",
                out_dir.join(format!("{stem}.crt")).display()
            );
            println!("Thumbprint: {}", thumbprint(&der));
        }

        TlsCommand::Thumbprint { file } => {
            let path = path_str(file)?;
            let certs = load_certs(path).with_context(|| format!("loading {path}"))?;
            for cert in certs {
                println!("{}", thumbprint(&cert));
            }
        }
    }
    Ok(())
}

fn path_str(path: &Path) -> anyhow::Result<&str> {
    path.to_str()
        .with_context(|| format!("path is not valid UTF-8: {}", path.display()))
}

fn read_ca(cert: &Path, key: &Path) -> anyhow::Result<(String, String)> {
    let cert_pem = std::fs::read_to_string(cert)
        .with_context(|| format!("reading CA certificate {}", cert.display()))?;
    let key_pem = std::fs::read_to_string(key)
        .with_context(|| format!("reading CA key {}", key.display()))?;
    Ok((cert_pem, key_pem))
}

/// Run the gateway server
async fn run_server(cli: Cli) -> ExitCode {
    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            // Apply CLI overrides
            if let Some(port) = cli.port {
                config.listener.port = port;
            }
            if let Some(host) = cli.host {
                config.listener.host = host;
            }
            if let Some(hub_name) = cli.hub_name {
                config.auth.hub_name = hub_name;
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        scheme = %config.listener.scheme,
        port = config.listener.port,
        hub = %config.auth.hub_name,
        client_cert_auth = config.tls.client_cert_auth,
        "Starting edge gateway"
    );

    let gateway = match Gateway::new(&config) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}
