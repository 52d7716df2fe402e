//! Command line arguments

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use puavo_rest_client::{ClientOptions, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Send a request to puavo-rest using server discovery
#[derive(Debug, Parser)]
#[command(name = "puavo-rest-request", version)]
pub struct Cli {
    /// Request path, e.g. /v3/devices
    pub path: Option<String>,

    #[arg(short = 'X', long, value_enum, default_value = "get")]
    pub method: HttpMethod,

    /// Request body for POST
    #[arg(short = 'd', long)]
    pub data: Option<String>,

    /// Options file (TOML, YAML or JSON)
    #[arg(short = 'c', long = "config", env = "PUAVO_REST_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub domain: Option<String>,

    /// Explicit server address, skips discovery
    #[arg(long)]
    pub server: Option<String>,

    /// DNS mode: default, no or only
    #[arg(long)]
    pub dns: Option<String>,

    /// Auth mode: none, bootserver, basic or negotiated
    #[arg(long)]
    pub auth: Option<String>,

    /// Extra header, NAME:VALUE (repeatable)
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    #[arg(long)]
    pub ca_file: Option<PathBuf>,

    #[arg(long)]
    pub port: Option<u16>,

    #[arg(long)]
    pub scheme: Option<String>,

    /// Host of the service principal for negotiated auth
    #[arg(long)]
    pub negotiation_host: Option<String>,

    /// Try the next server on network failure
    #[arg(long)]
    pub retry_fallback: bool,

    /// Configuration directory root
    #[arg(long)]
    pub etc_root: Option<PathBuf>,

    /// Print status line and response headers
    #[arg(short = 'i', long)]
    pub include: bool,

    /// Exit with an error on HTTP status >= 400
    #[arg(short = 'f', long)]
    pub fail: bool,

    /// Print the candidate servers and exit
    #[arg(long)]
    pub servers: bool,

    /// Log request diagnostics to stderr
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

fn parse_header(value: &str) -> std::result::Result<(String, String), String> {
    let (name, value) = value
        .split_once(':')
        .ok_or_else(|| format!("expected NAME:VALUE, got {value:?}"))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}

impl Cli {
    /// Options from the config file with command line values on top
    pub fn to_options(&self) -> Result<ClientOptions> {
        let options = ClientOptions::load(self.config.as_deref())?;
        Ok(self.apply(options))
    }

    /// Overwrite `options` with every value given on the command line
    pub fn apply(&self, mut options: ClientOptions) -> ClientOptions {
        if let Some(v) = &self.domain {
            options.domain = Some(v.clone());
        }
        if let Some(v) = &self.server {
            options.server = Some(v.clone());
        }
        if let Some(v) = &self.dns {
            options.dns = Some(v.clone());
        }
        if let Some(v) = &self.auth {
            options.auth = Some(v.clone());
        }
        if let Some(v) = &self.ca_file {
            options.ca_file = Some(v.clone());
        }
        if let Some(v) = self.port {
            options.port = Some(v);
        }
        if let Some(v) = &self.scheme {
            options.scheme = Some(v.clone());
        }
        if let Some(v) = &self.negotiation_host {
            options.negotiation_host = Some(v.clone());
        }
        if let Some(v) = &self.etc_root {
            options.etc_root = Some(v.clone());
        }

        options.headers.extend(self.headers.iter().cloned());
        if self.retry_fallback {
            options.retry_fallback = Some(true);
        }
        if self.verbose {
            options.verbose = Some(true);
        }

        options
    }
}
