//! puavo-rest-request: send a single request to puavo-rest

mod cli;
mod logging;

use std::io::Write;
use std::process::ExitCode;

use anyhow::{Context, bail};
use clap::Parser;
use puavo_rest_client::{ClientOptions, PuavoRestClient, RequestOptions};

use crate::cli::{Cli, HttpMethod};
use crate::logging::{LoggingConfig, init_logging};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let options = match cli.to_options() {
        Ok(options) => options,
        Err(e) => {
            eprintln!("puavo-rest-request: {e}");
            return ExitCode::FAILURE;
        }
    };

    let verbose = options.verbose.unwrap_or(false);
    if let Err(e) = init_logging(&LoggingConfig::from_env(verbose)) {
        eprintln!("{e}");
    }

    match run(&cli, options) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("puavo-rest-request: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, options: ClientOptions) -> anyhow::Result<ExitCode> {
    let client = PuavoRestClient::new(options).context("failed to set up puavo-rest client")?;

    let mut stdout = std::io::stdout().lock();

    if cli.servers {
        for server in client.servers() {
            writeln!(stdout, "{server}")?;
        }
        return Ok(ExitCode::SUCCESS);
    }

    let Some(path) = cli.path.as_deref() else {
        bail!("a request path is required");
    };

    let request_options = RequestOptions::new();
    let response = match cli.method {
        HttpMethod::Get => client.get(path, &request_options)?,
        HttpMethod::Post => client.post(
            path,
            cli.data.clone().unwrap_or_default(),
            &request_options,
        )?,
    };

    if cli.include {
        writeln!(stdout, "{} {}", response.status.as_u16(), response.url)?;
        for (name, value) in &response.headers {
            writeln!(stdout, "{}: {}", name, String::from_utf8_lossy(value.as_bytes()))?;
        }
        writeln!(stdout)?;
    }
    stdout.write_all(&response.body)?;
    stdout.flush()?;

    if cli.fail && response.status.as_u16() >= 400 {
        return Ok(ExitCode::from(22));
    }
    Ok(ExitCode::SUCCESS)
}
