//! Export an OpenAPI document to JSON
//!
//! Usage:
//!   cargo run --bin export_openapi -- transaction > transaction.json
//!   cargo run --bin export_openapi -- auth --output docs/auth.json

use anyhow::{Context, bail};
use utoipa::OpenApi;

use ledger_saga::rpc::openapi::{AuthApiDoc, TransactionApiDoc};

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let spec = match args.first().map(String::as_str) {
        Some("transaction") | None => TransactionApiDoc::openapi(),
        Some("auth") => AuthApiDoc::openapi(),
        Some(other) => bail!("unknown service '{other}', expected 'transaction' or 'auth'"),
    };
    let output_path = match args.get(1).map(String::as_str) {
        Some("--output") => Some(args.get(2).context("--output needs a path")?),
        _ => None,
    };

    let json = spec
        .to_pretty_json()
        .context("serializing OpenAPI document")?;

    match output_path {
        Some(path) => {
            std::fs::write(path, &json).with_context(|| format!("writing {path}"))?;
            eprintln!("OpenAPI document exported to: {path}");
        }
        None => println!("{json}"),
    }
    Ok(())
}
