// Copyright 2024-2025 The swh-scan Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! `swh-scan`: scan a working copy for files and directories already
//! archived.

mod output;
mod progress;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use swh_scan_lib::scan::ScanConfig;
use swh_scan_lib::scan::scan;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::output::OutputFormat;
use crate::progress::TerminalProgress;

const DEFAULT_API_URL: &str = "https://archive.softwareheritage.org/api/1/";

/// Scan a source-code working copy and report which files and directories
/// are already present in the archive.
#[derive(Debug, Parser)]
#[command(name = "swh-scan", version, about)]
struct Args {
    /// Root of the working copy to scan
    #[arg(default_value = ".", value_name = "PATH")]
    root: PathBuf,

    /// Root URL of the archive's web API
    #[arg(long, value_name = "URL", default_value = DEFAULT_API_URL)]
    api_url: Url,

    /// Bearer token for the archive's web API
    #[arg(long, env = "SWH_SCAN_TOKEN", hide_env_values = true, value_name = "TOKEN")]
    auth_token: Option<String>,

    /// Glob pattern of paths to exclude; may be repeated
    #[arg(short = 'x', long = "exclude", value_name = "GLOB")]
    exclude: Vec<String>,

    /// File of exclusion globs, one per line; may be repeated
    #[arg(long = "exclude-template", value_name = "FILE")]
    exclude_templates: Vec<PathBuf>,

    /// Do not apply the built-in default exclusion patterns
    #[arg(long)]
    no_default_patterns: bool,

    /// Do not exclude paths the working copy's VCS ignores
    #[arg(long)]
    no_vcs_patterns: bool,

    /// Also resolve where known objects were archived from
    #[arg(long)]
    provenance: bool,

    /// Output format
    #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Enable debug logging (RUST_LOG overrides)
    #[arg(long)]
    debug: bool,
}

fn init_logging(debug: bool) {
    let default_level = if debug { "swh_scan=debug,swh_scan_lib=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    // `fs::canonicalize` yields verbatim paths on Windows; dunce strips
    // them back to plain absolute paths.
    let root = dunce::canonicalize(&args.root)?;
    let config = ScanConfig {
        root,
        api_url: args.api_url,
        auth_token: args.auth_token,
        exclude: args.exclude,
        exclude_templates: args.exclude_templates,
        default_patterns: !args.no_default_patterns,
        vcs_patterns: !args.no_vcs_patterns,
        provenance: args.provenance,
    };
    let progress = TerminalProgress::new();
    let outcome = scan(&config, &progress).await?;
    progress.clear();
    let stdout = io::stdout().lock();
    output::render(args.format, &outcome.tree, &outcome.store, stdout)?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.debug);
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            let mut source = err.source();
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}
