//! CLI binary for the ec2metadata crate.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::{Arg, ArgAction, Command, CommandFactory, FromArgMatches, Parser};
use ec2metadata::{
    ApiVersion, Format, MetadataClient, MetadataError, OutputFormatter, OutputTarget,
    DEFAULT_BASE_URL,
};

#[derive(Parser, Debug)]
#[command(name = "ec2metadata")]
#[command(
    author,
    version,
    disable_version_flag = true,
    about = "Query and display EC2 instance metadata",
    after_help = "With no OPTION, every top-level meta-data key is shown as `key: value`.\n\
                  Options may be given as words (instance-id) or switches (--instance-id)."
)]
struct Cli {
    /// Metadata options to display, e.g. instance-id or public-keys
    #[arg(value_name = "OPTION")]
    options: Vec<String>,

    /// API version to query (defaults to the newest available)
    #[arg(short, long, value_name = "VERSION")]
    api: Option<String>,

    /// List available API versions and exit
    #[arg(short, long = "listapis")]
    list_apis: bool,

    /// Write output to a file instead of stdout
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Render output as XML
    #[arg(short, long, conflicts_with = "json")]
    xml: bool,

    /// Render output as JSON
    #[arg(short, long)]
    json: bool,

    /// Metadata service base URL
    #[arg(long, value_name = "URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Request timeout in seconds
    #[arg(long, value_name = "SECS", default_value_t = 5)]
    timeout: u64,

    /// Maximum size in bytes to accept per response (fails if exceeded)
    #[arg(long, value_name = "BYTES")]
    max_size: Option<usize>,

    /// Use session-token (IMDSv2) access from the first request
    #[arg(long)]
    token: bool,
}

impl Cli {
    /// The derived command with `-v/--version` in place of clap's `-V`.
    fn build_command() -> Command {
        Cli::command().arg(
            Arg::new("version")
                .short('v')
                .long("version")
                .help("Print version")
                .action(ArgAction::Version),
        )
    }

    /// Parse command-line arguments in one pass.
    fn try_parse_args<I>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = OsString>,
    {
        let matches = Cli::build_command().try_get_matches_from(normalize_args(args))?;
        Cli::from_arg_matches(&matches)
    }

    fn format(&self) -> Format {
        if self.xml {
            Format::Xml
        } else if self.json {
            Format::Json
        } else {
            Format::Text {
                with_key_prefix: self.options.is_empty(),
            }
        }
    }
}

/// Rewrite `--<metadata-option>` switches into plain option words.
///
/// Metadata options depend on the API version, so they cannot be declared up
/// front; any long switch the parser does not know is taken as one.
fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let command = Cli::build_command();
    let known: Vec<&str> = command
        .get_arguments()
        .filter_map(|arg| arg.get_long())
        .chain(["help"])
        .collect();

    let mut normalized = Vec::new();
    let mut escaped = false;
    for arg in args {
        if escaped {
            normalized.push(arg);
            continue;
        }
        let switch = arg
            .to_str()
            .and_then(|s| s.strip_prefix("--"))
            .map(str::to_string);
        match switch {
            Some(name) if name.is_empty() => {
                escaped = true;
                normalized.push(arg);
            }
            Some(name) if !known.contains(&name.split('=').next().unwrap_or_default()) => {
                normalized.push(OsString::from(name));
            }
            _ => normalized.push(arg),
        }
    }
    normalized
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ec2metadata=warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    init_logging();
    let cli = match Cli::try_parse_args(std::env::args_os()) {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            // Argument errors share the exit status of every other failure.
            let _ = e.print();
            return ExitCode::FAILURE;
        }
    };

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, MetadataError> {
    let mut client = MetadataClient::new(Duration::from_secs(cli.timeout), &cli.base_url)?;
    if let Some(size) = cli.max_size {
        client = client.with_max_size(size);
    }
    if cli.token {
        client = client.with_token_access();
    }

    if cli.list_apis {
        let versions = client.list_api_versions().await?;
        println!("Available API versions:");
        for version in versions {
            println!("    {}", version);
        }
        return Ok(ExitCode::SUCCESS);
    }

    let client = match &cli.api {
        Some(version) => client.set_api_version(ApiVersion::new(version.as_str())).await?,
        None => client.latest().await?,
    };

    let resolution = if cli.options.is_empty() {
        client.resolve_defaults().await?
    } else {
        client.resolve_all(&cli.options).await?
    };
    for failure in &resolution.failures {
        eprintln!("error: {}", failure);
    }

    let target = cli.output.clone().map(OutputTarget::File).unwrap_or_default();
    OutputFormatter::new(cli.format()).emit(&target, &resolution.entries)?;

    Ok(if resolution.is_complete() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
