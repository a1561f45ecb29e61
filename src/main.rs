//! skycast command line: runs weather tool calls and prints JSON responses.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use skycast_core::Config;
use skycast_weather::{ToolReply, ToolRequest, ToolResponse, WeatherService, WeatherTools};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = "skycast", about = "Cached, rate-limited weather lookups for agent tools", version)]
struct Cli {
    /// Config file to use instead of the default location.
    #[arg(long, global = true, value_name = "path")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Current conditions for a city.
    Weather {
        city: String,
        #[arg(long)]
        units: Option<String>,
        #[arg(long)]
        language: Option<String>,
    },
    /// Daily forecast for a city.
    Forecast {
        city: String,
        #[arg(long, allow_negative_numbers = true)]
        days: Option<i64>,
        #[arg(long)]
        units: Option<String>,
        #[arg(long)]
        language: Option<String>,
    },
    /// Hourly forecast for a city.
    Hourly {
        city: String,
        #[arg(long, allow_negative_numbers = true)]
        hours: Option<i64>,
        #[arg(long)]
        units: Option<String>,
        #[arg(long)]
        language: Option<String>,
    },
    /// Local time in a city.
    Time {
        city: String,
        #[arg(long)]
        language: Option<String>,
    },
    /// Run one JSON tool call, e.g. `{"type":"get_weather","city":"Oslo"}`.
    Call { request: String },
    /// Read one JSON tool call per line from stdin until EOF.
    Serve,
}

impl Command {
    fn into_request(self) -> Option<ToolRequest> {
        match self {
            Command::Weather {
                city,
                units,
                language,
            } => Some(ToolRequest::GetWeather {
                city,
                units,
                language,
            }),
            Command::Forecast {
                city,
                days,
                units,
                language,
            } => Some(ToolRequest::GetForecast {
                city,
                days,
                units,
                language,
            }),
            Command::Hourly {
                city,
                hours,
                units,
                language,
            } => Some(ToolRequest::GetHourlyForecast {
                city,
                hours,
                units,
                language,
            }),
            Command::Time { city, language } => Some(ToolRequest::GetLocalTime { city, language }),
            Command::Call { .. } | Command::Serve => None,
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if path.is_some() {
        config.apply_env_overrides()?;
    }
    Ok(config)
}

fn print_response(response: &ToolResponse) -> Result<()> {
    let json = serde_json::to_string_pretty(response).context("Failed to encode response")?;
    println!("{}", json);
    Ok(())
}

async fn write_reply<W>(output: &mut W, reply: &ToolReply) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut json = serde_json::to_string(reply).context("Failed to encode response")?;
    json.push('\n');
    output
        .write_all(json.as_bytes())
        .await
        .context("Failed to write response")?;
    output.flush().await.context("Failed to write response")?;
    Ok(())
}

/// Answers one JSON tool call per input line. Calls run concurrently and
/// each reply is written as soon as it is ready, carrying the call's `id`.
/// Returns once input ends (or `cancel` fires) and every call has replied.
async fn serve<R, W>(
    tools: WeatherTools,
    input: R,
    mut output: W,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut tasks = JoinSet::new();
    let mut reading = true;

    while reading || !tasks.is_empty() {
        tokio::select! {
            _ = cancel.cancelled(), if reading => reading = false,
            line = lines.next_line(), if reading => {
                match line.context("Failed to read stdin")? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => {
                        let tools = tools.clone();
                        let cancel = cancel.clone();
                        tasks.spawn(async move { tools.reply_json(&line, &cancel).await });
                    }
                    None => reading = false,
                }
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => match joined {
                Ok(reply) => write_reply(&mut output, &reply).await?,
                Err(e) => tracing::error!("Tool call task failed: {}", e),
            },
            else => break,
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_ref())?;
    skycast_core::init(&config.log_level)?;
    config.ensure_valid()?;

    let service = Arc::new(WeatherService::from_config(config)?);
    let tools = WeatherTools::new(Arc::clone(&service));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, cancelling in-flight lookups");
                cancel.cancel();
            }
        });
    }
    let sweepers = service.start_sweepers(&cancel);

    let result = match cli.command {
        Command::Serve => {
            let stdin = BufReader::new(tokio::io::stdin());
            serve(tools, stdin, tokio::io::stdout(), cancel.clone()).await
        }
        Command::Call { request } => print_response(&tools.dispatch_json(&request, &cancel).await),
        command => match command.into_request() {
            Some(request) => print_response(&tools.dispatch(request, &cancel).await),
            None => Ok(()),
        },
    };

    for stats in service.stats() {
        tracing::debug!(
            "{}: {} hit(s), {} miss(es), {} failure(s), {} entries",
            stats.resource.as_str(),
            stats.hits,
            stats.misses,
            stats.failures,
            stats.entries
        );
    }

    cancel.cancel();
    for sweeper in sweepers {
        let _ = sweeper.await;
    }
    result
}
