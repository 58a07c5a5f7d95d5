use clap::{Parser, Subcommand};
use serde::Serialize;
use sheet_market_stream::{
    price_on_date, shutdown, subscribe, Cell, DateInput, EngineSettings, EngineState,
    PriceOnDateArgs, Snapshot, StreamError, StreamValue, SubscribeArgs,
};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Stand-in spreadsheet host: one subscription, one JSON line per value on stdout.
#[derive(Parser, Debug)]
#[command(name = "sheet-market-stream")]
#[command(about = "Stream Binance market snapshots as JSON lines")]
struct Cli {
    #[arg(long, env = "SHEET_STREAM_REST_URL")]
    rest_url: Option<String>,

    #[arg(long, env = "SHEET_STREAM_WS_URL")]
    ws_url: Option<String>,

    #[arg(long, env = "SHEET_STREAM_RECONNECT_MS")]
    reconnect_ms: Option<u64>,

    /// Minutes east of UTC used when rendering timestamps.
    #[arg(long, env = "SHEET_STREAM_DISPLAY_OFFSET_MINUTES", allow_hyphen_values = true)]
    display_offset_minutes: Option<i32>,

    /// Exit after this many values.
    #[arg(long)]
    max_values: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rolling window of aggregated trades
    AggTrade {
        symbol: String,
        #[arg(long)]
        minutes: Option<f64>,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        emit_interval_ms: Option<u64>,
        #[arg(long)]
        max_loops: Option<u32>,
    },
    /// Most recent candles, reconciled on every close
    Kline {
        symbol: String,
        #[arg(long, default_value = "1m")]
        interval: String,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// 24h statistics for every symbol
    Tickers,
    /// One 24h ticker field per update
    Field { symbol: String, field: String },
    /// Historical price of one candle
    PriceOnDate {
        symbol: String,
        date: String,
        #[arg(long)]
        interval: Option<String>,
        #[arg(long)]
        price_type: Option<String>,
    },
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum OutputLine<'a> {
    Table { table: &'a Snapshot },
    Scalar { value: &'a Cell },
    Diagnostic { message: &'a str },
}

impl Cli {
    fn settings(&self) -> EngineSettings {
        let mut settings = EngineSettings::from_env();
        if let Some(url) = &self.rest_url {
            settings.rest_base_url = url.clone();
        }
        if let Some(url) = &self.ws_url {
            settings.ws_base_url = url.clone();
        }
        if let Some(delay) = self.reconnect_ms {
            settings.reconnect_delay = Duration::from_millis(delay);
        }
        if let Some(minutes) = self.display_offset_minutes {
            settings.display_offset_minutes = minutes;
        }
        settings
    }
}

fn print_line(line: &OutputLine<'_>) -> Result<(), StreamError> {
    let encoded = simd_json::serde::to_string(line)?;
    println!("{encoded}");
    Ok(())
}

fn print_value(value: &StreamValue) -> Result<(), StreamError> {
    match value {
        StreamValue::Table(snapshot) => print_line(&OutputLine::Table { table: snapshot }),
        StreamValue::Scalar(cell) => print_line(&OutputLine::Scalar { value: cell }),
        StreamValue::Diagnostic(message) => print_line(&OutputLine::Diagnostic { message }),
    }
}

async fn run(cli: Cli) -> Result<(), StreamError> {
    let state = EngineState::binance(cli.settings());

    let args = match cli.command {
        Command::AggTrade {
            symbol,
            minutes,
            limit,
            emit_interval_ms,
            max_loops,
        } => {
            let mut args = SubscribeArgs::agg_trade(symbol);
            args.minutes = minutes;
            args.limit = limit;
            args.emit_interval_ms = emit_interval_ms;
            args.max_loops = max_loops;
            args
        }
        Command::Kline {
            symbol,
            interval,
            limit,
        } => {
            let mut args = SubscribeArgs::kline(symbol, interval);
            args.limit = limit;
            args
        }
        Command::Tickers => SubscribeArgs::all_tickers(),
        Command::Field { symbol, field } => SubscribeArgs::ticker_field(symbol, field),
        Command::PriceOnDate {
            symbol,
            date,
            interval,
            price_type,
        } => {
            let price = price_on_date(
                state.gateway.as_ref(),
                PriceOnDateArgs {
                    symbol,
                    date: DateInput::Text(date),
                    interval,
                    price_type,
                },
            )
            .await;
            return match price {
                Ok(value) => print_line(&OutputLine::Scalar { value: &value }),
                Err(error) if error.is_terminal() => {
                    print_line(&OutputLine::Diagnostic {
                        message: &error.to_string(),
                    })
                }
                Err(error) => Err(error),
            };
        }
    };

    let mut subscription = subscribe(&state, args).await;
    if let Some(key) = subscription.key() {
        info!(%key, "subscribed");
    }

    let mut received = 0_u64;
    loop {
        let value = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            value = subscription.next() => value,
        };
        let Some(value) = value else {
            break;
        };

        print_value(&value)?;
        received += 1;
        if cli.max_values.is_some_and(|limit| received >= limit) {
            break;
        }
    }

    subscription.close();
    shutdown(&state).await;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "sheet-market-stream failed");
            ExitCode::FAILURE
        }
    }
}
