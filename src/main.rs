//! stormwatch CLI - Follow US severe weather watches, discussions and warnings.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use stormwatch::{
    config::{Config, parse_duration},
    iem::parse_archive_date,
    metrics::start_metrics_server,
    outlook::issuance_times,
    swpc::geomagnetic_storm_level,
    Basin, DataSource, Events, KIndex, LiveSource, OutlookKind, RadioFlux, ReportKind, SolarWind, WatchKind,
};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// stormwatch - Follow US severe weather products from the NWS and SPC
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// User agent sent to upstream services (NWS asks for contact details)
    #[arg(long, global = true, env = "STORMWATCH_USER_AGENT")]
    user_agent: Option<String>,

    /// Per-request timeout, e.g. "30s"
    #[arg(long, global = true, value_parser = parse_duration)]
    timeout: Option<Duration>,

    /// Print products as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the event engine and print newly issued products
    Listen {
        /// Time between poll cycles, e.g. "10s"
        #[arg(short, long, value_parser = parse_duration)]
        interval: Option<Duration>,

        /// Wait one interval before the first poll
        #[arg(long)]
        no_tick_on_start: bool,

        /// Do not follow watches
        #[arg(long)]
        no_watches: bool,

        /// Do not follow mesoscale discussions
        #[arg(long)]
        no_mds: bool,

        /// Do not follow warnings
        #[arg(long)]
        no_warnings: bool,

        /// Print statistics every N seconds (0 disables)
        #[arg(short, long)]
        stats_interval: Option<u64>,

        /// Serve Prometheus metrics
        #[arg(long)]
        metrics: bool,

        /// Port for the Prometheus metrics endpoint
        #[arg(long)]
        metrics_port: Option<u16>,

        /// Maximum runtime in seconds (0 = unlimited)
        #[arg(long, default_value_t = 0)]
        max_runtime: u64,
    },

    /// List active warnings
    Warnings {
        /// Event categories to include (repeatable), e.g. "tornado warning"
        #[arg(short, long = "event")]
        events: Vec<String>,
    },

    /// List active watches and watch boxes
    Watches,

    /// List active mesoscale discussions
    Mds,

    /// List archived watches for a day
    Archive {
        /// Day to query, YYYY-MM-DD
        #[arg(long)]
        date: String,

        /// Only the snapshot at this UTC hour
        #[arg(long)]
        hour: Option<u32>,
    },

    /// Show the planetary K-index
    Kindex {
        /// Every sample instead of only the latest
        #[arg(long)]
        all: bool,
    },

    /// Show convective outlook risk areas
    Outlook {
        /// Forecast day, 1 to 8
        #[arg(short, long, default_value_t = 1)]
        day: u8,

        /// Product: categorical, tornado, wind, hail, prob or sigprob
        #[arg(short, long, default_value = "categorical")]
        kind: OutlookKind,

        /// Archived issuance day, YYYY-MM-DD (days 1-3 only)
        #[arg(long)]
        date: Option<String>,

        /// Archived issuance time, HHMM UTC (defaults to the last of the day)
        #[arg(long, requires = "date")]
        time: Option<String>,
    },

    /// List storm reports for a convective day
    Reports {
        /// Only one category: tornado, wind or hail
        #[arg(short, long)]
        kind: Option<ReportKind>,

        /// Convective day, YYYY-MM-DD (defaults to the current one)
        #[arg(long)]
        date: Option<String>,
    },

    /// List active tropical cyclones, or a basin's outlook disturbances
    Tropical {
        /// Basin for the tropical weather outlook: atlantic, east-pacific or central-pacific
        #[arg(short, long)]
        basin: Option<Basin>,
    },

    /// List NWS radar sites
    Radar,

    /// Show space weather scales, solar wind and radio flux
    Space {
        /// Every sample instead of only the latest
        #[arg(long)]
        all: bool,
    },

    /// Show the aurora probability at a location
    Aurora {
        /// Latitude in degrees north
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Longitude in degrees east (negative for west)
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = Config::load()?;
    if let Some(ref user_agent) = args.user_agent {
        config.user_agent = user_agent.clone();
    }
    if let Some(timeout) = args.timeout {
        config.request_timeout = timeout;
    }
    if let Command::Listen {
        interval,
        no_tick_on_start,
        stats_interval,
        metrics,
        metrics_port,
        ..
    } = &args.command
    {
        if let Some(interval) = interval {
            config.interval = *interval;
        }
        if *no_tick_on_start {
            config.tick_on_start = false;
        }
        if let Some(stats_interval) = stats_interval {
            config.stats_interval = *stats_interval;
        }
        if *metrics {
            config.metrics_enabled = true;
        }
        if let Some(port) = metrics_port {
            config.metrics_port = *port;
        }
    }
    config.validate().context("Invalid configuration")?;

    let source = LiveSource::new(config.client_config())
        .context("Failed to create HTTP client")?
        .with_custom_warning_names(config.custom_warning_names);

    match args.command {
        Command::Listen {
            no_watches,
            no_mds,
            no_warnings,
            max_runtime,
            ..
        } => {
            let streams = Streams {
                watches: !no_watches,
                mds: !no_mds,
                warnings: !no_warnings,
            };
            listen(config, source, streams, max_runtime, args.json).await?;
        }
        Command::Warnings { events } => {
            let filter = if events.is_empty() {
                config.warning_events.clone()
            } else {
                events.iter().map(|e| e.to_lowercase()).collect()
            };
            let warnings = source.fetch_active_warnings(&filter).await?;
            print_all(&warnings, args.json)?;
        }
        Command::Watches => {
            let (severe, tornado, boxes) = tokio::join!(
                source.fetch_active_watches(WatchKind::SevereThunderstorm),
                source.fetch_active_watches(WatchKind::Tornado),
                source.fetch_active_watch_boxes(),
            );
            print_all(&severe?, args.json)?;
            print_all(&tornado?, args.json)?;
            print_all(&boxes?, args.json)?;
        }
        Command::Mds => {
            let mds = source.fetch_active_mesoscale_discussions().await?;
            print_all(&mds, args.json)?;
        }
        Command::Archive { date, hour } => {
            let date = parse_archive_date(&date)?;
            let boxes = source.fetch_archived_watch_boxes(date, hour).await?;
            print_all(&boxes, args.json)?;
        }
        Command::Kindex { all } => {
            for sample in source.fetch_k_index(all).await? {
                if args.json {
                    println!("{}", serde_json::to_string(&sample)?);
                } else {
                    println!("{}", format_k_index(&sample));
                }
            }
        }
        Command::Outlook { day, kind, date, time } => {
            let areas = match date {
                Some(date) => {
                    let date = parse_archive_date(&date)?;
                    let time = match time {
                        Some(time) => time,
                        None => issuance_times(day)
                            .last()
                            .map(|t| t.to_string())
                            .with_context(|| format!("Day {} outlooks are not archived", day))?,
                    };
                    source.fetch_archived_outlook(date, day, &time, kind).await?
                }
                None => source.fetch_outlook(day, kind).await?,
            };
            print_all(&areas, args.json)?;
        }
        Command::Reports { kind, date } => {
            let date = date.as_deref().map(parse_archive_date).transpose()?;
            let kinds = match kind {
                Some(kind) => vec![kind],
                None => vec![ReportKind::Tornado, ReportKind::Wind, ReportKind::Hail],
            };
            for kind in kinds {
                print_all(&source.fetch_storm_reports(kind, date).await?, args.json)?;
            }
        }
        Command::Tropical { basin } => match basin {
            Some(basin) => print_all(&source.fetch_tropical_disturbances(basin).await?, args.json)?,
            None => print_all(&source.fetch_active_tropical_cyclones().await?, args.json)?,
        },
        Command::Radar => {
            print_all(&source.fetch_radar_stations().await?, args.json)?;
        }
        Command::Space { all } => {
            let (scales, wind, flux) = tokio::join!(
                source.fetch_space_weather_scales(),
                source.fetch_solar_wind(all),
                source.fetch_radio_flux(all),
            );
            let (scales, wind, flux) = (scales?, wind?, flux?);
            if args.json {
                println!("{}", serde_json::to_string(&scales)?);
                for sample in &wind {
                    println!("{}", serde_json::to_string(sample)?);
                }
                for sample in &flux {
                    println!("{}", serde_json::to_string(sample)?);
                }
            } else {
                println!("{}", scales);
                wind.iter().for_each(|s| println!("{}", format_solar_wind(s)));
                flux.iter().for_each(|f| println!("{}", format_radio_flux(f)));
            }
        }
        Command::Aurora { lat, lon } => {
            let forecast = source.fetch_aurora_forecast().await?;
            let probability = forecast
                .probability_at(lat, lon)
                .context("Aurora forecast has no grid cells")?;
            if args.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "forecast_time": forecast.forecast_time,
                        "latitude": lat,
                        "longitude": lon,
                        "probability": probability,
                    })
                );
            } else {
                println!(
                    "{}  {:.2}, {:.2}  aurora probability {}%",
                    forecast.forecast_time.format("%Y-%m-%d %H:%MZ"),
                    lat,
                    lon,
                    probability
                );
            }
        }
    }

    Ok(())
}

/// Which notification kinds `listen` subscribes to.
#[derive(Debug, Clone, Copy)]
struct Streams {
    watches: bool,
    mds: bool,
    warnings: bool,
}

async fn listen(config: Config, source: LiveSource, streams: Streams, max_runtime: u64, json: bool) -> Result<()> {
    info!("stormwatch starting...");
    info!("Polling every {:?}", config.interval);

    let events = Events::new(Arc::new(source), config.events_config()?);
    let stats = events.stats();

    if streams.watches {
        events.on_watch_issued(move |watches, boxes| {
            print_all(watches, json)?;
            print_all(boxes, json)
        });
    }
    if streams.mds {
        events.on_mesoscale_discussion_issued(move |mds| print_all(mds, json));
    }
    if streams.warnings {
        events.on_warning_issued(move |warning, status| {
            if json {
                println!("{}", serde_json::to_string(&(status, warning))?);
            } else {
                println!("{} {}", status, warning);
            }
            Ok(())
        });
    }

    // Create shutdown signal
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    // Handle Ctrl+C
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            return;
        }
        info!("Shutdown signal received");
        let _ = shutdown_tx_clone.send(true);
    });

    // Optional max runtime
    if max_runtime > 0 {
        let shutdown_tx_clone = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(max_runtime)).await;
            info!("Max runtime reached");
            let _ = shutdown_tx_clone.send(true);
        });
    }

    // Start stats printer
    if config.stats_interval > 0 {
        let stats_clone = Arc::clone(&stats);
        let period = Duration::from_secs(config.stats_interval);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                interval.tick().await;
                eprintln!("\n{}", stats_clone.summary());
            }
        });
    }

    // Start metrics server
    if config.metrics_enabled {
        let stats_clone = Arc::clone(&stats);
        let port = config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(port, stats_clone).await {
                error!("Metrics server failed: {}", e);
            }
        });
    }

    events.enable()?;

    let _ = shutdown_rx.wait_for(|stop| *stop).await;
    events.disable();

    // Print final statistics
    eprintln!("\n\nFINAL STATISTICS");
    eprintln!("{}", stats.summary());

    Ok(())
}

/// Print products one per line, as text or JSON.
fn print_all<T: Serialize + Display>(items: &[T], json: bool) -> Result<()> {
    for item in items {
        if json {
            println!("{}", serde_json::to_string(item)?);
        } else {
            println!("{}", item);
        }
    }
    Ok(())
}

fn format_k_index(sample: &KIndex) -> String {
    format!(
        "{}  Kp {:.2} ({})  estimated {:.2}  {}",
        sample.time_tag.format("%Y-%m-%d %H:%MZ"),
        sample.kp_index,
        sample.kp,
        sample.estimated_kp,
        geomagnetic_storm_level(sample.kp_index)
    )
}

fn format_optional(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.*}", precision, v))
}

fn format_solar_wind(sample: &SolarWind) -> String {
    format!(
        "{}  solar wind {} km/s  density {} p/cm3  temperature {} K",
        sample.time_tag.format("%Y-%m-%d %H:%MZ"),
        format_optional(sample.speed, 1),
        format_optional(sample.density, 2),
        format_optional(sample.temperature, 0)
    )
}

fn format_radio_flux(sample: &RadioFlux) -> String {
    format!(
        "{}  {:.0} MHz radio flux {:.1} sfu",
        sample.time_tag.format("%Y-%m-%d %H:%MZ"),
        sample.frequency,
        sample.flux
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_format_k_index() {
        let sample = KIndex {
            time_tag: Utc.with_ymd_and_hms(2024, 5, 10, 18, 0, 0).unwrap(),
            kp_index: 8.0,
            estimated_kp: 8.33,
            kp: "8P".to_string(),
        };
        let line = format_k_index(&sample);
        assert!(line.starts_with("2024-05-10 18:00Z"));
        assert!(line.contains("Kp 8.00 (8P)"));
        assert!(line.ends_with("G4"));
    }

    #[test]
    fn test_parse_listen_args() {
        let args = Args::try_parse_from([
            "stormwatch",
            "listen",
            "--interval",
            "30s",
            "--no-mds",
            "--max-runtime",
            "60",
        ])
        .unwrap();
        match args.command {
            Command::Listen {
                interval,
                no_mds,
                no_watches,
                max_runtime,
                ..
            } => {
                assert_eq!(interval, Some(Duration::from_secs(30)));
                assert!(no_mds);
                assert!(!no_watches);
                assert_eq!(max_runtime, 60);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_warning_events() {
        let args = Args::try_parse_from([
            "stormwatch",
            "--json",
            "warnings",
            "-e",
            "tornado warning",
            "-e",
            "flash flood warning",
        ])
        .unwrap();
        assert!(args.json);
        match args.command {
            Command::Warnings { events } => {
                assert_eq!(events, vec!["tornado warning", "flash flood warning"]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_format_solar_wind_missing_values() {
        let sample = SolarWind {
            time_tag: Utc.with_ymd_and_hms(2024, 5, 10, 17, 0, 0).unwrap(),
            speed: Some(702.14),
            density: None,
            temperature: Some(412345.0),
        };
        assert_eq!(
            format_solar_wind(&sample),
            "2024-05-10 17:00Z  solar wind 702.1 km/s  density - p/cm3  temperature 412345 K"
        );
    }

    #[test]
    fn test_parse_outlook_args() {
        let args = Args::try_parse_from([
            "stormwatch",
            "outlook",
            "--day",
            "2",
            "--kind",
            "torn",
            "--date",
            "2024-05-06",
            "--time",
            "0600",
        ])
        .unwrap();
        match args.command {
            Command::Outlook { day, kind, date, time } => {
                assert_eq!(day, 2);
                assert_eq!(kind, OutlookKind::Tornado);
                assert_eq!(date.as_deref(), Some("2024-05-06"));
                assert_eq!(time.as_deref(), Some("0600"));
            }
            other => panic!("unexpected command: {:?}", other),
        }

        // An issuance time needs a date.
        assert!(Args::try_parse_from(["stormwatch", "outlook", "--time", "1200"]).is_err());
        assert!(Args::try_parse_from(["stormwatch", "outlook", "--kind", "sleet"]).is_err());
    }

    #[test]
    fn test_parse_reports_tropical_and_aurora_args() {
        let args = Args::try_parse_from(["stormwatch", "reports", "--kind", "hail"]).unwrap();
        assert!(matches!(args.command, Command::Reports { kind: Some(ReportKind::Hail), date: None }));

        let args = Args::try_parse_from(["stormwatch", "tropical", "--basin", "central-pacific"]).unwrap();
        assert!(matches!(args.command, Command::Tropical { basin: Some(Basin::CentralPacific) }));

        let args = Args::try_parse_from(["stormwatch", "aurora", "--lat", "45.5", "--lon", "-98"]).unwrap();
        match args.command {
            Command::Aurora { lat, lon } => {
                assert_eq!(lat, 45.5);
                assert_eq!(lon, -98.0);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_interval_rejected() {
        assert!(Args::try_parse_from(["stormwatch", "listen", "--interval", "often"]).is_err());
    }
}
