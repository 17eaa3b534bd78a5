//! Neuro Screen CLI
//!
//! Replays recorded screening sessions and manages stored results.

use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use neuro_screen::{
    collector::SensorEvent,
    config::Config,
    core::report::{history_average, latest_today, RecordBuilder},
    core::risk::{assess_scores, narrate, NarrativeRequest},
    replay::{RecordedReading, RecordedSession, ReplayOutcome, Replayer, TranscriptUpdate},
    services::{CoherenceScorer, LocalCoherence, LocalNarrative, NarrativeGenerator},
    store::{export, persist_results, restore, JsonFileStore, PartOutcome, RecordStore},
    transparency::{create_shared_log_with_persistence, SharedTransparencyLog},
    ScreeningMode, SCREENING_DISCLAIMER, VERSION,
};
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

#[cfg(feature = "remote")]
use neuro_screen::BlockingServiceClient;

#[derive(Parser)]
#[command(name = "neuro-screen")]
#[command(version = VERSION)]
#[command(about = "Self-administered neurological screening engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a recorded session file
    Analyze {
        /// Recorded session (JSON)
        session: PathBuf,

        /// Capture a calibration baseline instead of scoring
        #[arg(long)]
        calibrate: bool,

        /// Store the results
        #[arg(long)]
        save: bool,
    },

    /// Read JSON-lines sensor events from stdin and score them on EOF or Ctrl+C
    Listen {
        /// Spiral center x coordinate
        #[arg(long, default_value = "0")]
        center_x: f64,

        /// Spiral center y coordinate
        #[arg(long, default_value = "0")]
        center_y: f64,

        /// Reading prompt shown to the user
        #[arg(long)]
        prompt: Option<String>,

        /// Final transcript of the reading sub-test
        #[arg(long)]
        transcript: Option<String>,

        /// Capture a calibration baseline instead of scoring
        #[arg(long)]
        calibrate: bool,

        /// Store the results
        #[arg(long)]
        save: bool,
    },

    /// Show today's status from stored results
    Status,

    /// List stored results
    History {
        /// Days to show (defaults to the configured history window)
        #[arg(long)]
        days: Option<i64>,
    },

    /// Show the stored calibration baseline
    Baseline,

    /// Export stored results and baseline as a backup
    Export {
        /// Output file
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Restore a backup
    Restore {
        /// Backup file (JSON)
        backup: PathBuf,
    },

    /// Show configuration, optionally updating it
    Config {
        /// Set the IANA timezone used for "today" and save the configuration
        #[arg(long)]
        timezone: Option<String>,
    },

    /// Display the screening disclaimer
    Disclaimer,

    /// Run the HTTP analysis server (requires server feature)
    #[cfg(feature = "server")]
    Serve {
        /// Port to bind to (0 for random)
        #[arg(long, default_value = "8710")]
        port: u16,
    },
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            session,
            calibrate,
            save,
        } => {
            cmd_analyze(session, calibrate, save);
        }
        Commands::Listen {
            center_x,
            center_y,
            prompt,
            transcript,
            calibrate,
            save,
        } => {
            cmd_listen([center_x, center_y], prompt, transcript, calibrate, save);
        }
        Commands::Status => {
            cmd_status();
        }
        Commands::History { days } => {
            cmd_history(days);
        }
        Commands::Baseline => {
            cmd_baseline();
        }
        Commands::Export { output } => {
            cmd_export(output);
        }
        Commands::Restore { backup } => {
            cmd_restore(backup);
        }
        Commands::Config { timezone } => {
            cmd_config(timezone);
        }
        Commands::Disclaimer => {
            cmd_disclaimer();
        }
        #[cfg(feature = "server")]
        Commands::Serve { port } => {
            cmd_serve(port);
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("neuro_screen=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config() -> Config {
    match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: Could not load config, using defaults: {e}");
            Config::default()
        }
    }
}

fn open_store(config: &Config) -> JsonFileStore {
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }
    JsonFileStore::new(&config.data_path)
}

/// Remote collaborators when configured, local fallbacks otherwise.
struct Services {
    #[cfg(feature = "remote")]
    remote: Option<BlockingServiceClient>,
}

impl Services {
    #[cfg(feature = "remote")]
    fn connect() -> Self {
        let remote = match BlockingServiceClient::from_env() {
            Ok(client) => {
                match client.test_connection() {
                    Ok(true) => println!("Text services: connected ({})", client.device_id()),
                    Ok(false) => eprintln!("Warning: Text service health check failed"),
                    Err(e) => eprintln!("Warning: Could not reach text service: {e}"),
                }
                Some(client)
            }
            Err(e) => {
                tracing::debug!("Remote text services disabled: {e}");
                None
            }
        };
        Self { remote }
    }

    #[cfg(not(feature = "remote"))]
    fn connect() -> Self {
        Self {}
    }

    fn coherence(&self) -> &dyn CoherenceScorer {
        #[cfg(feature = "remote")]
        if let Some(ref client) = self.remote {
            return client;
        }
        &LocalCoherence
    }

    fn narrative(&self) -> &dyn NarrativeGenerator {
        #[cfg(feature = "remote")]
        if let Some(ref client) = self.remote {
            return client;
        }
        &LocalNarrative
    }
}

fn cmd_analyze(path: PathBuf, calibrate: bool, save: bool) {
    let mut session = match RecordedSession::load(&path) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Error reading session {path:?}: {e}");
            std::process::exit(1);
        }
    };
    if calibrate {
        session.mode = ScreeningMode::Calibration;
    }
    run_session(&session, save);
}

fn cmd_listen(
    center: [f64; 2],
    prompt: Option<String>,
    transcript: Option<String>,
    calibrate: bool,
    save: bool,
) {
    let config = load_config();

    println!("Neuro Screen v{VERSION}");
    println!("Reading sensor events from stdin (one JSON object per line).");
    println!("Press Ctrl+C or close the input to score the session.");
    println!();

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());

    let (tx, rx) = crossbeam_channel::unbounded::<String>();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("stdin read failed: {e}");
                    break;
                }
            }
        }
    });

    let mut events: Vec<SensorEvent> = Vec::new();
    let mut malformed = 0usize;
    while running.load(Ordering::SeqCst) {
        match rx.recv_timeout(std::time::Duration::from_millis(100)) {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<SensorEvent>(&line) {
                    Ok(event) => events.push(event),
                    Err(e) => {
                        malformed += 1;
                        tracing::debug!("Skipping malformed event: {e}");
                    }
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }

    println!("Received {} events ({} malformed)", events.len(), malformed);
    let last_at = events.iter().map(SensorEvent::timestamp).max();
    let mut session = RecordedSession::from_events(events, center, &config);
    if let (Some(prompt), Some(text)) = (prompt, transcript) {
        session.reading = Some(RecordedReading {
            prompt,
            updates: vec![TranscriptUpdate {
                timestamp: last_at.unwrap_or_else(Utc::now),
                text,
            }],
        });
    }
    if calibrate {
        session.mode = ScreeningMode::Calibration;
    }
    if session.is_empty() {
        println!("No events to score.");
        return;
    }
    run_session(&session, save);
}

fn run_session(session: &RecordedSession, save: bool) {
    let config = load_config();
    let log = create_shared_log_with_persistence(config.data_path.join("transparency.json"));
    let services = Services::connect();

    let outcome = Replayer::new(&config, services.coherence(), &log).run(session);
    print_outcome(&outcome);

    let mut store = open_store(&config);
    if save {
        let builder = RecordBuilder::new();
        match persist_results(&mut store, &builder, &outcome.results, session.snapshot.as_deref()) {
            Ok(written) => {
                for _ in 0..written {
                    log.record_emitted();
                }
                println!("Stored {written} record(s) in {:?}", config.data_path);
            }
            Err(e) => eprintln!("Error storing results: {e}"),
        }
    }

    if outcome.mode == ScreeningMode::Test && !outcome.results.is_empty() {
        print_narrative(&config, &store, &outcome.risk.scores, services.narrative());
    }

    finish_log(&log);
}

fn print_outcome(outcome: &ReplayOutcome) {
    println!();
    println!("Session ({:?} mode)", outcome.mode);
    println!("==================");
    if outcome.results.is_empty() {
        println!("  No domain completed.");
    }
    for result in &outcome.results {
        let findings = if result.raw.is_some() {
            "calibration captured".to_string()
        } else if result.issues.is_empty() {
            "no findings".to_string()
        } else {
            result
                .issues
                .iter()
                .map(|t| t.label())
                .collect::<Vec<_>>()
                .join(", ")
        };
        println!("  {:<7} {:>3}  {}", result.domain, result.score, findings);
    }
    if let Some(ref reading) = outcome.reading {
        print!("  Reading coherence: {}", reading.coherence);
        if let Some(wpm) = reading.words_per_minute {
            print!(" ({wpm:.0} words/min)");
        }
        println!();
        if let Some(ref message) = reading.fallback_message {
            println!("  {message}");
        }
    }

    if !outcome.failures.is_empty() {
        println!();
        println!("Retries needed:");
        for failure in &outcome.failures {
            println!("  [{}] {}", failure.sub_test, failure.prompt);
        }
    }

    if outcome.mode == ScreeningMode::Test {
        println!();
        println!(
            "Overall: {} (lowest {}, average {:.1})",
            outcome.risk.status, outcome.risk.lowest_score, outcome.risk.average_score
        );
    }
}

fn print_narrative(
    config: &Config,
    store: &JsonFileStore,
    scores: &BTreeMap<neuro_screen::Domain, u8>,
    generator: &dyn NarrativeGenerator,
) {
    let assessment = assess_scores(scores, &config.risk);
    let records = store.records().unwrap_or_else(|e| {
        eprintln!("Warning: Could not read history: {e}");
        Vec::new()
    });
    let baseline = store.baseline().unwrap_or_else(|e| {
        eprintln!("Warning: Could not read baseline: {e}");
        None
    });
    let history = history_average(
        &records,
        Utc::now(),
        Duration::days(config.risk.history_days),
    );
    let request = NarrativeRequest::new(&assessment, baseline.map(|b| b.into_profile()), history);
    let narrative = narrate(&request, &assessment, generator);
    println!("{:?}: {}", narrative.status, narrative.message);
}

fn finish_log(log: &SharedTransparencyLog) {
    if let Err(e) = log.save() {
        eprintln!("Warning: Could not save transparency log: {e}");
    }
    println!();
    println!("{}", log.summary());
}

fn cmd_status() {
    let config = load_config();
    let tz = match config.tz() {
        Ok(tz) => tz,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    let store = open_store(&config);

    println!("Neuro Screen Status");
    println!("===================");
    println!();

    let records = match store.records() {
        Ok(records) => records,
        Err(e) => {
            eprintln!("Error reading records: {e}");
            std::process::exit(1);
        }
    };
    let today = latest_today(&records, &tz, Utc::now());
    if today.is_empty() {
        println!("No results recorded today ({}).", config.timezone);
        println!("Run 'neuro-screen analyze <session.json> --save' to add one.");
        return;
    }

    for record in today.values() {
        println!("  {:<7} {:>3}  {}", record.domain, record.score, record.details);
    }
    let scores: BTreeMap<_, _> = today.iter().map(|(d, r)| (*d, r.score)).collect();
    let assessment = assess_scores(&scores, &config.risk);
    println!();
    println!(
        "Overall: {} (lowest {}, average {:.1})",
        assessment.status, assessment.lowest_score, assessment.average_score
    );
    let services = Services::connect();
    print_narrative(&config, &store, &scores, services.narrative());
}

fn cmd_history(days: Option<i64>) {
    let config = load_config();
    let tz = config.tz().unwrap_or(chrono_tz::UTC);
    let store = open_store(&config);
    let days = days.unwrap_or(config.risk.history_days);

    let records = match store.records() {
        Ok(records) => records,
        Err(e) => {
            eprintln!("Error reading records: {e}");
            std::process::exit(1);
        }
    };
    let from = (Utc::now() - Duration::days(days)).timestamp_millis();
    let mut shown: Vec<_> = records.iter().filter(|r| r.timestamp >= from).collect();
    shown.sort_by_key(|r| r.timestamp);

    if shown.is_empty() {
        println!("No results in the last {days} day(s).");
        return;
    }
    println!("Results from the last {days} day(s):");
    for record in shown {
        let at = record
            .completed_at()
            .map(|t| t.with_timezone(&tz).format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "unknown time".to_string());
        println!(
            "  [{at}] {:<7} {:>3}  {}",
            record.domain, record.score, record.details
        );
    }

    println!();
    for (domain, avg) in history_average(&records, Utc::now(), Duration::days(days)) {
        println!("  {domain} average: {avg:.1}");
    }
}

fn cmd_baseline() {
    let config = load_config();
    let store = open_store(&config);
    match store.baseline() {
        Ok(Some(baseline)) => println!(
            "{}",
            serde_json::to_string_pretty(&baseline).unwrap_or_else(|_| "Error".to_string())
        ),
        Ok(None) => {
            println!("No baseline stored.");
            println!("Run 'neuro-screen analyze <session.json> --calibrate --save' to capture one.");
        }
        Err(e) => {
            eprintln!("Error reading baseline: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_export(output: Option<PathBuf>) {
    let config = load_config();
    let store = open_store(&config);
    let backup = match export(&store) {
        Ok(backup) => backup,
        Err(e) => {
            eprintln!("Error reading store: {e}");
            std::process::exit(1);
        }
    };

    let output_path = output.unwrap_or_else(|| {
        config.export_path.join(format!(
            "backup_{}.json",
            Utc::now().format("%Y%m%d_%H%M%S")
        ))
    });
    if let Some(parent) = output_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    match serde_json::to_string_pretty(&backup) {
        Ok(json) => match std::fs::write(&output_path, json) {
            Ok(_) => println!(
                "Exported {} record(s) to {output_path:?}",
                backup.history.len()
            ),
            Err(e) => eprintln!("Error writing export: {e}"),
        },
        Err(e) => eprintln!("Error serializing: {e}"),
    }
}

fn cmd_restore(path: PathBuf) {
    let config = load_config();
    let mut store = open_store(&config);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Error reading {path:?}: {e}");
            std::process::exit(1);
        }
    };

    let report = match restore(&mut store, &content) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Restore failed: {e}");
            std::process::exit(1);
        }
    };
    for (part, outcome) in [("Baseline", &report.baseline), ("History", &report.history)] {
        match outcome {
            PartOutcome::Applied(n) => println!("{part}: restored {n} item(s)"),
            PartOutcome::Absent => println!("{part}: not present in backup"),
            PartOutcome::Failed(e) => eprintln!("{part}: failed ({e})"),
        }
    }
    if !report.is_complete() {
        std::process::exit(1);
    }
}

fn cmd_config(timezone: Option<String>) {
    let mut config = load_config();

    if let Some(timezone) = timezone {
        config.timezone = timezone;
        if let Err(e) = config.tz() {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
        if let Err(e) = config.save() {
            eprintln!("Error saving config: {e}");
            std::process::exit(1);
        }
        println!("Timezone set to {}.", config.timezone);
        println!();
    }

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}

fn cmd_disclaimer() {
    println!("{SCREENING_DISCLAIMER}");
}

#[cfg(feature = "server")]
fn cmd_serve(port: u16) {
    use neuro_screen::server::{run, ServerConfig};

    let config = load_config();
    let store_dir = config.data_path.clone();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error creating runtime: {e}");
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(async move {
        let (addr, shutdown_tx) = run(ServerConfig::new(port, config, store_dir)).await?;
        println!("Listening on http://{addr}");
        println!("Press Ctrl+C to stop");
        tokio::signal::ctrl_c().await?;
        let _ = shutdown_tx.send(());
        anyhow::Ok(())
    });
    if let Err(e) = result {
        eprintln!("Server error: {e}");
        std::process::exit(1);
    }
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) {
    if let Err(e) = ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    }) {
        eprintln!("Warning: Could not set Ctrl+C handler: {e}");
    }
}
