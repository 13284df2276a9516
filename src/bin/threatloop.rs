//! Threatloop CLI — secure ops terminal
//!
//! Commands:
//!   threatloop terminal          — interactive command loop (default)
//!   threatloop analyze <text>    — seal, route, classify and log one command
//!   threatloop replay <file>     — feed a capture export through the pipeline
//!   threatloop stats             — verdict counts across DNA memory
//!   threatloop search <keyword>  — DNA records containing a keyword
//!   threatloop resanitize        — rewrite stored verdicts in canonical form

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use threatloop_core::config::Config;
use threatloop_core::feed::{PayloadFeed, ReplaySource};
use threatloop_core::memory::DnaMemory;
use threatloop_core::model::ThreatEvent;
use threatloop_core::pipeline::{Command, CommandReport, Pipeline};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;

fn print_usage() {
    println!(
        r#"
╔══════════════════════════════════════════════════════════════╗
║        Threatloop — Secure Ops Terminal                      ║
║        Sealed commands · Threat routing · DNA memory         ║
╚══════════════════════════════════════════════════════════════╝

Usage: threatloop [command] [options]

Commands:
  terminal                 Interactive command loop (default)
  analyze    <text...>     Analyze one command and exit
  replay     <file>        Replay a capture export (one payload per line,
                           optionally "src_ip<TAB>payload")
  stats                    Verdict counts across DNA memory
  search     <keyword>     DNA records containing <keyword>
  resanitize               Rewrite stored verdicts in canonical form

Configuration:
  threatloop.json in the working directory, or the file named by
  THREATLOOP_CONFIG. THREATLOOP_* variables override single fields.

Examples:
  threatloop analyze "' OR 1=1--"
  threatloop replay capture.txt
  threatloop search 1=1
"#
    );
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = env::args().collect();
    let config = match load_config() {
        Some(config) => config,
        None => return,
    };

    match args.get(1).map(String::as_str) {
        None | Some("terminal") => cmd_terminal(config).await,
        Some("analyze") => cmd_analyze(config, &args[2..]).await,
        Some("replay") => cmd_replay(config, &args[2..]).await,
        Some("stats") => cmd_stats(config),
        Some("search") => cmd_search(config, &args[2..]),
        Some("resanitize") => cmd_resanitize(config),
        Some("help") | Some("--help") | Some("-h") => print_usage(),
        Some(other) => {
            eprintln!("Unknown command: {}", other);
            print_usage();
        }
    }
}

fn load_config() -> Option<Config> {
    let path = env::var("THREATLOOP_CONFIG").ok().map(PathBuf::from);
    match Config::load(path.as_deref()) {
        Ok(config) => Some(config),
        Err(e) => {
            eprintln!("  {}", e);
            None
        }
    }
}

fn build_pipeline(config: Config) -> Option<Arc<Pipeline>> {
    match Pipeline::from_config(config) {
        Ok(pipeline) => Some(Arc::new(pipeline)),
        Err(e) => {
            eprintln!("  Failed to start pipeline: {}", e);
            None
        }
    }
}

fn open_memory(config: &Config) -> Option<DnaMemory> {
    match DnaMemory::open(&config.log_path) {
        Ok(memory) => Some(memory),
        Err(e) => {
            eprintln!("  Cannot open {}: {}", config.log_path.display(), e);
            None
        }
    }
}

/// Plugins block on sockets and HTTP, so analysis runs off the async workers
async fn analyze(
    pipeline: &Arc<Pipeline>,
    text: String,
    src_ip: Option<String>,
) -> Option<CommandReport> {
    let pipeline = pipeline.clone();
    match tokio::task::spawn_blocking(move || pipeline.process(&text, src_ip.as_deref())).await {
        Ok(report) => Some(report),
        Err(e) => {
            eprintln!("  Analysis task failed: {}", e);
            None
        }
    }
}

fn print_report(report: &CommandReport) {
    match report {
        CommandReport::Analyzed(a) => {
            let marker = if a.alert { "[!!]" } else { "[ok]" };
            println!(
                "\n  {} {} {} ({:.1}%) via {}",
                marker,
                a.threat_id,
                a.result.verdict(),
                a.result.confidence(),
                a.result.model_name()
            );
            println!("  Input:   {}", a.input);
            println!("  Reason:  {}", a.reason);
            if let Some(ip) = &a.src_ip {
                println!("  Source:  {}", ip);
            }
            for outcome in a.result.plugin_reports() {
                match (outcome.report_text(), outcome.error_text()) {
                    (Some(report), _) => {
                        println!("  [plugin:{}]", outcome.plugin_name());
                        for line in report.lines() {
                            println!("    {}", line);
                        }
                    }
                    (_, Some(error)) => {
                        println!("  [plugin:{}] error: {}", outcome.plugin_name(), error)
                    }
                    _ => {}
                }
            }
            if !a.stored {
                println!("  (not recorded: DNA memory unavailable)");
            }
        }
        CommandReport::Tampered { sequence, error } => {
            println!("\n  [!!] Command #{} rejected: {}", sequence, error);
        }
        CommandReport::ClassificationFailed { sequence, error, .. } => {
            println!("\n  [??] Command #{} could not be classified: {}", sequence, error);
        }
    }
}

fn print_events(events: &[ThreatEvent]) {
    if events.is_empty() {
        println!("  No records.");
        return;
    }
    for e in events {
        println!(
            "  #{:<5} {:<19}  {:<14} {:>5.1}%  {}",
            e.sequence(),
            e.timestamp(),
            e.verdict().label(),
            e.confidence(),
            e.input()
        );
    }
}

fn print_stats(memory: &DnaMemory) {
    let stats = memory.stats();
    println!("\n  DNA Memory Statistics");
    println!("  {}", "=".repeat(40));
    println!("  Records:  {}", memory.count_logs());
    for (label, count) in &stats {
        println!("  {:<14} {}", label, count);
    }
}

async fn prompt(stdout: &mut tokio::io::Stdout, text: &str) {
    let _ = stdout.write_all(text.as_bytes()).await;
    let _ = stdout.flush().await;
}

async fn read_line(lines: &mut Lines<BufReader<Stdin>>) -> Option<String> {
    match lines.next_line().await {
        Ok(line) => line,
        Err(e) => {
            eprintln!("  stdin: {}", e);
            None
        }
    }
}

async fn cmd_terminal(config: Config) {
    let pipeline = match build_pipeline(config) {
        Some(p) => p,
        None => return,
    };

    let who = pipeline.whoami();
    println!(
        r#"
╔══════════════════════════════════════════════════════════════╗
║        Threatloop v{:<10} — Secure Ops Terminal            ║
╚══════════════════════════════════════════════════════════════╝
  Session:  {}
  Key:      {}
  Records:  {}
  Type "help" for commands.
"#,
        who.version, who.session_id, who.key_preview, who.total_logs
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        prompt(&mut stdout, "threatloop> ").await;
        let line = match read_line(&mut lines).await {
            Some(line) => line,
            None => break,
        };

        match Command::parse(&line) {
            Command::Empty => {}
            Command::Exit => break,
            Command::Help => println!("{}", Command::help_text()),
            Command::Whoami => {
                let who = pipeline.whoami();
                println!("  Version:  {}", who.version);
                println!("  Session:  {}", who.session_id);
                println!("  Key:      {}", who.key_preview);
                println!("  Records:  {}", who.total_logs);
            }
            Command::DnaStats => print_stats(pipeline.memory()),
            Command::DnaSearch(keyword) => print_events(&pipeline.memory().search_memory(&keyword)),
            Command::DnaRecent(n) => print_events(&pipeline.memory().recent(n)),
            Command::DnaDump => print_events(&pipeline.memory().full_dump()),
            Command::ClearLogs => {
                prompt(&mut stdout, "  Wipe all DNA records? Type 'yes' to confirm: ").await;
                let answer = read_line(&mut lines).await.unwrap_or_default();
                if answer.trim().eq_ignore_ascii_case("yes") {
                    match pipeline.clear_memory() {
                        Ok(()) => println!("  DNA memory cleared."),
                        Err(e) => eprintln!("  Clear failed: {}", e),
                    }
                } else {
                    println!("  Cancelled.");
                }
            }
            Command::Scan(target) => {
                let p = pipeline.clone();
                match tokio::task::spawn_blocking(move || p.scan(&target)).await {
                    Ok(Ok(report)) => println!("{}", report),
                    Ok(Err(e)) => eprintln!("  Scan failed: {}", e),
                    Err(e) => eprintln!("  Scan task failed: {}", e),
                }
            }
            Command::Geolocate(ip) => {
                let p = pipeline.clone();
                match tokio::task::spawn_blocking(move || p.geolocate(&ip)).await {
                    Ok(Ok(report)) => println!("{}", report),
                    Ok(Err(e)) => eprintln!("  Geolocation failed: {}", e),
                    Err(e) => eprintln!("  Geolocation task failed: {}", e),
                }
            }
            Command::Plugins => {
                for name in pipeline.plugin_names() {
                    println!("  - {}", name);
                }
            }
            Command::Analyze(text) => {
                if let Some(report) = analyze(&pipeline, text, None).await {
                    print_report(&report);
                }
            }
        }
    }
    println!("  Goodbye!");
}

async fn cmd_analyze(config: Config, args: &[String]) {
    if args.is_empty() {
        eprintln!("Usage: threatloop analyze <text...>");
        return;
    }
    let pipeline = match build_pipeline(config) {
        Some(p) => p,
        None => return,
    };
    if let Some(report) = analyze(&pipeline, args.join(" "), None).await {
        print_report(&report);
    }
}

async fn cmd_replay(config: Config, args: &[String]) {
    let file = match args.first() {
        Some(f) => f,
        None => {
            eprintln!("Usage: threatloop replay <file>");
            return;
        }
    };
    let source = match ReplaySource::open(file) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("  {}", e);
            return;
        }
    };

    let interval = Duration::from_millis(config.feed_interval_ms);
    let (tx, mut rx) = mpsc::channel(config.feed_buffer);
    let pipeline = match build_pipeline(config) {
        Some(p) => p,
        None => return,
    };

    println!("\n  Replaying {} (Ctrl+C to stop)", file);
    let feed = PayloadFeed::spawn_with_interval(source, interval, tx);
    let mut alerts = 0usize;

    loop {
        tokio::select! {
            item = rx.recv() => {
                let item = match item {
                    Some(item) => item,
                    None => break,
                };
                if let Some(report) = analyze(&pipeline, item.text, item.src_ip).await {
                    if matches!(&report, CommandReport::Analyzed(a) if a.alert) {
                        alerts += 1;
                    }
                    print_report(&report);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\n  Stopping feed...");
                feed.stop();
                break;
            }
        }
    }

    // A feed blocked on a full channel sees the close and ends
    rx.close();
    match feed.join().await {
        Ok(summary) => println!(
            "\n  Replay done: {} payloads, {} empty skipped, {} alerts",
            summary.sent, summary.skipped, alerts
        ),
        Err(e) => eprintln!("  Feed failed: {}", e),
    }
}

fn cmd_stats(config: Config) {
    if let Some(memory) = open_memory(&config) {
        print_stats(&memory);
    }
}

fn cmd_search(config: Config, args: &[String]) {
    if args.is_empty() {
        eprintln!("Usage: threatloop search <keyword>");
        return;
    }
    if let Some(memory) = open_memory(&config) {
        print_events(&memory.search_memory(&args.join(" ")));
    }
}

fn cmd_resanitize(config: Config) {
    if let Some(memory) = open_memory(&config) {
        match memory.resanitize() {
            Ok(n) => println!("  Rewrote {} records in {}", n, memory.path().display()),
            Err(e) => eprintln!("  Resanitize failed: {}", e),
        }
    }
}
