use channel_filter::components::ComplexityAnalyzer;
use channel_filter::{
    Config, FilterBatchResult, FilterEngine, FilterEvaluationContext, StatisticsSnapshot,
};
use clap::{Arg, Command};
use log::LevelFilter;
use std::process;

#[tokio::main]
async fn main() {
    let matches = Command::new("channel-filter")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Evaluate channel messages against prioritized block/allow/route/flag filters")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("channel-filter.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Compile every filter and report failures and regex risk")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("analyze")
                .long("analyze")
                .value_name("PATTERN")
                .help("Print the static complexity assessment for a regex")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("message")
                .short('m')
                .long("message")
                .value_name("TEXT")
                .help("Evaluate a single message")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("sender")
                .long("sender")
                .value_name("ID")
                .help("Sender identifier for --message")
                .default_value("cli"),
        )
        .arg(
            Arg::new("channel")
                .long("channel")
                .value_name("NAME")
                .help("Channel name for --message")
                .default_value("cli"),
        )
        .arg(
            Arg::new("messages-file")
                .long("messages-file")
                .value_name("FILE")
                .help("Evaluate one message per line (optionally `sender<TAB>text`)")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Print evaluation results as JSON")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(pattern) = matches.get_one::<String>("analyze") {
        print_complexity(pattern);
        return;
    }

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("channel-filter.yaml");

    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e:#}");
            process::exit(1);
        }
    };

    let engine = FilterEngine::with_settings(config.settings.clone());
    engine.load_filters(config.filters.clone());

    if matches.get_flag("test-config") {
        test_config(&engine, config.filters.len());
        return;
    }

    let as_json = matches.get_flag("json");

    if let Some(text) = matches.get_one::<String>("message") {
        let sender = matches
            .get_one::<String>("sender")
            .map(String::as_str)
            .unwrap_or("cli");
        let channel = matches
            .get_one::<String>("channel")
            .map(String::as_str)
            .unwrap_or("cli");

        let result = engine
            .evaluate_batch(FilterEvaluationContext::new(text.as_str(), sender, channel))
            .await;
        print_result(text, &result, as_json);
        return;
    }

    if let Some(path) = matches.get_one::<String>("messages-file") {
        if let Err(e) = evaluate_file(&engine, path, as_json).await {
            eprintln!("Error evaluating messages: {e:#}");
            process::exit(1);
        }
        return;
    }

    println!("Nothing to do. Try --message, --messages-file, --test-config or --help.");
}

fn load_config(path: &str) -> anyhow::Result<Config> {
    if std::path::Path::new(path).exists() {
        Config::from_file(path)
    } else {
        log::warn!("Configuration file '{path}' not found, using default configuration");
        Ok(Config::default())
    }
}

fn generate_default_config(path: &str) {
    let config = Config::default();
    match config.to_file(path) {
        Ok(()) => {
            println!("Default configuration written to: {path}");
            println!("Please edit the configuration file to suit your needs.");
        }
        Err(e) => {
            eprintln!("Error writing configuration file: {e:#}");
            process::exit(1);
        }
    }
}

fn print_complexity(pattern: &str) {
    let c = ComplexityAnalyzer::analyze(pattern);
    println!("Pattern: {pattern}");
    println!("  Backtracking:        {}", c.has_backtracking);
    println!("  Negative lookahead:  {}", c.has_negative_lookahead);
    println!("  Alternation:         {}", c.has_alternation);
    println!("  Catastrophic:        {}", c.is_catastrophic);
    println!("  Est. worst case:     {} ms", c.estimated_worst_case_ms);
    println!("  Safe for production: {}", c.safe_for_production);
}

fn test_config(engine: &FilterEngine, configured: usize) {
    println!("🔍 Testing configuration...");
    println!();

    let compiled = engine.compiled_filters();
    println!(
        "Active filters: {} ({} disabled)",
        compiled.len(),
        configured - compiled.len()
    );

    for (i, filter) in compiled.iter().enumerate() {
        let status = if filter.compiled { "ok" } else { "FAILED" };
        println!(
            "  {:>3}. [{:>4}] {} ({}, {}) -> {}",
            i + 1,
            filter.filter.priority,
            filter.filter.name,
            filter.filter.filter_type,
            filter.filter.action,
            status
        );
        if let Some(error) = &filter.compile_error {
            println!("       error: {error}");
        }
        if let Some(complexity) = &filter.complexity {
            if !complexity.safe_for_production || complexity.has_backtracking {
                println!(
                    "       warning: backtracking={} negative_lookahead={} (est. {} ms)",
                    complexity.has_backtracking,
                    complexity.has_negative_lookahead,
                    complexity.estimated_worst_case_ms
                );
            }
        }
    }

    let errors = engine.compile_errors();
    if errors.is_empty() {
        println!("✅ All filters compiled successfully.");
    } else {
        println!("❌ {} filter(s) failed to compile", errors.len());
        process::exit(1);
    }
}

fn print_result(message: &str, result: &FilterBatchResult, as_json: bool) {
    if as_json {
        match serde_json::to_string_pretty(result) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("Failed to serialize result: {e}"),
        }
        return;
    }

    println!("📨 {}", truncate_string(message, 60));
    println!(
        "   Decision: {} (matched: {}, {:.2} ms)",
        result.final_action, result.matched, result.execution_time_ms
    );
    if let Some(filter_id) = &result.blocked_by {
        println!("   Blocked by: {filter_id}");
    }
    if let Some(agent) = &result.routed_to {
        println!("   Routed to: {agent}");
    }
    for r in result.results.iter().filter(|r| r.matched) {
        println!("   • {} [{}]: {}", r.filter_name, r.action, r.reason);
    }
}

async fn evaluate_file(engine: &FilterEngine, path: &str, as_json: bool) -> anyhow::Result<()> {
    use anyhow::Context;

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read messages file: {path}"))?;

    let mut results = Vec::new();
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        let (sender, text) = line.split_once('\t').unwrap_or(("file", line));
        let result = engine
            .evaluate_batch(FilterEvaluationContext::new(text, sender, "file"))
            .await;
        if as_json {
            results.push(result);
        } else {
            print_result(text, &result, false);
        }
    }

    let stats = engine.statistics();

    // One document on stdout so the output stays machine-readable.
    if as_json {
        let report = file_report(&results, &stats, &engine.circuit_breaker().open_filters());
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    println!("📊 Statistics");
    println!("═══════════════════════════════════════");
    println!("  Messages:       {}", stats.global.total_messages);
    println!("  ├─ Blocked:     {}", stats.global.blocked);
    println!("  ├─ Routed:      {}", stats.global.routed);
    println!("  ├─ Allowed:     {}", stats.global.allowed);
    println!("  └─ No matches:  {}", stats.global.no_filter_matches);
    println!("  Timeouts:       {}", stats.global.timeouts);
    println!("  Breaker skips:  {}", stats.global.skipped_open_breaker);

    for s in stats.filters.iter().take(20) {
        println!(
            "  {:<40} matches={:>5} block={:>4} route={:>4} flag={:>4} fail={:>3}",
            truncate_string(&s.filter_id, 40),
            s.matches,
            s.blocks,
            s.routes,
            s.flags,
            s.failures
        );
    }

    let ids: Vec<String> = engine.get_filters().into_iter().map(|f| f.id).collect();
    let unmatched = engine.statistics_collector().unmatched_filters(&ids);
    if !unmatched.is_empty() {
        println!("  Never matched: {}", unmatched.join(", "));
    }

    let open = engine.circuit_breaker().open_filters();
    if !open.is_empty() {
        println!("  Circuit breaker open: {}", open.join(", "));
    }

    Ok(())
}

fn file_report(
    results: &[FilterBatchResult],
    stats: &StatisticsSnapshot,
    open_breakers: &[String],
) -> serde_json::Value {
    serde_json::json!({
        "results": results,
        "statistics": stats,
        "open_circuit_breakers": open_breakers,
    })
}

fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
