use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::*;
use log::info;
use std::io::Write;
use std::path::Path;
use std::process;
use std::sync::Arc;
use tokio::sync::mpsc;

use sondar_core::fuzzer::{generate, CommandRunner, Flow, FuzzConfig, FuzzingSpec, PayloadSink};
use sondar_core::report::write_report;
use sondar_core::{
    ConsoleSink, HttpClient, HttpRequest, ResultAggregator, ScanConfig, ScanEngine, ScanResult,
    SinkRef,
};

#[derive(Parser, Debug)]
#[command(
    name = "sondar",
    version,
    about = "Injection scanner and grammar-based payload fuzzer",
    after_help = "\x1b[1;36mEXAMPLES:\x1b[0m
  Query/path scan:                sondar scan \"http://target.test/search?q=1\" --vectors vectors.json
  Headers too, HTML report:       sondar scan \"http://target.test/\" --vectors vectors.json --scan-headers -o report.html
  Saved request, host override:   sondar scan -i request.txt --host staging.test --scheme https -p payloads.txt
  Through a proxy (Burp):         sondar scan \"http://target.test/\" -p payloads.txt --proxy http://127.0.0.1:8080
  Dry run:                        sondar scan \"http://target.test/a?b=1\" --vectors vectors.json --dry-run
  Print payloads:                 sondar fuzz -i fuzzinginput.json --print
  Drive a command:                sondar fuzz -i fuzzinginput.json --placeholder FUZZ -- curl -s \"http://target.test/?q=FUZZ\""
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Mutate a baseline request and look for reflected payloads
    Scan(ScanArgs),
    /// Generate payloads from a fuzzing spec
    Fuzz(FuzzArgs),
}

#[derive(Args, Debug)]
struct ScanArgs {
    /// Baseline URL (sent as GET)
    url: Option<String>,

    #[arg(short = 'i', long, help = "Saved raw HTTP request used as the baseline")]
    input: Option<String>,

    #[arg(short = 'c', long, help = "JSON scan configuration; flags override it")]
    config: Option<String>,

    #[arg(long, help = "Override the baseline host (host or host:port)")]
    host: Option<String>,

    #[arg(long, value_parser = clap::builder::PossibleValuesParser::new(["http", "https"]),
        help = "Override the baseline scheme")]
    scheme: Option<String>,

    #[arg(long, help = "Attack-vector JSON file")]
    vectors: Option<String>,

    #[arg(short = 'p', long, help = "Add a list of payloads from a file")]
    payloads: Option<String>,

    #[arg(long, help = "Also inject into request headers")]
    scan_headers: bool,

    #[arg(long, help = "Directory for raw response bodies")]
    output_dir: Option<String>,

    #[arg(short = 'o', long, help = "Report file path")]
    report: Option<String>,

    #[arg(long, value_parser = clap::builder::PossibleValuesParser::new(["html", "csv", "json"]),
        help = "Report format (default: from the report file extension)")]
    format: Option<String>,

    #[arg(long, help = "Append every result to this JSONL file")]
    results: Option<String>,

    #[arg(long, help = "Request timeout in seconds")]
    timeout: Option<u64>,

    #[arg(long, help = "Proxy URL (e.g. http://127.0.0.1:8080)")]
    proxy: Option<String>,

    #[arg(short = 'H', long = "header", help = "Custom header (e.g. \"Authorization: Bearer TOKEN\")")]
    headers: Vec<String>,

    #[arg(long = "skip", help = "Skip a target descriptor (e.g. \"header cookie\")")]
    skip: Vec<String>,

    #[arg(long, help = "Stop after this many test cases")]
    max_test_cases: Option<usize>,

    #[arg(long, help = "Maximum rows in the report")]
    max_rows: Option<usize>,

    #[arg(short = 'v', long, help = "Show the whole process (Verbose Mode)")]
    verbose: bool,

    #[arg(long, help = "List test cases without sending requests")]
    dry_run: bool,
}

impl ScanArgs {
    /// Config file (if any) with every given flag layered on top.
    fn into_config(self) -> Result<ScanConfig> {
        let mut config = match &self.config {
            Some(path) => ScanConfig::load(path).with_context(|| format!("failed to load config '{}'", path))?,
            None => ScanConfig::default(),
        };

        if let Some(v) = self.url { config.url = v; }
        if let Some(v) = self.input { config.input = v; }
        if let Some(v) = self.host { config.host = v; }
        if let Some(v) = self.scheme { config.scheme = v; }
        if let Some(v) = self.vectors { config.vectors = v; }
        if let Some(v) = self.payloads { config.payloads = v; }
        if let Some(v) = self.output_dir { config.output_dir = v; }
        if let Some(v) = self.report { config.report = v; }
        if let Some(v) = self.format { config.format = v; }
        if let Some(v) = self.results { config.results = v; }
        if let Some(v) = self.timeout { config.timeout = v; }
        if let Some(v) = self.proxy { config.proxy = v; }
        if let Some(v) = self.max_test_cases { config.max_test_cases = v; }
        if let Some(v) = self.max_rows { config.max_rows = v; }
        config.headers.extend(self.headers);
        config.skip.extend(self.skip);
        config.scan_headers |= self.scan_headers;
        config.verbose |= self.verbose;
        config.dry_run |= self.dry_run;

        Ok(config)
    }
}

#[derive(Args, Debug)]
struct FuzzArgs {
    #[arg(short = 'i', long, help = "Fuzzing spec JSON [default: ./config/fuzzinginput.json]")]
    input: Option<String>,

    #[arg(short = 'c', long, help = "JSON fuzz configuration; flags override it")]
    config: Option<String>,

    #[arg(short = 'o', long, help = "File overwritten with each payload")]
    output: Option<String>,

    #[arg(long, alias = "param", help = "Text in the command replaced by each payload")]
    placeholder: Option<String>,

    #[arg(short = 'e', long, help = "Comma-separated encodings: none, url, percent, html")]
    encodings: Option<String>,

    #[arg(long, help = "Write payloads to stdout, one per line")]
    print: bool,

    #[arg(short = 'v', long, help = "Verbose logging")]
    verbose: bool,

    /// Command run once per payload (after `--`)
    #[arg(last = true)]
    command: Vec<String>,
}

impl FuzzArgs {
    fn into_config(self) -> Result<FuzzConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let data = std::fs::read_to_string(path).with_context(|| format!("failed to read '{}'", path))?;
                serde_json::from_str::<FuzzConfig>(&data).with_context(|| format!("invalid fuzz config '{}'", path))?
            }
            None => FuzzConfig::default(),
        };

        if let Some(v) = self.input { config.input = v; }
        if let Some(v) = self.output { config.output = v; }
        if let Some(v) = self.placeholder { config.placeholder = v; }
        if let Some(v) = self.encodings { config.encodings = v; }
        if !self.command.is_empty() {
            config.command = self.command;
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Scan(args) => {
            print_banner();
            run_scan(args).await
        }
        Commands::Fuzz(args) => run_fuzz(args),
    };

    if let Err(e) = outcome {
        eprint!("{}\r\n", format!("[!] {:#}", e).red());
        process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose { "warn,sondar=debug,sondar_core=debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp(None)
        .init();
}

/// Prints the sondar ASCII banner.
fn print_banner() {
    let banner = r#"
   ___  ___  _ __   __| | __ _ _ __
  / __|/ _ \| '_ \ / _` |/ _` | '__|
  \__ \ (_) | | | | (_| | (_| | |
  |___/\___/|_| |_|\__,_|\__,_|_|
    "#;
    print!("{}\r\n", banner.bright_cyan().bold());
    print!("{}\r\n", "──────────────────────────────────────────────────".dimmed());
    std::io::stdout().flush().ok();
}

/// Runs one scan:
///   1. Load and validate the configuration, baseline and vector catalog.
///   2. Enumerate test cases (dry run stops here).
///   3. Execute them sequentially while the aggregator collects results.
///   4. Print the summary and write the report.
async fn run_scan(args: ScanArgs) -> Result<()> {
    let config = args.into_config()?;
    init_logging(config.verbose);
    config.validate()?;

    let sink = ConsoleSink::new_ref();

    let baseline = config.load_baseline().context("failed to load the baseline request")?;
    let catalog = config.load_catalog().context("failed to load attack vectors")?;
    if catalog.is_empty() {
        sink.on_log("warn", "[!] Vector catalog is empty; only the baseline will be sent.");
    }

    let client = Arc::new(HttpClient::new(config.timeout, config.proxy_ref(), &[])?);
    let engine = ScanEngine::new(client, config.scan_options(), Arc::clone(&sink))
        .with_filter(config.case_filter());

    if config.dry_run {
        let strategies = engine.strategies();
        let mut count = 0;
        for outcome in engine.plan(&strategies, &baseline, &catalog) {
            match outcome {
                Ok(case) => println!("[DRY RUN] {} {}", case.target(), case.request.display_url()),
                Err(failure) => println!("[DRY RUN] {} (skipped: {})", failure.point, failure.error),
            }
            count += 1;
        }
        println!("[DRY RUN] {} test case(s) would be sent", count);
        return Ok(());
    }

    print_scan_config(&config, &baseline, catalog.len());

    let (result_tx, result_rx) = mpsc::channel::<ScanResult>(100);
    let jsonl = (!config.results.is_empty()).then(|| Path::new(&config.results));

    let (_, results) = tokio::join!(
        engine.run(&baseline, &catalog, result_tx),
        ResultAggregator::run(result_rx, jsonl, Arc::clone(&sink))
    );
    info!("Collected {} result(s)", results.len());

    ResultAggregator::report_summary(&results, &sink);
    write_scan_report(&config, &results, &sink)
}

fn write_scan_report(config: &ScanConfig, results: &[ScanResult], sink: &SinkRef) -> Result<()> {
    let Some(format) = config.report_format()? else {
        return Ok(());
    };
    let rows = write_report(Path::new(&config.report), results, format, &config.report_options())
        .context("failed to write the report")?;
    sink.on_log(
        "success",
        &format!("[+] {} report written to {} ({} row(s))", format.extension().to_uppercase(), config.report, rows),
    );
    Ok(())
}

/// Prints the scan configuration summary.
fn print_scan_config(config: &ScanConfig, baseline: &HttpRequest, vectors: usize) {
    let headers_label = if config.scan_headers { "ON" } else { "OFF" };

    print!("{}\r\n", format!("[+] Target:     {} {}", baseline.method, baseline.display_url()).green().bold());
    print!("{}\r\n", format!("[+] Vectors:    {}", vectors).blue());
    print!("{}\r\n", format!("[+] Timeout:    {}s", config.timeout).blue());
    print!("{}\r\n", format!("[+] Headers:    {}", headers_label).magenta());
    if config.max_test_cases > 0 {
        print!("{}\r\n", format!("[+] Max cases:  {}", config.max_test_cases).blue());
    }
    if let Some(proxy) = config.proxy_ref() {
        print!("{}\r\n", format!("[+] Proxy:      {}", proxy).yellow());
    }
    if !config.headers.is_empty() {
        print!("{}\r\n", format!("[+] Custom:     {} header(s)", config.headers.len()).yellow());
    }
    if !config.output_dir.is_empty() {
        print!("{}\r\n", format!("[+] Bodies:     {}", config.output_dir).blue());
    }
    if !config.report.is_empty() {
        print!("{}\r\n", format!("[+] Report:     {}", config.report).blue());
    }
    print!("{}\r\n", "──────────────────────────────────────────────────".dimmed());
    std::io::stdout().flush().ok();
}

/// Generates payloads into the output file, the command and/or stdout.
/// Without an output file or command, payloads are printed.
fn run_fuzz(args: FuzzArgs) -> Result<()> {
    init_logging(args.verbose);
    let print = args.print;
    let config = args.into_config()?;

    let spec = FuzzingSpec::load(&config.input)
        .with_context(|| format!("failed to load fuzzing spec '{}'", config.input))?;
    let encodings = config.encoding_list()?;
    let print = print || (config.output.is_empty() && !config.runs_command());

    let mut runner = CommandRunner::new(&config)?;
    let mut stdout = std::io::stdout().lock();

    let delivered = generate(&spec, &encodings, &mut |payload: &[u8]| {
        if print && stdout.write_all(payload).and_then(|_| stdout.write_all(b"\n")).is_err() {
            return Flow::Stop;
        }
        runner.accept(payload)
    })?;

    stdout.flush().ok();
    info!("Generated {} payload(s), {} command run(s)", delivered, runner.runs());
    Ok(())
}
