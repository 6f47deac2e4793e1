// Contest proctoring CLI validation tool
// Talks to the contest server's proctoring endpoints directly and runs validation scenarios against them

use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::{Parser, Subcommand};
use colored::*;
use tokio::time::{sleep, Duration};

use contest_proctor::config::MonitorConfig;
use contest_proctor::media::{ReplayCamera, SinkDirectory};
use contest_proctor::presenter;
use contest_proctor::proctoring::{
    HttpEvaluator, MonitorResponse, ProctoringSession, SessionEvent, ViolationEvaluator,
};

#[derive(Parser)]
#[command(name = "proctor-cli")]
#[command(about = "Contest proctoring CLI validation tool", long_about = None)]
struct Cli {
    /// Contest server URL (default: http://127.0.0.1:8000)
    #[arg(short, long, default_value = "http://127.0.0.1:8000")]
    server: String,

    /// Contest ID
    #[arg(short, long, default_value = "1")]
    contest: String,

    /// Anti-forgery token sent as X-CSRFToken
    #[arg(short = 't', long, default_value = "cli-token")]
    csrf: String,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start proctoring for the contest
    Start,

    /// Show advisory proctoring status
    Status,

    /// Submit one JPEG for face detection
    Check {
        /// Path to a JPEG image
        #[arg(short, long)]
        image: PathBuf,
    },

    /// Terminate the contest attempt (operator testing)
    Terminate,

    /// Poll status until the contest terminates (press Ctrl+C to exit)
    Watch {
        /// Poll interval in seconds
        #[arg(short, long, default_value_t = 3)]
        interval: u64,
    },

    /// Run automated validation scenarios
    Validate {
        /// Run all validation tests
        #[arg(short, long)]
        all: bool,

        /// Test specific scenario
        #[arg(short, long)]
        scenario: Option<String>,

        /// Directory of JPEG frames for the session scenario
        #[arg(short, long, default_value = "./frames")]
        frames: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let evaluator = match HttpEvaluator::new(&cli.server, Duration::from_secs(cli.timeout_secs)) {
        Ok(evaluator) => evaluator,
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            return;
        }
    };
    let target = Target {
        evaluator: Arc::new(evaluator),
        contest: cli.contest.clone(),
        csrf: cli.csrf.clone(),
    };

    match &cli.command {
        Commands::Start => start(&target).await,
        Commands::Status => status(&target).await,
        Commands::Check { image } => check(&target, image).await,
        Commands::Terminate => terminate(&target).await,
        Commands::Watch { interval } => watch(&target, *interval).await,
        Commands::Validate {
            all,
            scenario,
            frames,
        } => {
            if *all {
                run_all_validations(&target, frames).await;
            } else if let Some(s) = scenario {
                run_scenario(&target, frames, s).await;
            } else {
                println!("{}", "Use --all or --scenario <name>".yellow());
                list_scenarios();
            }
        }
    }
}

struct Target {
    evaluator: Arc<HttpEvaluator>,
    contest: String,
    csrf: String,
}

async fn start(target: &Target) {
    println!("{}", "Starting proctoring...".cyan());
    println!("  URL: {}", target.evaluator.endpoint(&target.contest, "start"));

    match target
        .evaluator
        .start_session(&target.contest, &target.csrf)
        .await
    {
        Ok(resp) if resp.success => {
            println!("{} Proctoring started", "✓".green());
            if let Some(message) = resp.message {
                println!("  Message: {}", message);
            }
        }
        Ok(resp) => {
            println!(
                "{} Server declined: {}",
                "✗".red(),
                resp.message.unwrap_or_else(|| "no message".to_string())
            );
        }
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            println!("  Make sure the contest server is running at {}", target.evaluator.base_url());
        }
    }
}

async fn status(target: &Target) {
    println!("{}", "Fetching proctoring status...".cyan());

    match target.evaluator.status(&target.contest).await {
        Ok(status) => {
            println!("{} Status endpoint accessible", "✓".green());
            println!("  Monitoring active: {}", status.monitoring_active);
            println!("  Violations: {}", status.violation_count);
            println!("  Warnings: {}", status.warning_count);
            println!("  Terminated: {}", status.contest_terminated);
            println!("  Can continue: {}", status.can_continue);
            if let Some(last) = status.last_face_check {
                println!("  Last face check: {}", last);
            }
        }
        Err(e) => println!("{} {}", "✗".red(), e),
    }
}

async fn check(target: &Target, image: &Path) {
    println!("{}", "Submitting frame for face detection...".cyan());
    println!("  Image: {}", image.display());

    let data_url = match read_data_url(image).await {
        Ok(url) => url,
        Err(e) => {
            println!("{} Cannot read image: {}", "✗".red(), e);
            return;
        }
    };

    match target
        .evaluator
        .evaluate_frame(&target.contest, &target.csrf, &data_url)
        .await
    {
        Ok(verdict) => print_verdict(&verdict),
        Err(e) => println!("{} {}", "✗".red(), e),
    }
}

async fn terminate(target: &Target) {
    println!("{}", "Terminating contest attempt...".cyan());
    println!("  Contest: {}", urlencoding::encode(&target.contest));

    match target
        .evaluator
        .terminate(&target.contest, &target.csrf)
        .await
    {
        Ok(resp) => {
            let mark = if resp.success { "✓".green() } else { "✗".red() };
            println!("{} Terminated: {}", mark, resp.contest_terminated);
            if let Some(message) = resp.message {
                println!("  Message: {}", message);
            }
        }
        Err(e) => println!("{} {}", "✗".red(), e),
    }
}

async fn watch(target: &Target, interval: u64) {
    println!(
        "{}",
        format!("Watching contest {} (Ctrl+C to exit)...", target.contest).cyan()
    );
    let period = Duration::from_secs(interval.max(1));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\n{}", "Stopped watching".yellow());
                return;
            }
            _ = sleep(period) => {}
        }

        match target.evaluator.status(&target.contest).await {
            Ok(status) => {
                println!(
                    "  active={} violations={} warnings={} terminated={}",
                    status.monitoring_active,
                    status.violation_count,
                    status.warning_count,
                    status.contest_terminated
                );
                if status.contest_terminated {
                    println!("{} Contest terminated", "■".red());
                    return;
                }
            }
            Err(e) => println!("{} {}", "✗".red(), e),
        }
    }
}

fn print_verdict(verdict: &MonitorResponse) {
    let mark = if verdict.face_detected { "✓".green() } else { "✗".yellow() };
    println!("{} Face detected: {}", mark, verdict.face_detected);
    if let Some(faces) = verdict.faces_count {
        println!("  Faces: {}", faces);
    }
    println!("  Violation added: {}", verdict.violation_added);
    if let Some(kind) = &verdict.violation_type {
        println!("  Violation type: {}", kind);
    }
    println!(
        "  Violations: {}  Warnings: {}",
        verdict.violation_count.unwrap_or(0),
        verdict.warning_count.unwrap_or(0)
    );
    if verdict.contest_terminated {
        println!("  {}", "Contest terminated".red().bold());
    }
    if let Some(message) = &verdict.message {
        println!("  Message: {}", message);
    }
    if let Some(error) = &verdict.error {
        println!("  {} {}", "Server error:".red(), error);
    }
}

async fn read_data_url(path: &Path) -> std::io::Result<String> {
    let bytes = tokio::fs::read(path).await?;
    Ok(format!("data:image/jpeg;base64,{}", STANDARD.encode(bytes)))
}

fn list_scenarios() {
    println!("\n{}", "Available Validation Scenarios:".bold());
    println!("\n{}", "Server endpoints:".bold().cyan());
    println!("  {} - Start proctoring on the server", "start".cyan());
    println!("  {} - Read advisory status", "status".cyan());
    println!("  {} - Submit a blank frame and parse the verdict", "monitor".cyan());
    println!("  {} - Start for a contest that does not exist (error handling)", "invalid-contest".cyan());
    println!("\n{}", "Client session:".bold().cyan());
    println!("  {} - Run a full proctoring session from replayed frames", "session".cyan());
    println!("\nExample: proctor-cli --contest 1 validate --scenario start");
    println!("Example: proctor-cli validate --scenario session --frames ./frames");
}

async fn run_scenario(target: &Target, frames: &Path, scenario: &str) {
    println!("\n{} Running scenario: {}", "▶".cyan(), scenario.bold());
    println!("{}", "─".repeat(60));

    let result = match scenario {
        "start" => validate_start(target).await,
        "status" => validate_status(target).await,
        "monitor" => validate_monitor(target).await,
        "invalid-contest" => validate_invalid_contest(target).await,
        "session" => validate_session(target, frames).await,
        _ => {
            println!("{} Unknown scenario: {}", "✗".red(), scenario);
            list_scenarios();
            return;
        }
    };

    if result {
        println!("\n{} Scenario passed", "✓".green().bold());
    } else {
        println!("\n{} Scenario failed", "✗".red().bold());
    }
}

async fn run_all_validations(target: &Target, frames: &Path) {
    println!("\n{}", "Running All Validation Tests".bold().green());
    println!("{}\n", "═".repeat(60).green());

    let endpoint_scenarios = vec!["start", "status", "monitor", "invalid-contest"];

    let mut passed = 0;
    let mut failed = 0;
    let mut skipped = 0;

    println!("{}", "Server Endpoint Tests".bold().cyan());
    for scenario in endpoint_scenarios {
        println!("\n{} Testing: {}", "▶".cyan(), scenario.bold());
        println!("{}", "─".repeat(60));

        let result = match scenario {
            "start" => validate_start(target).await,
            "status" => validate_status(target).await,
            "monitor" => validate_monitor(target).await,
            "invalid-contest" => validate_invalid_contest(target).await,
            _ => false,
        };

        if result {
            passed += 1;
        } else {
            failed += 1;
        }

        sleep(Duration::from_millis(500)).await;
    }

    println!("\n{}", "Client Session Tests".bold().cyan());
    println!("\n{} Testing: {}", "▶".cyan(), "session".bold());
    println!("{}", "─".repeat(60));
    if frames.is_dir() {
        if validate_session(target, frames).await {
            passed += 1;
        } else {
            failed += 1;
        }
    } else {
        println!("{} No frames directory at {}", "○".yellow(), frames.display());
        skipped += 1;
    }

    println!("\n{}", "═".repeat(60).green());
    println!("{}", "Validation Summary".bold());
    println!("{}", "═".repeat(60).green());
    println!("  {} Passed: {}", "✓".green(), passed.to_string().green());
    println!("  {} Failed: {}", "✗".red(), failed.to_string().red());
    if skipped > 0 {
        println!("  {} Skipped (missing frames): {}", "○".yellow(), skipped.to_string().yellow());
    }
    println!("  Total: {}", passed + failed + skipped);

    if failed == 0 {
        println!("\n{}", "All validations passed! 🎉".green().bold());
    } else {
        println!("\n{}", "Some validations failed. Check output above.".yellow());
    }
}

async fn validate_start(target: &Target) -> bool {
    match target
        .evaluator
        .start_session(&target.contest, &target.csrf)
        .await
    {
        Ok(resp) if resp.success => {
            println!("{} Start accepted", "✓".green());
            if resp.monitoring_active == Some(true) {
                println!("{} Server reports monitoring active", "✓".green());
            }
            true
        }
        Ok(resp) => {
            println!(
                "{} Start rejected: {}",
                "✗".red(),
                resp.message.unwrap_or_default()
            );
            false
        }
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            false
        }
    }
}

async fn validate_status(target: &Target) -> bool {
    match target.evaluator.status(&target.contest).await {
        Ok(status) => {
            println!("{} Status parsed", "✓".green());
            println!(
                "  violations={} warnings={} terminated={}",
                status.violation_count, status.warning_count, status.contest_terminated
            );
            true
        }
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            false
        }
    }
}

async fn validate_monitor(target: &Target) -> bool {
    // Blank frame: the server should answer with a verdict, most likely "no face".
    let blank = format!("data:image/jpeg;base64,{}", STANDARD.encode([0xFFu8, 0xD8, 0xFF, 0xD9]));

    match target
        .evaluator
        .evaluate_frame(&target.contest, &target.csrf, &blank)
        .await
    {
        Ok(verdict) => {
            println!("{} Monitor endpoint returned a verdict", "✓".green());
            print_verdict(&verdict);
            true
        }
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            false
        }
    }
}

async fn validate_invalid_contest(target: &Target) -> bool {
    let bogus = format!("no-such-contest-{}", uuid::Uuid::new_v4());

    match target.evaluator.start_session(&bogus, &target.csrf).await {
        Ok(resp) if resp.success => {
            println!("{} Server accepted an unknown contest", "✗".red());
            false
        }
        Ok(_) => {
            println!("{} Unknown contest rejected (application flag)", "✓".green());
            true
        }
        Err(e) => {
            println!("{} Unknown contest rejected: {}", "✓".green(), e);
            true
        }
    }
}

async fn validate_session(target: &Target, frames: &Path) -> bool {
    let config = MonitorConfig {
        check_interval: Duration::from_secs(1),
        initial_check_delay: Duration::from_millis(500),
        ..MonitorConfig::default()
    };

    let session = match ProctoringSession::new(
        target.contest.clone(),
        target.csrf.clone(),
        config,
        target.evaluator.clone(),
        Arc::new(ReplayCamera::new(frames)),
        SinkDirectory::new(),
    ) {
        Ok(session) => session,
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            return false;
        }
    };

    let mut events = session.subscribe();
    if !session.start().await {
        println!(
            "{} Session did not start: {}",
            "✗".red(),
            session.last_error().unwrap_or_default()
        );
        return false;
    }
    println!("{} Session started", "✓".green());

    let mut started = false;
    let mut verdicts = 0;
    let deadline = sleep(Duration::from_secs(5));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.recv() => match event {
                Ok(event) => {
                    if let Some(text) = presenter::render(&event) {
                        println!("  {}", text);
                    }
                    match event {
                        SessionEvent::Started => started = true,
                        SessionEvent::Status { .. } if started => verdicts += 1,
                        SessionEvent::Terminated { .. } => break,
                        _ => {}
                    }
                }
                Err(_) => break,
            }
        }
    }

    session.stop();

    if verdicts > 0 {
        println!("{} Session processed {} sampling results", "✓".green(), verdicts);
        true
    } else {
        println!("{} No sampling results within 5s", "✗".red());
        false
    }
}
