//! CLI binary for code2pdf.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConversionConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use code2pdf::{
    convert_to_file, diagnose_source, ConversionConfig, ConversionOutput,
    ConversionProgressCallback, Diagnosis, Outcome, ProgressCallback, Stage,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one spinner whose message follows the stage.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("code2pdf");
        bar.set_message("Starting…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: Stage) {
        self.bar.set_message(format!("{stage}…"));
    }

    fn on_fix_proposed(&self, diagnosis: &Diagnosis, _fixed_code: &str) {
        self.bar.println(format!(
            "  {} auto-fixed {} {}",
            yellow("⚠"),
            diagnosis.type_name,
            dim(&diagnosis.line.map(|l| format!("on line {l}")).unwrap_or_default()),
        ));
    }

    fn on_fallback(&self, diagnosis: &Diagnosis) {
        self.bar.println(format!("  {} {}", red("✗"), red(&diagnosis.to_string())));
    }

    fn on_conversion_complete(&self, _outcome: &Outcome, _filename: &str) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run a script, write whatever PDF it produces
  code2pdf report.py

  # Choose the output file
  code2pdf report.py -o out/report.pdf

  # Read from stdin, force 14pt text
  pbpaste | code2pdf - --font-size 14 --name notes

  # Only check the syntax (and show the proposed fix)
  code2pdf --check report.py

  # Machine-readable result
  code2pdf --json report.py

EXIT STATUS:
  0  the PDF came from your code (saved, printed, or auto-invoked)
  1  fatal error, no PDF written
  2  the PDF is an error report (see the diagnosis), or --check found a problem

ENVIRONMENT VARIABLES:
  CODE2PDF_PYTHON   Python interpreter to run code with (default: python3)
  CODE2PDF_*        Every flag below can also be set as CODE2PDF_<FLAG>
  RUST_LOG          Log filter, e.g. code2pdf=debug
"#;

/// Repair, run and harvest PDF output from pasted Python source.
#[derive(Parser, Debug)]
#[command(
    name = "code2pdf",
    version,
    about = "Repair, run and harvest PDF output from pasted Python source",
    long_about = "Run Python code that builds a PDF and save the result. Markdown fences and \
citation markers are stripped, common syntax slips are fixed automatically, printed output \
becomes a PDF when nothing is saved, and when everything fails you get a PDF error report \
with your code in it.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Source file, or `-` for stdin.
    input: String,

    /// Write the PDF here instead of `<name>.pdf` in the current directory.
    #[arg(short, long, env = "CODE2PDF_OUTPUT")]
    output: Option<PathBuf>,

    /// Download name for the PDF (`.pdf` appended if missing).
    #[arg(long, env = "CODE2PDF_NAME")]
    name: Option<String>,

    /// Font size in points, applied to recognised set_font calls.
    #[arg(long, env = "CODE2PDF_FONT_SIZE",
          value_parser = clap::value_parser!(u32).range(1..=400))]
    font_size: Option<u32>,

    /// Wall-clock limit for running the code, in seconds.
    #[arg(long, env = "CODE2PDF_TIMEOUT", default_value_t = 30,
          value_parser = clap::value_parser!(u64).range(1..))]
    timeout: u64,

    /// Python interpreter to run the code with.
    #[arg(long, env = "CODE2PDF_PYTHON")]
    python: Option<String>,

    /// Do not try to repair syntax errors.
    #[arg(long, env = "CODE2PDF_NO_AUTO_FIX")]
    no_auto_fix: bool,

    /// Do not call user functions when the code produces nothing.
    #[arg(long, env = "CODE2PDF_NO_AUTO_INVOKE")]
    no_auto_invoke: bool,

    /// Only check the code; print the diagnosis and proposed fix.
    #[arg(long)]
    check: bool,

    /// Print the result (or diagnosis) as JSON on stdout.
    #[arg(long, env = "CODE2PDF_JSON")]
    json: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "CODE2PDF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "CODE2PDF_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner provides the feedback in interactive mode; library INFO
    // logs would only tear it apart.
    let show_progress = !cli.quiet && !cli.json && !cli.check;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let source = read_source(&cli.input).await?;

    let progress_cb: Option<ProgressCallback> = if show_progress && !cli.verbose {
        Some(CliProgressCallback::new() as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Check-only mode ──────────────────────────────────────────────────
    if cli.check {
        let diagnosis = diagnose_source(&source, &config)
            .await
            .context("Check failed")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&diagnosis).context("Failed to serialise diagnosis")?
            );
        } else {
            match &diagnosis {
                None => println!("{} code compiles", green("✔")),
                Some(d) => print_diagnosis(d),
            }
        }
        return Ok(if diagnosis.is_some() {
            ExitCode::from(2)
        } else {
            ExitCode::SUCCESS
        });
    }

    // ── Run conversion ───────────────────────────────────────────────────
    let output_path = match &cli.output {
        Some(path) => path.clone(),
        None => PathBuf::from(output_file_name(&cli)),
    };
    let output = convert_to_file(&source, &output_path, &config)
        .await
        .context("Conversion failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else if !cli.quiet {
        print_summary(&output, &output_path);
    }

    Ok(if output.is_fallback() {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    })
}

/// Read the whole source from a file or stdin.
async fn read_source(input: &str) -> Result<String> {
    if input == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read source from stdin")?;
        return Ok(buf);
    }
    tokio::fs::read_to_string(input)
        .await
        .with_context(|| format!("Failed to read source from {input:?}"))
}

/// Where to write when `-o` is not given: `--name`, else the input's stem.
fn output_file_name(cli: &Cli) -> String {
    let stem = cli.name.clone().unwrap_or_else(|| {
        PathBuf::from(&cli.input)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| s != "-")
            .unwrap_or_else(|| "output".to_string())
    });
    code2pdf::output::download_name(&stem)
}

/// Map CLI args to `ConversionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let mut builder = ConversionConfig::builder()
        .timeout_secs(cli.timeout)
        .auto_fix(!cli.no_auto_fix)
        .auto_invoke(!cli.no_auto_invoke);

    if let Some(size) = cli.font_size {
        builder = builder.font_size(size);
    }
    if let Some(ref name) = cli.name {
        builder = builder.output_name(name.clone());
    }
    if let Some(ref python) = cli.python {
        builder = builder.python(python.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_diagnosis(d: &Diagnosis) {
    eprintln!("{} {}", red("✗"), bold(&d.to_string()));
    eprintln!("  {}", d.explanation);
    eprintln!("  {} {}", dim("→"), d.suggestion);
    if let Some(fix) = &d.proposed_fix {
        eprintln!("\n{}", dim("Proposed fix:"));
        for line in fix.lines() {
            eprintln!("  {line}");
        }
    }
}

fn print_summary(output: &ConversionOutput, path: &std::path::Path) {
    let how = match &output.outcome {
        Outcome::Saved => "saved by your code".to_string(),
        Outcome::FromStdout => "typeset from printed output".to_string(),
        Outcome::AutoInvoked { function } => format!("produced by calling {function}() (experimental)"),
        Outcome::Fallback => "error report".to_string(),
    };
    match (&output.diagnosis, &output.proposed_fix) {
        (Some(d), _) if output.is_fallback() => print_diagnosis(d),
        (diagnosis, Some(fix)) => {
            if let Some(d) = diagnosis {
                eprintln!("{} {}", yellow("⚠"), d);
            }
            eprintln!("{} ran an auto-fixed version of your code:", yellow("⚠"));
            for line in fix.lines() {
                eprintln!("  {}", dim(line));
            }
        }
        _ => {}
    }
    eprintln!(
        "{}  {}  {}ms  →  {}",
        if output.is_fallback() { red("✘") } else { green("✔") },
        how,
        output.stats.total_ms,
        bold(&path.display().to_string()),
    );
}
