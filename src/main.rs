use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;

use shotdiff::capture::{FileScreenshotProvider, ScreenComparator};
use shotdiff::config::AppConfig;
use shotdiff::utils::artifacts::ErrorArtifacts;
use shotdiff::{BrowserDescriptor, ComparisonReport, ImageComparator, Platform};

#[derive(Parser)]
#[command(name = "shotdiff")]
#[command(about = "Compare browser screenshots against reference images", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file to use instead of the default search path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare a screenshot file against its reference
    Compare {
        /// PNG screenshot to check
        screenshot: PathBuf,

        /// Reference id, or the full reference name when no browser is given
        reference: String,

        #[command(flatten)]
        browser: BrowserArgs,

        /// Allowed fraction of differing pixels (overrides config)
        #[arg(short, long)]
        tolerance: Option<f64>,

        /// Print the comparison report as JSON
        #[arg(long)]
        json: bool,

        /// Write error screenshots and diff images on failure
        #[arg(long)]
        save_artifacts: bool,
    },

    /// Print the reference name for an id and browser
    Name {
        reference_id: String,

        #[command(flatten)]
        browser: BrowserArgs,

        /// Print the name with its platform family and version as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the reference files a comparison would try, in order
    Candidates {
        reference: String,

        #[command(flatten)]
        browser: BrowserArgs,
    },

    /// Write a config file with the default settings
    InitConfig {
        #[arg(default_value = "config.ron")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Clone)]
struct BrowserArgs {
    /// Browser name as reported by the driver, e.g. "chrome"
    #[arg(short, long)]
    browser: Option<String>,

    /// Browser version, e.g. "120.0.6099.71"
    #[arg(long, default_value = "")]
    browser_version: String,

    /// Platform name, e.g. "linux" or "windows xp"
    #[arg(short, long, default_value = "any")]
    platform: String,
}

impl BrowserArgs {
    fn descriptor(&self) -> Option<BrowserDescriptor> {
        self.browser.as_ref().map(|name| {
            BrowserDescriptor::new(
                name.as_str(),
                self.browser_version.as_str(),
                Platform::from_driver_str(&self.platform),
            )
        })
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load(),
    };
    config.apply_env_overrides()?;

    let _guard = init_tracing(&config);

    match cli.command {
        Commands::Compare {
            screenshot,
            reference,
            browser,
            tolerance,
            json,
            save_artifacts,
        } => {
            if let Some(tolerance) = tolerance {
                config.screenshot_comparison_tolerance = tolerance;
                config.validate()?;
            }
            // A file on disk does not change between captures.
            config.max_screenshot_retries = 1;
            compare(&config, screenshot, &reference, &browser, json, save_artifacts)
        }
        Commands::Name {
            reference_id,
            browser,
            json,
        } => {
            let browser = browser.descriptor().unwrap_or_default();
            let comparator = ImageComparator::new(&config);
            let details = comparator.name_generator().describe(&reference_id, &browser);
            if json {
                println!("{}", serde_json::to_string_pretty(&details)?);
            } else {
                println!("{}", details.reference_name);
            }
            Ok(())
        }
        Commands::Candidates { reference, browser } => {
            let comparator = ImageComparator::new(&config);
            let resolver = comparator.resolver();
            let browser = browser.descriptor();
            let reference_name = match &browser {
                Some(browser) => comparator.name_generator().generate_name(&reference, browser),
                None => reference,
            };
            for candidate in resolver
                .resolve_candidates(&reference_name, browser.as_ref())
                .iter()
            {
                let marker = if resolver.exists(candidate) { "" } else { " (missing)" };
                println!("{}{}", resolver.reference_file(candidate).display(), marker);
            }
            Ok(())
        }
        Commands::InitConfig { path, force } => {
            if path.exists() && !force {
                bail!("{} already exists, use --force to overwrite", path.display());
            }
            AppConfig::default().save_to(&path)?;
            println!("Wrote {}", path.display());
            Ok(())
        }
    }
}

fn compare(
    config: &AppConfig,
    screenshot: PathBuf,
    reference: &str,
    browser: &BrowserArgs,
    json: bool,
    save_artifacts: bool,
) -> Result<()> {
    let mut screen = ScreenComparator::new(config);
    if save_artifacts {
        screen = screen.with_artifacts(ErrorArtifacts::new(config));
    }

    let result = match browser.descriptor() {
        Some(descriptor) => {
            let mut provider = FileScreenshotProvider::new(screenshot, descriptor);
            screen.compare_screen(&mut provider, reference)
        }
        None => {
            let captured = image::open(&screenshot)
                .with_context(|| format!("failed to open screenshot {}", screenshot.display()))?
                .to_rgba8();
            screen.comparator().compare_to_reference(
                &captured,
                reference,
                config.screenshot_comparison_tolerance,
                None,
            )
        }
    };

    match result {
        Ok(report) => {
            print_report(&report, json)?;
            Ok(())
        }
        Err(e) => {
            if json {
                let failure = serde_json::json!({
                    "matches": false,
                    "missing_reference": e.is_missing_reference(),
                    "error": e.to_string(),
                });
                println!("{}", serde_json::to_string_pretty(&failure)?);
            }
            Err(e.into())
        }
    }
}

fn print_report(report: &ComparisonReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!(
            "{} matches {} ({:.4}% of {} pixels differ, tolerance {:.4}%)",
            report.reference_name,
            report.matched_candidate,
            report.diff.mismatch_ratio * 100.0,
            report.diff.compared_pixels,
            report.tolerance * 100.0
        );
    }
    Ok(())
}

/// Log to a daily rolling file when a log directory is configured,
/// otherwise to stderr. `RUST_LOG` takes precedence over the config.
fn init_tracing(config: &AppConfig) -> Option<WorkerGuard> {
    let env_filter = match std::env::var("RUST_LOG") {
        Ok(_) => tracing_subscriber::EnvFilter::from_default_env(),
        Err(_) => tracing_subscriber::EnvFilter::new(config.logging.filter_directives()),
    };

    match config.logging.log_directory.as_deref() {
        Some(log_dir) => {
            let file_appender = tracing_appender::rolling::daily(log_dir, "shotdiff.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(non_blocking)
                .with_ansi(false)
                .compact()
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .compact()
                .init();
            None
        }
    }
}
