use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::rc::Rc;

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use remedy_core::{
    BoundedRetry, Context, Decision, ExecuteError, FnHandler, Handler, Registry, Verdict,
    execute_with,
};
use thiserror::Error;
use tracing::{info, warn};

mod config;

use config::{ConfigError, DemoConfig};

/// Call a flaky greeting service with retry and fallback handlers.
#[derive(Parser)]
#[command(name = "remedy")]
#[command(about = "Demo of prioritized error handlers around a flaky call", long_about = None)]
struct Cli {
    /// JSON config file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Name to greet
    #[arg(long, default_value = "remedy")]
    name: String,

    /// Timeouts before the service answers
    #[arg(long)]
    timeouts: Option<u32>,

    /// Total attempts allowed for timeouts
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Chance (0.0..=1.0) that a call is refused
    #[arg(long)]
    refuse_probability: Option<f64>,

    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Debug, Error)]
enum ServiceError {
    #[error("request timed out ({0} timeouts left)")]
    Timeout(u32),

    #[error("connection refused")]
    Refused,

    #[error("empty name")]
    EmptyName,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("greeting failed: {0}")]
    Service(#[from] ExecuteError<ServiceError>),
}

/// Fails with `Timeout` a fixed number of times, and refuses at random.
struct FlakyService {
    remaining_timeouts: Cell<u32>,
    refuse_probability: f64,
    rng: RefCell<StdRng>,
}

impl FlakyService {
    fn new(cfg: &DemoConfig) -> Self {
        Self {
            remaining_timeouts: Cell::new(cfg.timeouts),
            refuse_probability: cfg.refuse_probability,
            rng: RefCell::new(StdRng::seed_from_u64(cfg.seed)),
        }
    }

    fn greet(&self, name: &str) -> Result<String, ServiceError> {
        if name.is_empty() {
            return Err(ServiceError::EmptyName);
        }
        if self.rng.borrow_mut().gen_bool(self.refuse_probability) {
            return Err(ServiceError::Refused);
        }
        let left = self.remaining_timeouts.get();
        if left > 0 {
            self.remaining_timeouts.set(left - 1);
            return Err(ServiceError::Timeout(left - 1));
        }
        Ok(format!("Hello, {name}!"))
    }
}

/// Logs every error it sees and never decides, so the next handler runs.
struct Audit;

impl Handler<String, ServiceError> for Audit {
    fn name(&self) -> &str {
        "audit"
    }

    fn matches(&self, _error: &ServiceError) -> bool {
        true
    }

    fn handle(&self, decision: &mut Decision<String, ServiceError>) {
        let calls = decision.context_mut().increment("audited");
        warn!(
            error = %decision.error(),
            attempt = decision.attempt(),
            audited = calls,
            "greeting call failed"
        );
    }
}

thread_local! {
    static HANDLERS: Registry<String, ServiceError> = Registry::named("greeting");
}

fn load_config(cli: &Cli) -> Result<DemoConfig, ConfigError> {
    let mut cfg = match &cli.config {
        Some(path) => DemoConfig::load(path)?,
        None => DemoConfig::default(),
    };
    if let Some(timeouts) = cli.timeouts {
        cfg.timeouts = timeouts;
    }
    if let Some(max_attempts) = cli.max_attempts {
        cfg.retry.max_attempts = max_attempts;
    }
    if let Some(p) = cli.refuse_probability {
        cfg.refuse_probability = p;
    }
    if let Some(seed) = cli.seed {
        cfg.seed = seed;
    }
    cfg.validate()?;
    Ok(cfg)
}

fn install_handlers(registry: &Registry<String, ServiceError>, cfg: &DemoConfig) {
    let retry = BoundedRetry::new("retry_timeouts", cfg.retry, |e: &ServiceError| {
        matches!(e, ServiceError::Timeout(_))
    });
    registry.register_at(Rc::new(retry), 10);

    let cached = cfg.cached_value.clone();
    let fallback = FnHandler::new(
        "serve_from_cache",
        |e: &ServiceError| matches!(e, ServiceError::Refused),
        move |_, _| Some(Verdict::Continue(cached.clone())),
    );
    registry.register(Rc::new(fallback));
}

fn run(cli: Cli) -> Result<(), CliError> {
    let cfg = load_config(&cli)?;
    info!(?cfg, "starting demo");

    let service = FlakyService::new(&cfg);
    let context = Context::new().with("name", cli.name.as_str());

    let greeting = HANDLERS.with(|registry| {
        install_handlers(registry, &cfg);
        // audit only this call
        registry.with_handler_at(Rc::new(Audit), 0, || {
            execute_with(registry, context, || service.greet(&cli.name))
        })
    })?;

    println!("{greeting}");
    Ok(())
}

fn main() -> Result<(), CliError> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    run(Cli::parse())
}
