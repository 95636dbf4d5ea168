use std::{path::PathBuf, process::ExitCode, time::Duration};

use clap::Parser;
use hvm_authz::{
    Authorizer, AuthzError, Config, Entitlement, EntityUrl, Identity, RequestContext,
    authz::reporter::{self, EntitlementReporter},
    config::DriverConfig,
    observability,
};

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Authorization engine for hypervisor control planes",
    long_about = None
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to config file (built-in defaults when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Check a single permission.
    ///
    /// Exits 0 when allowed, 1 when denied and 2 on error.
    Check {
        /// Caller as `<method>:<identifier>`, e.g. `tls:alice`
        #[arg(short, long)]
        identity: String,

        /// Identity provider group of the caller (repeatable)
        #[arg(long = "idp-group")]
        idp_groups: Vec<String>,

        /// Entity URL, e.g. `/1.0/networks/net1?project=demo`
        #[arg(short, long)]
        entity: String,

        /// Entitlement to check, e.g. `can_edit`
        #[arg(short = 'n', long)]
        entitlement: String,

        /// Give up after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// List the entitlements a caller holds on an entity.
    Entitlements {
        /// Caller as `<method>:<identifier>`
        #[arg(short, long)]
        identity: String,

        /// Identity provider group of the caller (repeatable)
        #[arg(long = "idp-group")]
        idp_groups: Vec<String>,

        /// Entity URL
        #[arg(short, long)]
        entity: String,

        /// Restrict the report to these entitlements (repeatable)
        #[arg(short = 'n', long = "entitlement")]
        entitlements: Vec<String>,
    },
    /// Validate the configuration and print a summary.
    Validate,
}

/// Exit status for failures other than a denial.
const EXIT_ERROR: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(args.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_ERROR);
        }
    };

    if let Err(e) = observability::init_tracing(&config.logging) {
        eprintln!("Warning: {}", e);
    }

    let authorizer = match Authorizer::from_config(&config.authorization) {
        Ok(authorizer) => authorizer,
        Err(e) => {
            eprintln!("Failed to initialize authorizer: {}", e);
            return ExitCode::from(EXIT_ERROR);
        }
    };

    match args.command {
        Command::Check {
            identity,
            idp_groups,
            entity,
            entitlement,
            timeout_ms,
        } => {
            run_check(
                &config,
                &authorizer,
                &identity,
                idp_groups,
                &entity,
                &entitlement,
                timeout_ms,
            )
            .await
        }
        Command::Entitlements {
            identity,
            idp_groups,
            entity,
            entitlements,
        } => {
            run_entitlements(
                &config,
                &authorizer,
                &identity,
                idp_groups,
                &entity,
                &entitlements,
            )
            .await
        }
        Command::Validate => run_validate(&config, &authorizer),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<Config, String> {
    match path {
        Some(path) => Config::from_file(path)
            .map_err(|e| format!("Failed to load config from {}: {}", path.display(), e)),
        None => Ok(Config::default()),
    }
}

/// Parse the caller and entity, and build a request context that carries the
/// effective projects of the entity's project.
fn prepare(
    config: &Config,
    identity: &str,
    idp_groups: Vec<String>,
    entity: &str,
    timeout: Option<Duration>,
) -> Result<(RequestContext, EntityUrl), AuthzError> {
    let identity = Identity::parse_key(identity)?.with_idp_groups(idp_groups);
    let entity = EntityUrl::parse(entity)?;
    let project = entity.project().to_string();
    let mut builder = RequestContext::builder(identity)
        .with_project_features(&project, &config.project_features(&project));
    if let Some(timeout) = timeout {
        builder = builder.with_timeout(timeout);
    }
    Ok((builder.build(), entity))
}

async fn run_check(
    config: &Config,
    authorizer: &Authorizer,
    identity: &str,
    idp_groups: Vec<String>,
    entity: &str,
    entitlement: &str,
    timeout_ms: Option<u64>,
) -> ExitCode {
    let entitlement: Entitlement = match entitlement.parse() {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_ERROR);
        }
    };

    let timeout = timeout_ms.map(Duration::from_millis);
    let (ctx, entity) = match prepare(config, identity, idp_groups, entity, timeout) {
        Ok(prepared) => prepared,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_ERROR);
        }
    };

    match authorizer.check_permission(&ctx, &entity, entitlement).await {
        Ok(()) => {
            println!("allowed");
            ExitCode::SUCCESS
        }
        Err(AuthzError::NotFound) => {
            println!("denied: not found");
            ExitCode::FAILURE
        }
        Err(AuthzError::Forbidden) => {
            println!("denied: forbidden");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

/// Collects reported entitlements for printing.
#[derive(Debug, Default)]
struct Report {
    entitlements: Option<Vec<String>>,
}

impl EntitlementReporter for Report {
    fn report_entitlements(&mut self, entitlements: Vec<String>) {
        self.entitlements = Some(entitlements);
    }
}

async fn run_entitlements(
    config: &Config,
    authorizer: &Authorizer,
    identity: &str,
    idp_groups: Vec<String>,
    entity: &str,
    entitlements: &[String],
) -> ExitCode {
    let requested = match entitlements
        .iter()
        .map(|e| e.parse::<Entitlement>())
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(requested) => requested,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_ERROR);
        }
    };

    let (ctx, entity) = match prepare(config, identity, idp_groups, entity, None) {
        Ok(prepared) => prepared,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_ERROR);
        }
    };

    let mut report = Report::default();
    reporter::report_entitlements(authorizer, &ctx, &entity, &requested, &mut report).await;

    match report.entitlements {
        Some(entitlements) => {
            for entitlement in entitlements {
                println!("{}", entitlement);
            }
            ExitCode::SUCCESS
        }
        None => {
            eprintln!("Error: failed to compute entitlements for {}", entity);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn run_validate(config: &Config, authorizer: &Authorizer) -> ExitCode {
    println!("Configuration OK");
    println!("  Driver:   {}", authorizer.driver_name());
    if let DriverConfig::Rbac(rbac) = &config.authorization.driver {
        println!("  Groups:   {}", rbac.groups.len());
    }
    println!("  Projects: {}", config.projects.len());
    ExitCode::SUCCESS
}
