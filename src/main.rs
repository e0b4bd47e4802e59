use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

use rds_broker::broker::{BrokerContext, BrokerSettings};
use rds_broker::config::Config;
use rds_broker::provider::RdsProviderAdapter;
use rds_broker::sql::DefaultSqlEngineFactory;
use rds_broker::{broker, housekeeping, osbapi, telemetry};

#[derive(Parser, Debug)]
#[command(author, version, about = "AWS RDS-backed Open Service Broker API implementation")]
struct Cli {
    /// Path to the broker's JSON config file.
    #[arg(long = "config", short = 'c')]
    config: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load config {:?}: {err}", cli.config);
            return ExitCode::FAILURE;
        }
    };

    telemetry::init(config.log_level);

    let catalog = match config.build_catalog() {
        Ok(catalog) => catalog,
        Err(err) => {
            error!(error = %err, "invalid catalog, refusing to start");
            return ExitCode::FAILURE;
        }
    };

    let provider = Arc::new(
        RdsProviderAdapter::new(&config.rds_config.region, std::time::Duration::from_secs(120)).await,
    );
    let sql_engines = Arc::new(DefaultSqlEngineFactory);
    let settings = BrokerSettings {
        broker_name: config.rds_config.broker_name.clone(),
        db_prefix: config.rds_config.db_prefix.clone(),
        master_password_seed: config.rds_config.master_password_seed.clone(),
        ..BrokerSettings::default()
    };
    let ctx = Arc::new(BrokerContext::new(
        Arc::new(catalog),
        provider,
        sql_engines,
        settings,
    ));

    info!("running startup credentials check");
    broker::run_credential_check(&ctx).await;

    if config.run_housekeeping {
        let schedule = config
            .cron_schedule
            .as_deref()
            .expect("validated at config load time");
        let schedule = housekeeping::parse_schedule(schedule).expect("validated at config load time");
        let keep_days = config
            .keep_snapshots_for_days
            .expect("validated at config load time");
        let housekeeping_ctx = ctx.clone();
        tokio::spawn(async move {
            housekeeping::run(&housekeeping_ctx, &schedule, keep_days).await;
        });
    }

    let state = osbapi::AppState {
        ctx,
        username: config.username.clone(),
        password: config.password.clone(),
    };

    info!(port = config.port, "starting OSBAPI server");
    match osbapi::serve(state, config.port).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "server failed to bind or run");
            ExitCode::FAILURE
        }
    }
}
