//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - initialises logging
//! - loads `Settings` once
//! - parses CLI arguments and applies them over the settings
//! - opens the store and runs the requested pipeline
//! - prints the report

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{CollectArgs, Command, ImportArgs, PredictArgs, TrainArgs};
use crate::config::Settings;
use crate::domain::Timestamp;
use crate::error::AppError;
use crate::store::Store;

pub mod pipeline;

/// Entry point for the `agri` binary.
pub fn run() -> Result<(), AppError> {
    init_tracing();

    let cli = crate::cli::Cli::parse();
    let settings = Settings::from_env()?;

    match cli.command {
        Command::Collect(args) => handle_collect(&settings, args),
        Command::Import(args) => handle_import(&settings, args),
        Command::Train(args) => handle_train(&settings, args),
        Command::Evaluate(args) => {
            let store = Store::open(&settings.database_path)?;
            let outcome = pipeline::evaluate(&settings, &store, &args.table)?;
            store.close()?;
            print!("{}", crate::report::format_eval(&outcome));
            Ok(())
        }
        Command::Predict(args) => handle_predict(&settings, args),
        Command::Show(args) => {
            let store = Store::open(&settings.database_path)?;
            let preview = pipeline::show(&store, &args.table, args.limit)?;
            store.close()?;
            print!("{}", crate::report::format_preview(&args.table, &preview));
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // A second init (tests, embedding) is harmless; keep the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn handle_collect(settings: &Settings, args: CollectArgs) -> Result<(), AppError> {
    let request = pipeline::CollectRequest {
        crop: args.crop.unwrap_or_else(|| settings.crop.clone()),
        country: args.country.unwrap_or_else(|| settings.country.clone()),
        element: args.element,
        start_year: args.start_year.unwrap_or(settings.start_year),
        end_year: args.end_year.unwrap_or(settings.end_year),
        table: args.table,
        mode: args.mode,
        cache: !args.no_cache,
    };
    if request.end_year < request.start_year {
        return Err(AppError::Config(format!(
            "--end-year ({}) is before --start-year ({}).",
            request.end_year, request.start_year
        )));
    }

    let mut store = Store::open(&settings.database_path)?;
    let outcome = pipeline::collect(settings, &mut store, &request)?;
    store.close()?;
    print!("{}", crate::report::format_collect(&outcome));
    Ok(())
}

fn handle_import(settings: &Settings, args: ImportArgs) -> Result<(), AppError> {
    if args.paths.len() > args.sources.len() {
        return Err(AppError::Config(format!(
            "{} --path values given for {} --source values.",
            args.paths.len(),
            args.sources.len()
        )));
    }

    let mut sources = Vec::with_capacity(args.sources.len());
    for (i, source) in args.sources.iter().enumerate() {
        let path = match args.paths.get(i) {
            Some(path) => path.clone(),
            None => source.default_path(settings).ok_or_else(|| {
                AppError::Config(format!("Source `{}` is not file-based; use `agri collect`.", source.name()))
            })?,
        };
        sources.push((*source, path));
    }

    let request = pipeline::ImportRequest {
        sources,
        element: args.element,
        table: args.table,
        mode: args.mode,
    };
    let mut store = Store::open(&settings.database_path)?;
    let outcome = pipeline::import(settings, &mut store, &request)?;
    store.close()?;
    print!("{}", crate::report::format_import(&outcome));
    Ok(())
}

fn handle_train(settings: &Settings, args: TrainArgs) -> Result<(), AppError> {
    let request = pipeline::TrainRequest {
        table: args.table,
        target: args.target,
        temporal: args.temporal,
        log_columns: args.log_columns,
        test_size: args.test_size.unwrap_or(settings.test_size),
        seed: args.seed.unwrap_or(settings.random_seed),
    };

    let store = Store::open(&settings.database_path)?;
    let outcome = pipeline::train(settings, &store, &request)?;
    store.close()?;
    print!("{}", crate::report::format_train(&outcome));
    Ok(())
}

fn handle_predict(settings: &Settings, args: PredictArgs) -> Result<(), AppError> {
    let timestamp = match (args.year, args.date) {
        (_, Some(date)) => Timestamp::Date(date),
        (Some(year), None) => Timestamp::Year(year),
        (None, None) => return Err(AppError::Config("Pass --year or --date.".to_string())),
    };
    let request = pipeline::PredictRequest {
        timestamp,
        group: args.groups,
        features: args.features,
    };
    let outcome = pipeline::predict(settings, &request)?;
    print!("{}", crate::report::format_prediction(&outcome));
    Ok(())
}
