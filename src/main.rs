#[macro_use]
extern crate diesel;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use actix_web::{middleware, web, App, HttpServer};
use clap::{Parser, Subcommand};

mod breaker;
mod cache;
mod config;
mod db;
mod error;
mod handlers;
mod models;
mod query;
mod schema;
mod seed;

use crate::cache::MenuCache;
use crate::config::Config;
use crate::error::CatalogError;
use crate::handlers::AppState;

#[derive(Parser, Debug)]
#[command(name = "maki-catalog", version, about = "Maki menu catalog service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API (default)
    Serve,
    /// Replace the catalog with fake data
    Seed {
        #[arg(long, default_value_t = 100)]
        ingredientes: usize,
        #[arg(long, default_value_t = 50)]
        makis: usize,
    },
    /// Dump the catalog as JSON lines
    Export {
        /// Output file, stdout when omitted
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

async fn serve(config: Config) -> Result<(), CatalogError> {
    let pool = db::build_pool(&config.database_url, config.pool_size)?;
    let redis_url = config.redis_url.clone();
    let cache = web::block(move || MenuCache::connect(redis_url.as_deref())).await?;

    let state = web::Data::new(AppState {
        pool,
        breaker: breaker::new_breaker(),
        cache,
        delete_policy: config.delete_policy,
    });

    log::info!(
        "starting HTTP server at http://{}:{} (delete policy: {:?})",
        config.host,
        config.port,
        config.delete_policy
    );

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(middleware::Logger::default())
            .configure(handlers::configure)
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await?;
    Ok(())
}

fn run_seed(config: &Config, ingredientes: usize, makis: usize) -> Result<(), CatalogError> {
    let pool = db::build_pool(&config.database_url, 1)?;
    let conn = pool.get()?;
    let inserted = seed::seed(&mut rand::thread_rng(), ingredientes, makis, &conn)?;
    log::info!("seeded catalog: inserted {} rows", inserted);
    Ok(())
}

fn run_export(config: &Config, output: Option<PathBuf>) -> Result<(), CatalogError> {
    let pool = db::build_pool(&config.database_url, 1)?;
    let conn = pool.get()?;
    let mut out: Box<dyn Write> = match &output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout())),
    };
    let lines = seed::export(&mut out, &conn)?;
    match output {
        Some(path) => log::info!("exported {} records to {}", lines, path.display()),
        None => log::info!("exported {} records", lines),
    }
    Ok(())
}

#[actix_web::main]
async fn main() -> Result<(), CatalogError> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Seed {
            ingredientes,
            makis,
        } => run_seed(&config, ingredientes, makis),
        Command::Export { output } => run_export(&config, output),
    }
}
