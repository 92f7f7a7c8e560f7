use ecommerce_agent::config::AgentConfig;
use ecommerce_agent::ingest::{ecommerce_sources, ingest};
use ecommerce_agent::llm::GeminiClient;
use ecommerce_agent::pipeline::Pipeline;
use ecommerce_agent::server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ecommerce-agent")]
#[command(about = "Answers e-commerce sales and ad questions by generating and running SQL")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve POST /ask and GET / over HTTP
    Serve {
        /// Listen address (overrides AGENT_BIND_ADDR)
        #[arg(long)]
        addr: Option<String>,
    },
    /// Answer one question and print the event stream
    Ask {
        /// The question in natural language
        question: String,
    },
    /// Build the SQLite store from the three CSV exports
    Ingest {
        /// Database file to (re)create
        #[arg(long, default_value = "ecommerce.db")]
        db: PathBuf,

        /// Product-level eligibility CSV
        #[arg(long)]
        eligibility: PathBuf,

        /// Product-level ad sales and metrics CSV
        #[arg(long)]
        ad_sales: PathBuf,

        /// Product-level total sales and metrics CSV
        #[arg(long)]
        total_sales: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Serve { addr } => run_server(addr).await,
        Commands::Ask { question } => run_ask(question).await,
        Commands::Ingest { db, eligibility, ad_sales, total_sales } => {
            run_ingest(db, eligibility, ad_sales, total_sales)
        }
    }
}

async fn run_server(addr: Option<String>) -> Result<()> {
    let mut config = AgentConfig::from_env()?;
    if let Some(addr) = addr {
        config = config.with_bind_addr(addr);
    }
    info!(db = %config.db_path.display(), model = %config.model, "starting E-commerce AI Agent");
    let llm = Arc::new(GeminiClient::from_config(&config));
    server::serve(Arc::new(config), llm).await?;
    Ok(())
}

async fn run_ask(question: String) -> Result<()> {
    let config = AgentConfig::from_env()?;
    let llm = Arc::new(GeminiClient::from_config(&config));
    let pipeline = Pipeline::new(Arc::new(config), llm);

    let mut rx = pipeline.ask(question);
    while let Some(event) = rx.recv().await {
        let mut out = io::stdout().lock();
        out.write_all(event.to_frame()?.as_bytes())?;
        out.flush()?;
    }
    Ok(())
}

fn run_ingest(db: PathBuf, eligibility: PathBuf, ad_sales: PathBuf, total_sales: PathBuf) -> Result<()> {
    let report = ingest(&db, &ecommerce_sources(eligibility, ad_sales, total_sales))?;

    for table in &report.tables {
        println!("\nTable Name - {} ({} rows)", table.table, table.rows);
        for (name, ty) in &table.columns {
            println!("- {} ({})", name, ty);
        }
    }
    for table in &report.skipped {
        println!("\nSkipped table {}", table);
    }
    println!("\nDB Setup Completed");
    Ok(())
}
