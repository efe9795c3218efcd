use std::error::Error;
use std::io::Write;

use clap::ArgMatches;
use satflow_core::adhoc;
use satflow_core::config::{BlobStoreSettings, RowStoreSettings, Settings, TableSettings};
use tracing::{error, info};

mod cmdline;
mod setup_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    setup_tracing::register();

    // Setup the CryptoProvider (controls core cryptography used by rustls) for the process
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("Installing default CryptoProvider");

    let matches = cmdline::root_cli().get_matches();
    if let Err(e) = run(matches).await {
        error!("{e}");
        return Err(e);
    }

    Ok(())
}

async fn run(matches: ArgMatches) -> Result<(), Box<dyn Error>> {
    match matches.subcommand() {
        Some(("run", _)) => {
            info!(version = env!("SATFLOW_VERSION_INFO"), "Starting satflow");
            let settings = Settings::load()?;
            satflow_core::pipeline::run(settings).await?;
            info!("Exiting...");
        }
        Some(("query", args)) => query(args).await?,
        Some(("archive", args)) => archive(args).await?,
        _ => return Err("unknown subcommand".into()),
    }
    Ok(())
}

async fn query(args: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let query = cmdline::geo_query(args)?;

    if args.get_flag("print-only") {
        let table = TableSettings::load()?;
        println!("{}", adhoc::build_query(&table, &query)?);
        return Ok(());
    }

    let settings = RowStoreSettings::load()?;
    let rows = adhoc::run_query(&settings, &query).await?;
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}

async fn archive(args: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let settings = BlobStoreSettings::load().ok_or("GCS_BUCKET_NAME is not set")?;

    match args.subcommand() {
        Some(("list", list)) => {
            let prefix = list.get_one::<String>("prefix").map(String::as_str);
            for key in adhoc::list_archive(&settings, prefix).await? {
                println!("{key}");
            }
        }
        Some(("get", get)) => {
            let key = get
                .get_one::<String>("key")
                .ok_or("object key is required")?;
            let content = adhoc::read_archive(&settings, key).await?;
            std::io::stdout().write_all(&content)?;
        }
        _ => return Err("unknown archive subcommand".into()),
    }
    Ok(())
}
