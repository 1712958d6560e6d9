use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use clap::{Parser, Subcommand};
use tokio::task::JoinSet;

use crate::{
    core::{
        registration::{load_tag_renderer, open_registry, run_registration_actor, Registrar, RegistrationActor},
        settings::Settings,
        storage::Storage,
        voucher::to_csv,
    },
    error::Error,
    photo::intake::{run_intake_sweeper, PhotoIntake},
};

mod actor;
mod core;
mod error;
mod integrations;
mod photo;
mod util;
mod web;

/// Shared handles passed to every web handler
#[derive(Clone)]
pub struct Directory {
    pub registration_actor: RegistrationActor,
    pub registrar: Arc<Registrar>,
    pub intake: Arc<PhotoIntake>,
    pub storage: Arc<Storage>,
    pub settings: Arc<Settings>,
}

#[derive(Parser, Debug)]
#[command(name = "registrar")]
#[command(version = "0.1")]
#[command(about = "Registration back end for the diocesan youth convention.", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: RunType,
}

#[derive(Subcommand, Debug)]
enum RunType {
    /// Create a settings file with every option at its default.
    /// The file will need to be edited to fill in the gateway keys and admin token.
    Init { settings_file: PathBuf },

    /// Run the registration server.
    Run {
        /// Location of the settings file.
        #[arg(short, long, default_value = "settings.json")]
        settings: PathBuf,
    },

    /// Generate a batch of voucher codes without starting the server.
    Vouchers {
        /// Location of the settings file.
        #[arg(short, long)]
        settings: PathBuf,

        #[arg(short, long)]
        count: usize,

        #[arg(short, long, default_value_t = 8)]
        length: usize,

        /// Write the codes to this CSV file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn load_settings(path: &Path) -> Result<Settings, Error> {
    let text = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Cannot read {}: {}", path.display(), e)))?;
    Ok(serde_json::from_str(&text)?)
}

async fn build_registrar(
    settings: Arc<Settings>,
    client: reqwest::Client,
) -> anyhow::Result<(Arc<Registrar>, Arc<Storage>)> {
    let (db, storage) = open_registry(&settings).await?;
    let gateway = integrations::payment_gateway(&settings, client);
    if gateway.is_none() {
        log::warn!("No payment gateway configured, online checkout is disabled");
    }
    let tags = load_tag_renderer(&settings)?;

    let registrar = Registrar::new(db, storage.clone(), gateway, tags, settings);
    Ok((Arc::new(registrar), storage))
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    let settings = Arc::new(settings);
    let client = reqwest::Client::builder()
        .timeout(settings.network_timeout())
        .build()?;

    let detector = integrations::face_detector(&settings, client.clone())?;
    let intake = Arc::new(PhotoIntake::new(
        detector,
        settings.network_timeout(),
        settings.photo_slot_ttl(),
    ));

    let (registrar, storage) = build_registrar(settings.clone(), client).await?;

    let mut tasks: JoinSet<anyhow::Result<()>> = JoinSet::new();

    let (registration_actor, rx) = RegistrationActor::new();
    tasks.spawn(run_registration_actor(registrar.clone(), rx));

    tasks.spawn(run_intake_sweeper(intake.clone(), Duration::from_secs(60)));

    let directory = Directory {
        registration_actor,
        registrar,
        intake,
        storage,
        settings,
    };
    tasks.spawn(web::run_http_server(directory));

    log::info!("Registrar initialized");

    while let Some(res) = tasks.join_next().await {
        res??;
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    match args.command {
        RunType::Init { settings_file } => {
            let settings = Settings::default();
            fs::write(&settings_file, serde_json::to_string_pretty(&settings)?)?;

            println!("Settings created, please open the file in a text editor and fill in the missing fields.");
            Ok(())
        }
        RunType::Run { settings } => run(load_settings(&settings)?).await,
        RunType::Vouchers {
            settings,
            count,
            length,
            output,
        } => {
            let settings = Arc::new(load_settings(&settings)?);
            let (registrar, _) = build_registrar(settings, reqwest::Client::new()).await?;
            let codes = registrar.generate_vouchers(count, length).await?;

            match output {
                Some(path) => {
                    fs::write(&path, to_csv(&codes))?;
                    println!("Wrote {} codes to {}", codes.len(), path.display());
                }
                None => print!("{}", to_csv(&codes)),
            }
            Ok(())
        }
    }
}
