mod renderer;
mod settings;

use std::sync::Arc;

use anyhow::Context as _;
use regex::Regex;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing::info;

use postconfirm_challenge::{ChallengeHandler, StoreChallengeHandler};
use postconfirm_milter::AppContext;
use postconfirm_remailer::Remailer;
use postconfirm_settings::AppConfig;
use postconfirm_store::{PgStore, Store};
use postconfirm_types::Address;
use postconfirm_validator::Validator;

use renderer::SimpleTemplateRenderer;
use settings::EnvSettings;

pub fn run() -> anyhow::Result<()> {
    info!("postconfirm starting up");
    let runtime = tokio::runtime::Runtime::new().context("starting the async runtime")?;
    runtime.block_on(serve())
}

async fn serve() -> anyhow::Result<()> {
    let app = build_context().await.context("building application context")?;
    let listener = TcpListener::bind(("0.0.0.0", app.config.milter_port))
        .await
        .context("binding the milter listener")?;
    postconfirm_milter::serve(listener, app).await
}

async fn build_context() -> anyhow::Result<Arc<AppContext>> {
    let config = AppConfig::load(&EnvSettings).context("loading configuration")?;

    let key = config.read_key().context("reading the HMAC key file")?;
    let validator = Validator::new(key);

    let mail_template_source =
        std::fs::read_to_string(&config.mail_template).context("reading the mail template")?;

    let bulk_regex = Regex::new(&config.bulk_regex).context("compiling bulk_regex")?;
    let auto_submitted_regex =
        Regex::new(&config.auto_submitted_regex).context("compiling auto_submitted_regex")?;

    let db_url = format!(
        "postgres://{}:{}@{}:{}/{}",
        config.db.user, config.db.password, config.db.host, config.db.port, config.db.name
    );
    let pool = PgPoolOptions::new()
        .connect(&db_url)
        .await
        .context("connecting to the database")?;
    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));

    let challenge_handlers: Vec<Box<dyn ChallengeHandler>> =
        vec![Box::new(StoreChallengeHandler::new(store.clone()))];

    let remailer = Remailer::new(
        config.smtp_host.clone(),
        config.smtp_port,
        Address::new(&config.remail_sender),
    );

    Ok(Arc::new(AppContext {
        config,
        validator,
        store,
        challenge_handlers,
        remailer,
        renderer: Arc::new(SimpleTemplateRenderer),
        mail_template_source,
        bulk_regex,
        auto_submitted_regex,
    }))
}
