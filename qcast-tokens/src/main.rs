//! qcast-tokens - Renew the Graph API tokens Queuecast publishes with
//!
//! Prints `KEY=value` lines on stdout for the operator to store; nothing is
//! written to disk.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use libqueuecast::credentials::{env, Credentials};
use libqueuecast::logging::LoggingConfig;
use libqueuecast::platforms::graph::{
    exchange_user_token, instagram_account_for_page, list_pages, GraphClient,
    DEFAULT_GRAPH_BASE_URL,
};
use libqueuecast::transport::ReqwestTransport;
use libqueuecast::EnvCredentialSource;
use secrecy::ExposeSecret;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "qcast-tokens")]
#[command(version)]
#[command(about = "Renew the Facebook/Instagram tokens used by qcast-publish")]
#[command(long_about = "\
qcast-tokens - Renew the Facebook/Instagram tokens used by qcast-publish

DESCRIPTION:
    Exchanges a short-lived user token for a long-lived one (when given),
    finds the page token for the configured page and the Instagram business
    account linked to it, and prints the values as KEY=value lines:

        FB_LONG_LIVED_USER_TOKEN=...
        FB_PAGE_TOKEN=...
        IG_USER_ID=...
        IG_PAGE_TOKEN=...

    FB_APP_SECRET and FB_LONG_LIVED_USER_TOKEN are read from the environment
    (or a .env file) like qcast-publish does.

EXIT CODES:
    0 - Tokens printed
    1 - Lookup or exchange failed
")]
struct Cli {
    /// Short-lived user token to exchange (from the Graph API Explorer)
    #[arg(long, env = "FB_SHORT_LIVED_USER_TOKEN", hide_env_values = true)]
    short_token: Option<String>,

    /// App id, needed for the exchange
    #[arg(long, env = "FB_APP_ID")]
    app_id: Option<String>,

    /// Page to select; defaults to the first page the user manages
    #[arg(long, env = "FB_PAGE_ID")]
    page_id: Option<String>,

    /// Graph API base URL
    #[arg(long, default_value = DEFAULT_GRAPH_BASE_URL)]
    graph_base_url: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Everything the renewal found, in output order
#[derive(Debug, PartialEq, Eq)]
struct TokenBundle {
    user_token: String,
    page_id: String,
    page_token: String,
    ig_user_id: Option<String>,
}

impl TokenBundle {
    fn env_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("{}={}", env::FB_LONG_LIVED_USER_TOKEN, self.user_token),
            format!("FB_PAGE_ID={}", self.page_id),
            format!("{}={}", env::FB_PAGE_TOKEN, self.page_token),
        ];
        if let Some(ig) = &self.ig_user_id {
            lines.push(format!("IG_USER_ID={}", ig));
            lines.push(format!("{}={}", env::IG_PAGE_TOKEN, self.page_token));
        }
        lines
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    LoggingConfig::from_env(cli.verbose).init();

    let credentials = Credentials::load(&EnvCredentialSource);
    let transport = Arc::new(ReqwestTransport::new(Duration::from_secs(30))?);
    let graph = GraphClient::new(
        transport,
        cli.graph_base_url.clone(),
        credentials
            .fb_app_secret
            .as_ref()
            .map(libqueuecast::credentials::copy_secret),
    );

    let bundle = renew(&graph, &cli, &credentials).await?;
    for line in bundle.env_lines() {
        println!("{}", line);
    }
    Ok(())
}

async fn renew(graph: &GraphClient, cli: &Cli, credentials: &Credentials) -> Result<TokenBundle> {
    let user_token = match &cli.short_token {
        Some(short) => {
            let app_id = cli
                .app_id
                .as_deref()
                .context("--app-id (FB_APP_ID) is required to exchange a short-lived token")?;
            let app_secret = credentials
                .fb_app_secret
                .as_ref()
                .context("FB_APP_SECRET is required to exchange a short-lived token")?;
            info!("Exchanging short-lived user token");
            exchange_user_token(graph, app_id, app_secret.expose_secret(), short)
                .await
                .context("Token exchange failed")?
        }
        None => credentials
            .fb_user_token
            .as_ref()
            .map(|t| t.expose_secret().to_string())
            .context("Set FB_LONG_LIVED_USER_TOKEN or pass --short-token")?,
    };

    let pages = list_pages(graph, &user_token)
        .await
        .context("Listing pages failed")?;
    let page = match &cli.page_id {
        Some(id) => pages
            .into_iter()
            .find(|p| &p.id == id)
            .with_context(|| format!("Page {} is not managed by this user", id))?,
        None => pages
            .into_iter()
            .next()
            .context("This user manages no pages")?,
    };
    info!(
        "Selected page {} ({})",
        page.id,
        page.name.as_deref().unwrap_or("unnamed")
    );
    let page_token = page
        .access_token
        .filter(|t| !t.is_empty())
        .with_context(|| format!("No page token returned for page {}", page.id))?;

    let ig_user_id = instagram_account_for_page(graph, &page.id, &page_token)
        .await
        .context("Instagram account lookup failed")?;
    if ig_user_id.is_none() {
        warn!("Page {} has no linked Instagram business account", page.id);
    }

    Ok(TokenBundle {
        user_token,
        page_id: page.id,
        page_token,
        ig_user_id,
    })
}
