use backon::{ExponentialBuilder, Retryable};
use clap::{Parser, Subcommand};
use eyre::Context;
use ha_integration_sdk::Hass;
use ha_integration_sdk::application_credentials::ClientCredential;
use ha_integration_sdk::config_entries::ConfigEntry;
use ha_integration_sdk::coordinator::DEFAULT_REQUEST_TIMEOUT;
use ha_integration_sdk::entity::SensorEntity;
use ha_integration_sdk::flow::FlowResult;
use oauth2::RedirectUrl;
use jiff::Timestamp;
use std::collections::HashMap;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;
use youtube_studio_analytics::config::HostConfig;
use youtube_studio_analytics::config_flow::{ConfigFlow, OptionsFlow, STEP_CHANNEL_ENTRY};
use youtube_studio_analytics::oauth::{OAuthCallback, loopback_redirect};
use youtube_studio_analytics::sensor::YouTubeSensor;
use youtube_studio_analytics::youtube_api::GoogleEndpoints;
use youtube_studio_analytics::{
    DOMAIN, LoadedEntry, OAUTH_DONE_HTML, SetupError, reload_entry, setup_entry, unload_entry,
};

#[derive(Parser)]
#[command(
    name = "youtube-studio-analytics",
    about = "Track YouTube Studio Analytics of a channel as sensors"
)]
struct Cli {
    /// Configuration file (default: ./youtube-studio-analytics.toml, if present).
    #[arg(long, short, global = true, env = "YTSA_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register the Google OAuth client application to authorize with.
    Credentials {
        #[arg(long, env = "YTSA_CLIENT_ID")]
        client_id: String,
        #[arg(long, env = "YTSA_CLIENT_SECRET", hide_env_values = true)]
        client_secret: String,
    },
    /// Authorize access and pick the channel to track.
    Setup,
    /// Renew the authorization of the configured channel.
    Reauth,
    /// Change how often metrics are fetched.
    Options {
        /// Seconds between polls; clamped to 300..=86400.
        #[arg(long)]
        update_interval: u64,
    },
    /// Poll the configured channel until interrupted.
    Run,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = Cli::parse();
    let config = HostConfig::load(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log)),
        )
        .with_ansi(std::io::stdout().is_terminal())
        .init();

    let hass = Hass::open(&config.data_dir).await?;
    let endpoints = config.endpoints()?;

    match cli.command {
        Command::Credentials {
            client_id,
            client_secret,
        } => {
            hass.application_credentials
                .register(DOMAIN, ClientCredential::new(client_id, client_secret))
                .await
                .context("store application credential")?;
            eprintln!("Application credential registered.");
            Ok(())
        }
        Command::Setup => onboard(&hass, &config, endpoints, None).await,
        Command::Reauth => {
            let entry = the_entry(&hass).await?;
            onboard(&hass, &config, endpoints, Some(entry.entry_id)).await
        }
        Command::Options { update_interval } => {
            let entry = the_entry(&hass).await?;
            let result = OptionsFlow::new(hass.clone(), &entry.entry_id)
                .submit(update_interval)
                .await?;
            finish(result)
        }
        Command::Run => run(hass, endpoints).await,
    }
}

async fn the_entry(hass: &Hass) -> eyre::Result<ConfigEntry> {
    hass.config_entries
        .entries(DOMAIN)
        .await
        .into_iter()
        .next()
        .ok_or_else(|| eyre::eyre!("no channel configured yet, run `setup` first"))
}

/// Drives a setup or re-authentication flow on the terminal.
async fn onboard(
    hass: &Hass,
    config: &HostConfig,
    endpoints: GoogleEndpoints,
    reauth_entry: Option<String>,
) -> eyre::Result<()> {
    let http = reqwest::Client::builder()
        .timeout(DEFAULT_REQUEST_TIMEOUT)
        .build()
        .context("build HTTP client")?;
    let mut flow = match reauth_entry {
        Some(entry_id) => ConfigFlow::reauth(hass.clone(), endpoints, http, entry_id),
        None => ConfigFlow::new(hass.clone(), endpoints, http),
    };

    let (redirect_url, loopback) = match &config.redirect_url {
        Some(url) => (RedirectUrl::from_url(url.clone()), None),
        None => {
            let (redirect_url, callback) = loopback_redirect(OAUTH_DONE_HTML)
                .await
                .context("start OAuth redirect listener")?;
            (redirect_url, Some(callback))
        }
    };

    let url = match flow.begin(redirect_url).await {
        FlowResult::ExternalStep { url, .. } => url,
        other => return finish(other),
    };
    eprintln!("Authorize access to your YouTube channel at:\n\n  {url}\n");
    if config.open_browser
        && let Err(e) = webbrowser::open(&url)
    {
        tracing::warn!(error = %e, "could not open browser");
    }

    let callback = match loopback {
        Some(callback) => callback.await.context("receive OAuth redirect")?,
        None => {
            let redirected = prompt("Paste the full URL you were redirected to: ").await?;
            let redirected =
                url::Url::parse(redirected.trim()).context("parse redirected URL")?;
            OAuthCallback::from_query(redirected.query().unwrap_or(""))
        }
    };
    if let Some(error) = callback.error {
        eyre::bail!("authorization was not granted: {error}");
    }
    let (Some(code), Some(state)) = (callback.code, callback.state) else {
        eyre::bail!("OAuth redirect carried no authorization code");
    };

    let mut result = flow.complete_oauth(&code, &state).await?;
    loop {
        let FlowResult::Form {
            step_id,
            errors,
            description_placeholders,
        } = &result
        else {
            return finish(result);
        };
        eyre::ensure!(step_id == STEP_CHANNEL_ENTRY, "unexpected flow step {step_id}");
        if let Some(error) = errors.get("channel_id") {
            eprintln!("! {error}");
        }
        if let Some(channels) = description_placeholders.get("channels") {
            eprintln!("Channels available to this account: {channels}");
        }
        let channel_id = prompt("Channel id to track: ").await?;
        result = flow.select_channel(&channel_id).await?;
    }
}

fn finish(result: FlowResult) -> eyre::Result<()> {
    match result {
        FlowResult::CreateEntry { title, .. } => {
            eprintln!("Configured {title}.");
            Ok(())
        }
        FlowResult::Abort { reason } if reason == "reauth_successful" => {
            eprintln!("Re-authentication successful.");
            Ok(())
        }
        FlowResult::Abort { reason } => eyre::bail!("flow aborted: {reason}"),
        other => eyre::bail!("flow stopped unexpectedly: {other:?}"),
    }
}

async fn prompt(question: &str) -> eyre::Result<String> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(question.as_bytes()).await?;
    stderr.flush().await?;
    let mut line = String::new();
    let n = BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("read from stdin")?;
    eyre::ensure!(n > 0, "stdin closed");
    Ok(line.trim_end().to_string())
}

/// How often `run` looks for entries changed by `setup`, `reauth` or `options`.
const ENTRY_CHECK_INTERVAL: Duration = Duration::from_secs(15);

/// A set-up entry together with the task reporting its sensor states.
struct Running {
    entry: LoadedEntry,
    reporter: tokio::task::JoinHandle<()>,
}

impl Running {
    fn start(entry: LoadedEntry) -> Self {
        let reporter = tokio::spawn(report_states(&entry));
        Self { entry, reporter }
    }

    async fn stop(self, hass: &Hass) {
        self.reporter.abort();
        unload_entry(hass, self.entry).await;
    }
}

/// Sets up `entry`, retrying while it is not ready.
///
/// Returns `None` if the entry needs re-authentication first.
async fn start_entry(
    hass: &Hass,
    entry: &ConfigEntry,
    endpoints: &GoogleEndpoints,
) -> eyre::Result<Option<LoadedEntry>> {
    let setup = (|| setup_entry(hass, entry, endpoints))
        .retry(
            ExponentialBuilder::default()
                .with_min_delay(Duration::from_secs(30))
                .with_max_delay(Duration::from_secs(15 * 60))
                .with_max_times(5),
        )
        .when(|e: &SetupError| matches!(e, SetupError::NotReady(_)))
        .notify(|e, dur: Duration| {
            tracing::warn!(error = %e, "entry not ready, retrying in {dur:?}");
        })
        .await;
    match setup {
        Ok(loaded) => Ok(Some(loaded)),
        Err(SetupError::AuthFailed(e)) => {
            tracing::error!(
                entry = %entry.title,
                error = %e,
                "reauthentication required, run `reauth`"
            );
            Ok(None)
        }
        Err(e) => Err(e).with_context(|| format!("set up {}", entry.title)),
    }
}

/// Sets up every entry, then reports sensor states until Ctrl-C.
///
/// Entries changed meanwhile are reloaded, so a `reauth` or `options` run from another terminal
/// takes effect without a restart.
async fn run(hass: Hass, endpoints: GoogleEndpoints) -> eyre::Result<()> {
    let entries = hass.config_entries.entries(DOMAIN).await;
    eyre::ensure!(!entries.is_empty(), "no channel configured yet, run `setup` first");

    let mut running: HashMap<String, Running> = HashMap::new();
    // the version of each entry last acted on
    let mut seen: HashMap<String, Timestamp> = HashMap::new();
    for entry in &entries {
        if let Some(loaded) = start_entry(&hass, entry, &endpoints).await? {
            running.insert(entry.entry_id.clone(), Running::start(loaded));
        }
        seen.insert(entry.entry_id.clone(), stored_version(&hass, entry).await);
    }
    if running.is_empty() {
        tracing::warn!("no entry is running, waiting for `reauth`");
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut check = tokio::time::interval(ENTRY_CHECK_INTERVAL);
    check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    check.tick().await;
    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.context("wait for Ctrl-C")?;
                break;
            }
            _ = check.tick() => {
                if let Err(e) = apply_entry_changes(&hass, &endpoints, &mut running, &mut seen).await {
                    tracing::warn!(error = %e, "could not check config entries for changes");
                }
            }
        }
    }

    tracing::info!("shutting down");
    for (_, entry) in running.drain() {
        entry.stop(&hass).await;
    }
    Ok(())
}

/// When `entry` was last written, after whatever setting it up stored.
async fn stored_version(hass: &Hass, entry: &ConfigEntry) -> Timestamp {
    hass.config_entries
        .get(&entry.entry_id)
        .await
        .map_or(entry.modified_at, |stored| stored.modified_at)
}

async fn apply_entry_changes(
    hass: &Hass,
    endpoints: &GoogleEndpoints,
    running: &mut HashMap<String, Running>,
    seen: &mut HashMap<String, Timestamp>,
) -> eyre::Result<()> {
    hass.config_entries.sync().await?;
    let entries = hass.config_entries.entries(DOMAIN).await;

    let removed: Vec<String> = running
        .keys()
        .filter(|id| !entries.iter().any(|e| &e.entry_id == *id))
        .cloned()
        .collect();
    for entry_id in removed {
        tracing::info!(%entry_id, "config entry removed, unloading");
        seen.remove(&entry_id);
        if let Some(entry) = running.remove(&entry_id) {
            entry.stop(hass).await;
        }
    }

    for entry in &entries {
        if seen.get(&entry.entry_id) == Some(&entry.modified_at) {
            continue;
        }
        match running.get_mut(&entry.entry_id) {
            Some(current) => {
                reload_entry(hass, &mut current.entry).await?;
            }
            None => {
                tracing::info!(entry = %entry.title, "setting up changed config entry");
                match setup_entry(hass, entry, endpoints).await {
                    Ok(loaded) => {
                        running.insert(entry.entry_id.clone(), Running::start(loaded));
                    }
                    // not marked as seen, so the next check tries again
                    Err(SetupError::NotReady(e)) => {
                        tracing::warn!(entry = %entry.title, error = %e, "entry not ready");
                        continue;
                    }
                    Err(e) => {
                        tracing::error!(entry = %entry.title, error = %e, "entry could not be set up");
                    }
                }
            }
        }
        seen.insert(entry.entry_id.clone(), stored_version(hass, entry).await);
    }
    Ok(())
}

/// Logs every sensor's state whenever the entry's coordinator publishes.
fn report_states(entry: &LoadedEntry) -> impl Future<Output = ()> + Send + 'static {
    let mut state = entry.handle.subscribe();
    let sensors = entry.sensors.clone();
    let channel = entry.channel_id.clone();
    async move {
        log_sensors(&channel, &sensors);
        while state.changed().await.is_ok() {
            let (success, needs_reauth) = {
                let current = state.borrow_and_update();
                (current.last_update_success, current.needs_reauth())
            };
            if needs_reauth {
                tracing::error!(%channel, "reauthentication required, run `reauth`");
            } else if success {
                log_sensors(&channel, &sensors);
            }
        }
    }
}

fn log_sensors(channel: &str, sensors: &[YouTubeSensor]) {
    for sensor in sensors {
        let unit = sensor
            .description()
            .native_unit_of_measurement
            .as_deref()
            .unwrap_or("");
        tracing::info!(
            channel,
            sensor = sensor.name(),
            state = %sensor.state(),
            unit,
            "sensor state"
        );
    }
}
