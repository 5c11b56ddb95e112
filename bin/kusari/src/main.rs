use std::{path::PathBuf, str::FromStr, time::Duration};

use anyhow::{bail, Context};
use clap::Parser;
use fake_user_agent::get_chrome_rua;
use kusari::{
    Destination, HttpClient, HttpFetcher, ItemResult, Payload, Sequencer, SequencerState,
};
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    ClientBuilder,
};

mod config;

use config::Config;

#[derive(Parser, Debug, Clone)]
#[clap(name = "kusari", version, about = "Fetch urls one after another")]
pub struct KusariArgs {
    /// Debug output
    #[clap(short, long, alias = "debug")]
    verbose: bool,

    /// Load defaults from a TOML file
    #[clap(short, long, env = "KUSARI_CONFIG")]
    config: Option<PathBuf>,

    /// Read more urls from a file, one per line
    ///
    /// Empty lines and lines starting with `#` are skipped.
    #[clap(short, long)]
    input: Option<PathBuf>,

    /// Output path template
    ///
    /// `{index}` is replaced with the position of the url, `{name}` with the
    /// last segment of its path. eg. "out/{index}_{name}". Without this
    /// option bodies are only kept in memory and their sizes reported.
    #[clap(short, long)]
    output: Option<String>,

    /// HTTP Header used to download
    ///
    /// Custom header. eg. "User-Agent: xxxxx". This option will override --cookies.
    #[clap(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Cookies used to download
    #[clap(long)]
    cookies: Option<String>,

    /// HTTP timeout, in seconds
    #[clap(short, long)]
    timeout: Option<u64>,

    /// Urls to fetch, in order
    urls: Vec<String>,
}

impl KusariArgs {
    /// Merge the config file, if any, under the command line flags.
    fn merge_config(mut self) -> anyhow::Result<Self> {
        let Some(file) = &self.config else {
            return Ok(self);
        };
        let config = Config::load(file)
            .with_context(|| format!("Failed to load config {}", file.display()))?;

        let mut urls = config.urls;
        urls.append(&mut self.urls);
        self.urls = urls;

        let mut headers = config.headers;
        headers.append(&mut self.headers);
        self.headers = headers;

        self.output = self.output.or(config.output);
        self.cookies = self.cookies.or(config.cookies);
        self.timeout = self.timeout.or(config.timeout);
        Ok(self)
    }

    fn urls(&self) -> anyhow::Result<Vec<String>> {
        let mut urls = self.urls.clone();
        if let Some(input) = &self.input {
            let data = std::fs::read_to_string(input)
                .with_context(|| format!("Failed to read {}", input.display()))?;
            urls.extend(
                data.lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty() && !line.starts_with('#'))
                    .map(str::to_string),
            );
        }
        Ok(urls)
    }

    fn destination(&self) -> Destination {
        match &self.output {
            Some(template) => Destination::persist(template),
            None => Destination::Memory,
        }
    }

    fn client(&self) -> anyhow::Result<HttpClient> {
        let mut headers = HeaderMap::new();
        if let Some(cookies) = &self.cookies {
            headers.insert(
                reqwest::header::COOKIE,
                HeaderValue::from_str(cookies).context("Invalid cookie")?,
            );
        }

        for header in &self.headers {
            let (key, value) = header
                .split_once(':')
                .with_context(|| format!("Invalid header: {header}"))?;
            headers.insert(
                HeaderName::from_str(key.trim()).context("Invalid header name")?,
                HeaderValue::from_str(value.trim()).context("Invalid header value")?,
            );
        }

        let builder = ClientBuilder::new()
            .default_headers(headers)
            .user_agent(get_chrome_rua())
            .timeout(Duration::from_secs(self.timeout.unwrap_or(60)));
        Ok(HttpClient::new(builder)?)
    }
}

fn report(result: ItemResult) {
    let ItemResult {
        index,
        target,
        outcome,
    } = result;
    match outcome {
        Ok(Payload::Bytes(bytes)) => tracing::info!("[{index}] {target}: {} bytes", bytes.len()),
        Ok(Payload::File(path)) => tracing::info!("[{index}] {target} -> {}", path.display()),
        Err(e) => tracing::error!("[{index}] {target}: {e}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = KusariArgs::parse().merge_config()?;

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let urls = args.urls()?;
    if urls.is_empty() {
        bail!("No url to fetch.");
    }

    let fetcher = HttpFetcher::new(args.client()?);
    let sequencer = Sequencer::new(fetcher, &urls, args.destination(), report)?;

    let handle = sequencer.handle();
    let ctrlc_handler = tokio::spawn(async move {
        // the first ctrl-c lets the current fetch settle
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::info!("Ctrl-C received, stopping after the current url.");
        handle.cancel();

        // the second one exits at once
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received again, force exit.");
            std::process::exit(1);
        }
    });

    sequencer.resume();
    let state = sequencer.wait().await;
    ctrlc_handler.abort();

    let progress = sequencer.progress();
    if state == SequencerState::Cancelled {
        bail!(
            "Cancelled after {} of {} url(s).",
            progress.completed(),
            progress.total()
        );
    }
    if progress.failed() > 0 {
        bail!(
            "Failed to fetch {} of {} url(s).",
            progress.failed(),
            progress.total()
        );
    }

    Ok(())
}
