//! Crawls a small in-memory site, fetching every page once.

use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use memocache::crawl::{self, Fetcher, Page};
use memocache::Cancellation;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(about = "Crawl a canned site without fetching any page twice")]
struct Opts {
    /// Page to start from.
    #[arg(default_value = "https://golang.org/")]
    url: String,

    /// How many levels of links to follow.
    #[arg(short, long, default_value_t = 4)]
    depth: usize,

    /// Simulated latency of every fetch, in milliseconds.
    #[arg(short, long, default_value_t = 100)]
    latency: u64,

    /// Upper bound of random extra latency, in milliseconds.
    #[arg(short, long, default_value_t = 50)]
    jitter: u64,
}

#[derive(Debug, Clone, Error)]
enum SiteError {
    #[error("not found: {0}")]
    NotFound(String),
}

struct Site {
    pages: HashMap<&'static str, &'static str>,
    latency: Duration,
    jitter: u64,
}

impl Site {
    fn new(latency: Duration, jitter: u64) -> Self {
        let pages = HashMap::from([
            (
                "https://golang.org/",
                r#"<title>The Go Programming Language</title>
                <a href="https://golang.org/pkg/">Packages</a>
                <a href="https://golang.org/cmd/">Commands</a>"#,
            ),
            (
                "https://golang.org/pkg/",
                r#"<title>Packages</title>
                <a href="https://golang.org/">Home</a>
                <a href="https://golang.org/cmd/">Commands</a>
                <a href="https://golang.org/pkg/fmt/">fmt</a>
                <a href="https://golang.org/pkg/os/">os</a>"#,
            ),
            (
                "https://golang.org/pkg/fmt/",
                r#"<title>Package fmt</title>
                <a href="https://golang.org/">Home</a>
                <a href="https://golang.org/pkg/">Packages</a>"#,
            ),
            (
                "https://golang.org/pkg/os/",
                r#"<title>Package os</title>
                <a href="https://golang.org/">Home</a>
                <a href="https://golang.org/pkg/">Packages</a>"#,
            ),
        ]);

        Self {
            pages,
            latency,
            jitter,
        }
    }
}

fn title(html: &str) -> &str {
    html.split_once("<title>")
        .and_then(|(_, rest)| rest.split_once("</title>"))
        .map_or(html, |(title, _)| title)
}

impl Fetcher for Site {
    type Error = SiteError;

    fn fetch(&self, url: &str) -> Result<Page, SiteError> {
        let extra = rand::thread_rng().gen_range(0..=self.jitter);
        thread::sleep(self.latency + Duration::from_millis(extra));

        let html = self
            .pages
            .get(url)
            .ok_or_else(|| SiteError::NotFound(url.to_string()))?;
        debug!(url, "fetched");

        Ok(Page {
            body: title(html).to_string(),
            urls: crawl::links(html),
        })
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("memocache=info")),
        )
        .init();

    let opts = Opts::parse();

    let (canceller, cx) = Cancellation::new();
    let canceller = Mutex::new(Some(canceller));
    let handler = ctrlc::set_handler(move || {
        if let Some(canceller) = canceller.lock().unwrap().take() {
            info!("interrupted, stopping crawl");
            canceller.cancel();
        }
    });
    if let Err(e) = handler {
        error!("cannot install interrupt handler: {e}");
        return ExitCode::FAILURE;
    }

    let site = Site::new(Duration::from_millis(opts.latency), opts.jitter);
    let start = Instant::now();
    let mut bodies = match crawl::crawl(&cx, &opts.url, opts.depth, site) {
        Ok(bodies) => bodies,
        Err(e) => {
            error!("crawl failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    bodies.sort();
    for body in &bodies {
        println!("{body}");
    }
    info!("crawled {} pages in {:?}", bodies.len(), start.elapsed());

    ExitCode::SUCCESS
}
