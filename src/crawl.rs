//! Parallel crawler that fetches every page at most once.

use std::fmt;
use std::sync::OnceLock;

use rayon::prelude::*;
use regex::Regex;
use tracing::{debug, trace};

use crate::cancel::Cancellation;
use crate::memo::{Cache, Error};

/// A fetched page: its body and the URLs it links to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub body: String,
    pub urls: Vec<String>,
}

pub trait Fetcher: Send + Sync + 'static {
    type Error: Clone + fmt::Debug + Send + Sync + 'static;

    fn fetch(&self, url: &str) -> Result<Page, Self::Error>;
}

/// Crawls pages starting with `url`, following links up to `depth` levels, and returns the bodies
/// of every page visited.
///
/// Links are followed in parallel. Each URL is fetched once even when several pages link to it
/// concurrently: whoever reaches it first fetches it and crawls on, everybody else skips it
/// without waiting for that fetch. A failure to fetch `url` itself is returned; failures further
/// down only prune that branch.
/// Once `cx` fires, no new page is fetched and the crawl returns [`Error::Interrupted`].
pub fn crawl<F: Fetcher>(
    cx: &Cancellation,
    url: &str,
    depth: usize,
    fetcher: F,
) -> Result<Vec<String>, Error<F::Error>> {
    let pages = Cache::new(move |url: &String| fetcher.fetch(url));
    let bodies = visit(cx, &pages, url.to_string(), depth)?;
    debug!(url, pages = pages.len(), fetched = bodies.len(), "crawl finished");
    Ok(bodies)
}

fn visit<E>(
    cx: &Cancellation,
    pages: &Cache<String, Page, E>,
    url: String,
    depth: usize,
) -> Result<Vec<String>, Error<E>>
where
    E: Clone + fmt::Debug + Send + Sync + 'static,
{
    if depth == 0 {
        return Ok(Vec::new());
    }
    cx.check()?;

    let page = match pages.claim(url)? {
        Some(outcome) => outcome.map_err(Error::Compute)?,
        None => return Ok(Vec::new()),
    };

    let nested = page
        .urls
        .into_par_iter()
        .map(|link| match visit(cx, pages, link, depth - 1) {
            Err(Error::Compute(error)) => {
                trace!(?error, "pruning branch");
                Ok(Vec::new())
            }
            visited => visited,
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut bodies = vec![page.body];
    bodies.extend(nested.into_iter().flatten());
    Ok(bodies)
}

/// Extracts the targets of `href` attributes from an HTML document, in document order.
pub fn links(html: &str) -> Vec<String> {
    static HREF: OnceLock<Regex> = OnceLock::new();
    let href = HREF.get_or_init(|| Regex::new(r##"href\s*=\s*"([^"#]+)[^"]*""##).unwrap());

    href.captures_iter(html)
        .map(|captures| captures[1].to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_in_document_order() {
        let html = r#"
            <a href="https://golang.org/pkg/">Packages</a>
            <a class="x" href = "https://golang.org/cmd/">Commands</a>
            <a href="https://golang.org/pkg/fmt/#Printf">Printf</a>
            <a name="anchor">no link</a>
        "#;

        assert_eq!(
            links(html),
            [
                "https://golang.org/pkg/",
                "https://golang.org/cmd/",
                "https://golang.org/pkg/fmt/",
            ]
        );
    }

    #[test]
    fn fragment_only_links_are_skipped() {
        assert!(links(r##"<a href="#top">top</a>"##).is_empty());
        assert!(links("no markup at all").is_empty());
    }
}
