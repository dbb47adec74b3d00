mod support;

use mangacrawl::{CancellationToken, Fetcher, ScraperError};
use std::error::Error;
use support::{test_client, TestServer};

#[test]
fn repeated_fetch_is_served_from_cache() -> Result<(), Box<dyn Error>> {
    let server = TestServer::start();
    server.page("/doc", "title Cached\n");
    let fetcher = Fetcher::new(test_client());
    let cancel = CancellationToken::new();

    let first = fetcher.fetch(&server.url("/doc"), &cancel)?;
    let second = fetcher.fetch(&server.url("/doc"), &cancel)?;

    assert_eq!(first, second);
    assert_eq!(server.count("/doc"), 1);
    assert_eq!(fetcher.cached_len(), 1);
    Ok(())
}

#[test]
fn failed_fetch_is_not_cached() -> Result<(), Box<dyn Error>> {
    let server = TestServer::start();
    server.respond("/flaky", 503, b"later");
    let fetcher = Fetcher::new(test_client());
    let cancel = CancellationToken::new();

    let failed = fetcher.fetch(&server.url("/flaky"), &cancel);
    assert!(matches!(failed, Err(ScraperError::HttpStatus { status: 503, .. })));

    server.page("/flaky", "title Back\n");
    let doc = fetcher.fetch(&server.url("/flaky"), &cancel)?;
    assert_eq!(doc.body, "title Back\n");
    assert_eq!(server.count("/flaky"), 2);
    Ok(())
}

#[test]
fn zero_capacity_fetches_every_time() -> Result<(), Box<dyn Error>> {
    let server = TestServer::start();
    server.page("/doc", "title Uncached\n");
    let fetcher = Fetcher::with_capacity(test_client(), 0);
    let cancel = CancellationToken::new();

    fetcher.fetch(&server.url("/doc"), &cancel)?;
    fetcher.fetch(&server.url("/doc"), &cancel)?;

    assert_eq!(server.count("/doc"), 2);
    assert_eq!(fetcher.cached_len(), 0);
    Ok(())
}

#[test]
fn cache_stays_within_capacity() -> Result<(), Box<dyn Error>> {
    let server = TestServer::start();
    let fetcher = Fetcher::with_capacity(test_client(), 2);
    let cancel = CancellationToken::new();

    for i in 0..6 {
        let path = format!("/doc/{}", i);
        server.page(&path, "title Many\n");
        fetcher.fetch(&server.url(&path), &cancel)?;
    }

    assert!(fetcher.cached_len() <= 2);
    Ok(())
}

#[test]
fn cancelled_fetch_sends_nothing() {
    let server = TestServer::start();
    server.page("/doc", "title Never\n");
    let fetcher = Fetcher::new(test_client());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = fetcher.fetch(&server.url("/doc"), &cancel);

    assert!(matches!(result, Err(ScraperError::Cancelled { .. })));
    assert!(server.requests().is_empty());
}
