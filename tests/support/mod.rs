//! Local HTTP fixture and a line-based site adapter shared by the pipeline tests.

#![allow(dead_code)]

use mangacrawl::model::{Chapter, ChapterDescriptor, PageDescriptor};
use mangacrawl::{CancellationToken, Document, HttpClient, ScraperError, SiteAdapter};
use std::collections::HashMap;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

type Routes = Arc<Mutex<HashMap<String, (u16, Vec<u8>)>>>;

/// Serves registered paths and records every requested path in order. Unknown paths are 404.
pub struct TestServer {
    pub base_url: String,
    routes: Routes,
    requests: Arc<Mutex<Vec<String>>>,
    shutdown: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl TestServer {
    pub fn start() -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
        let base_url = format!("http://{}", server.server_addr());
        let routes: Routes = Arc::default();
        let requests: Arc<Mutex<Vec<String>>> = Arc::default();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = {
            let routes = Arc::clone(&routes);
            let requests = Arc::clone(&requests);
            thread::spawn(move || loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }
                let request = match server.recv_timeout(Duration::from_millis(20)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };
                let path = request.url().to_string();
                requests.lock().unwrap().push(path.clone());
                let (status, body) = routes
                    .lock()
                    .unwrap()
                    .get(&path)
                    .cloned()
                    .unwrap_or((404, b"not found".to_vec()));
                let _ = request.respond(tiny_http::Response::from_data(body).with_status_code(status));
            })
        };

        Self {
            base_url,
            routes,
            requests,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn page(&self, path: &str, body: &str) {
        self.respond(path, 200, body.as_bytes());
    }

    pub fn respond(&self, path: &str, status: u16, body: &[u8]) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), (status, body.to_vec()));
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, path: &str) -> usize {
        self.requests().iter().filter(|p| p.as_str() == path).count()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().unwrap().clear();
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Client that fails fast: one attempt, short timeout.
pub fn test_client() -> HttpClient {
    HttpClient::builder()
        .retry_count(1)
        .timeout_secs(5)
        .build()
        .expect("build client")
}

/// Reads documents written as one directive per line:
///
/// ```text
/// title <work title>
/// heading <chapter title>
/// chapter <index> <href> [title]
/// page <index> <href> [asset href]
/// asset <href>
/// next <href>
/// ```
#[derive(Default)]
pub struct ScriptedAdapter {
    pub paginated: bool,
    /// Cancel this token once pages of the chapter at this URL have been extracted.
    pub cancel_after_chapter: Option<(String, CancellationToken)>,
}

impl ScriptedAdapter {
    pub fn paginated() -> Self {
        Self {
            paginated: true,
            ..Self::default()
        }
    }
}

fn directives<'a>(doc: &'a Document, key: &'a str) -> impl Iterator<Item = Vec<&'a str>> + 'a {
    doc.body.lines().filter_map(move |line| {
        let mut parts = line.split_whitespace();
        (parts.next() == Some(key)).then(|| parts.collect())
    })
}

fn first_rest(doc: &Document, key: &str) -> Option<String> {
    directives(doc, key).next().map(|parts| parts.join(" "))
}

fn parse_index(doc: &Document, raw: &str) -> Result<u32, ScraperError> {
    raw.parse().map_err(|_| ScraperError::Parse {
        url: doc.url.clone(),
        message: format!("bad index {:?}", raw),
    })
}

impl SiteAdapter for ScriptedAdapter {
    fn resolve_title(&self, doc: &Document) -> Result<String, ScraperError> {
        first_rest(doc, "title").ok_or_else(|| doc.missing("title"))
    }

    fn extract_chapters(
        &self,
        _root_url: &str,
        doc: &Document,
    ) -> Result<Vec<ChapterDescriptor>, ScraperError> {
        directives(doc, "chapter")
            .map(|parts| {
                Ok(ChapterDescriptor {
                    index: parse_index(doc, parts[0])?,
                    source_url: doc.resolve_url(parts[1])?,
                    title: Some(parts[2..].join(" ")).filter(|t| !t.is_empty()),
                })
            })
            .collect()
    }

    fn has_root_pagination(&self) -> bool {
        self.paginated
    }

    fn next_root_page_url(&self, doc: &Document) -> Result<Option<String>, ScraperError> {
        first_rest(doc, "next")
            .map(|href| doc.resolve_url(&href))
            .transpose()
    }

    fn resolve_chapter_title(
        &self,
        chapter: &Chapter,
        doc: &Document,
    ) -> Result<String, ScraperError> {
        Ok(first_rest(doc, "heading").unwrap_or_else(|| chapter.title.clone()))
    }

    fn extract_pages(
        &self,
        chapter_url: &str,
        _chapter: &Chapter,
        doc: &Document,
    ) -> Result<Vec<PageDescriptor>, ScraperError> {
        let pages = directives(doc, "page")
            .map(|parts| {
                Ok(PageDescriptor {
                    index: parse_index(doc, parts[0])?,
                    source_url: doc.resolve_url(parts[1])?,
                    asset_url: parts.get(2).map(|a| doc.resolve_url(a)).transpose()?,
                })
            })
            .collect::<Result<Vec<_>, ScraperError>>()?;
        if let Some((url, token)) = &self.cancel_after_chapter {
            if url == chapter_url {
                token.cancel();
            }
        }
        Ok(pages)
    }

    fn has_chapter_pagination(&self) -> bool {
        self.paginated
    }

    fn next_chapter_page_url(&self, doc: &Document) -> Result<Option<String>, ScraperError> {
        self.next_root_page_url(doc)
    }

    fn resolve_asset_url(&self, doc: &Document) -> Result<String, ScraperError> {
        first_rest(doc, "asset").ok_or_else(|| doc.missing("asset"))
    }
}
