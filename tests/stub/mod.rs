//! A local HTTP server standing in for the catalog site, the media API and the
//! file hosts.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct StubRequest {
    pub path: String,
    pub query: HashMap<String, String>,
    pub referer: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StubResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

impl StubResponse {
    pub fn html(body: &str) -> Self {
        Self::with_type(200, body.as_bytes().to_vec(), "text/html; charset=utf-8")
    }

    pub fn json(value: serde_json::Value) -> Self {
        Self::with_type(200, value.to_string().into_bytes(), "application/json")
    }

    pub fn bytes(body: Vec<u8>, content_type: &str) -> Self {
        Self::with_type(200, body, content_type)
    }

    pub fn redirect(location: &str) -> Self {
        Self {
            status: 302,
            body: Vec::new(),
            headers: vec![("Location".to_owned(), location.to_owned())],
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: b"error".to_vec(),
            headers: Vec::new(),
        }
    }

    fn with_type(status: u16, body: Vec<u8>, content_type: &str) -> Self {
        Self {
            status,
            body,
            headers: vec![("Content-Type".to_owned(), content_type.to_owned())],
        }
    }
}

/// Image-like payload comfortably above the default validity threshold.
pub fn image_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0_u8; len];
    bytes[..8].copy_from_slice(&[137, 80, 78, 71, 13, 10, 26, 10]);
    bytes
}

type Handler = dyn Fn(&StubRequest) -> StubResponse + Send + Sync + 'static;

pub struct StubServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<StubRequest>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl StubServer {
    pub fn spawn<F>(handler: F) -> Self
    where
        F: Fn(&StubRequest) -> StubResponse + Send + Sync + 'static,
    {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}");

        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);
        let handler: Box<Handler> = Box::new(handler);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let parsed = parse_request(&request);
                recorded.lock().expect("requests lock").push(parsed.clone());
                let stub = handler(&parsed);

                let mut response =
                    tiny_http::Response::from_data(stub.body).with_status_code(stub.status);
                for (name, value) in &stub.headers {
                    let header = tiny_http::Header::from_bytes(name.as_bytes(), value.as_bytes())
                        .expect("build header");
                    response = response.with_header(header);
                }
                let _ = request.respond(response);
            }
        });

        Self {
            base_url,
            requests,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn requests(&self) -> Vec<StubRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn hits(&self, path: &str) -> usize {
        self.requests().iter().filter(|r| r.path == path).count()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn parse_request(request: &tiny_http::Request) -> StubRequest {
    let url = url::Url::parse(&format!("http://stub{}", request.url())).expect("parse request url");
    let header = |name: &'static str| {
        request
            .headers()
            .iter()
            .find(|h| h.field.equiv(name))
            .map(|h| h.value.as_str().to_owned())
    };

    StubRequest {
        path: url.path().to_owned(),
        query: url.query_pairs().into_owned().collect(),
        referer: header("Referer"),
        user_agent: header("User-Agent"),
    }
}
