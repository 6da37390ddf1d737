//! Loopback HTTP server with scripted responses for client tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Default)]
struct Routes {
    /// Path suffix → responses in order; the last one repeats
    scripts: Vec<(String, Vec<(u16, String)>)>,
    hits: HashMap<String, usize>,
}

impl Routes {
    fn respond(&mut self, path: &str) -> (u16, String) {
        let Some((suffix, responses)) = self
            .scripts
            .iter()
            .find(|(suffix, _)| path.ends_with(suffix.as_str()))
        else {
            return (404, "{}".to_string());
        };

        let hit = self.hits.entry(suffix.clone()).or_insert(0);
        let response = responses[(*hit).min(responses.len() - 1)].clone();
        *hit += 1;
        response
    }
}

/// Serves one scripted JSON response per connection.
pub struct StubServer {
    base_url: String,
    routes: Arc<Mutex<Routes>>,
}

impl StubServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let routes = Arc::new(Mutex::new(Routes::default()));

        let shared = Arc::clone(&routes);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, Arc::clone(&shared)));
            }
        });

        Self { base_url, routes }
    }

    /// Answer requests whose path ends with `suffix`, in order.
    pub fn route(self, suffix: &str, responses: &[(u16, &str)]) -> Self {
        self.routes.lock().unwrap().scripts.push((
            suffix.to_string(),
            responses.iter().map(|(s, b)| (*s, b.to_string())).collect(),
        ));
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Requests served for a route so far.
    pub fn hits(&self, suffix: &str) -> usize {
        self.routes
            .lock()
            .unwrap()
            .hits
            .get(suffix)
            .copied()
            .unwrap_or(0)
    }
}

async fn serve(mut stream: TcpStream, routes: Arc<Mutex<Routes>>) {
    let mut request = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let Ok(n) = stream.read(&mut chunk).await else {
            return;
        };
        if n == 0 {
            return;
        }
        request.extend_from_slice(&chunk[..n]);
        if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&request[..header_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while request.len() < header_end + content_length {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => request.extend_from_slice(&chunk[..n]),
        }
    }

    let path = head
        .split_whitespace()
        .nth(1)
        .unwrap_or("/")
        .split('?')
        .next()
        .unwrap_or("/")
        .to_string();
    let (status, body) = routes.lock().unwrap().respond(&path);

    let response = format!(
        "HTTP/1.1 {status} Stub\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}
