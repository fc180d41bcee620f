//! Local HTTP target with a scripted sequence of status codes.

use axum::{extract::State, http::StatusCode, Router};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

struct Script {
    queue: Mutex<VecDeque<u16>>,
    fallback: AtomicU16,
    delay_ms: AtomicU64,
    hits: AtomicUsize,
}

pub struct ScriptedServer {
    addr: SocketAddr,
    script: Arc<Script>,
    handle: JoinHandle<()>,
}

impl ScriptedServer {
    /// Serve `statuses` in order, then 200 for every later request.
    pub async fn start(statuses: &[u16]) -> Self {
        let script = Arc::new(Script {
            queue: Mutex::new(statuses.iter().copied().collect()),
            fallback: AtomicU16::new(200),
            delay_ms: AtomicU64::new(0),
            hits: AtomicUsize::new(0),
        });

        let router = Router::new().fallback(respond).with_state(script.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Self { addr, script, handle }
    }

    pub fn url(&self) -> String {
        format!("http://{}/health", self.addr)
    }

    /// Status returned once the script is exhausted.
    pub fn set_status(&self, status: u16) {
        self.script.queue.lock().unwrap().clear();
        self.script.fallback.store(status, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.script.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn hits(&self) -> usize {
        self.script.hits.load(Ordering::SeqCst)
    }
}

impl Drop for ScriptedServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn respond(State(script): State<Arc<Script>>) -> StatusCode {
    script.hits.fetch_add(1, Ordering::SeqCst);

    let delay = script.delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let next = script.queue.lock().unwrap().pop_front();
    let code = next.unwrap_or_else(|| script.fallback.load(Ordering::SeqCst));
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}
