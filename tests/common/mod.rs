//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use edge_gateway::config::GatewayConfig;
use edge_gateway::{GatewayServer, Router};

/// A gateway running on an ephemeral port. Dropping it stops the server.
#[allow(dead_code)]
pub struct RunningGateway {
    pub addr: SocketAddr,
    pub router: Arc<Router>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

#[allow(dead_code)]
impl RunningGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for the accept loop to finish.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let task = std::mem::replace(&mut self.task, tokio::spawn(async {}));
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("gateway did not stop")
            .expect("gateway task panicked");
    }
}

impl Drop for RunningGateway {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

/// Bind `router` on 127.0.0.1 with an ephemeral port and serve it.
pub async fn spawn_gateway(router: Router) -> RunningGateway {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.shutdown.drain_timeout_secs = 1;

    let server = GatewayServer::bind(&config, router).await.expect("bind gateway");
    let addr = server.local_addr().expect("local addr");
    let router = server.router();

    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let signal = async move {
            let _ = stopped.await;
        };
        server.run(signal).await.expect("gateway run");
    });

    RunningGateway {
        addr,
        router,
        stop: Some(stop),
        task,
    }
}

/// An HTTP/2 prior-knowledge client.
#[allow(dead_code)]
pub fn h2_client() -> reqwest::Client {
    reqwest::Client::builder()
        .http2_prior_knowledge()
        .timeout(Duration::from_secs(5))
        .build()
        .expect("client")
}
