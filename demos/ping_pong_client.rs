use futures::StreamExt;
use log::*;
use tokio::time::{interval, Duration};
use url::Url;
use wisp_socket::{connect, ClientConfig, Event, RequestSpec};

/// Pings the server every second and logs the round-trip latency reported
/// back on the event stream.
async fn handle_connection(url: &str) {
    let spec = RequestSpec::new(Url::parse(url).expect("valid ws:// URL")).expect("ws:// or wss:// scheme");

    match connect(spec, ClientConfig::default()).await {
        Ok((connection, mut events)) => {
            let mut ticker = interval(Duration::from_secs(1));

            loop {
                tokio::select! {
                    Some(event) = events.next() => {
                        match event {
                            Event::Pong { latency } => info!("pong latency: {latency:?}"),
                            Event::StateChanged(state) => info!("state -> {state:?}"),
                            Event::Closed { code, .. } => {
                                info!("connection closed with code {code}");
                                break;
                            }
                            Event::Error(err) => {
                                error!("connection error: {err}");
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = ticker.tick() => {
                        if connection.ping(Vec::new()).is_err() {
                            error!("failed to send ping, connection no longer open");
                            break;
                        }
                    }
                }
            }
        }
        Err(err) => error!("handshake failed: {err}"),
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();
    handle_connection("ws://127.0.0.1:9002").await;
}
