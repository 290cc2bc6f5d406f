use futures::StreamExt;
use log::*;
use rand::distr::Alphanumeric;
use rand::Rng;
use tokio::time::{interval, Duration};
use url::Url;
use wisp_socket::{connect, ClientConfig, Event, RequestSpec};

async fn handle_connection(url: &str) {
    let spec = RequestSpec::new(Url::parse(url).expect("valid ws:// URL")).expect("ws:// or wss:// scheme");

    match connect(spec, ClientConfig::default()).await {
        Ok((connection, mut events)) => {
            let mut ticker = interval(Duration::from_secs(5));
            let mut replies = 0;

            loop {
                tokio::select! {
                    Some(event) = events.next() => {
                        match event {
                            Event::Message(message) => {
                                info!("received {} bytes", message.payload().len());
                                replies += 1;
                                if replies >= 3 {
                                    let _ = connection.close(1000, "done");
                                }
                            }
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
                        let payload = generate_random_string();
                        if connection.send_text(payload).is_err() {
                            error!("failed to send message, connection no longer open");
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

fn generate_random_string() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(30)
        .map(char::from)
        .collect()
}
