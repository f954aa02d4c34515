//! End-to-end tests: the client against a real currency server on loopback.

use std::net::SocketAddr;
use std::rc::Rc;

use currency_client::application::requests::render;
use currency_client::infrastructure::network::{ClientError, CurrencyClient};
use currency_server::application::rates::RateTable;
use currency_server::infrastructure::network::{
    CurrencyServer, ServerSettings, ServerStats, StopHandle,
};
use linecmd_core::{LineConfig, Response};
use tokio::task::{JoinHandle, LocalSet};

// ── Helpers ───────────────────────────────────────────────────────────────────

async fn start() -> (SocketAddr, StopHandle, JoinHandle<ServerStats>) {
    let mut rates = RateTable::new("USD").unwrap();
    rates.insert("EUR", 1.25).unwrap();
    rates.insert("GBP", 2.0).unwrap();

    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server = CurrencyServer::bind(addr, ServerSettings::default(), Rc::new(rates))
        .await
        .expect("bind must succeed");
    let addr = server.local_addr().unwrap();
    let stop = server.stop_handle();
    (addr, stop, tokio::task::spawn_local(server.run()))
}

async fn connect(addr: SocketAddr) -> CurrencyClient {
    CurrencyClient::connect_addr(addr, LineConfig::default())
        .await
        .expect("connect must succeed")
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_help_round_trip_collects_data_lines() {
    LocalSet::new()
        .run_until(async {
            // Arrange
            let (addr, stop, server) = start().await;
            let mut client = connect(addr).await;

            // Act
            let exchange = client.round_trip("help").await.unwrap();

            // Assert
            assert_eq!(exchange.request.as_deref(), Some("help"));
            assert_eq!(exchange.response.comment(), "OK");
            assert_eq!(exchange.response.lines().len(), 5);
            assert_eq!(render(&exchange).last().map(String::as_str), Some("OK"));
            stop.stop();
            server.await.unwrap();
        })
        .await;
}

#[tokio::test]
async fn test_pipelined_requests_pair_with_their_replies() {
    LocalSet::new()
        .run_until(async {
            // Arrange
            let (addr, stop, server) = start().await;
            let mut client = connect(addr).await;

            // Act
            for request in ["hello", "convert EUR 8 to GBP", "convert EUR 1 to XYZ", "fly"] {
                client.send_request(request).unwrap();
            }
            let mut exchanges = Vec::new();
            while client.pending() > 0 {
                exchanges.push(client.next_exchange().await.unwrap().unwrap());
            }

            // Assert
            let pairs: Vec<(Option<&str>, &Response)> = exchanges
                .iter()
                .map(|e| (e.request.as_deref(), &e.response))
                .collect();
            assert_eq!(
                pairs,
                vec![
                    (Some("hello"), &Response::ok("Hello")),
                    (Some("convert EUR 8 to GBP"), &Response::ok("5.00")),
                    (Some("convert EUR 1 to XYZ"), &Response::error("Unknown currency")),
                    (Some("fly"), &Response::error("Unknown command")),
                ]
            );
            stop.stop();
            server.await.unwrap();
        })
        .await;
}

#[tokio::test]
async fn test_goodbye_then_clean_end_of_stream() {
    LocalSet::new()
        .run_until(async {
            let (addr, stop, server) = start().await;
            let mut client = connect(addr).await;

            let goodbye = client.round_trip("goodbye").await.unwrap();
            let after = client.next_exchange().await.unwrap();

            assert_eq!(goodbye.response, Response::ok("Goodbye"));
            assert_eq!(after, None);
            assert!(!client.is_open());
            stop.stop();
            server.await.unwrap();
        })
        .await;
}

#[tokio::test]
async fn test_stop_request_ends_the_server() {
    LocalSet::new()
        .run_until(async {
            let (addr, _stop, server) = start().await;
            let mut client = connect(addr).await;

            let reply = client.round_trip("stop").await.unwrap();
            let stats = server.await.unwrap();

            assert_eq!(reply.response, Response::ok("Stopping"));
            assert_eq!(client.next_exchange().await.unwrap(), None);
            assert_eq!(stats.closed_on_stop, 1);
        })
        .await;
}

#[tokio::test]
async fn test_request_with_line_break_is_refused_locally() {
    LocalSet::new()
        .run_until(async {
            let (addr, stop, server) = start().await;
            let mut client = connect(addr).await;

            let result = client.send_request("hello\r\nstop");

            assert!(matches!(result, Err(ClientError::InvalidRequest(_))));
            assert_eq!(client.pending(), 0);
            assert!(client.is_open());
            stop.stop();
            server.await.unwrap();
        })
        .await;
}

#[tokio::test]
async fn test_connect_to_closed_port_fails() {
    // Bind then drop a listener to find a port nothing listens on.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = CurrencyClient::connect_addr(addr, LineConfig::default()).await;

    assert!(matches!(result, Err(ClientError::ConnectFailed { .. })));
}
