use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

use super::*;

#[test]
fn socket_url_attaches_token_query() {
    assert_eq!(socket_url("wss://league.test/ws/chat", "abc"), "wss://league.test/ws/chat/?token=abc");
    assert_eq!(socket_url("wss://league.test/ws/chat/", "abc"), "wss://league.test/ws/chat/?token=abc");
}

#[test]
fn close_reason_without_frame_is_no_status() {
    assert_eq!(close_reason(None), CloseReason::new(1005, ""));
}

#[tokio::test]
async fn tungstenite_socket_exchanges_text_and_reports_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (uri_tx, uri_rx) = oneshot::channel::<String>();
    let (got_tx, got_rx) = oneshot::channel::<String>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let callback = |req: &Request, resp: Response| {
            let _ = uri_tx.send(req.uri().to_string());
            Ok::<Response, ErrorResponse>(resp)
        };
        let mut ws = accept_hdr_async(stream, callback).await.unwrap();
        let Some(Ok(Message::Text(text))) = ws.next().await else {
            panic!("expected a text frame");
        };
        let _ = got_tx.send(text.as_str().to_owned());
        ws.send(Message::Text(String::from("Referee: kick-off at 15:00").into())).await.unwrap();
        ws.close(Some(CloseFrame { code: CloseCode::Away, reason: String::from("bye").into() }))
            .await
            .unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let url = socket_url(&format!("ws://{addr}/chat"), "T1");
    let mut socket = TungsteniteConnector.connect(&url).await.unwrap();
    socket.send_text(r#"{"message":"hi","user":"Ann"}"#.to_owned()).await.unwrap();

    assert_eq!(socket.next_event().await, SocketEvent::Frame("Referee: kick-off at 15:00".to_owned()));
    assert_eq!(socket.next_event().await, SocketEvent::Closed(CloseReason::new(1001, "bye")));
    assert_eq!(uri_rx.await.unwrap(), "/chat/?token=T1");
    assert_eq!(got_rx.await.unwrap(), r#"{"message":"hi","user":"Ann"}"#);
}

#[tokio::test]
async fn connect_to_dead_port_fails() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = TungsteniteConnector
        .connect(&socket_url(&format!("ws://{addr}"), "T1"))
        .await
        .err()
        .expect("connect should fail");
    assert!(matches!(err, TransportError::Connect(_)));
}
