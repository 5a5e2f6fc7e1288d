mod common;

use bytes::Bytes;
use common::{REFLECTION, Running, json_request, post, send_http1, send_http2};
use core::convert::Infallible;
use core::time::Duration;
use http::header::{ACCEPT_ENCODING, CONNECTION, CONTENT_ENCODING, UPGRADE};
use http::{Method, Request, Response, StatusCode, Version};
use std::time::Instant;
use tasker_server::server::http::{Body, full};
use tasker_server::{HttpServer, ServerError, ServerOption};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tower::service_fn;

fn sleepy(delay: Duration) -> HttpServer {
    let mut server = HttpServer::new([ServerOption::grace_period(Duration::from_millis(500))])
        .expect("valid options");
    server
        .handle(
            "/slow",
            service_fn(move |_req: Request<Body>| async move {
                sleep(delay).await;
                Ok::<_, Infallible>(Response::new(full("done")))
            }),
        )
        .unwrap();
    server
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn address_is_published_while_running() {
    let server = HttpServer::new([]).unwrap();
    assert!(server.local_addr().is_none());

    let running = Running::start(server).await;
    let addr = running.addr().await;
    assert!(addr.ip().is_loopback());
    assert_ne!(addr.port(), 0);
    assert_eq!(
        running.server.local_addr().and_then(|a| a.as_tcp()),
        Some(addr)
    );

    let server = running.server.clone();
    running.stop().await.unwrap();
    assert!(server.local_addr().is_none());
}

#[tokio::test]
async fn wait_for_address_returns_on_cancel() {
    let server = HttpServer::new([]).unwrap();
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        }
    });

    let res = timeout(Duration::from_secs(1), server.wait_for_address(&cancel))
        .await
        .expect("wait_for_address ignored cancellation");
    assert!(matches!(res, Err(ServerError::Cancelled)));
}

#[test]
fn invalid_options_fail_construction() {
    let cases = [
        (ServerOption::address("udp", "127.0.0.1:0"), "unsupported"),
        (ServerOption::address("unixgram", "/tmp/x.sock"), "unsupported"),
        (ServerOption::address("", "127.0.0.1:0"), "empty network"),
        (ServerOption::address("tcp", ""), "empty address"),
    ];

    for (option, case) in cases {
        let err = HttpServer::new([option]).err().expect(case);
        match case {
            "unsupported" => assert!(matches!(err, ServerError::UnsupportedNetwork { .. })),
            "empty network" => assert!(matches!(err, ServerError::EmptyNetwork)),
            _ => assert!(matches!(err, ServerError::EmptyAddress)),
        }
    }
}

#[tokio::test]
async fn bind_failure_names_network_and_address() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = taken.local_addr().unwrap().to_string();

    let server = HttpServer::new([ServerOption::address("tcp", address.as_str())]).unwrap();
    let err = server.run(CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, ServerError::Bind { .. }), "{err}");
    let message = err.to_string();
    assert!(message.contains("tcp"), "{message}");
    assert!(message.contains(&address), "{message}");
    assert!(server.local_addr().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn in_flight_request_finishes_during_drain() {
    let running = Running::start(sleepy(Duration::from_millis(300))).await;
    let addr = running.addr().await;

    let request = tokio::spawn(async move {
        let stream = TcpStream::connect(addr).await.unwrap();
        send_http1(stream, json_request(Method::GET, "/slow", "")).await
    });
    sleep(Duration::from_millis(100)).await;

    running.stop().await.unwrap();

    let reply = request.await.unwrap().expect("in-flight request failed");
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, Bytes::from_static(b"done"));

    // The listener is closed once shutdown starts.
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn requests_past_the_grace_period_are_dropped() {
    let running = Running::start(sleepy(Duration::from_secs(30))).await;
    let addr = running.addr().await;

    let request = tokio::spawn(async move {
        let stream = TcpStream::connect(addr).await.unwrap();
        send_http1(stream, json_request(Method::GET, "/slow", "")).await
    });
    sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    running.stop().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));

    let res = timeout(Duration::from_secs(5), request)
        .await
        .expect("client never saw the connection close")
        .unwrap();
    assert!(res.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_twice_and_run_once() {
    let running = Running::start(HttpServer::new([]).unwrap()).await;
    running.addr().await;

    running.shutdown.cancel();
    running.shutdown.cancel();
    let server = running.server.clone();
    running.stop().await.unwrap();

    let err = server.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ServerError::AlreadyStarted));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unmatched_paths_are_not_found() {
    let running = Running::start(HttpServer::new([]).unwrap()).await;
    let addr = running.addr().await;

    let reply = post(addr, "/nothing/here", "{}").await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);

    running.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn serves_http2_prior_knowledge() {
    let running = Running::start(HttpServer::new([]).unwrap()).await;
    let addr = running.addr().await;

    let uri = format!("http://{addr}{REFLECTION}ListServices");
    let reply = send_http2(addr, json_request(Method::POST, &uri, "{}"))
        .await
        .unwrap();
    assert_eq!(reply.version, Version::HTTP_2);
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(
        reply.json()["services"][0],
        "twirp.reflection.v1.ReflectionService"
    );

    running.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn h2c_upgrade_requests_are_answered_over_http1() {
    let running = Running::start(HttpServer::new([]).unwrap()).await;
    let addr = running.addr().await;

    let mut req = json_request(Method::POST, &format!("{REFLECTION}ListServices"), "{}");
    let headers = req.headers_mut();
    headers.insert(CONNECTION, "Upgrade, HTTP2-Settings".parse().unwrap());
    headers.insert(UPGRADE, "h2c".parse().unwrap());
    headers.insert("http2-settings", "AAMAAABkAARAAAAAAAIAAAAA".parse().unwrap());

    let stream = TcpStream::connect(addr).await.unwrap();
    let reply = send_http1(stream, req).await.unwrap();
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.version, Version::HTTP_11);
    assert!(reply.headers.get(UPGRADE).is_none());

    running.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn compresses_when_asked() {
    let running = Running::start(HttpServer::new([]).unwrap()).await;
    let addr = running.addr().await;
    let path = format!("{REFLECTION}ListServices");

    let mut req = json_request(Method::POST, &path, "{}");
    req.headers_mut()
        .insert(ACCEPT_ENCODING, "gzip".parse().unwrap());
    let stream = TcpStream::connect(addr).await.unwrap();
    let reply = send_http1(stream, req).await.unwrap();
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.headers[CONTENT_ENCODING], "gzip");

    let reply = post(addr, &path, "{}").await;
    assert!(reply.headers.get(CONTENT_ENCODING).is_none());
    assert_eq!(reply.json()["services"].as_array().map(Vec::len), Some(1));

    running.stop().await.unwrap();
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn serves_on_a_unix_socket() {
    use tasker_server::ListenAddr;
    use tokio::net::UnixStream;

    let path = std::env::temp_dir().join(format!("tasker-server-{}.sock", std::process::id()));
    let _ = std::fs::remove_file(&path);

    let server = HttpServer::new([ServerOption::address("unix", path.to_str().unwrap())]).unwrap();
    let running = Running::start(server).await;
    let addr = running
        .server
        .wait_for_address(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(addr, ListenAddr::Unix(path.clone()));
    assert_eq!(addr.port(), None);

    let stream = UnixStream::connect(&path).await.unwrap();
    let uri = format!("{REFLECTION}ListServices");
    let reply = send_http1(stream, json_request(Method::POST, &uri, "{}"))
        .await
        .unwrap();
    assert_eq!(reply.status, StatusCode::OK);

    running.stop().await.unwrap();
    assert!(!path.exists());
}
