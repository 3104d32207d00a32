//! Invocation Pipeline Integration Tests
//!
//! These tests run the client against an in-process access service and
//! verify:
//! - request/response exchange and connection reuse
//! - response validation (request ID, query mode, server errors)
//! - deadline handling and the timeout carried in the request header
//! - signed and encrypted frames
//! - connection discard after failed exchanges

mod common;

use common::{Reply, TestAccessServer};
use horm_client::{Client, ClientConfig, Context, NodeCell, Pool, PoolConfig, ReqParam, SelectorRegistry};
use horm_common::transport::Encryption;
use horm_common::{
    CallerOptions, ErrorInfo, ErrorKind, HormError, QueryMode, RequestHeader, ResponseHeader, Stage,
};
use horm_metrics::CounterRegistry;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

fn client() -> (Client, Arc<Pool>) {
    let metrics = Arc::new(CounterRegistry::new());
    let pool = Arc::new(Pool::with_metrics(
        PoolConfig {
            check_interval: Duration::ZERO,
            dial_timeout: Duration::from_secs(1),
            ..Default::default()
        },
        metrics.clone(),
    ));
    let client = Client::new(ClientConfig {
        selectors: Arc::new(SelectorRegistry::with_defaults()),
        pool: Arc::clone(&pool),
        metrics,
        ..Default::default()
    });
    (client, pool)
}

fn header(mode: QueryMode, timeout_ms: u32) -> RequestHeader {
    let opts = CallerOptions {
        name: "test.app.server.service".to_string(),
        appid: 1,
        timeout_ms,
        ..Default::default()
    };
    RequestHeader::build(mode, &opts, None)
}

fn target(addr: &str) -> ReqParam {
    ReqParam {
        target: format!("ip://{}", addr),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_invoke_round_trip() {
    let server = TestAccessServer::echo().await;
    let (client, _) = client();

    let head = header(QueryMode::Parallel, 1000);
    let (rsp, body) = client
        .invoke(&Context::background(), &head, b"find users", &target(&server.addr))
        .await
        .unwrap();

    assert_eq!(rsp.request_id, head.request_id);
    assert_eq!(rsp.query_mode, QueryMode::Parallel);
    assert_eq!(body, b"find users");
}

#[tokio::test]
async fn test_connection_is_reused() {
    let server = TestAccessServer::echo().await;
    let (client, pool) = client();
    let param = target(&server.addr);

    for i in 0..5u8 {
        let head = header(QueryMode::Single, 1000);
        let (_, body) = client
            .invoke(&Context::background(), &head, &[i], &param)
            .await
            .unwrap();
        assert_eq!(body, vec![i]);
    }

    assert_eq!(server.accepted(), 1);
    let stats = pool.get_pool("tcp", &server.addr).unwrap().stats();
    assert_eq!((stats.active, stats.idle), (1, 1));
}

#[tokio::test]
async fn test_request_id_mismatch() {
    let server = TestAccessServer::start(
        "",
        Arc::new(|head: &RequestHeader, _body: &[u8]| {
            Reply::Frame(
                ResponseHeader::reply_to(head.request_id + 1, head.query_mode),
                b"someone else's rows".to_vec(),
            )
        }),
    )
    .await;
    let (client, _) = client();

    let head = header(QueryMode::Single, 1000);
    let err = client
        .invoke(&Context::background(), &head, b"", &target(&server.addr))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ProtocolMismatch);
    assert!(
        matches!(err, HormError::RequestIdMismatch { request, .. } if request == head.request_id),
        "{}",
        err
    );
    assert!(err.is_request_sent());
}

#[tokio::test]
async fn test_query_mode_mismatch() {
    let server = TestAccessServer::start(
        "",
        Arc::new(|head: &RequestHeader, _body: &[u8]| {
            Reply::Frame(
                ResponseHeader::reply_to(head.request_id, QueryMode::Compound),
                Vec::new(),
            )
        }),
    )
    .await;
    let (client, _) = client();

    let err = client
        .invoke(
            &Context::background(),
            &header(QueryMode::Single, 1000),
            b"",
            &target(&server.addr),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, HormError::QueryModeMismatch { .. }), "{}", err);
}

#[tokio::test]
async fn test_server_error() {
    let server = TestAccessServer::start(
        "",
        Arc::new(|head: &RequestHeader, _body: &[u8]| {
            let mut rsp = ResponseHeader::reply_to(head.request_id, head.query_mode);
            rsp.err = Some(ErrorInfo::new(1146, "table doesn't exist"));
            Reply::Frame(rsp, Vec::new())
        }),
    )
    .await;
    let (client, _) = client();

    let err = client
        .invoke(
            &Context::background(),
            &header(QueryMode::Single, 1000),
            b"",
            &target(&server.addr),
        )
        .await
        .unwrap_err();

    match err {
        HormError::Server { code, msg } => {
            assert_eq!(code, 1146);
            assert_eq!(msg, "table doesn't exist");
        }
        other => panic!("expected server error, got {}", other),
    }
}

#[tokio::test]
async fn test_caller_deadline_bounds_header_timeout() {
    let seen = Arc::new(Mutex::new(None));
    let recorder = Arc::clone(&seen);
    let server = TestAccessServer::start(
        "",
        Arc::new(move |head: &RequestHeader, _body: &[u8]| {
            *recorder.lock() = Some(head.timeout);
            Reply::Frame(
                ResponseHeader::reply_to(head.request_id, head.query_mode),
                Vec::new(),
            )
        }),
    )
    .await;
    let (client, _) = client();

    let ctx = Context::background().with_timeout(Duration::from_millis(500));
    client
        .invoke(&ctx, &header(QueryMode::Single, 60_000), b"", &target(&server.addr))
        .await
        .unwrap();

    let timeout = seen.lock().unwrap();
    assert!(timeout > 0 && timeout <= 500, "header timeout {}ms", timeout);
}

#[tokio::test]
async fn test_read_timeout_discards_connection() {
    let server = TestAccessServer::start(
        "",
        Arc::new(|_head: &RequestHeader, _body: &[u8]| Reply::Stall(Duration::from_secs(5))),
    )
    .await;
    let (client, pool) = client();

    let ctx = Context::background().with_timeout(Duration::from_millis(50));
    let err = client
        .invoke(&ctx, &header(QueryMode::Single, 1000), b"", &target(&server.addr))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(err.is_request_sent());
    assert!(!err.is_safe_to_retry());
    assert!(
        matches!(&err, HormError::Timeout { stage: Stage::Read, msg } if msg.contains("cost:")),
        "{}",
        err
    );

    let stats = pool.get_pool("tcp", &server.addr).unwrap().stats();
    assert_eq!((stats.active, stats.idle), (0, 0));
}

#[tokio::test]
async fn test_configured_timeout_applies_without_caller_deadline() {
    let server = TestAccessServer::start(
        "",
        Arc::new(|_head: &RequestHeader, _body: &[u8]| Reply::Stall(Duration::from_secs(5))),
    )
    .await;
    let (client, _) = client();

    let started = std::time::Instant::now();
    let err = client
        .invoke(
            &Context::background(),
            &header(QueryMode::Single, 100),
            b"",
            &target(&server.addr),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_peer_hangup_is_network_error() {
    let server = TestAccessServer::start(
        "",
        Arc::new(|_head: &RequestHeader, _body: &[u8]| Reply::Hangup),
    )
    .await;
    let (client, pool) = client();

    let err = client
        .invoke(
            &Context::background(),
            &header(QueryMode::Single, 1000),
            b"",
            &target(&server.addr),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Network);
    assert!(err.is_request_sent());
    assert_eq!(pool.get_pool("tcp", &server.addr).unwrap().stats().active, 0);
}

#[tokio::test]
async fn test_corrupt_response_frame() {
    let server = TestAccessServer::start(
        "",
        Arc::new(|_head: &RequestHeader, _body: &[u8]| {
            // total length field smaller than the frame head
            Reply::Raw(vec![0x48, 0, 1, 0, 0, 0, 0, 4, 0, 0])
        }),
    )
    .await;
    let (client, pool) = client();

    let err = client
        .invoke(
            &Context::background(),
            &header(QueryMode::Single, 1000),
            b"",
            &target(&server.addr),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DecodeFailure);
    assert_eq!(pool.get_pool("tcp", &server.addr).unwrap().stats().active, 0);
}

#[tokio::test]
async fn test_signed_and_encrypted_frames() {
    let server = TestAccessServer::start(
        "workspace-token",
        Arc::new(|head: &RequestHeader, body: &[u8]| {
            Reply::Frame(
                ResponseHeader::reply_to(head.request_id, head.query_mode),
                body.to_vec(),
            )
        }),
    )
    .await;
    let (client, _) = client();

    for encryption in [Encryption::Signature, Encryption::Encrypt] {
        let param = ReqParam {
            workspace_id: 9,
            encryption,
            token: "workspace-token".to_string(),
            ..target(&server.addr)
        };
        let (_, body) = client
            .invoke(&Context::background(), &header(QueryMode::Single, 1000), b"rows", &param)
            .await
            .unwrap();
        assert_eq!(body, b"rows");
    }

    // the server drops connections whose frames fail verification
    let param = ReqParam {
        workspace_id: 9,
        encryption: Encryption::Signature,
        token: "wrong-token".to_string(),
        ..target(&server.addr)
    };
    let err = client
        .invoke(&Context::background(), &header(QueryMode::Single, 1000), b"rows", &param)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
}

#[tokio::test]
async fn test_static_selector_spreads_over_list() {
    let a = TestAccessServer::echo().await;
    let b = TestAccessServer::echo().await;
    let (client, _) = client();
    let param = ReqParam {
        target: format!("ip://{},{}", a.addr, b.addr),
        ..Default::default()
    };

    for _ in 0..64 {
        client
            .invoke(&Context::background(), &header(QueryMode::Single, 1000), b"", &param)
            .await
            .unwrap();
    }

    assert_eq!(a.accepted(), 1);
    assert_eq!(b.accepted(), 1);
}

#[tokio::test]
async fn test_default_endpoint_and_node_cell() {
    let server = TestAccessServer::echo().await;
    let (client, _) = client();
    let client = Client::new(ClientConfig {
        endpoint: server.addr.clone(),
        ..client.config().clone()
    });

    let cell = NodeCell::new();
    client
        .invoke_with_node(
            &Context::background(),
            &header(QueryMode::Single, 1000),
            b"",
            &ReqParam::default(),
            &cell,
        )
        .await
        .unwrap();

    let result = cell.get().unwrap();
    assert_eq!(result.node.address, server.addr);
    assert_eq!(result.remote_addr, server.addr);
    assert!(result.cost > Duration::ZERO);
    assert_eq!(result.node.cost, Some(result.cost));
}

#[cfg(unix)]
#[tokio::test]
async fn test_configured_network_reaches_unix_socket() {
    let path = std::env::temp_dir().join(format!("horm-client-{}.sock", std::process::id()));
    common::echo_unix(&path).await;

    let (client, pool) = client();
    let endpoint = path.display().to_string();
    let client = Client::new(ClientConfig {
        network: "unix".to_string(),
        endpoint: endpoint.clone(),
        ..client.config().clone()
    });

    let (_, body) = client
        .invoke(
            &Context::background(),
            &header(QueryMode::Single, 1000),
            b"over unix",
            &ReqParam::default(),
        )
        .await
        .unwrap();

    assert_eq!(body, b"over unix");
    assert!(pool.get_pool("unix", &endpoint).is_some());
    assert!(pool.get_pool("tcp", &endpoint).is_none());

    let _ = std::fs::remove_file(&path);
}
