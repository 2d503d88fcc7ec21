//! HTTP transport against a loopback endpoint: header contract, status
//! handling and certificate pinning.

use std::time::Duration;

use fleet_agent::application::ports::MessageTransport;
use fleet_agent::domain::{ExchangeError, TransportError};
use fleet_agent::infra::pinning::PinnedCertificate;
use fleet_agent::infra::transport::{BATCH_CONTENT_TYPE, HttpTransport, TransportOptions};
use fleet_common::{Message, decode_batch, encode_batch};

use crate::support::{CaptureServer, LogCapture, TestCa, TestIdentity};

fn options() -> TransportOptions {
    TransportOptions {
        connect_timeout: Duration::from_secs(5),
        request_timeout: Duration::from_secs(10),
        use_env_proxy: false,
    }
}

fn outbound() -> Vec<Message> {
    vec![
        Message::new("operation-result")
            .with("operation-id", 1)
            .with("status", "success")
            .with("result-text", "added user jdoe"),
    ]
}

fn empty_reply() -> Vec<u8> {
    encode_batch(&[]).unwrap()
}

// ── Header contract ──────────────────────────────────────────────────────────

#[tokio::test]
async fn exchange_posts_the_batch_with_identity_headers() {
    let reply = vec![
        Message::new("add-group")
            .with("operation-id", 9)
            .with("groupname", "devs"),
    ];
    let server = CaptureServer::http(200, encode_batch(&reply).unwrap()).await;
    let transport = HttpTransport::new(server.url.clone(), None, options()).unwrap();

    let inbound = transport.exchange(&outbound(), Some("34"), "3.3").await.unwrap();
    assert_eq!(inbound, reply);

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.path, "/message-system");
    assert_eq!(request.header("x-computer-id"), Some("34"));
    assert_eq!(request.header("x-message-api"), Some("3.3"));
    assert_eq!(request.header("content-type"), Some(BATCH_CONTENT_TYPE));
    let agent = request.header("user-agent").unwrap();
    assert!(agent.contains(env!("CARGO_PKG_VERSION")), "user agent {agent:?}");
    assert_eq!(decode_batch(&request.body).unwrap(), outbound());
}

#[tokio::test]
async fn unregistered_agent_sends_no_computer_id() {
    let server = CaptureServer::http(200, empty_reply()).await;
    let transport = HttpTransport::new(server.url.clone(), None, options()).unwrap();

    let inbound = transport.exchange(&[], None, "3.3").await.unwrap();

    assert!(inbound.is_empty());
    assert_eq!(server.requests()[0].header("x-computer-id"), None);
}

// ── Failures ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn server_error_status_is_a_retryable_transport_failure() {
    let server = CaptureServer::http(500, Vec::new()).await;
    let transport = HttpTransport::new(server.url.clone(), None, options()).unwrap();

    let err = transport.exchange(&outbound(), Some("34"), "3.3").await.unwrap_err();

    assert_eq!(err, ExchangeError::Transport(TransportError::Status(500)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn refused_connection_is_a_connect_failure() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let transport = HttpTransport::new(format!("http://{addr}/"), None, options()).unwrap();

    let err = transport.exchange(&[], None, "3.3").await.unwrap_err();

    assert!(
        matches!(err, ExchangeError::Transport(TransportError::Connect { .. })),
        "got {err:?}"
    );
}

#[tokio::test]
async fn undecodable_reply_is_a_codec_failure() {
    let server = CaptureServer::http(200, b"not a batch".to_vec()).await;
    let transport = HttpTransport::new(server.url.clone(), None, options()).unwrap();

    let err = transport.exchange(&[], None, "3.3").await.unwrap_err();

    assert!(matches!(err, ExchangeError::Codec(_)), "got {err:?}");
}

// ── Certificate pinning ──────────────────────────────────────────────────────

#[tokio::test]
async fn pinned_certificate_file_accepts_its_server() {
    let identity = TestIdentity::generate();
    let server = CaptureServer::https(&identity, 200, empty_reply()).await;
    let dir = tempfile::tempdir().unwrap();
    let pin = PinnedCertificate::from_pem_file(&identity.write_pem(dir.path())).unwrap();
    let transport = HttpTransport::new(server.url.clone(), Some(pin), options()).unwrap();

    transport.exchange(&outbound(), Some("34"), "3.3").await.unwrap();

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(decode_batch(&requests[0].body).unwrap(), outbound());
}

#[tokio::test]
async fn pinned_certificate_file_rejects_another_server_before_sending() {
    let logs = LogCapture::default();
    let _guard = logs.install();
    let served = TestIdentity::generate();
    let pinned = TestIdentity::generate();
    let server = CaptureServer::https(&served, 200, empty_reply()).await;
    let dir = tempfile::tempdir().unwrap();
    let pin = PinnedCertificate::from_pem_file(&pinned.write_pem(dir.path())).unwrap();
    let transport = HttpTransport::new(server.url.clone(), Some(pin), options()).unwrap();

    let err = transport.exchange(&outbound(), Some("34"), "3.3").await.unwrap_err();

    assert!(matches!(err, ExchangeError::CertificateVerification(_)), "got {err:?}");
    assert!(!err.is_retryable());
    assert!(server.requests().is_empty());
    assert!(logs.contents().contains("server certificate verification failed"));
}

#[tokio::test]
async fn fingerprint_pin_accepts_only_the_matching_certificate() {
    let identity = TestIdentity::generate();
    let server = CaptureServer::https(&identity, 200, empty_reply()).await;

    let matching = PinnedCertificate::from_fingerprint(&identity.fingerprint()).unwrap();
    let transport = HttpTransport::new(server.url.clone(), Some(matching), options()).unwrap();
    transport.exchange(&[], Some("34"), "3.3").await.unwrap();

    let other = PinnedCertificate::from_fingerprint(&TestIdentity::generate().fingerprint()).unwrap();
    let transport = HttpTransport::new(server.url.clone(), Some(other), options()).unwrap();
    let err = transport.exchange(&[], Some("34"), "3.3").await.unwrap_err();

    assert!(matches!(err, ExchangeError::CertificateVerification(_)), "got {err:?}");
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn pinned_authority_accepts_a_certificate_it_issued() {
    let ca = TestCa::generate();
    let server = CaptureServer::https(&ca.issue(), 200, empty_reply()).await;
    let dir = tempfile::tempdir().unwrap();
    let pin = PinnedCertificate::from_pem_file(&ca.write_pem(dir.path())).unwrap();
    let transport = HttpTransport::new(server.url.clone(), Some(pin), options()).unwrap();

    transport.exchange(&outbound(), Some("34"), "3.3").await.unwrap();

    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn pinned_authority_rejects_a_certificate_from_another_authority() {
    let pinned_ca = TestCa::generate();
    let other_ca = TestCa::generate();
    let server = CaptureServer::https(&other_ca.issue(), 200, empty_reply()).await;
    let dir = tempfile::tempdir().unwrap();
    let pin = PinnedCertificate::from_pem_file(&pinned_ca.write_pem(dir.path())).unwrap();
    let transport = HttpTransport::new(server.url.clone(), Some(pin), options()).unwrap();

    let err = transport.exchange(&outbound(), Some("34"), "3.3").await.unwrap_err();

    assert!(matches!(err, ExchangeError::CertificateVerification(_)), "got {err:?}");
    assert!(server.requests().is_empty());
}

#[tokio::test]
async fn pin_is_refused_for_a_plain_http_url() {
    let server = CaptureServer::http(200, empty_reply()).await;
    let pin = PinnedCertificate::from_fingerprint(&TestIdentity::generate().fingerprint()).unwrap();

    let err = HttpTransport::new(server.url.clone(), Some(pin), options())
        .err()
        .expect("pinned transport over http must be refused");

    assert!(err.to_string().contains("non-https"), "{err:#}");
    assert!(server.requests().is_empty());
}
