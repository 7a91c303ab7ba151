//! Connection pool behavior: caching, eviction, poisoning, drain.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ftl_cli::agent::AgentBuilder;
use ftl_cli::errors::{PoolError, ProtocolError, SessionError};
use ftl_cli::pool::ConnectionPool;
use ftl_cli::protocol::Message;

use crate::mocks::{self, Behavior, MockTransport};

fn pool_with(behavior: Behavior, cache: &tempfile::TempDir) -> ConnectionPool<MockTransport> {
    let builder = Arc::new(AgentBuilder::with_source(
        b"fake agent source".to_vec(),
        cache.path().to_path_buf(),
    ));
    ConnectionPool::new(MockTransport::new(behavior), builder)
}

fn module_request() -> Message {
    Message::FtlModule {
        name: "noop".into(),
        args: serde_json::Map::new(),
        check_mode: false,
    }
}

#[tokio::test]
async fn acquire_reuses_the_cached_session() {
    let cache = tempfile::TempDir::new().expect("tempdir");
    let pool = pool_with(Behavior::Respond { events: 0 }, &cache);
    let host = mocks::remote_host("web1");
    let cancel = CancellationToken::new();

    let first = pool.acquire(&cancel, &host).await.expect("first acquire");
    let second = pool.acquire(&cancel, &host).await.expect("second acquire");
    assert!(Arc::ptr_eq(&first, &second), "same pooled session");
    assert_eq!(pool.len().await, 1);
}

#[tokio::test]
async fn upload_happens_once_per_host_and_hash() {
    let cache = tempfile::TempDir::new().expect("tempdir");
    let builder = Arc::new(AgentBuilder::with_source(
        b"fake agent source".to_vec(),
        cache.path().to_path_buf(),
    ));
    let transport = MockTransport::new(Behavior::Respond { events: 0 });
    let pool = ConnectionPool::new(transport, builder);

    let web1 = mocks::remote_host("web1");
    let web2 = mocks::remote_host("web2");
    let cancel = CancellationToken::new();

    pool.acquire(&cancel, &web1).await.expect("web1");
    // Same archive hash, different host: uploaded again, not assumed shared.
    pool.acquire(&cancel, &web2).await.expect("web2");

    // Evict and reconnect web1: the upload is already confirmed for it.
    pool.evict("web1").await;
    pool.acquire(&cancel, &web1).await.expect("web1 again");

    assert_eq!(pool.transport().open_count(), 3);
    assert_eq!(
        pool.transport().upload_count(),
        2,
        "one upload per host, none on reconnect"
    );
}

#[tokio::test]
async fn poisoned_session_is_replaced_on_next_acquire() {
    let cache = tempfile::TempDir::new().expect("tempdir");
    let pool = pool_with(Behavior::Violate, &cache);
    let host = mocks::remote_host("web1");
    let cancel = CancellationToken::new();

    let session = pool.acquire(&cancel, &host).await.expect("acquire");

    let (tx, _rx) = mpsc::unbounded_channel();
    let err = session
        .call(module_request(), &tx, &cancel)
        .await
        .expect_err("grammar violation must fail the call");
    assert!(matches!(
        err,
        SessionError::Protocol(ProtocolError::Unexpected(_))
    ));
    assert!(session.is_poisoned());

    // The pool discards the poisoned session and opens a fresh one.
    let replacement = pool.acquire(&cancel, &host).await.expect("reacquire");
    assert!(!Arc::ptr_eq(&session, &replacement));
    assert_eq!(pool.transport().open_count(), 2);
}

#[tokio::test]
async fn handshake_failure_surfaces_and_pools_nothing() {
    let cache = tempfile::TempDir::new().expect("tempdir");
    let pool = pool_with(Behavior::BadHello, &cache);
    let host = mocks::remote_host("web1");

    let err = pool
        .acquire(&CancellationToken::new(), &host)
        .await
        .expect_err("must fail");
    assert!(matches!(
        err,
        PoolError::Session(SessionError::Handshake(_))
    ));
    assert!(pool.is_empty().await);
}

#[tokio::test]
async fn drain_closes_every_session() {
    let cache = tempfile::TempDir::new().expect("tempdir");
    let pool = pool_with(Behavior::Respond { events: 0 }, &cache);
    let cancel = CancellationToken::new();

    let s1 = pool
        .acquire(&cancel, &mocks::remote_host("web1"))
        .await
        .expect("web1");
    let s2 = pool
        .acquire(&cancel, &mocks::remote_host("web2"))
        .await
        .expect("web2");
    assert_eq!(pool.len().await, 2);

    pool.drain().await.expect("drain");
    assert!(pool.is_empty().await);
    assert!(s1.is_closed());
    assert!(s2.is_closed());
}

#[tokio::test]
async fn evict_is_a_no_op_for_unknown_hosts() {
    let cache = tempfile::TempDir::new().expect("tempdir");
    let pool = pool_with(Behavior::Respond { events: 0 }, &cache);
    pool.evict("nobody").await;
    assert!(pool.is_empty().await);
}
