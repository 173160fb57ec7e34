//! Integration tests for connection handshake sequencing
//!
//! These tests drive the orchestrator the way the transport layer does and
//! use deterministic fake verifiers and authorizers.

use async_trait::async_trait;
use connstate::{
    AuthorizationFailure, Authorizer, ConnectionState, ConnectionStateMachine, CredentialVerifier,
    Credentials, ErrorCode, Identity, Keyring, OperationDescriptor, OperationKind,
    SecurityBackend, SecurityMode, VerificationFailure,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Accepts any principal whose secret is "good"
#[derive(Debug, Default)]
struct FixedVerifier {
    calls: AtomicUsize,
}

#[async_trait]
impl CredentialVerifier for FixedVerifier {
    async fn verify(&self, credentials: &Credentials) -> Result<Identity, VerificationFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if credentials.secret == "good" {
            Ok(Identity::new(credentials.principal.clone()))
        } else {
            Err(VerificationFailure::new("bad secret"))
        }
    }
}

/// Verifier that blocks until the test releases it
#[derive(Debug, Default)]
struct GatedVerifier {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl CredentialVerifier for GatedVerifier {
    async fn verify(&self, credentials: &Credentials) -> Result<Identity, VerificationFailure> {
        self.entered.notify_one();
        if credentials.principal == "stuck" {
            std::future::pending::<()>().await;
        }
        self.release.notified().await;
        Ok(Identity::new(credentials.principal.clone()))
    }
}

/// Denies every write, allows everything else
#[derive(Debug, Default)]
struct ReadOnlyAuthorizer;

impl Authorizer for ReadOnlyAuthorizer {
    fn check(
        &self,
        identity: &Identity,
        operation: &OperationDescriptor,
    ) -> Result<(), AuthorizationFailure> {
        if operation.kind() == OperationKind::DataWrite {
            Err(AuthorizationFailure {
                principal: identity.principal.clone(),
                operation: operation.name().to_string(),
                reason: "read-only principal".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

fn peer() -> std::net::SocketAddr {
    "192.168.1.10:53000".parse().unwrap()
}

fn secured_machine(verifier: Arc<dyn CredentialVerifier>) -> ConnectionStateMachine {
    ConnectionStateMachine::new(SecurityMode::Enabled(SecurityBackend::new(
        verifier,
        Arc::new(ReadOnlyAuthorizer),
    )))
}

fn data_and_admin_operations() -> Vec<OperationDescriptor> {
    vec![
        OperationDescriptor::data_read("GetRequest", "orders", Some("1")),
        OperationDescriptor::data_write("PutRequest", "orders", Some("1")),
        OperationDescriptor::admin("DisconnectClientRequest"),
    ]
}

#[tokio::test]
async fn test_security_disabled_accepts_everything_but_handshake() {
    let machine = ConnectionStateMachine::new(SecurityMode::Disabled);
    let conn = machine.accept(peer()).await;

    for op in data_and_admin_operations() {
        assert!(conn.dispatch(&op).await.is_ok(), "{} rejected", op.name());
    }
    assert!(conn
        .dispatch(&OperationDescriptor::connection_metadata("GetServerRequest"))
        .await
        .is_ok());

    let err = conn
        .dispatch(&OperationDescriptor::handshake_start())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::AuthenticationNotSupported);

    let err = conn.begin_handshake().await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::AuthenticationNotSupported);

    let err = conn
        .complete_handshake(&Credentials::new("alice", "good"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::AuthenticationNotSupported);

    assert_eq!(conn.state().await, ConnectionState::NoSecurity);
}

#[tokio::test]
async fn test_operations_before_handshake_require_authentication() {
    let machine = secured_machine(Arc::new(FixedVerifier::default()));
    let conn = machine.accept(peer()).await;

    for op in data_and_admin_operations() {
        let err = conn.dispatch(&op).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::AuthenticationRequired);
    }
    // metadata is allowed before the handshake
    assert!(conn
        .dispatch(&OperationDescriptor::connection_metadata("GetServerRequest"))
        .await
        .is_ok());
    assert_eq!(conn.state().await, ConnectionState::Unauthenticated);
}

#[tokio::test]
async fn test_credentials_before_handshake_start() {
    let verifier = Arc::new(FixedVerifier::default());
    let machine = secured_machine(verifier.clone());
    let conn = machine.accept(peer()).await;

    let err = conn
        .complete_handshake(&Credentials::new("alice", "good"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::AuthenticationRequired);
    assert_eq!(conn.state().await, ConnectionState::Unauthenticated);
    assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_second_handshake_while_authenticating() {
    let machine = secured_machine(Arc::new(FixedVerifier::default()));
    let conn = machine.accept(peer()).await;

    conn.begin_handshake().await.unwrap();
    assert_eq!(conn.state().await, ConnectionState::Authenticating);

    let err = conn.begin_handshake().await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::AuthenticationRequired);
    assert_eq!(conn.state().await, ConnectionState::Authenticating);

    for op in data_and_admin_operations() {
        let err = conn.dispatch(&op).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::AuthenticationRequired);
    }
}

#[tokio::test]
async fn test_successful_handshake_is_final() {
    let verifier = Arc::new(FixedVerifier::default());
    let machine = secured_machine(verifier.clone());
    let conn = machine.accept(peer()).await;

    conn.begin_handshake().await.unwrap();
    conn.complete_handshake(&Credentials::new("alice", "good"))
        .await
        .unwrap();
    assert_eq!(conn.state().await, ConnectionState::Authenticated);
    assert_eq!(conn.principal().await.as_deref(), Some("alice"));

    let err = conn.begin_handshake().await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::AlreadyAuthenticated);

    let err = conn
        .complete_handshake(&Credentials::new("bob", "good"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::AlreadyAuthenticated);

    assert_eq!(conn.state().await, ConnectionState::Authenticated);
    assert_eq!(conn.principal().await.as_deref(), Some("alice"));
    assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_invalid_credentials_can_be_retried() {
    let machine = secured_machine(Arc::new(FixedVerifier::default()));
    let conn = machine.accept(peer()).await;

    conn.begin_handshake().await.unwrap();

    for _ in 0..3 {
        let err = conn
            .complete_handshake(&Credentials::new("alice", "bad"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidCredentials);
        assert!(err.is_authentication_failure());
        assert_eq!(conn.state().await, ConnectionState::Authenticating);
    }

    conn.complete_handshake(&Credentials::new("alice", "good"))
        .await
        .unwrap();
    assert_eq!(conn.state().await, ConnectionState::Authenticated);
}

#[tokio::test]
async fn test_authorization_failure_keeps_state() {
    let machine = secured_machine(Arc::new(FixedVerifier::default()));
    let conn = machine.accept(peer()).await;

    conn.begin_handshake().await.unwrap();
    conn.complete_handshake(&Credentials::new("reader", "good"))
        .await
        .unwrap();

    let write = OperationDescriptor::data_write("PutRequest", "orders", Some("1"));
    let err = conn.dispatch(&write).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::AuthorizationFailed);
    assert!(err.message().contains("read-only principal"));
    assert_eq!(conn.state().await, ConnectionState::Authenticated);

    let read = OperationDescriptor::data_read("GetRequest", "orders", Some("1"));
    assert!(conn.dispatch(&read).await.is_ok());
}

#[tokio::test]
async fn test_keyring_denies_operations_without_permission() {
    let mut keyring = Keyring::new();
    keyring.add("nocaps", "pw");
    let machine = ConnectionStateMachine::new(SecurityMode::Enabled(
        SecurityBackend::from_shared(Arc::new(keyring)),
    ));
    let conn = machine.accept(peer()).await;
    conn.begin_handshake().await.unwrap();
    conn.complete_handshake(&Credentials::new("nocaps", "pw"))
        .await
        .unwrap();

    let bare = [
        OperationDescriptor::new("PutRequest", OperationKind::DataWrite, None),
        OperationDescriptor::new("GetRequest", OperationKind::DataRead, None),
        OperationDescriptor::new("DisconnectClientRequest", OperationKind::Admin, None),
        OperationDescriptor::data_write("PutRequest", "orders", Some("1")),
    ];
    for op in &bare {
        let err = conn.dispatch(op).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::AuthorizationFailed, "{}", op.name());
    }
    assert_eq!(conn.state().await, ConnectionState::Authenticated);
}

#[tokio::test]
async fn test_full_secured_scenario() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let machine = secured_machine(Arc::new(FixedVerifier::default()));
    let conn = machine.accept(peer()).await;
    let id = conn.id();

    let get = OperationDescriptor::from_message_type("GetRequest", Some("orders"), Some("1"))
        .unwrap();

    let err = machine.dispatch(id, &get).await.unwrap_err();
    assert_eq!(
        err.as_state_error().map(|e| e.code()),
        Some(ErrorCode::AuthenticationRequired)
    );

    machine.begin_handshake(id).await.unwrap();
    assert_eq!(conn.state().await, ConnectionState::Authenticating);

    machine
        .complete_handshake(id, &Credentials::new("alice", "good"))
        .await
        .unwrap();
    assert_eq!(conn.state().await, ConnectionState::Authenticated);

    machine.dispatch(id, &get).await.unwrap();

    machine.close(id).await.unwrap();
    assert_eq!(machine.connection_count().await, 0);
}

#[tokio::test]
async fn test_connections_are_independent() {
    let machine = secured_machine(Arc::new(FixedVerifier::default()));
    let first = machine.accept(peer()).await;
    let second = machine.accept(peer()).await;

    first.begin_handshake().await.unwrap();
    first
        .complete_handshake(&Credentials::new("alice", "good"))
        .await
        .unwrap();

    assert_eq!(first.state().await, ConnectionState::Authenticated);
    assert_eq!(second.state().await, ConnectionState::Unauthenticated);
    assert_eq!(machine.connection_count().await, 2);
}

#[tokio::test]
async fn test_operations_wait_for_outstanding_credential_check() {
    let verifier = Arc::new(GatedVerifier::default());
    let machine = secured_machine(verifier.clone());
    let conn = machine.accept(peer()).await;
    conn.begin_handshake().await.unwrap();

    let auth_conn = conn.clone();
    let auth_task = tokio::spawn(async move {
        auth_conn
            .complete_handshake(&Credentials::new("alice", "any"))
            .await
    });
    verifier.entered.notified().await;

    let read_conn = conn.clone();
    let read_task = tokio::spawn(async move {
        read_conn
            .dispatch(&OperationDescriptor::data_read("GetRequest", "orders", None))
            .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!read_task.is_finished(), "dispatch ran during verification");

    verifier.release.notify_one();
    auth_task.await.unwrap().unwrap();
    // serialized behind the handshake, so it sees the authenticated state
    read_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_cancelled_credential_check_leaves_state_untouched() {
    let verifier = Arc::new(GatedVerifier::default());
    let machine = secured_machine(verifier.clone());
    let conn = machine.accept(peer()).await;
    conn.begin_handshake().await.unwrap();

    let outcome = tokio::time::timeout(
        Duration::from_millis(50),
        conn.complete_handshake(&Credentials::new("stuck", "any")),
    )
    .await;
    assert!(outcome.is_err(), "verification should have timed out");

    assert_eq!(conn.state().await, ConnectionState::Authenticating);
    assert!(conn.principal().await.is_none());

    // the connection is still usable for another attempt
    let retry_conn = conn.clone();
    let retry = tokio::spawn(async move {
        retry_conn
            .complete_handshake(&Credentials::new("alice", "any"))
            .await
    });
    verifier.release.notify_one();
    retry.await.unwrap().unwrap();
    assert_eq!(conn.state().await, ConnectionState::Authenticated);
}

#[tokio::test]
async fn test_closing_connection_abandons_handshake() {
    let verifier = Arc::new(GatedVerifier::default());
    let machine = Arc::new(secured_machine(verifier.clone()));
    let conn = machine.accept(peer()).await;
    let id = conn.id();
    conn.begin_handshake().await.unwrap();

    let task_machine = machine.clone();
    let pending = tokio::spawn(async move {
        task_machine
            .complete_handshake(id, &Credentials::new("stuck", "any"))
            .await
    });
    verifier.entered.notified().await;

    machine.close(id).await.unwrap();
    pending.abort();
    assert!(pending.await.unwrap_err().is_cancelled());

    let other = machine.accept(peer()).await;
    assert_eq!(other.state().await, ConnectionState::Unauthenticated);
    assert!(machine.get(id).await.is_err());
}
