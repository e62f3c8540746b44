//! Directory client behaviour: caching, TTL, retry, timeouts and the HTTP
//! transport.
//!
//! Simulated-time tests use [`SimEnv`] so TTL and backoff are exact. HTTP
//! tests run against a mockito server with the system clock.

use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use mockito::Matcher;
use veilchat_client::{
    ChaoticKeyDirectory, Credential, DirectoryClientConfig, DirectoryError, Environment,
    HttpDirectoryConfig, HttpKeyDirectory, KeyDirectory, KeyDirectoryClient, MemoryKeyDirectory,
    RetryPolicy, SimEnv, SystemEnv,
    directory::{CachedPublicKey, PublicKeyRecord},
};
use veilchat_crypto::{CryptoProvider, PublicKey, RsaAesProvider};

const MINUTE: Duration = Duration::from_secs(60);

/// Two distinct public keys, generated once per test binary.
fn keys() -> &'static [PublicKey; 2] {
    static KEYS: OnceLock<[PublicKey; 2]> = OnceLock::new();
    KEYS.get_or_init(|| {
        let provider = RsaAesProvider::with_modulus_bits(1024);
        let mut rng = SimEnv::with_seed(11).crypto_rng();
        let mut generate =
            || provider.generate_key_pair(1, &mut rng).unwrap().public_key().clone();
        [generate(), generate()]
    })
}

fn record(key: &PublicKey, version: u64) -> PublicKeyRecord {
    PublicKeyRecord { public_key: key.to_pem().to_owned(), key_version: version }
}

fn credential() -> Credential {
    Credential::new("token")
}

fn client<D: KeyDirectory>(directory: D, env: &SimEnv) -> KeyDirectoryClient<SimEnv> {
    KeyDirectoryClient::new(Arc::new(directory), env.clone())
}

fn bob_directory() -> MemoryKeyDirectory {
    let directory = MemoryKeyDirectory::new();
    directory.insert("bob", record(&keys()[0], 1));
    directory
}

#[tokio::test]
async fn second_fetch_is_served_from_cache() {
    let directory = bob_directory();
    let env = SimEnv::with_seed(1);
    let client = client(directory.clone(), &env);

    let first = client.fetch_public_key("bob", &credential()).await.unwrap();
    let second = client.fetch_public_key("bob", &credential()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.public_key, keys()[0]);
    assert_eq!(directory.get_count(), 1);
    assert_eq!(client.cached_version("bob"), Some(1));
}

#[tokio::test]
async fn entry_is_served_until_ttl_inclusive() {
    let directory = bob_directory();
    let env = SimEnv::with_seed(1);
    let client = client(directory.clone(), &env);
    client.fetch_public_key("bob", &credential()).await.unwrap();

    env.advance(30 * MINUTE);
    client.fetch_public_key("bob", &credential()).await.unwrap();
    assert_eq!(directory.get_count(), 1);

    env.advance(Duration::from_secs(1));
    client.fetch_public_key("bob", &credential()).await.unwrap();
    assert_eq!(directory.get_count(), 2);
}

#[tokio::test]
async fn expired_entry_picks_up_new_key() {
    let directory = bob_directory();
    let env = SimEnv::with_seed(1);
    let client = client(directory.clone(), &env);
    client.fetch_public_key("bob", &credential()).await.unwrap();

    directory.insert("bob", record(&keys()[1], 2));
    let stale = client.fetch_public_key("bob", &credential()).await.unwrap();
    env.advance(31 * MINUTE);
    let fresh = client.fetch_public_key("bob", &credential()).await.unwrap();

    assert_eq!(stale.version, 1);
    assert_eq!(fresh.version, 2);
    assert_eq!(fresh.public_key, keys()[1]);
}

#[tokio::test]
async fn transient_failures_are_retried_with_backoff() {
    let chaotic = ChaoticKeyDirectory::failing_first(bob_directory(), 2);
    let env = SimEnv::with_seed(1);
    let client = client(chaotic.clone(), &env);

    let fetched = client.fetch_public_key("bob", &credential()).await.unwrap();

    assert_eq!(fetched.version, 1);
    assert_eq!(chaotic.request_count(), 3);
    assert_eq!(chaotic.injected_failures(), 2);

    let sleeps = env.sleeps();
    assert_eq!(sleeps.len(), 2);
    assert!((200..=300).contains(&sleeps[0].as_millis()), "first backoff {:?}", sleeps[0]);
    assert!((400..=500).contains(&sleeps[1].as_millis()), "second backoff {:?}", sleeps[1]);
}

#[tokio::test]
async fn retries_stop_after_three_attempts() {
    let chaotic = ChaoticKeyDirectory::failing_first(bob_directory(), 10);
    let env = SimEnv::with_seed(1);
    let client = client(chaotic.clone(), &env);

    let result = client.fetch_public_key("bob", &credential()).await;

    assert!(matches!(result, Err(DirectoryError::Transport(_))));
    assert_eq!(chaotic.request_count(), 3);
    assert!(client.cache().is_empty());
}

#[tokio::test]
async fn unknown_user_is_not_retried() {
    let directory = MemoryKeyDirectory::new();
    let env = SimEnv::with_seed(1);
    let client = client(directory.clone(), &env);

    let result = client.fetch_public_key("carol", &credential()).await;

    assert_eq!(result, Err(DirectoryError::NotFound { user_id: "carol".into() }));
    assert_eq!(directory.get_count(), 1);
    assert!(env.sleeps().is_empty());
}

#[tokio::test]
async fn bad_credential_is_not_retried() {
    let directory = MemoryKeyDirectory::requiring_credential(&Credential::new("secret"));
    directory.insert("bob", record(&keys()[0], 1));
    let env = SimEnv::with_seed(1);
    let client = client(directory.clone(), &env);

    let result = client.fetch_public_key("bob", &Credential::new("wrong")).await;

    assert_eq!(result, Err(DirectoryError::Unauthorized));
    assert_eq!(directory.get_count(), 1);
}

#[tokio::test]
async fn hanging_directory_times_out_each_attempt() {
    let chaotic = ChaoticKeyDirectory::hanging(bob_directory());
    let env = SimEnv::with_seed(1);
    let client = client(chaotic.clone(), &env);

    let result = client.fetch_public_key("bob", &credential()).await;

    assert_eq!(result, Err(DirectoryError::Timeout(Duration::from_secs(10))));
    assert_eq!(chaotic.request_count(), 3);
    let timeouts = env.sleeps().iter().filter(|d| **d == Duration::from_secs(10)).count();
    assert_eq!(timeouts, 3);
    assert!(env.elapsed() >= Duration::from_secs(30));
}

#[tokio::test]
async fn attempt_timeout_is_configurable() {
    let config = DirectoryClientConfig {
        attempt_timeout: Duration::from_secs(2),
        retry: RetryPolicy::immediate(1),
        ..DirectoryClientConfig::default()
    };
    let env = SimEnv::with_seed(1);
    let client = KeyDirectoryClient::with_config(
        Arc::new(ChaoticKeyDirectory::hanging(bob_directory())),
        env.clone(),
        &config,
    );

    let result = client.fetch_public_key("bob", &credential()).await;

    assert_eq!(result, Err(DirectoryError::Timeout(Duration::from_secs(2))));
    assert_eq!(env.elapsed(), Duration::from_secs(2));
}

#[tokio::test]
async fn malformed_directory_key_is_rejected_and_not_cached() {
    let directory = MemoryKeyDirectory::new();
    directory.insert("bob", PublicKeyRecord { public_key: "not a key".into(), key_version: 1 });
    let env = SimEnv::with_seed(1);
    let client = client(directory.clone(), &env);

    let result = client.fetch_public_key("bob", &credential()).await;

    assert!(matches!(result, Err(DirectoryError::MalformedKey { ref user_id, .. }) if user_id == "bob"));
    assert_eq!(directory.get_count(), 1);
    assert!(client.cache().is_empty());
}

#[tokio::test]
async fn malformed_cache_entry_is_refetched() {
    let directory = bob_directory();
    let env = SimEnv::with_seed(1);
    let client = client(directory.clone(), &env);
    client.cache().insert(CachedPublicKey {
        owner_id: "bob".into(),
        public_key_pem: "corrupted".into(),
        version: 1,
        fetched_at: env.now(),
    });

    let fetched = client.fetch_public_key("bob", &credential()).await.unwrap();

    assert_eq!(fetched.public_key, keys()[0]);
    assert_eq!(directory.get_count(), 1);
    assert_eq!(client.cache().peek("bob").map(|e| e.public_key_pem), Some(keys()[0].to_pem().to_owned()));
}

#[tokio::test]
async fn rotation_check_compares_cached_and_remote_versions() {
    let directory = bob_directory();
    let env = SimEnv::with_seed(1);
    let client = client(directory.clone(), &env);

    // Nothing cached: fetches, caches, and reports no rotation
    assert!(!client.check_rotation_needed("bob", &credential()).await.unwrap());
    assert_eq!(client.cached_version("bob"), Some(1));
    assert!(!client.check_rotation_needed("bob", &credential()).await.unwrap());

    directory.insert("bob", record(&keys()[1], 2));
    assert!(client.check_rotation_needed("bob", &credential()).await.unwrap());

    let refreshed = client.refresh("bob", &credential()).await.unwrap();
    assert_eq!(refreshed.version, 2);
    assert!(!client.check_rotation_needed("bob", &credential()).await.unwrap());
}

#[tokio::test]
async fn remote_fetch_bypasses_cache() {
    let directory = bob_directory();
    let env = SimEnv::with_seed(1);
    let client = client(directory.clone(), &env);

    client.fetch_remote("bob", &credential()).await.unwrap();
    client.fetch_remote("bob", &credential()).await.unwrap();

    assert_eq!(directory.get_count(), 2);
    assert!(client.cache().is_empty());
}

#[tokio::test]
async fn upload_is_retried() {
    let chaotic = ChaoticKeyDirectory::failing_first(MemoryKeyDirectory::new(), 1);
    let env = SimEnv::with_seed(1);
    let client = client(chaotic.clone(), &env);

    let acked = client.upload_public_key("alice", &keys()[0], 3, &credential()).await.unwrap();

    assert_eq!(acked, 3);
    assert_eq!(chaotic.inner().record("alice"), Some(record(&keys()[0], 3)));
    assert_eq!(chaotic.inner().put_count(), 1);
}

#[tokio::test]
async fn invalidate_and_clear_drop_entries() {
    let directory = bob_directory();
    directory.insert("carol", record(&keys()[1], 4));
    let env = SimEnv::with_seed(1);
    let client = client(directory, &env);
    client.fetch_public_key("bob", &credential()).await.unwrap();
    client.fetch_public_key("carol", &credential()).await.unwrap();

    client.invalidate("bob");
    assert_eq!(client.cached_version("bob"), None);
    assert_eq!(client.cached_version("carol"), Some(4));

    client.clear_cache();
    assert!(client.cache().is_empty());
}

fn http_client(url: &str) -> KeyDirectoryClient<SystemEnv> {
    let directory = HttpKeyDirectory::new(&HttpDirectoryConfig::new(url)).unwrap();
    let config = DirectoryClientConfig {
        retry: RetryPolicy::immediate(3),
        ..DirectoryClientConfig::default()
    };
    KeyDirectoryClient::with_config(Arc::new(directory), SystemEnv::new(), &config)
}

#[tokio::test]
async fn http_fetch_reads_wrapped_response() {
    let mut server = mockito::Server::new_async().await;
    let body = serde_json::json!({
        "status": "success",
        "data": { "public_key": keys()[0].to_pem(), "key_version": 4 },
    });
    let mock = server
        .mock("GET", "/users/bob/public-key")
        .match_header("authorization", "Bearer token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .create_async()
        .await;

    let fetched = http_client(&server.url()).fetch_public_key("bob", &credential()).await.unwrap();

    assert_eq!(fetched.version, 4);
    assert_eq!(fetched.public_key, keys()[0]);
    mock.assert_async().await;
}

#[tokio::test]
async fn http_fetch_reads_flat_response() {
    let mut server = mockito::Server::new_async().await;
    let body = serde_json::json!({ "public_key": keys()[1].to_pem(), "key_version": 2 });
    server
        .mock("GET", "/users/bob/public-key")
        .with_status(200)
        .with_body(body.to_string())
        .create_async()
        .await;

    let fetched = http_client(&server.url()).fetch_public_key("bob", &credential()).await.unwrap();

    assert_eq!(fetched.version, 2);
}

#[tokio::test]
async fn http_not_found_is_not_retried() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/users/carol/public-key")
        .with_status(404)
        .with_body(r#"{"status":"error","message":"User not found"}"#)
        .expect(1)
        .create_async()
        .await;

    let result = http_client(&server.url()).fetch_public_key("carol", &credential()).await;

    assert_eq!(result, Err(DirectoryError::NotFound { user_id: "carol".into() }));
    mock.assert_async().await;
}

#[tokio::test]
async fn http_server_errors_are_retried() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/users/bob/public-key")
        .with_status(503)
        .expect(3)
        .create_async()
        .await;

    let result = http_client(&server.url()).fetch_public_key("bob", &credential()).await;

    assert_eq!(result, Err(DirectoryError::Status { status: 503 }));
    mock.assert_async().await;
}

#[tokio::test]
async fn http_upload_posts_record_and_reads_ack() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/users/alice/public-key")
        .match_header("authorization", "Bearer token")
        .match_body(Matcher::PartialJson(serde_json::json!({ "key_version": 7 })))
        .with_status(200)
        .with_body(r#"{"status":"success","data":{"key_version":7}}"#)
        .create_async()
        .await;

    let acked = http_client(&server.url())
        .upload_public_key("alice", &keys()[0], 7, &credential())
        .await
        .unwrap();

    assert_eq!(acked, 7);
    mock.assert_async().await;
}

#[tokio::test]
async fn http_upload_without_ack_body_uses_sent_version() {
    let mut server = mockito::Server::new_async().await;
    server.mock("POST", "/users/alice/public-key").with_status(201).create_async().await;

    let acked = http_client(&server.url())
        .upload_public_key("alice", &keys()[0], 5, &credential())
        .await
        .unwrap();

    assert_eq!(acked, 5);
}

#[tokio::test]
async fn http_rejection_is_permanent() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/users/alice/public-key")
        .with_status(400)
        .with_body(r#"{"status":"error","message":"Invalid public key format"}"#)
        .expect(1)
        .create_async()
        .await;

    let result = http_client(&server.url())
        .upload_public_key("alice", &keys()[0], 1, &credential())
        .await;

    assert_eq!(
        result,
        Err(DirectoryError::Rejected { status: 400, message: "Invalid public key format".into() })
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn http_user_id_is_sent_as_one_path_segment() {
    let mut server = mockito::Server::new_async().await;
    let body = serde_json::json!({ "public_key": keys()[0].to_pem(), "key_version": 1 });
    let escaped = server
        .mock("GET", "/users/team%2F..%2Feve%3Fx=1/public-key")
        .with_status(200)
        .with_body(body.to_string())
        .expect(1)
        .create_async()
        .await;
    let elsewhere = server
        .mock("GET", Matcher::Regex("^/(?:team|eve)".into()))
        .expect(0)
        .create_async()
        .await;

    let fetched =
        http_client(&server.url()).fetch_remote("team/../eve?x=1", &credential()).await.unwrap();

    assert_eq!(fetched.version, 1);
    escaped.assert_async().await;
    elsewhere.assert_async().await;
}

#[tokio::test]
async fn http_dot_segment_user_id_never_reaches_the_server() {
    let mut server = mockito::Server::new_async().await;
    let any = server.mock("GET", Matcher::Any).expect(0).create_async().await;

    let result = http_client(&server.url()).fetch_remote("..", &credential()).await;

    assert_eq!(result.unwrap_err(), DirectoryError::InvalidUserId { user_id: "..".into() });
    any.assert_async().await;
}

#[tokio::test]
async fn http_unreachable_directory_is_a_transport_error() {
    // Nothing listens on the discard port
    let result = http_client("http://127.0.0.1:9").fetch_remote("bob", &credential()).await;

    assert!(matches!(result, Err(DirectoryError::Transport(_))), "{result:?}");
}
