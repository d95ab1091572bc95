//! Wiremock-backed registry harness, gated behind the `test-utils`
//! feature so the rest of the workspace isn't forced to depend on
//! wiremock to depend on this crate. Mirrors the teacher's
//! `test_utils.rs` (`TestContext`/`mount_formula`), scoped down to what
//! this crate's own HTTP-layer tests need: a real server to drive
//! [`crate::traits::ReqwestHttpClient`] against, as opposed to the
//! trait-level [`crate::traits::MockHttpClient`] used everywhere else.

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Starts a mock registry and mounts a single 200 response with `body`
/// at `url_path` (the path component of what
/// [`crate::bottle::bottle_url`] would produce).
pub async fn mock_registry_with_blob(url_path: &str, body: Vec<u8>) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(url_path))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(&server)
        .await;
    server
}

/// Mounts a non-2xx response at `url_path`, for exercising status-code
/// mapping against a real HTTP round trip.
pub async fn mock_registry_with_status(url_path: &str, status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(url_path))
        .respond_with(ResponseTemplate::new(status))
        .mount(&server)
        .await;
    server
}
