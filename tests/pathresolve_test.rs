//! Coverage for the `default`-container DIRHASH path and the directory
//! marker objects `ensure_directory_exists` creates along the way.

mod support;

use git_annex_remote_hubic::pathresolve;
use git_annex_remote_hubic::swift::SwiftClient;

use support::{FakeHost, MockSwift};

#[tokio::test]
async fn default_container_uses_dirhash_and_creates_directory_markers() {
    let mock = MockSwift::start().await;
    let host = FakeHost::new(mock.endpoint());

    let head_path = pathresolve::resolve(&host, "default", "", "somekey");
    assert_eq!(head_path, "aa/bb/somekey");

    let client = SwiftClient::new(mock.endpoint(), "token".to_string(), 65536);
    let dir = pathresolve::parent_of(&head_path);
    pathresolve::ensure_directory_exists(&host, &client, "default", dir)
        .await
        .unwrap();

    assert!(mock.object_exists("default", "aa"));
    assert!(mock.object_exists("default", "aa/bb"));
}

#[tokio::test]
async fn non_default_container_skips_dirhash_and_directory_markers() {
    let mock = MockSwift::start().await;
    let host = FakeHost::new(mock.endpoint());

    let head_path = pathresolve::resolve(&host, "mycontainer", "prefix", "somekey");
    assert_eq!(head_path, "prefix/somekey");

    let client = SwiftClient::new(mock.endpoint(), "token".to_string(), 65536);
    pathresolve::ensure_directory_exists(&host, &client, "mycontainer", "prefix")
        .await
        .unwrap();

    // No directory marker objects in non-default containers, only the
    // container itself.
    assert!(!mock.object_exists("mycontainer", "prefix"));
}
