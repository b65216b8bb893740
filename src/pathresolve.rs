//! Key-to-path resolution and directory-marker creation.
//!
//! Grounded directly in `swift.py::get_path`/`ensure_directory_exists`,
//! with the original's directory-creation bug fixed: it HEADed a literal
//! `"path"` string instead of the prefix actually being walked.

use crate::error::Result;
use crate::host::RemoteHost;
use crate::swift::SwiftClient;

/// Join path components with `/`, skipping empty ones so a blank prefix or
/// a blank key doesn't introduce a leading/double slash.
fn join(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("/")
}

/// Resolve the head-chunk path for `key` under container `container` and
/// prefix `path_prefix`. Only the legacy `default` container uses the
/// host-provided two-level DIRHASH fragment.
pub fn resolve(io: &dyn RemoteHost, container: &str, path_prefix: &str, key: &str) -> String {
    if container == "default" {
        let hash = io.dirhash(key);
        join(&[path_prefix, &hash, key])
    } else {
        join(&[path_prefix, key])
    }
}

/// The parent directory of a resolved path, `""` if the path has no slash.
pub fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Ensure `dir` exists as a navigable directory before an upload into it.
///
/// In non-`default` containers this only ensures the container itself
/// exists (no per-directory marker objects). In `default`, every prefix of
/// `dir` is HEADed and, on 404, created as an `application/directory`
/// object.
pub async fn ensure_directory_exists(
    io: &dyn RemoteHost,
    swift: &SwiftClient,
    container: &str,
    dir: &str,
) -> Result<()> {
    io.debug(&format!("ensure directory exists '{dir}'"));

    if container != "default" {
        swift.put_container(container).await?;
        return Ok(());
    }

    if dir.is_empty() {
        return Ok(());
    }

    let components: Vec<&str> = dir.split('/').collect();
    for idx in 1..=components.len() {
        let prefix = components[..idx].join("/");
        match swift.head_object(container, &prefix).await {
            Ok(head) => {
                if head.content_type.as_deref() != Some("application/directory") {
                    io.fatal(&format!(
                        "Directory {prefix} has type {}",
                        head.content_type.unwrap_or_default()
                    ));
                }
            }
            Err(crate::error::RemoteError::NotFound) => {
                swift
                    .put_directory_marker(container, &prefix)
                    .await?;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_non_default_container_without_dirhash() {
        assert_eq!(join(&["prefix", "key"]), "prefix/key");
    }

    #[test]
    fn join_skips_empty_components() {
        assert_eq!(join(&["", "aa/bb", "key"]), "aa/bb/key");
        assert_eq!(join(&[""]), "");
    }

    #[test]
    fn parent_of_nested_path() {
        assert_eq!(parent_of("aa/bb/key"), "aa/bb");
        assert_eq!(parent_of("key"), "");
    }
}
