//! Builtin product versions.
//!
//! Each version ships its own instances of the reference workload scripts
//! and the in-memory server, so identically named scripts resolve per
//! version.

use std::sync::Arc;

use soak_env::{CatalogResolver, VersionArtifact, VersionTag};
use soak_server::{ArtifactServerExt, MemoryServerFactory};

use crate::workloads::{ReceiveMessages, SendMessages, RECEIVE_MESSAGES, SEND_MESSAGES};

pub const CURRENT: &str = "current";
pub const PREVIOUS_MAJOR: &str = "previous-major";
pub const LEGACY: &str = "legacy";

/// Wire protocol each builtin version stamps on its messages.
fn protocol(tag: &str) -> &'static str {
    match tag {
        CURRENT => "core-2",
        PREVIOUS_MAJOR => "core-1",
        _ => "legacy-core",
    }
}

/// Artifact for one builtin version.
pub fn builtin_artifact(tag: &VersionTag) -> VersionArtifact {
    VersionArtifact::new(tag.clone())
        .with_script(SEND_MESSAGES, Arc::new(SendMessages::new(protocol(tag.as_str()))))
        .with_script(RECEIVE_MESSAGES, Arc::new(ReceiveMessages::new()))
        .with_server(Arc::new(MemoryServerFactory::new()))
}

/// Resolver knowing `current`, `previous-major` and `legacy`.
pub fn builtin_resolver() -> CatalogResolver {
    [CURRENT, PREVIOUS_MAJOR, LEGACY]
        .into_iter()
        .fold(CatalogResolver::new(), |resolver, tag| {
            resolver.with_version(VersionTag::from_static(tag), builtin_artifact)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use soak_env::{ArtifactResolver, ScriptRef};

    #[test]
    fn test_builtin_versions_resolve_with_scripts_and_server() {
        let resolver = builtin_resolver();
        assert_eq!(resolver.versions().len(), 3);
        for tag in resolver.versions() {
            let artifact = resolver.resolve(&tag).unwrap();
            assert_eq!(artifact.tag(), &tag);
            assert!(artifact.scripts().contains(&ScriptRef::from(SEND_MESSAGES)));
            assert!(artifact.scripts().contains(&ScriptRef::from(RECEIVE_MESSAGES)));
            assert!(artifact.server_factory().is_some());
        }
    }

    #[test]
    fn test_unknown_version_is_configuration_error() {
        let err = builtin_resolver()
            .resolve(&VersionTag::new("nightly").unwrap())
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("legacy"));
    }
}
