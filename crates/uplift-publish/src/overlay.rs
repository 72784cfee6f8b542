//! Kustomization overlay reading and editing.
//!
//! Only the image tag list is interpreted; everything else in the overlay is
//! carried through untouched. Rendering and validating the manifests the
//! overlay points at is deliberately out of scope.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::OverlayError;

/// One entry in a kustomization's `images:` transformer list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KustomizeImage {
    /// Image name as referenced by the base manifests.
    pub name: String,
    /// Replacement repository, if rewritten.
    #[serde(rename = "newName", default, skip_serializing_if = "Option::is_none")]
    pub new_name: Option<String>,
    /// Replacement tag.
    #[serde(rename = "newTag", default, skip_serializing_if = "Option::is_none")]
    pub new_tag: Option<String>,
}

/// A parsed `kustomization.yaml`, preserving fields we do not interpret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Overlay {
    /// The image transformer entries.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<KustomizeImage>,
    /// Everything else (resources, patches, namespace, ...), round-tripped
    /// verbatim.
    #[serde(flatten)]
    pub rest: BTreeMap<String, serde_yaml::Value>,
}

impl Overlay {
    /// Parse an overlay file's contents.
    pub fn parse(path: &Path, contents: &str) -> Result<Self, OverlayError> {
        serde_yaml::from_str(contents).map_err(|source| OverlayError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Current tag for a service's image, if one is pinned.
    pub fn image_tag(&self, service: &str) -> Option<&str> {
        self.images
            .iter()
            .find(|img| img.name == service)
            .and_then(|img| img.new_tag.as_deref())
    }

    /// Pin a service's image tag, inserting the entry if absent.
    ///
    /// Returns the previous tag (empty string when the service had none).
    pub fn set_image_tag(&mut self, service: &str, repository: &str, tag: &str) -> String {
        if let Some(img) = self.images.iter_mut().find(|img| img.name == service) {
            let old = img.new_tag.clone().unwrap_or_default();
            img.new_tag = Some(tag.to_string());
            old
        } else {
            self.images.push(KustomizeImage {
                name: service.to_string(),
                new_name: (!repository.is_empty()).then(|| repository.to_string()),
                new_tag: Some(tag.to_string()),
            });
            String::new()
        }
    }

    /// Serialize back to YAML.
    pub fn to_yaml(&self) -> Result<String, OverlayError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// The mutation key used for a service's tag edit, e.g.
/// `images[ledger].newTag`.
pub fn tag_key(service: &str) -> String {
    format!("images[{service}].newTag")
}

/// Recover the service name from a tag edit key.
pub fn parse_tag_key(key: &str) -> Option<&str> {
    key.strip_prefix("images[")?.strip_suffix("].newTag")
}

/// Result of applying a mutation to the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// Files were rewritten and need committing.
    Changed(Vec<std::path::PathBuf>),
    /// Every edit was already in place; nothing to commit.
    Noop,
}

/// Apply a mutation's edits to the store's working tree.
///
/// Idempotent: an edit whose new value is already in the tree is skipped.
/// An edit whose old value no longer matches the tree fails with
/// [`ApplyError::Stale`], leaving no partial writes behind (edits are
/// verified against the tree before any file is rewritten).
pub async fn apply_mutation(
    store: &dyn crate::store::ConfigStore,
    mutation: &uplift_core::ConfigurationMutation,
) -> Result<Applied, crate::error::ApplyError> {
    use crate::error::ApplyError;

    // First pass: load and verify every touched file.
    let mut overlays: BTreeMap<std::path::PathBuf, Overlay> = BTreeMap::new();
    for edit in mutation.edits() {
        if !overlays.contains_key(&edit.file_path) {
            let contents = match store.read_file(&edit.file_path).await {
                Ok(contents) => contents,
                // A brand-new overlay is legal when the plan recorded no
                // previous value.
                Err(crate::error::StoreError::MissingFile { .. })
                    if mutation
                        .edits()
                        .iter()
                        .filter(|e| e.file_path == edit.file_path)
                        .all(|e| e.old_value.is_empty()) =>
                {
                    "images: []\n".to_string()
                }
                Err(err) => return Err(err.into()),
            };
            overlays.insert(edit.file_path.clone(), Overlay::parse(&edit.file_path, &contents)?);
        }
    }

    for edit in mutation.edits() {
        let Some(service) = parse_tag_key(&edit.key) else {
            continue;
        };
        let overlay = &overlays[&edit.file_path];
        let current = overlay.image_tag(service).unwrap_or("");
        if current != edit.new_value && current != edit.old_value {
            return Err(ApplyError::Stale {
                file: edit.file_path.clone(),
                key: edit.key.clone(),
                expected: edit.old_value.clone(),
                found: current.to_string(),
            });
        }
    }

    // Second pass: rewrite.
    let mut changed = Vec::new();
    for edit in mutation.edits() {
        let Some(service) = parse_tag_key(&edit.key) else {
            continue;
        };
        let Some(overlay) = overlays.get_mut(&edit.file_path) else {
            continue;
        };
        if overlay.image_tag(service).unwrap_or("") == edit.new_value {
            continue;
        }
        overlay.set_image_tag(service, "", &edit.new_value);
        if !changed.contains(&edit.file_path) {
            changed.push(edit.file_path.clone());
        }
    }

    for path in &changed {
        let yaml = overlays[path].to_yaml()?;
        store.write_file(path, &yaml).await?;
    }

    if changed.is_empty() {
        Ok(Applied::Noop)
    } else {
        Ok(Applied::Changed(changed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    const SAMPLE: &str = r#"
apiVersion: kustomize.config.k8s.io/v1beta1
kind: Kustomization
namespace: ledger-dev
resources:
  - ../../base
images:
  - name: ledger
    newName: ghcr.io/acme/ledger
    newTag: main-xyz9990
  - name: ledger-backoffice
    newName: ghcr.io/acme/ledger-backoffice
    newTag: main-xyz9990
"#;

    #[test]
    fn reads_pinned_tags() {
        let overlay = Overlay::parse(&PathBuf::from("k.yaml"), SAMPLE).unwrap();
        assert_eq!(overlay.image_tag("ledger"), Some("main-xyz9990"));
        assert_eq!(overlay.image_tag("missing"), None);
    }

    #[test]
    fn set_tag_returns_previous_value() {
        let mut overlay = Overlay::parse(&PathBuf::from("k.yaml"), SAMPLE).unwrap();
        let old = overlay.set_image_tag("ledger", "ghcr.io/acme/ledger", "main-abc1234");
        assert_eq!(old, "main-xyz9990");
        assert_eq!(overlay.image_tag("ledger"), Some("main-abc1234"));
    }

    #[test]
    fn unknown_fields_round_trip() {
        let overlay = Overlay::parse(&PathBuf::from("k.yaml"), SAMPLE).unwrap();
        let yaml = overlay.to_yaml().unwrap();
        let reparsed = Overlay::parse(&PathBuf::from("k.yaml"), &yaml).unwrap();
        assert_eq!(overlay, reparsed);
        assert!(yaml.contains("namespace: ledger-dev"));
        assert!(yaml.contains("../../base"));
    }

    #[test]
    fn inserts_entry_for_new_service() {
        let mut overlay = Overlay::parse(&PathBuf::from("k.yaml"), "images: []\n").unwrap();
        let old = overlay.set_image_tag("ledger", "ghcr.io/acme/ledger", "main-abc1234");
        assert_eq!(old, "");
        assert_eq!(overlay.image_tag("ledger"), Some("main-abc1234"));
    }

    #[test]
    fn tag_key_matches_convention() {
        assert_eq!(tag_key("ledger"), "images[ledger].newTag");
    }
}
