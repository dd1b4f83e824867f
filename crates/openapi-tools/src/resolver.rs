//! `$ref` resolution across the spec and any documents it points at.
//!
//! `openapiv3` keeps references as `ReferenceOr::Reference`; nothing follows them. The resolver
//! does, for local pointers (`#/components/...`), relative or absolute files, `file://` URLs and
//! `http(s)` URLs. A reference is always interpreted relative to the document it appears in, so
//! every call takes the current [`DocId`] and returns the one the target was found in.

use crate::document;
use crate::error::{OpenApiToolsError, Result};
use crate::upgrade::upgrade_document;
use openapiv3::ReferenceOr;
use parking_lot::RwLock;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

/// Identity of a loaded document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocId {
    Url(Url),
    File(PathBuf),
}

impl DocId {
    /// Identify the root spec location.
    ///
    /// # Errors
    ///
    /// Returns an error if the location is a malformed URL or `file://` URL.
    pub fn parse(spec_location: &str) -> Result<Self> {
        Self::locate(None, spec_location)
    }

    /// Where `target` points when written inside `base` (or at top level when `base` is `None`).
    fn locate(base: Option<&DocId>, target: &str) -> Result<Self> {
        let bad = |message: String| OpenApiToolsError::OpenApi(format!("{message}: {target}"));

        if document::is_url(target) {
            let url = Url::parse(target).map_err(|e| bad(format!("invalid URL ({e})")))?;
            return Ok(DocId::Url(without_fragment(url)));
        }
        if target.starts_with("file://") {
            let path = Url::parse(target)
                .map_err(|e| bad(format!("invalid file URL ({e})")))?
                .to_file_path()
                .map_err(|()| bad("file URL is not a local path".to_string()))?;
            return Ok(DocId::File(canonical(path)));
        }

        match base {
            Some(DocId::Url(base_url)) => base_url
                .join(target)
                .map(|u| DocId::Url(without_fragment(u)))
                .map_err(|e| bad(format!("cannot resolve against {base_url} ({e})"))),
            Some(DocId::File(base_path)) if Path::new(target).is_relative() => {
                let dir = base_path.parent().unwrap_or_else(|| Path::new("."));
                Ok(DocId::File(canonical(dir.join(target))))
            }
            _ => Ok(DocId::File(canonical(PathBuf::from(target)))),
        }
    }

    fn location(&self) -> String {
        match self {
            DocId::Url(u) => u.to_string(),
            DocId::File(p) => p.display().to_string(),
        }
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocId::Url(u) => write!(f, "{}", crate::redact::redact_url(u)),
            DocId::File(p) => write!(f, "{}", p.display()),
        }
    }
}

fn without_fragment(mut url: Url) -> Url {
    url.set_fragment(None);
    url
}

fn canonical(path: PathBuf) -> PathBuf {
    std::fs::canonicalize(&path).unwrap_or(path)
}

/// A parsed `$ref`: the document it names and an optional JSON pointer into it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RefTarget {
    doc: DocId,
    pointer: Option<String>,
}

impl RefTarget {
    fn parse(current: &DocId, reference: &str) -> Result<Self> {
        let (doc_part, fragment) = reference.split_once('#').unwrap_or((reference, ""));
        let pointer = match fragment {
            "" => None,
            f if f.starts_with('/') => Some(f.to_string()),
            _ => {
                return Err(OpenApiToolsError::OpenApi(format!(
                    "Unsupported $ref fragment (expected a JSON pointer): {reference}"
                )));
            }
        };
        let doc = if doc_part.is_empty() {
            current.clone()
        } else {
            DocId::locate(Some(current), doc_part)?
        };
        Ok(Self { doc, pointer })
    }
}

impl fmt::Display for RefTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.doc, self.pointer.as_deref().unwrap_or(""))
    }
}

/// Follows `$ref` chains, loading and caching referenced documents on demand.
#[derive(Debug)]
pub struct OpenApiResolver<'a> {
    root_doc: DocId,
    client: &'a Client,
    docs: RwLock<HashMap<DocId, Arc<Value>>>,
}

impl<'a> OpenApiResolver<'a> {
    /// `root_value` is the already upgraded root document; refs into the root resolve against
    /// it, never against the file it was read from.
    #[must_use]
    pub fn new(root_doc: DocId, root_value: Value, client: &'a Client) -> Self {
        let docs = HashMap::from([(root_doc.clone(), Arc::new(root_value))]);
        Self {
            root_doc,
            client,
            docs: RwLock::new(docs),
        }
    }

    #[must_use]
    pub fn root_doc(&self) -> &DocId {
        &self.root_doc
    }

    /// Follow `item` (found in `current_doc`) until it is no longer a reference.
    ///
    /// # Errors
    ///
    /// Returns an error if a reference is malformed or cyclic, a referenced document cannot be
    /// loaded, or the target does not deserialize as `T`.
    pub async fn resolve<T>(&self, current_doc: &DocId, item: &ReferenceOr<T>) -> Result<(DocId, T)>
    where
        T: Clone + DeserializeOwned,
    {
        let mut doc = current_doc.clone();
        let mut reference = match item {
            ReferenceOr::Item(value) => return Ok((doc, value.clone())),
            ReferenceOr::Reference { reference } => reference.clone(),
        };
        let mut chain: Vec<RefTarget> = Vec::new();

        loop {
            let target = RefTarget::parse(&doc, &reference)?;
            if chain.contains(&target) {
                return Err(OpenApiToolsError::OpenApi(format!(
                    "Cyclic $ref detected while resolving: {reference}"
                )));
            }

            let value = self.lookup(&target).await?;
            let next: ReferenceOr<T> = serde_json::from_value(value).map_err(|e| {
                OpenApiToolsError::OpenApi(format!(
                    "$ref '{reference}' ({target}) does not point at the expected object: {e}"
                ))
            })?;
            doc = target.doc.clone();
            chain.push(target);

            match next {
                ReferenceOr::Item(value) => return Ok((doc, value)),
                ReferenceOr::Reference { reference: r } => reference = r,
            }
        }
    }

    async fn lookup(&self, target: &RefTarget) -> Result<Value> {
        let doc = self.load(&target.doc).await?;
        match &target.pointer {
            None => Ok((*doc).clone()),
            Some(ptr) => doc.pointer(ptr).cloned().ok_or_else(|| {
                OpenApiToolsError::OpenApi(format!("Unresolved $ref: nothing at {target}"))
            }),
        }
    }

    async fn load(&self, doc: &DocId) -> Result<Arc<Value>> {
        if let Some(v) = self.docs.read().get(doc) {
            return Ok(Arc::clone(v));
        }

        let value = document::load_document(&doc.location(), self.client)
            .await
            .map_err(|e| {
                OpenApiToolsError::OpenApi(format!("Failed to load referenced document: {e}"))
            })?;

        // Whole specs get the same dialect upgrade as the root; bare fragments are used as-is.
        let value = if value.get("openapi").is_some() || value.get("swagger").is_some() {
            upgrade_document(value)?
        } else {
            value
        };

        tracing::debug!(doc = %doc, "loaded referenced document");
        let value = Arc::new(value);
        self.docs.write().insert(doc.clone(), Arc::clone(&value));
        Ok(value)
    }
}
