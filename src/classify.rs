//! Picks the authoritative download link, landing page and access mode out of
//! a record's online resources.
//!
//! Catalogue records routinely list several "download" links that disagree:
//! the data archive, a zipped documentation bundle, a folder view, an API. The
//! scoring below prefers links that both declare a download/fileAccess function
//! and sit on a known bulk-storage path, and refuses to treat documentation
//! archives as data.

use crate::models::{AccessType, Resource};
use tracing::debug;

/// URL conventions of one catalogue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogueProfile {
    /// Substrings marking a bulk-storage URL (datastore, data package host).
    pub storage_patterns: Vec<String>,
    /// Substrings marking a human-facing dataset page.
    pub document_page_patterns: Vec<String>,
    /// Download URL synthesized from a file identifier when a record lists no
    /// data link. `{id}` is replaced with the identifier.
    pub download_url_template: Option<String>,
}

impl CatalogueProfile {
    /// UK Centre for Ecology & Hydrology (EIDC) conventions.
    pub fn ceh() -> Self {
        Self {
            storage_patterns: vec![
                "datastore/eidchub".to_string(),
                "eidc/download".to_string(),
                "data-package".to_string(),
            ],
            document_page_patterns: vec![
                "catalogue.ceh.ac.uk/documents/".to_string(),
                "documents/".to_string(),
                "landing".to_string(),
            ],
            download_url_template: Some(
                "https://catalogue.ceh.ac.uk/datastore/eidchub/{id}".to_string(),
            ),
        }
    }

    /// No catalogue-specific knowledge and no identifier fallback.
    pub fn generic() -> Self {
        Self {
            storage_patterns: Vec::new(),
            document_page_patterns: vec!["documents/".to_string(), "landing".to_string()],
            download_url_template: None,
        }
    }

    pub fn is_storage_url(&self, url: &str) -> bool {
        self.storage_patterns.iter().any(|p| url.contains(p.as_str()))
    }

    pub fn is_document_page(&self, url: &str) -> bool {
        self.document_page_patterns
            .iter()
            .any(|p| url.contains(p.as_str()))
    }

    pub fn fallback_download_url(&self, identifier: &str) -> Option<String> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return None;
        }
        self.download_url_template
            .as_ref()
            .map(|template| template.replace("{id}", identifier))
    }
}

impl Default for CatalogueProfile {
    fn default() -> Self {
        Self::ceh()
    }
}

/// One distribution link as listed by a metadata record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OnlineResource {
    pub url: String,
    pub name: String,
    /// ISO `CI_OnLineFunctionCode`, e.g. `download`, `fileAccess`, `information`.
    pub function: String,
    pub protocol: String,
}

impl OnlineResource {
    pub fn new(url: impl Into<String>, name: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            url: url.into().trim().to_string(),
            name: name.into().trim().to_string(),
            function: function.into().trim().to_string(),
            protocol: String::new(),
        }
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into().trim().to_string();
        self
    }

    fn function_lower(&self) -> String {
        self.function.to_ascii_lowercase()
    }

    fn is_download_function(&self) -> bool {
        let function = self.function_lower();
        function.contains("download") || self.name.to_ascii_lowercase().contains("download")
    }

    fn is_file_access(&self) -> bool {
        self.function_lower().contains("fileaccess")
    }

    fn is_information(&self) -> bool {
        self.function_lower().contains("information")
    }

    fn is_zip(&self) -> bool {
        is_zip_url(&self.url)
    }

    /// Documentation bundles must never be picked as the data download.
    pub fn is_supporting_document(&self) -> bool {
        self.name.to_ascii_lowercase().contains("support")
            || self.url.to_ascii_lowercase().contains("support")
            || (self.is_information() && self.is_zip())
    }

    fn is_api(&self) -> bool {
        let protocol = self.protocol.to_ascii_uppercase();
        self.function_lower() == "search"
            || protocol.starts_with("OGC:")
            || ["WMS", "WFS", "WCS", "API", "REST"]
                .iter()
                .any(|p| protocol.contains(p))
    }

    /// Download score: 3 function + storage path, 2 storage path, 1 function or
    /// `.zip`, 0 not a download.
    pub fn priority(&self, profile: &CatalogueProfile) -> u8 {
        let has_function = self.is_download_function() || self.is_file_access();
        let on_storage = profile.is_storage_url(&self.url);
        match (has_function, on_storage) {
            (true, true) => 3,
            (false, true) => 2,
            (true, false) => 1,
            (false, false) if self.is_zip() => 1,
            _ => 0,
        }
    }

    /// Classifies this link as a crawlable resource, if it is one.
    pub fn to_resource(&self, profile: &CatalogueProfile) -> Option<Resource> {
        if self.url.is_empty() {
            return None;
        }
        let description = if self.name.is_empty() {
            self.function.as_str()
        } else {
            self.name.as_str()
        };

        if self.is_api() {
            return Some(Resource::api_endpoint(&self.url, description));
        }
        if self.is_zip() || (self.is_download_function() && !self.is_file_access()) {
            return Some(Resource::remote_file(&self.url, description));
        }
        if self.is_file_access() || profile.is_storage_url(&self.url) {
            return Some(Resource::web_folder(&self.url, description));
        }
        None
    }
}

/// The outcome of classifying a record's online resources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Distribution {
    pub download_url: Option<String>,
    pub landing_page_url: Option<String>,
    pub access_type: AccessType,
}

/// Selects one download URL, one landing page and one access type.
///
/// `explicit_landing` wins over any inferred landing page. When nothing
/// qualifies as a download, `fallback_identifier` is expanded through the
/// profile's template.
pub fn classify(
    resources: &[OnlineResource],
    explicit_landing: Option<&str>,
    profile: &CatalogueProfile,
    fallback_identifier: Option<&str>,
) -> Distribution {
    let mut best: Option<(u8, &OnlineResource)> = None;
    let mut access_type = AccessType::Download;
    let mut inferred_landing: Option<&str> = None;

    for resource in resources.iter().filter(|r| !r.url.is_empty()) {
        let landing_like = resource.is_information() || profile.is_document_page(&resource.url);
        if inferred_landing.is_none() && landing_like && !resource.is_zip() {
            inferred_landing = Some(&resource.url);
        }

        if resource.is_supporting_document() {
            debug!(url = %resource.url, "skipping supporting document");
            continue;
        }

        let priority = resource.priority(profile);
        if priority == 0 {
            continue;
        }
        if resource.is_file_access() {
            access_type = AccessType::FileAccess;
        }
        // Strictly greater keeps the first-seen candidate on ties.
        if best.map_or(true, |(score, _)| priority > score) {
            best = Some((priority, resource));
        }
    }

    let mut download_url = best.map(|(_, r)| r.url.clone());
    if download_url.is_none() {
        download_url = fallback_identifier.and_then(|id| profile.fallback_download_url(id));
        if let Some(url) = &download_url {
            debug!(url = %url, "download URL synthesized from file identifier");
        }
    }

    let mut landing_page_url = explicit_landing
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .or(inferred_landing)
        .map(str::to_string);
    if landing_page_url.is_none() {
        landing_page_url = download_url.clone().filter(|url| !is_zip_url(url));
    }

    Distribution {
        download_url,
        landing_page_url,
        access_type,
    }
}

/// `.zip` suffix on the URL path, ignoring query and fragment.
pub fn is_zip_url(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.to_ascii_lowercase().ends_with(".zip")
}
