//! Extractor registry: format tokens to constructors, extensions to format tokens.

use crate::error::ExtractionError;
use crate::extract::{
    extension_of, Extraction, ExtractorConfig, JsonExtractor, JsonLdExtractor, MetadataExtractor,
    TurtleExtractor, XmlExtractor,
};
use rustc_hash::FxHashMap;
use std::fmt;
use std::path::Path;
use tracing::debug;

/// Builds an extractor from the factory's configuration.
pub type ExtractorConstructor = fn(&ExtractorConfig) -> Box<dyn MetadataExtractor>;

/// Owned registry of extractors. Cheap to share by reference across worker
/// threads; every created extractor is a fresh instance.
#[derive(Clone)]
pub struct ExtractorFactory {
    config: ExtractorConfig,
    /// Registration order matters for `find_extractor_for`.
    formats: Vec<(String, ExtractorConstructor)>,
    extensions: FxHashMap<String, String>,
}

impl ExtractorFactory {
    /// A factory with nothing registered.
    pub fn new(config: ExtractorConfig) -> Self {
        Self {
            config,
            formats: Vec::new(),
            extensions: FxHashMap::default(),
        }
    }

    /// json, xml, jsonld and rdf, in that order.
    pub fn with_defaults(config: ExtractorConfig) -> Self {
        let mut factory = Self::new(config);
        factory.register("json", |c| Box::new(JsonExtractor::new(c.clone())), &["json"]);
        factory.register("xml", |c| Box::new(XmlExtractor::new(c.clone())), &["xml"]);
        factory.register("jsonld", |c| Box::new(JsonLdExtractor::new(c.clone())), &["jsonld"]);
        factory.register(
            "rdf",
            |c| Box::new(TurtleExtractor::new(c.clone())),
            &["ttl", "turtle"],
        );
        factory
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    pub fn is_strict(&self) -> bool {
        self.config.strict_mode
    }

    /// Adds or replaces a format. Extensions may be given with or without the
    /// leading dot; an extension already mapped elsewhere is taken over.
    pub fn register(&mut self, format: &str, constructor: ExtractorConstructor, extensions: &[&str]) {
        let format = format.to_ascii_lowercase();
        match self.formats.iter_mut().find(|(name, _)| *name == format) {
            Some(entry) => entry.1 = constructor,
            None => self.formats.push((format.clone(), constructor)),
        }
        for ext in extensions {
            let ext = ext.trim_start_matches('.').to_ascii_lowercase();
            self.extensions.insert(ext, format.clone());
        }
        debug!(format = %format, extensions = ?extensions, "registered extractor");
    }

    /// Extension -> format -> constructor. Purely name based; the file need not exist.
    pub fn create_extractor(&self, path: &Path) -> Result<Box<dyn MetadataExtractor>, ExtractionError> {
        let format = extension_of(path)
            .and_then(|ext| self.extensions.get(&ext))
            .ok_or_else(|| ExtractionError::UnsupportedFormat {
                path: path.display().to_string(),
                known_formats: self.supported_formats(),
            })?;
        self.create_extractor_by_format(format)
    }

    pub fn create_extractor_by_format(
        &self,
        format: &str,
    ) -> Result<Box<dyn MetadataExtractor>, ExtractionError> {
        let format = format.to_ascii_lowercase();
        self.formats
            .iter()
            .find(|(name, _)| *name == format)
            .map(|(_, constructor)| constructor(&self.config))
            .ok_or_else(|| ExtractionError::UnsupportedFormat {
                path: format!("format:{format}"),
                known_formats: self.supported_formats(),
            })
    }

    /// The extractor registered for the file's extension, else the first
    /// registered extractor whose `can_extract` accepts the file.
    pub fn find_extractor_for(&self, path: &Path) -> Option<Box<dyn MetadataExtractor>> {
        let registered = extension_of(path).and_then(|ext| self.extensions.get(&ext));
        if let Some(extractor) = registered.and_then(|f| self.create_extractor_by_format(f).ok()) {
            debug!(path = %path.display(), format = extractor.format_name(), "extension matched");
            return Some(extractor);
        }
        self.formats.iter().find_map(|(name, constructor)| {
            let extractor = constructor(&self.config);
            if extractor.can_extract(path) {
                debug!(path = %path.display(), format = %name, "content probe matched");
                Some(extractor)
            } else {
                None
            }
        })
    }

    /// By extension when it is known, otherwise by probing every extractor.
    pub fn extractor_for(&self, path: &Path) -> Result<Box<dyn MetadataExtractor>, ExtractionError> {
        match self.create_extractor(path) {
            Ok(extractor) => Ok(extractor),
            Err(e @ ExtractionError::UnsupportedFormat { .. }) => {
                self.find_extractor_for(path).ok_or(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Resolves an extractor for `path` and runs it.
    pub fn extract(&self, path: &Path) -> Result<Extraction, ExtractionError> {
        self.extractor_for(path)?.extract(path)
    }

    pub fn supported_formats(&self) -> Vec<String> {
        self.formats.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Sorted, without leading dots.
    pub fn supported_extensions(&self) -> Vec<String> {
        let mut extensions: Vec<String> = self.extensions.keys().cloned().collect();
        extensions.sort();
        extensions
    }
}

impl Default for ExtractorFactory {
    fn default() -> Self {
        Self::with_defaults(ExtractorConfig::default())
    }
}

impl fmt::Debug for ExtractorFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractorFactory")
            .field("formats", &self.supported_formats())
            .field("strict_mode", &self.config.strict_mode)
            .finish()
    }
}
