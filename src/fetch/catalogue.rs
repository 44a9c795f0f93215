//! Remote catalogue URL tables and fetch candidate ordering.

use super::MetadataFormat;
use crate::error::FetchError;

/// URL conventions of one remote catalogue. Templates use `{id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Catalogue {
    pub name: &'static str,
    /// Answers JSON or XML depending on the `Accept` header.
    pub negotiated: Option<&'static str>,
    /// Per-format endpoints that ignore `Accept`, tried after negotiation.
    pub static_endpoints: &'static [(&'static str, MetadataFormat)],
}

pub const CATALOGUES: &[Catalogue] = &[
    Catalogue {
        name: "ceh",
        negotiated: Some("https://catalogue.ceh.ac.uk/id/{id}"),
        // Web-accessible folder of Gemini XML records
        static_endpoints: &[(
            "https://catalogue.ceh.ac.uk/documents/gemini/waf/{id}.xml",
            MetadataFormat::Xml,
        )],
    },
    Catalogue {
        name: "ceda",
        negotiated: Some("https://catalogue.ceda.ac.uk/uuid/{id}"),
        static_endpoints: &[
            (
                "https://catalogue.ceda.ac.uk/uuid/{id}?format=json",
                MetadataFormat::Json,
            ),
            (
                "https://catalogue.ceda.ac.uk/uuid/{id}?format=xml",
                MetadataFormat::Xml,
            ),
        ],
    },
];

/// One URL to try, in the format it should yield.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub url: String,
    pub format: MetadataFormat,
    /// Send `Accept` for `format` rather than the catch-all.
    pub negotiate: bool,
}

impl Candidate {
    pub fn accept(&self) -> Option<&'static str> {
        self.negotiate.then(|| self.format.mime_type())
    }
}

impl Catalogue {
    pub fn lookup(name: &str) -> Result<&'static Catalogue, FetchError> {
        CATALOGUES
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| FetchError::UnknownCatalogue {
                name: name.to_string(),
                known: known_catalogues(),
            })
    }

    /// Negotiated JSON, negotiated XML, then static endpoints in table order.
    /// With a preferred format, every candidate of that format moves ahead of
    /// the rest without otherwise changing order.
    pub fn candidates(&self, identifier: &str, preferred: Option<MetadataFormat>) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        if let Some(template) = self.negotiated {
            let url = template.replace("{id}", identifier);
            for format in [MetadataFormat::Json, MetadataFormat::Xml] {
                candidates.push(Candidate {
                    url: url.clone(),
                    format,
                    negotiate: true,
                });
            }
        }
        for (template, format) in self.static_endpoints {
            candidates.push(Candidate {
                url: template.replace("{id}", identifier),
                format: *format,
                negotiate: false,
            });
        }
        if let Some(preferred) = preferred {
            candidates.sort_by_key(|c| c.format != preferred);
        }
        candidates
    }
}

pub fn known_catalogues() -> Vec<String> {
    CATALOGUES.iter().map(|c| c.name.to_string()).collect()
}
