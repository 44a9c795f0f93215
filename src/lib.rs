//! Geometa: geospatial dataset metadata normalization
//!
//! This crate turns dataset metadata published by remote scientific catalogues
//! into one canonical, validated record, whatever format the catalogue speaks:
//!
//! 1. **Fetch** -- Resolve a dataset identifier to a local JSON or XML document,
//!    trying content negotiation and static per-format endpoints in priority order
//!    with layered retry-with-backoff underneath
//! 2. **Dispatch** -- Pick an extractor by file extension, or by content probe when
//!    the extension says nothing
//! 3. **Extract** -- Map ISO 19139 XML, ad-hoc JSON, Schema.org JSON-LD or DCAT
//!    Turtle onto [`models::Metadata`], reporting every placeholder or dropped field
//! 4. **Discover** -- List downloadable resources (archives, browsable folders, API
//!    endpoints) referenced by the record
//!
//! # Architecture
//!
//! - **Explicit strictness** -- Lenient extraction substitutes `"[Missing <field>]"`
//!   placeholders and reports them as [`extract::FieldGap`]s; strict extraction fails
//! - **Self-validating model** -- Bounding boxes and temporal extents are checked at
//!   construction and cannot be built invalid
//! - **Owned registry** -- [`factory::ExtractorFactory`] is a plain value with runtime
//!   registration, no global state
//! - **Transport seam** -- The fetcher talks to a [`fetch::Transport`], a pooled
//!   reqwest client in production and a scripted one in tests
//! - **Partial failure** -- Batch runs record each failure against its identifier
//!   and keep going, with lock-free counters for progress
//!
//! # Key Modules
//!
//! - [`models`] -- Canonical record types (Metadata, BoundingBox, MetadataRelationship, Resource)
//! - [`extract`] -- Extractor contract and the four format extractors
//! - [`classify`] -- Download/landing-page/access-type selection from online resources
//! - [`factory`] -- Format registry and extractor dispatch
//! - [`fetch`] -- Catalogue URL tables, HTTP transport and retry policies
//! - [`pipeline`] -- Bounded parallel fetch-and-extract batch runner
//! - [`stats`] -- Thread-safe atomic counters for batch metrics
//! - [`error`] -- Typed error enums
//! - [`config`] -- Defaults for timeouts, retries and workers
//!
//! # Example Usage
//!
//! ```bash
//! # Normalize local files, printing JSON records
//! geometa extract record.xml record.json --resources
//!
//! # Download one record from the CEH catalogue
//! geometa fetch 0b1c2d3e-4f50-4a6b-8c7d-9e0f1a2b3c4d --format xml
//!
//! # Fetch and extract a list of identifiers with 8 workers
//! geometa batch identifiers.txt --workers 8 -v
//! ```

pub mod classify;
pub mod config;
pub mod error;
pub mod extract;
pub mod factory;
pub mod fetch;
pub mod models;
pub mod pipeline;
pub mod stats;

pub use error::{ExtractionError, FetchError, ValidationError};
pub use extract::{Extraction, ExtractorConfig, FieldGap, MetadataExtractor};
pub use factory::ExtractorFactory;
pub use fetch::{FetchConfig, MetadataFetcher, MetadataFormat};
pub use models::{BoundingBox, Metadata, MetadataRelationship, Resource};
