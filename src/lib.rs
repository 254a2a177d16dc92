//! `streamfed` - federation gateway for media content addons
//!
//! Sits in front of many independent addons and presents one merged,
//! policy-shaped addon to a media client.
//!
//! # Features
//!
//! - **Capability merging**: N manifests folded into one resource/catalog table
//! - **Candidate selection**: per-resource routing, tiered meta lookup
//! - **Stream shaping**: fetch, filter, dedup, sort, per-category limits
//! - **Proxying**: batched, fail-closed URL rewriting through MediaFlow
//! - **Formatting**: user templates for stream names and descriptions
//! - **Precaching**: background warm-up of the next episode
//!
//! # Example
//!
//! ```rust,no_run
//! use streamfed::{load_config, default_config_path, Services, Session};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(&default_config_path())?;
//!     let services = Services::for_config(&config)?;
//!     let session = Session::initialise(config, services).await?;
//!     let response = session.get_streams("movie", "tt0111161").await;
//!     println!("{} streams", response.data.len());
//!     Ok(())
//! }
//! ```

pub mod addon;
pub mod cache;
pub mod config;
pub mod error;
pub mod formatter;
pub mod http_client;
pub mod limiter;
pub mod metadata;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod precache;
pub mod proxy;
pub mod registry;
pub mod selection;
pub mod session;

pub use addon::{AddonConnector, AddonHandle, ConnectorFactory, HttpAddonConnector, HttpConnectorFactory};
pub use cache::{Cache, MemoryCache};
pub use config::{default_config_path, load_config, UserConfig};
pub use error::{GatewayError, Result};
pub use formatter::{FormatContext, FormattedStream, Formatter};
pub use http_client::AddonClient;
pub use limiter::Limiter;
pub use metadata::{CinemetaProvider, MetadataProvider, SeasonInfo};
pub use models::{Addon, ErrorEntry, GatewayResponse, Manifest, MetaItem, ParsedStream, ResponseStream};
pub use parser::{DefaultStreamParser, RegexReleaseParser, ReleaseParser, StreamParser};
pub use pipeline::{FetchOutcome, Pipeline};
pub use precache::{HttpToucher, PrecacheOutcome, Precacher, Toucher};
pub use proxy::{MediaflowBackend, Proxifier, ProxyBackend, ProxyRequest};
pub use registry::{CapabilityRegistrar, CapabilityTable};
pub use session::{Services, Session};

/// Version of streamfed
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
