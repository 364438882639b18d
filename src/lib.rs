//! Query and display EC2 instance metadata.
//!
//! The instance metadata service is an unauthenticated HTTP endpoint on a
//! link-local address that exposes a versioned tree of text resources:
//! `/<version>/meta-data/<key>`. This crate discovers the offered API
//! versions, pins one, resolves keys (expanding directories such as
//! `public-keys`) and renders the results as text, XML or JSON.
//!
//! # Example
//!
//! ```ignore
//! use ec2metadata::{output, MetadataClient, MetadataError};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), MetadataError> {
//!     let client = MetadataClient::with_default_timeout()?.latest().await?;
//!
//!     // Everything under meta-data/, prefixed with key names
//!     let all = client.resolve_defaults().await?;
//!     output::display(&all.entries, true)?;
//!
//!     // Selected keys; unknown ones end up in `failures`
//!     let some = client.resolve_all(["instance-id", "public-keys"]).await?;
//!     output::display_xml(&some.entries)?;
//!
//!     Ok(())
//! }
//! ```
//!
//! Session-token access (IMDSv2) is used automatically once the service
//! rejects an unauthenticated request.

mod client;
mod error;
mod metadata;
mod options;
pub mod output;
mod transport;

pub use client::{MetadataClient, Resolution, VersionedClient};
pub use error::MetadataError;
pub use metadata::{ApiVersion, Child, MetadataEntry, MetadataKey, MetadataNode, MetadataValue};
pub use options::{ExpansionPolicy, MetadataOption, OptionTable, Source, DEFAULT_EXPANSION_DEPTH, USER_DATA};
pub use output::{Format, OutputFormatter, OutputTarget};
pub use transport::{DEFAULT_BASE_URL, DEFAULT_TIMEOUT};
