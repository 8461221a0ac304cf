//! Extraction orchestration: MIME classification, configuration
//! snapshots, engine resolution, and the fallback router.

pub mod config;
pub mod fallback;
pub mod mime;
pub mod resolver;
pub mod router;
