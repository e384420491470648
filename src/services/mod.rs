// marksync services
// Services are stateless building blocks: crypto, payload codec, hashing, tree merge, remote access, settings, logging.

pub mod bookmark_tree;
pub mod content_hasher;
pub mod crypto_service;
pub mod merge_resolver;
pub mod remote_store;
pub mod settings_engine;
pub mod sync_codec;
pub mod telemetry;
