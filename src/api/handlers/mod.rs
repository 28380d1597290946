mod core;
mod download;
mod streamer;
mod upload;

pub(crate) use self::core::{fallback, missing_hash, ping, preflight};
pub(crate) use self::download::download;
pub(crate) use self::streamer::streamer;
pub(crate) use self::upload::upload;
