//! ccmedia - the media pipeline behind CCPlayer
//!
//! Byte sources feed demuxers picked from a registry; demuxed frames flow
//! through per-stream decoders and pixel converters. A [`Media`] services all
//! requests on its own worker thread.

pub mod converter;
pub mod decoder;
pub mod demuxer;
pub mod media;
pub mod registry;
pub mod source;
pub mod stream;
pub mod utils;

pub use media::{Media, MediaClosure, MediaHandle};
pub use registry::Registries;
pub use utils::{MediaCode, MediaError, PipelineConfig, Result};
