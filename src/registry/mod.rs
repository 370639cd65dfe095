//! Ordered capability registries for demuxers, decoders and converters
//!
//! Selection walks each list in order and returns the first descriptor whose
//! `supports` probe succeeds. Build a [`Registries`] once at startup, then
//! share it as `Arc<Registries>`; once shared it can no longer be mutated.

use crate::converter::{Converter, YuvConverterInfo};
use crate::decoder::{
    Decoder, MarkerDecoderInfo, NullDecoderInfo, PcmDecoderInfo, RawVideoDecoderInfo,
};
use crate::demuxer::{ContainerDemuxerInfo, Demuxer, PlaylistDemuxerInfo};
use crate::source::ByteSource;
use crate::stream::{MediaStream, PixelFormat};
use crate::utils::config::PipelineConfig;
use crate::utils::error::Result;
use std::collections::VecDeque;
use std::sync::Arc;

/// Number of bytes a demuxer probe may inspect
pub const PROBE_SIZE: usize = 16;

/// Result of a demuxer probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Supported,
    Unsupported,
    /// The source does not hold enough bytes yet to decide
    NotEnoughData,
}

/// Demuxer capability descriptor
pub trait DemuxerInfo: Send + Sync {
    fn name(&self) -> &str;

    /// Inspect the first bytes of `source` at its current position without consuming them
    fn supports(&self, source: &dyn ByteSource) -> Probe;

    fn create(&self, source: Arc<dyn ByteSource>, config: &PipelineConfig) -> Result<Box<dyn Demuxer>>;
}

/// Decoder capability descriptor
pub trait DecoderInfo: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, codec: &str) -> bool;

    fn create(&self, stream: &MediaStream) -> Box<dyn Decoder>;
}

/// Converter capability descriptor
pub trait ConverterInfo: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, input: PixelFormat, output: PixelFormat) -> bool;

    fn create(&self, stream: &MediaStream, input: PixelFormat, output: PixelFormat) -> Box<dyn Converter>;
}

/// Peek up to [`PROBE_SIZE`] bytes and test them
///
/// Sources of known size shorter than the probe window are tested on what
/// they hold. Sources that cannot deliver the window yet report `NotEnoughData`.
pub fn probe_prefix(source: &dyn ByteSource, matches: impl FnOnce(&[u8]) -> bool) -> Probe {
    let remaining = source
        .size()
        .map_or(PROBE_SIZE as u64, |size| size.saturating_sub(source.position()));
    let len = remaining.min(PROBE_SIZE as u64) as usize;
    if len == 0 {
        return Probe::Unsupported;
    }

    let mut head = [0u8; PROBE_SIZE];
    match source.peek(&mut head[..len]) {
        Ok(true) => {
            if matches(&head[..len]) {
                Probe::Supported
            } else {
                Probe::Unsupported
            }
        }
        Ok(false) if source.eof() || source.size().is_some() => Probe::Unsupported,
        Ok(false) => Probe::NotEnoughData,
        Err(e) => {
            log::debug!("Probe peek failed: {}", e);
            Probe::Unsupported
        }
    }
}

/// Demuxer, decoder and converter lists
#[derive(Default)]
pub struct Registries {
    demuxers: Vec<Arc<dyn DemuxerInfo>>,
    decoders: VecDeque<Arc<dyn DecoderInfo>>,
    converters: Vec<Arc<dyn ConverterInfo>>,
}

impl Registries {
    /// Empty registries
    pub fn new() -> Self {
        Self::default()
    }

    /// Registries holding the built-in plugins
    pub fn with_defaults(config: &PipelineConfig) -> Self {
        let mut registries = Self::new();

        registries.register_demuxer(Arc::new(ContainerDemuxerInfo));
        registries.register_demuxer(Arc::new(PlaylistDemuxerInfo));

        if !config.codecs.disable_converters {
            registries.register_converter(Arc::new(YuvConverterInfo));
        }

        registries.register_decoder(Arc::new(MarkerDecoderInfo));
        registries.register_decoder(Arc::new(RawVideoDecoderInfo));
        registries.register_decoder(Arc::new(PcmDecoderInfo));
        if !config.codecs.disable_fallback {
            registries.register_decoder(Arc::new(NullDecoderInfo));
        }

        log::debug!(
            "Registered {} demuxers, {} decoders, {} converters",
            registries.demuxers.len(),
            registries.decoders.len(),
            registries.converters.len()
        );
        registries
    }

    pub fn register_demuxer(&mut self, info: Arc<dyn DemuxerInfo>) {
        self.demuxers.push(info);
    }

    pub fn register_decoder(&mut self, info: Arc<dyn DecoderInfo>) {
        self.decoders.push_back(info);
    }

    /// Register a dynamically loaded decoder ahead of everything already registered
    pub fn register_late_decoder(&mut self, info: Arc<dyn DecoderInfo>) {
        self.decoders.push_front(info);
    }

    pub fn register_converter(&mut self, info: Arc<dyn ConverterInfo>) {
        self.converters.push(info);
    }

    /// First demuxer whose probe accepts `source`
    ///
    /// A later descriptor that accepts the source wins even when an earlier
    /// one was still undecided. `Probe::NotEnoughData` is returned only when
    /// nothing matched and at least one descriptor needs more bytes.
    pub fn find_demuxer(&self, source: &dyn ByteSource) -> std::result::Result<Arc<dyn DemuxerInfo>, Probe> {
        let mut undecided = false;
        for info in &self.demuxers {
            match info.supports(source) {
                Probe::Supported => return Ok(Arc::clone(info)),
                Probe::NotEnoughData => undecided = true,
                Probe::Unsupported => {}
            }
        }
        Err(if undecided { Probe::NotEnoughData } else { Probe::Unsupported })
    }

    pub fn find_decoder(&self, codec: &str) -> Option<Arc<dyn DecoderInfo>> {
        self.decoders.iter().find(|info| info.supports(codec)).cloned()
    }

    pub fn find_converter(&self, input: PixelFormat, output: PixelFormat) -> Option<Arc<dyn ConverterInfo>> {
        self.converters
            .iter()
            .find(|info| info.supports(input, output))
            .cloned()
    }

    pub fn demuxer_names(&self) -> Vec<&str> {
        self.demuxers.iter().map(|info| info.name()).collect()
    }

    pub fn decoder_names(&self) -> Vec<&str> {
        self.decoders.iter().map(|info| info.name()).collect()
    }

    pub fn converter_names(&self) -> Vec<&str> {
        self.converters.iter().map(|info| info.name()).collect()
    }
}
