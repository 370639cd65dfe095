//! Playlist documents
//!
//! Two formats are recognised: ASX XML (`<asx>` root with `<entry>` elements)
//! and the INI style `[Reference]` section with `RefN=url` keys. A playlist
//! has no elementary streams; the consumer opens each entry separately.

use super::Demuxer;
use crate::registry::{probe_prefix, DemuxerInfo, Probe};
use crate::source::ByteSource;
use crate::stream::{MediaFrame, MediaStream};
use crate::utils::config::PipelineConfig;
use crate::utils::error::{MediaError, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Serialize;
use std::sync::Arc;

/// Largest playlist document accepted
const MAX_DOCUMENT_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlaylistEntry {
    pub href: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Playlist {
    pub title: Option<String>,
    pub entries: Vec<PlaylistEntry>,
}

impl Playlist {
    /// Parse either playlist format
    pub fn parse(document: &str) -> Result<Self> {
        let trimmed = document.trim_start_matches('\u{feff}').trim_start();
        if is_asx(trimmed.as_bytes()) {
            Self::parse_asx(trimmed)
        } else if is_reference(trimmed.as_bytes()) {
            Ok(Self::parse_reference(trimmed))
        } else {
            Err(MediaError::InvalidMedia("not a playlist document".to_string()))
        }
    }

    fn parse_asx(document: &str) -> Result<Self> {
        let mut reader = Reader::from_str(document);
        reader.config_mut().trim_text(true);

        let mut playlist = Playlist::default();
        let mut current: Option<PlaylistEntry> = None;
        let mut in_title = false;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let name = e.name().as_ref().to_ascii_lowercase();
                    match name.as_slice() {
                        b"entry" => current = Some(PlaylistEntry::default()),
                        b"title" => in_title = true,
                        b"ref" => set_href(&mut current, &e)?,
                        _ => {}
                    }
                }
                Ok(Event::Empty(e)) => {
                    if e.name().as_ref().eq_ignore_ascii_case(b"ref") {
                        set_href(&mut current, &e)?;
                    }
                }
                Ok(Event::Text(t)) if in_title => {
                    let text = t
                        .unescape()
                        .map_err(|e| MediaError::InvalidMedia(format!("ASX parse error: {}", e)))?
                        .into_owned();
                    match current.as_mut() {
                        Some(entry) => entry.title = Some(text),
                        None => playlist.title = Some(text),
                    }
                }
                Ok(Event::End(e)) => {
                    let name = e.name().as_ref().to_ascii_lowercase();
                    match name.as_slice() {
                        b"title" => in_title = false,
                        b"entry" => {
                            if let Some(entry) = current.take() {
                                if entry.href.is_empty() {
                                    log::warn!("Skipping ASX entry without a ref");
                                } else {
                                    playlist.entries.push(entry);
                                }
                            }
                        }
                        _ => {}
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(MediaError::InvalidMedia(format!(
                        "ASX parse error at {}: {}",
                        reader.buffer_position(),
                        e
                    )))
                }
            }
        }

        Ok(playlist)
    }

    fn parse_reference(document: &str) -> Self {
        let mut refs: Vec<(u32, String)> = Vec::new();
        let mut in_reference = false;

        for line in document.lines().map(str::trim) {
            if line.starts_with('[') {
                in_reference = line.eq_ignore_ascii_case("[reference]");
                continue;
            }
            if !in_reference {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            if let (Some(prefix), Some(number)) = (key.get(..3), key.get(3..)) {
                if prefix.eq_ignore_ascii_case("ref") {
                    if let Ok(n) = number.parse::<u32>() {
                        refs.push((n, value.trim().to_string()));
                    }
                }
            }
        }

        refs.sort_by_key(|(n, _)| *n);
        Playlist {
            title: None,
            entries: refs
                .into_iter()
                .map(|(_, href)| PlaylistEntry { href, title: None })
                .collect(),
        }
    }
}

fn set_href(current: &mut Option<PlaylistEntry>, element: &quick_xml::events::BytesStart<'_>) -> Result<()> {
    let Some(entry) = current.as_mut() else {
        return Ok(());
    };
    for attr in element.attributes() {
        let attr = attr.map_err(|e| MediaError::InvalidMedia(format!("invalid ASX attribute: {}", e)))?;
        if attr.key.as_ref().eq_ignore_ascii_case(b"href") {
            let value = attr
                .unescape_value()
                .map_err(|e| MediaError::InvalidMedia(format!("invalid ASX attribute: {}", e)))?;
            // the first ref of an entry wins, later ones are fallbacks
            if entry.href.is_empty() {
                entry.href = value.into_owned();
            }
        }
    }
    Ok(())
}

fn skip_whitespace(head: &[u8]) -> &[u8] {
    let head = head.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(head);
    let start = head.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(head.len());
    &head[start..]
}

fn is_asx(head: &[u8]) -> bool {
    let head = skip_whitespace(head);
    head.len() >= 4 && head[..4].eq_ignore_ascii_case(b"<asx")
}

fn is_reference(head: &[u8]) -> bool {
    let head = skip_whitespace(head);
    head.len() >= 11 && head[..11].eq_ignore_ascii_case(b"[reference]")
}

/// Demuxer that reads a playlist document and exposes it through [`Demuxer::playlist`]
pub struct PlaylistDemuxer {
    source: Arc<dyn ByteSource>,
    playlist: Option<Playlist>,
}

impl PlaylistDemuxer {
    pub fn new(source: Arc<dyn ByteSource>) -> Self {
        Self { source, playlist: None }
    }

    fn read_document(&self) -> Result<Vec<u8>> {
        let mut document = Vec::new();
        if self.source.kind() == crate::source::SourceKind::MemoryQueue {
            while let Some(chunk) = self.source.pop()? {
                document.extend_from_slice(&chunk);
                if document.len() > MAX_DOCUMENT_SIZE {
                    break;
                }
            }
        } else {
            let mut buf = [0u8; 4096];
            loop {
                let read = self.source.read_some(&mut buf)?;
                if read == 0 {
                    break;
                }
                document.extend_from_slice(&buf[..read]);
                if document.len() > MAX_DOCUMENT_SIZE {
                    break;
                }
            }
        }

        if self.source.is_aborted() {
            return Err(MediaError::Read("source aborted while reading playlist".to_string()));
        }
        if document.len() > MAX_DOCUMENT_SIZE {
            return Err(MediaError::InvalidMedia(format!(
                "playlist larger than {} bytes",
                MAX_DOCUMENT_SIZE
            )));
        }
        Ok(document)
    }
}

impl Demuxer for PlaylistDemuxer {
    fn name(&self) -> &str {
        "playlist"
    }

    fn read_header(&mut self) -> Result<()> {
        if self.playlist.is_some() {
            return Ok(());
        }
        let document = self.read_document()?;
        let text = String::from_utf8_lossy(&document);
        let playlist = Playlist::parse(&text)?;
        log::info!("Playlist with {} entries", playlist.entries.len());
        self.playlist = Some(playlist);
        Ok(())
    }

    fn streams(&self) -> &[Arc<MediaStream>] {
        &[]
    }

    fn read_frame(&mut self, frame: &mut MediaFrame) -> Result<()> {
        Err(MediaError::InvalidStream(format!(
            "playlist has no stream {}",
            frame.stream_index()
        )))
    }

    fn seek(&mut self, _pts: u64) -> Result<()> {
        Err(MediaError::Seek("playlists cannot seek".to_string()))
    }

    fn update_selected(&mut self, _stream: &MediaStream) {}

    fn duration(&self) -> u64 {
        0
    }

    fn playlist(&self) -> Option<&Playlist> {
        self.playlist.as_ref()
    }

    fn source(&self) -> &Arc<dyn ByteSource> {
        &self.source
    }
}

pub struct PlaylistDemuxerInfo;

impl DemuxerInfo for PlaylistDemuxerInfo {
    fn name(&self) -> &str {
        "playlist"
    }

    fn supports(&self, source: &dyn ByteSource) -> Probe {
        probe_prefix(source, |head| is_asx(head) || is_reference(head))
    }

    fn create(&self, source: Arc<dyn ByteSource>, _config: &PipelineConfig) -> Result<Box<dyn Demuxer>> {
        Ok(Box::new(PlaylistDemuxer::new(source)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    const ASX: &str = r#"
        <ASX version="3.0">
          <TITLE>Evening news</TITLE>
          <Entry>
            <Title>Headlines</Title>
            <Ref HREF="http://example.com/one.ccmf"/>
            <Ref HREF="http://backup.example.com/one.ccmf"/>
          </Entry>
          <entry><ref href="two.ccmf?a=1&amp;b=2"/></entry>
          <entry><title>No ref</title></entry>
        </ASX>"#;

    #[test]
    fn test_parse_asx() {
        let playlist = Playlist::parse(ASX).unwrap();
        assert_eq!(playlist.title.as_deref(), Some("Evening news"));
        assert_eq!(playlist.entries.len(), 2);
        assert_eq!(playlist.entries[0].href, "http://example.com/one.ccmf");
        assert_eq!(playlist.entries[0].title.as_deref(), Some("Headlines"));
        assert_eq!(playlist.entries[1].href, "two.ccmf?a=1&b=2");
        assert!(playlist.entries[1].title.is_none());
    }

    #[test]
    fn test_parse_reference() {
        let doc = "[Reference]\r\nRef2=mms://example.com/b\r\nRef1=http://example.com/a\r\n[Other]\r\nRef3=ignored\r\n";
        let playlist = Playlist::parse(doc).unwrap();
        let hrefs: Vec<&str> = playlist.entries.iter().map(|e| e.href.as_str()).collect();
        assert_eq!(hrefs, vec!["http://example.com/a", "mms://example.com/b"]);
    }

    #[test]
    fn test_malformed_asx() {
        let err = Playlist::parse("<asx><entry><ref href=\"a\"></entry></asx>").unwrap_err();
        assert!(matches!(err, MediaError::InvalidMedia(_)));
    }

    #[test]
    fn test_probe_variants() {
        for doc in ["  \n<asx version=\"3.0\"></asx>", "<ASX></ASX>", "[Reference]\nRef1=x"] {
            let source = MemorySource::new(doc.as_bytes().to_vec());
            assert_eq!(PlaylistDemuxerInfo.supports(&source), Probe::Supported, "{}", doc);
        }
        let source = MemorySource::new(b"<html><body></body></html>".to_vec());
        assert_eq!(PlaylistDemuxerInfo.supports(&source), Probe::Unsupported);
    }

    #[test]
    fn test_demuxer_has_no_streams() {
        let source: Arc<dyn ByteSource> = Arc::new(MemorySource::new(ASX.as_bytes().to_vec()));
        let mut demuxer = PlaylistDemuxer::new(source);
        demuxer.read_header().unwrap();
        assert_eq!(demuxer.stream_count(), 0);
        assert_eq!(demuxer.playlist().unwrap().entries.len(), 2);
        assert!(demuxer.seek(0).is_err());
    }
}
