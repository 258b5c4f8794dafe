use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use percent_encoding::percent_decode_str;
use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::domain::SessionIndex;
use crate::utils::paths;

/// Decompressed-payload cap; protects against zip-bomb-style `.als` files.
/// A payload that would exceed this is truncated, which in practice causes
/// the XML parser to hit an early EOF and yield a partial index rather than
/// an error.
const MAX_DECOMPRESSED_BYTES: u64 = 50 * 1024 * 1024;

const AUDIO_EXTENSIONS: &[&str] = &["wav", "aif", "aiff", "flac", "mp3", "ogg"];

#[derive(Debug, thiserror::Error)]
pub enum AlsError {
    #[error("failed to read session file: {0}")]
    Io(#[from] std::io::Error),
}

pub struct AlsReader;

impl AlsReader {
    /// Gunzips `gzipped_xml` (capped at `MAX_DECOMPRESSED_BYTES`) and extracts
    /// a `SessionIndex`. The XML reader runs in non-strict mode and any parse
    /// error simply ends iteration early, returning whatever was accumulated
    /// so far — an `.als` file is never allowed to abort a scan. Sample
    /// references are relativized to `project_root` before being stored so a
    /// `SessionIndex` stays comparable across machines where the project
    /// lives under a different absolute path.
    pub fn read(project_root: &Path, gzipped_xml: &[u8]) -> Result<SessionIndex, AlsError> {
        let mut decoder = GzDecoder::new(gzipped_xml).take(MAX_DECOMPRESSED_BYTES);
        let mut xml = Vec::new();
        decoder.read_to_end(&mut xml)?;

        Ok(Self::parse(project_root, &xml))
    }

    fn parse(project_root: &Path, xml: &[u8]) -> SessionIndex {
        let mut reader = Reader::from_reader(xml);
        reader.config_mut().check_end_names = false;
        reader.config_mut().trim_text(true);

        let mut index = SessionIndex::new();
        let mut buf = Vec::new();
        let mut unnamed_clip_count = 0usize;

        // Stack of open element names, used to know when we're inside a
        // <MidiClip>/<Notes> subtree whose bytes should be fed to the clip
        // hasher verbatim.
        let mut clip_depth: Option<usize> = None;
        let mut notes_depth: Option<usize> = None;
        let mut notes_buf: Vec<u8> = Vec::new();
        let mut current_clip_name: Option<String> = None;
        let mut depth = 0usize;

        loop {
            let event = match reader.read_event_into(&mut buf) {
                Ok(event) => event,
                Err(err) => {
                    log::warn!("als parse error, returning partial index: {err}");
                    break;
                }
            };

            match &event {
                Event::Eof => break,
                Event::Start(tag) | Event::Empty(tag) => {
                    let name = tag.name();
                    let local = String::from_utf8_lossy(name.as_ref()).to_string();

                    if notes_depth.is_some() {
                        append_raw(&mut notes_buf, &event, &reader);
                    }

                    match local.as_str() {
                        "FileRef" => {
                            if let Some(sample) = extract_file_ref(&tag, project_root) {
                                index.sample_paths.insert(sample);
                            }
                        }
                        "MidiClip" => {
                            clip_depth = Some(depth);
                            current_clip_name = find_attr(&tag, "Name").filter(|n| !n.is_empty());
                        }
                        "Notes" if clip_depth.is_some() && notes_depth.is_none() => {
                            notes_depth = Some(depth);
                            notes_buf.clear();
                        }
                        _ => {}
                    }

                    if let Event::Start(_) = event {
                        depth += 1;
                    }
                }
                Event::End(tag) => {
                    if depth > 0 {
                        depth -= 1;
                    }
                    let local = String::from_utf8_lossy(tag.name().as_ref()).to_string();

                    if notes_depth.is_some() {
                        append_raw(&mut notes_buf, &event, &reader);
                    }

                    if notes_depth == Some(depth) && local == "Notes" {
                        let hash = hex_sha256(&notes_buf);
                        let name = current_clip_name.clone().unwrap_or_else(|| {
                            let n = format!("clip-{unnamed_clip_count}");
                            unnamed_clip_count += 1;
                            n
                        });
                        index.clip_hashes.insert(name, hash);
                        notes_depth = None;
                    }

                    if clip_depth == Some(depth) && local == "MidiClip" {
                        clip_depth = None;
                        current_clip_name = None;
                    }
                }
                Event::Text(text) => {
                    if notes_depth.is_some() {
                        notes_buf.extend_from_slice(text.as_ref());
                    }

                    let content = text.unescape().unwrap_or_default();
                    if let Some(path) = classify_path_text(&content, project_root) {
                        index.sample_paths.insert(path);
                    }
                }
                _ => {}
            }

            buf.clear();
        }

        index
    }
}

fn append_raw(out: &mut Vec<u8>, event: &Event, _reader: &Reader<&[u8]>) {
    // Re-serialize the event as-encountered so the notes hash is computed
    // over a canonical byte stream rather than the file's original spacing.
    match event {
        Event::Start(tag) => {
            out.push(b'<');
            out.extend_from_slice(tag.name().as_ref());
            for attr in tag.attributes().flatten() {
                out.push(b' ');
                out.extend_from_slice(attr.key.as_ref());
                out.extend_from_slice(b"=\"");
                out.extend_from_slice(&attr.value);
                out.push(b'"');
            }
            out.push(b'>');
        }
        Event::End(tag) => {
            out.extend_from_slice(b"</");
            out.extend_from_slice(tag.name().as_ref());
            out.push(b'>');
        }
        _ => {}
    }
}

fn find_attr(tag: &quick_xml::events::BytesStart, key: &str) -> Option<String> {
    tag.attributes().flatten().find_map(|attr| {
        if attr.key.as_ref() == key.as_bytes() {
            Some(String::from_utf8_lossy(&attr.value).to_string())
        } else {
            None
        }
    })
}

/// `<FileRef>` blocks carry either `AbsolutePath`, `Url`, or a
/// `RelativePath` + `FileName` pair.
fn extract_file_ref(tag: &quick_xml::events::BytesStart, project_root: &Path) -> Option<String> {
    if let Some(url) = find_attr(tag, "Url") {
        return classify_path_text(&url, project_root);
    }
    if let Some(abs) = find_attr(tag, "AbsolutePath") {
        return classify_path_text(&abs, project_root);
    }
    if let Some(rel) = find_attr(tag, "RelativePath") {
        let file_name = find_attr(tag, "FileName").unwrap_or_default();
        let joined = if file_name.is_empty() {
            rel
        } else {
            format!("{}/{}", rel.trim_end_matches('/'), file_name)
        };
        return classify_path_text(&joined, project_root);
    }
    None
}

/// Recognizes the other three shapes: `file://` URIs, Windows absolute
/// paths, and relative `Samples/…` paths. Returns `None` for text that
/// doesn't look like an audio sample reference at all. Whatever is
/// recognized is relativized to `project_root` before being returned.
fn classify_path_text(text: &str, project_root: &Path) -> Option<String> {
    let candidate = if let Some(rest) = text.strip_prefix("file://") {
        let rest = rest.strip_prefix("localhost/").unwrap_or(rest);
        percent_decode_str(rest).decode_utf8_lossy().to_string()
    } else {
        text.to_string()
    };

    let normalized = candidate.replace('\\', "/");
    let looks_like_windows_abs = candidate.len() > 2 && candidate.as_bytes()[1] == b':';
    let looks_like_relative_samples = normalized.to_lowercase().contains("samples/");

    if !looks_like_windows_abs && !looks_like_relative_samples && !text.starts_with("file://") {
        return None;
    }

    let has_audio_ext = AUDIO_EXTENSIONS.iter().any(|ext| {
        normalized
            .rsplit('.')
            .next()
            .map(|actual| actual.eq_ignore_ascii_case(ext))
            .unwrap_or(false)
    });

    if !has_audio_ext {
        return None;
    }

    Some(relativize_sample_path(&normalized, project_root))
}

/// Strips `project_root` off an absolute sample path. A path already
/// relative (the `RelativePath`/`FileName` and bare `Samples/…` shapes)
/// passes through unchanged since it strips to nothing. A path outside
/// `project_root` entirely (moved project, foreign drive) falls back to
/// the suffix starting at its first `Samples/` segment, which is how
/// Ableton lays out a project's own sample folder.
fn relativize_sample_path(normalized: &str, project_root: &Path) -> String {
    if let Some(rel) = paths::relativize(project_root, std::path::Path::new(normalized)) {
        let rel = rel.to_string_lossy().replace('\\', "/");
        if !rel.is_empty() {
            return rel;
        }
    }

    if let Some(idx) = normalized.to_lowercase().find("samples/") {
        return normalized[idx..].to_string();
    }

    normalized.to_string()
}

fn hex_sha256(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(bytes);
    let mut s = String::with_capacity(digest.len() * 2);
    use std::fmt::Write;
    for b in digest {
        let _ = write!(s, "{b:02x}");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write as _;

    fn gzip(xml: &str) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(xml.as_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn extracts_file_uri_sample_and_relativizes_to_project_root() {
        let xml = r#"<Ableton><FileRef Url="file://localhost/Users/me/Project/Samples/Kick.wav"/></Ableton>"#;
        let index = AlsReader::read(Path::new("/Users/me/Project"), &gzip(xml)).unwrap();
        assert!(index.sample_paths.contains("Samples/Kick.wav"));
    }

    #[test]
    fn extracts_windows_absolute_path_and_relativizes_to_project_root() {
        let xml = r#"<Ableton><SampleRef><FileRef AbsolutePath="C:\Users\me\Project\Samples\Snare.wav"/></SampleRef></Ableton>"#;
        let index = AlsReader::read(Path::new("C:/Users/me/Project"), &gzip(xml)).unwrap();
        assert!(index.sample_paths.contains("Samples/Snare.wav"));
    }

    #[test]
    fn extracts_relative_path_plus_filename() {
        let xml = r#"<Ableton><FileRef RelativePath="Samples/Imported" FileName="Hat.wav"/></Ableton>"#;
        let index = AlsReader::read(Path::new("/Users/me/Project"), &gzip(xml)).unwrap();
        assert!(index.sample_paths.contains("Samples/Imported/Hat.wav"));
    }

    #[test]
    fn sample_outside_project_root_falls_back_to_samples_suffix() {
        let xml = r#"<Ableton><FileRef Url="file://localhost/elsewhere/disk/Samples/Tom.wav"/></Ableton>"#;
        let index = AlsReader::read(Path::new("/Users/me/Project"), &gzip(xml)).unwrap();
        assert!(index.sample_paths.contains("Samples/Tom.wav"));
    }

    #[test]
    fn computes_clip_hash_for_named_midi_clip() {
        let xml = r#"<Ableton><MidiClip Name="Lead"><Notes><KeyTrack><Note Time="0" Duration="1"/></KeyTrack></Notes></MidiClip></Ableton>"#;
        let index = AlsReader::read(Path::new("/Users/me/Project"), &gzip(xml)).unwrap();
        assert!(index.clip_hashes.contains_key("Lead"));
    }

    #[test]
    fn unnamed_clips_get_synthetic_names() {
        let xml = r#"<Ableton><MidiClip><Notes><KeyTrack/></Notes></MidiClip><MidiClip><Notes><KeyTrack/></Notes></MidiClip></Ableton>"#;
        let index = AlsReader::read(Path::new("/Users/me/Project"), &gzip(xml)).unwrap();
        assert!(index.clip_hashes.contains_key("clip-0"));
        assert!(index.clip_hashes.contains_key("clip-1"));
    }

    #[test]
    fn malformed_xml_yields_partial_index_without_panicking() {
        let xml = r#"<Ableton><FileRef Url="file://localhost/a/Samples/Kick.wav"/><Unclosed>"#;
        let index = AlsReader::read(Path::new("/a"), &gzip(xml)).unwrap();
        assert!(index.sample_paths.contains("Samples/Kick.wav"));
    }

    #[test]
    fn ignores_non_audio_text_content() {
        let xml = r#"<Ableton><Name Value="My Project"/></Ableton>"#;
        let index = AlsReader::read(Path::new("/Users/me/Project"), &gzip(xml)).unwrap();
        assert!(index.sample_paths.is_empty());
    }
}
