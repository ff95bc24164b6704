//! Metadata inspection step.
//!
//! The one detector that never touches the network: it walks the image
//! container for embedded text records, EXIF presence, and the telltale
//! chunks that generation tools leave behind (stable-diffusion-webui
//! `parameters`, ComfyUI `prompt`/`workflow` graphs, C2PA
//! `trainedAlgorithmicMedia` assertions).

use async_trait::async_trait;
use image::ImageFormat;
use serde::Serialize;
use tracing::debug;

use forgesight_core::{AnalysisStep, StepResult, TaskInput};

pub const NAME: &str = "metadata_analysis";
pub const DISPLAY_NAME: &str = "Metadata Analysis";

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Embedded-metadata findings for one image.
#[derive(Debug, Serialize, PartialEq)]
struct MetadataReport {
    format: Option<&'static str>,
    byte_len: usize,
    width: Option<u32>,
    height: Option<u32>,
    has_exif: bool,
    text_chunks: Vec<TextChunk>,
    generator_hints: Vec<String>,
}

/// One textual record recovered from the container.
#[derive(Debug, Serialize, PartialEq)]
struct TextChunk {
    keyword: String,
    value: String,
}

/// Local container inspection; no model call involved.
#[derive(Debug, Default)]
pub struct MetadataStep;

impl MetadataStep {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AnalysisStep for MetadataStep {
    fn name(&self) -> &'static str {
        NAME
    }

    fn display_name(&self) -> &'static str {
        DISPLAY_NAME
    }

    async fn run(&self, input: &TaskInput) -> StepResult {
        if input.image.is_empty() {
            return StepResult::failure(NAME, "empty image input");
        }
        let report = inspect(&input.image);
        debug!(
            chunks = report.text_chunks.len(),
            hints = report.generator_hints.len(),
            "metadata inspection finished"
        );
        match serde_json::to_value(&report) {
            Ok(content) => StepResult::success(NAME, content),
            Err(e) => StepResult::failure(NAME, format!("report serialization failed: {e}")),
        }
    }
}

fn inspect(bytes: &[u8]) -> MetadataReport {
    let format = container_label(bytes);
    let mut width = None;
    let mut height = None;
    let mut has_exif = scan_exif_marker(bytes);
    let mut text_chunks = Vec::new();
    let mut generator_hints = Vec::new();

    walk_png_chunks(bytes, |kind, data| {
        match &kind {
            b"IHDR" if data.len() >= 8 => {
                width = Some(u32::from_be_bytes([data[0], data[1], data[2], data[3]]));
                height = Some(u32::from_be_bytes([data[4], data[5], data[6], data[7]]));
            }
            b"eXIf" => has_exif = true,
            _ => {}
        }
        if let Some(chunk) = parse_text_chunk(kind, data) {
            if let Some(hint) = keyword_hint(&chunk.keyword) {
                push_unique(&mut generator_hints, hint);
            }
            text_chunks.push(chunk);
        }
    });

    for hint in scan_signature_needles(bytes) {
        push_unique(&mut generator_hints, hint);
    }

    MetadataReport {
        format,
        byte_len: bytes.len(),
        width,
        height,
        has_exif,
        text_chunks,
        generator_hints,
    }
}

fn container_label(bytes: &[u8]) -> Option<&'static str> {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Png) => Some("png"),
        Ok(ImageFormat::Jpeg) => Some("jpeg"),
        Ok(ImageFormat::WebP) => Some("webp"),
        Ok(ImageFormat::Gif) => Some("gif"),
        Ok(ImageFormat::Tiff) => Some("tiff"),
        Ok(ImageFormat::Bmp) => Some("bmp"),
        _ => None,
    }
}

/// Walk PNG chunks, calling `visit` with each chunk type and payload.
///
/// Tolerant by construction: CRCs are not verified and a truncated or
/// oversized length field simply ends the walk. Non-PNG input visits
/// nothing.
fn walk_png_chunks(bytes: &[u8], mut visit: impl FnMut([u8; 4], &[u8])) {
    if bytes.len() < 8 || bytes[..8] != PNG_SIGNATURE {
        return;
    }
    let mut offset = 8;
    while offset + 8 <= bytes.len() {
        let length = u32::from_be_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ]) as usize;
        let kind = [
            bytes[offset + 4],
            bytes[offset + 5],
            bytes[offset + 6],
            bytes[offset + 7],
        ];
        let data_start = offset + 8;
        let Some(data_end) = data_start.checked_add(length) else {
            return;
        };
        if data_end > bytes.len() {
            return;
        }
        visit(kind, &bytes[data_start..data_end]);
        if &kind == b"IEND" {
            return;
        }
        offset = data_end + 4; // skip the CRC
    }
}

/// Decode a `tEXt` or uncompressed `iTXt` chunk into keyword and value.
fn parse_text_chunk(kind: [u8; 4], data: &[u8]) -> Option<TextChunk> {
    match &kind {
        b"tEXt" => {
            let nul = data.iter().position(|&b| b == 0)?;
            let keyword = String::from_utf8_lossy(&data[..nul]).into_owned();
            let value = String::from_utf8_lossy(&data[nul + 1..]);
            Some(TextChunk {
                keyword,
                value: clip_value(&value),
            })
        }
        b"iTXt" => {
            let nul = data.iter().position(|&b| b == 0)?;
            let keyword = String::from_utf8_lossy(&data[..nul]).into_owned();
            let rest = data.get(nul + 1..)?;
            // compression flag + method precede the language tag;
            // compressed text would need inflating, so skip it.
            if rest.len() < 2 || rest[0] != 0 {
                return None;
            }
            let rest = &rest[2..];
            let lang_end = rest.iter().position(|&b| b == 0)?;
            let rest = &rest[lang_end + 1..];
            let translated_end = rest.iter().position(|&b| b == 0)?;
            let value = String::from_utf8_lossy(&rest[translated_end + 1..]);
            Some(TextChunk {
                keyword,
                value: clip_value(&value),
            })
        }
        _ => None,
    }
}

/// Chunk values can carry whole ComfyUI workflow graphs; clip for the report.
fn clip_value(value: &str) -> String {
    const MAX_VALUE_LEN: usize = 2048;
    let trimmed = value.trim();
    if trimmed.len() <= MAX_VALUE_LEN {
        return trimmed.to_string();
    }
    let mut end = MAX_VALUE_LEN;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}

fn keyword_hint(keyword: &str) -> Option<String> {
    match keyword.to_ascii_lowercase().as_str() {
        "parameters" => Some("stable-diffusion-webui parameters chunk".to_string()),
        "prompt" | "workflow" => Some(format!("comfyui {} chunk", keyword.to_ascii_lowercase())),
        _ => None,
    }
}

/// EXIF APP1 marker scan over the head of the file; covers JPEG and the
/// PNG `eXIf` payload alike.
fn scan_exif_marker(bytes: &[u8]) -> bool {
    const SCAN_CAP: usize = 64 * 1024;
    let cap = bytes.len().min(SCAN_CAP);
    bytes[..cap].windows(6).any(|window| window == b"Exif\0\0")
}

const SIGNATURE_NEEDLES: &[&str] = &[
    "midjourney",
    "dall-e",
    "dall·e",
    "stable diffusion",
    "adobe firefly",
    "trainedalgorithmicmedia",
    "novelai",
];

/// Case-insensitive scan of the file head for generator self-identification.
fn scan_signature_needles(bytes: &[u8]) -> Vec<String> {
    const SCAN_CAP: usize = 256 * 1024;
    let cap = bytes.len().min(SCAN_CAP);
    let haystack = String::from_utf8_lossy(&bytes[..cap]).to_lowercase();
    SIGNATURE_NEEDLES
        .iter()
        .copied()
        .filter(|needle| haystack.contains(needle))
        .map(|needle| format!("generator signature: {needle}"))
        .collect()
}

fn push_unique(hints: &mut Vec<String>, hint: String) {
    if !hints.iter().any(|existing| existing == &hint) {
        hints.push(hint);
    }
}
