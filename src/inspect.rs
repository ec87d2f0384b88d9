//! Preview extraction for uploaded print files.
//!
//! Dispatch is on the file name alone. `.3mf` packages and sliced
//! `.gcode.3mf` packages are both zip archives, so the content type cannot
//! tell them apart; the archive's entries decide instead.

use std::io::{Cursor, Read};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zip::ZipArchive;

/// Entry holding the slicer's rendered thumbnail of the first plate.
const THUMBNAIL_SUFFIX: &str = "plate_1.png";
/// Entry written by slicers alongside the G-code.
const SLICER_METADATA_SUFFIX: &str = "metadata.json";
const MODEL_SUFFIX: &str = ".stl";

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("Malformed print archive: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("Failed to read archive entry: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Stl,
    Threemf,
    GcodeThreemf,
    Unknown,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Stl => "stl",
            FileKind::Threemf => "threemf",
            FileKind::GcodeThreemf => "gcode_threemf",
            FileKind::Unknown => "unknown",
        }
    }
}

/// What could be extracted from a print file for previewing.
///
/// Serializes to the preview response body, e.g.
/// `{"file_type":"stl","model_data":"<base64>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "file_type")]
pub enum FileMetadata {
    /// Base64 of the whole STL file.
    #[serde(rename = "stl")]
    Stl { model_data: String },
    /// Base64 of the STL model found inside an unsliced package.
    #[serde(rename = "3mf")]
    ThreeMf { model_data: String },
    /// `data:image/png;base64,...` thumbnail from a sliced package.
    #[serde(rename = "gcode.3mf")]
    GcodeThreeMf { preview_image: String },
    /// Nothing extractable.
    #[serde(rename = "unknown")]
    Unknown,
}

impl FileMetadata {
    pub fn kind(&self) -> FileKind {
        match self {
            FileMetadata::Stl { .. } => FileKind::Stl,
            FileMetadata::ThreeMf { .. } => FileKind::Threemf,
            FileMetadata::GcodeThreeMf { .. } => FileKind::GcodeThreemf,
            FileMetadata::Unknown => FileKind::Unknown,
        }
    }

    pub fn model_data(&self) -> Option<&str> {
        match self {
            FileMetadata::Stl { model_data } | FileMetadata::ThreeMf { model_data } => {
                Some(model_data)
            }
            _ => None,
        }
    }

    pub fn preview_image(&self) -> Option<&str> {
        match self {
            FileMetadata::GcodeThreeMf { preview_image } => Some(preview_image),
            _ => None,
        }
    }
}

/// Extract a preview from a print file held entirely in memory.
///
/// Callers must bound `content` before calling; archives are read with
/// random access. An unrecognised extension is `Unknown`, not an error, but
/// a `.3mf` that is not a readable archive is a [`FormatError`].
pub fn inspect(file_name: &str, content: &[u8]) -> Result<FileMetadata, FormatError> {
    let lower = file_name.to_lowercase();

    if lower.ends_with(".stl") {
        return Ok(FileMetadata::Stl {
            model_data: STANDARD.encode(content),
        });
    }

    // Also covers the compound `.gcode.3mf`.
    if lower.ends_with(".3mf") {
        return inspect_package(content);
    }

    Ok(FileMetadata::Unknown)
}

/// Single pass over the archive in stored order. A model entry only counts
/// if no slicer output has been seen before it.
fn inspect_package(content: &[u8]) -> Result<FileMetadata, FormatError> {
    let mut archive = ZipArchive::new(Cursor::new(content))?;

    let mut sliced = false;
    let mut thumbnail: Option<Vec<u8>> = None;
    let mut model: Option<Vec<u8>> = None;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();

        if name.ends_with(THUMBNAIL_SUFFIX) {
            thumbnail = Some(read_entry(&mut entry)?);
            sliced = true;
        }
        if name.ends_with(MODEL_SUFFIX) && !sliced {
            model = Some(read_entry(&mut entry)?);
        }
        if name.ends_with(SLICER_METADATA_SUFFIX) {
            sliced = true;
        }
    }

    if let (true, Some(png)) = (sliced, thumbnail) {
        return Ok(FileMetadata::GcodeThreeMf {
            preview_image: format!("data:image/png;base64,{}", STANDARD.encode(png)),
        });
    }

    match model {
        Some(model) if !model.is_empty() => Ok(FileMetadata::ThreeMf {
            model_data: STANDARD.encode(model),
        }),
        _ => Ok(FileMetadata::Unknown),
    }
}

fn read_entry(entry: &mut impl Read) -> Result<Vec<u8>, FormatError> {
    let mut buf = Vec::new();
    entry.read_to_end(&mut buf)?;
    Ok(buf)
}
