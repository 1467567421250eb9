//! PCM WAV writer.
//!
//! ```text
//! offset  field
//! 0       "RIFF" <size - 8>  "WAVE"
//! 12      "fmt " 16 <PCM=1> <channels> <rate> <byte rate> <align> <bits>
//! 36      "data" <data size>
//! 44      frames, each value little-endian in bits/8 bytes
//! ...     "LIST" <size> "INFO" "ICRD" <date> "ICMT" <comment>
//! ```
//!
//! Both size fields are written as placeholders and patched on close.

use super::{FrameSink, SinkFormat};
use crate::error::{DaqError, Result};
use chrono::{DateTime, Local};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const HEADER_LEN: u64 = 44;
const PLACEHOLDER: u32 = 0xDEAD_BEEF;
const PCM: u16 = 1;

struct Session {
    path: PathBuf,
    writer: BufWriter<File>,
    data_bytes: u64,
    frames: u64,
    created: DateTime<Local>,
}

/// Writes each session to `<dir>/<name>` as a 24-bit PCM WAV file.
pub struct WavSink {
    dir: PathBuf,
    comment: String,
    format: Option<SinkFormat>,
    session: Option<Session>,
    scratch: Vec<u8>,
}

impl std::fmt::Debug for WavSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WavSink")
            .field("dir", &self.dir)
            .field("format", &self.format)
            .field("open", &self.session.as_ref().map(|s| &s.path))
            .finish()
    }
}

impl WavSink {
    /// Sink writing into `dir`, created on first open if missing.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            comment: String::new(),
            format: None,
            session: None,
            scratch: Vec::new(),
        }
    }

    /// Text stored in the ICMT chunk of every file.
    #[must_use]
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    /// Output directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the open session, if any.
    pub fn current_path(&self) -> Option<&Path> {
        self.session.as_ref().map(|s| s.path.as_path())
    }

    fn write_header(writer: &mut impl Write, format: &SinkFormat) -> std::io::Result<()> {
        writer.write_all(b"RIFF")?;
        writer.write_all(&PLACEHOLDER.to_le_bytes())?;
        writer.write_all(b"WAVE")?;
        writer.write_all(b"fmt ")?;
        writer.write_all(&16u32.to_le_bytes())?;
        writer.write_all(&PCM.to_le_bytes())?;
        writer.write_all(&format.channels.to_le_bytes())?;
        writer.write_all(&format.sample_rate.to_le_bytes())?;
        writer.write_all(&format.byte_rate().to_le_bytes())?;
        writer.write_all(&format.block_align().to_le_bytes())?;
        writer.write_all(&format.bits_per_sample.to_le_bytes())?;
        writer.write_all(b"data")?;
        writer.write_all(&PLACEHOLDER.to_le_bytes())?;
        Ok(())
    }

    fn write_info(
        writer: &mut impl Write,
        created: &DateTime<Local>,
        comment: &str,
    ) -> std::io::Result<()> {
        let mut info = Vec::new();
        info.extend_from_slice(b"INFO");
        string_chunk(&mut info, b"ICRD", &created.format("%Y-%m-%d %H:%M:%S").to_string());
        string_chunk(&mut info, b"ICMT", comment);

        writer.write_all(b"LIST")?;
        writer.write_all(&(info.len() as u32).to_le_bytes())?;
        writer.write_all(&info)
    }

    fn finish(session: &mut Session, comment: &str) -> std::io::Result<()> {
        let writer = &mut session.writer;
        if session.data_bytes % 2 == 1 {
            writer.write_all(&[0])?;
        }
        Self::write_info(writer, &session.created, comment)?;
        writer.flush()?;

        let file_len = writer.stream_position()?;
        writer.seek(SeekFrom::Start(4))?;
        writer.write_all(&((file_len - 8) as u32).to_le_bytes())?;
        writer.seek(SeekFrom::Start(HEADER_LEN - 4))?;
        writer.write_all(&(session.data_bytes as u32).to_le_bytes())?;
        writer.flush()?;
        writer.get_ref().sync_all()
    }
}

/// Append an INFO sub-chunk: id, size, text and one or two NUL bytes so the
/// chunk stays word aligned.
fn string_chunk(out: &mut Vec<u8>, id: &[u8; 4], text: &str) {
    let padding = if text.len() % 2 == 1 { 1 } else { 2 };
    out.extend_from_slice(id);
    out.extend_from_slice(&((text.len() + padding) as u32).to_le_bytes());
    out.extend_from_slice(text.as_bytes());
    out.extend(std::iter::repeat(0u8).take(padding));
}

impl FrameSink for WavSink {
    fn configure(&mut self, format: SinkFormat) -> Result<()> {
        if self.session.is_some() {
            return Err(DaqError::sink(&self.dir, "cannot change format while a file is open"));
        }
        if format.channels == 0 || !matches!(format.bits_per_sample, 8 | 16 | 24 | 32) {
            return Err(DaqError::sink(&self.dir, format!("unsupported format {format:?}")));
        }
        self.format = Some(format);
        Ok(())
    }

    fn open(&mut self, name: &str) -> Result<()> {
        self.close()?;
        let format = self
            .format
            .ok_or_else(|| DaqError::sink(&self.dir, "format not configured"))?;

        fs::create_dir_all(&self.dir).map_err(|e| DaqError::sink(&self.dir, e))?;
        let (path, file) = create_unique(&self.dir, name)?;
        let mut writer = BufWriter::new(file);
        Self::write_header(&mut writer, &format).map_err(|e| DaqError::sink(&path, e))?;

        info!(
            path = %path.display(),
            channels = format.channels,
            rate = format.sample_rate,
            "opened WAV file"
        );
        self.session = Some(Session {
            path,
            writer,
            data_bytes: 0,
            frames: 0,
            created: Local::now(),
        });
        Ok(())
    }

    fn write_frame(&mut self, values: &[i32]) -> Result<()> {
        let Some(format) = self.format else {
            return Err(DaqError::sink(&self.dir, "format not configured"));
        };
        let Some(session) = self.session.as_mut() else {
            return Err(DaqError::sink(&self.dir, "no file open"));
        };
        if values.len() != usize::from(format.channels) {
            return Err(DaqError::sink(
                &session.path,
                format!("frame has {} values, expected {}", values.len(), format.channels),
            ));
        }

        let width = format.bytes_per_sample();
        self.scratch.clear();
        for value in values {
            self.scratch.extend_from_slice(&value.to_le_bytes()[..width]);
        }
        session
            .writer
            .write_all(&self.scratch)
            .map_err(|e| DaqError::sink(&session.path, e))?;
        session.data_bytes += self.scratch.len() as u64;
        session.frames += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        Self::finish(&mut session, &self.comment)
            .map_err(|e| DaqError::sink(&session.path, e))?;
        debug!(path = %session.path.display(), frames = session.frames, "closed WAV file");
        Ok(())
    }
}

/// Create `dir/name`, or `dir/stem-N.ext` if that already exists. Existing
/// recordings are never truncated.
fn create_unique(dir: &Path, name: &str) -> Result<(PathBuf, File)> {
    let base = Path::new(name);
    let stem = base.file_stem().and_then(|s| s.to_str()).unwrap_or(name);
    let extension = base.extension().and_then(|s| s.to_str());

    for attempt in 0u32..1000 {
        let candidate = match (attempt, extension) {
            (0, _) => name.to_string(),
            (n, Some(ext)) => format!("{stem}-{n}.{ext}"),
            (n, None) => format!("{stem}-{n}"),
        };
        let path = dir.join(candidate);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(DaqError::sink(&path, err)),
        }
    }
    Err(DaqError::sink(dir.join(name), "no free file name"))
}

impl Drop for WavSink {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::error!(error = %err, "failed to finalise WAV file on drop");
        }
    }
}
