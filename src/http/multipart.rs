/*
 * multipart.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Corriere, an asynchronous HTTP client.
 *
 * Corriere is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Corriere is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Corriere.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Multipart form encoding: scalar fields and files behind one boundary,
//! with the body size computed up front so Content-Length can be stamped.
//!
//! Files are path-backed (opened lazily, size from metadata) or
//! handle-backed (size from seek-to-end, position restored). File reads go
//! through tokio's file I/O, which runs on the blocking pool.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use rand::Rng;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};

use crate::error::Result;

const FILE_CHUNK: usize = 1024 * 1024;

enum FileSource {
    Path(PathBuf),
    Handle(fs::File),
}

/// One file destined for a multipart field.
pub struct MultipartFile {
    source: FileSource,
    pub filename: String,
    pub content_type: Option<String>,
}

impl MultipartFile {
    /// Path-backed file. Filename defaults to the path's base name.
    pub fn from_path(
        path: impl Into<PathBuf>,
        filename: Option<String>,
        content_type: Option<String>,
    ) -> Self {
        let path = path.into();
        let filename = filename.unwrap_or_else(|| {
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "file".to_string())
        });
        Self {
            source: FileSource::Path(path),
            filename,
            content_type,
        }
    }

    /// Handle-backed file: an already-open handle supplied by the caller.
    pub fn from_handle(
        file: fs::File,
        filename: impl Into<String>,
        content_type: Option<String>,
    ) -> Self {
        Self {
            source: FileSource::Handle(file),
            filename: filename.into(),
            content_type,
        }
    }

    /// Size in bytes. Path files ask the filesystem; handle files seek to
    /// the end and restore the position.
    pub async fn size(&mut self) -> Result<u64> {
        match &mut self.source {
            FileSource::Path(path) => Ok(fs::metadata(path).await?.len()),
            FileSource::Handle(file) => {
                let pos = file.stream_position().await?;
                let end = file.seek(SeekFrom::End(0)).await?;
                file.seek(SeekFrom::Start(pos)).await?;
                Ok(end - pos)
            }
        }
    }

    /// Append the file contents to `out`, reading a chunk at a time.
    async fn read_into(&mut self, out: &mut Vec<u8>) -> Result<()> {
        let mut file = match &mut self.source {
            FileSource::Path(path) => fs::File::open(&path).await?,
            FileSource::Handle(file) => file.try_clone().await?,
        };
        let mut chunk = vec![0u8; FILE_CHUNK];
        loop {
            let n = file.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        Ok(())
    }
}

enum Field {
    Scalar { name: String, value: String },
    File { name: String, file: MultipartFile },
}

/// Ordered multipart form. The boundary is generated once and stays
/// constant for the form's lifetime.
pub struct MultipartForm {
    fields: Vec<Field>,
    boundary: String,
}

impl MultipartForm {
    pub fn new() -> Self {
        let token: u32 = rand::thread_rng().gen_range(100_000_000..1_000_000_000);
        Self {
            fields: Vec::new(),
            boundary: format!("boundary-{token}"),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Content-Type header value for this form.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn add_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push(Field::Scalar {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Add a path-backed file field.
    pub fn add_file(&mut self, name: impl Into<String>, path: impl AsRef<Path>) {
        self.add_part(name, MultipartFile::from_path(path.as_ref(), None, None));
    }

    /// Add a prepared file (custom filename or content type).
    pub fn add_part(&mut self, name: impl Into<String>, file: MultipartFile) {
        self.fields.push(Field::File {
            name: name.into(),
            file,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Serialize the whole form and return it with its size, so the
    /// caller can set Content-Length before sending.
    pub async fn get_body_size(&mut self) -> Result<(Bytes, usize)> {
        let mut out: Vec<u8> = Vec::new();
        for field in &mut self.fields {
            out.extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
            match field {
                Field::Scalar { name, value } => {
                    out.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n")
                            .as_bytes(),
                    );
                    out.extend_from_slice(value.as_bytes());
                    out.extend_from_slice(b"\r\n");
                }
                Field::File { name, file } => {
                    out.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{}\"\r\n",
                            file.filename
                        )
                        .as_bytes(),
                    );
                    if let Some(ct) = &file.content_type {
                        out.extend_from_slice(format!("Content-Type: {ct}\r\n").as_bytes());
                    }
                    out.extend_from_slice(b"\r\n");
                    file.read_into(&mut out).await?;
                    out.extend_from_slice(b"\r\n");
                }
            }
        }
        out.extend_from_slice(format!("--{}--", self.boundary).as_bytes());
        let size = out.len();
        Ok((Bytes::from(out), size))
    }
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    async fn temp_file(contents: &[u8]) -> PathBuf {
        let dir = std::env::temp_dir();
        let path = dir.join(format!(
            "corriere-mp-{}-{}",
            std::process::id(),
            rand::thread_rng().gen_range(0u32..u32::MAX)
        ));
        let mut f = fs::File::create(&path).await.unwrap();
        f.write_all(contents).await.unwrap();
        f.flush().await.unwrap();
        path
    }

    #[tokio::test]
    async fn scalar_fields_serialize_in_order() {
        let mut form = MultipartForm::new();
        form.add_field("first", "one");
        form.add_field("second", "two");
        let boundary = form.boundary().to_string();
        let (body, size) = form.get_body_size().await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert_eq!(size, body.len());
        assert!(text.starts_with(&format!("--{boundary}\r\n")));
        assert!(text.contains("Content-Disposition: form-data; name=\"first\"\r\n\r\none\r\n"));
        assert!(text.contains("Content-Disposition: form-data; name=\"second\"\r\n\r\ntwo\r\n"));
        assert!(text.ends_with(&format!("--{boundary}--")));
        assert!(text.find("first").unwrap() < text.find("second").unwrap());
    }

    #[tokio::test]
    async fn file_field_includes_filename_and_bytes() {
        let path = temp_file(b"bar").await;
        let mut form = MultipartForm::new();
        form.add_file("foo", &path);
        form.add_field("field1", "foo");
        let (body, _) = form.get_body_size().await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        let fname = path.file_name().unwrap().to_string_lossy();
        assert!(text.contains(&format!(
            "Content-Disposition: form-data; name=\"foo\"; filename=\"{fname}\""
        )));
        assert!(text.contains("\r\n\r\nbar\r\n"));
        fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn content_type_line_for_typed_file() {
        let path = temp_file(b"{}").await;
        let mut form = MultipartForm::new();
        form.add_part(
            "doc",
            MultipartFile::from_path(&path, Some("data.json".into()), Some("application/json".into())),
        );
        let (body, _) = form.get_body_size().await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("filename=\"data.json\""));
        assert!(text.contains("Content-Type: application/json\r\n"));
        fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn sizes_for_path_and_handle_files() {
        let path = temp_file(b"0123456789").await;
        let mut by_path = MultipartFile::from_path(&path, None, None);
        assert_eq!(by_path.size().await.unwrap(), 10);

        let handle = fs::File::open(&path).await.unwrap();
        let mut by_handle = MultipartFile::from_handle(handle, "h", None);
        assert_eq!(by_handle.size().await.unwrap(), 10);
        // size() must not move the read position
        assert_eq!(by_handle.size().await.unwrap(), 10);
        fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn boundary_is_stable() {
        let form = MultipartForm::new();
        let b1 = form.boundary().to_string();
        assert!(b1.starts_with("boundary-"));
        assert_eq!(form.boundary(), b1);
        assert_eq!(form.content_type(), format!("multipart/form-data; boundary={b1}"));
    }
}
