use std::path::Path;

use image::{DynamicImage, ImageFormat};
use serde::Serialize;

use crate::error::DecodeError;

/// A file as handed over by the upload widget, not yet decoded.
#[derive(Clone, Debug)]
pub struct RawUpload {
    /// Name reported by the client, used only for display and identity.
    pub filename: String,
    /// Encoded file contents.
    pub bytes: Vec<u8>,
}

impl RawUpload {
    /// Wraps bytes received from a client.
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }

    /// Reads an upload from disk, named after the file's last path component.
    pub fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { filename, bytes })
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// A successfully decoded upload.
///
/// The encoded bytes are kept alongside the raster because they are what
/// gets transmitted; the raster proves the upload is a readable image.
#[derive(Debug)]
pub struct ImageItem {
    filename: String,
    format: ImageFormat,
    bytes: Vec<u8>,
    image: DynamicImage,
}

impl ImageItem {
    /// Name of the original upload.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Size of the original upload in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Format detected from the file's contents.
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// MIME type sent along with the inline data.
    pub fn mime_type(&self) -> &'static str {
        self.format.to_mime_type()
    }

    /// The encoded upload, exactly as received.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The decoded raster.
    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    /// Width and height in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }
}

/// An upload that was left out of the batch.
#[derive(Debug)]
pub struct SkippedUpload {
    /// Name of the rejected upload.
    pub filename: String,
    pub reason: DecodeError,
}

/// Ordered `(filename, size)` pairs identifying a set of uploads.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BatchIdentity(Vec<(String, usize)>);

impl BatchIdentity {
    /// Identity of raw uploads, before any decoding.
    pub fn of_uploads<'a>(uploads: impl IntoIterator<Item = &'a RawUpload>) -> Self {
        Self(
            uploads
                .into_iter()
                .map(|upload| (upload.filename.clone(), upload.size()))
                .collect(),
        )
    }

    /// The `(filename, size)` pairs in upload order.
    pub fn entries(&self) -> &[(String, usize)] {
        &self.0
    }

    /// `true` when no upload is present.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Decoded images submitted together, in upload order.
#[derive(Debug, Default)]
pub struct UploadBatch {
    items: Vec<ImageItem>,
}

impl UploadBatch {
    /// Decodes every upload, keeping the readable ones and reporting the rest.
    ///
    /// One bad file never fails the whole batch.
    pub fn collect(uploads: impl IntoIterator<Item = RawUpload>) -> (Self, Vec<SkippedUpload>) {
        let mut items = Vec::new();
        let mut skipped = Vec::new();

        for upload in uploads {
            match decode(&upload.bytes) {
                Ok((format, image)) => {
                    log::debug!(
                        "Decoded {} ({} bytes, {}x{})",
                        upload.filename,
                        upload.bytes.len(),
                        image.width(),
                        image.height()
                    );
                    items.push(ImageItem {
                        filename: upload.filename,
                        format,
                        bytes: upload.bytes,
                        image,
                    });
                }
                Err(reason) => {
                    log::warn!("Skipping invalid upload {}: {}", upload.filename, reason);
                    skipped.push(SkippedUpload {
                        filename: upload.filename,
                        reason,
                    });
                }
            }
        }

        (Self { items }, skipped)
    }

    /// Number of decoded images.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// `true` when no upload could be decoded.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Images in upload order.
    pub fn iter(&self) -> std::slice::Iter<'_, ImageItem> {
        self.items.iter()
    }

    /// Identity of the decoded images only; skipped uploads are not part of it.
    pub fn identity(&self) -> BatchIdentity {
        BatchIdentity(
            self.items
                .iter()
                .map(|item| (item.filename.clone(), item.size()))
                .collect(),
        )
    }
}

impl<'a> IntoIterator for &'a UploadBatch {
    type Item = &'a ImageItem;
    type IntoIter = std::slice::Iter<'a, ImageItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Shorthand for [`UploadBatch::collect`].
pub fn collect_uploads(
    uploads: impl IntoIterator<Item = RawUpload>,
) -> (UploadBatch, Vec<SkippedUpload>) {
    UploadBatch::collect(uploads)
}

fn decode(bytes: &[u8]) -> Result<(ImageFormat, DynamicImage), DecodeError> {
    let format = image::guess_format(bytes)?;
    let image = image::load_from_memory_with_format(bytes, format)?;
    Ok((format, image))
}

#[cfg(test)]
pub(crate) fn encoded_image(format: ImageFormat) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(4, 3, image::Rgb([90, 90, 90])));
    let mut out = std::io::Cursor::new(Vec::new());
    image.write_to(&mut out, format).unwrap();
    out.into_inner()
}
