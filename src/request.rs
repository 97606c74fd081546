use crate::{
    config::{GenerationParams, SafetySetting},
    upload::{BatchIdentity, ImageItem, UploadBatch},
};

/// One element of the user turn sent to the model.
#[derive(Clone, Copy, Debug)]
pub enum ContentPart<'a> {
    /// Plain instruction text.
    Text(&'a str),
    /// An uploaded image, sent inline with its MIME type.
    Image(&'a ImageItem),
}

/// Lead-in instruction followed by the batch's images.
///
/// Built fresh for every analysis and only borrowed by the provider.
#[derive(Debug)]
pub struct AnalysisRequest<'a> {
    instruction: &'a str,
    batch: &'a UploadBatch,
}

impl<'a> AnalysisRequest<'a> {
    /// Pairs the lead-in instruction with the batch to analyse.
    pub fn new(instruction: &'a str, batch: &'a UploadBatch) -> Self {
        Self { instruction, batch }
    }

    /// Text sent before the images.
    pub fn instruction(&self) -> &'a str {
        self.instruction
    }

    /// Number of images the request carries.
    pub fn image_count(&self) -> usize {
        self.batch.len()
    }

    /// The instruction text first, then every image in batch order.
    pub fn parts(&self) -> impl Iterator<Item = ContentPart<'a>> + use<'a> {
        std::iter::once(ContentPart::Text(self.instruction))
            .chain(self.batch.iter().map(ContentPart::Image))
    }

    /// Lightweight description of the request for logs and session state,
    /// without touching the image data.
    pub fn metadata(&self) -> BatchIdentity {
        self.batch.identity()
    }
}

/// Everything a provider needs for one call.
#[derive(Clone, Copy, Debug)]
pub struct GenerateRequest<'a> {
    pub system_instruction: &'a str,
    pub safety_settings: &'a [SafetySetting],
    pub generation: &'a GenerationParams,
    pub content: &'a AnalysisRequest<'a>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::{RawUpload, collect_uploads, encoded_image};
    use image::ImageFormat;

    #[test]
    fn instruction_precedes_images_in_batch_order() {
        let (batch, _) = collect_uploads([
            RawUpload::new("first.png", encoded_image(ImageFormat::Png)),
            RawUpload::new("second.jpg", encoded_image(ImageFormat::Jpeg)),
        ]);
        let request = AnalysisRequest::new("Describe these.", &batch);

        let parts: Vec<_> = request.parts().collect();
        assert_eq!(parts.len(), 3);
        assert!(matches!(parts[0], ContentPart::Text("Describe these.")));
        assert!(matches!(parts[1], ContentPart::Image(item) if item.filename() == "first.png"));
        assert!(matches!(parts[2], ContentPart::Image(item) if item.filename() == "second.jpg"));
        assert_eq!(request.image_count(), 2);
        assert_eq!(request.metadata(), batch.identity());
    }
}
