//! Enrollment gate: turns a still image into the single stored face encoding.

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::error::AuthError;
use crate::frame::{Frame, Region};
use crate::matcher::FaceEncoding;
use crate::provider::FeatureProvider;

/// Persistence for the one enrolled encoding and its preview image.
///
/// `save` overwrites whatever was stored before; `clear` removes both and is
/// a no-op when nothing is stored.
pub trait EncodingStore {
    type Error: std::error::Error + Send + Sync + 'static;

    fn load(&self) -> Result<Option<FaceEncoding>, Self::Error>;
    fn save(&mut self, encoding: &FaceEncoding, preview: Option<&RgbImage>) -> Result<(), Self::Error>;
    fn clear(&mut self) -> Result<(), Self::Error>;
}

/// Process-local store, used where nothing needs to survive the process.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    encoding: Option<FaceEncoding>,
    preview: Option<RgbImage>,
}

impl MemoryStore {
    pub fn preview(&self) -> Option<&RgbImage> {
        self.preview.as_ref()
    }
}

impl EncodingStore for MemoryStore {
    type Error = std::convert::Infallible;

    fn load(&self) -> Result<Option<FaceEncoding>, Self::Error> {
        Ok(self.encoding.clone())
    }

    fn save(&mut self, encoding: &FaceEncoding, preview: Option<&RgbImage>) -> Result<(), Self::Error> {
        self.encoding = Some(encoding.clone());
        self.preview = preview.cloned();
        Ok(())
    }

    fn clear(&mut self) -> Result<(), Self::Error> {
        self.encoding = None;
        self.preview = None;
        Ok(())
    }
}

/// A successful enrollment.
#[derive(Debug, Clone)]
pub struct Enrollment {
    pub encoding: FaceEncoding,
    pub region: Region,
    pub faces_detected: usize,
}

const PREVIEW_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Detect, encode and store the first face of a still image.
///
/// Rejects with [`AuthError::NoFaceFound`] without touching the store when the
/// provider reports no face.
pub fn enroll<P, S>(provider: &mut P, store: &mut S, image: &Frame) -> Result<Enrollment, AuthError>
where
    P: FeatureProvider,
    S: EncodingStore,
{
    let faces = provider.detect_faces(image)?;
    let Some(face) = faces.first() else {
        tracing::info!("enroll: no face in image");
        return Err(AuthError::NoFaceFound);
    };
    if faces.len() > 1 {
        tracing::debug!(faces = faces.len(), "enroll: several faces, using the first reported");
    }

    let encoding = provider.encode(image, &face.region)?;
    encoding.validate()?;

    let preview = render_preview(&image.image, &face.region);
    store.save(&encoding, Some(&preview)).map_err(AuthError::store)?;

    tracing::info!(
        dimension = encoding.dimension(),
        left = face.region.left,
        top = face.region.top,
        width = face.region.width,
        height = face.region.height,
        "enroll: encoding stored"
    );

    Ok(Enrollment {
        encoding,
        region: face.region,
        faces_detected: faces.len(),
    })
}

/// Copy of `image` with the face region outlined (2 px).
pub fn render_preview(image: &RgbImage, region: &Region) -> RgbImage {
    let mut preview = image.clone();
    if region.is_empty() {
        return preview;
    }

    draw_hollow_rect_mut(
        &mut preview,
        Rect::at(region.left as i32, region.top as i32).of_size(region.width, region.height),
        PREVIEW_COLOR,
    );
    if region.width > 2 && region.height > 2 {
        draw_hollow_rect_mut(
            &mut preview,
            Rect::at(region.left as i32 + 1, region.top as i32 + 1)
                .of_size(region.width - 2, region.height - 2),
            PREVIEW_COLOR,
        );
    }
    preview
}
