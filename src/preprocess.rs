use std::io::Cursor;

use candle_core::{DType, Device, Tensor};
use image::imageops::FilterType;
use thiserror::Error;

use crate::model::IMAGE_SIZE;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("cannot identify image file: {0}")]
    Decode(#[from] image::ImageError),
    #[error("io error while reading image: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to build input tensor: {0}")]
    Tensor(#[from] candle_core::Error),
}

/// Decodes `image_data`, resizes it to 224x224 and returns a `(1, 3, 224, 224)`
/// tensor with channel values scaled to [0, 1].
pub fn preprocess_image(image_data: &[u8], device: &Device) -> Result<Tensor, PreprocessError> {
    let img = image::io::Reader::new(Cursor::new(image_data))
        .with_guessed_format()?
        .decode()?;

    let size = IMAGE_SIZE as u32;
    let rgb = img.resize_exact(size, size, FilterType::CatmullRom).to_rgb8();

    let pixels = Tensor::from_vec(rgb.into_raw(), (IMAGE_SIZE, IMAGE_SIZE, 3), device)?;
    let batch = pixels
        .permute((2, 0, 1))?
        .to_dtype(DType::F32)?
        .affine(1.0 / 255.0, 0.0)?
        .unsqueeze(0)?
        .contiguous()?;

    Ok(batch)
}
