use image::{imageops::FilterType, GenericImageView};
use ndarray::{Array, Ix4};
use std::path::Path;
use thiserror::Error;

pub const INPUT_WIDTH: u32 = 150;
pub const INPUT_HEIGHT: u32 = 150;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("failed to read image file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Decodes image bytes into the model input tensor: shape (1, 150, 150, 3),
/// values scaled to [0, 1]. The image is resized, not cropped, so aspect
/// ratio is not preserved.
pub fn image_to_tensor(image_data: &[u8]) -> Result<Array<f32, Ix4>, PreprocessError> {
    let image_reader =
        image::ImageReader::new(std::io::Cursor::new(image_data)).with_guessed_format()?;

    let original_img = image_reader.decode()?;
    let img = original_img.resize_exact(INPUT_WIDTH, INPUT_HEIGHT, FilterType::CatmullRom);

    let mut input = Array::zeros((1, INPUT_HEIGHT as usize, INPUT_WIDTH as usize, 3));
    for pixel in img.pixels() {
        let x = pixel.0 as usize;
        let y = pixel.1 as usize;
        let [r, g, b, _] = pixel.2 .0;
        input[[0, y, x, 0]] = (r as f32) / 255.;
        input[[0, y, x, 1]] = (g as f32) / 255.;
        input[[0, y, x, 2]] = (b as f32) / 255.;
    }

    Ok(input)
}

pub fn load_tensor(path: &Path) -> Result<Array<f32, Ix4>, PreprocessError> {
    let image_data = std::fs::read(path)?;
    image_to_tensor(&image_data)
}
