use dx_core::frame::{CHANNELS, SpectralImage};
use ndarray::Array3;
use serde::{Deserialize, Serialize};

/// ImageNet BGR channel means used by caffe-style preprocessing.
pub const CAFFE_MEAN_BGR: [f32; 3] = [103.939, 116.779, 123.68];

/// Conversion image → tenseur d'entrée du modèle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preprocessing {
    /// Pixels divided by 255, RGB order. Used by the production classifier.
    #[default]
    UnitScale,
    /// RGB → BGR, then ImageNet mean subtraction on the 0..255 scale.
    Caffe,
}

impl Preprocessing {
    /// Build the (height, width, channel) input tensor.
    ///
    /// # Example
    /// ```
    /// use dx_core::frame::SpectralImage;
    /// use dx_model::Preprocessing;
    ///
    /// let mut img = SpectralImage::new(1, 1);
    /// img.set_pixel(0, 0, (255, 0, 0));
    /// let unit = Preprocessing::UnitScale.apply(&img);
    /// assert!((unit[[0, 0, 0]] - 1.0).abs() < 1e-6);
    /// let caffe = Preprocessing::Caffe.apply(&img);
    /// // red lands in the last (BGR) channel
    /// assert!((caffe[[0, 0, 2]] - (255.0 - 123.68)).abs() < 1e-3);
    /// ```
    #[must_use]
    pub fn apply(self, image: &SpectralImage) -> Array3<f32> {
        match self {
            Self::UnitScale => image.normalized(),
            Self::Caffe => {
                let (w, h) = (image.width() as usize, image.height() as usize);
                let data = image.data();
                Array3::from_shape_fn((h, w, CHANNELS), |(y, x, c)| {
                    let rgb = (y * w + x) * CHANNELS;
                    f32::from(data[rgb + (CHANNELS - 1 - c)]) - CAFFE_MEAN_BGR[c]
                })
            }
        }
    }
}
