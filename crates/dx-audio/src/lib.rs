// Audio decoding and mel-spectrogram feature extraction for deepfake-xai.

pub mod decode;
pub mod extractor;
pub mod fft;
pub mod mel;

pub use extractor::FeatureExtractor;
