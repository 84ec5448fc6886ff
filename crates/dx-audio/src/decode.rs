use std::fs::File;
use std::io::Cursor;
use std::path::Path;

use anyhow::{Context, Result};
use dx_core::error::XaiError;
use dx_core::frame::AudioSample;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Décode un flux d'octets (WAV, FLAC, OGG, MP3…) en échantillons mono f32,
/// à la fréquence d'échantillonnage d'origine.
///
/// `extension` is an optional format hint such as `"wav"`.
///
/// # Errors
/// Returns `XaiError::FeatureExtraction` if the stream cannot be probed or
/// holds no decodable audio track.
pub fn decode_bytes(bytes: Vec<u8>, extension: Option<&str>) -> Result<AudioSample, XaiError> {
    decode_source(Box::new(Cursor::new(bytes)), extension, "<memory>")
        .map_err(|e| XaiError::FeatureExtraction(format!("{e:#}")))
}

/// Decode an audio file into mono f32 samples.
///
/// # Errors
/// Returns `XaiError::FeatureExtraction` if the file cannot be opened or decoded.
///
/// # Example
/// ```no_run
/// use dx_audio::decode::decode_file;
/// let audio = decode_file("sample.wav").unwrap();
/// println!("{} samples @ {} Hz", audio.len(), audio.sample_rate());
/// ```
pub fn decode_file(path: impl AsRef<Path>) -> Result<AudioSample, XaiError> {
    let path = path.as_ref();
    let open = || -> Result<AudioSample> {
        let file = File::open(path)
            .with_context(|| format!("Cannot open audio file: {}", path.display()))?;
        let ext = path.extension().and_then(|e| e.to_str());
        decode_source(Box::new(file), ext, &path.display().to_string())
    };
    open().map_err(|e| XaiError::FeatureExtraction(format!("{e:#}")))
}

fn decode_source(
    source: Box<dyn MediaSource>,
    extension: Option<&str>,
    label: &str,
) -> Result<AudioSample> {
    let mss = MediaSourceStream::new(source, MediaSourceStreamOptions::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .context("Failed to probe audio format")?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .context("No default audio track found")?;

    let sample_rate = track
        .codec_params
        .sample_rate
        .context("Audio track has no sample rate")?;
    let channels = track
        .codec_params
        .channels
        .map_or(1, symphonia::core::audio::Channels::count)
        .max(1);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("Failed to create audio decoder")?;

    let track_id = track.id;
    let mut all_samples: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut max_sample_frames: usize = 0;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(symphonia::core::errors::Error::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => {
                log::warn!("Audio decode packet error: {e}");
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(e) => {
                log::warn!("Audio decode frame error: {e}");
                continue;
            }
        };

        let spec = *decoded.spec();
        let num_frames = decoded.capacity();
        if sample_buf.is_none() || num_frames > max_sample_frames {
            sample_buf = Some(SampleBuffer::<f32>::new(num_frames as u64, spec));
            max_sample_frames = num_frames;
        }
        let Some(buf) = sample_buf.as_mut() else {
            continue;
        };
        buf.copy_interleaved_ref(decoded);

        // Downmix to mono
        for chunk in buf.samples().chunks(channels) {
            all_samples.push(chunk.iter().sum::<f32>() / channels as f32);
        }
    }

    log::info!(
        "Decoded {} samples @ {}Hz ({} channel(s)) from {}",
        all_samples.len(),
        sample_rate,
        channels,
        label
    );

    Ok(AudioSample::new(all_samples, sample_rate))
}
