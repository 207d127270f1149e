use std::{io::Cursor, str::FromStr, sync::Arc};

use image::{imageops::FilterType, DynamicImage, ImageFormat};
use tokio::task::JoinSet;

use crate::{AppState, Error};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantSpec {
    pub name: String,
    pub width: u32,
    pub height: u32,
}

// name=WIDTHxHEIGHT,...
#[derive(Debug, Clone)]
pub struct Variants(Arc<[VariantSpec]>);

impl Variants {
    pub fn iter(&self) -> impl Iterator<Item = &VariantSpec> {
        self.0.iter()
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum VariantParseError {
    #[error("no variants configured")]
    Empty,
    #[error("malformed variant {0:?}, expected name=WIDTHxHEIGHT")]
    Malformed(String),
    #[error("variant {0:?} configured more than once")]
    Duplicate(String),
}

impl FromStr for Variants {
    type Err = VariantParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut specs: Vec<VariantSpec> = Vec::new();
        for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let spec = parse_spec(entry)
                .ok_or_else(|| VariantParseError::Malformed(entry.to_owned()))?;
            if specs.iter().any(|v| v.name == spec.name) {
                return Err(VariantParseError::Duplicate(spec.name));
            }
            specs.push(spec);
        }
        if specs.is_empty() {
            return Err(VariantParseError::Empty);
        }
        Ok(Self(specs.into()))
    }
}

fn parse_spec(entry: &str) -> Option<VariantSpec> {
    let (name, size) = entry.split_once('=')?;
    let (width, height) = size.trim().split_once(['x', 'X'])?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some(VariantSpec {
        name: name.to_owned(),
        width: width.trim().parse().ok()?,
        height: height.trim().parse().ok()?,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat(ImageFormat);

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        self.0.extensions_str().first().copied().unwrap_or("bin")
    }

    pub fn mime_type(self) -> &'static str {
        self.0.to_mime_type()
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self(ImageFormat::WebP)
    }
}

#[derive(thiserror::Error, Debug)]
#[error("cannot encode images as {0:?}")]
pub struct UnsupportedFormat(String);

impl FromStr for OutputFormat {
    type Err = UnsupportedFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageFormat::from_extension(s.trim().trim_start_matches('.'))
            .filter(ImageFormat::writing_enabled)
            .map(Self)
            .ok_or_else(|| UnsupportedFormat(s.to_owned()))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Encoding {
    pub format: OutputFormat,
    pub webp_quality: f32,
}

pub struct VariantResult {
    pub target: String,
    pub data: Vec<u8>,
}

pub fn resolve_dimensions(original: (u32, u32), spec: &VariantSpec) -> (u32, u32) {
    let (width, height) = original;
    match (spec.width, spec.height) {
        (0, 0) => original,
        (0, h) => (derive(width, height, h), h),
        (w, 0) => (w, derive(height, width, w)),
        given => given,
    }
}

// round(numerator / denominator * fixed), at least one pixel
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn derive(numerator: u32, denominator: u32, fixed: u32) -> u32 {
    let derived = f64::from(numerator) / f64::from(denominator) * f64::from(fixed);
    (derived.round() as u32).max(1)
}

/// Object name for `variant` of `source`: the extension is replaced by
/// `extension` and every variant except `primary` gets a `_<variant>` suffix.
pub fn target_name(source: &str, variant: &str, primary: &str, extension: &str) -> String {
    let stem = source.rfind('.').map_or(source, |sep| &source[..sep]);
    if variant == primary {
        format!("{stem}.{extension}")
    } else {
        format!("{stem}_{variant}.{extension}")
    }
}

pub fn render(
    image: DynamicImage,
    spec: &VariantSpec,
    encoding: Encoding,
) -> Result<Vec<u8>, Error> {
    let (width, height) = resolve_dimensions((image.width(), image.height()), spec);
    let image = if (width, height) == (image.width(), image.height()) {
        image
    } else {
        image.resize_exact(width, height, FilterType::Lanczos3)
    };
    encode(&image, encoding)
}

fn encode(image: &DynamicImage, encoding: Encoding) -> Result<Vec<u8>, Error> {
    match encoding.format.0 {
        ImageFormat::WebP => {
            let converted;
            let image = if let DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) = image {
                image
            } else {
                converted = DynamicImage::ImageRgba8(image.to_rgba8());
                &converted
            };
            let encoder =
                webp::Encoder::from_image(image).map_err(|e| Error::WebPStr(e.to_owned()))?;
            let encoded = encoder
                .encode_simple(false, encoding.webp_quality)
                .map_err(|e| Error::WebPStr(format!("{e:?}")))?;
            Ok(encoded.to_vec())
        }
        // no alpha channel in JPEG
        ImageFormat::Jpeg => write(&DynamicImage::ImageRgb8(image.to_rgb8()), ImageFormat::Jpeg),
        format => write(image, format),
    }
}

fn write(image: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>, Error> {
    let mut output = Vec::new();
    image.write_to(&mut Cursor::new(&mut output), format)?;
    Ok(output)
}

/// Derives and writes every configured variant of `bucket/name`.
///
/// The source is decoded once; each variant task gets its own copy. Every
/// task is awaited even after a failure, and the first failure observed is
/// returned.
#[instrument(skip(state))]
pub async fn generate(state: &AppState, bucket: &str, name: &str) -> Result<Vec<String>, Error> {
    let source = state.store.read(bucket, name).await?;
    let image = tokio::task::spawn_blocking(move || image::load_from_memory(&source)).await??;
    debug!(width = image.width(), height = image.height(), "Decoded source image");

    let config = &state.config;
    let encoding = config.encoding();
    let mut set = JoinSet::new();
    for spec in config.variants.iter() {
        let target = target_name(
            name,
            &spec.name,
            &config.primary_variant,
            encoding.format.extension(),
        );
        set.spawn(produce(
            state.clone(),
            image.clone(),
            spec.clone(),
            target,
            encoding,
        ));
    }
    drop(image);

    let mut written = Vec::new();
    let mut failure = None;
    while let Some(res) = set.join_next().await {
        let outcome = match res {
            Ok(outcome) => outcome,
            Err(source) => Err(Error::Join(source)),
        };
        match outcome {
            Ok(target) => written.push(target),
            Err(source) => {
                error!(?source, "Variant failed");
                if failure.is_none() {
                    failure = Some(source);
                }
            }
        }
    }
    failure.map_or(Ok(written), Err)
}

#[instrument(skip(state, image, encoding), fields(variant = %spec.name))]
async fn produce(
    state: AppState,
    image: DynamicImage,
    spec: VariantSpec,
    target: String,
    encoding: Encoding,
) -> Result<String, Error> {
    let data = tokio::task::spawn_blocking(move || render(image, &spec, encoding)).await??;
    let result = VariantResult { target, data };
    state
        .store
        .write(
            &state.config.output_bucket,
            &result.target,
            result.data,
            encoding.format.mime_type(),
        )
        .await?;
    debug!(object = %result.target, "Wrote variant");
    Ok(result.target)
}
