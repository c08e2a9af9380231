//! Image sources accepted by the encoder
//!
//! A source is either pixels already decoded on the host, a texture that
//! already lives on the device, or a location to load from. It is resolved
//! once at the start of an encode; everything after works on
//! [`ResolvedSource`].

use std::borrow::Cow;
use std::path::PathBuf;

use futures::future::BoxFuture;
use futures::FutureExt;
use image::RgbaImage;
use tracing::debug;

use crate::error::{EncodeError, Result};

/// Input to an encode call.
pub enum ImageSource<'a, T> {
    /// Decoded RGBA8 pixels
    Decoded(&'a RgbaImage),
    /// A texture owned by the host on the encoder's device
    DeviceTexture(&'a T),
    /// A path or `file://` URL, loaded through an [`ImageLoader`]
    Url(String),
}

impl<'a, T> ImageSource<'a, T> {
    pub fn url(location: impl Into<String>) -> Self {
        ImageSource::Url(location.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ImageSource::Decoded(_) => "decoded image",
            ImageSource::DeviceTexture(_) => "device texture",
            ImageSource::Url(_) => "url",
        }
    }

    /// Turn a URL into pixels; other variants pass through.
    pub async fn resolve(self, loader: &dyn ImageLoader) -> Result<ResolvedSource<'a, T>> {
        match self {
            ImageSource::Decoded(image) => Ok(ResolvedSource::Pixels(Cow::Borrowed(image))),
            ImageSource::DeviceTexture(texture) => Ok(ResolvedSource::Texture(texture)),
            ImageSource::Url(location) => {
                let image = loader.load(&location).await?;
                debug!(
                    "Loaded {} ({}x{})",
                    location,
                    image.width(),
                    image.height()
                );
                Ok(ResolvedSource::Pixels(Cow::Owned(image)))
            }
        }
    }
}

// Manual impl: cloning only copies references, so `T` need not be `Clone`
impl<T> Clone for ImageSource<'_, T> {
    fn clone(&self) -> Self {
        match self {
            ImageSource::Decoded(image) => ImageSource::Decoded(image),
            ImageSource::DeviceTexture(texture) => ImageSource::DeviceTexture(texture),
            ImageSource::Url(location) => ImageSource::Url(location.clone()),
        }
    }
}

impl<'a, T> From<&'a RgbaImage> for ImageSource<'a, T> {
    fn from(image: &'a RgbaImage) -> Self {
        ImageSource::Decoded(image)
    }
}

/// A source after loading: host pixels or a device texture.
pub enum ResolvedSource<'a, T> {
    Pixels(Cow<'a, RgbaImage>),
    Texture(&'a T),
}

/// Loads images named by URL or path.
pub trait ImageLoader: Send + Sync {
    fn load(&self, location: &str) -> BoxFuture<'static, Result<RgbaImage>>;
}

/// Loads local files (plain paths or `file://` URLs) with the `image` crate.
#[derive(Debug, Clone, Default)]
pub struct FileImageLoader;

impl FileImageLoader {
    fn path_for(location: &str) -> PathBuf {
        PathBuf::from(location.strip_prefix("file://").unwrap_or(location))
    }
}

impl ImageLoader for FileImageLoader {
    fn load(&self, location: &str) -> BoxFuture<'static, Result<RgbaImage>> {
        let path = Self::path_for(location);
        async move {
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| EncodeError::ImageLoad(format!("{}: {}", path.display(), e)))?;

            let image = image::load_from_memory(&bytes)
                .map_err(|e| EncodeError::ImageLoad(format!("{}: {}", path.display(), e)))?;

            Ok(image.into_rgba8())
        }
        .boxed()
    }
}
