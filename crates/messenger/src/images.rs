//! Image files: decode one into a pixel grid for sending, and write
//! received grids to disk in the format named by their extension.

use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat, RgbaImage};

use messenger_core::pixels::GridError;
use messenger_core::{PixelGrid, Rgba};
use messenger_transport::ReceivedImage;

/// Written when a received filename has no usable extension.
const FALLBACK_FORMAT: ImageFormat = ImageFormat::Png;

#[derive(Debug, thiserror::Error)]
pub enum ImageFileError {
    #[error("failed to decode {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to write {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to create {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Grid(#[from] GridError),
}

/// Decode any supported image file into RGBA pixels.
pub fn load_grid(path: &Path) -> Result<PixelGrid, ImageFileError> {
    let rgba = image::open(path)
        .map_err(|source| ImageFileError::Decode {
            path: path.to_path_buf(),
            source,
        })?
        .to_rgba8();

    let grid = PixelGrid::from_fn(rgba.width() as usize, rgba.height() as usize, |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x as u32, y as u32).0;
        Rgba::new(r, g, b, a)
    })?;
    Ok(grid)
}

/// Write `img` to `<dir>/<sender>/<filename>` and return the path.
pub fn save_received(dir: &Path, img: &ReceivedImage) -> Result<PathBuf, ImageFileError> {
    let path = output_path(dir, img);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ImageFileError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let rgba = to_rgba_image(&img.grid);
    let format = ImageFormat::from_path(&path).unwrap_or(FALLBACK_FORMAT);
    let written = match format {
        // JPEG has no alpha channel.
        ImageFormat::Jpeg => DynamicImage::ImageRgba8(rgba)
            .to_rgb8()
            .save_with_format(&path, format),
        _ => rgba.save_with_format(&path, format),
    };
    written.map_err(|source| ImageFileError::Encode {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

fn to_rgba_image(grid: &PixelGrid) -> RgbaImage {
    RgbaImage::from_fn(grid.width() as u32, grid.height() as u32, |x, y| {
        let px = grid.get(x as usize, y as usize).unwrap_or_default();
        image::Rgba([px.r, px.g, px.b, px.a])
    })
}

/// Names come off the network: keep only their last component, and
/// append the fallback extension when the named format cannot be written.
fn output_path(dir: &Path, img: &ReceivedImage) -> PathBuf {
    let sender = last_component(&img.sender).unwrap_or("unknown");
    let name = last_component(&img.filename).unwrap_or("image");

    let writable = matches!(
        ImageFormat::from_path(name),
        Ok(ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Gif)
    );
    let name = if writable {
        name.to_string()
    } else {
        format!("{name}.{}", FALLBACK_FORMAT.extensions_str()[0])
    };
    dir.join(sender).join(name)
}

fn last_component(name: &str) -> Option<&str> {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("messenger-images-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn received(filename: &str, grid: PixelGrid) -> ReceivedImage {
        ReceivedImage {
            sender: "alice".into(),
            filename: filename.into(),
            grid,
        }
    }

    fn sample(width: usize, height: usize) -> PixelGrid {
        PixelGrid::from_fn(width, height, |x, y| {
            Rgba::new(x as u8, y as u8, (x * y) as u8, 128 + x as u8 % 100)
        })
        .unwrap()
    }

    #[test]
    fn png_round_trips_exactly() {
        let dir = scratch_dir("png");
        let grid = sample(300, 3);

        let path = save_received(&dir, &received("pic.png", grid.clone())).unwrap();
        assert_eq!(path, dir.join("alice").join("pic.png"));
        assert_eq!(load_grid(&path).unwrap(), grid);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn lossy_formats_keep_dimensions() {
        let dir = scratch_dir("lossy");
        for name in ["photo.jpg", "anim.gif"] {
            let path = save_received(&dir, &received(name, sample(20, 7))).unwrap();
            let back = load_grid(&path).unwrap();
            assert_eq!((back.width(), back.height()), (20, 7), "{name}");
        }
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn network_names_cannot_escape_the_directory() {
        let dir = Path::new("/srv/images");
        let img = ReceivedImage {
            sender: "../bob".into(),
            filename: "../../etc/cat.png".into(),
            grid: sample(1, 1),
        };
        assert_eq!(output_path(dir, &img), dir.join("bob").join("cat.png"));

        let img = ReceivedImage {
            sender: "..".into(),
            filename: "/".into(),
            grid: sample(1, 1),
        };
        assert_eq!(output_path(dir, &img), dir.join("unknown").join("image.png"));
    }

    #[test]
    fn unwritable_extension_falls_back_to_png() {
        let dir = Path::new("/srv/images");
        let img = received("scan.bmp", sample(1, 1));
        assert_eq!(output_path(dir, &img), dir.join("alice").join("scan.bmp.png"));
    }

    #[test]
    fn undecodable_file_is_reported() {
        let dir = scratch_dir("bad");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("broken.png");
        std::fs::write(&path, b"not a png").unwrap();

        assert!(matches!(load_grid(&path), Err(ImageFileError::Decode { .. })));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
