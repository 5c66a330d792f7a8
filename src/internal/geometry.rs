use std::borrow::Cow;

use image::RgbaImage;
use image::imageops;

pub fn images_same_size(a: &RgbaImage, b: &RgbaImage) -> bool {
    a.dimensions() == b.dimensions()
}

/// Crop both images to the top-left rectangle they have in common.
///
/// Inputs that already have the common size are handed back borrowed.
pub fn crop_to_be_same_size<'a>(
    a: &'a RgbaImage,
    b: &'a RgbaImage,
) -> (Cow<'a, RgbaImage>, Cow<'a, RgbaImage>) {
    let width = a.width().min(b.width());
    let height = a.height().min(b.height());
    (crop(a, width, height), crop(b, width, height))
}

fn crop(image: &RgbaImage, width: u32, height: u32) -> Cow<'_, RgbaImage> {
    if image.dimensions() == (width, height) {
        return Cow::Borrowed(image);
    }
    Cow::Owned(imageops::crop_imm(image, 0, 0, width, height).to_image())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn gradient(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| Rgba([x as u8, y as u8, 0, 255]))
    }

    #[test]
    fn test_same_size_inputs_are_borrowed() {
        let a = gradient(4, 3);
        let b = gradient(4, 3);
        let (ca, cb) = crop_to_be_same_size(&a, &b);
        assert!(matches!(ca, Cow::Borrowed(_)));
        assert!(matches!(cb, Cow::Borrowed(_)));
    }

    #[test]
    fn test_crops_to_intersection() {
        let a = gradient(10, 4);
        let b = gradient(6, 8);
        let (ca, cb) = crop_to_be_same_size(&a, &b);
        assert_eq!(ca.dimensions(), (6, 4));
        assert_eq!(cb.dimensions(), (6, 4));
        // Top-left region is kept.
        assert_eq!(ca.get_pixel(5, 3), a.get_pixel(5, 3));
        assert_eq!(cb.get_pixel(5, 3), b.get_pixel(5, 3));
    }

    #[test]
    fn test_only_larger_image_is_copied() {
        let a = gradient(3, 3);
        let b = gradient(5, 5);
        let (ca, cb) = crop_to_be_same_size(&a, &b);
        assert!(matches!(ca, Cow::Borrowed(_)));
        assert!(matches!(cb, Cow::Owned(_)));
    }

    #[test]
    fn test_zero_sized_input() {
        let a = RgbaImage::new(0, 5);
        let b = gradient(5, 5);
        let (ca, cb) = crop_to_be_same_size(&a, &b);
        assert_eq!(ca.dimensions(), (0, 5));
        assert_eq!(cb.dimensions(), (0, 5));
        assert!(cb.as_raw().is_empty());
    }
}
