//! Property-based tests for the pixel conversion paths.
//!
//! These verify the size invariants and color laws that the forwarding
//! loop depends on, with proptest generating frame geometry and content.

use loopcast::convert::{rgb_to_i420, resize_rgb, yuyv_to_i420, yuyv_to_rgb};
use proptest::prelude::*;

/// Even dimensions in a range small enough to keep the test fast.
fn even_dims() -> impl Strategy<Value = (u32, u32)> {
    ((1u32..32).prop_map(|w| w * 2), (1u32..24).prop_map(|h| h * 2))
}

proptest! {
    /// I420 output is always exactly w*h*3/2 for valid YUYV input.
    #[test]
    fn i420_size_law((width, height) in even_dims(), fill in any::<u8>()) {
        let yuyv = vec![fill; (width * height * 2) as usize];
        let i420 = yuyv_to_i420(&yuyv, width, height).unwrap();
        prop_assert_eq!(i420.len() as u32, width * height * 3 / 2);
    }

    /// Uniform YUYV input produces uniform planes: every luma byte equals
    /// the input Y, every chroma byte equals the input U/V.
    #[test]
    fn uniform_input_uniform_planes(
        (width, height) in even_dims(),
        y in any::<u8>(),
        u in any::<u8>(),
        v in any::<u8>(),
    ) {
        let pixels = (width * height / 2) as usize;
        let mut yuyv = Vec::with_capacity(pixels * 4);
        for _ in 0..pixels {
            yuyv.extend_from_slice(&[y, u, y, v]);
        }

        let i420 = yuyv_to_i420(&yuyv, width, height).unwrap();
        let y_size = (width * height) as usize;
        let uv_size = y_size / 4;

        prop_assert!(i420[..y_size].iter().all(|&b| b == y));
        prop_assert!(i420[y_size..y_size + uv_size].iter().all(|&b| b == u));
        prop_assert!(i420[y_size + uv_size..].iter().all(|&b| b == v));
    }

    /// RGB output has the right size and wrong-size input is rejected.
    #[test]
    fn rgb_size_law((width, height) in even_dims()) {
        let yuyv = vec![128u8; (width * height * 2) as usize];
        let rgb = yuyv_to_rgb(&yuyv, width, height).unwrap();
        prop_assert_eq!(rgb.len() as u32, width * height * 3);

        prop_assert!(yuyv_to_rgb(&yuyv[1..], width, height).is_err());
    }

    /// Gray values survive RGB -> I420 -> (via YUYV layout) within
    /// BT.601 studio-swing tolerance: chroma stays neutral.
    #[test]
    fn gray_keeps_neutral_chroma(
        (width, height) in even_dims(),
        gray in 20u8..235,
    ) {
        let rgb = vec![gray; (width * height * 3) as usize];
        let i420 = rgb_to_i420(&rgb, width, height).unwrap();

        let y_size = (width * height) as usize;
        for &c in &i420[y_size..] {
            prop_assert!((c as i32 - 128).abs() <= 1, "chroma {} not neutral", c);
        }
    }

    /// Primary-color round trip: YUYV -> RGB -> I420 keeps luma ordering.
    /// Brighter input luma never becomes darker output luma.
    #[test]
    fn luma_is_monotone(y_lo in 30u8..100, y_delta in 20u8..100) {
        let y_hi = y_lo.saturating_add(y_delta);
        let make = |y: u8| -> u8 {
            // One 2x2 frame at the given luma, neutral chroma
            let yuyv = vec![y, 128, y, 128, y, 128, y, 128];
            let rgb = yuyv_to_rgb(&yuyv, 2, 2).unwrap();
            let back = rgb_to_i420(&rgb, 2, 2).unwrap();
            back[0]
        };
        prop_assert!(make(y_hi) >= make(y_lo));
    }

    /// Resizing to the same geometry is the identity; to half geometry it
    /// produces exactly the smaller buffer.
    #[test]
    fn resize_geometry_law((width, height) in even_dims(), fill in any::<u8>()) {
        let rgb = vec![fill; (width * height * 3) as usize];

        let same = resize_rgb(rgb.clone(), width, height, width, height).unwrap();
        prop_assert_eq!(&same, &rgb);

        let half = resize_rgb(rgb, width, height, width / 2, height / 2).unwrap();
        prop_assert_eq!(half.len() as u32, (width / 2) * (height / 2) * 3);
    }
}

#[test]
fn test_known_color_bt601() {
    // Pure white in YUYV studio swing: Y=235, U=V=128
    let yuyv = vec![235, 128, 235, 128, 235, 128, 235, 128];
    let rgb = yuyv_to_rgb(&yuyv, 2, 2).unwrap();
    for &channel in &rgb {
        assert!(channel >= 250, "white channel {} too dark", channel);
    }

    // Pure black: Y=16, U=V=128
    let yuyv = vec![16, 128, 16, 128, 16, 128, 16, 128];
    let rgb = yuyv_to_rgb(&yuyv, 2, 2).unwrap();
    for &channel in &rgb {
        assert!(channel <= 5, "black channel {} too bright", channel);
    }
}
