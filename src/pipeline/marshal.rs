//! Planar frame to flat buffer reformatting
//!
//! Output layout: the full-resolution luma plane, then every Cr sample, then
//! every Cb sample. Chroma runs are de-interleaved. The Cr-before-Cb order is
//! what the edge transform expects; swapping it keeps the size intact while
//! exchanging the colour-difference channels.

use std::time::Instant;

use image::{DynamicImage, GrayImage, RgbaImage};

use crate::capture::{Frame, Plane};
use crate::error::MarshalError;

const LUMA: usize = 0;
const CB: usize = 1;
const CR: usize = 2;

/// Dimensions and strides handed to the transform alongside the bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub width: u32,
    pub height: u32,
    pub luma_row_stride: usize,
    pub chroma_row_stride: usize,
    pub chroma_pixel_stride: usize,
}

/// One frame's pixels in transform order. Independent of the frame it came from.
#[derive(Debug, Clone)]
pub struct MarshalledBuffer {
    data: Vec<u8>,
    layout: FrameLayout,
    chroma_samples: usize,
    sequence: u64,
    captured_at: Instant,
}

impl MarshalledBuffer {
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn layout(&self) -> FrameLayout {
        self.layout
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn luma(&self) -> &[u8] {
        &self.data[..self.luma_len()]
    }

    pub fn cr(&self) -> &[u8] {
        let start = self.luma_len();
        &self.data[start..start + self.chroma_samples]
    }

    pub fn cb(&self) -> &[u8] {
        &self.data[self.luma_len() + self.chroma_samples..]
    }

    /// Grey RGBA rendering of the luma run, used as the raw camera preview.
    pub fn luma_preview(&self) -> Option<RgbaImage> {
        let gray = GrayImage::from_raw(self.layout.width, self.layout.height, self.luma().to_vec())?;
        Some(DynamicImage::ImageLuma8(gray).into_rgba8())
    }

    fn luma_len(&self) -> usize {
        self.layout.width as usize * self.layout.height as usize
    }
}

/// Expected output size for a frame of the given luma and chroma dimensions.
pub fn marshalled_len(width: usize, height: usize, chroma_width: usize, chroma_height: usize) -> usize {
    width * height + 2 * chroma_width * chroma_height
}

/// Copy a frame's planes into a fresh flat buffer.
pub fn marshal(frame: &Frame) -> Result<MarshalledBuffer, MarshalError> {
    if frame.planes.len() != 3 {
        return Err(MarshalError::PlaneCount {
            found: frame.planes.len(),
        });
    }

    let width = frame.meta.width as usize;
    let height = frame.meta.height as usize;
    if width == 0 || height == 0 {
        return Err(MarshalError::EmptyFrame);
    }
    let chroma_width = frame.meta.chroma_width();
    let chroma_height = frame.meta.chroma_height();

    let mut data = Vec::with_capacity(marshalled_len(width, height, chroma_width, chroma_height));
    copy_plane(&mut data, &frame.planes[LUMA], LUMA, width, height)?;
    copy_plane(&mut data, &frame.planes[CR], CR, chroma_width, chroma_height)?;
    copy_plane(&mut data, &frame.planes[CB], CB, chroma_width, chroma_height)?;

    let chroma = &frame.planes[CB];
    Ok(MarshalledBuffer {
        data,
        layout: FrameLayout {
            width: frame.meta.width,
            height: frame.meta.height,
            luma_row_stride: frame.planes[LUMA].row_stride,
            chroma_row_stride: chroma.row_stride,
            chroma_pixel_stride: chroma.pixel_stride,
        },
        chroma_samples: chroma_width * chroma_height,
        sequence: frame.meta.sequence,
        captured_at: frame.timestamp,
    })
}

/// Append `cols x rows` samples of one plane, taking every `pixel_stride`-th
/// byte from offset 0 of each row and skipping row padding.
fn copy_plane(
    out: &mut Vec<u8>,
    plane: &Plane,
    index: usize,
    cols: usize,
    rows: usize,
) -> Result<(), MarshalError> {
    let pixel_stride = plane.pixel_stride;
    if pixel_stride == 0 {
        return Err(MarshalError::ZeroPixelStride { plane: index });
    }

    // The last row is often not padded out to the full stride.
    let overflow = || MarshalError::StrideOverflow {
        plane: index,
        row_stride: plane.row_stride,
        pixel_stride,
    };
    let row_bytes = (cols - 1)
        .checked_mul(pixel_stride)
        .and_then(|span| span.checked_add(1))
        .ok_or_else(overflow)?;
    if rows > 1 && plane.row_stride < row_bytes {
        return Err(MarshalError::RowStrideTooSmall {
            plane: index,
            row_stride: plane.row_stride,
            row_bytes,
        });
    }
    let needed = (rows - 1)
        .checked_mul(plane.row_stride)
        .and_then(|span| span.checked_add(row_bytes))
        .ok_or_else(overflow)?;
    let bytes = &plane.data[..];
    if bytes.len() < needed {
        return Err(MarshalError::PlaneTooShort {
            plane: index,
            needed,
            len: bytes.len(),
        });
    }

    if pixel_stride == 1 && plane.row_stride == cols {
        out.extend_from_slice(&bytes[..cols * rows]);
        return Ok(());
    }

    // `needed` fits in the plane, so every row start below does too.
    for row in 0..rows {
        let start = row * plane.row_stride;
        let line = &bytes[start..start + row_bytes];
        if pixel_stride == 1 {
            out.extend_from_slice(line);
        } else {
            out.extend(line.iter().step_by(pixel_stride));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FrameMetadata, PixelFormat, Plane, Resolution};
    use bytes::Bytes;

    const PAD: u8 = 0xEE;

    fn meta(width: u32, height: u32, format: PixelFormat) -> FrameMetadata {
        FrameMetadata::new(1, Resolution::new(width, height), format)
    }

    /// Plane of `cols x rows` samples produced by `value`, laid out with the
    /// given strides and padding bytes everywhere else.
    fn plane_with(
        cols: usize,
        rows: usize,
        row_stride: usize,
        pixel_stride: usize,
        value: impl Fn(usize, usize) -> u8,
    ) -> Plane {
        let len = (rows - 1) * row_stride + (cols - 1) * pixel_stride + 1;
        let mut data = vec![PAD; len];
        for r in 0..rows {
            for c in 0..cols {
                data[r * row_stride + c * pixel_stride] = value(c, r);
            }
        }
        Plane::new(Bytes::from(data), row_stride, pixel_stride)
    }

    fn planar_frame(width: u32, height: u32, luma_stride: usize, chroma_stride: usize) -> Frame {
        let (w, h) = (width as usize, height as usize);
        let (cw, ch) = ((w + 1) / 2, (h + 1) / 2);
        Frame::new(
            meta(width, height, PixelFormat::I420),
            vec![
                plane_with(w, h, luma_stride, 1, |c, r| (r * w + c) as u8),
                plane_with(cw, ch, chroma_stride, 1, |_, _| 0x11),
                plane_with(cw, ch, chroma_stride, 1, |_, _| 0x99),
            ],
            Instant::now(),
        )
    }

    #[test]
    fn output_size_is_luma_plus_two_chroma_runs() {
        let frame = planar_frame(8, 6, 8, 4);
        let buffer = marshal(&frame).unwrap();

        assert_eq!(buffer.len(), 8 * 6 + 2 * 4 * 3);
        assert_eq!(buffer.len(), marshalled_len(8, 6, 4, 3));
    }

    #[test]
    fn cr_run_precedes_cb_run() {
        // Cb is filled with 0x11 and Cr with 0x99; a swapped order would still
        // produce the right length.
        let frame = planar_frame(4, 4, 4, 2);
        let buffer = marshal(&frame).unwrap();

        assert_eq!(&buffer.as_bytes()[16..20], &[0x99; 4]);
        assert_eq!(&buffer.as_bytes()[20..24], &[0x11; 4]);
        assert_eq!(buffer.cr(), &[0x99; 4]);
        assert_eq!(buffer.cb(), &[0x11; 4]);
    }

    #[test]
    fn row_padding_never_leaks_into_output() {
        let frame = planar_frame(6, 4, 16, 7);
        let buffer = marshal(&frame).unwrap();

        assert!(!buffer.as_bytes().contains(&PAD));
        let expected: Vec<u8> = (0..24).map(|v| v as u8).collect();
        assert_eq!(buffer.luma(), expected.as_slice());
    }

    #[test]
    fn interleaved_chroma_is_deinterleaved_by_pixel_stride() {
        // NV21 memory: Y rows padded to 8, then VU pairs with rows padded to 8
        // and an unpadded final row.
        let (w, h) = (4usize, 4usize);
        let stride = 8;
        let mut data = vec![PAD; stride * h];
        for r in 0..h {
            for c in 0..w {
                data[r * stride + c] = 10 + (r * w + c) as u8;
            }
        }
        let chroma_offset = data.len();
        for r in 0..2 {
            for c in 0..2 {
                data.push(0xC0 + (r * 2 + c) as u8); // V
                data.push(0xB0 + (r * 2 + c) as u8); // U
            }
            if r == 0 {
                data.extend_from_slice(&[PAD; 4]);
            }
        }

        let frame = Frame::from_semi_planar(
            Bytes::from(data),
            meta(4, 4, PixelFormat::Nv21),
            stride,
            chroma_offset,
            stride,
            Instant::now(),
        );
        let buffer = marshal(&frame).unwrap();

        assert_eq!(buffer.len(), 16 + 8);
        assert_eq!(buffer.cr(), &[0xC0, 0xC1, 0xC2, 0xC3]);
        assert_eq!(buffer.cb(), &[0xB0, 0xB1, 0xB2, 0xB3]);
        assert_eq!(buffer.layout().chroma_pixel_stride, 2);
        assert_eq!(buffer.layout().chroma_row_stride, stride);
    }

    #[test]
    fn odd_dimensions_round_chroma_up() {
        let frame = planar_frame(5, 3, 5, 3);
        let buffer = marshal(&frame).unwrap();
        assert_eq!(buffer.len(), 15 + 2 * 3 * 2);
    }

    #[test]
    fn marshalling_is_deterministic() {
        let frame = planar_frame(8, 8, 12, 6);
        assert_eq!(
            marshal(&frame).unwrap().as_bytes(),
            marshal(&frame).unwrap().as_bytes()
        );
    }

    #[test]
    fn layout_reports_source_strides() {
        let frame = planar_frame(8, 4, 12, 6);
        let layout = marshal(&frame).unwrap().layout();
        assert_eq!(
            layout,
            FrameLayout {
                width: 8,
                height: 4,
                luma_row_stride: 12,
                chroma_row_stride: 6,
                chroma_pixel_stride: 1,
            }
        );
    }

    #[test]
    fn missing_plane_is_rejected() {
        let mut frame = planar_frame(4, 4, 4, 2);
        frame.planes.pop();
        assert_eq!(
            marshal(&frame).unwrap_err(),
            MarshalError::PlaneCount { found: 2 }
        );
    }

    #[test]
    fn truncated_plane_is_rejected() {
        let mut frame = planar_frame(4, 4, 4, 2);
        frame.planes[0].data = frame.planes[0].data.slice(..10);
        assert_eq!(
            marshal(&frame).unwrap_err(),
            MarshalError::PlaneTooShort {
                plane: 0,
                needed: 16,
                len: 10
            }
        );
    }

    #[test]
    fn zero_pixel_stride_is_rejected() {
        let mut frame = planar_frame(4, 4, 4, 2);
        frame.planes[2].pixel_stride = 0;
        assert_eq!(
            marshal(&frame).unwrap_err(),
            MarshalError::ZeroPixelStride { plane: 2 }
        );
    }

    #[test]
    fn empty_frame_is_rejected() {
        let frame = planar_frame(4, 4, 4, 2);
        let mut empty = Frame::new(
            meta(0, 4, PixelFormat::I420),
            frame.planes.clone(),
            Instant::now(),
        );
        assert_eq!(marshal(&empty).unwrap_err(), MarshalError::EmptyFrame);
        empty.meta.width = 4;
        assert!(marshal(&empty).is_ok());
    }

    #[test]
    fn huge_row_stride_is_an_error_not_a_panic() {
        for row_stride in [usize::MAX / 2, -8i32 as usize] {
            let mut frame = planar_frame(8, 4, 8, 4);
            frame.planes[0].row_stride = row_stride;
            assert_eq!(
                marshal(&frame).unwrap_err(),
                MarshalError::StrideOverflow {
                    plane: 0,
                    row_stride,
                    pixel_stride: 1,
                }
            );
        }
    }

    #[test]
    fn huge_pixel_stride_is_an_error_not_a_panic() {
        let mut frame = planar_frame(8, 4, 8, 4);
        frame.planes[1].pixel_stride = usize::MAX;
        assert!(matches!(
            marshal(&frame).unwrap_err(),
            MarshalError::StrideOverflow { .. }
        ));
    }
}
