//! YUV 4:2:0 planar to packed BGRA conversion (BT.601, studio range)

use super::Converter;
use crate::registry::ConverterInfo;
use crate::stream::{MediaStream, PixelFormat};
use crate::utils::error::{MediaError, Result};

pub struct YuvConverter {
    width: usize,
    height: usize,
}

impl YuvConverter {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width as usize,
            height: height as usize,
        }
    }

    #[inline]
    fn pixel(y: u8, u: u8, v: u8) -> [u8; 4] {
        let c = i32::from(y) - 16;
        let d = i32::from(u) - 128;
        let e = i32::from(v) - 128;
        let clamp = |x: i32| x.clamp(0, 255) as u8;

        let r = clamp((298 * c + 409 * e + 128) >> 8);
        let g = clamp((298 * c - 100 * d - 208 * e + 128) >> 8);
        let b = clamp((298 * c + 516 * d + 128) >> 8);
        [b, g, r, 0xFF]
    }
}

impl Converter for YuvConverter {
    fn input_format(&self) -> PixelFormat {
        PixelFormat::Yuv420p
    }

    fn output_format(&self) -> PixelFormat {
        PixelFormat::Rgb32
    }

    fn convert(
        &mut self,
        src_planes: &[&[u8]],
        src_strides: &[usize],
        dst_planes: &mut [&mut [u8]],
        dst_strides: &[usize],
    ) -> Result<()> {
        let (width, height) = (self.width, self.height);
        let (y_plane, u_plane, v_plane) = match src_planes {
            [y, u, v, ..] => (*y, *u, *v),
            _ => return Err(MediaError::Converter("expected three source planes".to_string())),
        };
        let (y_stride, u_stride, v_stride) = match src_strides {
            [y, u, v, ..] => (*y, *u, *v),
            _ => return Err(MediaError::Converter("expected three source strides".to_string())),
        };
        let dst_stride = *dst_strides
            .first()
            .ok_or_else(|| MediaError::Converter("missing destination stride".to_string()))?;
        let dst = dst_planes
            .first_mut()
            .ok_or_else(|| MediaError::Converter("missing destination plane".to_string()))?;

        let chroma_rows = height.div_ceil(2);
        let chroma_cols = width.div_ceil(2);
        if y_plane.len() < y_stride * height.saturating_sub(1) + width
            || u_plane.len() < u_stride * chroma_rows.saturating_sub(1) + chroma_cols
            || v_plane.len() < v_stride * chroma_rows.saturating_sub(1) + chroma_cols
        {
            return Err(MediaError::BufferUnderflow(format!(
                "source planes too small for {}x{}",
                width, height
            )));
        }
        if dst.len() < dst_stride * height.saturating_sub(1) + width * 4 {
            return Err(MediaError::BufferUnderflow(format!(
                "destination plane too small for {}x{}",
                width, height
            )));
        }

        for row in 0..height {
            let y_row = &y_plane[row * y_stride..];
            let u_row = &u_plane[(row / 2) * u_stride..];
            let v_row = &v_plane[(row / 2) * v_stride..];
            let out = &mut dst[row * dst_stride..row * dst_stride + width * 4];
            for (col, pixel) in out.chunks_exact_mut(4).enumerate() {
                pixel.copy_from_slice(&Self::pixel(y_row[col], u_row[col / 2], v_row[col / 2]));
            }
        }
        Ok(())
    }
}

pub struct YuvConverterInfo;

impl ConverterInfo for YuvConverterInfo {
    fn name(&self) -> &str {
        "yuv420p-to-rgb32"
    }

    fn supports(&self, input: PixelFormat, output: PixelFormat) -> bool {
        input == PixelFormat::Yuv420p && output == PixelFormat::Rgb32
    }

    fn create(&self, stream: &MediaStream, _input: PixelFormat, _output: PixelFormat) -> Box<dyn Converter> {
        let video = stream.video().cloned().unwrap_or_default();
        Box::new(YuvConverter::new(video.width, video.height))
    }
}
