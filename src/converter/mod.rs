//! Pixel format converters
//!
//! A converter is created for a fixed (input, output) format pair and adapts
//! decoded pictures to the format the renderer consumes.

mod yuv;

pub use yuv::{YuvConverter, YuvConverterInfo};

use crate::stream::{FrameState, MediaFrame, PixelFormat, PlaneLayout};
use crate::utils::error::{MediaError, Result};

/// Converts raw pixel data between two fixed formats
pub trait Converter: Send {
    fn input_format(&self) -> PixelFormat;

    fn output_format(&self) -> PixelFormat;

    /// Convert one picture
    ///
    /// # Arguments
    ///
    /// * `src_planes` / `src_strides` - Input planes and their row strides
    /// * `dst_planes` / `dst_strides` - Output planes and their row strides
    fn convert(
        &mut self,
        src_planes: &[&[u8]],
        src_strides: &[usize],
        dst_planes: &mut [&mut [u8]],
        dst_strides: &[usize],
    ) -> Result<()>;
}

/// Run `converter` over a decoded frame, replacing its buffer
pub fn convert_frame(converter: &mut dyn Converter, frame: &mut MediaFrame) -> Result<()> {
    if converter.output_format() != PixelFormat::Rgb32 {
        return Err(MediaError::UnknownConverter(format!(
            "no frame layout for output format {:?}",
            converter.output_format()
        )));
    }

    let (width, height) = (frame.width, frame.height);
    let count = frame.planes.count;
    let mut src_planes = Vec::with_capacity(count);
    for index in 0..count {
        let plane = frame.plane(index).ok_or_else(|| {
            MediaError::Converter(format!("frame is missing plane {}", index))
        })?;
        src_planes.push(plane);
    }
    let src_strides = &frame.planes.strides[..count];

    let dst_stride = width as usize * 4;
    let mut output = vec![0u8; PixelFormat::Rgb32.frame_size(width, height)];
    converter.convert(&src_planes, src_strides, &mut [&mut output[..]], &[dst_stride])?;

    frame.replace_buffer(output);
    frame.planes = PlaneLayout::packed(dst_stride);
    frame.state.remove(FrameState::PLANAR);
    frame.add_state(FrameState::CONVERTED);
    Ok(())
}
