use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use ccmedia::converter::{convert_frame, Converter, YuvConverter};
use ccmedia::stream::{
    FrameState, MediaFrame, MediaStream, PixelFormat, PlaneLayout, StreamDetails, StreamInfo, VideoInfo,
};

const SIZES: [(u32, u32); 3] = [(320, 240), (1280, 720), (1920, 1080)];

fn decoded_frame(stream: &MediaStream, width: u32, height: u32) -> MediaFrame {
    let mut frame = MediaFrame::new(stream);
    let len = PixelFormat::Yuv420p.frame_size(width, height);
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    frame.replace_buffer(data);
    frame.width = width;
    frame.height = height;
    frame.planes = PlaneLayout::yuv420p(width, height);
    frame.add_state(FrameState::DECODED | FrameState::PLANAR);
    frame
}

fn bench_yuv_to_rgb32(c: &mut Criterion) {
    let mut group = c.benchmark_group("yuv420p_to_rgb32");

    for (width, height) in SIZES {
        let stream = MediaStream::new(
            0,
            StreamInfo::new("i420", StreamDetails::Video(VideoInfo::new(width, height))),
        );
        let source = decoded_frame(&stream, width, height);
        let mut converter = YuvConverter::new(width, height);

        group.throughput(Throughput::Elements(u64::from(width) * u64::from(height)));
        group.bench_with_input(
            BenchmarkId::new("convert_frame", format!("{}x{}", width, height)),
            &source,
            |b, source| {
                b.iter(|| {
                    let mut frame = source.clone();
                    convert_frame(&mut converter as &mut dyn Converter, &mut frame).ok();
                    black_box(frame.len())
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_yuv_to_rgb32);
criterion_main!(benches);
