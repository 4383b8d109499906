use comms_if::{
    ctrl::{CommandSchema, WireEncoding},
    eqpt::cam::CamImage,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use image::{DynamicImage, Rgb, RgbImage};

fn ctrl_codecs(c: &mut Criterion) {
    let schema = CommandSchema::default();
    let mut cmd = schema.neutral();
    cmd.steering = 45;
    cmd.throttle = 80;

    let text = WireEncoding::Text.encode(&cmd, &schema);
    let json = WireEncoding::Json.encode(&cmd, &schema);

    c.bench_function("encode text", |b| {
        b.iter(|| WireEncoding::Text.encode(black_box(&cmd), &schema))
    });
    c.bench_function("decode text", |b| {
        b.iter(|| WireEncoding::Auto.decode(black_box(text.as_bytes()), &schema))
    });
    c.bench_function("decode json", |b| {
        b.iter(|| WireEncoding::Auto.decode(black_box(json.as_bytes()), &schema))
    });
}

fn jpeg_codec(c: &mut Criterion) {
    let img = CamImage::now(DynamicImage::ImageRgb8(RgbImage::from_fn(640, 480, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    })));
    let frame = img.encode(80).unwrap();

    c.bench_function("encode jpeg 640x480 q80", |b| {
        b.iter(|| black_box(&img).encode(80))
    });
    c.bench_function("decode jpeg 640x480 q80", |b| b.iter(|| black_box(&frame).decode()));
}

criterion_group!(benches, ctrl_codecs, jpeg_codec);
criterion_main!(benches);
