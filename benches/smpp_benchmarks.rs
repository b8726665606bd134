// ABOUTME: Benchmark suite for the simulator's hot paths
// ABOUTME: Measures PDU framing, text encoding, message splitting and part extraction

use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use smpp_sim::codec::Encodable;
use smpp_sim::concatenation::{ConcatenationEngine, ConcatenationType, apply_to_wire, extract_part};
use smpp_sim::datatypes::*;
use smpp_sim::encoding::{self, Encoding};
use smpp_sim::frame::Frame;
use std::io::Cursor;
use std::time::Duration;

const LONG_TEXT: &str = "The quick brown fox jumps over the lazy dog while the SMSC \
    keeps splitting this message into parts so that every handset can put it back together. ";

fn create_sample_submit_sm() -> SubmitSm {
    SubmitSm::new("12345", "67890")
        .registered_delivery(1)
        .short_message(Bytes::from_static(b"Hello World"))
}

fn create_sample_deliver_sm() -> DeliverSm {
    DeliverSm::new("67890", "12345")
        .esm_class(EsmClass::delivery_receipt())
        .short_message(Bytes::from_static(
            b"id:000001 sub:001 dlvrd:001 submit date:2401011000 done date:2401011000 stat:DELIVRD err:000 text:Hello World",
        ))
        .with_tlv(Tlv::cstring(tags::RECEIPTED_MESSAGE_ID, "000001"))
        .with_tlv(Tlv::u8(tags::MESSAGE_STATE, 2))
}

fn create_frame_bytes(pdu: &impl Encodable) -> Vec<u8> {
    pdu.to_bytes().unwrap().to_vec()
}

fn bench_frame_check(c: &mut Criterion) {
    let frame_bytes = create_frame_bytes(&create_sample_submit_sm());

    let mut group = c.benchmark_group("frame_check");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("submit_sm", |b| {
        b.iter(|| {
            let mut cursor = Cursor::new(black_box(frame_bytes.as_slice()));
            Frame::check(&mut cursor)
        })
    });

    let enquire_frame_bytes = create_frame_bytes(&EnquireLink::new(1));
    group.bench_function("enquire_link", |b| {
        b.iter(|| {
            let mut cursor = Cursor::new(black_box(enquire_frame_bytes.as_slice()));
            Frame::check(&mut cursor)
        })
    });

    group.finish();
}

fn bench_frame_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_parse");
    group.measurement_time(Duration::from_secs(10));

    let submit_frame_bytes = create_frame_bytes(&create_sample_submit_sm());
    group.bench_function("submit_sm", |b| {
        b.iter(|| {
            let mut cursor = Cursor::new(black_box(submit_frame_bytes.as_slice()));
            Frame::parse(&mut cursor).unwrap()
        })
    });

    let deliver_frame_bytes = create_frame_bytes(&create_sample_deliver_sm());
    group.bench_function("deliver_sm_receipt", |b| {
        b.iter(|| {
            let mut cursor = Cursor::new(black_box(deliver_frame_bytes.as_slice()));
            Frame::parse(&mut cursor).unwrap()
        })
    });

    let bind = BindRequest::new(1, BindType::Transceiver, "test_system", "password");
    let bind_frame_bytes = create_frame_bytes(&bind);
    group.bench_function("bind_transceiver", |b| {
        b.iter(|| {
            let mut cursor = Cursor::new(black_box(bind_frame_bytes.as_slice()));
            Frame::parse(&mut cursor).unwrap()
        })
    });

    group.finish();
}

fn bench_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialization");
    group.measurement_time(Duration::from_secs(10));

    let submit_sm = create_sample_submit_sm();
    group.bench_function("submit_sm", |b| b.iter(|| black_box(&submit_sm).to_bytes()));

    let deliver_sm = create_sample_deliver_sm();
    group.bench_function("deliver_sm", |b| {
        b.iter(|| black_box(&deliver_sm).to_bytes())
    });

    group.finish();
}

fn bench_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("encoding");
    group.measurement_time(Duration::from_secs(10));

    let samples = [
        ("gsm7", LONG_TEXT.to_string(), "GSM7"),
        ("gsm7_fallback", format!("{LONG_TEXT}\u{4f60}\u{597d}"), "GSM7"),
        ("cyrillic", "Привет, как дела? ".repeat(8), "CYRILLIC"),
        ("ucs2", "שלום עולם ".repeat(10), "UCS2"),
    ];
    for (name, text, encoding_name) in &samples {
        group.bench_with_input(BenchmarkId::new("encode", name), text, |b, text| {
            b.iter(|| encoding::encode(black_box(text), encoding_name))
        });
    }

    let ucs2 = encoding::encode_as(&"שלום עולם ".repeat(10), Encoding::Ucs2).bytes;
    group.bench_function("decode_ucs2", |b| {
        b.iter(|| encoding::decode(black_box(&ucs2), Encoding::Ucs2))
    });

    // Declared GSM7 but carrying UTF-8: exercises the fallback candidates
    let mislabelled = "Grüße aus Köln!".as_bytes().to_vec();
    group.bench_function("decode_mislabelled", |b| {
        b.iter(|| encoding::decode(black_box(&mislabelled), Encoding::Gsm7))
    });

    group.finish();
}

fn bench_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("split");
    group.measurement_time(Duration::from_secs(10));

    let engine = ConcatenationEngine::new();
    let text = LONG_TEXT.repeat(6);
    for method in [
        ConcatenationType::Udhi,
        ConcatenationType::Sar,
        ConcatenationType::TextBase,
        ConcatenationType::Payload,
        ConcatenationType::UdhiPayload,
    ] {
        group.bench_with_input(BenchmarkId::new("gsm7", method.name()), &text, |b, text| {
            b.iter(|| {
                let parts = engine.split(black_box(text), "GSM7", method).unwrap();
                parts.iter().map(apply_to_wire).count()
            })
        });
    }

    group.finish();
}

fn bench_extract(c: &mut Criterion) {
    let mut group = c.benchmark_group("extract");
    group.measurement_time(Duration::from_secs(10));

    let engine = ConcatenationEngine::new();
    let parts = engine
        .split(&LONG_TEXT.repeat(3), "GSM7", ConcatenationType::Udhi)
        .unwrap();
    let wire = apply_to_wire(&parts[0]);
    group.bench_function("udhi_part", |b| {
        b.iter(|| {
            extract_part(
                wire.esm_class,
                wire.data_coding,
                black_box(&wire.short_message),
                &wire.tlvs,
            )
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_frame_check,
    bench_frame_parse,
    bench_serialization,
    bench_encoding,
    bench_split,
    bench_extract
);
criterion_main!(benches);
