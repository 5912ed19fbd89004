use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::io::Cursor;

use qwen_client::protocol::{decode_stream_chunk, encode_chat_request};
use qwen_client::stream::sse::{data_frame, done_frame, SseParser};
use qwen_client::stream::ChunkStream;
use qwen_client::{ChatMessage, ChatRequest, ContentBlock, Role};

fn chunk_json(index: usize) -> String {
    format!(
        r#"{{"id":"chatcmpl-{index}","model":"qwen-turbo","choices":[{{"index":0,"delta":{{"content":"token {index} "}},"finish_reason":null}}]}}"#
    )
}

fn sse_body(frames: usize) -> String {
    let mut body = String::with_capacity(frames * 128);
    for index in 0..frames {
        body.push_str(&data_frame(&chunk_json(index)));
    }
    body.push_str(done_frame());
    body
}

fn bench_sse_parse(c: &mut Criterion) {
    let body = sse_body(500);

    c.bench_function("sse_parse_500_frames_single_feed", |b| {
        b.iter(|| {
            let mut parser = SseParser::new();
            black_box(parser.feed(black_box(&body)).len())
        });
    });

    c.bench_function("sse_parse_500_frames_64b_chunks", |b| {
        let bytes = body.as_bytes();
        b.iter(|| {
            let mut parser = SseParser::new();
            let mut out = Vec::with_capacity(8);
            let mut count = 0;
            for chunk in bytes.chunks(64) {
                // frames are ASCII so any split is a char boundary
                let text = std::str::from_utf8(chunk).unwrap_or_default();
                parser.feed_into(text, &mut out);
                count += out.len();
                out.clear();
            }
            black_box(count)
        });
    });
}

fn bench_chunk_decode(c: &mut Criterion) {
    let frame = chunk_json(42);
    c.bench_function("decode_stream_chunk", |b| {
        b.iter(|| black_box(decode_stream_chunk(black_box(&frame)).ok()));
    });

    let body = sse_body(500);
    c.bench_function("pull_iterator_500_frames", |b| {
        b.iter(|| {
            let stream = ChunkStream::new(Cursor::new(body.as_bytes()));
            black_box(stream.filter_map(Result::ok).count())
        });
    });
}

fn bench_encode(c: &mut Criterion) {
    let mut messages = vec![ChatMessage::system("You are a helpful assistant.")];
    for index in 0..20 {
        messages.push(ChatMessage::user(format!("question {index}: {}", "lorem ipsum ".repeat(20))));
        messages.push(ChatMessage::assistant("answer ".repeat(30)));
    }
    messages.push(ChatMessage::blocks(
        Role::User,
        vec![
            ContentBlock::text("Describe this image:"),
            ContentBlock::image("https://example.com/cat.png", "image/png"),
        ],
    ));
    let request = ChatRequest::new("qwen-vl-max", messages).temperature(0.7);

    c.bench_function("encode_chat_request_41_messages", |b| {
        b.iter(|| black_box(encode_chat_request(black_box(&request), true, "qwen-turbo").ok()));
    });
}

criterion_group!(benches, bench_sse_parse, bench_chunk_decode, bench_encode);
criterion_main!(benches);
