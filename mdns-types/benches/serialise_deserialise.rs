use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::net::Ipv4Addr;

use mdns_types::protocol::types::test_util::{a_record, domain, ptr_record, srv_record};
use mdns_types::protocol::types::{Message, Question, QueryType};

#[allow(non_snake_case)]
fn bench__question(c: &mut Criterion) {
    let message = Message::query(Question::new(
        domain("_ipp._tcp.local"),
        QueryType::Record(mdns_types::protocol::types::RecordType::Ptr),
    ));

    c.bench_function("serialise/question", |b| {
        b.iter_batched(
            || message.clone(),
            |message| message.into_octets(),
            BatchSize::SmallInput,
        )
    });

    let serialised = message.into_octets().unwrap();
    c.bench_function("deserialise/question", |b| {
        b.iter(|| Message::from_octets(black_box(&serialised)))
    });
}

#[allow(non_snake_case)]
fn bench__answer__small(c: &mut Criterion) {
    let message = Message::response(
        vec![a_record("host.local", Ipv4Addr::new(1, 1, 1, 1), 4500, true)],
        Vec::new(),
    );

    c.bench_function("serialise/answer/small", |b| {
        b.iter_batched(
            || message.clone(),
            |message| message.into_octets(),
            BatchSize::SmallInput,
        )
    });

    let serialised = message.into_octets().unwrap();
    c.bench_function("deserialise/answer/small", |b| {
        b.iter(|| Message::from_octets(black_box(&serialised)))
    });
}

#[allow(non_snake_case)]
fn bench__answer__big(c: &mut Criterion) {
    let count = 64;

    let mut answers = Vec::new();
    let mut additional = Vec::new();
    for i in 0..count {
        let instance = format!("instance-{i}._ipp._tcp.local");
        answers.push(ptr_record("_ipp._tcp.local", &instance, 120));
        additional.push(srv_record(&instance, 631, "host.local", 120));
        additional.push(a_record("host.local", Ipv4Addr::new(10, 0, 0, 1), 4500, true));
    }

    let message = Message::response(answers, additional);

    c.bench_function("serialise/answer/big", |b| {
        b.iter_batched(
            || message.clone(),
            |message| message.into_octets(),
            BatchSize::SmallInput,
        )
    });

    let serialised = message.into_octets().unwrap();
    c.bench_function("deserialise/answer/big", |b| {
        b.iter(|| Message::from_octets(black_box(&serialised)))
    });
}

criterion_group!(
    benches,
    bench__question,
    bench__answer__small,
    bench__answer__big
);
criterion_main!(benches);
