use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use opencircuit::*;

fn chain(length: usize) -> Simulator {
    let mut simulator = Simulator::new();
    simulator
        .add_component(&ComponentSpec::new("a", "INPUT", 0, 0))
        .unwrap();
    let mut previous = "a".to_string();
    for i in 0..length {
        let id = format!("n{}", i);
        simulator
            .add_component(&ComponentSpec::new(&id, "NOT", i as i32, 0))
            .unwrap();
        simulator
            .add_wire(&WireSpec::new((previous.as_str(), "out"), (id.as_str(), "in"), 1))
            .unwrap();
        previous = id;
    }
    simulator
        .add_component(&ComponentSpec::new("y", "OUTPUT", length as i32, 0))
        .unwrap();
    simulator
        .add_wire(&WireSpec::new((previous.as_str(), "out"), ("y", "in"), 1))
        .unwrap();
    simulator
}

fn bench_inverter_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("inverter_chain");

    for length in [10, 100, 500].iter() {
        group.bench_with_input(BenchmarkId::new("tick", length), length, |b, &length| {
            let mut simulator = chain(length);
            let mut value = 0;
            b.iter(|| {
                value ^= 1;
                simulator.set_input("a", value).unwrap();
                simulator.tick(1).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_ring_oscillator(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_oscillator");

    // Never converges, so every tick runs the full pass cap
    let mut simulator = Simulator::new();
    for i in 0..5 {
        simulator
            .add_component(&ComponentSpec::new(&format!("n{}", i), "NOT", i, 0))
            .unwrap();
    }
    for i in 0..5 {
        let from = format!("n{}", i);
        let to = format!("n{}", (i + 1) % 5);
        simulator
            .add_wire(&WireSpec::new((from.as_str(), "out"), (to.as_str(), "in"), 1))
            .unwrap();
    }

    group.bench_function("tick", |b| {
        b.iter(|| simulator.tick(1).unwrap());
    });

    group.finish();
}

fn bench_project_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("project");

    let json = chain(200).save().to_json().unwrap();

    group.bench_function("load_json", |b| {
        b.iter(|| {
            let mut simulator = Simulator::new();
            simulator.load_json(&json).unwrap();
        });
    });

    group.bench_function("derive_nets", |b| {
        let mut simulator = Simulator::new();
        simulator.load_json(&json).unwrap();
        b.iter(|| opencircuit::netlist::derive_nets(simulator.circuit()));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_inverter_chain,
    bench_ring_oscillator,
    bench_project_load
);
criterion_main!(benches);
