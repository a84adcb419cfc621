use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use synapse_core::{neuron, reaction, Axon, Engine, EngineOptions, ReactionOutput, Signal, StimulationOptions};

fn chain_engine(depth: usize) -> Engine {
    let mut neurons = Vec::with_capacity(depth);
    for i in 0..depth {
        let out_collateral = format!("c{}", i + 1);
        let in_collateral = if i == 0 { "seed".to_string() } else { format!("c{}", i) };
        neurons.push(
            neuron(format!("n{i}"), Axon::new().with_output("out", out_collateral.clone()))
                .bind(
                    in_collateral,
                    reaction(move |payload, _axon, _ctx| {
                        let out_collateral = out_collateral.clone();
                        async move { Ok(ReactionOutput::One(Signal::new(out_collateral, payload))) }
                    }),
                )
                .build(),
        );
    }
    Engine::new(neurons, EngineOptions::new()).expect("valid chain network")
}

fn bench_linear_chain(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("linear_chain_stimulation");

    for depth in [10usize, 100, 1000] {
        let engine = chain_engine(depth);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.to_async(&rt).iter(|| async {
                let handle = engine
                    .stimulate(Signal::new("seed", serde_json::json!(0)), StimulationOptions::new())
                    .await;
                handle.wait_until_complete().await.unwrap();
                black_box(handle.all_activation_tasks().len());
            });
        });
    }

    group.finish();
}

fn bench_fan_out(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("fan_out_stimulation");

    for width in [4usize, 32, 128] {
        let mut neurons = Vec::with_capacity(width);
        for i in 0..width {
            neurons.push(
                neuron(format!("leaf{i}"), Axon::new())
                    .bind("seed", reaction(|_payload, _axon, _ctx| async { Ok(ReactionOutput::None) }))
                    .build(),
            );
        }
        let engine = Engine::new(neurons, EngineOptions::new()).expect("valid fan-out network");
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.to_async(&rt).iter(|| async {
                let handle = engine
                    .stimulate(Signal::new("seed", serde_json::json!(0)), StimulationOptions::new())
                    .await;
                handle.wait_until_complete().await.unwrap();
                black_box(handle.all_activation_tasks().len());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_linear_chain, bench_fan_out);
criterion_main!(benches);
