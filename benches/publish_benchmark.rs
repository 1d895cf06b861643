use criterion::{Criterion, black_box, criterion_group, criterion_main};
use harness_results::{PublisherConfig, ResultPublisher};

fn benchmark_publish(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let publisher = ResultPublisher::new(PublisherConfig::defaults().output_dir(dir.path()));

    // Give the document some realistic bulk before timing
    for case in 0..20 {
        for test in 0..25 {
            publisher
                .publish_test_status(&format!("Case{}", case), &format!("test{}", test), "done", Some("passed"), None)
                .expect("Failed to seed document");
        }
    }

    c.bench_function("publish_test_status", |b| {
        b.iter(|| {
            let result = publisher.publish_test_status(
                black_box("Case7"),
                black_box("test13"),
                "running",
                None,
                None,
            );
            assert!(result.is_ok());
        })
    });

    c.bench_function("read_document", |b| {
        b.iter(|| {
            let document = publisher.read_document().expect("Failed to read document");
            black_box(document.test_cases.len());
        })
    });
}

criterion_group!(benches, benchmark_publish);
criterion_main!(benches);
