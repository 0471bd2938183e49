use criterion::BenchmarkId;
use criterion::Criterion;
use criterion::Throughput;
use criterion::{criterion_group, criterion_main, Bencher};
use hetero_lr_with_paillier::channel_utils::sync_channel::create_unix_channels;
use hetero_lr_with_paillier::channel_utils::sync_channel_by_cb::create_crossbeam_channels;
use hetero_lr_with_paillier::data_utils::create_vertical_dataset;
use hetero_lr_with_paillier::encrypt::{EncryptOperator, PaillierEncrypt};
use hetero_lr_with_paillier::hetero_lr::bin::train_and_predict;
use hetero_lr_with_paillier::param::LogisticParams;
use hetero_lr_with_paillier::transfer::{Federation, Role, Transfer};
use scuttlebutt::{AbstractChannel, AesRng};
use std::time::{Duration, Instant};

fn bench_paillier(c: &mut Criterion) {
    let mut group = c.benchmark_group("paillier_time");
    for key_length in [512, 1024, 2048] {
        let mut op = PaillierEncrypt::new();
        op.generate_key(key_length).unwrap();
        let ct = op.encrypt(0.123).unwrap();

        group.bench_with_input(BenchmarkId::new("encrypt", key_length), &key_length, |b, _| {
            b.iter(|| op.encrypt(0.123).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("decrypt", key_length), &key_length, |b, _| {
            b.iter(|| op.decrypt(&ct).unwrap())
        });
    }
    group.finish();
}

fn federations<C: AbstractChannel>(channels: Vec<Vec<(usize, C)>>) -> [Federation<C>; 3] {
    let feds = channels
        .into_iter()
        .enumerate()
        .map(|(i, chs)| Federation::new(Role::from_index(i).unwrap(), chs).unwrap())
        .collect::<Vec<_>>();
    match feds.try_into() {
        Ok(feds) => feds,
        Err(_) => panic!("expected 3 parties"),
    }
}

fn hetero_lr_fn<T, F>(mut transfers: F) -> impl FnMut(&mut Bencher<'_>, &usize)
where
    T: Transfer + Send + 'static,
    F: FnMut() -> [T; 3],
{
    move |b, &rows| {
        b.iter_custom(|iter| {
            let mut rng = AesRng::new();
            let mut params = LogisticParams::default();
            params.encrypt_param.key_length = 512;
            params.max_iter = 3;
            let mut total_time = Duration::new(0, 0);

            for _ in 0..iter {
                let dataset = create_vertical_dataset(rows, 3, 2, &mut rng).unwrap();
                let transfers = transfers();
                let start = Instant::now();
                train_and_predict(params.clone(), dataset, transfers).unwrap();
                total_time += start.elapsed();
            }

            total_time
        });
    }
}

fn bench_hetero_lr(c: &mut Criterion) {
    let min_e = 3;
    let max_e = 6;

    let mut group = c.benchmark_group("hetero_lr_time");
    for e in min_e..=max_e {
        let rows: usize = 1 << e;
        group.throughput(Throughput::Elements(rows as u64));
        group.bench_with_input(
            BenchmarkId::new("UnixStream", rows),
            &rows,
            hetero_lr_fn(|| federations(create_unix_channels(3).unwrap())),
        );
        group.bench_with_input(
            BenchmarkId::new("Crossbeam", rows),
            &rows,
            hetero_lr_fn(|| federations(create_crossbeam_channels(3))),
        );
    }
    group.finish();
}

criterion_group!(
    name = time_benches;
    config = Criterion::default().sample_size(10);
    targets = bench_paillier, bench_hetero_lr
);
criterion_main!(time_benches);

// cargo bench paillier_time
// cargo bench hetero_lr_time
