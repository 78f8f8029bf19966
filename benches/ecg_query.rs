use std::hint::black_box;
use criterion::{criterion_group, criterion_main, Criterion};
use ecgdb::{RecordingMeta, Sex, Store, StoreConfig};
use ndarray::Array2;

const PATIENTS: usize = 50;
const SAMPLES: usize = 2500; // 10 s at 250 Hz

fn build_store() -> Store {
    let mut store = Store::open_in_memory(&StoreConfig::default()).unwrap();
    store.setup_schema().unwrap();
    store.populate_dictionaries().unwrap();
    let ecg = Array2::from_shape_fn((12, SAMPLES), |(l, t)| (l as i32 - 6) * 100 + (t % 250) as i32);
    for i in 0..PATIENTS {
        let meta = RecordingMeta {
            id:          format!("B{i:04}"),
            labels:      vec!["426783006".into()],
            age:         Some(50.0),
            sex:         Some(Sex::Female),
            baselines:   vec![0.0; 12],
            adcs:        vec![1000.0; 12],
            num_samples: SAMPLES,
            num_leads:   12,
            duration:    10.0,
            sfreq:       250.0,
        };
        let id = store.insert_patient(0, &meta, &[14, (i % 26) as i64]).unwrap();
        store.insert_samples(id, &ecg).unwrap();
    }
    store
}

fn bench_insert_recording(c: &mut Criterion) {
    let ecg = Array2::from_elem((12, SAMPLES), 7);
    c.bench_function("insert_samples [12×2500]", |b| {
        b.iter_with_setup(
            || {
                let mut s = Store::open_in_memory(&StoreConfig::default()).unwrap();
                s.setup_schema().unwrap();
                s.populate_dictionaries().unwrap();
                let meta = RecordingMeta {
                    id:          "X".into(),
                    labels:      vec![],
                    age:         None,
                    sex:         None,
                    baselines:   vec![],
                    adcs:        vec![],
                    num_samples: SAMPLES,
                    num_leads:   12,
                    duration:    10.0,
                    sfreq:       250.0,
                };
                let id = s.insert_patient(0, &meta, &[]).unwrap();
                (s, id)
            },
            |(mut s, id)| black_box(s.insert_samples(id, &ecg).unwrap()),
        )
    });
}

fn bench_ecg_window(c: &mut Criterion) {
    let store = build_store();
    c.bench_function("ecg 12 leads, 5 s window", |b| {
        b.iter(|| {
            let data = store.ecg(black_box(17), None, Some(5.0)).unwrap();
            black_box(data[[0, 0]])
        })
    });
    c.bench_function("ecg 2 leads, full", |b| {
        b.iter(|| {
            let data = store.ecg(black_box(17), Some(&[1, 2]), None).unwrap();
            black_box(data.nrows())
        })
    });
}

fn bench_cohort(c: &mut Criterion) {
    let store = build_store();
    c.bench_function("patients_with_diagnoses n=16", |b| {
        b.iter(|| black_box(store.patients_with_diagnoses(Some(16)).unwrap().len()))
    });
}

criterion_group!(benches, bench_insert_recording, bench_ecg_window, bench_cohort);
criterion_main!(benches);
