use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use libtrace_backends::{create_backend, open_backend};
use libtrace_core::bitconverter::fit_title;
use libtrace_core::enums::{AlongFilter, SampleCoding, SummaryStat};
use libtrace_core::errors::*;
use libtrace_core::{Record, SetShape};

use crate::config::evaluate;
use crate::graph::{test_trace, NodeSeed, TraceSet, Transform};
use crate::sink::render;
use crate::tfm;
use crate::Pipeline;

fn write_set<P: AsRef<Path>>(path: P, shape: &SetShape, records: &[Record]) {
    let spec = format!("trs {}", path.as_ref().display());
    let backend = create_backend(&spec, shape, &[]).unwrap();
    for (i, rec) in records.iter().enumerate() {
        backend.write(i, rec).unwrap();
    }
    backend.finalize(records.len()).unwrap();
}

/// `samples[i][j] = i + j`, title "t", no data.
fn ramp_set(path: &Path, num_traces: usize, num_samples: usize) {
    let shape = SetShape::new(num_traces, num_samples, 1, 0, SampleCoding::Float, 1.0);
    let records: Vec<Record> = (0..num_traces)
        .map(|i| Record {
            title: Some(b"t".to_vec()),
            data: None,
            samples: Some((0..num_samples).map(|j| (i + j) as f32).collect()),
        })
        .collect();
    write_set(path, &shape, &records);
}

#[test]
fn scenario_nop_pipeline_via_config() {
    let dir = tempfile::tempdir().expect("Couldn't get tempfile.");
    let src = dir.path().join("x.trs");
    let dst = dir.path().join("y.trs");
    ramp_set(&src, 100, 10);

    let config = format!(
        "source \"trs {}\" ( cache 4K 2 )\n    save \"trs {}\" ( render 2 )\n",
        src.display(),
        dst.display()
    );
    evaluate(&config).unwrap();

    let reader = open_backend(&format!("trs {}", dst.display())).unwrap();
    assert_eq!(reader.shape().num_traces, 100);
    for i in 0..100 {
        let rec = reader.read(i).unwrap();
        assert_eq!(rec.title, Some(b"t".to_vec()));
        assert_eq!(
            rec.samples.unwrap(),
            (0..10).map(|j| (i + j) as f32).collect::<Vec<_>>()
        );
    }
}

fn tvla_set(path: &Path, num_traces: usize, num_samples: usize) {
    let shape = SetShape::new(num_traces, num_samples, 16, 0, SampleCoding::Float, 1.0);
    let records: Vec<Record> = (0..num_traces)
        .map(|i| Record {
            title: Some(fit_title(
                if i % 2 == 0 {
                    "TVLA set Fixed"
                } else {
                    "TVLA set Random"
                },
                16,
            )),
            data: None,
            samples: Some(vec![i as f32; num_samples]),
        })
        .collect();
    write_set(path, &shape, &records);
}

#[test]
fn scenario_tvla_split_average() {
    let dir = tempfile::tempdir().expect("Couldn't get tempfile.");
    let src = dir.path().join("tvla.trs");
    tvla_set(&src, 10, 8);

    let pipeline = Pipeline::new();
    let source = pipeline.open(&format!("trs {}", src.display())).unwrap();
    let fixed = pipeline
        .transform(&source, tfm::split_tvla::tfm_split_tvla(true))
        .unwrap();
    let avg = pipeline
        .transform(&fixed, tfm::average::tfm_average(true))
        .unwrap();

    assert_eq!(avg.num_traces(), 1);
    let t = avg.get_trace(0).unwrap();
    // element-wise mean of traces 0, 2, 4, 6, 8
    assert_eq!(t.samples().unwrap(), &vec![4.0f32; 8][..]);
    assert_eq!(&t.record().title_str().unwrap(), "Average");

    pipeline.shutdown();
}

#[test]
fn scenario_static_align_recovers_shifts() {
    let dir = tempfile::tempdir().expect("Couldn't get tempfile.");
    let src = dir.path().join("shifted.trs");

    let bump = |x: f32| (-(x - 50.0) * (x - 50.0) / 18.0).exp();
    let shifts: [isize; 10] = [0, -5, -3, -1, 0, 1, 2, 3, 4, 5];

    let shape = SetShape::new(10, 100, 1, 0, SampleCoding::Float, 1.0);
    let records: Vec<Record> = shifts
        .iter()
        .map(|&s| Record {
            title: Some(b"a".to_vec()),
            data: None,
            samples: Some(
                (0..100)
                    .map(|j| bump((j as isize + s).rem_euclid(100) as f32))
                    .collect(),
            ),
        })
        .collect();
    write_set(&src, &shape, &records);

    let pipeline = Pipeline::new();
    let source = pipeline.open(&format!("trs {}", src.display())).unwrap();
    let aligned = pipeline
        .transform(
            &source,
            tfm::static_align::tfm_static_align(0.9, 10, 0, vec![(40, 60)]),
        )
        .unwrap();

    let reference = records[0].samples.clone().unwrap();
    for i in 0..10 {
        let t = aligned.get_trace(i).unwrap();
        assert_eq!(t.samples().unwrap(), &reference[..], "trace {}", i);
    }

    pipeline.shutdown();
}

#[test]
fn scenario_cpa_recovers_key_byte() {
    use crate::crypto::{encrypt_aes128, hamming_weight, SBOX};

    let dir = tempfile::tempdir().expect("Couldn't get tempfile.");
    let src = dir.path().join("leaky.trs");

    let key: [u8; 16] = [
        0x2B, 0x7E, 0x15, 0x16, 0x28, 0xAE, 0xD2, 0xA6, 0xAB, 0xF7, 0x15, 0x88, 0x09, 0xCF,
        0x4F, 0x3C,
    ];
    let num_traces = 1200;
    let num_samples = 50;
    let leak_sample = 42;

    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut gauss = |rng: &mut StdRng| -> f32 {
        // Irwin-Hall approximation of N(0, 1)
        (0..12).map(|_| rng.gen::<f32>()).sum::<f32>() - 6.0
    };

    let shape = SetShape::new(num_traces, num_samples, 0, 48, SampleCoding::Float, 1.0);
    let records: Vec<Record> = (0..num_traces)
        .map(|_| {
            let pt: [u8; 16] = rng.gen();
            let ct = encrypt_aes128(&pt, &key);

            let mut data = Vec::with_capacity(48);
            data.extend_from_slice(&pt);
            data.extend_from_slice(&ct);
            data.extend_from_slice(&key);

            let mut samples: Vec<f32> = (0..num_samples).map(|_| gauss(&mut rng)).collect();
            samples[leak_sample] =
                hamming_weight(SBOX[(pt[0] ^ key[0]) as usize]) as f32 + gauss(&mut rng) * 0.5;

            Record {
                title: None,
                data: Some(data),
                samples: Some(samples),
            }
        })
        .collect();
    write_set(&src, &shape, &records);

    let pipeline = Pipeline::new();
    let source = pipeline.open(&format!("trs {}", src.display())).unwrap();
    let cpa = pipeline
        .transform(
            &source,
            tfm::aes::tfm_aes_intermediate(libtrace_core::AesLeakage::R0HwSboxOut, false),
        )
        .unwrap();

    assert_eq!(cpa.num_traces(), 16);
    assert_eq!(cpa.num_samples(), 256 * num_samples);

    // output trace 0 covers key byte 0; its samples are 256 guess curves
    let t = cpa.get_trace(0).unwrap();
    let pearson = t.samples().unwrap();

    let best = pearson
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.abs().partial_cmp(&b.1.abs()).unwrap())
        .unwrap()
        .0;
    assert_eq!(best / num_samples, 0x2B, "recovered wrong key guess");
    assert_eq!(best % num_samples, leak_sample, "peak at wrong sample");

    pipeline.shutdown();
}

#[test]
fn scenario_save_sentinel_counts_dropped_records() {
    let dir = tempfile::tempdir().expect("Couldn't get tempfile.");
    let src = dir.path().join("five.trs");
    let dst = dir.path().join("three.trs");
    tvla_set(&src, 5, 4);

    let pipeline = Pipeline::new();
    let source = pipeline.open(&format!("trs {}", src.display())).unwrap();
    let fixed = pipeline
        .transform(&source, tfm::split_tvla::tfm_split_tvla(true))
        .unwrap();
    let saved = pipeline
        .transform(&fixed, tfm::save::tfm_save(format!("trs {}", dst.display())))
        .unwrap();

    render(&saved, 3).unwrap();
    assert_eq!(saved.num_traces(), 3);
    pipeline.shutdown();

    let reader = open_backend(&format!("trs {}", dst.display())).unwrap();
    assert_eq!(reader.shape().num_traces, 3);
    for (slot, upstream) in [0usize, 2, 4].iter().enumerate() {
        let rec = reader.read(slot).unwrap();
        assert_eq!(rec.samples.unwrap(), vec![*upstream as f32; 4]);
    }
}

#[test]
fn scenario_cache_hit_rate() {
    let dir = tempfile::tempdir().expect("Couldn't get tempfile.");
    let src = dir.path().join("cached.trs");
    ramp_set(&src, 64, 16);

    let pipeline = Pipeline::new();
    let source = pipeline.open(&format!("trs {}", src.display())).unwrap();
    source.create_cache_manual(8, 4).unwrap();

    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..10_000 {
        let index = rng.gen_range(0..32usize);
        let t = source.get_trace(index).unwrap();
        assert_eq!(t.samples().unwrap()[0], index as f32);
    }

    let cache = source.test_cache().unwrap();
    let (accesses, hits, misses, _stores, _evictions) = cache.counters();
    assert_eq!(accesses, 10_000);
    assert_eq!(hits + misses, accesses);
    assert!(
        hits as f64 / accesses as f64 >= 0.85,
        "hit rate {} too low",
        hits as f64 / accesses as f64
    );

    // every handle was dropped, so nothing stays pinned
    for index in 0..8 {
        for (_lru, refcount, _idx) in cache.slot_state(index) {
            assert_eq!(refcount, 0);
        }
    }

    pipeline.shutdown();
}

#[test]
fn cache_lru_and_pinning_properties() {
    use crate::cache::TraceCache;

    let dir = tempfile::tempdir().expect("Couldn't get tempfile.");
    let src = dir.path().join("lru.trs");
    ramp_set(&src, 64, 4);

    let pipeline = Pipeline::new();
    let source = pipeline.open(&format!("trs {}", src.display())).unwrap();

    let cache = TraceCache::new(0, 1, 4).unwrap();

    // fill all four ways, keeping every trace pinned
    let pinned: Vec<_> = (0..4)
        .map(|i| {
            let t = test_trace(&source, i);
            let mut set = cache.lock_set(i);
            assert!(cache.lookup(&mut set, i).is_none());
            cache.store(&mut set, i, t.clone()).unwrap();
            t
        })
        .collect();

    // all ways pinned: a store has no victim
    {
        let t = test_trace(&source, 4);
        let mut set = cache.lock_set(4);
        assert!(matches!(
            cache.store(&mut set, 4, t),
            Err(LtError::Exhausted { .. })
        ));
    }

    // release index 1; a new store must evict exactly that slot
    cache.deref(1, &pinned[1]);
    {
        let t = test_trace(&source, 5);
        let mut set = cache.lock_set(5);
        cache.store(&mut set, 5, t).unwrap();
    }

    let state = cache.slot_state(0);
    let resident: Vec<Option<usize>> = state.iter().map(|s| s.2).collect();
    assert!(resident.contains(&Some(5)));
    assert!(!resident.contains(&Some(1)));
    assert!(resident.contains(&Some(0)));

    // a hit moves the slot to rank 0 and only bumps lower ranks
    let before = cache.slot_state(0);
    let hit_way = before.iter().position(|s| s.2 == Some(0)).unwrap();
    let old_rank = before[hit_way].0;
    {
        let mut set = cache.lock_set(0);
        let t = cache.lookup(&mut set, 0).unwrap();
        drop(t);
    }
    let after = cache.slot_state(0);
    assert_eq!(after[hit_way].0, 0);
    for (way, slot) in after.iter().enumerate() {
        if way != hit_way {
            let expected = if before[way].0 < old_rank {
                before[way].0 + 1
            } else {
                before[way].0
            };
            assert_eq!(slot.0, expected.min(3));
        }
    }

    pipeline.shutdown();
}

struct CountingTfm {
    gets: Arc<AtomicUsize>,
}

impl Transform for CountingTfm {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn init(&mut self, prev: &Arc<TraceSet>) -> Result<NodeSeed> {
        Ok(NodeSeed::shaped(prev.shape().clone()))
    }

    fn get(&self, ts: &Arc<TraceSet>, index: usize) -> Result<Record> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        tfm::passthrough(ts, index)
    }
}

#[test]
fn attaching_transforms_is_lazy() {
    let dir = tempfile::tempdir().expect("Couldn't get tempfile.");
    let src = dir.path().join("lazy.trs");
    ramp_set(&src, 10, 4);

    let gets = Arc::new(AtomicUsize::new(0));
    let pipeline = Pipeline::new();
    let source = pipeline.open(&format!("trs {}", src.display())).unwrap();
    let counted = pipeline
        .transform(&source, Box::new(CountingTfm { gets: gets.clone() }))
        .unwrap();
    let tail = pipeline.transform(&counted, tfm::nop::tfm_nop()).unwrap();

    // building the chain pulled nothing upstream
    assert_eq!(gets.load(Ordering::Relaxed), 0);

    let _ = tail.get_trace(3).unwrap();
    assert_eq!(gets.load(Ordering::Relaxed), 1);

    pipeline.shutdown();
}

struct SpreadProbe {
    active: parking_lot::Mutex<std::collections::BTreeSet<usize>>,
    max_spread: AtomicUsize,
}

impl Transform for Arc<SpreadProbe> {
    fn name(&self) -> &'static str {
        "spread_probe"
    }

    fn init(&mut self, prev: &Arc<TraceSet>) -> Result<NodeSeed> {
        Ok(NodeSeed::shaped(prev.shape().clone()))
    }

    fn get(&self, ts: &Arc<TraceSet>, index: usize) -> Result<Record> {
        {
            let mut active = self.active.lock();
            active.insert(index);
            let spread = active.iter().next_back().unwrap() - active.iter().next().unwrap();
            self.max_spread.fetch_max(spread, Ordering::Relaxed);
        }

        std::thread::sleep(std::time::Duration::from_millis(1));
        let rec = tfm::passthrough(ts, index);
        self.active.lock().remove(&index);
        rec
    }
}

#[test]
fn synchronizer_bounds_inflight_distance() {
    let dir = tempfile::tempdir().expect("Couldn't get tempfile.");
    let src = dir.path().join("sync.trs");
    ramp_set(&src, 48, 4);

    let probe = Arc::new(SpreadProbe {
        active: parking_lot::Mutex::new(std::collections::BTreeSet::new()),
        max_spread: AtomicUsize::new(0),
    });

    let pipeline = Pipeline::new();
    let source = pipeline.open(&format!("trs {}", src.display())).unwrap();
    let probed = pipeline
        .transform(&source, Box::new(probe.clone()))
        .unwrap();
    let synced = pipeline
        .transform(&probed, tfm::synchronize::tfm_synchronize(3))
        .unwrap();

    render(&synced, 8).unwrap();
    assert!(
        probe.max_spread.load(Ordering::Relaxed) <= 3,
        "spread {} exceeded the bound",
        probe.max_spread.load(Ordering::Relaxed)
    );

    pipeline.shutdown();
}

#[test]
fn block_engine_emits_one_output_per_group() {
    let dir = tempfile::tempdir().expect("Couldn't get tempfile.");
    let src = dir.path().join("blocks.trs");

    // 40 traces with 40 distinct data values, samples = constant data value
    let shape = SetShape::new(40, 4, 0, 2, SampleCoding::Float, 1.0);
    let records: Vec<Record> = (0..40)
        .map(|i| Record {
            title: None,
            data: Some(vec![i as u8, 0xAA]),
            samples: Some(vec![i as f32; 4]),
        })
        .collect();
    write_set(&src, &shape, &records);

    let pipeline = Pipeline::new();
    let source = pipeline.open(&format!("trs {}", src.display())).unwrap();
    let reduced = pipeline
        .transform(
            &source,
            tfm::reduce_along::tfm_reduce_along(SummaryStat::Avg, AlongFilter::Data, 0),
        )
        .unwrap();

    // blocks close oldest-first, so output order mirrors input order
    for i in 0..40 {
        let t = reduced.get_trace(i).unwrap();
        assert_eq!(t.data().unwrap(), &[i as u8, 0xAA]);
        assert_eq!(t.samples().unwrap(), &vec![i as f32; 4][..]);
    }

    // the stream is exhausted and drained: exactly 40 outputs exist
    assert_eq!(reduced.num_traces(), 40);
    assert!(reduced.get_trace(40).is_err());

    pipeline.shutdown();
}

#[test]
fn reduce_along_buckets_by_count() {
    let dir = tempfile::tempdir().expect("Couldn't get tempfile.");
    let src = dir.path().join("buckets.trs");
    ramp_set(&src, 20, 4);

    let pipeline = Pipeline::new();
    let source = pipeline.open(&format!("trs {}", src.display())).unwrap();
    let reduced = pipeline
        .transform(
            &source,
            tfm::reduce_along::tfm_reduce_along(SummaryStat::Avg, AlongFilter::Num, 10),
        )
        .unwrap();

    // bucket 0 holds traces 0..10: per-sample mean is (4.5 + j)
    let t = reduced.get_trace(0).unwrap();
    let samples = t.samples().unwrap();
    for (j, v) in samples.iter().enumerate() {
        assert!((v - (4.5 + j as f32)).abs() < 1e-4);
    }

    pipeline.shutdown();
}

#[test]
fn wait_on_serves_split_model_curves() {
    let dir = tempfile::tempdir().expect("Couldn't get tempfile.");
    let src = dir.path().join("io.trs");

    let shape = SetShape::new(50, 6, 0, 4, SampleCoding::Float, 1.0);
    let mut rng = StdRng::seed_from_u64(99);
    let records: Vec<Record> = (0..50)
        .map(|_| {
            let data: [u8; 4] = rng.gen();
            Record {
                title: None,
                data: Some(data.to_vec()),
                samples: Some((0..6).map(|_| rng.gen::<f32>()).collect()),
            }
        })
        .collect();
    write_set(&src, &shape, &records);

    let pipeline = Pipeline::new();
    let source = pipeline.open(&format!("trs {}", src.display())).unwrap();
    let cpa = pipeline
        .transform(
            &source,
            tfm::io_correlation::tfm_io_correlation(false, 8, 2).unwrap(),
        )
        .unwrap();
    let waiter = pipeline
        .transform(&cpa, tfm::wait_on::tfm_wait_on(libtrace_core::Port::CpaSplitPm, 0))
        .unwrap();

    assert_eq!(waiter.num_traces(), 2);
    assert_eq!(waiter.num_samples(), 6);

    let background = crate::sink::render_async(&cpa, 1);
    let t = waiter.get_trace(0).unwrap();
    assert!(t.record().title_str().unwrap().starts_with("CPA 0"));
    assert_eq!(t.samples().unwrap().len(), 6);
    drop(t);

    background.join().unwrap();
    pipeline.shutdown();
}

#[test]
fn extract_timing_segments_a_long_capture() {
    let dir = tempfile::tempdir().expect("Couldn't get tempfile.");
    let src = dir.path().join("long.trs");

    // two long captures, each with 4 pattern placements 100 samples apart
    let pattern_len = 20;
    let num_samples = 520;
    let expecting = 4;
    let bump = |x: f32| (-(x * x) / 6.0).exp();

    let mut rng = StdRng::seed_from_u64(4242);
    let mut records = Vec::new();
    for _ in 0..2 {
        let mut samples: Vec<f32> = (0..num_samples)
            .map(|_| 0.05 * (rng.gen::<f32>() - 0.5))
            .collect();
        let positions = [60usize, 160, 260, 360];
        for &p in &positions {
            for k in 0..pattern_len {
                samples[p + k] += bump(k as f32 - 10.0);
            }
        }

        let mut data = vec![0u8; 48 + 8 * expecting];
        for (i, b) in data.iter_mut().enumerate().take(32) {
            *b = i as u8;
        }
        for (i, &p) in positions.iter().enumerate() {
            data[32 + 8 * i..32 + 8 * (i + 1)].copy_from_slice(&(p as u64).to_le_bytes());
        }
        // key bytes live after the timing vector
        for (i, b) in data[32 + 8 * expecting..].iter_mut().enumerate() {
            *b = 0xC0 + i as u8;
        }

        records.push(Record {
            title: None,
            data: Some(data),
            samples: Some(samples),
        });
    }

    let shape = SetShape::new(
        2,
        num_samples,
        0,
        48 + 8 * expecting,
        SampleCoding::Float,
        1.0,
    );
    write_set(&src, &shape, &records);

    let pipeline = Pipeline::new();
    let source = pipeline.open(&format!("trs {}", src.display())).unwrap();
    let extracted = pipeline
        .transform(
            &source,
            tfm::extract::tfm_extract_timing(
                pattern_len,
                expecting,
                100,
                10,
                tfm::MatchRegion {
                    ref_trace: 0,
                    lower: 60,
                    upper: 60 + pattern_len,
                    confidence: 0.8,
                },
                libtrace_core::CryptoKind::Aes128,
            ),
        )
        .unwrap();

    assert_eq!(extracted.num_samples(), pattern_len);
    assert_eq!(extracted.shape().data_size, 48);

    let mut found = 0usize;
    for i in 0..2 * expecting {
        let t = extracted.get_trace(i).unwrap();
        if let Some(samples) = t.samples() {
            assert_eq!(samples.len(), pattern_len);
            // every emitted window contains the bump apex
            let peak = samples.iter().cloned().fold(f32::MIN, f32::max);
            assert!(peak > 0.8, "window {} has no pattern (peak {})", i, peak);

            let data = t.data().unwrap();
            assert_eq!(data.len(), 48);
            assert_eq!(data[0], 0);
            assert_eq!(data[32], 0xC0);
            found += 1;
        }
    }
    assert_eq!(found, 2 * expecting);

    pipeline.shutdown();
}

#[test]
fn narrow_then_append_roundtrip() {
    let dir = tempfile::tempdir().expect("Couldn't get tempfile.");
    let a = dir.path().join("a.trs");
    let b = dir.path().join("b.trs");
    ramp_set(&a, 6, 8);
    ramp_set(&b, 4, 8);

    let pipeline = Pipeline::new();
    let source = pipeline.open(&format!("trs {}", a.display())).unwrap();
    let joined = pipeline
        .transform(&source, tfm::append::tfm_append(format!("trs {}", b.display())))
        .unwrap();
    assert_eq!(joined.num_traces(), 10);

    // trace 7 comes from the appended set's index 1
    let t = joined.get_trace(7).unwrap();
    assert_eq!(t.samples().unwrap()[0], 1.0);
    drop(t);

    let narrowed = pipeline
        .transform(&joined, tfm::narrow::tfm_narrow(2, 3, 1, 4))
        .unwrap();
    assert_eq!(narrowed.num_traces(), 3);
    assert_eq!(narrowed.num_samples(), 4);

    let t = narrowed.get_trace(0).unwrap();
    // upstream trace 2, samples 1..5
    assert_eq!(t.samples().unwrap(), &[3.0, 4.0, 5.0, 6.0][..]);

    pipeline.shutdown();
}

#[test]
fn verify_drops_corrupt_records() {
    use crate::crypto::encrypt_aes128;

    let dir = tempfile::tempdir().expect("Couldn't get tempfile.");
    let src = dir.path().join("verify.trs");

    let key = [7u8; 16];
    let records: Vec<Record> = (0..4)
        .map(|i| {
            let pt = [i as u8; 16];
            let mut ct = encrypt_aes128(&pt, &key);
            if i % 2 == 1 {
                ct[0] ^= 0xFF;
            }

            let mut data = Vec::new();
            data.extend_from_slice(&pt);
            data.extend_from_slice(&ct);
            data.extend_from_slice(&key);

            Record {
                title: None,
                data: Some(data),
                samples: Some(vec![i as f32; 4]),
            }
        })
        .collect();

    let shape = SetShape::new(4, 4, 0, 48, SampleCoding::Float, 1.0);
    write_set(&src, &shape, &records);

    let pipeline = Pipeline::new();
    let source = pipeline.open(&format!("trs {}", src.display())).unwrap();
    let verified = pipeline
        .transform(&source, tfm::verify::tfm_verify(libtrace_core::CryptoKind::Aes128))
        .unwrap();

    for i in 0..4 {
        let t = verified.get_trace(i).unwrap();
        assert_eq!(t.record().is_empty(), i % 2 == 1, "trace {}", i);
    }

    pipeline.shutdown();
}
