use libtrace_core::bitconverter::fit_title;
use libtrace_core::enums::SampleCoding;
use libtrace_core::{Record, SetShape};

use crate::{create_backend, open_backend};

fn test_record(i: usize, num_samples: usize, title_size: usize) -> Record {
    Record {
        title: Some(fit_title(&format!("trace {}", i), title_size)),
        data: Some((0..16).map(|b| (b + i) as u8).collect()),
        samples: Some((0..num_samples).map(|j| (i + j) as f32).collect()),
    }
}

#[test]
fn trs_write_then_reopen_roundtrip() {
    let dir = tempfile::tempdir().expect("Couldn't get tempfile.");
    let path = dir.path().join("roundtrip.trs");
    let spec = format!("trs {}", path.display());

    let shape = SetShape::new(10, 25, 16, 16, SampleCoding::Float, 1.0);
    let writer = create_backend(&spec, &shape, &[]).unwrap();
    for i in 0..10 {
        writer.write(i, &test_record(i, 25, 16)).unwrap();
    }
    writer.finalize(10).unwrap();
    drop(writer);

    let reader = open_backend(&spec).unwrap();
    assert_eq!(reader.shape().num_traces, 10);
    assert_eq!(reader.shape().num_samples, 25);
    assert_eq!(reader.shape().title_size, 16);

    for i in 0..10 {
        let rec = reader.read(i).unwrap();
        assert_eq!(rec, test_record(i, 25, 16));
    }
    assert!(reader.read(10).is_err());
}

#[test]
fn trs_short_coding_truncates_but_preserves_bytes() {
    let dir = tempfile::tempdir().expect("Couldn't get tempfile.");
    let path = dir.path().join("short.trs");
    let spec = format!("trs {}", path.display());

    let shape = SetShape::new(1, 4, 8, 4, SampleCoding::Short, 0.5);
    let writer = create_backend(&spec, &shape, &[]).unwrap();

    let rec = Record {
        title: Some(fit_title("t", 8)),
        data: Some(vec![1, 2, 3, 4]),
        samples: Some(vec![1.0, -2.5, 0.4, 100.0]),
    };
    writer.write(0, &rec).unwrap();
    writer.finalize(1).unwrap();
    drop(writer);

    let reader = open_backend(&spec).unwrap();
    let back = reader.read(0).unwrap();
    assert_eq!(back.title, rec.title);
    assert_eq!(back.data, rec.data);
    // samples go through the lossy (v / 0.5) as i16 cast then scale back up
    assert_eq!(back.samples.unwrap(), vec![1.0, -2.5, 0.0, 100.0]);
}

#[test]
fn trs_out_of_order_write_is_invalid() {
    let dir = tempfile::tempdir().expect("Couldn't get tempfile.");
    let path = dir.path().join("order.trs");
    let spec = format!("trs {}", path.display());

    let shape = SetShape::new(4, 4, 0, 0, SampleCoding::Float, 1.0);
    let writer = create_backend(&spec, &shape, &[]).unwrap();
    let rec = Record {
        title: None,
        data: None,
        samples: Some(vec![0.0; 4]),
    };

    writer.write(0, &rec).unwrap();
    assert!(writer.write(2, &rec).is_err());
    writer.write(1, &rec).unwrap();
}

#[test]
fn trs_writer_reads_back_committed_records() {
    let dir = tempfile::tempdir().expect("Couldn't get tempfile.");
    let path = dir.path().join("readback.trs");
    let spec = format!("trs {}", path.display());

    let shape = SetShape::new(4, 8, 8, 0, SampleCoding::Float, 1.0);
    let writer = create_backend(&spec, &shape, &[]).unwrap();
    writer.write(0, &test_record(0, 8, 8)).unwrap();

    let back = writer.read(0).unwrap();
    assert_eq!(back.samples, test_record(0, 8, 8).samples);
    assert!(writer.read(1).is_err());
}

#[test]
fn ztrs_roundtrip_sequential_and_random() {
    let dir = tempfile::tempdir().expect("Couldn't get tempfile.");
    let path = dir.path().join("roundtrip.ztrs");
    let spec = format!("ztrs {}", path.display());

    let shape = SetShape::new(8, 100, 12, 8, SampleCoding::Float, 1.0);
    let writer = create_backend(&spec, &shape, &[]).unwrap();
    for i in 0..8 {
        let rec = Record {
            title: Some(fit_title(&format!("z{}", i), 12)),
            data: Some(vec![i as u8; 8]),
            samples: Some((0..100).map(|j| ((i * j) % 17) as f32).collect()),
        };
        writer.write(i, &rec).unwrap();
    }
    writer.finalize(8).unwrap();
    drop(writer);

    let reader = open_backend(&spec).unwrap();
    assert_eq!(reader.shape().num_traces, 8);

    // sequential walk forward
    for i in 0..8 {
        let rec = reader.read(i).unwrap();
        assert_eq!(rec.data, Some(vec![i as u8; 8]));
    }

    // and against the cached cursor: backward and repeated access
    for &i in &[7usize, 0, 3, 3, 5, 1] {
        let rec = reader.read(i).unwrap();
        assert_eq!(rec.data, Some(vec![i as u8; 8]));
        assert_eq!(
            rec.samples.unwrap(),
            (0..100).map(|j| ((i * j) % 17) as f32).collect::<Vec<_>>()
        );
    }
}

#[test]
fn ztrs_compresses_redundant_samples() {
    let dir = tempfile::tempdir().expect("Couldn't get tempfile.");
    let trs_path = dir.path().join("flat.trs");
    let ztrs_path = dir.path().join("flat.ztrs");

    let shape = SetShape::new(4, 4096, 0, 0, SampleCoding::Float, 1.0);
    let rec = Record {
        title: None,
        data: None,
        samples: Some(vec![1.0; 4096]),
    };

    for spec in [
        format!("trs {}", trs_path.display()),
        format!("ztrs {}", ztrs_path.display()),
    ] {
        let writer = create_backend(&spec, &shape, &[]).unwrap();
        for i in 0..4 {
            writer.write(i, &rec).unwrap();
        }
        writer.finalize(4).unwrap();
    }

    let trs_len = std::fs::metadata(&trs_path).unwrap().len();
    let ztrs_len = std::fs::metadata(&ztrs_path).unwrap().len();
    assert!(ztrs_len < trs_len / 4);
}

#[test]
fn unknown_backend_prefix_is_invalid() {
    assert!(open_backend("tar /tmp/x.tar").is_err());
    assert!(open_backend("no-separator").is_err());
}
