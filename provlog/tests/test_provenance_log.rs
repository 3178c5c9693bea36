use provlog::check::check_log;
use provlog::config::{OutputTarget, TrackerConfig};
use provlog::domain::OpenFlags;
use provlog_common::{ProvRecord, SourceByte, StableId};

fn config_for(path: &std::path::Path) -> TrackerConfig {
    TrackerConfig {
        output: OutputTarget::File(path.to_path_buf()),
        exe: Some("prog".to_string()),
        pid: Some(4242),
        ..TrackerConfig::default()
    }
}

fn sequential(ufd: StableId, from: u64, len: u64) -> Vec<Option<SourceByte>> {
    (from..from + len).map(|offset| Some(SourceByte::new(ufd, offset))).collect()
}

#[test]
fn test_write_only_create_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prov.log");
    let tracker = config_for(&path).build_tracker().unwrap();

    tracker.on_open(3, "/tmp/a", OpenFlags::WRONLY | OpenFlags::CREAT, true).unwrap();
    drop(tracker);

    let log = std::fs::read_to_string(&path).unwrap();
    assert_eq!(log, "o:ufd1:/tmp/a\n#g:created\ng:c:prog:/tmp/a\n");
    assert!(!log.contains("u:"));
}

#[test]
fn test_file_copy_session_is_valid_log() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prov.log");
    let tracker = config_for(&path).build_tracker().unwrap();

    let src = tracker.on_open(3, "/data/in", OpenFlags::RDONLY, false).unwrap().unwrap();
    let dst = tracker
        .on_open(4, "/data/out", OpenFlags::WRONLY | OpenFlags::TRUNC, false)
        .unwrap()
        .unwrap();

    // Copy 8 KiB in two chunks, then pad with a fill
    let mut offset = 0;
    for chunk in 0..2u64 {
        let anchor = tracker.on_read(3, chunk * 4096, 4096).unwrap().unwrap();
        assert_eq!(anchor, SourceByte::new(src, chunk * 4096));
        tracker.on_write(4, offset, &sequential(src, anchor.offset, 4096)).unwrap();
        offset += 4096;
    }
    tracker.on_write(4, offset, &vec![Some(SourceByte::new(src, 0)); 512]).unwrap();

    tracker.on_close(3).unwrap();
    tracker.on_close(4).unwrap();
    tracker.on_exec("gzip").unwrap();
    let stats = tracker.stats().unwrap();
    assert_eq!(stats.ranges_seq, 2);
    assert_eq!(stats.ranges_rep, 1);
    drop(tracker);

    let log = std::fs::read_to_string(&path).unwrap();
    let summary = check_log(log.as_bytes()).unwrap();
    assert_eq!(summary.opens, 2);
    assert_eq!(summary.closes, 2);
    assert_eq!(summary.execs, 1);
    assert_eq!(summary.derived_bytes, 8192 + 512);

    let writes: Vec<String> = log.lines().filter(|l| l.starts_with("w:")).map(String::from).collect();
    assert_eq!(
        writes,
        vec![
            format!("w:SEQ:{dst}:0:{src}:0:4096"),
            format!("w:SEQ:{dst}:4096:{src}:4096:4096"),
            format!("w:REP:{dst}:8192:{src}:0:512"),
        ]
    );
    assert!(log.ends_with("c:ufd1\nc:ufd2\nx:4242:gzip\n"));
}

#[test]
fn test_stdin_to_stdout_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prov.log");
    let tracker = config_for(&path).build_tracker().unwrap();

    // cat: stdin → stdout in 3 reads, offsets supplied by the counters
    let mut written = 0;
    for len in [10u64, 20, 5] {
        let anchor = tracker.on_read(0, 0, len).unwrap().unwrap();
        assert_eq!(anchor.offset, written);
        tracker.on_write(1, 0, &sequential(anchor.ufd, anchor.offset, len)).unwrap();
        written += len;
    }
    drop(tracker);

    let log = std::fs::read_to_string(&path).unwrap();
    assert_eq!(
        log,
        "w:SEQ:ufd2:0:ufd1:0:10\nw:SEQ:ufd2:10:ufd1:10:20\nw:SEQ:ufd2:30:ufd1:30:5\n"
    );
}

#[test]
fn test_log_lines_parse_back_to_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prov.log");
    let tracker = config_for(&path).build_tracker().unwrap();

    tracker.on_open(5, "/srv/with:colon", OpenFlags::RDWR, false).unwrap();
    tracker.on_write(5, 7, &[Some(SourceByte::new(StableId(1), 3)), None]).unwrap();
    drop(tracker);

    let log = std::fs::read_to_string(&path).unwrap();
    let records: Vec<ProvRecord<'_>> =
        log.lines().map(|line| ProvRecord::parse(line).unwrap()).collect();
    assert_eq!(records[0], ProvRecord::Open { ufd: StableId(1), name: "/srv/with:colon" });
    assert_eq!(
        records.last().unwrap(),
        &ProvRecord::Write {
            kind: provlog_common::RangeKind::None,
            dest: StableId(1),
            dest_offset: 7,
            source: SourceByte::new(StableId(1), 3),
            length: 1,
        }
    );
}
