use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use pcitop_core::{
    BarKind, BusAddress, BusDescriptor, DataSource, DeviceKind, NameResolver, RawDeviceDescriptor,
    ResourceTriple, Topology,
};
use pcitop_snapshot::{
    read_snapshot, write_snapshot, SnapshotError, SnapshotSource, DEVICE_STATIC_SIZE, HEADER_SIZE,
};
use proptest::prelude::*;

const MEM64_PREF: u64 = 0x0014_220c;

fn config(len: usize, vendor: u16, device: u16) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    bytes[0..2].copy_from_slice(&vendor.to_le_bytes());
    bytes[2..4].copy_from_slice(&device.to_le_bytes());
    bytes
}

fn example_topology() -> Topology {
    let device = RawDeviceDescriptor {
        address: BusAddress::new(0, 0, 3, 0),
        config: config(256, 0x8086, 0x1234),
        resources: vec![
            ResourceTriple::new(0x4_0000_0000, 0x4_000f_ffff, MEM64_PREF),
            ResourceTriple::default(),
        ],
        driver: None,
        numa_node: None,
        iommu_group: None,
    };
    let bus = BusDescriptor {
        domain: 0,
        bus: 0,
        is_root: true,
    };
    Topology::from_descriptors(vec![device], vec![bus], &mut NameResolver::empty()).unwrap()
}

fn save(path: &Path, topology: &Topology) {
    SnapshotSource::new(path).save(topology).unwrap();
}

fn snapshot_error(err: pcitop_core::Error) -> SnapshotError {
    match err {
        pcitop_core::Error::Source(inner) => *inner.downcast::<SnapshotError>().unwrap(),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn captured_device_replays_with_upper_half_bar() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture.pcitop");
    save(&path, &example_topology());

    let bytes = fs::read(&path).unwrap();
    let record = HEADER_SIZE as usize;
    assert_eq!(bytes[record + 9], 2, "resource count");
    assert_eq!(bytes[record + 14], 0, "driver name length");
    assert_eq!(bytes[record + 15], 1, "final-device flag");

    let mut source = SnapshotSource::open(&path).unwrap();
    let topo = Topology::build(&mut source, &mut NameResolver::empty()).unwrap();
    let dev = topo.device(BusAddress::new(0, 0, 3, 0)).unwrap();
    assert_eq!(dev.kind(), DeviceKind::Type0);
    assert_eq!(dev.vendor_id(), 0x8086);
    assert_eq!(dev.device_id(), 0x1234);
    assert_eq!(dev.driver(), None);

    let bar0 = dev.bars()[0].resource;
    assert_eq!(bar0.kind, BarKind::Memory);
    assert!(bar0.is_64bit);
    assert!(bar0.prefetchable);
    assert_eq!(bar0.length, 0x10_0000);
    assert_eq!(dev.bars()[1].upper_half_of, Some(0));
}

#[test]
fn replay_reproduces_devices_and_buses() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture.pcitop");

    let devices = vec![
        RawDeviceDescriptor {
            address: BusAddress::new(0, 0, 0, 0),
            config: config(256, 0x8086, 0x3e30),
            resources: Vec::new(),
            driver: Some("skl_uncore".to_owned()),
            numa_node: Some(0),
            iommu_group: Some(1),
        },
        RawDeviceDescriptor {
            address: BusAddress::new(1, 0x80, 0x1f, 7),
            config: config(4096, 0x144d, 0xa808),
            resources: vec![ResourceTriple::new(0xfe00_0000, 0xfe00_3fff, 0x0004_0200); 17],
            driver: Some("nvme".to_owned()),
            numa_node: Some(1),
            iommu_group: Some(42),
        },
    ];
    let buses = vec![
        BusDescriptor {
            domain: 0,
            bus: 0,
            is_root: true,
        },
        BusDescriptor {
            domain: 1,
            bus: 0x80,
            is_root: true,
        },
    ];
    let topo =
        Topology::from_descriptors(devices.clone(), buses.clone(), &mut NameResolver::empty())
            .unwrap();
    save(&path, &topo);

    let mut source = SnapshotSource::open(&path).unwrap();
    assert_eq!(source.list_devices().unwrap(), devices);
    assert_eq!(source.list_buses().unwrap(), buses);
}

#[test]
fn mismatched_magic_is_rejected_before_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture.pcitop");
    save(&path, &example_topology());

    let mut bytes = fs::read(&path).unwrap();
    bytes[..2].copy_from_slice(b"XX");
    // Corrupting the first record as well shows the magic check runs first.
    bytes[HEADER_SIZE as usize + 8] = 0xee;
    fs::write(&path, &bytes).unwrap();

    let err = SnapshotSource::open(&path).unwrap_err();
    assert!(matches!(err, SnapshotError::InvalidMagic));
}

#[test]
fn size_field_must_match_file_size() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture.pcitop");
    save(&path, &example_topology());

    let mut bytes = fs::read(&path).unwrap();
    let actual = bytes.len() as u64;
    bytes[13..21].copy_from_slice(&(actual + 1).to_le_bytes());
    fs::write(&path, &bytes).unwrap();

    let err = SnapshotSource::open(&path).unwrap_err();
    assert!(matches!(
        err,
        SnapshotError::SizeMismatch { declared, actual: found } if declared == actual + 1 && found == actual
    ));
}

#[test]
fn zero_counts_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture.pcitop");
    save(&path, &example_topology());
    let good = fs::read(&path).unwrap();

    let mut no_devices = good.clone();
    no_devices[21..25].copy_from_slice(&0u32.to_le_bytes());
    let err = read_snapshot(&mut Cursor::new(no_devices)).unwrap_err();
    assert!(matches!(err, SnapshotError::EmptyTable("device")));

    let mut no_buses = good;
    no_buses[25..29].copy_from_slice(&0u32.to_le_bytes());
    let err = read_snapshot(&mut Cursor::new(no_buses)).unwrap_err();
    assert!(matches!(err, SnapshotError::EmptyTable("bus")));
}

#[test]
fn truncated_snapshot_fails_as_a_whole() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture.pcitop");
    save(&path, &example_topology());

    let mut bytes = fs::read(&path).unwrap();
    bytes.truncate(HEADER_SIZE as usize + DEVICE_STATIC_SIZE as usize + 4);
    let len = bytes.len() as u64;
    bytes[13..21].copy_from_slice(&len.to_le_bytes());
    fs::write(&path, &bytes).unwrap();

    let mut source = SnapshotSource::new(&path);
    let err = source.list_devices().unwrap_err();
    assert!(matches!(snapshot_error(err), SnapshotError::Corrupt(_)));
}

fn dir_names(dir: &Path) -> Vec<OsString> {
    fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect()
}

#[test]
fn publish_leaves_only_the_target() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture.pcitop");

    save(&path, &example_topology());
    assert!(SnapshotSource::open(&path).is_ok());
    assert_eq!(dir_names(dir.path()), vec![OsString::from("capture.pcitop")]);
}

#[test]
fn publish_refuses_to_replace_existing_target() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture.pcitop");
    fs::write(&path, b"old contents").unwrap();

    let err = SnapshotSource::new(&path)
        .save(&example_topology())
        .unwrap_err();
    match snapshot_error(err) {
        SnapshotError::TargetExists(target) => assert_eq!(target, path),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(fs::read(&path).unwrap(), b"old contents");
    assert_eq!(dir_names(dir.path()), vec![OsString::from("capture.pcitop")]);
}

#[cfg(target_os = "linux")]
fn large_topology(count: u32) -> Topology {
    let devices = (0..count)
        .map(|index| RawDeviceDescriptor {
            address: BusAddress::new(
                (index >> 8) as u16,
                0,
                ((index >> 3) & 0x1f) as u8,
                (index & 7) as u8,
            ),
            config: config(256, 0x8086, 0x1234),
            resources: vec![ResourceTriple::new(0xfe00_0000, 0xfe00_0fff, 0x0004_0200)],
            driver: Some("nvme".to_owned()),
            numa_node: Some(0),
            iommu_group: Some(index as u16),
        })
        .collect();
    let bus = BusDescriptor {
        domain: 0,
        bus: 0,
        is_root: true,
    };
    Topology::from_descriptors(devices, vec![bus], &mut NameResolver::empty()).unwrap()
}

#[cfg(target_os = "linux")]
#[test]
fn publish_is_invisible_until_complete() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture.pcitop");
    let topology = large_topology(20_000);

    let done = Arc::new(AtomicBool::new(false));
    let watcher = {
        let dir = dir.path().to_path_buf();
        let path = path.clone();
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut seen = BTreeSet::new();
            let mut complete = true;
            while !done.load(Ordering::Acquire) {
                for name in dir_names(&dir) {
                    seen.insert(name);
                }
                if path.exists() {
                    complete &= SnapshotSource::open(&path).is_ok();
                }
            }
            (seen, complete)
        })
    };

    save(&path, &topology);
    done.store(true, Ordering::Release);
    let (seen, complete) = watcher.join().unwrap();

    assert!(
        seen.iter().all(|name| name == "capture.pcitop"),
        "temporary file showed up in the directory: {seen:?}"
    );
    assert!(complete, "a partially written snapshot was visible");
    let mut source = SnapshotSource::open(&path).unwrap();
    assert_eq!(source.snapshot().unwrap().devices.len(), 20_000);
}

#[test]
fn failed_publish_leaves_target_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture.pcitop");
    fs::write(&path, b"old contents").unwrap();

    let err = SnapshotSource::new(&path)
        .save(&Topology::default())
        .unwrap_err();
    assert!(matches!(snapshot_error(err), SnapshotError::EmptyTable(_)));
    assert_eq!(fs::read(&path).unwrap(), b"old contents");
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = SnapshotSource::open(dir.path().join("absent")).unwrap_err();
    assert!(matches!(err, SnapshotError::Io(_)));
}

fn arb_device() -> impl Strategy<Value = RawDeviceDescriptor> {
    (
        any::<u16>(),
        any::<u8>(),
        0u8..32,
        0u8..8,
        any::<bool>(),
        proptest::collection::vec(any::<(u64, u64, u64)>(), 0..20),
        proptest::option::of("[a-z0-9_-]{1,32}"),
        proptest::option::of(0u16..u16::MAX),
        proptest::option::of(0u16..u16::MAX),
    )
        .prop_map(
            |(domain, bus, dev, func, extended, res, driver, numa_node, iommu_group)| {
                let len = if extended { 4096 } else { 256 };
                RawDeviceDescriptor {
                    address: BusAddress::new(domain, bus, dev, func),
                    config: (0..len).map(|i| (i * 7) as u8).collect(),
                    resources: res
                        .into_iter()
                        .map(|(s, e, f)| ResourceTriple::new(s, e, f))
                        .collect(),
                    driver,
                    numa_node,
                    iommu_group,
                }
            },
        )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn capture_then_replay_is_identity(
        devices in proptest::collection::vec(arb_device(), 1..6),
        buses in proptest::collection::vec(
            (any::<u16>(), any::<u8>(), any::<bool>())
                .prop_map(|(domain, bus, is_root)| BusDescriptor { domain, bus, is_root }),
            1..6,
        ),
        created in any::<u64>(),
    ) {
        let records: Vec<_> = devices.iter().map(RawDeviceDescriptor::record).collect();
        let mut cursor = Cursor::new(Vec::new());
        write_snapshot(&mut cursor, &records, &buses, created).unwrap();
        cursor.set_position(0);

        let snapshot = read_snapshot(&mut cursor).unwrap();
        prop_assert_eq!(snapshot.created, created);
        prop_assert_eq!(&snapshot.devices, &devices);
        prop_assert_eq!(&snapshot.buses, &buses);
    }
}
