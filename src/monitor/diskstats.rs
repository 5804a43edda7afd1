//! Whole-disk I/O totals from `/proc/diskstats`.
//!
//! Only entries with a matching `/sys/block/<name>` directory are summed, so
//! partitions are not counted twice alongside their parent disk. Loop and
//! RAM-backed devices also live under `/sys/block` and are skipped.

use std::path::Path;

use crate::error::{Result, TaskwardenError};

const DISKSTATS_PATH: &str = "/proc/diskstats";
const SYS_BLOCK_DIR: &str = "/sys/block";
/// `/proc/diskstats` always counts in 512-byte sectors, regardless of the
/// device's real sector size.
const SECTOR_BYTES: u64 = 512;
/// Block devices that do not correspond to physical storage.
const VIRTUAL_DEVICE_PREFIXES: [&str; 3] = ["loop", "ram", "zram"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiskIo {
    pub read_ops: u64,
    pub read_bytes: u64,
    pub write_ops: u64,
    pub write_bytes: u64,
}

/// Sums the diskstats lines whose device name passes `is_whole_disk`.
///
/// Returns `None` if no line matched.
pub fn parse_diskstats(contents: &str, is_whole_disk: impl Fn(&str) -> bool) -> Option<DiskIo> {
    let mut total = DiskIo::default();
    let mut matched = false;

    for line in contents.lines() {
        // major minor name reads merged sectors ms writes merged sectors ...
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 {
            continue;
        }
        let name = fields[2];
        if !is_whole_disk(name) {
            continue;
        }
        let field = |i: usize| fields[i].parse::<u64>().ok();
        let (Some(reads), Some(read_sectors), Some(writes), Some(write_sectors)) =
            (field(3), field(5), field(7), field(9))
        else {
            continue;
        };
        total.read_ops += reads;
        total.read_bytes += read_sectors * SECTOR_BYTES;
        total.write_ops += writes;
        total.write_bytes += write_sectors * SECTOR_BYTES;
        matched = true;
    }

    matched.then_some(total)
}

pub fn is_virtual_device(name: &str) -> bool {
    VIRTUAL_DEVICE_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

/// Reads the host's summed whole-disk I/O counters.
///
/// # Errors
///
/// Returns [`TaskwardenError::CounterUnavailable`] if `/proc/diskstats` cannot
/// be read or lists no whole disks.
pub fn read_disk_io() -> Result<DiskIo> {
    let contents = std::fs::read_to_string(DISKSTATS_PATH).map_err(|e| {
        TaskwardenError::CounterUnavailable(format!("cannot read {DISKSTATS_PATH}: {e}"))
    })?;
    let sys_block = Path::new(SYS_BLOCK_DIR);
    // Device names containing '/' appear with '!' under /sys/block.
    parse_diskstats(&contents, |name| {
        !is_virtual_device(name) && sys_block.join(name.replace('/', "!")).exists()
    })
    .ok_or_else(|| {
        TaskwardenError::CounterUnavailable(format!("no block devices listed in {DISKSTATS_PATH}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
   8       0 sda 1000 10 2048 500 400 20 4096 900 0 1200 1400 0 0 0 0
   8       1 sda1 900 10 2000 450 390 20 4000 880 0 1100 1330 0 0 0 0
 259       0 nvme0n1 50 0 100 10 25 0 50 5 0 15 15
   7       0 loop0 3 0 6 0 0 0 0 0 0 0 0
";

    #[test]
    fn test_sums_only_whole_disks() {
        let io = parse_diskstats(SAMPLE, |name| name == "sda" || name == "nvme0n1").unwrap();
        assert_eq!(io.read_ops, 1050);
        assert_eq!(io.read_bytes, (2048 + 100) * 512);
        assert_eq!(io.write_ops, 425);
        assert_eq!(io.write_bytes, (4096 + 50) * 512);
    }

    #[test]
    fn test_virtual_devices_are_not_disks() {
        for name in ["loop0", "loop12", "ram0", "zram0"] {
            assert!(is_virtual_device(name), "{name}");
        }
        for name in ["sda", "nvme0n1", "vda", "dm-0", "md0"] {
            assert!(!is_virtual_device(name), "{name}");
        }

        // Every SAMPLE device is listed under /sys/block; only loop0 is virtual.
        let io =
            parse_diskstats(SAMPLE, |name| name != "sda1" && !is_virtual_device(name)).unwrap();
        assert_eq!(io.read_ops, 1050);
    }

    #[test]
    fn test_no_matching_disk_is_none() {
        assert!(parse_diskstats(SAMPLE, |_| false).is_none());
        assert!(parse_diskstats("", |_| true).is_none());
    }

    #[test]
    fn test_skips_short_and_garbled_lines() {
        let contents = "8 0 sda 1 2\n8 16 sdb x 0 8 0 1 0 8 0\n8 32 sdc 2 0 8 0 1 0 8 0 0 0 0\n";
        let io = parse_diskstats(contents, |_| true).unwrap();
        assert_eq!(io.read_ops, 2);
        assert_eq!(io.write_ops, 1);
    }
}
