//! Capacity-bounded, numbered shard folders under the archive root.
//!
//! Shards are named `1`, `2`, ... and only the highest ordinal ever receives
//! new documents. A slot is a numeric file stem inside a shard; `7.pdf`,
//! `7.json` and `7.jpg` together make up slot 7.

use crate::IngestError;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

pub const DEFAULT_SHARD_CAPACITY: usize = 200;

const SLOT_EXTENSIONS: [&str; 2] = ["pdf", "json"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotAllocation {
    pub shard_dir: PathBuf,
    pub ordinal: u64,
    pub slot: u64,
}

impl SlotAllocation {
    pub fn file(&self, extension: &str) -> PathBuf {
        self.shard_dir.join(format!("{}.{extension}", self.slot))
    }
}

/// A slot whose PDF has already been moved into place.
#[derive(Debug, Clone)]
pub struct ArchivedSlot {
    pub allocation: SlotAllocation,
    pub pdf_path: PathBuf,
}

#[derive(Debug)]
pub struct ShardedStore {
    root: PathBuf,
    capacity: usize,
    claim_lock: Mutex<()>,
}

impl ShardedStore {
    pub fn new(root: impl Into<PathBuf>, capacity: usize) -> Result<Self, IngestError> {
        if capacity == 0 {
            return Err(IngestError::InvalidArgument(
                "shard capacity must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            root: root.into(),
            capacity,
            claim_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Picks the shard and slot for the next document, creating shard
    /// folders as needed. Nothing is reserved: callers that need the slot to
    /// stay theirs must go through [`ShardedStore::claim`].
    pub fn allocate(&self) -> Result<SlotAllocation, IngestError> {
        fs::create_dir_all(&self.root).map_err(|source| IngestError::Allocation {
            path: self.root.clone(),
            source,
        })?;

        let Some(latest) = shard_ordinals(&self.root)?.pop() else {
            return self.open_shard(1);
        };

        let shard_dir = self.root.join(latest.to_string());
        let occupied = occupied_slots(&shard_dir)?;

        if occupied.len() >= self.capacity {
            debug!(shard = latest, occupied = occupied.len(), "shard full");
            return self.open_shard(latest + 1);
        }

        Ok(SlotAllocation {
            shard_dir,
            ordinal: latest,
            slot: lowest_free_slot(&occupied),
        })
    }

    /// Allocates a slot and moves `source` into it as `<slot>.pdf` while
    /// holding the claim lock, so concurrent callers never share a slot.
    pub fn claim(&self, source: &Path) -> Result<ArchivedSlot, IngestError> {
        let _guard = self
            .claim_lock
            .lock()
            .map_err(|_| IngestError::Poisoned("shard claim lock"))?;

        let allocation = self.allocate()?;
        let pdf_path = allocation.file("pdf");
        move_file(source, &pdf_path)?;

        info!(
            source = %source.display(),
            target = %pdf_path.display(),
            "claimed shard slot"
        );

        Ok(ArchivedSlot {
            allocation,
            pdf_path,
        })
    }

    fn open_shard(&self, ordinal: u64) -> Result<SlotAllocation, IngestError> {
        let shard_dir = self.root.join(ordinal.to_string());
        fs::create_dir_all(&shard_dir).map_err(|source| IngestError::Allocation {
            path: shard_dir.clone(),
            source,
        })?;
        info!(shard = %shard_dir.display(), "opened new shard");

        Ok(SlotAllocation {
            shard_dir,
            ordinal,
            slot: 1,
        })
    }
}

/// Ordinals of every shard folder, ascending.
fn shard_ordinals(root: &Path) -> Result<Vec<u64>, IngestError> {
    let mut ordinals = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(ordinal) = parse_positive(&entry.file_name().to_string_lossy()) {
            ordinals.push(ordinal);
        }
    }
    ordinals.sort_unstable();
    Ok(ordinals)
}

/// Slot numbers taken in a shard, by file stem, so an orphaned PDF without
/// its JSON sibling still holds its slot.
fn occupied_slots(shard_dir: &Path) -> Result<BTreeSet<u64>, IngestError> {
    let mut slots = BTreeSet::new();
    for entry in fs::read_dir(shard_dir)? {
        let path = entry?.path();
        let tracked = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                SLOT_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            });
        if !tracked {
            continue;
        }
        if let Some(slot) = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(parse_positive)
        {
            slots.insert(slot);
        }
    }
    Ok(slots)
}

fn lowest_free_slot(occupied: &BTreeSet<u64>) -> u64 {
    let mut candidate = 1;
    for slot in occupied {
        if *slot != candidate {
            break;
        }
        candidate += 1;
    }
    candidate
}

fn parse_positive(name: &str) -> Option<u64> {
    if name.is_empty() || !name.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    name.parse::<u64>().ok().filter(|value| *value > 0)
}

/// Renames `from` to `to`, falling back to copy-then-remove when the two
/// paths sit on different filesystems.
pub fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_error) => {
            if !from.is_file() {
                return Err(rename_error);
            }
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::tempdir;

    fn write_source(dir: &Path, name: &str) -> Result<PathBuf, std::io::Error> {
        let path = dir.join(name);
        fs::write(&path, name.as_bytes())?;
        Ok(path)
    }

    #[test]
    fn empty_store_starts_at_shard_one_slot_one() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = ShardedStore::new(dir.path().join("archive"), 3)?;

        let allocation = store.allocate()?;
        assert_eq!(allocation.ordinal, 1);
        assert_eq!(allocation.slot, 1);
        assert!(allocation.shard_dir.is_dir());
        Ok(())
    }

    #[test]
    fn capacity_plus_one_documents_span_two_shards() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let inbox = dir.path().join("inbox");
        fs::create_dir(&inbox)?;
        let store = ShardedStore::new(dir.path().join("archive"), 3)?;

        for index in 0..4 {
            let source = write_source(&inbox, &format!("doc-{index}.pdf"))?;
            store.claim(&source)?;
        }

        let ordinals = shard_ordinals(store.root())?;
        assert_eq!(ordinals, vec![1, 2]);
        assert_eq!(occupied_slots(&store.root().join("1"))?.len(), 3);
        assert_eq!(occupied_slots(&store.root().join("2"))?.len(), 1);
        Ok(())
    }

    #[test]
    fn gaps_are_refilled_before_appending() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let shard = dir.path().join("1");
        fs::create_dir_all(&shard)?;
        fs::write(shard.join("1.pdf"), b"a")?;
        fs::write(shard.join("1.json"), b"{}")?;
        fs::write(shard.join("3.pdf"), b"c")?;
        fs::write(shard.join("3.json"), b"{}")?;

        let store = ShardedStore::new(dir.path(), 10)?;
        assert_eq!(store.allocate()?.slot, 2);
        Ok(())
    }

    #[test]
    fn orphan_pdf_counts_as_occupied() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let shard = dir.path().join("1");
        fs::create_dir_all(&shard)?;
        fs::write(shard.join("1.pdf"), b"a")?;
        fs::write(shard.join("1.json"), b"{}")?;
        fs::write(shard.join("2.pdf"), b"orphan")?;
        fs::write(shard.join("2.jpg"), b"thumb")?;

        let store = ShardedStore::new(dir.path(), 2)?;
        let allocation = store.allocate()?;
        assert_eq!(allocation.ordinal, 2);
        assert_eq!(allocation.slot, 1);
        Ok(())
    }

    #[test]
    fn non_numeric_folders_are_ignored() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::create_dir_all(dir.path().join("duplicates_moved"))?;
        fs::create_dir_all(dir.path().join("0"))?;
        fs::create_dir_all(dir.path().join("9"))?;
        fs::create_dir_all(dir.path().join("10"))?;

        let store = ShardedStore::new(dir.path(), 5)?;
        assert_eq!(store.allocate()?.ordinal, 10);
        Ok(())
    }

    #[test]
    fn older_full_shard_never_reopens() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::create_dir_all(dir.path().join("1"))?;
        fs::create_dir_all(dir.path().join("2"))?;
        fs::write(dir.path().join("2").join("1.pdf"), b"x")?;

        let store = ShardedStore::new(dir.path(), 2)?;
        let allocation = store.allocate()?;
        assert_eq!(allocation.ordinal, 2);
        assert_eq!(allocation.slot, 2);
        Ok(())
    }

    #[test]
    fn concurrent_claims_never_share_a_slot() -> Result<(), Box<dyn std::error::Error>> {
        const DOCUMENTS: usize = 10;
        const CAPACITY: usize = 3;

        let dir = tempdir()?;
        let inbox = dir.path().join("inbox");
        fs::create_dir(&inbox)?;
        let store = Arc::new(ShardedStore::new(dir.path().join("archive"), CAPACITY)?);
        let start = Arc::new(Barrier::new(DOCUMENTS));

        let mut workers = Vec::new();
        for index in 0..DOCUMENTS {
            let source = write_source(&inbox, &format!("doc-{index}.pdf"))?;
            let store = Arc::clone(&store);
            let start = Arc::clone(&start);
            workers.push(thread::spawn(move || {
                start.wait();
                store.claim(&source).map(|slot| slot.pdf_path)
            }));
        }

        let mut claimed = HashSet::new();
        for worker in workers {
            let pdf = worker.join().map_err(|_| "claim thread panicked")??;
            assert!(pdf.is_file());
            assert!(claimed.insert(pdf), "slot handed out twice");
        }
        assert_eq!(claimed.len(), DOCUMENTS);

        let ordinals = shard_ordinals(store.root())?;
        assert_eq!(ordinals.len(), DOCUMENTS.div_ceil(CAPACITY));
        let sizes = ordinals
            .iter()
            .map(|ordinal| {
                occupied_slots(&store.root().join(ordinal.to_string())).map(|slots| slots.len())
            })
            .collect::<Result<Vec<_>, _>>()?;
        assert_eq!(sizes, vec![3, 3, 3, 1]);
        Ok(())
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(ShardedStore::new("unused", 0).is_err());
    }
}
