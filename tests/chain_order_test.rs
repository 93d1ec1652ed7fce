use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use volrestore::block::{shard_path, ShardedLocator};
use volrestore::{Backup, Block, CodecId, Compositor, VolumeBackupChain};

const SLOT: u64 = 4;
const SLOTS: u64 = 4;

/// (timestamp, [(slot, fill byte)]) per backup, in generation order.
type ChainSpec = Vec<(i64, Vec<(u64, u8)>)>;

fn chain_spec() -> impl Strategy<Value = ChainSpec> {
    prop::collection::vec(
        (0i64..3, prop::collection::btree_map(0..SLOTS, any::<u8>(), 0..=SLOTS as usize)),
        1..6,
    )
    .prop_map(|v| v.into_iter().map(|(t, m)| (t, m.into_iter().collect())).collect())
}

fn checksum(payload: &[u8]) -> String {
    blake3::hash(payload).to_hex().to_string()
}

/// Store every payload the chain references and build its backups, keeping
/// generation index as identifier so ties have a known order.
fn materialise(volume: &Path, spec: &ChainSpec) -> Vec<Backup> {
    spec.iter()
        .enumerate()
        .map(|(i, (t, blocks))| {
            let blocks = blocks.iter().map(|&(slot, byte)| {
                let payload = [byte; SLOT as usize];
                let sum = checksum(&payload);
                let path = shard_path(volume, &sum).unwrap();
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                fs::write(path, payload).unwrap();
                Block::new(slot * SLOT, sum)
            }).collect();
            Backup {
                identifier:    format!("backup_{i:02}"),
                name:          None,
                timestamp:     Utc.timestamp_opt(*t, 0).unwrap(),
                size:          SLOT * SLOTS,
                compression:   CodecId::None,
                blocks,
                manifest_path: PathBuf::from(format!("backup_{i:02}.cfg")),
            }
        })
        .collect()
}

/// Newest writer per slot wins, ordering by (timestamp, identifier).
fn model(spec: &ChainSpec) -> Vec<u8> {
    let mut owner: HashMap<u64, ((i64, usize), u8)> = HashMap::new();
    for (i, (t, blocks)) in spec.iter().enumerate() {
        for &(slot, byte) in blocks {
            let key = (*t, i);
            match owner.get(&slot) {
                Some((k, _)) if *k > key => {}
                _ => { owner.insert(slot, (key, byte)); }
            }
        }
    }
    let mut image = vec![0u8; (SLOT * SLOTS) as usize];
    for (slot, (_, byte)) in owner {
        let start = (slot * SLOT) as usize;
        image[start..start + SLOT as usize].fill(byte);
    }
    image
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn discovery_order_never_changes_the_image(
        (spec, order) in chain_spec().prop_flat_map(|spec| {
            let idx: Vec<usize> = (0..spec.len()).collect();
            (Just(spec), Just(idx).prop_shuffle())
        })
    ) {
        let tmp = TempDir::new().unwrap();
        let backups = materialise(tmp.path(), &spec);
        let shuffled: Vec<Backup> = order.iter().map(|&i| backups[i].clone()).collect();

        let compositor = Compositor::new(Box::new(ShardedLocator::new(tmp.path())));
        let a = compositor.composite(&VolumeBackupChain::new("v", tmp.path(), backups).unwrap()).unwrap();
        let b = compositor.composite(&VolumeBackupChain::new("v", tmp.path(), shuffled).unwrap()).unwrap();

        prop_assert_eq!(&a.image, &b.image);
        prop_assert_eq!(a.image, model(&spec));
    }
}
