//! Address allocation behaviour across create, delete and IV updates

mod common;

use meshcdb::{AddrCheck, Error, KeySlot, MeshKey, Node};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

#[test]
fn delete_with_store_raises_floor() {
    let mut cdb = common::memory_cdb(8);
    let key = MeshKey::from_bytes([0x4b; 16]);
    cdb.create(&key).unwrap();
    assert_eq!(cdb.subnet_get(0).unwrap().key(KeySlot::Current), &key);

    let first = cdb.node_alloc(Uuid::new_v4(), 0, 1, 0).unwrap().addr();
    let second = cdb.node_alloc(Uuid::new_v4(), 0, 2, 0).unwrap().addr();
    assert_eq!(first, 0x0001);
    assert_eq!(second, 0x0002);

    cdb.node_del(first, true).unwrap();
    assert_eq!(cdb.lowest_avail_addr(), 0x0002);
    assert_eq!(cdb.find_lowest_free_addr(1), 0x0004);
}

#[test]
fn delete_without_store_reuses_address() {
    let mut cdb = common::memory_cdb(8);
    cdb.create(&MeshKey::generate()).unwrap();

    let first = cdb.node_alloc(Uuid::new_v4(), 0, 1, 0).unwrap().addr();
    cdb.node_alloc(Uuid::new_v4(), 0, 2, 0).unwrap();

    cdb.node_del(first, false).unwrap();
    assert_eq!(cdb.lowest_avail_addr(), 0x0001);
    assert_eq!(cdb.find_lowest_free_addr(1), 0x0001);
}

#[test]
fn iv_update_releases_retired_addresses() {
    let mut cdb = common::memory_cdb(8);
    cdb.create(&MeshKey::generate()).unwrap();

    let addr = cdb.node_alloc(Uuid::new_v4(), 0, 4, 0).unwrap().addr();
    cdb.node_del(addr, true).unwrap();
    assert_eq!(cdb.find_lowest_free_addr(1), 5);

    cdb.iv_update(1, true);
    assert_eq!(cdb.find_lowest_free_addr(1), 5);
    cdb.iv_update(1, false);
    assert_eq!(cdb.find_lowest_free_addr(1), 1);
}

#[test]
fn explicit_allocation_respects_existing_ranges() {
    let mut cdb = common::memory_cdb(8);
    cdb.create(&MeshKey::generate()).unwrap();
    cdb.node_alloc(Uuid::new_v4(), 0x100, 8, 0).unwrap();

    assert_eq!(cdb.addr_is_free(0x0fe, 3).unwrap(), AddrCheck::Conflict { next: 0x108 });
    assert!(matches!(
        cdb.node_alloc(Uuid::new_v4(), 0x107, 1, 0),
        Err(Error::AlreadyExists { .. })
    ));
    assert_eq!(cdb.node_alloc(Uuid::new_v4(), 0x108, 1, 0).unwrap().addr(), 0x108);
}

#[test]
fn random_allocations_never_overlap() {
    let mut rng = StdRng::seed_from_u64(0x6d65_7368);
    let mut cdb = common::memory_cdb(32);
    cdb.create(&MeshKey::generate()).unwrap();

    for _ in 0..500 {
        let num_elem = rng.gen_range(1..=6u8);
        match rng.gen_range(0..4) {
            0 => {
                let addr = rng.gen_range(1..=0x80u16);
                let _ = cdb.node_alloc(Uuid::new_v4(), addr, num_elem, 0);
            }
            1 => {
                let candidate = cdb.find_lowest_free_addr(num_elem);
                if candidate != 0 {
                    assert_eq!(cdb.addr_is_free(candidate, num_elem).unwrap(), AddrCheck::Free);
                }
                let _ = cdb.node_alloc(Uuid::new_v4(), 0, num_elem, 0);
            }
            2 => {
                let addrs: Vec<u16> = cdb.nodes().map(Node::addr).collect();
                if !addrs.is_empty() {
                    let addr = addrs[rng.gen_range(0..addrs.len())];
                    cdb.node_del(addr, rng.gen_bool(0.5)).unwrap();
                }
            }
            _ => {
                let next = cdb.iv_index() + rng.gen_range(0..=2);
                cdb.iv_update(next, rng.gen_bool(0.5));
            }
        }

        let mut ranges: Vec<(u32, u32)> = cdb
            .nodes()
            .map(|node| {
                let start = u32::from(node.addr());
                (start, start + u32::from(node.num_elem()))
            })
            .collect();
        ranges.sort_unstable();
        for pair in ranges.windows(2) {
            assert!(pair[0].1 <= pair[1].0, "overlapping ranges {:?}", pair);
        }
    }
}
