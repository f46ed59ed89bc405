//! Cross-module properties of the directory and file-transfer helpers

use lanlink_core::file_transfer::{destination_candidates, total_chunks, CHUNK_SIZE};
use lanlink_core::{PeerDirectory, PeerId, PeerOrigin};

#[test]
fn test_merge_law_discovered_shadows_manual() {
    let mut directory = PeerDirectory::new();
    directory.discovered_up("Bravo", "192.168.1.10", 4100);
    directory
        .add_manual("192.168.1.10", 4100, Some("bravo-manual"))
        .unwrap();
    directory
        .add_manual("192.168.1.20", 4200, Some("alpha"))
        .unwrap();

    let peers = directory.list();
    assert_eq!(peers.len(), 2);
    assert_eq!(peers[0].name, "alpha");
    assert_eq!(peers[0].origin, PeerOrigin::Manual);
    assert_eq!(peers[1].id, PeerId::discovered("Bravo", 4100));
    assert_eq!(peers[1].origin, PeerOrigin::Discovered);

    // The shadowed manual entry is still addressable by id
    assert!(directory
        .get(&PeerId::manual("192.168.1.10", 4100))
        .is_ok());
}

#[test]
fn test_listing_never_repeats_an_address() {
    let mut directory = PeerDirectory::new();
    directory.discovered_up("desk", "::ffff:10.0.0.5", 4000);
    directory.add_manual("10.0.0.5", 4000, None).unwrap();
    directory
        .upsert_from_contact(Some("desk"), "10.0.0.5", 4000)
        .unwrap();

    let peers = directory.list();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].host, "10.0.0.5");
}

#[test]
fn test_mapped_ipv4_equivalent_for_lookups() {
    let mut directory = PeerDirectory::new();
    let created = directory
        .upsert_from_contact(Some("desk"), "::ffff:192.168.1.5", 4100)
        .unwrap();
    let again = directory
        .upsert_from_contact(None, "192.168.1.5", 4100)
        .unwrap();
    assert!(created.created);
    assert!(!again.created);
    assert_eq!(created.peer.id, again.peer.id);
    assert_eq!(
        directory.find_by_host("192.168.1.5").unwrap().id,
        created.peer.id
    );
}

#[test]
fn test_sort_is_case_insensitive_then_id() {
    let mut directory = PeerDirectory::new();
    directory.add_manual("10.0.0.3", 1, Some("beta")).unwrap();
    directory.add_manual("10.0.0.2", 1, Some("Alpha")).unwrap();
    directory.add_manual("10.0.0.1", 1, Some("alpha")).unwrap();

    let names: Vec<String> = directory
        .list()
        .into_iter()
        .map(|peer| format!("{}@{}", peer.name, peer.host))
        .collect();
    assert_eq!(names, vec!["alpha@10.0.0.1", "Alpha@10.0.0.2", "beta@10.0.0.3"]);
}

#[test]
fn test_file_of_150000_bytes_needs_three_chunks() {
    assert_eq!(total_chunks(150_000, CHUNK_SIZE), 3);
}

#[test]
fn test_second_report_gets_numbered_name() {
    let dir = tempfile::tempdir().unwrap();
    let mut candidates = destination_candidates(dir.path(), "report.pdf");
    assert_eq!(candidates.next().unwrap(), dir.path().join("report.pdf"));
    assert_eq!(candidates.next().unwrap(), dir.path().join("report (1).pdf"));
    assert_eq!(candidates.next().unwrap(), dir.path().join("report (2).pdf"));
}
