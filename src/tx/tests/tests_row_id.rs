use crate::tx::RowId;

#[test]
fn packs_partition_and_local_row() {
    let id = RowId::new(3, 12_345);
    assert_eq!(id.partition_id(), 3);
    assert_eq!(id.local(), 12_345);
    assert_eq!(RowId::from_raw(id.raw()), id);
    assert_eq!(id.to_string(), "3:12345");
}

#[test]
fn ordering_follows_partition_then_row() {
    let mut ids = vec![RowId::new(2, 0), RowId::new(1, 99), RowId::new(1, 3), RowId::new(3, 1)];
    ids.sort();
    assert_eq!(
        ids,
        vec![RowId::new(1, 3), RowId::new(1, 99), RowId::new(2, 0), RowId::new(3, 1)]
    );
}

#[test]
fn local_row_is_masked() {
    let max_local = (1u64 << RowId::LOCAL_BITS) - 1;
    let id = RowId::new(7, max_local);
    assert_eq!(id.partition_id(), 7);
    assert_eq!(id.local(), max_local);
}
