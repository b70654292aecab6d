use super::{count_sst_files, test_options, wait_for};
use crate::{Database, DbOptions};
use anyhow::Result;
use tempfile::tempdir;

// --------------------- Basic CRUD ---------------------

#[test]
fn put_get_delete_roundtrip() -> Result<()> {
    let dir = tempdir()?;
    let db = Database::open_with(dir.path(), test_options())?;

    db.put("name", "Alice")?;
    db.put("age", 30i64)?;
    db.put("score", 95.5f64)?;
    db.put("active", true)?;
    db.put("data", vec![1u8, 2, 3, 4, 5])?;

    assert_eq!(db.get("name")?.unwrap().as_str()?, "Alice");
    assert_eq!(db.get("age")?.unwrap().as_i64()?, 30);
    assert_eq!(db.get("score")?.unwrap().as_f64()?, 95.5);
    assert!(db.get("active")?.unwrap().as_bool()?);
    assert_eq!(db.get("data")?.unwrap().as_bytes()?, &[1, 2, 3, 4, 5]);

    // Overwrite.
    db.put("age", 31i64)?;
    assert_eq!(db.get("age")?.unwrap().as_i64()?, 31);

    // Delete.
    db.delete("data")?;
    assert!(db.get("data")?.is_none());

    db.close()?;
    Ok(())
}

#[test]
fn get_of_missing_key_is_none() -> Result<()> {
    let dir = tempdir()?;
    let db = Database::open_with(dir.path(), test_options())?;
    assert!(db.get("never-written")?.is_none());
    Ok(())
}

#[test]
fn typed_access_enforces_the_stored_tag() -> Result<()> {
    let dir = tempdir()?;
    let db = Database::open_with(dir.path(), test_options())?;

    db.put("n", 7u32)?;
    let v = db.get("n")?.unwrap();
    assert_eq!(v.as_u32()?, 7);
    assert!(v.as_str().is_err());
    assert!(v.as_i32().is_err());
    Ok(())
}

// --------------------- Last-writer-wins ---------------------

#[test]
fn second_put_wins() -> Result<()> {
    let dir = tempdir()?;
    let db = Database::open_with(dir.path(), test_options())?;

    db.put("k", "v1")?;
    db.put("k", "v2")?;
    assert_eq!(db.get("k")?.unwrap().as_str()?, "v2");
    Ok(())
}

#[test]
fn delete_then_put_revives() -> Result<()> {
    let dir = tempdir()?;
    let db = Database::open_with(dir.path(), test_options())?;

    db.put("k", 1i32)?;
    db.delete("k")?;
    assert!(db.get("k")?.is_none());

    db.put("k", 2i32)?;
    assert_eq!(db.get("k")?.unwrap().as_i32()?, 2);
    Ok(())
}

#[test]
fn delete_of_absent_key_is_a_tombstone() -> Result<()> {
    let dir = tempdir()?;
    let db = Database::open_with(dir.path(), test_options())?;

    db.delete("ghost")?;
    assert!(db.get("ghost")?.is_none());
    Ok(())
}

// --------------------- Validation ---------------------

#[test]
fn empty_key_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    let db = Database::open_with(dir.path(), test_options())?;

    assert!(db.put("", 1i32).is_err());
    assert!(db.delete("").is_err());
    Ok(())
}

#[test]
fn oversized_key_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    let db = Database::open_with(dir.path(), test_options())?;

    let big = "x".repeat(crate::MAX_KEY_SIZE + 1);
    assert!(db.put(&big, 1i32).is_err());
    Ok(())
}

// --------------------- Rotation & flush ---------------------

#[test]
fn crossing_the_threshold_rotates_and_truncates_the_wal() -> Result<()> {
    let dir = tempdir()?;
    let db = Database::open_with(dir.path(), test_options())?;

    // ~1 KiB threshold; each value is 100 bytes.
    for i in 0..50u32 {
        db.put(&format!("key{:04}", i), vec![b'v'; 100])?;
    }

    // Rotation happened, and the background worker turns the queue into
    // SSTables.
    assert!(
        wait_for(|| db.sstable_count() > 0),
        "expected at least one flushed sstable"
    );

    // All keys remain readable across layers.
    for i in 0..50u32 {
        assert!(db.get(&format!("key{:04}", i))?.is_some(), "key{:04}", i);
    }

    // The WAL only holds records written after the last rotation.
    let wal_len = std::fs::metadata(dir.path().join(crate::WAL_FILENAME))?.len();
    assert!(wal_len < 2048, "wal should have been truncated, len={}", wal_len);
    Ok(())
}

#[test]
fn explicit_flush_persists_everything() -> Result<()> {
    let dir = tempdir()?;
    let db = Database::open_with(dir.path(), test_options())?;

    db.put("a", 1i64)?;
    db.put("b", 2i64)?;
    db.flush()?;

    assert_eq!(count_sst_files(dir.path()), db.sstable_count());
    assert!(db.sstable_count() >= 1);
    assert_eq!(db.get("a")?.unwrap().as_i64()?, 1);
    assert_eq!(db.get("b")?.unwrap().as_i64()?, 2);

    // Flushing an empty store is a no-op.
    let before = db.sstable_count();
    db.flush()?;
    assert_eq!(db.sstable_count(), before);
    Ok(())
}

// --------------------- Close ---------------------

#[test]
fn close_is_idempotent() -> Result<()> {
    let dir = tempdir()?;
    let db = Database::open_with(dir.path(), test_options())?;
    db.put("k", "v")?;

    db.close()?;
    db.close()?;
    Ok(())
}

#[test]
fn operations_after_close_fail() -> Result<()> {
    let dir = tempdir()?;
    let db = Database::open_with(dir.path(), test_options())?;
    db.close()?;

    assert!(db.put("k", 1i32).is_err());
    assert!(db.get("k").is_err());
    assert!(db.delete("k").is_err());
    Ok(())
}

#[test]
fn sync_on_write_mode_works() -> Result<()> {
    let dir = tempdir()?;
    let db = Database::open_with(
        dir.path(),
        DbOptions {
            sync_on_write: true,
            ..test_options()
        },
    )?;

    for i in 0..10i64 {
        db.put(&format!("k{}", i), i)?;
    }
    for i in 0..10i64 {
        assert_eq!(db.get(&format!("k{}", i))?.unwrap().as_i64()?, i);
    }
    Ok(())
}
