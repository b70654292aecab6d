use super::{test_options, wait_for};
use crate::{Database, DbOptions};
use anyhow::Result;
use std::io::Write;
use tempfile::tempdir;

// --------------------- WAL replay ---------------------

#[test]
fn reopen_recovers_unflushed_writes() -> Result<()> {
    let dir = tempdir()?;

    {
        let db = Database::open_with(dir.path(), test_options())?;
        db.put("name", "Alice")?;
        db.put("count", 42i64)?;
        db.close()?;
    }

    let db = Database::open_with(dir.path(), test_options())?;
    assert_eq!(db.get("name")?.unwrap().as_str()?, "Alice");
    assert_eq!(db.get("count")?.unwrap().as_i64()?, 42);
    Ok(())
}

#[test]
fn reopen_recovers_a_thousand_keys() -> Result<()> {
    let dir = tempdir()?;

    {
        let db = Database::open_with(dir.path(), test_options())?;
        for i in 0..1000u32 {
            db.put(&format!("key{:04}", i), i)?;
        }
        db.close()?;
    }

    let db = Database::open_with(dir.path(), test_options())?;
    for i in 0..1000u32 {
        let v = db
            .get(&format!("key{:04}", i))?
            .unwrap_or_else(|| panic!("key{:04} lost across reopen", i));
        assert_eq!(v.as_u32()?, i);
    }
    Ok(())
}

#[test]
fn reopen_preserves_deletes() -> Result<()> {
    let dir = tempdir()?;

    {
        let db = Database::open_with(dir.path(), test_options())?;
        for i in 0..1000u32 {
            db.put(&format!("key{:04}", i), i)?;
        }
        for i in (0..1000u32).step_by(2) {
            db.delete(&format!("key{:04}", i))?;
        }
        db.close()?;
    }

    let db = Database::open_with(dir.path(), test_options())?;
    for i in 0..1000u32 {
        let got = db.get(&format!("key{:04}", i))?;
        if i % 2 == 0 {
            assert!(got.is_none(), "key{:04} should stay deleted", i);
        } else {
            assert_eq!(got.unwrap().as_u32()?, i);
        }
    }
    Ok(())
}

#[test]
fn drop_without_close_still_recovers() -> Result<()> {
    let dir = tempdir()?;

    {
        let db = Database::open_with(dir.path(), test_options())?;
        db.put("k", "survives drop")?;
        // Drop runs best-effort close.
    }

    let db = Database::open_with(dir.path(), test_options())?;
    assert_eq!(db.get("k")?.unwrap().as_str()?, "survives drop");
    Ok(())
}

#[test]
fn torn_wal_tail_is_clipped_not_fatal() -> Result<()> {
    let dir = tempdir()?;

    {
        let db = Database::open_with(dir.path(), test_options())?;
        db.put("complete", "yes")?;
        db.close()?;
    }

    // Simulate a crash mid-append: garbage bytes at the tail.
    let wal_path = dir.path().join(crate::WAL_FILENAME);
    let mut f = std::fs::OpenOptions::new().append(true).open(&wal_path)?;
    f.write_all(&[0u8, 1, 2, 3, 4])?;
    drop(f);

    let db = Database::open_with(dir.path(), test_options())?;
    assert_eq!(db.get("complete")?.unwrap().as_str()?, "yes");
    Ok(())
}

// --------------------- SSTable recovery ---------------------

#[test]
fn reopen_finds_flushed_sstables() -> Result<()> {
    let dir = tempdir()?;

    {
        let db = Database::open_with(dir.path(), test_options())?;
        for i in 0..20u32 {
            db.put(&format!("k{:03}", i), i)?;
        }
        db.flush()?;
        db.put("memtable-only", "also recovered")?;
        db.close()?;
    }

    let db = Database::open_with(dir.path(), test_options())?;
    assert!(db.sstable_count() >= 1);
    for i in 0..20u32 {
        assert_eq!(db.get(&format!("k{:03}", i))?.unwrap().as_u32()?, i);
    }
    assert_eq!(
        db.get("memtable-only")?.unwrap().as_str()?,
        "also recovered"
    );
    Ok(())
}

#[test]
fn newest_sstable_wins_after_reopen() -> Result<()> {
    let dir = tempdir()?;

    {
        let db = Database::open_with(dir.path(), test_options())?;
        db.put("k", "v1")?;
        db.flush()?;
        db.put("k", "v2")?;
        db.flush()?;
        assert!(db.sstable_count() >= 2);
        db.close()?;
    }

    let db = Database::open_with(dir.path(), test_options())?;
    assert_eq!(db.get("k")?.unwrap().as_str()?, "v2");
    Ok(())
}

#[test]
fn corrupt_sstable_refuses_to_open() -> Result<()> {
    let dir = tempdir()?;

    {
        let db = Database::open_with(dir.path(), test_options())?;
        db.put("k", "v")?;
        db.flush()?;
        db.close()?;
    }

    // Overwrite the table's magic with garbage.
    let sst = std::fs::read_dir(dir.path())?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| p.extension().map(|x| x == "sst").unwrap_or(false))
        .expect("one sstable on disk");
    let mut bytes = std::fs::read(&sst)?;
    bytes[0] = b'X';
    std::fs::write(&sst, bytes)?;

    assert!(Database::open_with(dir.path(), test_options()).is_err());
    Ok(())
}

#[test]
fn leftover_tmp_files_are_cleaned_up() -> Result<()> {
    let dir = tempdir()?;
    std::fs::write(dir.path().join("sstable_123.sst.tmp"), b"partial")?;

    let db = Database::open_with(dir.path(), test_options())?;
    assert!(!dir.path().join("sstable_123.sst.tmp").exists());
    assert_eq!(db.sstable_count(), 0);
    Ok(())
}

// --------------------- Durability end to end ---------------------

#[test]
fn closed_and_reopened_database_matches_final_state() -> Result<()> {
    let dir = tempdir()?;
    let opts = DbOptions {
        flush_threshold: 512,
        ..test_options()
    };

    {
        let db = Database::open_with(dir.path(), opts.clone())?;
        for round in 0..3 {
            for i in 0..50u32 {
                db.put(&format!("k{:03}", i), i + round * 1000)?;
            }
        }
        for i in (0..50u32).step_by(7) {
            db.delete(&format!("k{:03}", i))?;
        }
        // Let the background flush do some of the work before closing.
        wait_for(|| db.sstable_count() > 0);
        db.close()?;
    }

    let db = Database::open_with(dir.path(), opts)?;
    for i in 0..50u32 {
        let got = db.get(&format!("k{:03}", i))?;
        if i % 7 == 0 {
            assert!(got.is_none(), "k{:03} was deleted", i);
        } else {
            assert_eq!(got.unwrap().as_u32()?, i + 2000, "k{:03}", i);
        }
    }
    Ok(())
}
