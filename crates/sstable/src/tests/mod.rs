
use memtable::Record;
use value::Value;

/// Shorthand for a live record.
pub fn put(ts: i64, v: impl Into<Value>) -> Record {
    Record {
        timestamp: ts,
        value: Some(v.into()),
    }
}

/// Shorthand for a tombstone.
pub fn del(ts: i64) -> Record {
    Record {
        timestamp: ts,
        value: None,
    }
}
