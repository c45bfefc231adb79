//! Fixed progress checkpoints of a job run.

pub const FILES_LISTED: i32 = 10;
pub const FILES_PROCESSED: i32 = 70;
pub const FACTS_BUILT: i32 = 80;
pub const DRAFT_GENERATED: i32 = 85;
pub const COMPLETE: i32 = 100;

/// Spreads per-file work linearly between `FILES_LISTED` and `FILES_PROCESSED`.
pub fn after_file(done: usize, total: usize) -> i32 {
    if total == 0 {
        return FILES_PROCESSED;
    }
    let span = (FILES_PROCESSED - FILES_LISTED) as usize;
    FILES_LISTED + (span * done.min(total) / total) as i32
}
