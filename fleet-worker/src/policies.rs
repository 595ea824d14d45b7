//! Skip policies the worker applies before spending time encoding a job
//! (spec.md §4.7): dynamic HDR is refused outright, and a finished encode
//! that doesn't save enough space is discarded rather than uploaded.

use fleet_model::JobAssignment;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    DynamicHdr,
}

/// HDR10+ and Dolby Vision carry dynamic metadata the worker's encoder
/// cannot reproduce; rather than silently dropping it, the job is refused
/// before any bytes move.
pub fn pre_flight_skip(job: &JobAssignment) -> Option<SkipReason> {
    if job.source_hdr_dynamic {
        return Some(SkipReason::DynamicHdr);
    }
    None
}

/// True if the encode saved enough space to be worth replacing the
/// original (spec.md §4.7 "not worth it" skip). `min_savings_percent` is
/// operator-configured (default 5%, see `Args::min_savings_percent`).
pub fn is_worth_keeping(original_size: i64, encoded_size: i64, min_savings_percent: f64) -> bool {
    if original_size <= 0 {
        return true;
    }
    let savings_percent = ((original_size - encoded_size) as f64 / original_size as f64) * 100.0;
    savings_percent >= min_savings_percent
}
