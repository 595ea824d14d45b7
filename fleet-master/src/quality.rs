//! CRF / Opus-bitrate lookup tables, ported from `lib/quality.py`'s
//! `QualityLookup`. Target-setting itself happens on the worker side of a
//! probe it owns (spec.md §1 "external collaborator"); the master only
//! needs to serve the lookup tables back to operators/UIs at
//! `/api/config/quality_lookup.json` and answer ad hoc resolution/bitdepth
//! queries for display.

use std::collections::HashMap;

use serde_json::{Value, json};

/// CRF by resolution and bit depth, transcribed from `lib/quality.py`'s
/// nested `CRF_TABLE`. 10-bit sources get a point lower CRF than 8-bit at
/// the same resolution since AV1 10-bit encodes are visually cleaner at a
/// given CRF but the original wanted parity in perceived quality.
pub fn crf_table() -> HashMap<&'static str, HashMap<&'static str, i64>> {
    let mut table = HashMap::new();
    table.insert("720p", HashMap::from([("8", 30), ("10", 29)]));
    table.insert("1080p", HashMap::from([("8", 28), ("10", 27)]));
    table.insert("1440p", HashMap::from([("8", 26), ("10", 25)]));
    table.insert("4k", HashMap::from([("8", 24), ("10", 23)]));
    table
}

/// Opus bitrate in kbps by channel count, with a `"default"` fallback for
/// unrecognized channel layouts.
pub fn opus_bitrate_table() -> HashMap<&'static str, i64> {
    HashMap::from([("1", 64), ("2", 128), ("6", 256), ("8", 384), ("default", 128)])
}

pub fn crf_for(resolution: &str, bitdepth: i64) -> i64 {
    let table = crf_table();
    let bucket = table.get(resolution).or_else(|| table.get("1080p")).expect("1080p bucket always present");
    let key = if bitdepth >= 10 { "10" } else { "8" };
    *bucket.get(key).unwrap_or(&28)
}

pub fn opus_bitrate_for(channels: i64) -> i64 {
    let table = opus_bitrate_table();
    let key = channels.to_string();
    *table.get(key.as_str()).unwrap_or_else(|| table.get("default").expect("default always present"))
}

pub fn quality_lookup_json() -> Value {
    json!({
        "crf": crf_table(),
        "opus_bitrate": opus_bitrate_table(),
    })
}

pub fn audio_codec_lookup_json() -> Value {
    // Codecs the worker passes through untouched versus re-encodes to Opus
    // (`lib/quality.py`'s `AUDIO_PASSTHROUGH_CODECS`).
    json!({
        "passthrough": ["opus", "flac"],
        "reencode_target": "opus",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_bit_gets_lower_crf_than_eight_bit() {
        assert!(crf_for("1080p", 10) < crf_for("1080p", 8));
    }

    #[test]
    fn unknown_resolution_falls_back_to_1080p() {
        assert_eq!(crf_for("8k", 8), crf_for("1080p", 8));
    }

    #[test]
    fn unknown_channel_count_falls_back_to_default() {
        assert_eq!(opus_bitrate_for(12), 128);
    }
}
