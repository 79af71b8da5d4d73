//! Optional structured per-frame telemetry, gated behind the `diagnostics`
//! cargo feature. Off by default: a caller encoding a live stream pays
//! nothing for it.
//!
//! Serialized with `serde`/`serde_json` and timestamped with `chrono`, the
//! same combination shine's own instrumentation would reach for if it had
//! any — this crate's own predecessor just `println!`'d from inside the bit
//! packer during bring-up (see `bitstream.rs`'s module docs).

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One frame's worth of rate-control telemetry: enough to diagnose a
/// bitrate spike or an outer loop that failed to converge without
/// re-running the encoder under a debugger.
#[derive(Debug, Clone, Serialize)]
pub struct FrameDiagnostics {
    pub captured_at: DateTime<Utc>,
    pub bits_used: i32,
    pub main_data_begin: i32,
    pub granules: Vec<GranuleDiagnostics>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GranuleDiagnostics {
    pub channel: usize,
    pub granule: usize,
    pub global_gain: i32,
    pub part2_3_length: i32,
    pub over_count: i32,
}

impl FrameDiagnostics {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_diagnostics_round_trips_through_json() {
        let diag = FrameDiagnostics {
            captured_at: Utc::now(),
            bits_used: 4000,
            main_data_begin: 12,
            granules: vec![GranuleDiagnostics {
                channel: 0,
                granule: 0,
                global_gain: 200,
                part2_3_length: 1800,
                over_count: 0,
            }],
        };
        let json = diag.to_json().expect("serialization should succeed");
        assert!(json.contains("\"bits_used\":4000"));
    }
}
