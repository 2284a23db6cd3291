#![no_main]

use libfuzzer_sys::fuzz_target;
use sati_core::{PaymentWeighting, ScorePolicy, TrustSnapshot};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(snapshot) = TrustSnapshot::from_json(text) else {
        return;
    };
    // Restore must either reject or rebuild engines without panicking.
    let _ = snapshot.restore(PaymentWeighting::default(), ScorePolicy::equal_weighted());
});
