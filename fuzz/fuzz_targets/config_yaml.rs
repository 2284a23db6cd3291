#![no_main]

use libfuzzer_sys::fuzz_target;
use sati_core::TrustConfig;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    // Anything that loads must also produce usable engine parameters.
    if let Ok(config) = TrustConfig::from_yaml_str(text) {
        assert!(config.payment_weighting().is_ok());
        assert!(config.score_policy().is_ok());
    }
});
