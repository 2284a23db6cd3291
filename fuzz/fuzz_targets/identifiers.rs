#![no_main]

use libfuzzer_sys::fuzz_target;
use sati_core::{AgentRef, ContextDigest, FeedbackId, MandateId};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(id) = MandateId::parse(text) {
        assert_eq!(id.as_str(), text);
    }
    if let Ok(agent) = AgentRef::parse(text) {
        assert_eq!(AgentRef::parse(&agent.to_string()).ok(), Some(agent));
    }
    if let Ok(digest) = ContextDigest::parse(text) {
        assert_eq!(ContextDigest::parse(&digest.to_string()).ok(), Some(digest));
    }
    let _ = FeedbackId::parse(text);
    let _ = sati_core::compute_context_digest(text);
});
