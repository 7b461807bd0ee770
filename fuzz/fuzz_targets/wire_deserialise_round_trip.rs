#![no_main]
use libfuzzer_sys::fuzz_target;

use mdns_types::protocol::types::Message;

fuzz_target!(|data: &[u8]| {
    if let Ok(message) = Message::from_octets(data) {
        // pointer expansion can push a decoded message back over the
        // frame cap, so a serialise failure is fine - a crash is not
        if let Ok(serialised) = message.clone().to_octets() {
            let deserialised = Message::from_octets(&serialised);
            assert_eq!(Ok(message), deserialised);
        }
    }
});
