#![no_main]

use libfuzzer_sys::fuzz_target;
use topicbus::Topic;

fuzz_target!(|data: &str| {
    match Topic::parse(data) {
        Ok(topic) => {
            // Разобранный топик должен собираться обратно в ту же строку.
            assert_eq!(topic.as_str(), data);
            assert!(!data.split('.').any(str::is_empty));
            if !topic.has_wildcards() {
                assert!(topic.matches(&topic));
            }
        }
        Err(_) => {
            assert!(data.is_empty() || data.split('.').any(str::is_empty));
        }
    }
});
